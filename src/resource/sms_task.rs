//! SMS migration tasks
//!
//! A task is created synchronously. Starting it is a separate action whose
//! progress is observed until the task runs; speed limits and
//! configuration settings are written through their own endpoints after
//! the task exists.

use super::mapper::{build_body, bytes_to_mb, mb_to_bytes, path_search, path_search_str};
use super::{ApiCall, ResourceData, ResourceKind, Timeouts};
use crate::cloud::client::ServiceClient;
use crate::cloud::error::ApiError;
use crate::waiter::WaitRules;
use async_trait::async_trait;
use reqwest::Method;
use serde_json::{json, Map, Value};
use std::time::Duration;

/// Operations accepted by the task action endpoint
pub const TASK_ACTIONS: &[&str] = &["start", "stop", "restart"];

/// Server Migration Service task
#[derive(Debug, Clone, Copy, Default)]
pub struct SmsTask;

fn task_path(id: &str) -> String {
    format!("v3/tasks/{}", urlencoding::encode(id))
}

fn int_field(value: &Value, key: &str) -> i64 {
    value.get(key).and_then(|v| v.as_i64()).unwrap_or_default()
}

/// Map a source server's disk layout onto the target disk request
fn disks_from_source(disks: &[Value]) -> Vec<Value> {
    disks
        .iter()
        .map(|disk| {
            json!({
                "name": disk.get("name"),
                "device_use": disk.get("device_use"),
                "size": int_field(disk, "size"),
                "used_size": int_field(disk, "used_size"),
                "physical_volumes": disk
                    .get("physical_volumes")
                    .and_then(|v| v.as_array())
                    .map(|pvs| pvs.iter().map(physical_volume_request).collect::<Vec<_>>())
                    .unwrap_or_default(),
            })
        })
        .collect()
}

fn physical_volume_request(pv: &Value) -> Value {
    json!({
        "name": pv.get("name"),
        "device_use": pv.get("device_use"),
        "file_system": pv.get("file_system"),
        "index": pv.get("index"),
        "mount_point": pv.get("mount_point"),
        "size": int_field(pv, "size"),
        "used_size": int_field(pv, "used_size"),
        "uuid": pv.get("uuid"),
    })
}

/// Size attribute in MiB converted to bytes
fn size_in_bytes(item: &Value, key: &str) -> Result<i64, ApiError> {
    let mb = int_field(item, key);
    mb_to_bytes(mb).ok_or_else(|| {
        ApiError::invalid_request(format!("disk {} of {} MiB is out of range", key, mb))
    })
}

fn physical_volume_from_attributes(pv: &Value) -> Result<Value, ApiError> {
    Ok(json!({
        "name": pv.get("name"),
        "device_use": pv.get("device_type"),
        "file_system": pv.get("file_system"),
        "index": pv.get("index"),
        "mount_point": pv.get("mount_point"),
        "size": size_in_bytes(pv, "size")?,
        "used_size": size_in_bytes(pv, "used_size")?,
        "uuid": pv.get("uuid"),
    }))
}

/// Map user-supplied disks (sizes in MiB) onto the target disk request
fn disks_from_attributes(disks: &[Value]) -> Result<Vec<Value>, ApiError> {
    disks
        .iter()
        .map(|disk| {
            let physical_volumes = disk
                .get("physical_volumes")
                .and_then(|v| v.as_array())
                .map(|pvs| {
                    pvs.iter()
                        .map(physical_volume_from_attributes)
                        .collect::<Result<Vec<_>, _>>()
                })
                .transpose()?
                .unwrap_or_default();

            Ok(json!({
                "name": disk.get("name"),
                "device_use": disk.get("device_type"),
                "size": size_in_bytes(disk, "size")?,
                "used_size": size_in_bytes(disk, "used_size")?,
                "physical_volumes": physical_volumes,
            }))
        })
        .collect()
}

/// Flatten the task's target disks (sizes in MiB)
fn flatten_target_disks(disks: &[Value]) -> Value {
    Value::Array(
        disks
            .iter()
            .map(|disk| {
                json!({
                    "name": disk.get("name"),
                    "device_type": disk.get("device_use"),
                    "size": bytes_to_mb(int_field(disk, "size")),
                    "used_size": bytes_to_mb(int_field(disk, "used_size")),
                    "disk_id": disk.get("disk_id"),
                    "physical_volumes": disk
                        .get("physical_volumes")
                        .and_then(|v| v.as_array())
                        .map(|pvs| {
                            pvs.iter()
                                .map(|pv| {
                                    json!({
                                        "name": pv.get("name"),
                                        "device_type": pv.get("device_use"),
                                        "size": bytes_to_mb(int_field(pv, "size")),
                                        "used_size": bytes_to_mb(int_field(pv, "used_size")),
                                        "file_system": pv.get("file_system"),
                                        "mount_point": pv.get("mount_point"),
                                        "index": pv.get("index"),
                                        "uuid": pv.get("uuid"),
                                    })
                                })
                                .collect::<Vec<_>>()
                        })
                        .unwrap_or_default(),
                })
            })
            .collect(),
    )
}

/// Pick `keys` from each object of a list attribute
fn pick_list(data: &ResourceData, attr: &str, keys: &[&str]) -> Vec<Value> {
    data.get(attr)
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .map(|item| {
                    let picked: Map<String, Value> = keys
                        .iter()
                        .filter_map(|k| item.get(*k).map(|v| (k.to_string(), v.clone())))
                        .collect();
                    Value::Object(picked)
                })
                .collect()
        })
        .unwrap_or_default()
}

impl SmsTask {
    fn action_call(&self, id: &str, operation: &str) -> Result<ApiCall, ApiError> {
        if !TASK_ACTIONS.contains(&operation) {
            return Err(ApiError::invalid_request(format!(
                "unsupported task action '{}', expected one of {:?}",
                operation, TASK_ACTIONS
            )));
        }

        Ok(ApiCall::new(
            &format!("{} migrate task", operation),
            Method::POST,
            format!("{}/action", task_path(id)),
        )
        .body(Some(json!({ "operation": operation })))
        .ok_codes(&[200]))
    }

    fn speed_limit_call(&self, id: &str, data: &ResourceData) -> ApiCall {
        let limits = pick_list(data, "speed_limit", &["start", "end", "speed", "over_speed_threshold"]);
        ApiCall::new(
            "set task speed limit",
            Method::POST,
            format!("{}/speed-limit", task_path(id)),
        )
        .body(build_body(None, [("speed_limit".to_string(), Value::Array(limits))]))
        .ok_codes(&[200])
    }

    fn configuration_call(&self, id: &str, data: &ResourceData) -> ApiCall {
        let configurations =
            pick_list(data, "configurations", &["config_key", "config_value", "config_status"]);
        ApiCall::new(
            "set task configurations",
            Method::POST,
            format!("{}/configuration-setting", task_path(id)),
        )
        .body(build_body(
            None,
            [("configurations".to_string(), Value::Array(configurations))],
        ))
        .ok_codes(&[200])
    }

    async fn target_disks(
        &self,
        client: &ServiceClient,
        data: &ResourceData,
        source_id: &str,
    ) -> Result<Vec<Value>, ApiError> {
        if let Some(disks) = data.get("target_server_disks").and_then(|v| v.as_array()) {
            if !disks.is_empty() {
                return disks_from_attributes(disks);
            }
        }

        // Default to the source server's recommended layout
        let source = client
            .get(&format!("v3/sources/{}", urlencoding::encode(source_id)))
            .await?;
        let disks = path_search(&source, "init_target_server.disks")
            .and_then(|v| v.as_array())
            .map(|disks| disks_from_source(disks))
            .unwrap_or_default();
        Ok(disks)
    }

    async fn fetch_extra(&self, client: &ServiceClient, id: &str, suffix: &str) -> Option<Value> {
        match client.get(&format!("{}/{}", task_path(id), suffix)).await {
            Ok(body) => Some(body),
            Err(e) => {
                tracing::warn!("error fetching task {} ({}): {}", suffix, id, e);
                None
            }
        }
    }
}

#[async_trait]
impl ResourceKind for SmsTask {
    fn type_name(&self) -> &str {
        "sms_task"
    }

    fn display_name(&self) -> &str {
        "SMS Migration Task"
    }

    fn service(&self) -> &str {
        "sms"
    }

    fn default_timeouts(&self) -> Timeouts {
        Timeouts::from_mins(5, 5, 5)
    }

    async fn create(&self, client: &ServiceClient, data: &ResourceData) -> Result<String, ApiError> {
        let source_id = data.require_str("source_server_id")?;
        let region = data.region().unwrap_or(&client.region).to_string();
        let project_id = data
            .get_str("project_id")
            .unwrap_or(&client.project_id)
            .to_string();
        let target_server_id = data.get_str("target_server_id");

        let target_server = json!({
            "vm_id": target_server_id,
            "name": data.get("target_server_name"),
            "disks": self.target_disks(client, data, source_id).await?,
        });

        let body = build_body(
            None,
            [
                ("name".to_string(), json!("MigrationTask")),
                ("type".to_string(), json!(data.require_str("type")?)),
                ("os_type".to_string(), json!(data.require_str("os_type")?)),
                ("priority".to_string(), json!(1)),
                ("region_name".to_string(), json!(region)),
                ("region_id".to_string(), json!(region)),
                ("project_name".to_string(), json!(client.project_name)),
                ("project_id".to_string(), json!(project_id)),
                ("source_server".to_string(), json!({ "id": source_id })),
                ("target_server".to_string(), target_server),
                ("vm_template_id".to_string(), json!(data.get_str("vm_template_id"))),
                ("migration_ip".to_string(), json!(data.get_str("migration_ip"))),
                (
                    "use_public_ip".to_string(),
                    json!(data.get_bool("use_public_ip").unwrap_or(true)),
                ),
                (
                    "start_target_server".to_string(),
                    json!(data.get_bool("start_target_server").unwrap_or(true)),
                ),
                (
                    "syncing".to_string(),
                    json!(data.get_bool("syncing").unwrap_or(false)),
                ),
                ("exist_server".to_string(), json!(target_server_id.is_some())),
            ],
        );

        tracing::debug!("Create options: {:?}", body);
        let response = client
            .request(Method::POST, "v3/tasks", body.as_ref(), &[200])
            .await?;
        path_search_str(&response, "id")
    }

    fn create_wait(&self, _data: &ResourceData) -> Option<WaitRules> {
        None
    }

    fn post_create_calls(
        &self,
        _client: &ServiceClient,
        data: &ResourceData,
    ) -> Result<Vec<ApiCall>, ApiError> {
        let id = data.require_id()?;
        let mut calls = Vec::new();

        if data.get_str("action") == Some("start") {
            let wait = WaitRules::until(["RUNNING"])
                .failures(Vec::<String>::new())
                .pending(["READY"])
                .timing(Duration::from_secs(5), Duration::from_secs(10));
            calls.push(self.action_call(id, "start")?.wait(Some(wait)));
        }
        if data.get("speed_limit").is_some_and(|v| !super::mapper::is_empty_value(v)) {
            calls.push(self.speed_limit_call(id, data));
        }
        if data.get("configurations").is_some_and(|v| !super::mapper::is_empty_value(v)) {
            calls.push(self.configuration_call(id, data));
        }

        Ok(calls)
    }

    async fn get(&self, client: &ServiceClient, data: &ResourceData) -> Result<Value, ApiError> {
        client.get(&task_path(data.require_id()?)).await
    }

    fn status_of(&self, payload: &Value) -> Result<String, ApiError> {
        path_search_str(payload, "state")
    }

    fn flatten(&self, data: &ResourceData, payload: &Value) -> Map<String, Value> {
        let mut attributes = data.attributes.clone();
        for (attr, path) in [
            ("region", "region_id"),
            ("project_id", "project_id"),
            ("type", "type"),
            ("os_type", "os_type"),
            ("vm_template_id", "vm_template_id"),
            ("source_server_id", "source_server.id"),
            ("target_server_id", "target_server.vm_id"),
            ("target_server_name", "target_server.name"),
            ("start_target_server", "start_target_server"),
            ("migration_ip", "migration_ip"),
            ("state", "state"),
            ("enterprise_project_id", "enterprise_project_id"),
            ("migrate_speed", "migrate_speed"),
        ] {
            match path_search(payload, path) {
                Some(value) => {
                    attributes.insert(attr.to_string(), value.clone());
                }
                None => {
                    attributes.remove(attr);
                }
            }
        }

        let disks = path_search(payload, "target_server.disks")
            .and_then(|v| v.as_array())
            .map(|disks| flatten_target_disks(disks))
            .unwrap_or_else(|| Value::Array(Vec::new()));
        attributes.insert("target_server_disks".to_string(), disks);

        attributes
    }

    async fn read_extras(
        &self,
        client: &ServiceClient,
        data: &mut ResourceData,
    ) -> Result<(), ApiError> {
        let id = data.require_id()?.to_string();

        if let Some(body) = self.fetch_extra(client, &id, "speed-limit").await {
            data.set(
                "speed_limit",
                body.get("speed_limit").cloned().unwrap_or(json!([])),
            );
        }
        if let Some(body) = self.fetch_extra(client, &id, "configuration-setting").await {
            data.set(
                "migrate_type",
                body.get("migrate_type").cloned().unwrap_or(Value::Null),
            );
            data.set(
                "configurations",
                body.get("configurations").cloned().unwrap_or(json!([])),
            );
        }
        if let Some(body) = self.fetch_extra(client, &id, "passphrase").await {
            data.set(
                "passphrase",
                body.get("passphrase").cloned().unwrap_or(Value::Null),
            );
        }

        Ok(())
    }

    fn update_calls(
        &self,
        _client: &ServiceClient,
        data: &ResourceData,
        changed: &[String],
    ) -> Result<Vec<ApiCall>, ApiError> {
        let id = data.require_id()?;
        let has_changed = |attr: &str| changed.iter().any(|c| c == attr);
        let mut calls = Vec::new();

        if has_changed("action") {
            if let Some(action) = data.get_str("action") {
                calls.push(self.action_call(id, action)?);
            }
        }
        if has_changed("speed_limit") {
            calls.push(self.speed_limit_call(id, data));
        }
        if has_changed("configurations") {
            calls.push(self.configuration_call(id, data));
        }

        Ok(calls)
    }

    async fn delete(&self, client: &ServiceClient, data: &ResourceData) -> Result<(), ApiError> {
        client
            .request(Method::DELETE, &task_path(data.require_id()?), None, &[200, 204])
            .await?;
        Ok(())
    }

    fn delete_wait(&self, _data: &ResourceData) -> Option<WaitRules> {
        None
    }
}
