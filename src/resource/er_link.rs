//! ER route table associations and propagations
//!
//! Both link an attachment to a route table and share one API shape: a
//! POST action to create or remove the link and a list endpoint filtered by
//! attachment ID to observe it. There is no GET-by-ID, so a link missing
//! from the list is reported as not found.

use super::mapper::{build_body, path_search, path_search_str, render_template};
use super::{ApiCall, ResourceData, ResourceKind, Timeouts};
use crate::cloud::client::ServiceClient;
use crate::cloud::error::ApiError;
use crate::waiter::WaitRules;
use async_trait::async_trait;
use reqwest::Method;
use serde_json::{json, Map, Value};
use std::time::Duration;

const LINK_BASE_PATH: &str =
    "v3/{project_id}/enterprise-router/{instance_id}/route-tables/{route_table_id}";

/// Which kind of route table link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    Association,
    Propagation,
}

impl LinkKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            LinkKind::Association => "er_association",
            LinkKind::Propagation => "er_propagation",
        }
    }

    fn link_action(&self) -> &'static str {
        match self {
            LinkKind::Association => "associate",
            LinkKind::Propagation => "enable-propagations",
        }
    }

    fn unlink_action(&self) -> &'static str {
        match self {
            LinkKind::Association => "disassociate",
            LinkKind::Propagation => "disable-propagations",
        }
    }

    /// Key of the single object in action responses
    fn item_key(&self) -> &'static str {
        match self {
            LinkKind::Association => "association",
            LinkKind::Propagation => "propagation",
        }
    }

    /// Collection path segment and list response key
    fn collection(&self) -> &'static str {
        match self {
            LinkKind::Association => "associations",
            LinkKind::Propagation => "propagations",
        }
    }
}

/// Association or propagation between an attachment and a route table
#[derive(Debug, Clone, Copy)]
pub struct ErLink {
    kind: LinkKind,
}

impl ErLink {
    pub fn new(kind: LinkKind) -> Self {
        Self { kind }
    }

    fn action_path(
        &self,
        client: &ServiceClient,
        data: &ResourceData,
        action: &str,
    ) -> Result<String, ApiError> {
        render_template(&format!("{}/{}", LINK_BASE_PATH, action), |name| {
            data.param(client, name)
        })
    }

    fn action_body(&self, data: &ResourceData) -> Result<Option<Value>, ApiError> {
        let attachment_id = data.require_str("attachment_id")?;
        Ok(build_body(
            None,
            [("attachment_id".to_string(), json!(attachment_id))],
        ))
    }

    fn wait_rules() -> WaitRules {
        WaitRules::until(["available"])
            .failures(["failed"])
            .timing(Duration::from_secs(5), Duration::from_secs(10))
    }
}

#[async_trait]
impl ResourceKind for ErLink {
    fn type_name(&self) -> &str {
        self.kind.type_name()
    }

    fn display_name(&self) -> &str {
        match self.kind {
            LinkKind::Association => "ER Association",
            LinkKind::Propagation => "ER Propagation",
        }
    }

    fn service(&self) -> &str {
        "er"
    }

    fn default_timeouts(&self) -> Timeouts {
        Timeouts::from_mins(5, 5, 2)
    }

    fn parent_ids(&self, data: &ResourceData) -> Vec<String> {
        ["instance_id", "route_table_id"]
            .iter()
            .filter_map(|attr| data.get_str(attr).map(str::to_string))
            .collect()
    }

    async fn create(&self, client: &ServiceClient, data: &ResourceData) -> Result<String, ApiError> {
        let path = self.action_path(client, data, self.kind.link_action())?;
        let body = self.action_body(data)?;
        let response = client
            .request(Method::POST, &path, body.as_ref(), &[202])
            .await?;

        path_search_str(&response, &format!("{}.id", self.kind.item_key()))
    }

    fn create_wait(&self, _data: &ResourceData) -> Option<WaitRules> {
        Some(Self::wait_rules())
    }

    async fn get(&self, client: &ServiceClient, data: &ResourceData) -> Result<Value, ApiError> {
        let path = self.action_path(client, data, self.kind.collection())?;
        let attachment_id = data.require_str("attachment_id")?;
        let items = client
            .list_all(&path, self.kind.collection(), &[("attachment_id", attachment_id)])
            .await?;

        let wanted = data.id.as_deref();
        items
            .into_iter()
            .find(|item| wanted.is_none() || item.get("id").and_then(|v| v.as_str()) == wanted)
            .ok_or_else(|| ApiError::NotFound {
                method: Method::GET.to_string(),
                url: client.url(&path),
            })
    }

    fn status_of(&self, payload: &Value) -> Result<String, ApiError> {
        path_search_str(payload, "state")
    }

    fn flatten(&self, data: &ResourceData, payload: &Value) -> Map<String, Value> {
        let mut attributes = data.attributes.clone();
        for (attr, path) in [
            ("attachment_type", "resource_type"),
            ("resource_id", "resource_id"),
            ("route_policy_id", "route_policy.export_policy_id"),
            ("status", "state"),
            ("created_at", "created_at"),
            ("updated_at", "updated_at"),
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
        attributes
    }

    fn update_calls(
        &self,
        _client: &ServiceClient,
        _data: &ResourceData,
        _changed: &[String],
    ) -> Result<Vec<ApiCall>, ApiError> {
        // Every field requires replacement
        Ok(Vec::new())
    }

    async fn delete(&self, client: &ServiceClient, data: &ResourceData) -> Result<(), ApiError> {
        let path = self.action_path(client, data, self.kind.unlink_action())?;
        let body = self.action_body(data)?;
        client
            .request(Method::POST, &path, body.as_ref(), &[202])
            .await?;
        Ok(())
    }

    fn delete_wait(&self, _data: &ResourceData) -> Option<WaitRules> {
        Some(
            WaitRules::until_deleted()
                .failures(["failed"])
                .timing(Duration::from_secs(5), Duration::from_secs(10)),
        )
    }
}
