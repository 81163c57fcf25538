//! Resource kinds backed by a JSON definition

use super::mapper::{build_body, path_search, path_search_str, render_template};
use super::registry::{CallDef, ResourceDef};
use super::{ApiCall, ResourceData, ResourceKind, Timeouts};
use crate::cloud::client::ServiceClient;
use crate::cloud::error::ApiError;
use crate::waiter::WaitRules;
use async_trait::async_trait;
use reqwest::Method;
use serde_json::{Map, Value};

/// A [`ResourceKind`] driven entirely by its [`ResourceDef`]
#[derive(Debug, Clone)]
pub struct DefinedResource {
    name: String,
    def: &'static ResourceDef,
}

impl DefinedResource {
    pub fn new(name: &str, def: &'static ResourceDef) -> Self {
        Self {
            name: name.to_string(),
            def,
        }
    }
}

fn parse_method(method: &str) -> Result<Method, ApiError> {
    Method::from_bytes(method.as_bytes())
        .map_err(|_| ApiError::invalid_request(format!("invalid HTTP method '{}'", method)))
}

/// Whether a guarded call applies to this record
fn call_applies(call: &CallDef, data: &ResourceData) -> bool {
    match &call.when {
        Some(cond) => data.get(&cond.attr).unwrap_or(&Value::Null) == &cond.equals,
        None => true,
    }
}

/// Render a call definition against a record
pub fn render_call(
    call: &CallDef,
    client: &ServiceClient,
    data: &ResourceData,
) -> Result<ApiCall, ApiError> {
    let path = render_template(&call.path, |name| data.param(client, name))?;
    let body = build_body(
        call.body_key.as_deref(),
        call.fields.iter().filter_map(|field| {
            data.get(field.attr())
                .map(|value| (field.param().to_string(), value.clone()))
        }),
    );
    let description = call
        .description
        .clone()
        .unwrap_or_else(|| format!("{} {}", call.method, call.path));

    Ok(ApiCall::new(&description, parse_method(&call.method)?, path)
        .body(body)
        .ok_codes(&call.ok_codes)
        .wait(call.wait.clone()))
}

#[async_trait]
impl ResourceKind for DefinedResource {
    fn type_name(&self) -> &str {
        &self.name
    }

    fn display_name(&self) -> &str {
        &self.def.display_name
    }

    fn service(&self) -> &str {
        &self.def.service
    }

    fn default_timeouts(&self) -> Timeouts {
        self.def.timeouts.into()
    }

    fn accepts_enterprise_project(&self) -> bool {
        self.def
            .create
            .fields
            .iter()
            .any(|f| f.attr() == "enterprise_project_id")
    }

    fn parent_ids(&self, data: &ResourceData) -> Vec<String> {
        self.def
            .parents
            .iter()
            .filter_map(|attr| data.get_str(attr).map(str::to_string))
            .collect()
    }

    async fn create(&self, client: &ServiceClient, data: &ResourceData) -> Result<String, ApiError> {
        let call = render_call(&self.def.create, client, data)?;
        let response = client
            .request(call.method, &call.path, call.body.as_ref(), &call.ok_codes)
            .await?;

        let id_path = self.def.create.id_path.as_deref().unwrap_or("id");
        path_search_str(&response, id_path)
    }

    fn create_wait(&self, _data: &ResourceData) -> Option<WaitRules> {
        self.def.create.wait.clone()
    }

    fn post_create_calls(
        &self,
        client: &ServiceClient,
        data: &ResourceData,
    ) -> Result<Vec<ApiCall>, ApiError> {
        let mut calls = Vec::new();
        for call in &self.def.post_create {
            if !call_applies(call, data) {
                continue;
            }
            let rendered = render_call(call, client, data)?;
            // Nothing to send
            if !call.fields.is_empty() && rendered.body.is_none() {
                continue;
            }
            calls.push(rendered);
        }
        Ok(calls)
    }

    async fn get(&self, client: &ServiceClient, data: &ResourceData) -> Result<Value, ApiError> {
        let path = render_template(&self.def.read.path, |name| data.param(client, name))?;
        client.get(&path).await
    }

    fn status_of(&self, payload: &Value) -> Result<String, ApiError> {
        path_search_str(payload, &self.def.read.status_path)
    }

    fn flatten(&self, data: &ResourceData, payload: &Value) -> Map<String, Value> {
        let root = match self.def.read.response_key.as_deref() {
            Some(key) => payload.get(key).unwrap_or(&Value::Null),
            None => payload,
        };

        let mut attributes = data.attributes.clone();
        for (attr, path) in &self.def.read.attributes {
            match path_search(root, path) {
                Some(value) => {
                    attributes.insert(attr.clone(), value.clone());
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
        client: &ServiceClient,
        data: &ResourceData,
        changed: &[String],
    ) -> Result<Vec<ApiCall>, ApiError> {
        let mut calls = Vec::new();

        for update in &self.def.updates {
            if !update.fields.iter().any(|f| changed.contains(f)) {
                continue;
            }

            if let Some(call) = &update.call {
                calls.push(render_call(call, client, data)?);
            }
            if let Some(switch) = &update.switch {
                let call = if data.get_bool(&switch.attr).unwrap_or(false) {
                    &switch.on
                } else {
                    &switch.off
                };
                calls.push(render_call(call, client, data)?);
            }
        }

        Ok(calls)
    }

    async fn delete(&self, client: &ServiceClient, data: &ResourceData) -> Result<(), ApiError> {
        let call = render_call(&self.def.delete, client, data)?;
        client
            .request(call.method, &call.path, call.body.as_ref(), &call.ok_codes)
            .await?;
        Ok(())
    }

    fn delete_wait(&self, _data: &ResourceData) -> Option<WaitRules> {
        self.def.delete.wait.clone()
    }
}
