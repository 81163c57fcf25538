//! Resource abstraction layer
//!
//! Every managed resource type implements [`ResourceKind`]: how to issue
//! its create/get/delete calls, where its status lives, and which calls an
//! update needs. The generic CRUD flow in [`lifecycle`] drives any kind and
//! waits on asynchronous operations through the poller.
//!
//! # Architecture
//!
//! - [`registry`] - Loads data-driven definitions from embedded JSON and
//!   looks up kinds by type name
//! - [`defined`] - [`ResourceKind`] implementation backed by a JSON definition
//! - [`er_link`] - ER route table associations and propagations
//! - [`sms_task`] - SMS migration tasks
//! - [`mapper`] - Field mapping helpers
//! - [`lifecycle`] - Create/read/update/delete with waits
//!
//! # Resource Definitions
//!
//! Definitions live in JSON files under `src/resources/`:
//! - `er.json` - Enterprise Router instances, route tables, attachments,
//!   static routes and flow logs
//! - `vpc.json` - VPC subnets

pub mod defined;
pub mod er_link;
pub mod lifecycle;
pub mod mapper;
pub mod registry;
pub mod sms_task;

use crate::cloud::client::ServiceClient;
use crate::cloud::error::ApiError;
use crate::waiter::WaitRules;
use async_trait::async_trait;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::time::Duration;

pub use lifecycle::Lifecycle;
pub use registry::{all_resource_types, get_kind};

/// Local record of one managed resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceData {
    pub resource_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

impl ResourceData {
    pub fn new(resource_type: &str) -> Self {
        Self {
            resource_type: resource_type.to_string(),
            id: None,
            attributes: Map::new(),
        }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.id = Some(id.to_string());
        self
    }

    pub fn with_attr(mut self, name: &str, value: Value) -> Self {
        self.attributes.insert(name.to_string(), value);
        self
    }

    /// Attribute value, ignoring nulls
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name).filter(|v| !v.is_null())
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(|v| v.as_str()).filter(|s| !s.is_empty())
    }

    pub fn get_bool(&self, name: &str) -> Option<bool> {
        self.get(name).and_then(|v| v.as_bool())
    }

    pub fn set(&mut self, name: &str, value: Value) {
        self.attributes.insert(name.to_string(), value);
    }

    /// Region requested for this resource, if any
    pub fn region(&self) -> Option<&str> {
        self.get_str("region")
    }

    pub fn require_id(&self) -> Result<&str, ApiError> {
        self.id
            .as_deref()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| ApiError::invalid_request(format!("{} has no ID", self.resource_type)))
    }

    /// Resolve a URL placeholder: `project_id`, `region`, `id` or any scalar attribute
    pub fn param(&self, client: &ServiceClient, name: &str) -> Option<String> {
        match name {
            "project_id" => Some(client.project_id.clone()),
            "region" => Some(client.region.clone()),
            "id" => self.id.clone(),
            _ => self.get(name).and_then(mapper::value_to_param),
        }
    }

    /// Required string attribute
    pub fn require_str(&self, name: &str) -> Result<&str, ApiError> {
        self.get_str(name).ok_or_else(|| {
            ApiError::invalid_request(format!("{} requires '{}'", self.resource_type, name))
        })
    }
}

/// The mutating phases of a lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Create,
    Update,
    Delete,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Create => "create",
            Phase::Update => "update",
            Phase::Delete => "delete",
        };
        write!(f, "{}", s)
    }
}

/// Per-phase timeouts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub create: Duration,
    pub update: Duration,
    pub delete: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            create: Duration::from_secs(10 * 60),
            update: Duration::from_secs(10 * 60),
            delete: Duration::from_secs(5 * 60),
        }
    }
}

impl Timeouts {
    pub fn from_mins(create: u64, update: u64, delete: u64) -> Self {
        Self {
            create: Duration::from_secs(create * 60),
            update: Duration::from_secs(update * 60),
            delete: Duration::from_secs(delete * 60),
        }
    }

    pub fn uniform(timeout: Duration) -> Self {
        Self {
            create: timeout,
            update: timeout,
            delete: timeout,
        }
    }

    pub fn for_phase(&self, phase: Phase) -> Duration {
        match phase {
            Phase::Create => self.create,
            Phase::Update => self.update,
            Phase::Delete => self.delete,
        }
    }
}

/// A rendered REST call, optionally followed by a wait
#[derive(Debug, Clone, PartialEq)]
pub struct ApiCall {
    pub description: String,
    pub method: Method,
    /// Path relative to the service endpoint
    pub path: String,
    pub body: Option<Value>,
    pub ok_codes: Vec<u16>,
    pub wait: Option<WaitRules>,
}

impl ApiCall {
    pub fn new(description: &str, method: Method, path: String) -> Self {
        Self {
            description: description.to_string(),
            method,
            path,
            body: None,
            ok_codes: Vec::new(),
            wait: None,
        }
    }

    pub fn body(mut self, body: Option<Value>) -> Self {
        self.body = body;
        self
    }

    pub fn ok_codes(mut self, codes: &[u16]) -> Self {
        self.ok_codes = codes.to_vec();
        self
    }

    pub fn wait(mut self, rules: Option<WaitRules>) -> Self {
        self.wait = rules;
        self
    }
}

/// Behaviour of one managed resource type
#[async_trait]
pub trait ResourceKind: Send + Sync {
    fn type_name(&self) -> &str;

    /// Human readable name, shown by `hwcloud types`
    fn display_name(&self) -> &str;

    /// Service catalog name used to build the client
    fn service(&self) -> &str;

    fn default_timeouts(&self) -> Timeouts {
        Timeouts::default()
    }

    /// Whether the create call takes an enterprise project ID
    fn accepts_enterprise_project(&self) -> bool {
        false
    }

    /// Container IDs addressing this resource, for logging
    fn parent_ids(&self, _data: &ResourceData) -> Vec<String> {
        Vec::new()
    }

    /// Issue the create call and return the new resource ID
    async fn create(&self, client: &ServiceClient, data: &ResourceData) -> Result<String, ApiError>;

    /// Wait after the create call, if it completes asynchronously
    fn create_wait(&self, data: &ResourceData) -> Option<WaitRules>;

    /// Calls issued once the resource exists
    fn post_create_calls(
        &self,
        _client: &ServiceClient,
        _data: &ResourceData,
    ) -> Result<Vec<ApiCall>, ApiError> {
        Ok(Vec::new())
    }

    /// Fetch the current remote representation
    async fn get(&self, client: &ServiceClient, data: &ResourceData) -> Result<Value, ApiError>;

    /// Extract the status string from a fetched payload
    fn status_of(&self, payload: &Value) -> Result<String, ApiError>;

    /// Merge a fetched payload into the record's attributes
    fn flatten(&self, data: &ResourceData, payload: &Value) -> Map<String, Value>;

    /// Extra reads merged into the record after [`ResourceKind::flatten`]
    async fn read_extras(
        &self,
        _client: &ServiceClient,
        _data: &mut ResourceData,
    ) -> Result<(), ApiError> {
        Ok(())
    }

    /// Calls needed to move `data` to its desired state given changed attributes
    fn update_calls(
        &self,
        client: &ServiceClient,
        data: &ResourceData,
        changed: &[String],
    ) -> Result<Vec<ApiCall>, ApiError>;

    /// Issue the delete call
    async fn delete(&self, client: &ServiceClient, data: &ResourceData) -> Result<(), ApiError>;

    /// Wait after the delete call; `None` when deletion is synchronous
    fn delete_wait(&self, data: &ResourceData) -> Option<WaitRules>;
}
