//! Resource Registry - Load resource definitions from JSON
//!
//! This module loads the data-driven resource definitions from embedded JSON
//! files and resolves resource type names to [`ResourceKind`]s.

use super::defined::DefinedResource;
use super::er_link::{ErLink, LinkKind};
use super::sms_task::SmsTask;
use super::{ResourceKind, Timeouts};
use crate::waiter::WaitRules;
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::OnceLock;

/// Embedded resource JSON files (compiled into the binary)
const RESOURCE_FILES: &[&str] = &[
    include_str!("../resources/er.json"),
    include_str!("../resources/vpc.json"),
];

/// Resource types implemented in code rather than JSON
const CODED_TYPES: &[&str] = &["er_association", "er_propagation", "sms_task"];

/// Request parameter sourced from an attribute
///
/// A bare string uses the same name on both sides.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum FieldDef {
    Same(String),
    Mapped { param: String, attr: String },
}

impl FieldDef {
    pub fn param(&self) -> &str {
        match self {
            FieldDef::Same(name) => name,
            FieldDef::Mapped { param, .. } => param,
        }
    }

    pub fn attr(&self) -> &str {
        match self {
            FieldDef::Same(name) => name,
            FieldDef::Mapped { attr, .. } => attr,
        }
    }
}

/// Guard on an optional call
#[derive(Debug, Clone, Deserialize)]
pub struct ConditionDef {
    pub attr: String,
    pub equals: Value,
}

/// One REST call from JSON
#[derive(Debug, Clone, Deserialize)]
pub struct CallDef {
    #[serde(default)]
    pub description: Option<String>,
    pub method: String,
    pub path: String,
    /// Wrap the body under this key
    #[serde(default)]
    pub body_key: Option<String>,
    #[serde(default)]
    pub fields: Vec<FieldDef>,
    #[serde(default)]
    pub ok_codes: Vec<u16>,
    /// Where the new resource ID is found in the create response
    #[serde(default)]
    pub id_path: Option<String>,
    #[serde(default)]
    pub wait: Option<WaitRules>,
    #[serde(default)]
    pub when: Option<ConditionDef>,
}

/// Read definition
#[derive(Debug, Clone, Deserialize)]
pub struct ReadDef {
    pub path: String,
    /// Key holding the resource object in the response
    #[serde(default)]
    pub response_key: Option<String>,
    /// Path of the status string, from the response root
    pub status_path: String,
    /// attribute -> path relative to `response_key`
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

/// Boolean attribute toggled through dedicated calls
#[derive(Debug, Clone, Deserialize)]
pub struct SwitchDef {
    pub attr: String,
    pub on: CallDef,
    pub off: CallDef,
}

/// Update group: issued when any of `fields` changed
#[derive(Debug, Clone, Deserialize)]
pub struct UpdateDef {
    pub fields: Vec<String>,
    #[serde(default)]
    pub call: Option<CallDef>,
    #[serde(default)]
    pub switch: Option<SwitchDef>,
}

/// Default timeouts in minutes
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct TimeoutsDef {
    #[serde(default = "default_create_mins")]
    pub create_mins: u64,
    #[serde(default = "default_update_mins")]
    pub update_mins: u64,
    #[serde(default = "default_delete_mins")]
    pub delete_mins: u64,
}

fn default_create_mins() -> u64 {
    10
}

fn default_update_mins() -> u64 {
    10
}

fn default_delete_mins() -> u64 {
    5
}

impl Default for TimeoutsDef {
    fn default() -> Self {
        Self {
            create_mins: default_create_mins(),
            update_mins: default_update_mins(),
            delete_mins: default_delete_mins(),
        }
    }
}

impl From<TimeoutsDef> for Timeouts {
    fn from(def: TimeoutsDef) -> Self {
        Timeouts::from_mins(def.create_mins, def.update_mins, def.delete_mins)
    }
}

/// Resource definition from JSON
#[derive(Debug, Clone, Deserialize)]
pub struct ResourceDef {
    pub display_name: String,
    pub service: String,
    #[serde(default)]
    pub timeouts: TimeoutsDef,
    /// Attributes naming the containers of this resource
    #[serde(default)]
    pub parents: Vec<String>,
    pub create: CallDef,
    pub read: ReadDef,
    #[serde(default)]
    pub post_create: Vec<CallDef>,
    #[serde(default)]
    pub updates: Vec<UpdateDef>,
    pub delete: CallDef,
}

/// Root structure of resources/*.json
#[derive(Debug, Clone, Deserialize)]
pub struct ResourceConfig {
    #[serde(default)]
    pub resources: HashMap<String, ResourceDef>,
}

/// Global registry loaded from JSON
static REGISTRY: OnceLock<ResourceConfig> = OnceLock::new();

/// Get the resource registry (loads from embedded JSON on first access)
pub fn get_registry() -> &'static ResourceConfig {
    REGISTRY.get_or_init(|| {
        let mut final_config = ResourceConfig {
            resources: HashMap::new(),
        };

        for content in RESOURCE_FILES {
            let partial: ResourceConfig = serde_json::from_str(content)
                .unwrap_or_else(|e| panic!("Failed to parse embedded resource JSON: {}", e));
            final_config.resources.extend(partial.resources);
        }

        final_config
    })
}

/// Get a resource definition by type name
pub fn get_resource(key: &str) -> Option<&'static ResourceDef> {
    get_registry().resources.get(key)
}

/// Resolve a resource type name to its implementation
pub fn get_kind(name: &str) -> Option<Box<dyn ResourceKind>> {
    match name {
        "er_association" => Some(Box::new(ErLink::new(LinkKind::Association))),
        "er_propagation" => Some(Box::new(ErLink::new(LinkKind::Propagation))),
        "sms_task" => Some(Box::new(SmsTask)),
        _ => get_resource(name).map(|def| {
            Box::new(DefinedResource::new(name, def)) as Box<dyn ResourceKind>
        }),
    }
}

/// All supported resource type names, sorted
pub fn all_resource_types() -> Vec<&'static str> {
    let mut keys: Vec<&'static str> = get_registry()
        .resources
        .keys()
        .map(|s| s.as_str())
        .chain(CODED_TYPES.iter().copied())
        .collect();
    keys.sort_unstable();
    keys
}
