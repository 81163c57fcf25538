//! Configuration Management
//!
//! Handles persistent configuration storage for hwcloud, environment
//! overrides and validation.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Default cloud domain used to build service endpoints
pub const DEFAULT_CLOUD: &str = "myhuaweicloud.com";

/// Provider configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Region used when a resource does not set one
    #[serde(default)]
    pub region: Option<String>,
    /// Project ID for the region; resolved through IAM when absent
    #[serde(default)]
    pub project_id: Option<String>,
    /// Project name for the default region; defaults to the region
    #[serde(default)]
    pub project_name: Option<String>,
    /// Cloud domain name
    #[serde(default)]
    pub cloud: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_token: Option<String>,
    /// Pre-issued IAM token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default)]
    pub enterprise_project_id: Option<String>,
    /// Custom endpoints keyed by service name, e.g. `"er": "https://er.example.com/"`
    #[serde(default)]
    pub endpoints: HashMap<String, String>,
    /// Skip TLS certificate verification
    #[serde(default)]
    pub insecure: bool,
}

impl Config {
    /// Get the config file path
    fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("hwcloud").join("config.json"))
    }

    /// Load configuration from disk, then apply environment overrides
    pub fn load() -> Self {
        let mut config = Self::load_file();
        config.apply_env(|key| std::env::var(key).ok());
        config
    }

    fn load_file() -> Self {
        let Some(path) = Self::config_path() else {
            return Self::default();
        };

        if !path.exists() {
            return Self::default();
        }

        match std::fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                tracing::warn!("Ignoring unreadable config file {:?}: {}", path, e);
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    /// Apply `HW_*` environment overrides using the given lookup
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());

        if let Some(v) = get("HW_REGION_NAME") {
            self.region = Some(v);
        }
        if let Some(v) = get("HW_PROJECT_ID") {
            self.project_id = Some(v);
        }
        if let Some(v) = get("HW_PROJECT_NAME") {
            self.project_name = Some(v);
        }
        if let Some(v) = get("HW_CLOUD") {
            self.cloud = Some(v);
        }
        if let Some(v) = get("HW_ACCESS_KEY") {
            self.access_key = Some(v);
        }
        if let Some(v) = get("HW_SECRET_KEY") {
            self.secret_key = Some(v);
        }
        if let Some(v) = get("HW_SECURITY_TOKEN") {
            self.security_token = Some(v);
        }
        if let Some(v) = get("HW_AUTH_TOKEN") {
            self.token = Some(v);
        }
        if let Some(v) = get("HW_ENTERPRISE_PROJECT_ID") {
            self.enterprise_project_id = Some(v);
        }
    }

    /// Save configuration to disk (credentials are never written)
    pub fn save(&self) -> Result<()> {
        let Some(path) = Self::config_path() else {
            return Ok(());
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let persisted = Self {
            access_key: None,
            secret_key: None,
            security_token: None,
            token: None,
            ..self.clone()
        };
        let content = serde_json::to_string_pretty(&persisted)?;
        std::fs::write(&path, content)?;

        Ok(())
    }

    /// Check that the configuration can authorize requests in some region
    pub fn validate(&self) -> Result<()> {
        self.effective_region()
            .context("No region configured. Set HW_REGION_NAME or use --region")?;

        let has_token = self.token.as_deref().is_some_and(|t| !t.is_empty());
        let has_aksk = self.access_key.as_deref().is_some_and(|v| !v.is_empty())
            && self.secret_key.as_deref().is_some_and(|v| !v.is_empty());
        if !has_token && !has_aksk {
            anyhow::bail!("Must configure a token or an access key/secret key pair to be authorized");
        }

        Ok(())
    }

    pub fn effective_region(&self) -> Option<&str> {
        self.region.as_deref().filter(|r| !r.is_empty())
    }

    pub fn effective_cloud(&self) -> &str {
        self.cloud
            .as_deref()
            .filter(|c| !c.is_empty())
            .unwrap_or(DEFAULT_CLOUD)
    }

    /// Set region and save
    pub fn set_region(&mut self, region: &str) -> Result<()> {
        self.region = Some(region.to_string());
        self.save()
    }
}
