//! Huawei Cloud Client
//!
//! Main client for interacting with Huawei Cloud APIs, combining
//! authentication, endpoint resolution and HTTP functionality. One
//! [`CloudClient`] is built per session; per-service [`ServiceClient`]s are
//! derived from it and handed to resource handlers.

use super::auth::Credentials;
use super::error::ApiError;
use super::http::HwHttpClient;
use super::projects;
use crate::config::Config;
use anyhow::{Context, Result};
use reqwest::Method;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Page size used for marker-paginated list calls
const LIST_PAGE_LIMIT: usize = 100;

/// Whether a service is addressed per region or globally
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Regional,
    Global,
}

/// Service catalog entry
#[derive(Debug, Clone, Copy)]
pub struct ServiceCatalog {
    pub name: &'static str,
    pub scope: Scope,
}

const SERVICE_CATALOG: &[ServiceCatalog] = &[
    ServiceCatalog {
        name: "er",
        scope: Scope::Regional,
    },
    ServiceCatalog {
        name: "sms",
        scope: Scope::Global,
    },
    ServiceCatalog {
        name: "vpc",
        scope: Scope::Regional,
    },
    ServiceCatalog {
        name: "iam",
        scope: Scope::Regional,
    },
];

/// Look up a service by name
pub fn lookup_service(name: &str) -> Option<&'static ServiceCatalog> {
    SERVICE_CATALOG.iter().find(|s| s.name == name)
}

/// Session-wide client
#[derive(Clone, Debug)]
pub struct CloudClient {
    pub http: HwHttpClient,
    pub region: String,
    pub enterprise_project_id: Option<String>,
    cloud: String,
    endpoints: HashMap<String, String>,
    configured_project_id: Option<String>,
    configured_project_name: Option<String>,
    /// region -> project ID, filled lazily from IAM
    project_ids: Arc<Mutex<HashMap<String, String>>>,
}

impl CloudClient {
    /// Create a new client from validated configuration
    pub fn new(config: &Config) -> Result<Self> {
        config.validate()?;

        let credentials =
            Credentials::from_config(config).context("Failed to initialize credentials")?;
        let http = HwHttpClient::new(credentials, config.insecure)
            .context("Failed to create HTTP client")?;

        let region = config
            .effective_region()
            .context("No region configured")?
            .to_string();

        Ok(Self {
            http,
            region,
            enterprise_project_id: config.enterprise_project_id.clone(),
            cloud: config.effective_cloud().to_string(),
            endpoints: config.endpoints.clone(),
            configured_project_id: config.project_id.clone().filter(|p| !p.is_empty()),
            configured_project_name: config.project_name.clone().filter(|p| !p.is_empty()),
            project_ids: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Endpoint (with trailing slash) for a service in a region
    pub fn endpoint(&self, service: &str, region: &str) -> Result<String, ApiError> {
        let catalog = lookup_service(service).ok_or_else(|| {
            ApiError::invalid_request(format!("service type {} is invalid or not supported", service))
        })?;

        if let Some(custom) = self.endpoints.get(service) {
            return Ok(with_trailing_slash(custom));
        }

        Ok(match catalog.scope {
            Scope::Global => format!("https://{}.{}/", catalog.name, self.cloud),
            Scope::Regional => format!("https://{}.{}.{}/", catalog.name, region, self.cloud),
        })
    }

    /// Project ID for a region
    ///
    /// The configured project ID only applies to the default region; other
    /// regions are resolved through IAM once and remembered.
    pub async fn project_id(&self, region: &str) -> Result<String, ApiError> {
        if region == self.region {
            if let Some(id) = &self.configured_project_id {
                return Ok(id.clone());
            }
        }

        // Held across the lookup so concurrent callers don't query IAM twice
        let mut cache = self.project_ids.lock().await;
        if let Some(id) = cache.get(region) {
            return Ok(id.clone());
        }

        let iam = ServiceClient::new(
            self.http.clone(),
            "iam",
            region,
            &self.endpoint("iam", region)?,
            "",
        );
        let id = projects::fetch_project_id(&iam, &self.project_name(region)).await?;
        tracing::info!("Resolved project {} for region {}", id, region);
        cache.insert(region.to_string(), id.clone());

        Ok(id)
    }

    /// Project name for a region
    ///
    /// The configured name only applies to the default region; elsewhere the
    /// region itself names the project.
    pub fn project_name(&self, region: &str) -> String {
        match &self.configured_project_name {
            Some(name) if region == self.region => name.clone(),
            _ => region.to_string(),
        }
    }

    /// Build a client for one service, in the given region or the default one
    pub async fn service_client(
        &self,
        service: &str,
        region: Option<&str>,
    ) -> Result<ServiceClient, ApiError> {
        let region = region.unwrap_or(&self.region);
        let endpoint = self.endpoint(service, region)?;
        let project_id = self.project_id(region).await?;

        Ok(ServiceClient::new(
            self.http.clone(),
            service,
            region,
            &endpoint,
            &project_id,
        )
        .with_project_name(&self.project_name(region)))
    }
}

fn with_trailing_slash(endpoint: &str) -> String {
    if endpoint.ends_with('/') {
        endpoint.to_string()
    } else {
        format!("{}/", endpoint)
    }
}

/// Client bound to one service endpoint and project
#[derive(Clone, Debug)]
pub struct ServiceClient {
    http: HwHttpClient,
    pub service: String,
    pub region: String,
    pub endpoint: String,
    pub project_id: String,
    pub project_name: String,
}

impl ServiceClient {
    pub fn new(
        http: HwHttpClient,
        service: &str,
        region: &str,
        endpoint: &str,
        project_id: &str,
    ) -> Self {
        Self {
            http,
            service: service.to_string(),
            region: region.to_string(),
            endpoint: with_trailing_slash(endpoint),
            project_id: project_id.to_string(),
            project_name: region.to_string(),
        }
    }

    pub fn with_project_name(mut self, name: &str) -> Self {
        self.project_name = name.to_string();
        self
    }

    /// Absolute URL for a path relative to the endpoint
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.endpoint, path.trim_start_matches('/'))
    }

    /// Issue one request against a path relative to the endpoint
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        ok_codes: &[u16],
    ) -> Result<Value, ApiError> {
        let mut headers = Vec::new();
        if !self.project_id.is_empty() {
            headers.push(("X-Project-Id".to_string(), self.project_id.clone()));
        }

        self.http
            .send(method, &self.url(path), &headers, body, ok_codes)
            .await
    }

    pub async fn get(&self, path: &str) -> Result<Value, ApiError> {
        self.request(Method::GET, path, None, &[200]).await
    }

    /// Fetch every item of a marker-paginated collection
    pub async fn list_all(
        &self,
        path: &str,
        items_key: &str,
        query: &[(&str, &str)],
    ) -> Result<Vec<Value>, ApiError> {
        let mut all_items = Vec::new();
        let mut marker: Option<String> = None;
        let limit = LIST_PAGE_LIMIT.to_string();

        loop {
            let mut params: Vec<(&str, &str)> = query.to_vec();
            params.push(("limit", &limit));
            if let Some(m) = marker.as_deref() {
                params.push(("marker", m));
            }

            let response = self.get(&add_query_params(path, &params)).await?;
            let items = response
                .get(items_key)
                .and_then(|v| v.as_array())
                .cloned()
                .unwrap_or_default();
            let page_len = items.len();
            all_items.extend(items);

            let next = response
                .pointer("/page_info/next_marker")
                .and_then(|v| v.as_str())
                .filter(|m| !m.is_empty())
                .map(str::to_string);

            match next {
                Some(next) if page_len > 0 && marker.as_deref() != Some(next.as_str()) => {
                    marker = Some(next);
                }
                _ => break,
            }
        }

        Ok(all_items)
    }
}

/// Append URL-encoded query parameters to a path
pub fn add_query_params(path: &str, params: &[(&str, &str)]) -> String {
    let query_parts: Vec<String> = params
        .iter()
        .filter(|(_, v)| !v.is_empty())
        .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
        .collect();

    if query_parts.is_empty() {
        path.to_string()
    } else if path.contains('?') {
        format!("{}&{}", path, query_parts.join("&"))
    } else {
        format!("{}?{}", path, query_parts.join("&"))
    }
}
