//! IAM Projects
//!
//! Resolves the project ID bound to a region.

use super::client::{add_query_params, ServiceClient};
use super::error::ApiError;
use serde_json::Value;

/// Project information
#[derive(Debug, Clone)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub enabled: bool,
}

impl From<&Value> for Project {
    fn from(value: &Value) -> Self {
        Self {
            id: value
                .get("id")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            name: value
                .get("name")
                .and_then(|v| v.as_str())
                .unwrap_or("-")
                .to_string(),
            enabled: value.get("enabled").and_then(|v| v.as_bool()).unwrap_or(true),
        }
    }
}

/// List the projects with the given name (usually the region)
pub async fn list_projects(iam: &ServiceClient, name: &str) -> Result<Vec<Project>, ApiError> {
    let response = iam
        .get(&add_query_params("v3/projects", &[("name", name)]))
        .await?;

    let projects = response
        .get("projects")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .map(Project::from)
                .filter(|p| p.enabled && !p.id.is_empty())
                .collect()
        })
        .unwrap_or_default();

    Ok(projects)
}

/// Get the ID of the project with the given name
pub async fn fetch_project_id(iam: &ServiceClient, name: &str) -> Result<String, ApiError> {
    list_projects(iam, name)
        .await?
        .into_iter()
        .find(|p| p.name == name)
        .map(|p| p.id)
        .ok_or_else(|| ApiError::invalid_request(format!("no project found named {}", name)))
}
