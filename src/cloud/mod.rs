//! Huawei Cloud API interaction module
//!
//! This module provides the core functionality for talking to Huawei Cloud
//! REST APIs, including authentication, endpoint resolution and the HTTP
//! client.
//!
//! # Module Structure
//!
//! - [`auth`] - Token and AK/SK (SDK-HMAC-SHA256) authentication
//! - [`client`] - Session client and per-service clients
//! - [`error`] - Typed API errors
//! - [`http`] - HTTP utilities for REST API calls
//! - [`projects`] - Region to project ID resolution
//!
//! # Example
//!
//! ```ignore
//! use hwcloud_provider::cloud::client::CloudClient;
//! use hwcloud_provider::config::Config;
//!
//! async fn example() -> anyhow::Result<()> {
//!     let client = CloudClient::new(&Config::load())?;
//!     let er = client.service_client("er", None).await?;
//!     let instances = er.list_all("v3/{project_id}/enterprise-router/instances", "instances", &[]).await?;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod client;
pub mod error;
pub mod http;
pub mod projects;

pub use client::{CloudClient, ServiceClient};
pub use error::ApiError;
