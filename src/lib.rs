//! Declarative CRUD handlers for Huawei Cloud resources
//!
//! - [`cloud`] - REST plumbing: credentials, signing, endpoints, HTTP
//! - [`waiter`] - Polling of asynchronous operations until they settle
//! - [`resource`] - Resource kinds and the generic lifecycle driving them
//! - [`config`] - Persistent configuration and environment overrides

pub mod cloud;
pub mod config;
pub mod resource;
pub mod waiter;

/// Version injected at compile time via HWCLOUD_VERSION env var (set by CI/CD),
/// or "dev" for local builds.
pub const VERSION: &str = match option_env!("HWCLOUD_VERSION") {
    Some(v) => v,
    None => "dev",
};
