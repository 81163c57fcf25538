//! Error types for Huawei Cloud REST calls

use thiserror::Error;

/// Errors returned by the REST layer
#[derive(Debug, Error)]
pub enum ApiError {
    /// The remote API answered 404
    #[error("resource not found: {method} {url}")]
    NotFound { method: String, url: String },

    /// Any other status outside the accepted codes
    #[error("unexpected status {status} from {method} {url}: {message}")]
    Status {
        method: String,
        url: String,
        status: u16,
        code: Option<String>,
        message: String,
    },

    /// Network, TLS or client construction failure
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Missing credentials or a signing failure
    #[error("authentication error: {0}")]
    Auth(String),

    /// The response body was not valid JSON
    #[error("failed to parse response JSON: {0}")]
    Decode(#[from] serde_json::Error),

    /// A field expected in the response body is absent
    #[error("could not find '{path}' in the API response")]
    MissingField { path: String },

    /// The request could not be built (unknown service, unresolved path parameter, ...)
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl ApiError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// HTTP status code carried by this error, if any
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::NotFound { .. } => Some(404),
            Self::Status { status, .. } => Some(*status),
            Self::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    pub fn missing_field(path: impl Into<String>) -> Self {
        Self::MissingField { path: path.into() }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }
}
