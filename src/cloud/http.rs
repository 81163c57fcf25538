//! HTTP utilities for Huawei Cloud REST API calls

use super::auth::Credentials;
use super::error::ApiError;
use crate::waiter::WaitError;
use reqwest::{Client, Method};
use serde_json::Value;
use url::Url;

/// Maximum length of response body to log (to avoid logging sensitive data)
const MAX_LOG_BODY_LENGTH: usize = 200;

/// Sanitize response body for logging
/// Truncates long responses and strips non-printable characters
fn sanitize_for_log(body: &str) -> String {
    let truncated = if body.len() > MAX_LOG_BODY_LENGTH {
        let cut = (0..=MAX_LOG_BODY_LENGTH)
            .rev()
            .find(|i| body.is_char_boundary(*i))
            .unwrap_or(0);
        format!("{}... [truncated, {} bytes total]", &body[..cut], body.len())
    } else {
        body.to_string()
    };

    truncated.replace(|c: char| !c.is_ascii_graphic() && c != ' ', "")
}

/// Extract `(error_code, error_msg)` from a Huawei error body
///
/// Services answer either `{"error_code": .., "error_msg": ..}` or
/// `{"error": {"code": .., "message": ..}}`.
fn parse_error_body(body: &str) -> (Option<String>, String) {
    let Ok(value) = serde_json::from_str::<Value>(body) else {
        return (None, sanitize_for_log(body));
    };

    let flat_code = value.get("error_code").and_then(|v| v.as_str());
    let flat_msg = value.get("error_msg").and_then(|v| v.as_str());
    if flat_code.is_some() || flat_msg.is_some() {
        return (
            flat_code.map(str::to_string),
            flat_msg.unwrap_or_default().to_string(),
        );
    }

    let nested = value.get("error");
    let code = nested
        .and_then(|e| e.get("code"))
        .map(|c| match c {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        });
    let message = nested
        .and_then(|e| e.get("message"))
        .and_then(|m| m.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| sanitize_for_log(body));
    (code, message)
}

/// HTTP client wrapper for Huawei Cloud API calls
#[derive(Clone, Debug)]
pub struct HwHttpClient {
    client: Client,
    credentials: Credentials,
}

impl HwHttpClient {
    /// Create a new HTTP client
    pub fn new(credentials: Credentials, insecure: bool) -> Result<Self, ApiError> {
        let client = Client::builder()
            .user_agent(concat!("hwcloud/", env!("CARGO_PKG_VERSION")))
            .danger_accept_invalid_certs(insecure)
            .build()?;

        Ok(Self {
            client,
            credentials,
        })
    }

    /// Send a request and decode the JSON response
    ///
    /// `ok_codes` lists the accepted status codes; an empty slice accepts any
    /// 2xx. A 404 always maps to [`ApiError::NotFound`].
    pub async fn send(
        &self,
        method: Method,
        url: &str,
        extra_headers: &[(String, String)],
        body: Option<&Value>,
        ok_codes: &[u16],
    ) -> Result<Value, ApiError> {
        tracing::debug!("{} {}", method, url);

        let parsed = Url::parse(url)
            .map_err(|e| ApiError::invalid_request(format!("invalid URL '{}': {}", url, e)))?;
        let payload = match body {
            Some(body) => serde_json::to_vec(body)?,
            None => Vec::new(),
        };

        let mut headers: Vec<(String, String)> = extra_headers.to_vec();
        headers.push(("Content-Type".to_string(), "application/json".to_string()));
        self.credentials.authorize(
            method.as_str(),
            &parsed,
            &mut headers,
            &payload,
            chrono::Utc::now(),
        )?;

        let mut request = self.client.request(method.clone(), parsed);
        for (name, value) in &headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if body.is_some() {
            request = request.body(payload);
        }

        let response = request.send().await?;
        let status = response.status();
        let response_body = response.text().await?;

        if status.as_u16() == 404 {
            tracing::debug!("{} {} returned 404", method, url);
            return Err(ApiError::NotFound {
                method: method.to_string(),
                url: url.to_string(),
            });
        }

        let accepted = if ok_codes.is_empty() {
            status.is_success()
        } else {
            ok_codes.contains(&status.as_u16())
        };
        if !accepted {
            // Security: Only log sanitized/truncated error body to avoid leaking sensitive data
            tracing::error!("API error: {} - {}", status, sanitize_for_log(&response_body));
            let (code, message) = parse_error_body(&response_body);
            return Err(ApiError::Status {
                method: method.to_string(),
                url: url.to_string(),
                status: status.as_u16(),
                code,
                message,
            });
        }

        // Handle empty response
        if response_body.trim().is_empty() {
            return Ok(Value::Null);
        }

        Ok(serde_json::from_str(&response_body)?)
    }

    /// Make a GET request
    pub async fn get(&self, url: &str) -> Result<Value, ApiError> {
        self.send(Method::GET, url, &[], None, &[]).await
    }
}

/// Format an error chain for display
///
/// The whole chain is kept so the resource ID from the lifecycle context and
/// the API's own message both reach the user; only control characters are
/// stripped.
pub fn format_api_error(error: &anyhow::Error) -> String {
    format!("{:#}", error)
        .chars()
        .filter(|c| !c.is_control())
        .collect()
}

fn api_error_in_chain(error: &anyhow::Error) -> Option<&ApiError> {
    error.chain().find_map(|e| {
        e.downcast_ref::<ApiError>()
            .or_else(|| match e.downcast_ref::<WaitError>() {
                Some(WaitError::Api(inner)) => Some(inner),
                _ => None,
            })
    })
}

/// Short remediation hint for well-known API failures
pub fn error_hint(error: &anyhow::Error) -> Option<&'static str> {
    let api_error = api_error_in_chain(error)?;

    match api_error {
        ApiError::Auth(_) => {
            return Some("Check HW_ACCESS_KEY/HW_SECRET_KEY or HW_AUTH_TOKEN.");
        }
        ApiError::Transport(e) if e.status().is_none() => {
            return Some("Check your network connection and try again.");
        }
        _ => {}
    }

    match api_error.status_code()? {
        401 => Some("Authentication failed. Check your credentials."),
        403 => Some("Permission denied. Check your IAM permissions."),
        409 => Some("The resource may already exist or be in use."),
        429 => Some("Rate limit exceeded. Please try again later."),
        500 | 503 => Some("The service may be temporarily unavailable. Please try again."),
        _ => None,
    }
}
