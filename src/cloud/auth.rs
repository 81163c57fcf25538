//! Huawei Cloud Authentication
//!
//! Handles IAM token authentication and AK/SK request signing
//! (SDK-HMAC-SHA256), including temporary security tokens.

use super::error::ApiError;
use crate::config::Config;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use url::Url;

/// Signing algorithm name used in the Authorization header
pub const SIGN_ALGORITHM: &str = "SDK-HMAC-SHA256";

pub const HEADER_SDK_DATE: &str = "X-Sdk-Date";
pub const HEADER_AUTH_TOKEN: &str = "X-Auth-Token";
pub const HEADER_SECURITY_TOKEN: &str = "X-Security-Token";

const SDK_DATE_FORMAT: &str = "%Y%m%dT%H%M%SZ";

/// Credentials used to authorize every API request
#[derive(Clone)]
pub enum Credentials {
    /// Pre-issued IAM token
    Token(String),
    /// Access key / secret key pair, optionally temporary
    AkSk {
        access_key: String,
        secret_key: String,
        security_token: Option<String>,
    },
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Security: never print secrets
        match self {
            Self::Token(_) => f.write_str("Credentials::Token(***)"),
            Self::AkSk { access_key, .. } => {
                write!(f, "Credentials::AkSk({}, ***)", mask(access_key))
            }
        }
    }
}

fn mask(value: &str) -> String {
    let visible: String = value.chars().take(4).collect();
    format!("{}****", visible)
}

impl Credentials {
    /// Pick credentials from configuration (token > AK/SK)
    pub fn from_config(config: &Config) -> Result<Self, ApiError> {
        if let Some(token) = config.token.as_deref().filter(|t| !t.is_empty()) {
            return Ok(Self::Token(token.to_string()));
        }

        match (config.access_key.as_deref(), config.secret_key.as_deref()) {
            (Some(ak), Some(sk)) if !ak.is_empty() && !sk.is_empty() => Ok(Self::AkSk {
                access_key: ak.to_string(),
                secret_key: sk.to_string(),
                security_token: config.security_token.clone().filter(|t| !t.is_empty()),
            }),
            _ => Err(ApiError::Auth(
                "must configure a token or an access key/secret key pair".to_string(),
            )),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Token(_) => "token",
            Self::AkSk { .. } => "aksk",
        }
    }

    /// Add authentication headers to an outgoing request
    ///
    /// `headers` must already contain every header that is sent with the
    /// request (except `Host`), since AK/SK signatures cover all of them.
    pub fn authorize(
        &self,
        method: &str,
        url: &Url,
        headers: &mut Vec<(String, String)>,
        body: &[u8],
        now: DateTime<Utc>,
    ) -> Result<(), ApiError> {
        match self {
            Self::Token(token) => {
                headers.push((HEADER_AUTH_TOKEN.to_string(), token.clone()));
                Ok(())
            }
            Self::AkSk {
                access_key,
                secret_key,
                security_token,
            } => {
                headers.push((
                    HEADER_SDK_DATE.to_string(),
                    now.format(SDK_DATE_FORMAT).to_string(),
                ));
                if let Some(token) = security_token {
                    headers.push((HEADER_SECURITY_TOKEN.to_string(), token.clone()));
                }

                let authorization =
                    sign_request(method, url, headers, body, access_key, secret_key)?;
                headers.push(("Authorization".to_string(), authorization));
                Ok(())
            }
        }
    }
}

/// Build the SDK-HMAC-SHA256 Authorization header value
pub fn sign_request(
    method: &str,
    url: &Url,
    headers: &[(String, String)],
    body: &[u8],
    access_key: &str,
    secret_key: &str,
) -> Result<String, ApiError> {
    let sdk_date = headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(HEADER_SDK_DATE))
        .map(|(_, v)| v.clone())
        .ok_or_else(|| ApiError::Auth(format!("missing {} header", HEADER_SDK_DATE)))?;

    let mut signed: Vec<(String, String)> = headers
        .iter()
        .map(|(k, v)| (k.to_ascii_lowercase(), v.trim().to_string()))
        .collect();
    if !signed.iter().any(|(k, _)| k == "host") {
        signed.push(("host".to_string(), host_header(url)));
    }
    signed.sort_by(|a, b| a.0.cmp(&b.0));

    let signed_headers = signed
        .iter()
        .map(|(k, _)| k.as_str())
        .collect::<Vec<_>>()
        .join(";");

    let canonical_headers: String = signed
        .iter()
        .map(|(k, v)| format!("{}:{}\n", k, v))
        .collect();

    let canonical_request = format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        method.to_ascii_uppercase(),
        canonical_uri(url),
        canonical_query(url),
        canonical_headers,
        signed_headers,
        hex_encode(&Sha256::digest(body)),
    );

    let string_to_sign = format!(
        "{}\n{}\n{}",
        SIGN_ALGORITHM,
        sdk_date,
        hex_encode(&Sha256::digest(canonical_request.as_bytes())),
    );

    let mut mac = Hmac::<Sha256>::new_from_slice(secret_key.as_bytes())
        .map_err(|e| ApiError::Auth(format!("invalid secret key: {}", e)))?;
    mac.update(string_to_sign.as_bytes());
    let signature = hex_encode(&mac.finalize().into_bytes());

    Ok(format!(
        "{} Access={}, SignedHeaders={}, Signature={}",
        SIGN_ALGORITHM, access_key, signed_headers, signature
    ))
}

/// Host header value as sent by the HTTP client
fn host_header(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    }
}

/// Path with every segment escaped, always ending with '/'
fn canonical_uri(url: &Url) -> String {
    let mut uri = url
        .path()
        .split('/')
        .map(|segment| {
            let decoded = urlencoding::decode(segment)
                .map(|s| s.into_owned())
                .unwrap_or_else(|_| segment.to_string());
            urlencoding::encode(&decoded).into_owned()
        })
        .collect::<Vec<_>>()
        .join("/");
    if !uri.ends_with('/') {
        uri.push('/');
    }
    uri
}

fn canonical_query(url: &Url) -> String {
    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    pairs.sort();

    pairs
        .iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
