//! Field mapping between resource records and the REST wire format

use crate::cloud::error::ApiError;
use serde_json::{Map, Value};

/// Look up a value using a dot-notation path
///
/// Numeric segments index into arrays, e.g. `projects.0.id`.
pub fn path_search<'a>(item: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(item);
    }

    let mut current = item;
    for part in path.split('.') {
        current = match part.parse::<usize>() {
            Ok(idx) if current.is_array() => current.get(idx)?,
            _ => current.get(part)?,
        };
    }

    if current.is_null() {
        None
    } else {
        Some(current)
    }
}

/// Look up a string using a dot-notation path
pub fn path_search_str(item: &Value, path: &str) -> Result<String, ApiError> {
    match path_search(item, path) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        _ => Err(ApiError::missing_field(path)),
    }
}

/// Whether a value carries nothing worth sending
pub fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        _ => false,
    }
}

/// Recursively drop null and empty values from a request body
pub fn remove_empty(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, remove_empty(v)))
                .filter(|(_, v)| !is_empty_value(v))
                .collect(),
        ),
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(remove_empty)
                .filter(|v| !is_empty_value(v))
                .collect(),
        ),
        other => other,
    }
}

/// Build a request body from `(param, value)` pairs
///
/// Empty values are omitted; the result is nested under `wrapper` when set.
pub fn build_body<I>(wrapper: Option<&str>, params: I) -> Option<Value>
where
    I: IntoIterator<Item = (String, Value)>,
{
    let inner: Map<String, Value> = params
        .into_iter()
        .map(|(k, v)| (k, remove_empty(v)))
        .filter(|(_, v)| !is_empty_value(v))
        .collect();

    if inner.is_empty() {
        return None;
    }

    let body = match wrapper {
        Some(key) if !key.is_empty() => {
            let mut outer = Map::new();
            outer.insert(key.to_string(), Value::Object(inner));
            Value::Object(outer)
        }
        _ => Value::Object(inner),
    };
    Some(body)
}

/// Substitute `{name}` placeholders in a URL template
///
/// Every placeholder must resolve to a non-empty string; values are
/// percent-encoded.
pub fn render_template<F>(template: &str, lookup: F) -> Result<String, ApiError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut rendered = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find('{') {
        let Some(len) = rest[start..].find('}') else {
            return Err(ApiError::invalid_request(format!(
                "unterminated placeholder in '{}'",
                template
            )));
        };
        let name = &rest[start + 1..start + len];
        let value = lookup(name).filter(|v| !v.is_empty()).ok_or_else(|| {
            ApiError::invalid_request(format!("missing value for '{{{}}}' in '{}'", name, template))
        })?;

        rendered.push_str(&rest[..start]);
        rendered.push_str(&urlencoding::encode(&value));
        rest = &rest[start + len + 1..];
    }
    rendered.push_str(rest);

    Ok(rendered)
}

/// Render a scalar attribute as a path parameter
pub fn value_to_param(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Names of the attributes whose desired value differs from the current one
///
/// An attribute present on one side only counts as changed unless the
/// present value is itself empty.
pub fn diff_changed(current: &Map<String, Value>, desired: &Map<String, Value>) -> Vec<String> {
    let mut changed: Vec<String> = desired
        .iter()
        .filter(|(k, v)| match current.get(*k) {
            Some(old) => old != *v,
            None => !is_empty_value(v),
        })
        .map(|(k, _)| k.clone())
        .collect();

    changed.extend(
        current
            .iter()
            .filter(|(k, v)| !desired.contains_key(*k) && !is_empty_value(v))
            .map(|(k, _)| k.clone()),
    );

    changed.sort();
    changed
}

/// Convert bytes to MiB
pub fn bytes_to_mb(bytes: i64) -> i64 {
    bytes / 1024 / 1024
}

/// Convert MiB to bytes; `None` when the result does not fit in an `i64`
pub fn mb_to_bytes(mb: i64) -> Option<i64> {
    mb.checked_mul(1024 * 1024)
}
