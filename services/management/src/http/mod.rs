//! HTTP handlers and shared request plumbing.

pub mod factories;
pub mod gateways;
pub mod response;

use axum::response::Response;
use serde_json::Value;

use self::response::validation_error;

/// Parse and bound pagination: `limit` 1–100 (default 20), `offset` >= 0
/// (default 0).
pub(crate) fn resolve_page(
    limit: Option<&String>,
    offset: Option<&String>,
) -> Result<(u32, u32), Response> {
    let limit = match limit {
        None => 20,
        Some(raw) => raw
            .parse::<i64>()
            .ok()
            .filter(|n| (1..=100).contains(n))
            .ok_or_else(|| validation_error("limit must be an integer between 1 and 100"))?,
    };
    let offset = match offset {
        None => 0,
        Some(raw) => raw
            .parse::<i64>()
            .ok()
            .filter(|n| *n >= 0)
            .ok_or_else(|| validation_error("offset must be a non-negative integer"))?,
    };
    Ok((limit as u32, offset as u32))
}

/// A required, non-empty string field.
pub(crate) fn required_string(body: &Value, field: &str) -> Result<String, Response> {
    match body.get(field) {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.trim().to_owned()),
        Some(Value::String(_)) | None => {
            Err(validation_error(format!("{} is required", field)))
        }
        Some(_) => Err(validation_error(format!("{} must be a string", field))),
    }
}

/// An optional string field; present-but-not-a-string is a validation error.
pub(crate) fn optional_string(body: &Value, field: &str) -> Result<Option<String>, Response> {
    match body.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.trim().to_owned())),
        Some(_) => Err(validation_error(format!("{} must be a string", field))),
    }
}

/// The optional `metadata` object, stored as serialized JSON.
pub(crate) fn metadata_field(body: &Value) -> Result<Option<String>, Response> {
    match body.get("metadata") {
        None | Some(Value::Null) => Ok(None),
        Some(value @ Value::Object(_)) => Ok(Some(value.to_string())),
        Some(_) => Err(validation_error("metadata must be an object")),
    }
}

/// Gateway URLs must be WebSocket URLs.
pub(crate) fn validate_gateway_url(url: &str) -> Result<(), Response> {
    if url.starts_with("ws://") || url.starts_with("wss://") {
        Ok(())
    } else {
        Err(validation_error("url must be a ws:// or wss:// URL"))
    }
}
