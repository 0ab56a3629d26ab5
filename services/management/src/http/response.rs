//! Frozen HTTP error envelope:
//!
//! ```json
//! { "error": { "code": "...", "message": "...", "statusCode": 400 } }
//! ```
//!
//! Internal failures log the real cause and answer with the generic message —
//! storage and crypto detail stays out of responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use std::fmt::Display;
use tracing::error;

#[derive(Debug, Serialize)]
pub struct ErrorEnvelope {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

pub(crate) fn json_error(
    status: StatusCode,
    code: impl Into<String>,
    message: impl Into<String>,
) -> Response {
    (
        status,
        Json(ErrorEnvelope {
            error: ErrorDetail {
                code: code.into(),
                message: message.into(),
                status_code: status.as_u16(),
                details: None,
            },
        }),
    )
        .into_response()
}

pub fn validation_error(message: impl Into<String>) -> Response {
    json_error(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", message)
}

pub fn not_found(code: impl Into<String>, message: impl Into<String>) -> Response {
    json_error(StatusCode::NOT_FOUND, code, message)
}

pub fn internal_error(err: impl Display) -> Response {
    error!(error = %err, "internal error");
    json_error(
        StatusCode::INTERNAL_SERVER_ERROR,
        "INTERNAL_ERROR",
        "Internal server error",
    )
}
