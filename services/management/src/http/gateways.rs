//! Gateway CRUD handlers.
//!
//! Passwords arrive in request bodies, are encrypted immediately, and exist
//! nowhere else: not in responses, not in logs, not in the encrypted form
//! either — responses omit `encrypted_credential` entirely. The session
//! worker reads the blob straight from the store.

use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::db::GatewayRecord;
use crate::state::AppState;

use super::response::{internal_error, not_found, validation_error};
use super::{metadata_field, optional_string, required_string, resolve_page, validate_gateway_url};

fn gateway_json(record: &GatewayRecord) -> Value {
    json!({
        "id": record.id,
        "factory_id": record.factory_id,
        "gateway_id": record.gateway_id,
        "name": record.name,
        "url": record.url,
        "email": record.email,
        "model": record.model,
        "firmware_version": record.firmware_version,
        "last_seen_at": record.last_seen_at,
        "metadata": serde_json::from_str::<Value>(&record.metadata)
            .unwrap_or_else(|_| json!({})),
        "created_at": record.created_at,
        "updated_at": record.updated_at,
    })
}

pub async fn create_gateway(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Response {
    let factory_id = match required_string(&body, "factory_id") {
        Ok(factory_id) => factory_id,
        Err(response) => return response,
    };
    let gateway_id = match required_string(&body, "gateway_id") {
        Ok(gateway_id) => gateway_id,
        Err(response) => return response,
    };
    let name = match required_string(&body, "name") {
        Ok(name) => name,
        Err(response) => return response,
    };
    let url = match required_string(&body, "url") {
        Ok(url) => url,
        Err(response) => return response,
    };
    if let Err(response) = validate_gateway_url(&url) {
        return response;
    }
    let email = match required_string(&body, "email") {
        Ok(email) => email,
        Err(response) => return response,
    };
    let password = match required_string(&body, "password") {
        Ok(password) => password,
        Err(response) => return response,
    };
    let model = match optional_string(&body, "model") {
        Ok(model) => model,
        Err(response) => return response,
    };
    let firmware_version = match optional_string(&body, "firmware_version") {
        Ok(firmware_version) => firmware_version,
        Err(response) => return response,
    };
    let metadata = match metadata_field(&body) {
        Ok(metadata) => metadata.unwrap_or_else(|| "{}".to_owned()),
        Err(response) => return response,
    };

    let db = state.db.lock().await;
    match db.get_factory(&factory_id) {
        Ok(Some(_)) => {}
        Ok(None) => return validation_error("factory_id does not reference a known factory"),
        Err(e) => return internal_error(e),
    }

    let encrypted_credential = match state
        .codec
        .encrypt(&password)
        .and_then(|blob| blob.to_json())
    {
        Ok(blob) => blob,
        Err(e) => return internal_error(e),
    };

    let now = Utc::now().to_rfc3339();
    let record = GatewayRecord {
        id: Uuid::new_v4().to_string(),
        factory_id,
        gateway_id,
        name,
        url,
        email,
        encrypted_credential,
        model,
        firmware_version,
        last_seen_at: None,
        metadata,
        created_at: now.clone(),
        updated_at: now,
    };

    match db.create_gateway(&record) {
        Ok(()) => (StatusCode::CREATED, Json(gateway_json(&record))).into_response(),
        Err(e) => internal_error(e),
    }
}

pub async fn list_gateways(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let (limit, offset) = match resolve_page(params.get("limit"), params.get("offset")) {
        Ok(page) => page,
        Err(response) => return response,
    };
    let factory_id = params.get("factory_id").map(String::as_str);

    let db = state.db.lock().await;
    match db.list_gateways(factory_id, limit, offset) {
        Ok(page) => Json(json!({
            "data": page.items.iter().map(gateway_json).collect::<Vec<_>>(),
            "pagination": {"limit": limit, "offset": offset, "total": page.total},
        }))
        .into_response(),
        Err(e) => internal_error(e),
    }
}

pub async fn get_gateway(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let db = state.db.lock().await;
    match db.get_gateway(&id) {
        Ok(Some(record)) => Json(gateway_json(&record)).into_response(),
        Ok(None) => not_found("GATEWAY_NOT_FOUND", "gateway not found"),
        Err(e) => internal_error(e),
    }
}

pub async fn update_gateway(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    let db = state.db.lock().await;
    let mut record = match db.get_gateway(&id) {
        Ok(Some(record)) => record,
        Ok(None) => return not_found("GATEWAY_NOT_FOUND", "gateway not found"),
        Err(e) => return internal_error(e),
    };

    if body.get("name").is_some() {
        record.name = match required_string(&body, "name") {
            Ok(name) => name,
            Err(response) => return response,
        };
    }
    if body.get("url").is_some() {
        record.url = match required_string(&body, "url") {
            Ok(url) => url,
            Err(response) => return response,
        };
        if let Err(response) = validate_gateway_url(&record.url) {
            return response;
        }
    }
    if body.get("email").is_some() {
        record.email = match required_string(&body, "email") {
            Ok(email) => email,
            Err(response) => return response,
        };
    }
    match optional_string(&body, "model") {
        Ok(Some(model)) => record.model = Some(model),
        Ok(None) => {}
        Err(response) => return response,
    }
    match optional_string(&body, "firmware_version") {
        Ok(Some(firmware_version)) => record.firmware_version = Some(firmware_version),
        Ok(None) => {}
        Err(response) => return response,
    }
    match metadata_field(&body) {
        Ok(Some(metadata)) => record.metadata = metadata,
        Ok(None) => {}
        Err(response) => return response,
    }

    // A password in the body re-encrypts the credential under a fresh IV.
    if body.get("password").is_some() {
        let password = match required_string(&body, "password") {
            Ok(password) => password,
            Err(response) => return response,
        };
        record.encrypted_credential = match state
            .codec
            .encrypt(&password)
            .and_then(|blob| blob.to_json())
        {
            Ok(blob) => blob,
            Err(e) => return internal_error(e),
        };
    }

    record.updated_at = Utc::now().to_rfc3339();
    match db.update_gateway(&record) {
        Ok(Some(updated)) => Json(gateway_json(&updated)).into_response(),
        Ok(None) => not_found("GATEWAY_NOT_FOUND", "gateway not found"),
        Err(e) => internal_error(e),
    }
}

pub async fn delete_gateway(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let db = state.db.lock().await;
    match db.soft_delete_gateway(&id, &Utc::now().to_rfc3339()) {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => not_found("GATEWAY_NOT_FOUND", "gateway not found"),
        Err(e) => internal_error(e),
    }
}
