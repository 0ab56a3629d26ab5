//! Factory CRUD handlers.

use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::db::FactoryRecord;
use crate::state::AppState;

use super::response::{internal_error, not_found};
use super::{metadata_field, optional_string, required_string, resolve_page};

fn factory_json(record: &FactoryRecord) -> Value {
    json!({
        "id": record.id,
        "name": record.name,
        "location": record.location,
        "metadata": serde_json::from_str::<Value>(&record.metadata)
            .unwrap_or_else(|_| json!({})),
        "created_at": record.created_at,
        "updated_at": record.updated_at,
    })
}

pub async fn create_factory(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Response {
    let name = match required_string(&body, "name") {
        Ok(name) => name,
        Err(response) => return response,
    };
    let location = match optional_string(&body, "location") {
        Ok(location) => location,
        Err(response) => return response,
    };
    let metadata = match metadata_field(&body) {
        Ok(metadata) => metadata.unwrap_or_else(|| "{}".to_owned()),
        Err(response) => return response,
    };

    let now = Utc::now().to_rfc3339();
    let record = FactoryRecord {
        id: Uuid::new_v4().to_string(),
        name,
        location,
        metadata,
        created_at: now.clone(),
        updated_at: now,
    };

    let db = state.db.lock().await;
    match db.create_factory(&record) {
        Ok(()) => (StatusCode::CREATED, Json(factory_json(&record))).into_response(),
        Err(e) => internal_error(e),
    }
}

pub async fn list_factories(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let (limit, offset) = match resolve_page(params.get("limit"), params.get("offset")) {
        Ok(page) => page,
        Err(response) => return response,
    };

    let db = state.db.lock().await;
    match db.list_factories(limit, offset) {
        Ok(page) => Json(json!({
            "data": page.items.iter().map(factory_json).collect::<Vec<_>>(),
            "pagination": {"limit": limit, "offset": offset, "total": page.total},
        }))
        .into_response(),
        Err(e) => internal_error(e),
    }
}

pub async fn get_factory(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let db = state.db.lock().await;
    match db.get_factory(&id) {
        Ok(Some(record)) => Json(factory_json(&record)).into_response(),
        Ok(None) => not_found("FACTORY_NOT_FOUND", "factory not found"),
        Err(e) => internal_error(e),
    }
}

pub async fn update_factory(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    let db = state.db.lock().await;
    let existing = match db.get_factory(&id) {
        Ok(Some(record)) => record,
        Ok(None) => return not_found("FACTORY_NOT_FOUND", "factory not found"),
        Err(e) => return internal_error(e),
    };

    // Partial update: absent fields keep their stored values.
    let name = if body.get("name").is_some() {
        match required_string(&body, "name") {
            Ok(name) => name,
            Err(response) => return response,
        }
    } else {
        existing.name.clone()
    };
    let location = match optional_string(&body, "location") {
        Ok(Some(location)) => Some(location),
        Ok(None) => existing.location.clone(),
        Err(response) => return response,
    };
    let metadata = match metadata_field(&body) {
        Ok(Some(metadata)) => metadata,
        Ok(None) => existing.metadata.clone(),
        Err(response) => return response,
    };

    let updated_at = Utc::now().to_rfc3339();
    match db.update_factory(&id, &name, location.as_deref(), &metadata, &updated_at) {
        Ok(Some(record)) => Json(factory_json(&record)).into_response(),
        Ok(None) => not_found("FACTORY_NOT_FOUND", "factory not found"),
        Err(e) => internal_error(e),
    }
}

pub async fn delete_factory(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let db = state.db.lock().await;
    match db.soft_delete_factory(&id, &Utc::now().to_rfc3339()) {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => not_found("FACTORY_NOT_FOUND", "factory not found"),
        Err(e) => internal_error(e),
    }
}
