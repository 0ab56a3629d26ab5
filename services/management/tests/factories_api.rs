//! Factory CRUD over the real router: status codes, envelopes, pagination,
//! soft deletion.

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::{json, Value};
use tower::ServiceExt;

use management::config::AppEnv;
use management::db::Db;
use management::{build_router, AppState};
use vl_credential::CredentialCodec;

fn test_state() -> AppState {
    let codec = CredentialCodec::from_base64_key(&BASE64.encode([9u8; 32])).expect("codec");
    AppState::new(Db::open_in_memory().expect("db"), codec)
}

fn test_router(state: AppState) -> Router {
    build_router(state, AppEnv::Test, &[])
}

async fn request(
    router: &Router,
    method: &str,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(value) => {
            builder = builder.header("content-type", "application/json");
            Body::from(value.to_string())
        }
        None => Body::empty(),
    };
    let response = router
        .clone()
        .oneshot(builder.body(body).expect("request"))
        .await
        .expect("response");
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("json body")
    };
    (status, value)
}

#[tokio::test]
async fn create_fetch_update_delete_lifecycle() {
    let router = test_router(test_state());

    let (status, created) = request(
        &router,
        "POST",
        "/api/factories",
        Some(json!({"name": "Plant A", "location": "Hall 3", "metadata": {"region": "north"}})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["name"], "Plant A");
    assert_eq!(created["metadata"]["region"], "north");
    assert!(created.get("deleted_at").is_none(), "soft-deletion timestamp leaked");
    let id = created["id"].as_str().expect("id").to_owned();

    let (status, fetched) = request(&router, "GET", &format!("/api/factories/{}", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["location"], "Hall 3");

    let (status, updated) = request(
        &router,
        "PUT",
        &format!("/api/factories/{}", id),
        Some(json!({"name": "Plant A East"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["name"], "Plant A East");
    // Partial update keeps the other fields.
    assert_eq!(updated["location"], "Hall 3");

    let (status, _) = request(&router, "DELETE", &format!("/api/factories/{}", id), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = request(&router, "GET", &format!("/api/factories/{}", id), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "FACTORY_NOT_FOUND");

    // Deleting twice reports not-found, not a second deletion.
    let (status, _) = request(&router, "DELETE", &format!("/api/factories/{}", id), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn missing_name_is_a_validation_error_envelope() {
    let router = test_router(test_state());
    let (status, body) = request(
        &router,
        "POST",
        "/api/factories",
        Some(json!({"location": "nowhere"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    assert_eq!(body["error"]["statusCode"], 400);
    assert!(body["error"]["message"].as_str().expect("message").contains("name"));
}

#[tokio::test]
async fn listing_pages_through_factories() {
    let router = test_router(test_state());
    for i in 0..3 {
        let (status, _) = request(
            &router,
            "POST",
            "/api/factories",
            Some(json!({"name": format!("Plant {}", i)})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let (status, page) = request(&router, "GET", "/api/factories?limit=2&offset=0", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["data"].as_array().expect("data").len(), 2);
    assert_eq!(page["pagination"]["total"], 3);
    assert_eq!(page["pagination"]["limit"], 2);

    let (_, rest) = request(&router, "GET", "/api/factories?limit=2&offset=2", None).await;
    assert_eq!(rest["data"].as_array().expect("data").len(), 1);

    // Defaults: limit 20, offset 0.
    let (_, all) = request(&router, "GET", "/api/factories", None).await;
    assert_eq!(all["pagination"]["limit"], 20);
    assert_eq!(all["data"].as_array().expect("data").len(), 3);
}

#[tokio::test]
async fn out_of_range_pagination_is_rejected() {
    let router = test_router(test_state());
    for uri in [
        "/api/factories?limit=0",
        "/api/factories?limit=101",
        "/api/factories?offset=-1",
        "/api/factories?limit=ten",
    ] {
        let (status, body) = request(&router, "GET", uri, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "uri: {}", uri);
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR", "uri: {}", uri);
    }
}

#[tokio::test]
async fn update_of_unknown_factory_is_not_found() {
    let router = test_router(test_state());
    let (status, body) = request(
        &router,
        "PUT",
        "/api/factories/does-not-exist",
        Some(json!({"name": "Ghost"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "FACTORY_NOT_FOUND");
}
