//! Gateway CRUD over the real router, with special attention to credential
//! handling: passwords are encrypted at rest, never echoed, and re-encrypted
//! under a fresh IV on update.

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
use vl_credential::{CredentialCodec, EncryptedCredential};

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

async fn create_factory(router: &Router) -> String {
    let (status, body) = request(
        router,
        "POST",
        "/api/factories",
        Some(json!({"name": "Plant A"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    body["id"].as_str().expect("factory id").to_owned()
}

fn gateway_body(factory_id: &str) -> Value {
    json!({
        "factory_id": factory_id,
        "gateway_id": "GW-0042",
        "name": "Press line gateway",
        "url": "wss://gw.example.com/ws",
        "email": "ops@example.com",
        "password": "s3cret",
        "model": "VG-2"
    })
}

#[tokio::test]
async fn created_gateway_stores_an_encrypted_credential_and_hides_it() {
    let state = test_state();
    let router = test_router(state.clone());
    let factory_id = create_factory(&router).await;

    let (status, created) = request(
        &router,
        "POST",
        "/api/gateways",
        Some(gateway_body(&factory_id)),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    // Nothing credential-shaped in the response.
    assert!(created.get("password").is_none());
    assert!(created.get("encrypted_credential").is_none());
    assert_eq!(created["gateway_id"], "GW-0042");
    let id = created["id"].as_str().expect("id").to_owned();

    // The stored blob is real AES-GCM output that decrypts to the password.
    let stored = {
        let db = state.db.lock().await;
        db.get_gateway(&id).expect("db").expect("row")
    };
    let blob = EncryptedCredential::from_json(&stored.encrypted_credential).expect("blob");
    assert_eq!(state.codec.decrypt(&blob).expect("decrypt"), "s3cret");
}

#[tokio::test]
async fn unknown_factory_is_a_validation_error() {
    let router = test_router(test_state());
    let (status, body) = request(
        &router,
        "POST",
        "/api/gateways",
        Some(gateway_body("no-such-factory")),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn non_websocket_url_is_rejected() {
    let router = test_router(test_state());
    let factory_id = create_factory(&router).await;
    let mut body = gateway_body(&factory_id);
    body["url"] = json!("https://gw.example.com");
    let (status, response) = request(&router, "POST", "/api/gateways", Some(body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(response["error"]["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn missing_password_is_rejected() {
    let router = test_router(test_state());
    let factory_id = create_factory(&router).await;
    let mut body = gateway_body(&factory_id);
    body.as_object_mut().expect("object").remove("password");
    let (status, response) = request(&router, "POST", "/api/gateways", Some(body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(response["error"]["message"]
        .as_str()
        .expect("message")
        .contains("password"));
}

#[tokio::test]
async fn update_with_password_re_encrypts_under_a_fresh_iv() {
    let state = test_state();
    let router = test_router(state.clone());
    let factory_id = create_factory(&router).await;

    let (_, created) = request(
        &router,
        "POST",
        "/api/gateways",
        Some(gateway_body(&factory_id)),
    )
    .await;
    let id = created["id"].as_str().expect("id").to_owned();
    let first_blob = {
        let db = state.db.lock().await;
        db.get_gateway(&id).expect("db").expect("row").encrypted_credential
    };

    let (status, updated) = request(
        &router,
        "PUT",
        &format!("/api/gateways/{}", id),
        Some(json!({"password": "rotated", "name": "Press line gateway B"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["name"], "Press line gateway B");
    assert!(updated.get("password").is_none());

    let stored = {
        let db = state.db.lock().await;
        db.get_gateway(&id).expect("db").expect("row")
    };
    assert_ne!(stored.encrypted_credential, first_blob);
    let blob = EncryptedCredential::from_json(&stored.encrypted_credential).expect("blob");
    assert_eq!(state.codec.decrypt(&blob).expect("decrypt"), "rotated");
}

#[tokio::test]
async fn update_without_password_keeps_the_stored_credential() {
    let state = test_state();
    let router = test_router(state.clone());
    let factory_id = create_factory(&router).await;

    let (_, created) = request(
        &router,
        "POST",
        "/api/gateways",
        Some(gateway_body(&factory_id)),
    )
    .await;
    let id = created["id"].as_str().expect("id").to_owned();
    let before = {
        let db = state.db.lock().await;
        db.get_gateway(&id).expect("db").expect("row").encrypted_credential
    };

    let (status, _) = request(
        &router,
        "PUT",
        &format!("/api/gateways/{}", id),
        Some(json!({"model": "VG-3"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let after = {
        let db = state.db.lock().await;
        db.get_gateway(&id).expect("db").expect("row").encrypted_credential
    };
    assert_eq!(before, after);
}

#[tokio::test]
async fn listing_filters_by_factory_and_paginates() {
    let router = test_router(test_state());
    let factory_a = create_factory(&router).await;
    let (_, other) = request(
        &router,
        "POST",
        "/api/factories",
        Some(json!({"name": "Plant B"})),
    )
    .await;
    let factory_b = other["id"].as_str().expect("id").to_owned();

    for (factory, device) in [(&factory_a, "GW-1"), (&factory_a, "GW-2"), (&factory_b, "GW-3")] {
        let mut body = gateway_body(factory);
        body["gateway_id"] = json!(device);
        let (status, _) = request(&router, "POST", "/api/gateways", Some(body)).await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let (_, page) = request(
        &router,
        "GET",
        &format!("/api/gateways?factory_id={}", factory_a),
        None,
    )
    .await;
    assert_eq!(page["pagination"]["total"], 2);

    let (_, all) = request(&router, "GET", "/api/gateways?limit=2", None).await;
    assert_eq!(all["pagination"]["total"], 3);
    assert_eq!(all["data"].as_array().expect("data").len(), 2);
}

#[tokio::test]
async fn unknown_gateway_uses_the_gateway_not_found_code() {
    let router = test_router(test_state());
    for (method, body) in [
        ("GET", None),
        ("PUT", Some(json!({"name": "x"}))),
        ("DELETE", None),
    ] {
        let (status, response) =
            request(&router, method, "/api/gateways/missing", body).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "method: {}", method);
        assert_eq!(response["error"]["code"], "GATEWAY_NOT_FOUND");
    }
}

#[tokio::test]
async fn deleted_gateway_disappears_from_list_and_fetch() {
    let router = test_router(test_state());
    let factory_id = create_factory(&router).await;
    let (_, created) = request(
        &router,
        "POST",
        "/api/gateways",
        Some(gateway_body(&factory_id)),
    )
    .await;
    let id = created["id"].as_str().expect("id").to_owned();

    let (status, _) = request(&router, "DELETE", &format!("/api/gateways/{}", id), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = request(&router, "GET", &format!("/api/gateways/{}", id), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, page) = request(&router, "GET", "/api/gateways", None).await;
    assert_eq!(page["pagination"]["total"], 0);
}
