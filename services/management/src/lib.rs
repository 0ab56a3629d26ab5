// management: Library entry point.
// Exposes the router and modules for integration testing.

pub mod config;
pub mod db;
pub mod http;
pub mod state;

pub use state::AppState;

use axum::http::{header, Method};
use axum::routing::get;
use axum::Router;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use config::AppEnv;

pub fn build_router(state: AppState, env: AppEnv, cors_origins: &[String]) -> Router {
    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route(
            "/api/factories",
            get(http::factories::list_factories).post(http::factories::create_factory),
        )
        .route(
            "/api/factories/{id}",
            get(http::factories::get_factory)
                .put(http::factories::update_factory)
                .delete(http::factories::delete_factory),
        )
        .route(
            "/api/gateways",
            get(http::gateways::list_gateways).post(http::gateways::create_gateway),
        )
        .route(
            "/api/gateways/{id}",
            get(http::gateways::get_gateway)
                .put(http::gateways::update_gateway)
                .delete(http::gateways::delete_gateway),
        )
        .layer(cors_layer(env, cors_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Development and test reflect the request origin; production enforces the
/// configured allow-list.
fn cors_layer(env: AppEnv, origins: &[String]) -> CorsLayer {
    match env {
        AppEnv::Production => CorsLayer::new()
            .allow_origin(AllowOrigin::list(
                origins.iter().filter_map(|origin| origin.parse().ok()),
            ))
            .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
            .allow_headers([header::CONTENT_TYPE]),
        AppEnv::Development | AppEnv::Test => CorsLayer::new()
            .allow_origin(AllowOrigin::mirror_request())
            .allow_methods(Any)
            .allow_headers(Any),
    }
}
