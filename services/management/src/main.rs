// management: REST management service for factories and gateways.
//
// Gateway passwords are encrypted at rest with the boot-time key; a missing
// or malformed ENCRYPTION_KEY refuses to start.

use std::path::Path;

use tracing::{info, warn};

use management::config::ManagementConfig;
use management::db::Db;
use management::{build_router, AppState};
use vl_credential::CredentialCodec;

#[tokio::main]
async fn main() {
    let config = match ManagementConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("FATAL: failed to load config: {}", e);
            std::process::exit(1);
        }
    };
    init_tracing(config.log_level.as_deref());

    let codec = match CredentialCodec::from_base64_key(&config.encryption_key) {
        Ok(codec) => codec,
        Err(e) => {
            eprintln!("FATAL: {}", e);
            std::process::exit(1);
        }
    };

    let db = match Db::open(Path::new(&config.database_path)) {
        Ok(db) => db,
        Err(e) => {
            eprintln!("FATAL: failed to open store '{}': {}", config.database_path, e);
            std::process::exit(1);
        }
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.api_port,
        database = %config.database_path,
        env = ?config.env,
        "management service starting"
    );

    let state = AppState::new(db, codec);
    let router = build_router(state, config.env, &config.cors_origins);

    let bind = ("0.0.0.0", config.api_port);
    let listener = match tokio::net::TcpListener::bind(bind).await {
        Ok(listener) => listener,
        Err(e) => {
            eprintln!("FATAL: failed to bind port {}: {}", config.api_port, e);
            std::process::exit(1);
        }
    };

    if let Err(e) = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        eprintln!("FATAL: server error: {}", e);
        std::process::exit(1);
    }
}

fn init_tracing(log_level: Option<&str>) {
    let filter = match log_level {
        Some(level) => tracing_subscriber::EnvFilter::new(level),
        None => tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "SIGTERM handler unavailable; watching SIGINT only");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    info!("shutdown signal received");
}
