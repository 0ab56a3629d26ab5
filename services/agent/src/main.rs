// agent: one-shot vibration reading against a configured gateway.
//
// Exit codes: 0 on a completed acquisition or "no sensors available";
// 1 on configuration, authentication, or acquisition failure.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info, warn};

use agent::config::{AgentConfig, ConfigOverrides};
use agent::display::StdoutSink;
use agent::worker::{RunOutcome, Worker, SHUTDOWN_GRACE};

#[derive(Parser, Debug)]
#[command(name = "agent", version, about = "Vibration gateway session worker")]
struct Cli {
    /// Gateway WebSocket URL (overrides GATEWAY_URL).
    #[arg(long)]
    url: Option<String>,
    /// Preferred sensor serial (overrides SENSOR_SERIAL).
    #[arg(long)]
    serial: Option<i64>,
    /// Tracing filter, e.g. "debug" or "agent=trace" (overrides LOG_LEVEL).
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let overrides = ConfigOverrides {
        url: cli.url,
        serial: cli.serial,
        log_level: cli.log_level,
    };

    let config = match AgentConfig::from_env(&overrides) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("FATAL: failed to load config: {}", e);
            std::process::exit(1);
        }
    };
    init_tracing(config.log_level.as_deref());
    info!(
        version = env!("CARGO_PKG_VERSION"),
        url = %config.gateway_url,
        "agent starting"
    );

    let worker = Worker::new(config, Arc::new(StdoutSink));
    let exit_code = tokio::select! {
        outcome = worker.run() => match outcome {
            Ok(RunOutcome::Completed) => {
                info!("acquisition complete");
                0
            }
            Ok(RunOutcome::NoSensors) => 0,
            Err(e) => {
                error!(error = %e, "agent failed");
                1
            }
        },
        _ = shutdown_signal() => {
            info!("interrupt received; shutting down");
            if tokio::time::timeout(SHUTDOWN_GRACE + Duration::from_millis(100), worker.shutdown())
                .await
                .is_err()
            {
                warn!("shutdown grace expired; forcing exit");
            }
            0
        }
    };
    std::process::exit(exit_code);
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
}
