//! The one-shot session worker.
//!
//! Ties the session, router, and acquisition flow together:
//! connect → authenticate → discover → acquire → present → close.
//!
//! "No sensors available" is a graceful outcome, not a failure — the gateway
//! is healthy, it just has nothing attached.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use crate::acquisition::{Acquisition, AcquisitionError};
use crate::backoff::BackoffConfig;
use crate::commands::GatewayCommands;
use crate::config::AgentConfig;
use crate::correlator::{CommandError, Correlator};
use crate::discovery::{discover, DiscoveryError};
use crate::display::ReadingSink;
use crate::heartbeat::HeartbeatConfig;
use crate::notify::NotificationBus;
use crate::router::Router;
use crate::session::{Session, SessionConfig, SessionEvent};

/// How long shutdown may drag its feet before the process force-exits.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, PartialEq, Eq)]
pub enum RunOutcome {
    /// A reading was acquired and presented.
    Completed,
    /// The gateway answered but has no live sensors; exits 0.
    NoSensors,
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("authentication failed: {0}")]
    Auth(#[source] CommandError),
    #[error("sensor discovery failed: {0}")]
    Discovery(#[source] CommandError),
    #[error(transparent)]
    Acquisition(#[from] AcquisitionError),
    #[error("session closed before the acquisition completed")]
    SessionClosed,
    #[error("worker already ran")]
    AlreadyRan,
}

pub struct Worker {
    session: Session,
    correlator: Correlator,
    commands: GatewayCommands,
    acquisition: Arc<Acquisition>,
    bus: Arc<NotificationBus>,
    config: AgentConfig,
    sink: Arc<dyn ReadingSink>,
    /// Consumed by the single `run()`.
    events: Mutex<Option<mpsc::UnboundedReceiver<SessionEvent>>>,
}

impl Worker {
    pub fn new(config: AgentConfig, sink: Arc<dyn ReadingSink>) -> Self {
        let (session, events) = Session::new(SessionConfig {
            url: config.gateway_url.clone(),
            connect_timeout: config.connect_timeout,
            heartbeat: HeartbeatConfig {
                interval: config.heartbeat_interval,
                ..HeartbeatConfig::default()
            },
            backoff: BackoffConfig::default(),
        });

        let send_session = session.clone();
        let correlator =
            Correlator::new(config.command_timeout, move |text| send_session.send(text));
        let bus = Arc::new(NotificationBus::new());
        let commands = GatewayCommands::new(correlator.clone());
        let acquisition = Arc::new(Acquisition::new(
            commands.clone(),
            bus.clone(),
            config.acquisition_timeout,
        ));

        Worker {
            session,
            correlator,
            commands,
            acquisition,
            bus,
            config,
            sink,
            events: Mutex::new(Some(events)),
        }
    }

    /// Run one acquisition cycle end to end.
    pub async fn run(&self) -> Result<RunOutcome, WorkerError> {
        let Some(mut events) = self.events.lock().expect("events lock").take() else {
            return Err(WorkerError::AlreadyRan);
        };

        // The pump is the single consumer of session events: it routes frames
        // in arrival order and flags opens. It ends on a terminal close.
        let (open_tx, mut open_rx) = watch::channel(0u64);
        let router = Router::new(self.correlator.clone(), self.bus.clone());
        let pump_correlator = self.correlator.clone();
        let pump = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    SessionEvent::Open => open_tx.send_modify(|n| *n += 1),
                    SessionEvent::Frame(text) => router.handle(&text),
                    SessionEvent::Closed {
                        will_reconnect: false,
                        ..
                    } => {
                        // Terminal teardown: every in-flight call fails now
                        // rather than waiting out its deadline.
                        pump_correlator.shutdown();
                        break;
                    }
                    SessionEvent::Closed { code, .. } => {
                        warn!(?code, "connection lost; session is reconnecting");
                    }
                }
            }
        });

        self.session.connect();
        if open_rx.changed().await.is_err() {
            return Err(WorkerError::SessionClosed);
        }

        if let Err(e) = self
            .commands
            .login(&self.config.email, &self.config.password)
            .await
        {
            self.shutdown().await;
            return Err(WorkerError::Auth(e));
        }
        self.session.mark_authenticated();
        info!("authenticated with gateway");

        let sensor = match discover(&self.commands, self.config.preferred_serial).await {
            Ok(sensor) => sensor,
            Err(DiscoveryError::NoSensors) => {
                info!("No sensors available");
                self.shutdown().await;
                let _ = tokio::time::timeout(SHUTDOWN_GRACE, pump).await;
                return Ok(RunOutcome::NoSensors);
            }
            Err(DiscoveryError::Command(e)) => {
                self.shutdown().await;
                return Err(WorkerError::Discovery(e));
            }
        };
        info!(
            serial = sensor.serial,
            part_num = %sensor.part_num,
            samples = sensor.samples,
            "selected sensor"
        );

        let reading = match self.acquisition.acquire(&sensor).await {
            Ok(reading) => reading,
            Err(e) => {
                self.shutdown().await;
                return Err(e.into());
            }
        };
        self.sink.present(&reading);

        self.shutdown().await;
        let _ = tokio::time::timeout(SHUTDOWN_GRACE, pump).await;
        Ok(RunOutcome::Completed)
    }

    /// The shutdown sequence: release the subscription while the socket is
    /// still up, fail the stragglers, close with 1000. Safe to repeat.
    pub async fn shutdown(&self) {
        self.acquisition.release().await;
        self.correlator.shutdown();
        self.session.close(1000, "client shutdown");
    }
}
