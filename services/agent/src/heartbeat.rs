//! Application-level liveness probing.
//!
//! The gateway's WebSocket stack does not answer transport pings reliably, so
//! liveness uses in-band `{"type":"ping","timestamp":ms}` frames. After each
//! ping a response deadline is armed; a pong cancels it. A missed deadline
//! fires the timeout hook exactly once and stops the probe — the session
//! decides what to do about the corpse.

use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use vl_protocol::HeartbeatFrame;

#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    pub interval: Duration,
    pub response_timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        HeartbeatConfig {
            interval: Duration::from_secs(30),
            response_timeout: Duration::from_secs(5),
        }
    }
}

struct Running {
    pong_tx: mpsc::UnboundedSender<()>,
    task: tokio::task::JoinHandle<()>,
}

/// Periodic ping sender with a per-ping response deadline.
///
/// Heartbeat frames are out-of-band: they bypass the correlator and router
/// entirely, in both directions.
pub struct Heartbeat {
    config: HeartbeatConfig,
    running: Mutex<Option<Running>>,
}

impl Heartbeat {
    pub fn new(config: HeartbeatConfig) -> Self {
        Heartbeat {
            config,
            running: Mutex::new(None),
        }
    }

    /// Start probing. `send` enqueues one frame and reports whether the socket
    /// accepted it; `on_timeout` runs once if a response deadline expires.
    ///
    /// Starting replaces any previous probe.
    pub fn start<S, T>(&self, send: S, on_timeout: T)
    where
        S: Fn(&str) -> bool + Send + Sync + 'static,
        T: FnOnce() + Send + 'static,
    {
        self.stop();

        let (pong_tx, mut pong_rx) = mpsc::unbounded_channel::<()>();
        let interval = self.config.interval;
        let response_timeout = self.config.response_timeout;

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // interval() fires immediately; the first probe waits a full period.
            ticker.tick().await;

            loop {
                ticker.tick().await;

                // A pong from a previous period must not satisfy this one.
                while pong_rx.try_recv().is_ok() {}

                let ping = HeartbeatFrame::ping(chrono::Utc::now().timestamp_millis());
                let json = match serde_json::to_string(&ping) {
                    Ok(j) => j,
                    Err(_) => continue,
                };
                if !send(&json) {
                    debug!("heartbeat ping not sent; socket not open");
                    continue;
                }

                match tokio::time::timeout(response_timeout, pong_rx.recv()).await {
                    Ok(Some(())) => {}
                    // Channel closed: the heartbeat was stopped under us.
                    Ok(None) => return,
                    Err(_) => {
                        warn!(
                            timeout_ms = response_timeout.as_millis() as u64,
                            "heartbeat response deadline expired"
                        );
                        on_timeout();
                        return;
                    }
                }
            }
        });

        *self.running.lock().expect("heartbeat lock") = Some(Running { pong_tx, task });
    }

    /// Feed a received pong to the armed deadline, if any.
    pub fn notify_pong(&self) {
        if let Some(running) = &*self.running.lock().expect("heartbeat lock") {
            let _ = running.pong_tx.send(());
        }
    }

    /// Stop probing. Safe to call any number of times, in any state.
    pub fn stop(&self) {
        if let Some(running) = self.running.lock().expect("heartbeat lock").take() {
            running.task.abort();
        }
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        self.stop();
    }
}
