//! Gateway WebSocket session: socket ownership, state machine, reconnection.
//!
//! The session owns its socket, its heartbeat, its backoff, and its reconnect
//! timer. Everything the rest of the agent needs arrives as [`SessionEvent`]s
//! over a channel — no nested callbacks, so an event consumer issuing
//! commands cannot re-enter session machinery.
//!
//! Reconnection policy, keyed on the WebSocket close code:
//! - 1000 (normal) and 1008 (policy violation) suppress reconnection.
//! - Every other code, and any abrupt close, schedules a reconnect through
//!   the decorrelated-jitter backoff.
//! - A heartbeat timeout force-terminates the socket and then reconnects.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Message};
use tracing::{debug, info, warn};

use vl_protocol::HeartbeatFrame;

use crate::backoff::{Backoff, BackoffConfig};
use crate::heartbeat::{Heartbeat, HeartbeatConfig};

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Authenticated,
    Closing,
    Closed,
}

/// Close codes that must not trigger a reconnect.
fn suppresses_reconnect(code: u16) -> bool {
    matches!(code, 1000 | 1008)
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Lifecycle stream delivered to the session's consumer.
#[derive(Debug)]
pub enum SessionEvent {
    /// Emitted exactly once per successful open, after the state is already
    /// `Connected`.
    Open,
    /// One raw protocol frame. Heartbeat pongs never appear here.
    Frame(String),
    /// The socket went away. `will_reconnect` reports whether the session is
    /// about to schedule another attempt.
    Closed {
        code: Option<u16>,
        will_reconnect: bool,
    },
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub url: String,
    pub connect_timeout: Duration,
    pub heartbeat: HeartbeatConfig,
    pub backoff: BackoffConfig,
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Cheap cloneable handle to one gateway session.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    config: SessionConfig,
    state: Mutex<ConnectionState>,
    writer: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    shutting_down: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
    backoff: Mutex<Backoff>,
    heartbeat: Heartbeat,
    event_tx: mpsc::UnboundedSender<SessionEvent>,
    run_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl Session {
    /// Build a session and the event stream its consumer reads.
    pub fn new(config: SessionConfig) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, _) = watch::channel(false);
        let inner = Arc::new(SessionInner {
            backoff: Mutex::new(Backoff::new(config.backoff.clone())),
            heartbeat: Heartbeat::new(config.heartbeat.clone()),
            config,
            state: Mutex::new(ConnectionState::Disconnected),
            writer: Mutex::new(None),
            shutting_down: AtomicBool::new(false),
            shutdown_tx,
            event_tx,
            run_task: Mutex::new(None),
        });
        (Session { inner }, event_rx)
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.lock().expect("state lock")
    }

    /// Start the connection campaign. Valid only from `Disconnected` or
    /// `Closed`; anything else is a logged no-op.
    pub fn connect(&self) {
        let state = self.state();
        if !matches!(
            state,
            ConnectionState::Disconnected | ConnectionState::Closed
        ) {
            warn!(?state, "connect() ignored; session already active");
            return;
        }
        self.inner.shutting_down.store(false, Ordering::SeqCst);
        let _ = self.inner.shutdown_tx.send(false);

        let run_inner = self.inner.clone();
        let handle = tokio::spawn(async move {
            SessionInner::run(run_inner).await;
        });
        *self.inner.run_task.lock().expect("run task lock") = Some(handle);
    }

    /// Enqueue one text frame. True iff the socket is open
    /// (`Connected`/`Authenticated`) and the write was accepted. Never blocks
    /// on the network.
    pub fn send(&self, text: &str) -> bool {
        self.inner.send_text(text)
    }

    /// Graceful close: suppress reconnection, send a close frame, and settle
    /// in `Closed`. Idempotent.
    pub fn close(&self, code: u16, reason: &str) {
        if self.inner.shutting_down.swap(true, Ordering::SeqCst) {
            debug!("close() repeated; already shutting down");
            return;
        }
        info!(code, reason, "closing session");
        self.inner.heartbeat.stop();
        self.inner.set_state(ConnectionState::Closing);

        let writer = self.inner.writer.lock().expect("writer lock").clone();
        match writer {
            Some(tx) => {
                let frame = CloseFrame {
                    code: CloseCode::from(code),
                    reason: reason.to_owned().into(),
                };
                let _ = tx.send(Message::Close(Some(frame)));
                let _ = self.inner.shutdown_tx.send(true);
            }
            None => {
                // Nothing on the wire; settle immediately. The run task (if
                // sleeping in backoff) observes the watch and exits.
                let _ = self.inner.shutdown_tx.send(true);
                self.inner.set_state(ConnectionState::Closed);
                self.inner.emit(SessionEvent::Closed {
                    code: None,
                    will_reconnect: false,
                });
            }
        }
    }

    /// Drop the socket on the floor: no close frame, no reconnect.
    pub fn terminate(&self) {
        self.inner.shutting_down.store(true, Ordering::SeqCst);
        let _ = self.inner.shutdown_tx.send(true);
        if let Some(task) = self.inner.run_task.lock().expect("run task lock").take() {
            task.abort();
        }
        self.inner.heartbeat.stop();
        *self.inner.writer.lock().expect("writer lock") = None;
        self.inner.set_state(ConnectionState::Closed);
        self.inner.emit(SessionEvent::Closed {
            code: None,
            will_reconnect: false,
        });
    }

    /// Promote `Connected` to `Authenticated` after a successful login.
    ///
    /// The session itself never authenticates; only the acquisition flow
    /// calls this, and only a `Connected` session can be promoted.
    pub fn mark_authenticated(&self) {
        let mut state = self.inner.state.lock().expect("state lock");
        if *state == ConnectionState::Connected {
            *state = ConnectionState::Authenticated;
        } else {
            warn!(state = ?*state, "mark_authenticated ignored outside Connected");
        }
    }
}

impl SessionInner {
    fn set_state(&self, next: ConnectionState) {
        let mut state = self.state.lock().expect("state lock");
        debug!(from = ?*state, to = ?next, "session state");
        *state = next;
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.event_tx.send(event);
    }

    fn send_text(&self, text: &str) -> bool {
        let state = *self.state.lock().expect("state lock");
        if !matches!(
            state,
            ConnectionState::Connected | ConnectionState::Authenticated
        ) {
            return false;
        }
        match &*self.writer.lock().expect("writer lock") {
            Some(tx) => tx.send(Message::Text(text.to_owned().into())).is_ok(),
            None => false,
        }
    }

    /// The connection campaign: connect, pump, tear down, maybe repeat.
    async fn run(inner: Arc<SessionInner>) {
        loop {
            if inner.shutting_down.load(Ordering::SeqCst) {
                return;
            }
            inner.set_state(ConnectionState::Connecting);
            info!(url = %inner.config.url, "connecting to gateway");

            let attempt = tokio_tungstenite::connect_async(inner.config.url.as_str());
            let ws = match tokio::time::timeout(inner.config.connect_timeout, attempt).await {
                Ok(Ok((ws, _response))) => ws,
                Ok(Err(e)) => {
                    warn!(error = %e, "connect failed");
                    inner.set_state(ConnectionState::Disconnected);
                    if !inner.wait_backoff().await {
                        return;
                    }
                    continue;
                }
                Err(_) => {
                    warn!(
                        timeout_ms = inner.config.connect_timeout.as_millis() as u64,
                        "connect timed out"
                    );
                    inner.set_state(ConnectionState::Disconnected);
                    if !inner.wait_backoff().await {
                        return;
                    }
                    continue;
                }
            };

            let outcome = Self::pump(&inner, ws).await;

            inner.heartbeat.stop();
            *inner.writer.lock().expect("writer lock") = None;

            match outcome {
                PumpOutcome::Shutdown { code } => {
                    inner.set_state(ConnectionState::Closed);
                    inner.emit(SessionEvent::Closed {
                        code,
                        will_reconnect: false,
                    });
                    return;
                }
                PumpOutcome::HeartbeatDead => {
                    warn!("heartbeat timed out; terminating socket");
                    inner.set_state(ConnectionState::Closed);
                    inner.emit(SessionEvent::Closed {
                        code: None,
                        will_reconnect: true,
                    });
                    if !inner.wait_backoff().await {
                        return;
                    }
                }
                PumpOutcome::Lost { code } => {
                    // close() can race a dying socket; shutdown wins.
                    if inner.shutting_down.load(Ordering::SeqCst) {
                        inner.set_state(ConnectionState::Closed);
                        inner.emit(SessionEvent::Closed {
                            code,
                            will_reconnect: false,
                        });
                        return;
                    }
                    if let Some(code) = code {
                        if suppresses_reconnect(code) {
                            info!(code, "close code suppresses reconnection");
                            inner.set_state(ConnectionState::Closed);
                            inner.emit(SessionEvent::Closed {
                                code: Some(code),
                                will_reconnect: false,
                            });
                            return;
                        }
                    }
                    inner.set_state(ConnectionState::Disconnected);
                    inner.emit(SessionEvent::Closed {
                        code,
                        will_reconnect: true,
                    });
                    if !inner.wait_backoff().await {
                        return;
                    }
                }
            }
        }
    }

    /// Drive one open socket until it dies or we are told to stop.
    async fn pump(inner: &Arc<SessionInner>, ws: WsStream) -> PumpOutcome {
        let (mut write, mut read) = ws.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();
        *inner.writer.lock().expect("writer lock") = Some(out_tx.clone());

        inner.set_state(ConnectionState::Connected);
        inner.backoff.lock().expect("backoff lock").reset();

        let (hb_dead_tx, mut hb_dead_rx) = mpsc::unbounded_channel::<()>();
        let hb_target = Arc::downgrade(inner);
        inner.heartbeat.start(
            move |frame| {
                hb_target
                    .upgrade()
                    .map(|i| i.send_text(frame))
                    .unwrap_or(false)
            },
            move || {
                let _ = hb_dead_tx.send(());
            },
        );

        info!("gateway connection open");
        inner.emit(SessionEvent::Open);

        let mut shutdown_rx = inner.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                out = out_rx.recv() => {
                    match out {
                        Some(msg) => {
                            if write.send(msg).await.is_err() {
                                return PumpOutcome::Lost { code: None };
                            }
                        }
                        None => return PumpOutcome::Lost { code: None },
                    }
                }
                _ = hb_dead_rx.recv() => {
                    return PumpOutcome::HeartbeatDead;
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || !*shutdown_rx.borrow() {
                        continue;
                    }
                    // Flush whatever is queued (the close frame included),
                    // then drop the socket.
                    while let Ok(msg) = out_rx.try_recv() {
                        let _ = write.send(msg).await;
                    }
                    let _ = write.flush().await;
                    return PumpOutcome::Shutdown { code: None };
                }
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            if let Some(hb) = HeartbeatFrame::parse(&text) {
                                if matches!(hb, HeartbeatFrame::Pong {}) {
                                    inner.heartbeat.notify_pong();
                                }
                                continue;
                            }
                            if *inner.state.lock().expect("state lock")
                                == ConnectionState::Closing
                            {
                                debug!("discarding frame received during close");
                                continue;
                            }
                            inner.emit(SessionEvent::Frame(text.to_string()));
                        }
                        Some(Ok(Message::Close(frame))) => {
                            let code = frame.map(|f| u16::from(f.code));
                            if inner.shutting_down.load(Ordering::SeqCst) {
                                return PumpOutcome::Shutdown { code };
                            }
                            return PumpOutcome::Lost { code };
                        }
                        Some(Ok(Message::Ping(data))) => {
                            let _ = out_tx.send(Message::Pong(data));
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            warn!(error = %e, "websocket error");
                            return PumpOutcome::Lost { code: None };
                        }
                        None => return PumpOutcome::Lost { code: None },
                    }
                }
            }
        }
    }

    /// Sleep the next backoff delay. False means shutdown began mid-sleep.
    async fn wait_backoff(&self) -> bool {
        if self.shutting_down.load(Ordering::SeqCst) {
            return false;
        }
        let delay = {
            let mut backoff = self.backoff.lock().expect("backoff lock");
            let delay = backoff.next_delay();
            info!(
                delay_ms = delay.as_millis() as u64,
                attempt = backoff.attempt(),
                "scheduling reconnect"
            );
            delay
        };
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        tokio::select! {
            _ = tokio::time::sleep(delay) => !self.shutting_down.load(Ordering::SeqCst),
            _ = shutdown_rx.changed() => false,
        }
    }
}

enum PumpOutcome {
    /// Explicit close(): do not reconnect.
    Shutdown { code: Option<u16> },
    /// Heartbeat deadline expired: terminate and reconnect.
    HeartbeatDead,
    /// Socket closed or errored: reconnect unless the code forbids it.
    Lost { code: Option<u16> },
}
