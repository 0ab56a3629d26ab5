// mock_gateway: a mock gateway WebSocket server for testing agent sessions.
//
// Speaks enough of the device protocol for a full acquisition cycle:
// login, change subscription, sensor discovery, and triggered readings with
// their notification train. By default it mimics the quirk observed on real
// hardware: correlation ids are NOT echoed on the return path.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::Message;

use vl_protocol::{verbs, Frame, HeartbeatFrame};

/// One reading the gateway will emit after `TAKE_DYN_READING`.
///
/// Axis strings are delivered verbatim so tests can exercise any of the
/// three wire encodings.
#[derive(Debug, Clone)]
pub struct ScriptedReading {
    pub id: i64,
    pub time: String,
    pub x: String,
    pub y: String,
    pub z: String,
}

impl ScriptedReading {
    /// A small CSV-encoded reading matching `Samples=4`.
    pub fn csv_default() -> Self {
        ScriptedReading {
            id: 1,
            time: "2026-03-02T10:15:00Z".to_owned(),
            x: "0.1,0.2,0.3,0.4".to_owned(),
            y: "0.5,0.6,0.7,0.8".to_owned(),
            z: "0.9,1.0,1.1,1.2".to_owned(),
        }
    }
}

/// Behavior knobs for a [`MockGateway`] instance.
#[derive(Debug, Clone)]
pub struct MockGatewayOptions {
    /// Echo client correlation ids on responses. Real hardware drops them,
    /// so the default is `false` to exercise the FIFO fallback.
    pub echo_correlation_id: bool,
    /// Dictionary returned for `GET_DYN_CONNECTED` (serial -> metadata).
    pub sensors: Value,
    /// `false` answers `POST_LOGIN` with `RTN_ERR`.
    pub login_ok: bool,
    /// `Success` flag on `NOT_DYN_READING_STARTED`.
    pub started_success: bool,
    /// Reading emitted after a successful start; `None` suppresses both the
    /// started and reading notifications entirely.
    pub reading: Option<ScriptedReading>,
    /// Emit `NOT_DYN_TEMP` after the reading.
    pub temperature: Option<f64>,
    /// Answer application-level pings with pongs. `false` starves the
    /// client's heartbeat to provoke its timeout path.
    pub respond_to_pings: bool,
    /// Delay applied before each command response.
    pub response_delay: Duration,
}

impl Default for MockGatewayOptions {
    fn default() -> Self {
        MockGatewayOptions {
            echo_correlation_id: false,
            sensors: json!({
                "482113": {
                    "Serial": 482113, "PartNum": "VS-80G", "ReadRate": 3200,
                    "Samples": 4, "Connected": 1
                }
            }),
            login_ok: true,
            started_success: true,
            reading: Some(ScriptedReading::csv_default()),
            temperature: Some(41.5),
            respond_to_pings: true,
            response_delay: Duration::ZERO,
        }
    }
}

struct GatewayState {
    options: MockGatewayOptions,
    received: Mutex<Vec<Frame>>,
    connections: AtomicUsize,
    close_tx: broadcast::Sender<u16>,
}

/// A mock gateway for integration testing.
///
/// # Protocol behavior
///
/// - `POST_LOGIN` -> `RTN_LOGIN` (or `RTN_ERR` when `login_ok` is false).
/// - `POST_SUB_CHANGES` / `POST_UNSUB_CHANGES` -> matching `RTN_*`.
/// - `GET_DYN_CONNECTED` -> `RTN_DYN` with the configured dictionary.
/// - `TAKE_DYN_READING` -> `RTN_DYN` ack, then the notification train:
///   `NOT_DYN_READING_STARTED`, `NOT_DYN_READING`, `NOT_DYN_TEMP`.
/// - `{"type":"ping"}` -> `{"type":"pong"}` unless ping responses are off.
pub struct MockGateway {
    addr: SocketAddr,
    state: Arc<GatewayState>,
    /// Handle to the background accept loop; dropped with the server.
    _task: tokio::task::JoinHandle<()>,
}

impl MockGateway {
    /// Start a gateway with default behavior.
    pub async fn start() -> Result<Self, Box<dyn std::error::Error>> {
        Self::start_with(MockGatewayOptions::default()).await
    }

    /// Start a gateway with custom behavior, binding a random port.
    pub async fn start_with(
        options: MockGatewayOptions,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let (close_tx, _) = broadcast::channel(4);

        let state = Arc::new(GatewayState {
            options,
            received: Mutex::new(Vec::new()),
            connections: AtomicUsize::new(0),
            close_tx,
        });

        let accept_state = state.clone();
        let task = tokio::spawn(async move {
            Self::accept_loop(listener, accept_state).await;
        });

        Ok(Self {
            addr,
            state,
            _task: task,
        })
    }

    /// `ws://` URL for agent configuration.
    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Total connections accepted since start (reconnects included).
    pub fn connection_count(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    /// All protocol frames received so far, in arrival order.
    pub fn received(&self) -> Vec<Frame> {
        self.state.received.lock().expect("received lock").clone()
    }

    /// Verb names of received frames, in arrival order.
    pub fn received_verbs(&self) -> Vec<String> {
        self.received().into_iter().map(|f| f.frame_type).collect()
    }

    /// Ask every live connection to close with the given WebSocket code.
    pub fn close_all(&self, code: u16) {
        let _ = self.state.close_tx.send(code);
    }

    // -- internal --

    async fn accept_loop(listener: TcpListener, state: Arc<GatewayState>) {
        loop {
            match listener.accept().await {
                Ok((stream, _peer)) => {
                    let conn_state = state.clone();
                    conn_state.connections.fetch_add(1, Ordering::SeqCst);
                    tokio::spawn(async move {
                        // Client drops mid-test are expected; swallow errors.
                        let _ = Self::handle_connection(stream, conn_state).await;
                    });
                }
                Err(_) => break,
            }
        }
    }

    async fn handle_connection(
        stream: tokio::net::TcpStream,
        state: Arc<GatewayState>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        let (mut write, mut read) = ws_stream.split();
        let mut close_rx = state.close_tx.subscribe();
        // Responses owed but not yet sent, oldest first.
        let mut outbox: VecDeque<String> = VecDeque::new();

        loop {
            // Flush before reading so response order matches command order.
            while let Some(json) = outbox.pop_front() {
                if !state.options.response_delay.is_zero() {
                    tokio::time::sleep(state.options.response_delay).await;
                }
                write.send(Message::Text(json.into())).await?;
            }

            tokio::select! {
                code = close_rx.recv() => {
                    if let Ok(code) = code {
                        let frame = CloseFrame {
                            code: CloseCode::from(code),
                            reason: "scripted close".into(),
                        };
                        write.send(Message::Close(Some(frame))).await?;
                        break;
                    }
                }
                msg = read.next() => {
                    let msg = match msg {
                        None => break,
                        Some(m) => m?,
                    };
                    let text = match msg {
                        Message::Text(t) => t,
                        Message::Close(_) => break,
                        Message::Ping(data) => {
                            write.send(Message::Pong(data)).await?;
                            continue;
                        }
                        _ => continue,
                    };

                    if let Some(hb) = HeartbeatFrame::parse(&text) {
                        if matches!(hb, HeartbeatFrame::Ping { .. })
                            && state.options.respond_to_pings
                        {
                            let pong = serde_json::to_string(&HeartbeatFrame::Pong {})?;
                            write.send(Message::Text(pong.into())).await?;
                        }
                        continue;
                    }

                    let frame = match vl_protocol::decode_frame(&text) {
                        Ok(f) => f,
                        // Undecodable input is recorded nowhere; real firmware
                        // ignores it too.
                        Err(_) => continue,
                    };
                    state
                        .received
                        .lock()
                        .expect("received lock")
                        .push(frame.clone());
                    Self::respond(&state, &frame, &mut outbox)?;
                }
            }
        }

        Ok(())
    }

    /// Queue the scripted response(s) for one command frame.
    fn respond(
        state: &GatewayState,
        frame: &Frame,
        outbox: &mut VecDeque<String>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let opts = &state.options;
        let correlation = if opts.echo_correlation_id {
            frame.correlation_id.clone()
        } else {
            None
        };

        let mut push = |verb: &str, data: Value| -> Result<(), serde_json::Error> {
            let reply = Frame {
                frame_type: verb.to_owned(),
                from: "SERV".to_owned(),
                to: None,
                target: Some("UI".to_owned()),
                correlation_id: correlation.clone(),
                data,
            };
            outbox.push_back(serde_json::to_string(&reply)?);
            Ok(())
        };

        match frame.frame_type.as_str() {
            verbs::POST_LOGIN => {
                if opts.login_ok {
                    push(verbs::RTN_LOGIN, json!({"Success": true}))?;
                } else {
                    push(
                        verbs::RTN_ERR,
                        json!({"Attempt": "POST_LOGIN", "Error": "invalid credentials"}),
                    )?;
                }
            }
            verbs::POST_SUB_CHANGES => push(verbs::RTN_SUB_CHANGES, json!({}))?,
            verbs::POST_UNSUB_CHANGES => push(verbs::RTN_UNSUB_CHANGES, json!({}))?,
            verbs::GET_DYN_CONNECTED => push(verbs::RTN_DYN, opts.sensors.clone())?,
            verbs::TAKE_DYN_READING => {
                let serial = frame.data.get("Serial").cloned().unwrap_or(Value::Null);
                push(verbs::RTN_DYN, json!({}))?;
                if let Some(reading) = &opts.reading {
                    push(
                        verbs::NOT_DYN_READING_STARTED,
                        json!({"Serial": serial, "Success": opts.started_success}),
                    )?;
                    if opts.started_success {
                        push(
                            verbs::NOT_DYN_READING,
                            json!({
                                "ID": reading.id,
                                "Serial": serial.to_string(),
                                "Time": reading.time,
                                "X": reading.x,
                                "Y": reading.y,
                                "Z": reading.z,
                            }),
                        )?;
                        if let Some(temp) = opts.temperature {
                            push(
                                verbs::NOT_DYN_TEMP,
                                json!({"Serial": serial, "Temperature": temp}),
                            )?;
                        }
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }
}
