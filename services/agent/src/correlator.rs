//! Request/response correlation.
//!
//! Every outbound command gets a client-assigned correlation id and a
//! deadline. The gateway observed in the field does NOT echo correlation ids
//! on the return path, so matching falls back to the oldest pending call —
//! correct as long as the device answers in send order. The fallback lives in
//! one place ([`Correlator::resolve_slot`]) so a stricter matcher can replace
//! it without touching call sites.
//!
//! Exactly-once completion: removal from the pending map is the single
//! atomic gate. Whichever of {response, deadline, teardown} removes the entry
//! first completes the call; later arrivals are logged no-ops.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde_json::Value;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, warn};
use uuid::Uuid;

use vl_protocol::{verbs, Frame, GatewayErrorData};

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum CommandError {
    /// `RTN_ERR` from the gateway. `attempt` is surfaced exactly as received;
    /// firmware alternates between a verb name and a counter.
    #[error("gateway rejected {verb}: {error}")]
    Gateway {
        verb: String,
        attempt: Value,
        error: Value,
    },
    #[error("{verb} timed out after {timeout_ms} ms")]
    Timeout { verb: String, timeout_ms: u64 },
    #[error("socket is not open")]
    NotConnected,
    #[error("session is shutting down")]
    ShuttingDown,
    #[error("could not encode {verb}: {reason}")]
    Encode { verb: String, reason: String },
    #[error("malformed {verb} response: {reason}")]
    BadResponse { verb: String, reason: String },
}

// ---------------------------------------------------------------------------
// Pending calls
// ---------------------------------------------------------------------------

struct PendingCall {
    tx: oneshot::Sender<Result<Value, CommandError>>,
    verb: String,
    sent_at: Instant,
    deadline: Option<tokio::task::JoinHandle<()>>,
}

#[derive(Default)]
struct PendingMap {
    calls: HashMap<String, PendingCall>,
    /// Send order of outstanding ids, oldest first; drives the FIFO fallback.
    order: VecDeque<String>,
}

impl PendingMap {
    fn remove(&mut self, id: &str) -> Option<PendingCall> {
        let call = self.calls.remove(id)?;
        self.order.retain(|queued| queued != id);
        Some(call)
    }

    fn remove_oldest(&mut self) -> Option<PendingCall> {
        while let Some(id) = self.order.pop_front() {
            if let Some(call) = self.calls.remove(&id) {
                return Some(call);
            }
        }
        None
    }
}

// ---------------------------------------------------------------------------
// Correlator
// ---------------------------------------------------------------------------

/// Cheap cloneable handle; all clones share one pending map.
#[derive(Clone)]
pub struct Correlator {
    inner: Arc<CorrelatorInner>,
}

struct CorrelatorInner {
    send: Box<dyn Fn(&str) -> bool + Send + Sync>,
    pending: Mutex<PendingMap>,
    default_timeout: Duration,
}

impl Correlator {
    /// `send` enqueues one frame on the session and reports acceptance; a
    /// refusal fails the command immediately — there is no outbound queue.
    pub fn new<S>(default_timeout: Duration, send: S) -> Self
    where
        S: Fn(&str) -> bool + Send + Sync + 'static,
    {
        Correlator {
            inner: Arc::new(CorrelatorInner {
                send: Box::new(send),
                pending: Mutex::new(PendingMap::default()),
                default_timeout,
            }),
        }
    }

    pub fn pending_count(&self) -> usize {
        self.inner.pending.lock().expect("pending lock").calls.len()
    }

    /// Send a command and await its outcome under the default deadline.
    pub async fn send_command(&self, verb: &str, data: Value) -> Result<Value, CommandError> {
        self.send_command_with_timeout(verb, data, self.inner.default_timeout)
            .await
    }

    /// Send a command and await its outcome under an explicit deadline.
    pub async fn send_command_with_timeout(
        &self,
        verb: &str,
        data: Value,
        timeout: Duration,
    ) -> Result<Value, CommandError> {
        let correlation_id = Uuid::new_v4().to_string();
        let json = Frame::command(verb, &correlation_id, data)
            .encode()
            .map_err(|e| CommandError::Encode {
                verb: verb.to_owned(),
                reason: e.to_string(),
            })?;

        // Register before sending so a fast response cannot race past an
        // unregistered call.
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.inner.pending.lock().expect("pending lock");
            pending.calls.insert(
                correlation_id.clone(),
                PendingCall {
                    tx,
                    verb: verb.to_owned(),
                    sent_at: Instant::now(),
                    deadline: None,
                },
            );
            pending.order.push_back(correlation_id.clone());
        }

        if !(self.inner.send)(&json) {
            let mut pending = self.inner.pending.lock().expect("pending lock");
            let _ = pending.remove(&correlation_id);
            return Err(CommandError::NotConnected);
        }
        debug!(verb, correlation_id = %correlation_id, "command sent");

        self.arm_deadline(&correlation_id, timeout);

        match rx.await {
            Ok(outcome) => outcome,
            // Completion sink dropped without a verdict: teardown.
            Err(_) => Err(CommandError::ShuttingDown),
        }
    }

    fn arm_deadline(&self, correlation_id: &str, timeout: Duration) {
        let weak = Arc::downgrade(&self.inner);
        let id = correlation_id.to_owned();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let Some(inner) = weak.upgrade() else { return };
            let removed = inner.pending.lock().expect("pending lock").remove(&id);
            if let Some(call) = removed {
                warn!(
                    verb = %call.verb,
                    timeout_ms = timeout.as_millis() as u64,
                    "command deadline expired"
                );
                let _ = call.tx.send(Err(CommandError::Timeout {
                    verb: call.verb.clone(),
                    timeout_ms: timeout.as_millis() as u64,
                }));
            }
        });

        // The response may already have won; if so, the deadline is moot.
        let mut pending = self.inner.pending.lock().expect("pending lock");
        match pending.calls.get_mut(correlation_id) {
            Some(call) => call.deadline = Some(handle),
            None => handle.abort(),
        }
    }

    /// Route one inbound `RTN_*` frame to its pending call.
    pub fn handle_response(&self, frame: Frame) {
        let Some(call) = self.resolve_slot(&frame) else {
            warn!(
                frame_type = %frame.frame_type,
                correlation_id = ?frame.correlation_id,
                "response matched no pending call"
            );
            return;
        };

        if let Some(deadline) = &call.deadline {
            deadline.abort();
        }
        debug!(
            verb = %call.verb,
            frame_type = %frame.frame_type,
            elapsed_ms = call.sent_at.elapsed().as_millis() as u64,
            "response matched"
        );

        let outcome = if frame.frame_type == verbs::RTN_ERR {
            let data: GatewayErrorData =
                serde_json::from_value(frame.data).unwrap_or_default();
            Err(CommandError::Gateway {
                verb: call.verb.clone(),
                attempt: data.attempt,
                error: data.error,
            })
        } else {
            Ok(frame.data)
        };
        let _ = call.tx.send(outcome);
    }

    /// Pick the pending call this response completes.
    ///
    /// Correlation id first; otherwise oldest pending (the device usually
    /// drops the id on the return path). Matching policy lives here and only
    /// here.
    fn resolve_slot(&self, frame: &Frame) -> Option<PendingCall> {
        let mut pending = self.inner.pending.lock().expect("pending lock");
        if let Some(id) = &frame.correlation_id {
            if let Some(call) = pending.remove(id) {
                return Some(call);
            }
        }
        let call = pending.remove_oldest();
        if call.is_some() {
            debug!(
                frame_type = %frame.frame_type,
                "no matching correlation id; completed oldest pending call"
            );
        }
        call
    }

    /// Fail every outstanding call with a shutdown error.
    pub fn shutdown(&self) {
        let drained: Vec<PendingCall> = {
            let mut pending = self.inner.pending.lock().expect("pending lock");
            pending.order.clear();
            pending.calls.drain().map(|(_, call)| call).collect()
        };
        for call in drained {
            if let Some(deadline) = &call.deadline {
                deadline.abort();
            }
            debug!(verb = %call.verb, "completing pending call with shutdown error");
            let _ = call.tx.send(Err(CommandError::ShuttingDown));
        }
    }
}
