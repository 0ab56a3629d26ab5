//! Notification fan-out.
//!
//! `NOT_*` frames are pushed by the gateway without correlation. The bus
//! holds at most one persistent handler per notification type plus any
//! number of one-shot awaiters. The acquisition flow registers its one-shots
//! BEFORE sending the trigger command, so a notification can never overtake
//! its awaiter.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use vl_protocol::Frame;

#[derive(Default)]
struct BusInner {
    handlers: HashMap<String, mpsc::UnboundedSender<Frame>>,
    oneshots: HashMap<String, Vec<oneshot::Sender<Frame>>>,
}

#[derive(Default)]
pub struct NotificationBus {
    inner: Mutex<BusInner>,
}

impl NotificationBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the persistent handler for a notification type, replacing any
    /// previous one. Handler mutation happens only between acquisitions.
    pub fn register(&self, frame_type: &str) -> mpsc::UnboundedReceiver<Frame> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .lock()
            .expect("bus lock")
            .handlers
            .insert(frame_type.to_owned(), tx);
        rx
    }

    pub fn unregister(&self, frame_type: &str) {
        self.inner
            .lock()
            .expect("bus lock")
            .handlers
            .remove(frame_type);
    }

    /// Await the next notification of a type, once.
    pub fn wait_for(&self, frame_type: &str) -> oneshot::Receiver<Frame> {
        let (tx, rx) = oneshot::channel();
        self.inner
            .lock()
            .expect("bus lock")
            .oneshots
            .entry(frame_type.to_owned())
            .or_default()
            .push(tx);
        rx
    }

    /// Deliver one `NOT_*` frame to the persistent handler and every waiting
    /// one-shot. No recipient is not an error.
    pub fn dispatch(&self, frame: Frame) {
        let mut inner = self.inner.lock().expect("bus lock");
        let mut delivered = false;

        if let Some(handler) = inner.handlers.get(&frame.frame_type) {
            if handler.send(frame.clone()).is_ok() {
                delivered = true;
            } else {
                // Receiver dropped; drop the dead handler too.
                inner.handlers.remove(&frame.frame_type);
            }
        }

        if let Some(waiters) = inner.oneshots.remove(&frame.frame_type) {
            for waiter in waiters {
                if waiter.send(frame.clone()).is_ok() {
                    delivered = true;
                }
            }
        }

        if !delivered {
            debug!(frame_type = %frame.frame_type, "notification had no recipient");
        }
    }
}
