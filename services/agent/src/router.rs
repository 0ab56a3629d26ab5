//! Inbound frame dispatch.
//!
//! One entry point, one rule: `RTN_*` to the correlator, `NOT_*` to the
//! notification bus, anything else is logged and dropped. The router never
//! fails — a malformed frame must not take the session down.

use std::sync::Arc;

use tracing::{debug, warn};

use vl_protocol::{decode_frame, validate_inbound};

use crate::correlator::Correlator;
use crate::notify::NotificationBus;

pub struct Router {
    correlator: Correlator,
    notifications: Arc<NotificationBus>,
}

impl Router {
    pub fn new(correlator: Correlator, notifications: Arc<NotificationBus>) -> Self {
        Router {
            correlator,
            notifications,
        }
    }

    /// Process one raw frame to completion.
    pub fn handle(&self, raw: &str) {
        debug!(frame = %truncate(raw, 200), "inbound frame");

        let frame = match decode_frame(raw) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "dropping undecodable frame");
                return;
            }
        };
        if let Err(e) = validate_inbound(&frame) {
            warn!(error = %e, frame_type = %frame.frame_type, "dropping invalid frame");
            return;
        }

        if frame.is_response() {
            self.correlator.handle_response(frame);
        } else if frame.is_notification() {
            self.notifications.dispatch(frame);
        } else {
            warn!(frame_type = %frame.frame_type, "frame type has no route");
        }
    }
}

/// First `max` bytes of `raw`, trimmed back to a char boundary.
fn truncate(raw: &str, max: usize) -> &str {
    if raw.len() <= max {
        return raw;
    }
    let mut end = max;
    while !raw.is_char_boundary(end) {
        end -= 1;
    }
    &raw[..end]
}
