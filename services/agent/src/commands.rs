//! Typed facade over the five protocol verbs.
//!
//! Each method builds the verb's payload, sends through the correlator, and
//! returns the raw response `Data` — the shape of `RTN_DYN` varies with the
//! originating verb, so interpretation stays with the caller that knows it.

use std::time::Duration;

use serde_json::{json, Value};
use tracing::debug;

use vl_protocol::{verbs, LoginRequest, TakeReadingRequest};

use crate::correlator::{CommandError, Correlator};

/// Login answers fast or not at all; don't tie up the worker for the full
/// command deadline.
const LOGIN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct GatewayCommands {
    correlator: Correlator,
}

impl GatewayCommands {
    pub fn new(correlator: Correlator) -> Self {
        GatewayCommands { correlator }
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<Value, CommandError> {
        // The password must never reach the log stream.
        debug!(email, password = "<redacted>", "sending POST_LOGIN");
        let data = encode_payload(
            verbs::POST_LOGIN,
            &LoginRequest {
                email: email.to_owned(),
                password: password.to_owned(),
            },
        )?;
        self.correlator
            .send_command_with_timeout(verbs::POST_LOGIN, data, LOGIN_TIMEOUT)
            .await
    }

    pub async fn subscribe(&self) -> Result<Value, CommandError> {
        self.correlator
            .send_command(verbs::POST_SUB_CHANGES, json!({}))
            .await
    }

    pub async fn unsubscribe(&self) -> Result<Value, CommandError> {
        self.correlator
            .send_command(verbs::POST_UNSUB_CHANGES, json!({}))
            .await
    }

    /// Fetch the sensor dictionary. The response is the raw string-keyed map;
    /// discovery owns parsing and filtering.
    pub async fn list_connected(&self) -> Result<Value, CommandError> {
        self.correlator
            .send_command(verbs::GET_DYN_CONNECTED, json!({}))
            .await
    }

    pub async fn take_reading(&self, serial: i64) -> Result<Value, CommandError> {
        let data = encode_payload(verbs::TAKE_DYN_READING, &TakeReadingRequest { serial })?;
        self.correlator
            .send_command(verbs::TAKE_DYN_READING, data)
            .await
    }
}

fn encode_payload<T: serde::Serialize>(verb: &str, payload: &T) -> Result<Value, CommandError> {
    serde_json::to_value(payload).map_err(|e| CommandError::Encode {
        verb: verb.to_owned(),
        reason: e.to_string(),
    })
}
