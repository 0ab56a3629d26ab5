// vl-protocol: gateway wire protocol types, framing, and validation.
//
// Every message across the WebSocket is one JSON object ("frame") routed
// by the prefix of its `Type` field:
//
//   POST_* / GET_* / TAKE_*  outbound commands (client -> gateway)
//   RTN_*                    synchronous responses (gateway -> client)
//   NOT_*                    asynchronous notifications (gateway -> client)
//
// The lowercase-`type` heartbeat frames are a separate sub-protocol and
// never enter the RTN_/NOT_ routing path.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Verbs and addressing
// ---------------------------------------------------------------------------

/// Frozen protocol verbs.
///
/// The gateway firmware treats these as opaque strings; new firmware may add
/// verbs at any time, so routing is by prefix and unknown verbs are tolerated.
pub mod verbs {
    pub const POST_LOGIN: &str = "POST_LOGIN";
    pub const POST_SUB_CHANGES: &str = "POST_SUB_CHANGES";
    pub const POST_UNSUB_CHANGES: &str = "POST_UNSUB_CHANGES";
    pub const GET_DYN_CONNECTED: &str = "GET_DYN_CONNECTED";
    pub const TAKE_DYN_READING: &str = "TAKE_DYN_READING";

    pub const RTN_LOGIN: &str = "RTN_LOGIN";
    pub const RTN_SUB_CHANGES: &str = "RTN_SUB_CHANGES";
    pub const RTN_UNSUB_CHANGES: &str = "RTN_UNSUB_CHANGES";
    pub const RTN_DYN: &str = "RTN_DYN";
    pub const RTN_ERR: &str = "RTN_ERR";

    pub const NOT_DYN_READING_STARTED: &str = "NOT_DYN_READING_STARTED";
    pub const NOT_DYN_READING: &str = "NOT_DYN_READING";
    pub const NOT_DYN_TEMP: &str = "NOT_DYN_TEMP";
}

/// `From` value on outbound command frames.
pub const FROM_UI: &str = "UI";
/// `To` value on outbound command frames.
pub const TO_SERV: &str = "SERV";

pub const RESPONSE_PREFIX: &str = "RTN_";
pub const NOTIFICATION_PREFIX: &str = "NOT_";

// ---------------------------------------------------------------------------
// Frame
// ---------------------------------------------------------------------------

/// One JSON message across the WebSocket.
///
/// Outbound frames carry `From="UI"` / `To="SERV"` and a client-assigned
/// `CorrelationId`. Inbound frames carry `From="SERV"` / `Target="UI"`; the
/// gateway may or may not echo the correlation id, so correlation-id absence
/// is NOT a decode error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    #[serde(rename = "Type")]
    pub frame_type: String,
    #[serde(rename = "From", default)]
    pub from: String,
    #[serde(rename = "To", default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(rename = "Target", default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(
        rename = "CorrelationId",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub correlation_id: Option<String>,
    #[serde(rename = "Data", default)]
    pub data: Value,
}

impl Frame {
    /// Build an outbound command frame with the injected correlation id.
    pub fn command(verb: &str, correlation_id: &str, data: Value) -> Self {
        Frame {
            frame_type: verb.to_owned(),
            from: FROM_UI.to_owned(),
            to: Some(TO_SERV.to_owned()),
            target: None,
            correlation_id: Some(correlation_id.to_owned()),
            data,
        }
    }

    /// Serialize for the wire.
    pub fn encode(&self) -> Result<String, FrameError> {
        serde_json::to_string(self).map_err(|e| FrameError::Encode(e.to_string()))
    }

    pub fn is_response(&self) -> bool {
        self.frame_type.starts_with(RESPONSE_PREFIX)
    }

    pub fn is_notification(&self) -> bool {
        self.frame_type.starts_with(NOTIFICATION_PREFIX)
    }
}

/// Decode an inbound frame.
///
/// Policy is permissive on unknown fields and unknown verbs; the only hard
/// requirements are valid JSON and a string `Type`. Shape validation of the
/// `Data` payload is a separate step ([`validate_inbound`]) so the caller can
/// log the two failure classes distinctly.
pub fn decode_frame(text: &str) -> Result<Frame, FrameError> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| FrameError::NotJson(e.to_string()))?;
    match value.get("Type") {
        Some(Value::String(_)) => {}
        Some(_) => return Err(FrameError::TypeNotString),
        None => return Err(FrameError::MissingType),
    }
    serde_json::from_value(value).map_err(|e| FrameError::BadFrame(e.to_string()))
}

/// Structurally validate an inbound `RTN_*` / `NOT_*` frame's payload.
///
/// Known types must carry a `Data` matching the registered shape. Unknown
/// response/notification types pass through untouched — firmware adds verbs
/// faster than clients ship.
pub fn validate_inbound(frame: &Frame) -> Result<(), FrameError> {
    let bad = |reason: String| FrameError::BadShape {
        frame_type: frame.frame_type.clone(),
        reason,
    };
    match frame.frame_type.as_str() {
        verbs::RTN_ERR => {
            if !frame.data.is_object() {
                return Err(bad("Data must be an object".to_owned()));
            }
            Ok(())
        }
        verbs::NOT_DYN_READING_STARTED => {
            serde_json::from_value::<ReadingStarted>(frame.data.clone())
                .map(|_| ())
                .map_err(|e| bad(e.to_string()))
        }
        verbs::NOT_DYN_READING => serde_json::from_value::<ReadingNotification>(frame.data.clone())
            .map(|_| ())
            .map_err(|e| bad(e.to_string())),
        verbs::NOT_DYN_TEMP => serde_json::from_value::<TempNotification>(frame.data.clone())
            .map(|_| ())
            .map_err(|e| bad(e.to_string())),
        _ => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// Command payloads (client -> gateway)
// ---------------------------------------------------------------------------

/// `POST_LOGIN` payload. Never log this type with the password intact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginRequest {
    #[serde(rename = "Email")]
    pub email: String,
    #[serde(rename = "Password")]
    pub password: String,
}

/// `TAKE_DYN_READING` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TakeReadingRequest {
    #[serde(rename = "Serial")]
    pub serial: i64,
}

// ---------------------------------------------------------------------------
// Response payloads (gateway -> client)
// ---------------------------------------------------------------------------

/// `RTN_ERR` payload.
///
/// `Attempt` is surfaced exactly as received: observed firmware alternates
/// between a verb name and a retry counter, so no semantics are inferred.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GatewayErrorData {
    #[serde(rename = "Attempt", default)]
    pub attempt: Value,
    #[serde(rename = "Error", default)]
    pub error: Value,
}

/// Metadata for one attached sensor, as returned in the `GET_DYN_CONNECTED`
/// dictionary.
///
/// Unknown fields are preserved in `extra` so firmware additions do not break
/// discovery. Invariant: `Connected == 1` means live; any other value means
/// the sensor is known but unreachable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorMeta {
    #[serde(rename = "Serial")]
    pub serial: i64,
    #[serde(rename = "PartNum")]
    pub part_num: String,
    #[serde(rename = "ReadRate")]
    pub read_rate: i64,
    #[serde(rename = "Samples")]
    pub samples: usize,
    #[serde(rename = "Connected")]
    pub connected: i64,
    #[serde(rename = "Name", default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "AccessPoint", default, skip_serializing_if = "Option::is_none")]
    pub access_point: Option<String>,
    #[serde(rename = "GMode", default, skip_serializing_if = "Option::is_none")]
    pub g_mode: Option<i64>,
    #[serde(rename = "FreqMode", default, skip_serializing_if = "Option::is_none")]
    pub freq_mode: Option<i64>,
    #[serde(rename = "ReadPeriod", default, skip_serializing_if = "Option::is_none")]
    pub read_period: Option<i64>,
    #[serde(rename = "HwVer", default, skip_serializing_if = "Option::is_none")]
    pub hw_ver: Option<String>,
    #[serde(rename = "FmVer", default, skip_serializing_if = "Option::is_none")]
    pub fm_ver: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl SensorMeta {
    pub fn is_live(&self) -> bool {
        self.connected == 1
    }
}

// ---------------------------------------------------------------------------
// Notification payloads (gateway -> client)
// ---------------------------------------------------------------------------

/// `NOT_DYN_READING_STARTED` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadingStarted {
    #[serde(rename = "Serial", default, skip_serializing_if = "Option::is_none")]
    pub serial: Option<i64>,
    #[serde(rename = "Success")]
    pub success: bool,
}

/// `NOT_DYN_READING` payload.
///
/// The three axes arrive as encoded strings; the wire encoding has been
/// observed as CSV, a JSON number array, and base64 int16-LE milligravity.
/// Decoding is the waveform parser's job, not the codec's.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadingNotification {
    #[serde(rename = "ID")]
    pub id: i64,
    #[serde(rename = "Serial")]
    pub serial: String,
    #[serde(rename = "Time")]
    pub time: String,
    #[serde(rename = "X")]
    pub x: String,
    #[serde(rename = "Y")]
    pub y: String,
    #[serde(rename = "Z")]
    pub z: String,
}

/// `NOT_DYN_TEMP` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TempNotification {
    #[serde(rename = "Serial", default, skip_serializing_if = "Option::is_none")]
    pub serial: Option<i64>,
    #[serde(rename = "Temperature")]
    pub temperature: f64,
}

// ---------------------------------------------------------------------------
// Heartbeat sub-protocol
// ---------------------------------------------------------------------------

/// Application-level liveness frames.
///
/// Distinguished from protocol verbs by the lowercase `type` key; these
/// bypass the correlator and router entirely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum HeartbeatFrame {
    Ping { timestamp: i64 },
    Pong {},
}

impl HeartbeatFrame {
    /// Cheap probe for heartbeat frames ahead of full frame decoding.
    ///
    /// Returns `None` for anything that is not a well-formed ping/pong, so
    /// ordinary protocol frames fall through to the router untouched.
    pub fn parse(text: &str) -> Option<Self> {
        let value: Value = serde_json::from_str(text).ok()?;
        value.get("type")?;
        serde_json::from_value(value).ok()
    }

    pub fn ping(timestamp: i64) -> Self {
        HeartbeatFrame::Ping { timestamp }
    }
}

// ---------------------------------------------------------------------------
// Decode errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("not JSON: {0}")]
    NotJson(String),
    #[error("frame has no Type field")]
    MissingType,
    #[error("frame Type is not a string")]
    TypeNotString,
    #[error("malformed frame: {0}")]
    BadFrame(String),
    #[error("bad {frame_type} payload: {reason}")]
    BadShape { frame_type: String, reason: String },
    #[error("encode: {0}")]
    Encode(String),
}
