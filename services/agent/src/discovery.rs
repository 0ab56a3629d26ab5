//! Sensor discovery: parse the connected-sensor dictionary, keep the live
//! ones, pick the target.
//!
//! Entries that fail to parse are logged and skipped — one corrupt record
//! must not blank out an otherwise healthy gateway. "First" means the
//! gateway's own dictionary order, which the JSON layer preserves.

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use vl_protocol::SensorMeta;

use crate::commands::GatewayCommands;
use crate::correlator::CommandError;

#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// Graceful, not an error exit: the gateway simply has nothing attached.
    #[error("no sensors available")]
    NoSensors,
    #[error(transparent)]
    Command(#[from] CommandError),
}

/// Parse the `GET_DYN_CONNECTED` dictionary, retaining live sensors in the
/// gateway's iteration order.
pub fn parse_connected(data: &Value) -> Vec<SensorMeta> {
    let Some(dict) = data.as_object() else {
        warn!("sensor dictionary is not an object; treating as empty");
        return Vec::new();
    };

    let mut live = Vec::new();
    for (key, entry) in dict {
        match serde_json::from_value::<SensorMeta>(entry.clone()) {
            Ok(meta) if meta.is_live() => live.push(meta),
            Ok(meta) => {
                debug!(serial = meta.serial, connected = meta.connected, "sensor not live");
            }
            Err(e) => {
                warn!(key = %key, error = %e, "skipping invalid sensor entry");
            }
        }
    }
    live
}

/// Pick the sensor to read: the preferred serial if it is live, otherwise the
/// first live sensor.
pub fn select_sensor(live: &[SensorMeta], preferred: Option<i64>) -> Option<&SensorMeta> {
    if let Some(serial) = preferred {
        if let Some(meta) = live.iter().find(|m| m.serial == serial) {
            return Some(meta);
        }
        if !live.is_empty() {
            warn!(
                preferred = serial,
                "preferred sensor not in live set; using first live sensor"
            );
        }
    }
    live.first()
}

/// Run the full discovery step against the gateway.
pub async fn discover(
    commands: &GatewayCommands,
    preferred: Option<i64>,
) -> Result<SensorMeta, DiscoveryError> {
    let data = commands.list_connected().await?;
    let live = parse_connected(&data);
    debug!(live = live.len(), "discovery complete");
    match select_sensor(&live, preferred) {
        Some(meta) => Ok(meta.clone()),
        None => Err(DiscoveryError::NoSensors),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn dict() -> Value {
        json!({
            "900": {"Serial": 900, "PartNum": "VS-80G", "ReadRate": 3200, "Samples": 1024, "Connected": 0},
            "100": {"Serial": 100, "PartNum": "VS-80G", "ReadRate": 3200, "Samples": 1024, "Connected": 1},
            "200": {"Serial": 200, "PartNum": "VS-40G", "ReadRate": 1600, "Samples": 512, "Connected": 1}
        })
    }

    #[test]
    fn only_live_sensors_survive_the_filter() {
        let live = parse_connected(&dict());
        let serials: Vec<i64> = live.iter().map(|m| m.serial).collect();
        assert_eq!(serials, [100, 200]);
    }

    #[test]
    fn invalid_entries_are_skipped_not_fatal() {
        let data = json!({
            "broken": {"Serial": "not a number"},
            "100": {"Serial": 100, "PartNum": "VS-80G", "ReadRate": 3200, "Samples": 1024, "Connected": 1}
        });
        let live = parse_connected(&data);
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].serial, 100);
    }

    #[test]
    fn non_object_dictionary_yields_empty() {
        assert!(parse_connected(&json!("nope")).is_empty());
        assert!(parse_connected(&json!(null)).is_empty());
    }

    #[test]
    fn preferred_serial_wins_when_live() {
        let live = parse_connected(&dict());
        assert_eq!(select_sensor(&live, Some(200)).map(|m| m.serial), Some(200));
    }

    #[test]
    fn missing_preferred_falls_back_to_first_by_gateway_order() {
        let live = parse_connected(&dict());
        assert_eq!(select_sensor(&live, Some(999)).map(|m| m.serial), Some(100));
        assert_eq!(select_sensor(&live, None).map(|m| m.serial), Some(100));
    }

    #[test]
    fn empty_live_set_selects_nothing() {
        assert!(select_sensor(&[], Some(100)).is_none());
        assert!(select_sensor(&[], None).is_none());
    }
}
