//! Acquisition orchestration: subscribe, trigger, gather, unsubscribe.
//!
//! The ordering discipline here exists for one reason: the gateway pushes
//! `NOT_DYN_READING_STARTED` / `NOT_DYN_READING` / `NOT_DYN_TEMP` as soon as
//! the reading begins, and those notifications can overtake the trigger
//! command's own response. One-shot awaiters are therefore registered on the
//! bus BEFORE `TAKE_DYN_READING` goes out.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use vl_protocol::{verbs, Frame, ReadingNotification, ReadingStarted, SensorMeta, TempNotification};

use crate::commands::GatewayCommands;
use crate::correlator::CommandError;
use crate::display::SensorReading;
use crate::notify::NotificationBus;
use crate::waveform::{parse_waveforms, WaveformError};

/// The device reports start-of-reading almost immediately; a slow start means
/// the trigger was lost.
const START_TIMEOUT: Duration = Duration::from_secs(30);
/// Temperature is optional hardware; wait briefly and move on.
const TEMP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum AcquisitionError {
    #[error(transparent)]
    Command(#[from] CommandError),
    #[error("sensor {serial} refused to start a reading")]
    StartRefused { serial: i64 },
    #[error("timed out waiting for {notification} after {timeout_ms} ms")]
    NotificationTimeout {
        notification: &'static str,
        timeout_ms: u64,
    },
    #[error("malformed {notification} payload: {reason}")]
    BadNotification {
        notification: &'static str,
        reason: String,
    },
    #[error(transparent)]
    Waveform(#[from] WaveformError),
    #[error("session went away while waiting for {notification}")]
    SessionGone { notification: &'static str },
}

/// Drives one reading cycle against an authenticated session.
pub struct Acquisition {
    commands: GatewayCommands,
    bus: Arc<NotificationBus>,
    acquisition_timeout: Duration,
    subscribed: AtomicBool,
}

impl Acquisition {
    pub fn new(
        commands: GatewayCommands,
        bus: Arc<NotificationBus>,
        acquisition_timeout: Duration,
    ) -> Self {
        Acquisition {
            commands,
            bus,
            acquisition_timeout,
            subscribed: AtomicBool::new(false),
        }
    }

    /// Subscribe to the gateway's change stream. Idempotent: repeated calls
    /// send at most one `POST_SUB_CHANGES` while subscribed.
    pub async fn subscribe(&self) -> Result<(), CommandError> {
        if self.subscribed.swap(true, Ordering::SeqCst) {
            debug!("already subscribed to change stream");
            return Ok(());
        }
        match self.commands.subscribe().await {
            Ok(_) => {
                info!("subscribed to change stream");
                Ok(())
            }
            Err(e) => {
                self.subscribed.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    /// Trigger one reading on `sensor` and gather its waveforms and optional
    /// temperature.
    pub async fn acquire(&self, sensor: &SensorMeta) -> Result<SensorReading, AcquisitionError> {
        self.subscribe().await?;

        // Awaiters first; only then the trigger. See module docs.
        let started_rx = self.bus.wait_for(verbs::NOT_DYN_READING_STARTED);
        let reading_rx = self.bus.wait_for(verbs::NOT_DYN_READING);
        let temp_rx = self.bus.wait_for(verbs::NOT_DYN_TEMP);

        info!(serial = sensor.serial, "triggering reading");
        self.commands.take_reading(sensor.serial).await?;

        let started: ReadingStarted = await_payload(
            started_rx,
            START_TIMEOUT,
            verbs::NOT_DYN_READING_STARTED,
        )
        .await?;
        if !started.success {
            return Err(AcquisitionError::StartRefused {
                serial: sensor.serial,
            });
        }
        debug!(serial = sensor.serial, "reading started");

        let notification: ReadingNotification = await_payload(
            reading_rx,
            self.acquisition_timeout,
            verbs::NOT_DYN_READING,
        )
        .await?;
        let waveform = parse_waveforms(&notification, sensor.samples)?;

        // Best effort: absence of a temperature is not a failure.
        let temperature =
            match tokio::time::timeout(TEMP_TIMEOUT, temp_rx).await {
                Ok(Ok(frame)) => match serde_json::from_value::<TempNotification>(frame.data) {
                    Ok(temp) => Some(temp.temperature),
                    Err(e) => {
                        warn!(error = %e, "unreadable temperature payload; continuing without");
                        None
                    }
                },
                _ => {
                    debug!("temperature not reported within deadline");
                    None
                }
            };

        Ok(SensorReading {
            sensor: sensor.clone(),
            reading_id: notification.id,
            serial: notification.serial,
            time: notification.time,
            waveform,
            temperature,
        })
    }

    /// Release the change subscription on shutdown. Failures are logged, not
    /// raised — the session is going away regardless.
    pub async fn release(&self) {
        if !self.subscribed.swap(false, Ordering::SeqCst) {
            return;
        }
        match self.commands.unsubscribe().await {
            Ok(_) => debug!("unsubscribed from change stream"),
            Err(e) => warn!(error = %e, "unsubscribe failed during shutdown"),
        }
    }
}

/// Await one notification frame and decode its payload.
async fn await_payload<T>(
    rx: oneshot::Receiver<Frame>,
    timeout: Duration,
    notification: &'static str,
) -> Result<T, AcquisitionError>
where
    T: serde::de::DeserializeOwned,
{
    let frame = match tokio::time::timeout(timeout, rx).await {
        Ok(Ok(frame)) => frame,
        Ok(Err(_)) => return Err(AcquisitionError::SessionGone { notification }),
        Err(_) => {
            return Err(AcquisitionError::NotificationTimeout {
                notification,
                timeout_ms: timeout.as_millis() as u64,
            })
        }
    };
    serde_json::from_value(frame.data).map_err(|e| AcquisitionError::BadNotification {
        notification,
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlator::Correlator;
    use serde_json::json;
    use std::sync::Mutex;

    struct Harness {
        acquisition: Arc<Acquisition>,
        correlator: Correlator,
        bus: Arc<NotificationBus>,
        sent: Arc<Mutex<Vec<Frame>>>,
    }

    fn harness() -> Harness {
        let sent: Arc<Mutex<Vec<Frame>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = sent.clone();
        let correlator = Correlator::new(Duration::from_secs(5), move |text| {
            sink.lock()
                .expect("sink lock")
                .push(vl_protocol::decode_frame(text).expect("valid frame"));
            true
        });
        let bus = Arc::new(NotificationBus::new());
        let acquisition = Arc::new(Acquisition::new(
            GatewayCommands::new(correlator.clone()),
            bus.clone(),
            Duration::from_secs(5),
        ));
        Harness {
            acquisition,
            correlator,
            bus,
            sent,
        }
    }

    fn ack(harness: &Harness, verb: &str, data: serde_json::Value) {
        harness.correlator.handle_response(Frame {
            frame_type: verb.to_owned(),
            from: "SERV".to_owned(),
            to: None,
            target: Some("UI".to_owned()),
            correlation_id: None,
            data,
        });
    }

    fn notify(harness: &Harness, verb: &str, data: serde_json::Value) {
        harness.bus.dispatch(Frame {
            frame_type: verb.to_owned(),
            from: "SERV".to_owned(),
            to: None,
            target: Some("UI".to_owned()),
            correlation_id: None,
            data,
        });
    }

    fn sensor() -> SensorMeta {
        serde_json::from_value(json!({
            "Serial": 482113, "PartNum": "VS-80G", "ReadRate": 3200,
            "Samples": 4, "Connected": 1
        }))
        .expect("meta")
    }

    #[tokio::test]
    async fn repeated_subscribe_sends_one_post_sub_changes() {
        let harness = harness();
        let acq = harness.acquisition.clone();
        let first = tokio::spawn(async move { acq.subscribe().await });
        tokio::task::yield_now().await;
        ack(&harness, verbs::RTN_SUB_CHANGES, json!({}));
        first.await.expect("join").expect("subscribe");

        harness.acquisition.subscribe().await.expect("idempotent");
        let subs = harness
            .sent
            .lock()
            .unwrap()
            .iter()
            .filter(|f| f.frame_type == verbs::POST_SUB_CHANGES)
            .count();
        assert_eq!(subs, 1);
    }

    #[tokio::test]
    async fn failed_subscribe_clears_the_flag_for_retry() {
        let harness = harness();
        let acq = harness.acquisition.clone();
        let attempt = tokio::spawn(async move { acq.subscribe().await });
        tokio::task::yield_now().await;
        ack(
            &harness,
            verbs::RTN_ERR,
            json!({"Attempt": "POST_SUB_CHANGES", "Error": "not authenticated"}),
        );
        assert!(attempt.await.expect("join").is_err());

        // A retry must actually send again.
        let acq = harness.acquisition.clone();
        let retry = tokio::spawn(async move { acq.subscribe().await });
        tokio::task::yield_now().await;
        ack(&harness, verbs::RTN_SUB_CHANGES, json!({}));
        retry.await.expect("join").expect("retry subscribe");

        let subs = harness
            .sent
            .lock()
            .unwrap()
            .iter()
            .filter(|f| f.frame_type == verbs::POST_SUB_CHANGES)
            .count();
        assert_eq!(subs, 2);
    }

    /// Pump the acquire task until `TAKE_DYN_READING` is on the wire, acking
    /// the subscribe exactly once along the way.
    async fn drive_until_trigger(harness: &Harness) {
        let mut sub_acked = false;
        for _ in 0..100 {
            tokio::task::yield_now().await;
            let frames: Vec<String> = harness
                .sent
                .lock()
                .unwrap()
                .iter()
                .map(|f| f.frame_type.clone())
                .collect();
            if frames.iter().any(|t| t == verbs::TAKE_DYN_READING) {
                return;
            }
            if !sub_acked && frames.iter().any(|t| t == verbs::POST_SUB_CHANGES) {
                sub_acked = true;
                ack(harness, verbs::RTN_SUB_CHANGES, json!({}));
            }
        }
        panic!("trigger was never sent");
    }

    #[tokio::test]
    async fn awaiters_are_registered_before_the_trigger_send() {
        let harness = harness();
        let acq = harness.acquisition.clone();
        let task = tokio::spawn(async move { acq.acquire(&sensor()).await });

        drive_until_trigger(&harness).await;

        // Notifications delivered BEFORE the trigger's own response must be
        // captured — this is exactly the overtaking race.
        notify(
            &harness,
            verbs::NOT_DYN_READING_STARTED,
            json!({"Serial": 482113, "Success": true}),
        );
        notify(
            &harness,
            verbs::NOT_DYN_READING,
            json!({
                "ID": 9, "Serial": "482113", "Time": "2026-03-02T10:15:00Z",
                "X": "0.1,0.2,0.3,0.4", "Y": "0.1,0.2,0.3,0.4", "Z": "0.1,0.2,0.3,0.4"
            }),
        );
        notify(
            &harness,
            verbs::NOT_DYN_TEMP,
            json!({"Serial": 482113, "Temperature": 39.0}),
        );
        ack(&harness, verbs::RTN_DYN, json!({}));

        let reading = task.await.expect("join").expect("acquire");
        assert_eq!(reading.reading_id, 9);
        assert_eq!(reading.temperature, Some(39.0));
        assert_eq!(reading.waveform.x.len(), 4);
    }

    #[tokio::test]
    async fn refused_start_names_the_serial() {
        let harness = harness();
        let acq = harness.acquisition.clone();
        let task = tokio::spawn(async move { acq.acquire(&sensor()).await });
        drive_until_trigger(&harness).await;
        ack(&harness, verbs::RTN_DYN, json!({}));
        notify(
            &harness,
            verbs::NOT_DYN_READING_STARTED,
            json!({"Serial": 482113, "Success": false}),
        );

        match task.await.expect("join") {
            Err(AcquisitionError::StartRefused { serial }) => assert_eq!(serial, 482113),
            other => panic!("expected StartRefused, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn missing_temperature_is_not_an_error() {
        let harness = harness();
        let acq = harness.acquisition.clone();
        let task = tokio::spawn(async move { acq.acquire(&sensor()).await });

        drive_until_trigger(&harness).await;
        ack(&harness, verbs::RTN_DYN, json!({}));
        notify(
            &harness,
            verbs::NOT_DYN_READING_STARTED,
            json!({"Serial": 482113, "Success": true}),
        );
        notify(
            &harness,
            verbs::NOT_DYN_READING,
            json!({
                "ID": 9, "Serial": "482113", "Time": "t",
                "X": "0.1,0.2,0.3,0.4", "Y": "0.1,0.2,0.3,0.4", "Z": "0.1,0.2,0.3,0.4"
            }),
        );
        // No NOT_DYN_TEMP: the paused clock runs out the 10 s best-effort
        // window and the reading completes without it.
        let reading = task.await.expect("join").expect("acquire");
        assert_eq!(reading.temperature, None);
    }

    #[tokio::test]
    async fn release_unsubscribes_once_and_tolerates_errors() {
        let harness = harness();
        let acq = harness.acquisition.clone();
        let sub = tokio::spawn(async move { acq.subscribe().await });
        tokio::task::yield_now().await;
        ack(&harness, verbs::RTN_SUB_CHANGES, json!({}));
        sub.await.expect("join").expect("subscribe");

        let acq = harness.acquisition.clone();
        let rel = tokio::spawn(async move { acq.release().await });
        tokio::task::yield_now().await;
        ack(
            &harness,
            verbs::RTN_ERR,
            json!({"Attempt": "POST_UNSUB_CHANGES", "Error": "gone"}),
        );
        rel.await.expect("join");

        // Released already: no second unsubscribe goes out.
        harness.acquisition.release().await;
        let unsubs = harness
            .sent
            .lock()
            .unwrap()
            .iter()
            .filter(|f| f.frame_type == verbs::POST_UNSUB_CHANGES)
            .count();
        assert_eq!(unsubs, 1);
    }
}
