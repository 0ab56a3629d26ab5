//! Reading presentation.
//!
//! The output medium is a policy seam: the orchestrator hands a composed
//! reading to a [`ReadingSink`], and the default sink prints to stdout. The
//! contract is the field ordering, not the medium.

use std::fmt::Write as _;

use vl_protocol::SensorMeta;

use crate::waveform::{axis_stats, Waveform};

/// A fully composed reading, ready for presentation.
#[derive(Debug, Clone)]
pub struct SensorReading {
    pub sensor: SensorMeta,
    pub reading_id: i64,
    pub serial: String,
    pub time: String,
    pub waveform: Waveform,
    pub temperature: Option<f64>,
}

pub trait ReadingSink: Send + Sync {
    fn present(&self, reading: &SensorReading);
}

/// Default sink: human-readable block on stdout.
pub struct StdoutSink;

impl ReadingSink for StdoutSink {
    fn present(&self, reading: &SensorReading) {
        println!("{}", format_reading(reading));
    }
}

const PREVIEW_SAMPLES: usize = 10;

/// Render the reading block: sensor identity, reading identity/time, then per
/// axis the sample count, min/max/mean, and the first ten samples, then the
/// optional temperature.
pub fn format_reading(reading: &SensorReading) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Sensor {} ({})",
        reading.sensor.serial, reading.sensor.part_num
    );
    let _ = writeln!(out, "Reading {} at {}", reading.reading_id, reading.time);

    for (name, samples) in [
        ("X", &reading.waveform.x),
        ("Y", &reading.waveform.y),
        ("Z", &reading.waveform.z),
    ] {
        match axis_stats(samples) {
            Some(stats) => {
                let _ = writeln!(
                    out,
                    "  {}: {} samples  min {:.4} g  max {:.4} g  mean {:.4} g",
                    name,
                    samples.len(),
                    stats.min,
                    stats.max,
                    stats.mean
                );
            }
            None => {
                let _ = writeln!(out, "  {}: 0 samples", name);
            }
        }
        let preview: Vec<String> = samples
            .iter()
            .take(PREVIEW_SAMPLES)
            .map(|v| format!("{:.4}", v))
            .collect();
        let _ = writeln!(out, "     first {}: [{}]", preview.len(), preview.join(", "));
    }

    match reading.temperature {
        Some(temp) => {
            let _ = writeln!(out, "Temperature: {:.1} \u{b0}C", temp);
        }
        None => {
            let _ = writeln!(out, "Temperature: not reported");
        }
    }
    out
}
