//! Waveform axis decoding.
//!
//! Gateway firmware has shipped three different axis encodings over its
//! lifetime: a CSV string, a JSON number array, and base64 of little-endian
//! signed 16-bit milligravity samples. Each axis is tried against the three
//! in that order; the first decode that is finite, within the sensor's
//! physical range, and the expected length wins. A non-first winner is logged
//! as a warning — once the deployed encoding is confirmed, fallback hits
//! point at corruption, not variety.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use thiserror::Error;
use tracing::warn;

use vl_protocol::ReadingNotification;

/// Physical sensor limit; anything beyond this is a mis-decode.
pub const MAX_AMPLITUDE_G: f64 = 200.0;

const MILLI_G_PER_G: f64 = 1000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Csv,
    Json,
    Base64Int16,
}

impl std::fmt::Display for Encoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Encoding::Csv => write!(f, "csv"),
            Encoding::Json => write!(f, "json"),
            Encoding::Base64Int16 => write!(f, "base64-int16le"),
        }
    }
}

const STRATEGIES: [Encoding; 3] = [Encoding::Csv, Encoding::Json, Encoding::Base64Int16];

/// The three decoded axes of one reading.
#[derive(Debug, Clone, PartialEq)]
pub struct Waveform {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub z: Vec<f64>,
}

#[derive(Debug, Error)]
#[error("could not decode waveform axes: {details}")]
pub struct WaveformError {
    /// Per-axis, per-strategy reasons, e.g.
    /// `X[csv: expected 4 samples, got 2; json: ...; base64-int16le: ...]`.
    pub details: String,
}

/// Decode all three axes against the sensor's expected sample count.
pub fn parse_waveforms(
    reading: &ReadingNotification,
    expected_samples: usize,
) -> Result<Waveform, WaveformError> {
    let mut failures = Vec::new();
    let mut axis = |name: &str, raw: &str| match decode_axis(raw, expected_samples) {
        Ok((samples, encoding)) => {
            if encoding != Encoding::Csv {
                warn!(axis = name, %encoding, "axis decoded by fallback strategy");
            }
            Some(samples)
        }
        Err(reasons) => {
            let line = reasons
                .iter()
                .map(|(enc, reason)| format!("{}: {}", enc, reason))
                .collect::<Vec<_>>()
                .join("; ");
            failures.push(format!("{}[{}]", name, line));
            None
        }
    };

    let x = axis("X", &reading.x);
    let y = axis("Y", &reading.y);
    let z = axis("Z", &reading.z);

    match (x, y, z) {
        (Some(x), Some(y), Some(z)) => Ok(Waveform { x, y, z }),
        _ => Err(WaveformError {
            details: failures.join("; "),
        }),
    }
}

/// Decode one axis string, returning the samples and the strategy that won.
///
/// On failure, every attempted strategy is returned with its reason.
pub fn decode_axis(
    raw: &str,
    expected_samples: usize,
) -> Result<(Vec<f64>, Encoding), Vec<(Encoding, String)>> {
    let mut reasons = Vec::with_capacity(STRATEGIES.len());
    for strategy in STRATEGIES {
        let decoded = match strategy {
            Encoding::Csv => decode_csv(raw),
            Encoding::Json => decode_json(raw),
            Encoding::Base64Int16 => decode_base64_int16(raw),
        };
        match decoded.and_then(|samples| {
            accept(&samples, expected_samples)?;
            Ok(samples)
        }) {
            Ok(samples) => return Ok((samples, strategy)),
            Err(reason) => reasons.push((strategy, reason)),
        }
    }
    Err(reasons)
}

/// Accept only finite, in-range, length-matching output.
fn accept(samples: &[f64], expected: usize) -> Result<(), String> {
    if samples.len() != expected {
        return Err(format!(
            "expected {} samples, got {}",
            expected,
            samples.len()
        ));
    }
    if let Some(v) = samples.iter().find(|v| !v.is_finite()) {
        return Err(format!("non-finite sample {}", v));
    }
    if let Some(v) = samples.iter().find(|v| v.abs() > MAX_AMPLITUDE_G) {
        return Err(format!("sample {} exceeds ±{} g", v, MAX_AMPLITUDE_G));
    }
    Ok(())
}

/// Split on commas, trim, parse; unparseable fields are dropped the way
/// `parseFloat`-then-drop-NaN behaves on the gateway's own tooling.
fn decode_csv(raw: &str) -> Result<Vec<f64>, String> {
    let samples: Vec<f64> = raw
        .split(',')
        .map(str::trim)
        .filter(|field| !field.is_empty())
        .filter_map(|field| field.parse::<f64>().ok())
        .filter(|v| !v.is_nan())
        .collect();
    if samples.is_empty() {
        return Err("no numeric fields".to_owned());
    }
    Ok(samples)
}

fn decode_json(raw: &str) -> Result<Vec<f64>, String> {
    serde_json::from_str::<Vec<f64>>(raw).map_err(|e| e.to_string())
}

/// Base64 of sequential little-endian signed 16-bit samples, in milligravity.
fn decode_base64_int16(raw: &str) -> Result<Vec<f64>, String> {
    let bytes = BASE64.decode(raw.trim()).map_err(|e| e.to_string())?;
    if bytes.len() % 2 != 0 {
        return Err(format!("odd byte count {}", bytes.len()));
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|pair| f64::from(i16::from_le_bytes([pair[0], pair[1]])) / MILLI_G_PER_G)
        .collect())
}

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisStats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
}

/// Min/max/mean by a single fold. Sample counts reach six figures; nothing
/// here may assume the array fits an argument list or the stack.
pub fn axis_stats(samples: &[f64]) -> Option<AxisStats> {
    let first = *samples.first()?;
    let (min, max, sum) = samples.iter().fold(
        (first, first, 0.0_f64),
        |(min, max, sum), &v| (min.min(v), max.max(v), sum + v),
    );
    Some(AxisStats {
        min,
        max,
        mean: sum / samples.len() as f64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: &[f64], b: &[f64]) {
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b) {
            assert!((x - y).abs() < 1e-9, "{} != {}", x, y);
        }
    }

    #[test]
    fn csv_json_and_base64_agree_on_the_same_axis() {
        let expected = [0.1, 0.2, 0.3, 0.4];

        let (csv, enc) = decode_axis("0.1,0.2,0.3,0.4", 4).expect("csv");
        assert_eq!(enc, Encoding::Csv);
        close(&csv, &expected);

        let (json, enc) = decode_axis("[0.1,0.2,0.3,0.4]", 4).expect("json");
        assert_eq!(enc, Encoding::Json);
        close(&json, &expected);

        // int16-LE 100, 200, 300, 400 milligravity.
        let bytes = [0x64, 0x00, 0xC8, 0x00, 0x2C, 0x01, 0x90, 0x01];
        let (b64, enc) = decode_axis(&BASE64.encode(bytes), 4).expect("base64");
        assert_eq!(enc, Encoding::Base64Int16);
        close(&b64, &expected);
    }

    #[test]
    fn base64_handles_negative_samples() {
        let bytes = (-100_i16).to_le_bytes();
        let (samples, _) = decode_axis(&BASE64.encode(bytes), 1).expect("decode");
        close(&samples, &[-0.1]);
    }

    #[test]
    fn csv_drops_unparseable_fields() {
        // Three parseable fields against an expectation of three: accepted.
        let (samples, _) = decode_axis("0.1, junk, 0.3, 0.4", 3).expect("decode");
        close(&samples, &[0.1, 0.3, 0.4]);
    }

    #[test]
    fn length_mismatch_falls_through_and_reports_every_strategy() {
        let reasons = decode_axis("0.1,0.2", 4).expect_err("must fail");
        assert_eq!(reasons.len(), 3);
        assert_eq!(reasons[0].0, Encoding::Csv);
        assert!(reasons[0].1.contains("expected 4 samples, got 2"));
        assert_eq!(reasons[1].0, Encoding::Json);
        assert_eq!(reasons[2].0, Encoding::Base64Int16);
    }

    #[test]
    fn out_of_range_samples_are_rejected() {
        let reasons = decode_axis("500,0.2,0.3,0.4", 4).expect_err("must fail");
        assert!(reasons[0].1.contains("exceeds"));
    }

    #[test]
    fn json_array_is_not_misread_by_csv() {
        // CSV splitting "[0.1,...]" drops the bracketed fields and misses the
        // length check, so the JSON strategy must win.
        let (_, enc) = decode_axis("[0.1,0.2,0.3,0.4]", 4).expect("decode");
        assert_eq!(enc, Encoding::Json);
    }

    #[test]
    fn parse_waveforms_reports_the_failing_axes() {
        let reading = ReadingNotification {
            id: 1,
            serial: "482113".to_owned(),
            time: "t".to_owned(),
            x: "0.1,0.2,0.3,0.4".to_owned(),
            y: "garbage".to_owned(),
            z: "also garbage".to_owned(),
        };
        let err = parse_waveforms(&reading, 4).expect_err("must fail");
        assert!(err.details.contains("Y["));
        assert!(err.details.contains("Z["));
        assert!(!err.details.contains("X["), "X decoded fine: {}", err.details);
    }

    #[test]
    fn parse_waveforms_happy_path() {
        let reading = ReadingNotification {
            id: 1,
            serial: "482113".to_owned(),
            time: "t".to_owned(),
            x: "0.1,0.2,0.3,0.4".to_owned(),
            y: "[0.5,0.6,0.7,0.8]".to_owned(),
            z: BASE64.encode([0x64, 0x00, 0xC8, 0x00, 0x2C, 0x01, 0x90, 0x01]),
        };
        let waveform = parse_waveforms(&reading, 4).expect("decode");
        close(&waveform.x, &[0.1, 0.2, 0.3, 0.4]);
        close(&waveform.y, &[0.5, 0.6, 0.7, 0.8]);
        close(&waveform.z, &[0.1, 0.2, 0.3, 0.4]);
    }

    #[test]
    fn stats_are_computed_by_reduction() {
        let samples: Vec<f64> = (0..100_000).map(|i| f64::from(i % 7) - 3.0).collect();
        let stats = axis_stats(&samples).expect("stats");
        assert_eq!(stats.min, -3.0);
        assert_eq!(stats.max, 3.0);
        assert!(stats.mean.abs() < 0.1);
        assert!(axis_stats(&[]).is_none());
    }
}
