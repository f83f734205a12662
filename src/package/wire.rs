//! Wire format of raw packages.
//!
//! Packages arrive from the hub as JSON events:
//!
//! ```json
//! { "device": "dev:8641...", "sn": "wavebug24", "received": 1654012345.2,
//!   "when": 1654012300, "event": "4a1f...", "file": "axl.qo",
//!   "body": { "length": 8192, "timestamp": 1654012280000, "offset": 12, ... },
//!   "payload": "<base64>" }
//! ```
//!
//! The payload is base64 of little-endian `u16` values, interleaved per sample. Each
//! value is a fixed-point quantization of the range `[-max, max]`; `max` comes from the
//! body (`accel_range` in g for acceleration, `*_range` fields for GPS). `body.length`
//! is the number of payload characters to decode.

use super::{Package, PackageKind, Position};
use crate::error::{AppResult, TelemetryError};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

/// Standard gravity (m/s^2) used to scale acceleration ranges given in g.
pub const STANDARD_GRAVITY: f64 = 9.80665;

/// Acceleration channel names, in payload order.
pub const AXL_CHANNELS: [&str; 3] = ["x", "y", "z"];

/// GPS channel names, in payload order.
pub const GPS_CHANNELS: [&str; 6] = ["n", "e", "z", "vn", "ve", "vz"];

const DEFAULT_FREQUENCY: f64 = 208.0;
const DEFAULT_ACCEL_RANGE: f64 = 4.0;
const DEFAULT_VEL_RANGE: f64 = 200.0 * 1.0e6 / 60.0 / 60.0;

#[derive(Debug, Deserialize)]
struct RawEvent {
    device: String,
    #[serde(default)]
    sn: String,
    received: f64,
    #[serde(default)]
    when: Option<f64>,
    #[serde(default)]
    event: String,
    #[serde(default)]
    file: String,
    body: serde_json::Value,
    payload: String,
}

#[derive(Debug, Deserialize)]
struct AxlBody {
    length: usize,
    timestamp: i64,
    #[serde(default)]
    offset: u32,
    #[serde(default)]
    storage_id: Option<u32>,
    #[serde(default)]
    storage_version: u32,
    #[serde(default)]
    position_time: Option<f64>,
    #[serde(default)]
    lon: Option<f64>,
    #[serde(default)]
    lat: Option<f64>,
    #[serde(default = "default_frequency")]
    freq: f64,
    #[serde(default = "default_accel_range")]
    accel_range: f64,
}

#[derive(Debug, Deserialize)]
struct GpsBody {
    length: usize,
    timestamp: i64,
    version: u32,
    /// 1e-7 degrees
    lon: f64,
    /// 1e-7 degrees
    lat: f64,
    /// mm
    msl: f64,
    freq: f64,
    lonlat_range: f64,
    msl_range: f64,
    #[serde(default = "default_vel_range")]
    vel_range: f64,
}

fn default_frequency() -> f64 {
    DEFAULT_FREQUENCY
}

fn default_accel_range() -> f64 {
    DEFAULT_ACCEL_RANGE
}

fn default_vel_range() -> f64 {
    DEFAULT_VEL_RANGE
}

/// Map a value in `[-max, max]` onto `[0, u16::MAX]`.
pub fn scale_f32_to_u16(max: f32, v: f32) -> u16 {
    debug_assert!(max > 0.);
    let max = f64::from(max);
    let v = f64::from(v) + max;
    (v * f64::from(u16::MAX) / (2. * max)) as u16
}

/// Map a quantized `u16` back onto `[-max, max]`.
pub fn scale_u16_to_f32(max: f32, u: u16) -> f32 {
    debug_assert!(max > 0.);
    let max = f64::from(max);
    let v = f64::from(u) * (2. * max) / f64::from(u16::MAX);
    (v - max) as f32
}

/// Decode the first `length` characters of a base64 payload into interleaved `u16`
/// values, `width` per sample.
fn decode_u16(payload: &str, length: usize, width: usize) -> AppResult<Vec<u16>> {
    let encoded = payload.get(..length).unwrap_or(payload);
    let bytes = STANDARD.decode(encoded)?;

    if bytes.is_empty() {
        return Err(TelemetryError::MalformedPackage("empty payload".into()));
    }

    if bytes.len() % (2 * width) != 0 {
        return Err(TelemetryError::MalformedPackage(format!(
            "length of payload: {}, does not match expected number of values ({} per sample)",
            bytes.len(),
            width
        )));
    }

    Ok(bytes
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect())
}

/// De-interleave column `column` of `width` and scale it.
fn column(values: &[u16], width: usize, column: usize, max: f64, bias: f64) -> Vec<f32> {
    values
        .iter()
        .skip(column)
        .step_by(width)
        .map(|&u| (f64::from(scale_u16_to_f32(max as f32, u)) + bias) as f32)
        .collect()
}

/// Position fix times are seconds, but some firmware versions sent milliseconds.
fn position_seconds(t: f64) -> f64 {
    if t > 1.0e11 {
        t / 1000.0
    } else {
        t
    }
}

/// Parse one raw JSON event into a [`Package`].
///
/// GPS packages are recognised by a `file` name starting with `egps`; everything else is
/// parsed as acceleration.
pub fn parse_event(raw: &str) -> AppResult<Package> {
    let event: RawEvent = serde_json::from_str(raw)?;

    if event.file.starts_with("egps") {
        parse_gps(event)
    } else {
        parse_axl(event)
    }
}

fn parse_axl(event: RawEvent) -> AppResult<Package> {
    let body: AxlBody = serde_json::from_value(event.body)?;
    let width = AXL_CHANNELS.len();
    let values = decode_u16(&event.payload, body.length, width)?;
    let max = body.accel_range * STANDARD_GRAVITY;

    let position = match (body.lon, body.lat) {
        (Some(lon), Some(lat)) => Some(Position { lon, lat }),
        _ => None,
    };

    let mut builder = Package::builder(event.device, body.timestamp, body.freq)
        .kind(PackageKind::Acceleration)
        .serial(event.sn)
        .event(event.event)
        .storage_id(body.storage_id)
        .storage_version(body.storage_version)
        .received_at(event.received)
        .added_at(event.when)
        .offset(body.offset)
        .position(position)
        .position_time(body.position_time.map(position_seconds));

    for (i, name) in AXL_CHANNELS.iter().enumerate() {
        builder = builder.channel(*name, column(&values, width, i, max, 0.0));
    }

    builder.build()
}

fn parse_gps(event: RawEvent) -> AppResult<Package> {
    let body: GpsBody = serde_json::from_value(event.body)?;
    let width = GPS_CHANNELS.len();
    let values = decode_u16(&event.payload, body.length, width)?;

    let scaling = [
        (body.lonlat_range, body.lat),
        (body.lonlat_range, body.lon),
        (body.msl_range, body.msl),
        (body.vel_range, 0.0),
        (body.vel_range, 0.0),
        (body.vel_range, 0.0),
    ];

    let mut builder = Package::builder(event.device, body.timestamp, body.freq)
        .kind(PackageKind::Gps)
        .serial(event.sn)
        .event(event.event)
        .storage_version(body.version)
        .received_at(event.received)
        .added_at(event.when)
        .position(Some(Position {
            lon: body.lon / 1.0e7,
            lat: body.lat / 1.0e7,
        }))
        .position_time(Some(body.timestamp as f64 / 1000.0));

    for (i, (name, (max, bias))) in GPS_CHANNELS.iter().zip(scaling).enumerate() {
        builder = builder.channel(*name, column(&values, width, i, max, bias));
    }

    builder.build()
}

/// Counts gathered while parsing a batch of raw events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ParseReport {
    /// Raw events offered
    pub total: usize,
    /// Events parsed into packages
    pub parsed: usize,
    /// Malformed events that were skipped
    pub skipped: usize,
}

/// Parse a batch of raw events. Malformed events are logged and skipped; they never
/// abort the batch.
pub fn parse_batch<I, S>(raws: I) -> (Vec<Package>, ParseReport)
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut report = ParseReport::default();
    let mut packages = Vec::new();

    for raw in raws {
        report.total += 1;
        match parse_event(raw.as_ref()) {
            Ok(pck) => {
                report.parsed += 1;
                packages.push(pck);
            }
            Err(e) => {
                report.skipped += 1;
                error!(error = %e, "failed to parse package, skipping");
            }
        }
    }

    debug!(
        parsed = report.parsed,
        skipped = report.skipped,
        "Parsed package batch"
    );

    (packages, report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn encode(values: &[u16]) -> String {
        let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        STANDARD.encode(bytes)
    }

    fn axl_event(samples: usize) -> String {
        let max = (DEFAULT_ACCEL_RANGE * STANDARD_GRAVITY) as f32;
        let mut values = Vec::new();
        for i in 0..samples {
            values.push(scale_f32_to_u16(max, 0.0));
            values.push(scale_f32_to_u16(max, 1.0));
            values.push(scale_f32_to_u16(max, 9.81 + i as f32 * 0.01));
        }
        let payload = encode(&values);
        json!({
            "device": "dev:864475044203262",
            "sn": "wavebug24",
            "received": 1_654_012_345.25,
            "when": 1_654_012_300.0,
            "event": "4a1f0c2e",
            "file": "axl.qo",
            "body": {
                "length": payload.len(),
                "timestamp": 1_654_012_280_000_i64,
                "offset": 12,
                "storage_id": 77,
                "lon": 5.32,
                "lat": 60.39,
                "freq": 52.0,
            },
            "payload": payload,
        })
        .to_string()
    }

    #[test]
    fn scale_limits() {
        assert_eq!(scale_f32_to_u16(10., 10.), u16::MAX);
        assert_eq!(scale_f32_to_u16(10., 0.), u16::MAX / 2);
        assert_eq!(scale_f32_to_u16(10., -10.), 0);

        assert_eq!(scale_u16_to_f32(10., u16::MAX), 10.);
        assert!((scale_u16_to_f32(10., u16::MAX / 2) - 0.).abs() < 0.001);
        assert_eq!(scale_u16_to_f32(10., 0), -10.);
    }

    #[test]
    fn parses_acceleration_event() {
        let pck = parse_event(&axl_event(8)).unwrap();
        assert_eq!(pck.kind(), PackageKind::Acceleration);
        assert_eq!(pck.serial(), "wavebug24");
        assert_eq!(pck.len(), 8);
        assert_eq!(pck.offset(), 12);
        assert_eq!(pck.storage_id(), Some(77));
        assert_eq!(pck.frequency(), 52.0);
        assert_eq!(pck.added_at(), Some(1_654_012_300.0));
        assert_eq!(pck.position(), Some(Position { lon: 5.32, lat: 60.39 }));

        let z = pck.channel("z").unwrap();
        assert!((z[0] - 9.81).abs() < 0.01);
        assert!((z[7] - 9.88).abs() < 0.01);
        assert!(pck.channel("y").unwrap().iter().all(|v| (v - 1.0).abs() < 0.01));
    }

    #[test]
    fn missing_frequency_defaults_to_208() {
        let payload = encode(&[0, 0, 0]);
        let raw = json!({
            "device": "dev:1", "received": 1.0, "file": "axl.qo",
            "body": { "length": payload.len(), "timestamp": 1000 },
            "payload": payload,
        })
        .to_string();
        let pck = parse_event(&raw).unwrap();
        assert_eq!(pck.frequency(), 208.0);
        assert_eq!(pck.position(), None);
    }

    #[test]
    fn payload_is_truncated_to_body_length() {
        let payload = encode(&[1, 2, 3, 4, 5, 6]);
        let raw = json!({
            "device": "dev:1", "received": 1.0, "file": "axl.qo",
            "body": { "length": 8, "timestamp": 1000, "freq": 52.0 },
            "payload": payload,
        })
        .to_string();
        // 8 base64 characters decode to 6 bytes: one x/y/z sample
        assert_eq!(parse_event(&raw).unwrap().len(), 1);
    }

    #[test]
    fn rejects_partial_sample() {
        let payload = encode(&[1, 2]);
        let raw = json!({
            "device": "dev:1", "received": 1.0, "file": "axl.qo",
            "body": { "length": payload.len(), "timestamp": 1000 },
            "payload": payload,
        })
        .to_string();
        assert!(matches!(
            parse_event(&raw),
            Err(TelemetryError::MalformedPackage(_))
        ));
    }

    #[test]
    fn parses_gps_event() {
        let range = 1000.0_f32;
        let values: Vec<u16> = (0..4)
            .flat_map(|_| {
                [
                    scale_f32_to_u16(range, 100.0),
                    scale_f32_to_u16(range, -100.0),
                    scale_f32_to_u16(range, 0.0),
                    scale_f32_to_u16(range, 10.0),
                    scale_f32_to_u16(range, 0.0),
                    scale_f32_to_u16(range, -10.0),
                ]
            })
            .collect();
        let payload = encode(&values);
        let raw = json!({
            "device": "dev:2", "sn": "egps01", "received": 2.0, "file": "egps.qo",
            "body": {
                "length": payload.len(), "timestamp": 1_654_012_280_000_i64, "version": 2,
                "lon": 53_200_000.0, "lat": 603_900_000.0, "msl": 1500.0, "freq": 5.0,
                "lonlat_range": range, "msl_range": range, "vel_range": range,
            },
            "payload": payload,
        })
        .to_string();

        let pck = parse_event(&raw).unwrap();
        assert_eq!(pck.kind(), PackageKind::Gps);
        assert_eq!(pck.len(), 4);
        assert_eq!(pck.storage_version(), 2);
        let position = pck.position().unwrap();
        assert!((position.lat - 60.39).abs() < 1e-9);
        assert!((pck.channel("z").unwrap()[0] - 1500.0).abs() < 0.1);
        assert!((pck.channel("vn").unwrap()[0] - 10.0).abs() < 0.1);
        assert!((pck.channel("vz").unwrap()[3] + 10.0).abs() < 0.1);
    }

    #[test]
    fn batch_skips_malformed_events() {
        let good = axl_event(4);
        let raws = vec![good.as_str(), "{ not json", r#"{"device": "dev:1"}"#, good.as_str()];
        let (packages, report) = parse_batch(raws);
        assert_eq!(packages.len(), 2);
        assert_eq!(
            report,
            ParseReport {
                total: 4,
                parsed: 2,
                skipped: 2
            }
        );
    }
}
