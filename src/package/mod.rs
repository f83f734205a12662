//! Telemetry packages.
//!
//! A [`Package`] is one fixed-length batch of samples transmitted by a buoy, together with
//! the header the device attached to it. Packages are immutable once built: they are
//! created by the wire parser ([`wire`]) or by [`PackageBuilder`], and only ever read
//! afterwards.
//!
//! ## Timing
//!
//! The header `timestamp` (milliseconds, device clock) is the *anchor*: the time of the
//! sample at index `offset` within the batch. Derived quantities use the declared
//! (nominal) frequency:
//!
//! - `start = timestamp / 1000 - offset / frequency`
//! - `end = start + len / frequency`
//! - `duration = len / frequency`

pub mod dedup;
pub mod wire;

use crate::error::{AppResult, TelemetryError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// What kind of sensor produced a package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageKind {
    /// Three-axis accelerometer samples
    Acceleration,
    /// GPS position and velocity samples
    Gps,
}

/// Position reported in a package header, in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Longitude, degrees east
    pub lon: f64,
    /// Latitude, degrees north
    pub lat: f64,
}

/// One named sample channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    /// Channel name (e.g. "z" for vertical acceleration)
    pub name: String,
    /// Sample values
    pub values: Vec<f32>,
}

impl Channel {
    /// Channel `name` holding `values`.
    pub fn new(name: impl Into<String>, values: Vec<f32>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the channel has no samples.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Bitwise equality of name and samples. Retransmitted packages carry the exact same
    /// bytes, so two NaN samples at the same index compare equal here.
    pub fn same_samples(&self, other: &Channel) -> bool {
        self.name == other.name
            && self.values.len() == other.values.len()
            && self
                .values
                .iter()
                .zip(&other.values)
                .all(|(a, b)| a.to_bits() == b.to_bits())
    }
}

/// A parsed telemetry package.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Package {
    kind: PackageKind,
    device: String,
    serial: String,
    event: String,
    storage_id: Option<u32>,
    storage_version: u32,
    received_at: f64,
    added_at: Option<f64>,
    timestamp: i64,
    offset: u32,
    frequency: f64,
    position: Option<Position>,
    position_time: Option<f64>,
    channels: Vec<Channel>,
    raw: Vec<Channel>,
}

impl Package {
    /// Start building a package for `device` anchored at `timestamp` (ms) with the given
    /// nominal frequency.
    pub fn builder(device: impl Into<String>, timestamp: i64, frequency: f64) -> PackageBuilder {
        PackageBuilder::new(device, timestamp, frequency)
    }

    /// Sensor that produced the package.
    pub fn kind(&self) -> PackageKind {
        self.kind
    }

    /// Hub device identifier, e.g. `dev:864475044203262`.
    pub fn device(&self) -> &str {
        &self.device
    }

    /// Buoy name / serial number.
    pub fn serial(&self) -> &str {
        &self.serial
    }

    /// Identifier assigned by the upstream hub.
    pub fn event(&self) -> &str {
        &self.event
    }

    /// Sequence number on the device SD-card. Not unique across devices or card swaps.
    pub fn storage_id(&self) -> Option<u32> {
        self.storage_id
    }

    /// Storage format version.
    pub fn storage_version(&self) -> u32 {
        self.storage_version
    }

    /// Upload time, seconds since the UNIX epoch.
    pub fn received_at(&self) -> f64 {
        self.received_at
    }

    /// Time the device queued the package, seconds since the UNIX epoch.
    pub fn added_at(&self) -> Option<f64> {
        self.added_at
    }

    /// Device clock time of the sample at [`Package::offset`], milliseconds.
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    /// Sample index within the batch that [`Package::timestamp`] refers to.
    pub fn offset(&self) -> u32 {
        self.offset
    }

    /// Declared (nominal) sample rate in Hz.
    pub fn frequency(&self) -> f64 {
        self.frequency
    }

    /// Header position, if the device had a fix.
    pub fn position(&self) -> Option<Position> {
        self.position
    }

    /// Time of the position fix, seconds since the UNIX epoch.
    pub fn position_time(&self) -> Option<f64> {
        self.position_time
    }

    /// Sample channels in payload order.
    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    /// Secondary (unfiltered) channels, empty for most packages.
    pub fn raw_channels(&self) -> &[Channel] {
        &self.raw
    }

    /// Samples of channel `name`.
    pub fn channel(&self, name: &str) -> Option<&[f32]> {
        self.channels
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.values.as_slice())
    }

    /// Number of samples per channel.
    pub fn len(&self) -> usize {
        self.channels.first().map_or(0, Channel::len)
    }

    /// Whether the package has no samples.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Anchor time in seconds (the time of sample `offset`).
    pub fn anchor(&self) -> f64 {
        self.timestamp as f64 / 1000.0
    }

    /// Time of the first sample in seconds, derived with the nominal frequency.
    pub fn start(&self) -> f64 {
        self.anchor() - f64::from(self.offset) / self.frequency
    }

    /// Time just past the last sample in seconds.
    pub fn end(&self) -> f64 {
        self.start() + self.duration()
    }

    /// Duration in seconds.
    pub fn duration(&self) -> f64 {
        self.len() as f64 / self.frequency
    }

    /// Nominal sample times in seconds, starting at [`Package::start`].
    pub fn sample_times(&self) -> impl Iterator<Item = f64> + '_ {
        let start = self.start();
        (0..self.len()).map(move |k| start + k as f64 / self.frequency)
    }

    /// [`Package::start`] as a UTC date-time, to the millisecond.
    pub fn start_datetime(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis((self.start() * 1000.0).round() as i64)
    }

    /// Whether identity headers and every sample match; see [`dedup::classify`].
    pub fn is_duplicate_of(&self, other: &Package) -> bool {
        dedup::is_duplicate(self, other)
    }
}

impl fmt::Display for Package {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let start = self
            .start_datetime()
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| format!("{:.3}", self.start()));
        write!(
            f,
            "[{:?} device={} storage_id={:?} t={} -> {:.2}s sz={}x{} @ f={}Hz",
            self.kind,
            self.device,
            self.storage_id,
            start,
            self.duration(),
            self.len(),
            self.channels.len(),
            self.frequency
        )?;
        if let Some(p) = self.position {
            write!(f, ", lon={}E lat={}N", p.lon, p.lat)?;
        }
        write!(f, "]")
    }
}

/// A builder for constructing [`Package`] instances.
///
/// Used by the wire parser and for synthetic packages.
#[derive(Debug, Clone)]
pub struct PackageBuilder {
    inner: Package,
}

impl PackageBuilder {
    /// Same as [`Package::builder`].
    pub fn new(device: impl Into<String>, timestamp: i64, frequency: f64) -> Self {
        let timestamp_secs = timestamp as f64 / 1000.0;
        Self {
            inner: Package {
                kind: PackageKind::Acceleration,
                device: device.into(),
                serial: String::new(),
                event: String::new(),
                storage_id: None,
                storage_version: 0,
                received_at: timestamp_secs,
                added_at: None,
                timestamp,
                offset: 0,
                frequency,
                position: None,
                position_time: None,
                channels: Vec::new(),
                raw: Vec::new(),
            },
        }
    }

    /// Set the sensor kind (default acceleration).
    pub fn kind(mut self, kind: PackageKind) -> Self {
        self.inner.kind = kind;
        self
    }

    /// Set the buoy name.
    pub fn serial(mut self, serial: impl Into<String>) -> Self {
        self.inner.serial = serial.into();
        self
    }

    /// Set the hub event identifier.
    pub fn event(mut self, event: impl Into<String>) -> Self {
        self.inner.event = event.into();
        self
    }

    /// Set the SD-card sequence number.
    pub fn storage_id(mut self, storage_id: Option<u32>) -> Self {
        self.inner.storage_id = storage_id;
        self
    }

    /// Set the storage format version.
    pub fn storage_version(mut self, version: u32) -> Self {
        self.inner.storage_version = version;
        self
    }

    /// Set the upload time (s). Defaults to the anchor.
    pub fn received_at(mut self, received_at: f64) -> Self {
        self.inner.received_at = received_at;
        self
    }

    /// Set the time the device queued the package (s).
    pub fn added_at(mut self, added_at: Option<f64>) -> Self {
        self.inner.added_at = added_at;
        self
    }

    /// Set the sample index the timestamp refers to.
    pub fn offset(mut self, offset: u32) -> Self {
        self.inner.offset = offset;
        self
    }

    /// Set the header position.
    pub fn position(mut self, position: Option<Position>) -> Self {
        self.inner.position = position;
        self
    }

    /// Set the time of the position fix (s).
    pub fn position_time(mut self, position_time: Option<f64>) -> Self {
        self.inner.position_time = position_time;
        self
    }

    /// Append a sample channel.
    pub fn channel(mut self, name: impl Into<String>, values: Vec<f32>) -> Self {
        self.inner.channels.push(Channel::new(name, values));
        self
    }

    /// Append a secondary channel.
    pub fn raw_channel(mut self, name: impl Into<String>, values: Vec<f32>) -> Self {
        self.inner.raw.push(Channel::new(name, values));
        self
    }

    /// Validate and build the package.
    ///
    /// Fails if the frequency is not positive, if there are no channels, or if the
    /// channels (primary and raw) differ in length.
    pub fn build(self) -> AppResult<Package> {
        let pck = self.inner;

        if !(pck.frequency.is_finite() && pck.frequency > 0.0) {
            return Err(TelemetryError::MalformedPackage(format!(
                "frequency must be positive, got {}",
                pck.frequency
            )));
        }

        let Some(first) = pck.channels.first() else {
            return Err(TelemetryError::MalformedPackage(
                "package has no sample channels".into(),
            ));
        };

        let length = first.len();
        if let Some(bad) = pck
            .channels
            .iter()
            .chain(&pck.raw)
            .find(|c| c.len() != length)
        {
            return Err(TelemetryError::MalformedPackage(format!(
                "channel '{}' has {} samples, expected {}",
                bad.name,
                bad.len(),
                length
            )));
        }

        Ok(pck)
    }
}
