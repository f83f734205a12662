//! Timed sample datasets.
//!
//! A [`Dataset`] has two independent axes:
//!
//! - the sample axis: a dense time array with one entry per sample, the sample channels
//!   and the time each sample had before retiming (`original_time`);
//! - the package axis ([`PackageAxis`]): one entry per source package with its anchor,
//!   offset, storage id, position and upload times.
//!
//! Datasets are produced from a [`Collection`] by the retimer and combined by the
//! merger. They are the hand-off point to whatever writes them to disk.

use crate::collection::{Collection, CollectionStats};
use crate::error::{AppResult, TelemetryError};
use crate::package::{Channel, Package, PackageKind};
use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::{debug, error};

/// Constant delay of the on-board FIR filter: half the filter length at the filter
/// rate, truncated to whole milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SignalDelay {
    /// Number of filter taps
    pub taps: u32,
    /// Filter sample rate (Hz)
    pub filter_frequency: f64,
}

impl Default for SignalDelay {
    fn default() -> Self {
        Self::new(128, 208.0)
    }
}

impl SignalDelay {
    /// Delay of a `taps`-long filter running at `filter_frequency` Hz.
    pub fn new(taps: u32, filter_frequency: f64) -> Self {
        Self {
            taps,
            filter_frequency,
        }
    }

    /// Delay in whole milliseconds.
    pub fn millis(&self) -> i64 {
        (f64::from(self.taps) / 2.0 / self.filter_frequency * 1000.0) as i64
    }

    /// Delay in seconds, after truncation to milliseconds.
    pub fn seconds(&self) -> f64 {
        self.millis() as f64 / 1000.0
    }
}

/// Package-indexed metadata. All vectors have one entry per source package.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PackageAxis {
    /// Header anchor time (s)
    pub package_start: Vec<f64>,
    /// Sample index the anchor refers to
    pub offset: Vec<u32>,
    /// Sequence number on the device SD-card
    pub storage_id: Vec<Option<u32>>,
    /// Degrees east
    pub lon: Vec<Option<f64>>,
    /// Degrees north
    pub lat: Vec<Option<f64>>,
    /// Time of the position fix (s)
    pub position_time: Vec<Option<f64>>,
    /// Upload time (s)
    pub received: Vec<f64>,
    /// Time the device queued the package (s)
    pub added: Vec<Option<f64>>,
}

impl PackageAxis {
    fn push(&mut self, pck: &Package) {
        let position = pck.position();
        self.package_start.push(pck.anchor());
        self.offset.push(pck.offset());
        self.storage_id.push(pck.storage_id());
        self.lon.push(position.map(|p| p.lon));
        self.lat.push(position.map(|p| p.lat));
        self.position_time.push(pck.position_time());
        self.received.push(pck.received_at());
        self.added.push(pck.added_at());
    }

    /// Copy entry `i` of `other` onto the end of this axis.
    pub(crate) fn push_from(&mut self, other: &PackageAxis, i: usize) {
        self.package_start.push(other.package_start[i]);
        self.offset.push(other.offset[i]);
        self.storage_id.push(other.storage_id[i]);
        self.lon.push(other.lon[i]);
        self.lat.push(other.lat[i]);
        self.position_time.push(other.position_time[i]);
        self.received.push(other.received[i]);
        self.added.push(other.added[i]);
    }

    /// Number of packages.
    pub fn len(&self) -> usize {
        self.package_start.len()
    }

    /// Whether the axis has no packages.
    pub fn is_empty(&self) -> bool {
        self.package_start.is_empty()
    }

    fn is_consistent(&self) -> bool {
        let n = self.len();
        [
            self.offset.len(),
            self.storage_id.len(),
            self.lon.len(),
            self.lat.len(),
            self.position_time.len(),
            self.received.len(),
            self.added.len(),
        ]
        .iter()
        .all(|&l| l == n)
    }
}

/// Dense, timed samples reconstructed from a collection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Dataset {
    pub(crate) device: String,
    pub(crate) serial: String,
    pub(crate) kind: PackageKind,
    pub(crate) frequency: f64,
    pub(crate) package_length: usize,
    pub(crate) time: Vec<f64>,
    pub(crate) original_time: Vec<f64>,
    pub(crate) channels: Vec<Channel>,
    pub(crate) raw: Vec<Channel>,
    pub(crate) packages: PackageAxis,
    pub(crate) estimated_frequency: Option<f64>,
    pub(crate) signal_delay_ms: Option<i64>,
    pub(crate) stats: CollectionStats,
}

fn concat_channels(packages: &[Package], raw: bool) -> AppResult<Vec<Channel>> {
    let pick = |p: &Package| -> Vec<Channel> {
        if raw {
            p.raw_channels().to_vec()
        } else {
            p.channels().to_vec()
        }
    };

    let Some((first, rest)) = packages.split_first() else {
        return Ok(Vec::new());
    };
    let mut channels = pick(first);

    for pck in rest {
        let other = if raw { pck.raw_channels() } else { pck.channels() };
        if other.len() != channels.len()
            || other.iter().zip(&channels).any(|(a, b)| a.name != b.name)
        {
            return Err(TelemetryError::ChannelMismatch(format!(
                "package at {:.3} has channels {:?}, expected {:?}",
                pck.start(),
                other.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
                channels.iter().map(|c| c.name.as_str()).collect::<Vec<_>>()
            )));
        }
        for (dst, src) in channels.iter_mut().zip(other) {
            dst.values.extend_from_slice(&src.values);
        }
    }

    Ok(channels)
}

impl Dataset {
    /// Concatenate the packages of a collection. The time axis is the nominal sample
    /// time of each package; use [`Dataset::with_time`] to replace it.
    pub fn from_collection(collection: &Collection) -> AppResult<Self> {
        let packages = collection.packages();
        let first = packages.first().ok_or(TelemetryError::EmptyCollection)?;

        let channels = concat_channels(packages, false)?;
        let raw = concat_channels(packages, true)?;

        let original_time: Vec<f64> = packages.iter().flat_map(Package::sample_times).collect();

        let mut axis = PackageAxis::default();
        for pck in packages {
            axis.push(pck);
        }

        let dataset = Self {
            device: first.device().to_string(),
            serial: first.serial().to_string(),
            kind: first.kind(),
            frequency: collection.frequency(),
            package_length: first.len(),
            time: original_time.clone(),
            original_time,
            channels,
            raw,
            packages: axis,
            estimated_frequency: None,
            signal_delay_ms: None,
            stats: collection.stats(),
        };
        dataset.validate()?;
        Ok(dataset)
    }

    /// Replace the time axis, recording the frequency it was generated with.
    pub fn with_time(mut self, time: Vec<f64>, estimated_frequency: f64) -> AppResult<Self> {
        if time.len() != self.original_time.len() {
            return Err(TelemetryError::LengthMismatch(format!(
                "time axis has {} entries, dataset has {} samples",
                time.len(),
                self.original_time.len()
            )));
        }
        self.time = time;
        self.estimated_frequency = Some(estimated_frequency);
        Ok(self)
    }

    /// Check that every sample-indexed array has one entry per timestamp, that the
    /// package axis is complete and that each package owns `package_length` samples.
    pub fn validate(&self) -> AppResult<()> {
        let n = self.time.len();
        if self.original_time.len() != n {
            return Err(TelemetryError::LengthMismatch(format!(
                "original_time has {} entries, time has {}",
                self.original_time.len(),
                n
            )));
        }
        if let Some(c) = self.channels.iter().chain(&self.raw).find(|c| c.len() != n) {
            return Err(TelemetryError::LengthMismatch(format!(
                "channel '{}' has {} samples, time has {}",
                c.name,
                c.len(),
                n
            )));
        }
        if !self.packages.is_consistent() {
            return Err(TelemetryError::LengthMismatch(
                "package axis arrays differ in length".into(),
            ));
        }
        if n != self.packages.len() * self.package_length {
            return Err(TelemetryError::LengthMismatch(format!(
                "{} samples for {} packages of {}",
                n,
                self.packages.len(),
                self.package_length
            )));
        }
        Ok(())
    }

    /// Replace the collection statistics, e.g. with those of the collection a merged
    /// dataset was split from.
    pub(crate) fn with_stats(mut self, stats: CollectionStats) -> Self {
        self.stats = stats;
        self
    }

    /// Shift the time axis by the filter delay. A second compensation is rejected.
    pub fn adjust_signal_delay(&mut self, delay: SignalDelay) -> AppResult<()> {
        if self.signal_delay_ms.is_some() {
            error!(device = %self.device, "Dataset already adjusted for FIR filter delay");
            return Err(TelemetryError::SignalDelayAlreadyApplied);
        }

        let shift = delay.seconds();
        for t in &mut self.time {
            *t += shift;
        }
        self.signal_delay_ms = Some(delay.millis());
        debug!(delay_ms = delay.millis(), "Adjusted for FIR filter delay");
        Ok(())
    }

    /// Device the samples came from.
    pub fn device(&self) -> &str {
        &self.device
    }

    /// Buoy name.
    pub fn serial(&self) -> &str {
        &self.serial
    }

    /// Sensor kind of the source packages.
    pub fn kind(&self) -> PackageKind {
        self.kind
    }

    /// Declared frequency (Hz).
    pub fn frequency(&self) -> f64 {
        self.frequency
    }

    /// Frequency the time axis was generated with, if retimed.
    pub fn estimated_frequency(&self) -> Option<f64> {
        self.estimated_frequency
    }

    /// Sample rate of the time axis: estimated if retimed, else declared.
    pub fn sample_rate(&self) -> f64 {
        self.estimated_frequency.unwrap_or(self.frequency)
    }

    /// Samples per package.
    pub fn package_length(&self) -> usize {
        self.package_length
    }

    /// Applied filter delay compensation in milliseconds.
    pub fn signal_delay_ms(&self) -> Option<i64> {
        self.signal_delay_ms
    }

    /// Sample times (s).
    pub fn time(&self) -> &[f64] {
        &self.time
    }

    /// Sample times in integer nanoseconds.
    pub fn time_ns(&self) -> Vec<i64> {
        self.time.iter().map(|&t| to_ns(t)).collect()
    }

    /// Nominal sample times before retiming (s).
    pub fn original_time(&self) -> &[f64] {
        &self.original_time
    }

    /// Sample channels, each as long as the time axis.
    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    /// Secondary channels, empty unless the packages carried them.
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

    /// Package-indexed metadata.
    pub fn packages(&self) -> &PackageAxis {
        &self.packages
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.time.len()
    }

    /// Whether the dataset has no samples.
    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    /// Statistics of the collection the dataset was built from.
    pub fn stats(&self) -> CollectionStats {
        self.stats
    }

    /// Descriptive attributes, as written next to the arrays.
    pub fn attrs(&self) -> Map<String, Value> {
        let mut attrs = Map::new();
        attrs.insert("buoy_device".into(), json!(self.device));
        attrs.insert("buoy_name".into(), json!(self.serial));
        attrs.insert("kind".into(), json!(self.kind));
        attrs.insert("frequency".into(), json!(self.frequency));
        attrs.insert("frequency:unit".into(), json!("Hz"));
        attrs.insert("dt".into(), json!(1.0 / self.frequency));
        attrs.insert("package_length".into(), json!(self.package_length));
        if let Some(f) = self.estimated_frequency {
            attrs.insert("estimated_frequency".into(), json!(f));
            attrs.insert("estimated_frequency:unit".into(), json!("Hz"));
        }
        if let Some(ms) = self.signal_delay_ms {
            attrs.insert("fir_adjusted".into(), json!(ms));
            attrs.insert("fir_adjusted:unit".into(), json!("ms"));
        }
        attrs.insert(
            "number_of_packages".into(),
            json!(self.stats.number_of_packages),
        );
        attrs.insert("max_gap".into(), json!(self.stats.max_gap));
        attrs.insert("max_gap:unit".into(), json!("s"));
        attrs
    }
}

/// Seconds to integer nanoseconds.
pub(crate) fn to_ns(t: f64) -> i64 {
    (t * 1.0e9).round() as i64
}
