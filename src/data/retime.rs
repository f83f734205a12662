//! Retiming.
//!
//! The device clock drifts and package anchors jitter, so the nominal sample times of
//! consecutive packages neither line up nor advance at the declared rate. Within one
//! gap-free segment the sample rate is assumed constant: with the estimated rate `fs`
//! every package anchor gives a candidate for the time of the first sample,
//!
//! ```text
//! t0_i = anchor_i - (i * N + offset_i) / fs
//! ```
//!
//! and the dense time axis is `t[k] = mean(t0_i) + k / fs`.
//!
//! [`Retimer::retime`] handles exactly one gap-free segment and refuses anything else.
//! [`Retimer::retime_segments`] splits a collection into segments, retimes each and
//! merges the results.

use super::dataset::{Dataset, SignalDelay};
use super::frequency::FrequencyEstimator;
use super::merge;
use crate::collection::Collection;
use crate::error::{AppResult, TelemetryError};
use tracing::{debug, info_span};

/// Parameters of the retimer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetimeConfig {
    /// Largest tolerated distance between consecutive packages (s)
    pub eps_gap: f64,
    /// Relative tolerance of per-interval frequency estimates
    pub frequency_tolerance: f64,
    /// Filter delay to compensate on the retimed axis
    pub signal_delay: Option<SignalDelay>,
}

impl Default for RetimeConfig {
    fn default() -> Self {
        Self {
            eps_gap: 10.0,
            frequency_tolerance: super::frequency::DEFAULT_TOLERANCE,
            signal_delay: Some(SignalDelay::default()),
        }
    }
}

/// Reconstructs dense time axes for collections.
#[derive(Debug, Clone, Copy)]
pub struct Retimer {
    config: RetimeConfig,
    estimator: FrequencyEstimator,
}

impl Default for Retimer {
    fn default() -> Self {
        Self::new(RetimeConfig::default())
    }
}

impl Retimer {
    /// Retimer with the given parameters.
    pub fn new(config: RetimeConfig) -> Self {
        Self {
            config,
            estimator: FrequencyEstimator::new(config.frequency_tolerance),
        }
    }

    /// Parameters in use.
    pub fn config(&self) -> &RetimeConfig {
        &self.config
    }

    /// Retime a single gap-free segment.
    ///
    /// Fails if the collection is empty, not gap-free or if its packages differ in
    /// length.
    pub fn retime(&self, segment: &Collection) -> AppResult<Dataset> {
        let packages = segment.packages();
        let n = segment
            .package_length()
            .ok_or(TelemetryError::EmptyCollection)?;

        if !segment.is_gap_free(self.config.eps_gap) {
            return Err(TelemetryError::NotGapFree {
                max_gap: segment.max_abs_gap().unwrap_or_default(),
                eps_gap: self.config.eps_gap,
            });
        }

        if let Some(bad) = packages.iter().find(|p| p.len() != n) {
            return Err(TelemetryError::InconsistentPackageLength {
                expected: n,
                found: bad.len(),
            });
        }

        let fs = self.estimator.estimate(segment).frequency;

        let t0 = packages
            .iter()
            .enumerate()
            .map(|(i, p)| {
                let on = (i * n) as f64 + f64::from(p.offset());
                p.anchor() - on / fs
            })
            .sum::<f64>()
            / packages.len() as f64;

        let time: Vec<f64> = (0..packages.len() * n)
            .map(|k| t0 + k as f64 / fs)
            .collect();

        debug!(
            packages = packages.len(),
            samples = time.len(),
            t0,
            fs,
            "Retimed segment"
        );

        let mut dataset = Dataset::from_collection(segment)?.with_time(time, fs)?;
        if let Some(delay) = self.config.signal_delay {
            dataset.adjust_signal_delay(delay)?;
        }
        Ok(dataset)
    }

    /// Split `collection` into gap-free segments, retime each and merge the results.
    pub fn retime_segments(&self, collection: &Collection) -> AppResult<Dataset> {
        let span = info_span!("retime_segments", packages = collection.len());
        let _enter = span.enter();

        let datasets = collection
            .segments(self.config.eps_gap)
            .map(|segment| self.retime(&segment))
            .collect::<AppResult<Vec<_>>>()?;

        debug!(segments = datasets.len(), "Merging retimed segments");
        Ok(merge::concat(datasets)?.with_stats(collection.stats()))
    }
}
