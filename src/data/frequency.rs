//! Frequency estimation.
//!
//! A device's sample clock drifts from its configured rate. Within a gap-free segment
//! the true rate is estimated from the sample count between consecutive package anchors
//! and the time between them:
//!
//! ```text
//! span_i = N - offset_i + offset_{i+1}
//! f_i    = span_i / (anchor_{i+1} - anchor_i)
//! ```
//!
//! The last package has no successor and repeats the last interval estimate. Estimates
//! deviating from the declared frequency by more than the relative tolerance are
//! discarded; the median of the rest is the representative frequency.

use crate::collection::Collection;
use serde::Serialize;
use tracing::{debug, warn};

/// Relative tolerance used when none is configured.
pub const DEFAULT_TOLERANCE: f64 = 0.1;

/// Result of a frequency estimate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrequencyEstimate {
    /// Representative frequency (Hz)
    pub frequency: f64,
    /// Per-package estimates before outlier removal, the last repeating its predecessor.
    /// Empty for single-package segments.
    pub estimates: Vec<f64>,
    /// Number of estimates discarded as outliers
    pub discarded: usize,
    /// Whether the declared frequency was used because no estimate survived
    pub fallback: bool,
}

/// Estimates the true sample rate of a segment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrequencyEstimator {
    tolerance: f64,
}

impl Default for FrequencyEstimator {
    fn default() -> Self {
        Self::new(DEFAULT_TOLERANCE)
    }
}

impl FrequencyEstimator {
    /// Estimator discarding estimates further than `tolerance` (relative) from the
    /// declared frequency.
    pub fn new(tolerance: f64) -> Self {
        Self { tolerance }
    }

    /// Relative tolerance of a single interval estimate.
    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    /// Per-package estimates for a segment, without outlier removal. An interval whose
    /// anchors do not advance (`dt <= 0`) has no estimate and yields NaN.
    pub fn package_estimates(&self, segment: &Collection) -> Vec<f64> {
        let packages = segment.packages();
        let Some(n) = segment.package_length() else {
            return Vec::new();
        };

        let mut estimates: Vec<f64> = packages
            .windows(2)
            .map(|w| {
                let span = n as f64 - f64::from(w[0].offset()) + f64::from(w[1].offset());
                let dt = w[1].anchor() - w[0].anchor();
                if dt > 0.0 {
                    span / dt
                } else {
                    f64::NAN
                }
            })
            .collect();

        if let Some(&last) = estimates.last() {
            estimates.push(last);
        }

        estimates
    }

    /// Representative frequency of a segment.
    pub fn estimate(&self, segment: &Collection) -> FrequencyEstimate {
        let nominal = segment.frequency();
        let estimates = self.package_estimates(segment);

        if estimates.is_empty() {
            warn!(
                packages = segment.len(),
                "Cannot estimate frequency from fewer than two packages, using declared {nominal} Hz"
            );
            return FrequencyEstimate {
                frequency: nominal,
                estimates,
                discarded: 0,
                fallback: true,
            };
        }

        let mut valid: Vec<f64> = estimates
            .iter()
            .copied()
            .filter(|f| f.is_finite() && ((f - nominal) / nominal).abs() <= self.tolerance)
            .collect();
        let discarded = estimates.len() - valid.len();

        if discarded > 0 {
            warn!(
                discarded,
                total = estimates.len(),
                tolerance = self.tolerance,
                "Discarded frequency estimates deviating from declared {nominal} Hz"
            );
        }

        let Some(frequency) = median(&mut valid) else {
            warn!("All frequency estimates were outliers, using declared {nominal} Hz");
            return FrequencyEstimate {
                frequency: nominal,
                estimates,
                discarded,
                fallback: true,
            };
        };

        debug!(frequency, nominal, "Estimated frequency");

        FrequencyEstimate {
            frequency,
            estimates,
            discarded,
            fallback: false,
        }
    }
}

/// Median, averaging the two middle values for even lengths. Reorders `values`.
pub fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        Some((values[mid - 1] + values[mid]) / 2.0)
    } else {
        Some(values[mid])
    }
}
