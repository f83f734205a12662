//! Custom error types for the reconstruction engine.
//!
//! This module defines the primary error type, `TelemetryError`, for the whole crate.
//! Using the `thiserror` crate, it provides a centralized and consistent way to handle
//! the different kinds of failure that can occur while turning raw telemetry packages
//! into a timed sample series.
//!
//! ## Error Hierarchy
//!
//! `TelemetryError` falls into three groups:
//!
//! - **Construction errors**: `EmptyCollection`, `FrequencyMismatch`, `MalformedPackage`,
//!   `Json` and `Payload`. A malformed single package is reported per item by the batch
//!   parsers; the remaining variants abort the operation.
//! - **Reconstruction errors**: `NotGapFree`, `InconsistentPackageLength`,
//!   `SignalDelayAlreadyApplied`, `LengthMismatch`, `ChannelMismatch`, `EmptyMerge` and
//!   `NoUsablePackages`.
//!   These are cross-package invariant violations; partial results would be numerically
//!   unsound, so the whole operation fails.
//! - **Environment errors**: `Config`, `Configuration`, `Store` and `Join`.
//!
//! By using `#[from]`, `TelemetryError` can be created from the underlying error types,
//! so the `?` operator works across parsing, configuration and task boundaries.

use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type AppResult<T> = std::result::Result<T, TelemetryError>;

/// Errors raised while parsing, reconstructing or configuring.
#[derive(Error, Debug)]
pub enum TelemetryError {
    /// A collection was built from no packages.
    #[error("Collection requires at least one package")]
    EmptyCollection,

    /// Packages in one collection declare different frequencies.
    #[error("All packages must share one frequency: expected {expected} Hz, found {found} Hz")]
    FrequencyMismatch {
        /// Frequency of the first package (Hz)
        expected: f64,
        /// First differing frequency (Hz)
        found: f64,
    },

    /// A raw package is structurally invalid.
    #[error("Malformed package: {0}")]
    MalformedPackage(String),

    /// A raw package is not valid JSON.
    #[error("Invalid package JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// A package payload is not valid base64.
    #[error("Invalid package payload encoding: {0}")]
    Payload(#[from] base64::DecodeError),

    /// Retiming was asked for a collection with gaps.
    #[error("Collection is not gap-free: max gap {max_gap:.3} s exceeds {eps_gap} s")]
    NotGapFree {
        /// Largest absolute gap between consecutive packages (s)
        max_gap: f64,
        /// Tolerated gap (s)
        eps_gap: f64,
    },

    /// Packages of a segment or merge differ in sample count.
    #[error("Packages must share one length for retiming: expected {expected}, found {found}")]
    InconsistentPackageLength {
        /// Length of the first package
        expected: usize,
        /// First differing length
        found: usize,
    },

    /// Filter delay compensation was applied twice.
    #[error("Signal delay compensation has already been applied to this dataset")]
    SignalDelayAlreadyApplied,

    /// Dataset arrays disagree in length.
    #[error("Dataset length mismatch: {0}")]
    LengthMismatch(String),

    /// Channel names differ between packages or datasets.
    #[error("Dataset channels do not match: {0}")]
    ChannelMismatch(String),

    /// Nothing to merge.
    #[error("Cannot merge an empty list of datasets")]
    EmptyMerge,

    /// Packages were received but every one was skipped.
    #[error("No usable packages: all {skipped} of {received} received packages were skipped")]
    NoUsablePackages {
        /// Packages offered
        received: usize,
        /// Packages skipped while fetching or parsing
        skipped: usize,
    },

    /// Loading the configuration failed.
    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    /// A configuration value is out of range.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// The package store failed to list or fetch.
    #[error("Package store error: {0}")]
    Store(String),

    /// A blocking worker task panicked or was cancelled.
    #[error("Worker task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl TelemetryError {
    /// Whether the error is isolated to a single package and the surrounding batch may
    /// continue without it.
    pub fn is_per_package(&self) -> bool {
        matches!(
            self,
            TelemetryError::MalformedPackage(_)
                | TelemetryError::Json(_)
                | TelemetryError::Payload(_)
                | TelemetryError::Store(_)
        )
    }
}
