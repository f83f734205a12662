//! Timing reconstruction and processing of sample data.
//!
//! - [`frequency`]: estimate the true sample rate of a segment
//! - [`retime`]: build dense time axes for segments
//! - [`merge`]: combine retimed datasets
//! - [`dataset`]: the retimed output and filter delay compensation
//! - [`welch`]: windowed wave statistics
pub mod dataset;
pub mod frequency;
pub mod merge;
pub mod retime;
pub mod welch;

pub use dataset::{Dataset, PackageAxis, SignalDelay};
pub use frequency::{FrequencyEstimate, FrequencyEstimator};
pub use retime::{RetimeConfig, Retimer};
pub use welch::{WindowConfig, WindowStatistic};
