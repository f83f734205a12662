//! # Buoy DAQ Reconstruction Library
//!
//! This crate turns telemetry packages uploaded by drifting wave buoys into continuous,
//! correctly timed sample series. Packages arrive late, out of order, duplicated and with
//! holes; each carries a device-clock anchor for one of its samples, and the device clock
//! drifts from its configured rate. The library deduplicates and orders the packages,
//! splits them into gap-free segments, estimates the true sample rate of each segment,
//! rebuilds a dense time axis and merges the segments back together.
//!
//! ## Crate Structure
//!
//! - **`package`**: The `Package` model, the wire format parser (`package::wire`) and the
//!   duplicate detector (`package::dedup`).
//! - **`collection`**: `Collection`, a sorted and duplicate-free batch of packages, and
//!   the segmenter (`collection::segments`).
//! - **`data`**: Frequency estimation, retiming, merging, the output `Dataset` and windowed
//!   wave statistics.
//! - **`pipeline`**: The `Engine` running the whole chain and reporting what it skipped.
//! - **`store`**: The interface to the external package store, with an in-memory store.
//! - **`config`**: `EngineConfig`, loaded from TOML and environment variables.
//! - **`logging`**: `tracing` subscriber setup.
//! - **`error`**: The `TelemetryError` enum used across the crate.
//! - **`validation`**: Validators for configuration parameters.

pub mod collection;
pub mod config;
pub mod data;
pub mod error;
pub mod logging;
pub mod package;
pub mod pipeline;
pub mod store;
pub mod validation;

pub use collection::Collection;
pub use config::EngineConfig;
pub use data::{Dataset, Retimer};
pub use error::{AppResult, TelemetryError};
pub use package::{Package, PackageBuilder};
pub use pipeline::{Engine, Reconstruction, ReconstructionReport};
