//! Reconstruction engine.
//!
//! [`Engine`] runs the whole chain for one device and frequency:
//!
//! ```text
//! raw events -> packages -> collection -> segments -> retimed datasets -> merged dataset
//! ```
//!
//! Per-package failures (unparseable events, failed fetches) are skipped and counted.
//! Cross-package failures (mixed frequencies, an empty result) abort the run; when
//! every received package was skipped the error carries the counts. Every run
//! returns a [`ReconstructionReport`] with the counts next to the dataset.
//!
//! # Example
//! ```no_run
//! use buoy_daq::{config::EngineConfig, pipeline::Engine};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = Engine::new(EngineConfig::load()?)?;
//! let raw: Vec<String> = Vec::new(); // JSON events from the hub
//! let result = engine.reconstruct_raw(&raw)?;
//! println!("{} samples from {} packages", result.dataset.len(), result.report.packages);
//! # Ok(())
//! # }
//! ```

use crate::collection::{summarize_segments, Collection, SegmentSummary};
use crate::config::EngineConfig;
use crate::data::dataset::Dataset;
use crate::data::retime::Retimer;
use crate::data::welch::{self, WindowStatistic};
use crate::error::{AppResult, TelemetryError};
use crate::package::wire;
use crate::package::Package;
use crate::store::{self, PackageStore};
use serde::Serialize;
use tracing::{info, instrument, warn};

/// Vertical acceleration channel used for wave statistics.
pub const HEAVE_CHANNEL: &str = "z";

/// Counts describing one reconstruction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconstructionReport {
    /// Packages offered (raw events, listed store entries or parsed packages)
    pub received: usize,
    /// Packages skipped because they could not be fetched or parsed
    pub skipped: usize,
    /// Exact duplicates removed
    pub duplicates: usize,
    /// Identity-key collisions kept as separate packages
    pub collisions: usize,
    /// Packages in the reconstructed dataset
    pub packages: usize,
    /// Gap-free segments retimed independently
    pub segments: usize,
}

/// Result of a reconstruction.
#[derive(Debug, Clone)]
pub struct Reconstruction {
    /// Retimed and merged samples
    pub dataset: Dataset,
    /// What happened to the input
    pub report: ReconstructionReport,
}

/// Build the collection of what survived parsing or fetching. When input arrived but
/// nothing survived, the counts travel with the error.
fn collect(packages: Vec<Package>, report: &ReconstructionReport) -> AppResult<Collection> {
    if packages.is_empty() && report.received > 0 {
        warn!(
            received = report.received,
            skipped = report.skipped,
            "Every received package was skipped"
        );
        return Err(TelemetryError::NoUsablePackages {
            received: report.received,
            skipped: report.skipped,
        });
    }
    Collection::new(packages)
}

/// Reconstructs timed datasets from packages.
#[derive(Debug, Clone)]
pub struct Engine {
    config: EngineConfig,
    retimer: Retimer,
}

impl Default for Engine {
    fn default() -> Self {
        let config = EngineConfig::default();
        let retimer = Retimer::new(config.retime_config());
        Self { config, retimer }
    }
}

impl Engine {
    /// Validate `config` and build an engine from it.
    pub fn new(config: EngineConfig) -> AppResult<Self> {
        config.validate()?;
        let retimer = Retimer::new(config.retime_config());
        Ok(Self { config, retimer })
    }

    /// Configuration the engine was built with.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Retimer derived from the configuration.
    pub fn retimer(&self) -> &Retimer {
        &self.retimer
    }

    /// Reconstruct from parsed packages.
    pub fn reconstruct(&self, packages: Vec<Package>) -> AppResult<Reconstruction> {
        let received = packages.len();
        let collection = Collection::new(packages)?;
        self.run(
            &collection,
            ReconstructionReport {
                received,
                ..Default::default()
            },
        )
    }

    /// Reconstruct the packages overlapping `[start, end]` (seconds).
    pub fn reconstruct_between(
        &self,
        packages: Vec<Package>,
        start: f64,
        end: f64,
    ) -> AppResult<Reconstruction> {
        let received = packages.len();
        let mut collection = Collection::new(packages)?;
        collection.clip(start, end);
        self.run(
            &collection,
            ReconstructionReport {
                received,
                ..Default::default()
            },
        )
    }

    /// Parse raw JSON events and reconstruct; malformed events are skipped.
    pub fn reconstruct_raw<I, S>(&self, raws: I) -> AppResult<Reconstruction>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let (packages, parsed) = wire::parse_batch(raws);
        let report = ReconstructionReport {
            received: parsed.total,
            skipped: parsed.skipped,
            ..Default::default()
        };
        let collection = collect(packages, &report)?;
        self.run(&collection, report)
    }

    /// Fetch what `device` uploaded between `from` and `to` and reconstruct it.
    #[instrument(skip(self, store))]
    pub async fn fetch_and_reconstruct(
        &self,
        store: &dyn PackageStore,
        device: &str,
        from: f64,
        to: f64,
    ) -> AppResult<Reconstruction> {
        let (packages, fetched) = store::fetch_packages(store, device, from, to).await?;
        let report = ReconstructionReport {
            received: fetched.listed,
            skipped: fetched.skipped(),
            ..Default::default()
        };
        let collection = collect(packages, &report)?;
        self.run(&collection, report)
    }

    /// Segment overview of a collection with the configured gap tolerance.
    pub fn segment_summaries(&self, collection: &Collection) -> Vec<SegmentSummary> {
        summarize_segments(collection, self.config.reconstruction.eps_gap_secs)
    }

    /// Wave statistics of the heave channel.
    pub fn window_statistics(&self, dataset: &Dataset) -> AppResult<Vec<WindowStatistic>> {
        welch::window_statistics(dataset, HEAVE_CHANNEL, &self.config.window_config())
    }

    /// Wave statistics of the heave channel, windows computed in parallel.
    pub async fn window_statistics_parallel(
        &self,
        dataset: &Dataset,
    ) -> AppResult<Vec<WindowStatistic>> {
        welch::window_statistics_parallel(dataset, HEAVE_CHANNEL, &self.config.window_config())
            .await
    }

    fn run(
        &self,
        collection: &Collection,
        mut report: ReconstructionReport,
    ) -> AppResult<Reconstruction> {
        if collection.is_empty() {
            return Err(TelemetryError::EmptyCollection);
        }

        let dedup = collection.dedup_report();
        report.duplicates = dedup.duplicates;
        report.collisions = dedup.collisions;
        report.packages = collection.len();
        report.segments = collection.segment_count(self.config.reconstruction.eps_gap_secs);

        let dataset = self.retimer.retime_segments(collection)?;

        info!(
            device = dataset.device(),
            received = report.received,
            skipped = report.skipped,
            duplicates = report.duplicates,
            packages = report.packages,
            segments = report.segments,
            samples = dataset.len(),
            "Reconstructed dataset"
        );

        Ok(Reconstruction { dataset, report })
    }
}
