//! Engine runs over raw events, package stores and time ranges.

mod common;

use buoy_daq::config::EngineConfig;
use buoy_daq::pipeline::{Engine, ReconstructionReport};
use buoy_daq::store::{fetch_packages, MemoryStore, PackageEntry, PackageStore};
use buoy_daq::{AppResult, Collection, TelemetryError};
use common::*;
use tracing_test::traced_test;

fn engine_without_delay() -> Engine {
    let mut config = EngineConfig::default();
    config.reconstruction.signal_delay.enabled = false;
    Engine::new(config).unwrap()
}

#[test]
fn reconstructs_raw_events_and_counts_skips() {
    let starts = contiguous(4, T0);
    let mut raws: Vec<String> = starts
        .iter()
        .enumerate()
        .map(|(i, &s)| raw_event(i, s, N))
        .collect();
    raws.push(raws[1].clone());
    raws.push("{ truncated".to_string());

    let result = engine_without_delay().reconstruct_raw(&raws).unwrap();
    assert_eq!(
        result.report,
        ReconstructionReport {
            received: 6,
            skipped: 1,
            duplicates: 1,
            collisions: 0,
            packages: 4,
            segments: 1,
        }
    );
    assert_eq!(result.dataset.len(), 4 * N);
    assert_eq!(result.dataset.serial(), "wavebug24");
    assert!((result.dataset.time()[0] - T0).abs() < 1e-2);
}

#[test]
fn delay_compensation_follows_configuration() {
    let packages = packages(&contiguous(2, T0));
    let result = Engine::default().reconstruct(packages).unwrap();
    assert_eq!(result.dataset.signal_delay_ms(), Some(307));
    assert!((result.dataset.time()[0] - (T0 + 0.307)).abs() < 1e-2);
}

#[test]
fn reports_segments() {
    let mut starts = contiguous(5, T0);
    starts[3] += 100.0;
    starts[4] += 100.0;
    let result = engine_without_delay().reconstruct(packages(&starts)).unwrap();
    assert_eq!(result.report.segments, 2);
    assert_eq!(result.dataset.packages().len(), 5);
}

#[test]
fn reconstruct_between_clips() {
    let starts = contiguous(10, T0);
    let result = engine_without_delay()
        .reconstruct_between(packages(&starts), starts[3] + 1.0, starts[5] + 1.0)
        .unwrap();
    assert_eq!(result.report.received, 10);
    assert_eq!(result.report.packages, 3);
    assert_eq!(result.dataset.len(), 3 * N);

    let empty = engine_without_delay().reconstruct_between(packages(&starts), 0.0, 1.0);
    assert!(matches!(empty, Err(TelemetryError::EmptyCollection)));
}

#[test]
fn mixed_frequencies_abort() {
    let mut input = packages(&contiguous(2, T0));
    input.push(
        buoy_daq::Package::builder(DEVICE, 1_000, 26.0)
            .channel("z", vec![0.0; N])
            .build()
            .unwrap(),
    );
    assert!(matches!(
        engine_without_delay().reconstruct(input),
        Err(TelemetryError::FrequencyMismatch { .. })
    ));
}

#[test]
#[traced_test]
fn collisions_are_reported_and_logged() {
    let mut input = packages(&contiguous(3, T0));
    // Same header as package 1, different samples.
    let twin = buoy_daq::Package::builder(DEVICE, input[1].timestamp(), FS)
        .serial("wavebug24")
        .storage_id(Some(1))
        .channel("x", vec![0.0; N])
        .channel("y", vec![0.0; N])
        .channel("z", vec![5.0; N])
        .build()
        .unwrap();
    input.push(twin);

    let result = engine_without_delay().reconstruct(input).unwrap();
    assert_eq!(result.report.collisions, 1);
    assert_eq!(result.report.packages, 4);
    assert!(logs_contain("other fields mismatch"));

    // Both packages survive the merge with all of their samples.
    let ds = &result.dataset;
    assert_eq!(ds.packages().len(), result.report.packages);
    assert_eq!(ds.len(), ds.packages().len() * N);
    assert!(ds.validate().is_ok());
    let z = ds.channel("z").unwrap();
    assert_eq!(z.iter().filter(|&&v| v == 5.0).count(), N);
}

#[test]
fn all_malformed_events_report_counts() {
    let raws = ["{ truncated", "not json", r#"{"device": "dev:1"}"#];
    assert!(matches!(
        engine_without_delay().reconstruct_raw(raws),
        Err(TelemetryError::NoUsablePackages {
            received: 3,
            skipped: 3
        })
    ));

    let nothing: [&str; 0] = [];
    assert!(matches!(
        engine_without_delay().reconstruct_raw(nothing),
        Err(TelemetryError::EmptyCollection)
    ));
}

#[test]
fn segment_summaries_use_configured_gap() {
    let mut starts = contiguous(4, T0);
    starts[2] += 30.0;
    starts[3] += 30.0;
    let c = Collection::new(packages(&starts)).unwrap();
    let summaries = engine_without_delay().segment_summaries(&c);
    assert_eq!(summaries.len(), 2);
    assert_eq!(summaries[1].first_storage_id, Some(2));
}

async fn stocked_store(count: usize) -> MemoryStore {
    let store = MemoryStore::new();
    for (i, s) in contiguous(count, T0).into_iter().enumerate() {
        store
            .insert(DEVICE, format!("pck-{i}"), s + 120.0, raw_event(i, s, N))
            .await;
    }
    store
}

#[tokio::test]
async fn memory_store_lists_in_range() {
    let store = stocked_store(5).await;
    assert_eq!(store.len(DEVICE).await, 5);

    let entries = store.list(DEVICE, T0 + 120.0, T0 + 160.0).await.unwrap();
    let keys: Vec<&str> = entries.iter().map(|e| e.key.as_str()).collect();
    assert_eq!(keys, vec!["pck-0", "pck-1", "pck-2"]);

    assert!(store.list("dev:unknown", 0.0, f64::MAX).await.unwrap().is_empty());
    assert!(matches!(
        store.fetch(DEVICE, "missing").await,
        Err(TelemetryError::Store(_))
    ));
}

#[tokio::test]
async fn fetch_and_reconstruct_from_store() {
    let store = stocked_store(6).await;
    store.insert(DEVICE, "broken", T0 + 130.0, "not json").await;

    let result = engine_without_delay()
        .fetch_and_reconstruct(&store, DEVICE, 0.0, f64::MAX)
        .await
        .unwrap();
    assert_eq!(result.report.received, 7);
    assert_eq!(result.report.skipped, 1);
    assert_eq!(result.report.packages, 6);
    assert_eq!(result.dataset.len(), 6 * N);
}

/// Store failing to fetch keys ending in 1 or 3.
struct FlakyStore(MemoryStore);

#[async_trait::async_trait]
impl PackageStore for FlakyStore {
    async fn list(&self, device: &str, from: f64, to: f64) -> AppResult<Vec<PackageEntry>> {
        self.0.list(device, from, to).await
    }

    async fn fetch(&self, device: &str, key: &str) -> AppResult<String> {
        if key.ends_with('1') || key.ends_with('3') {
            return Err(TelemetryError::Store(format!("timeout fetching {key}")));
        }
        self.0.fetch(device, key).await
    }
}

#[tokio::test]
#[traced_test]
async fn fetch_failures_are_isolated() {
    let store = FlakyStore(stocked_store(5).await);
    let (packages, report) = fetch_packages(&store, DEVICE, 0.0, f64::MAX).await.unwrap();

    assert_eq!(packages.len(), 3);
    assert_eq!(report.listed, 5);
    assert_eq!(report.failed, 2);
    assert_eq!(report.skipped(), 2);
    assert!(logs_contain("failed to fetch package"));
}

#[tokio::test]
async fn wave_statistics_through_engine() {
    // 25 minutes of a small sawtooth on top of gravity.
    let count = (25.0 * 60.0 / period()) as usize;
    let starts = contiguous(count, 1_654_012_800.0);
    let raws: Vec<String> = starts
        .iter()
        .enumerate()
        .map(|(i, &s)| raw_event(i, s, N))
        .collect();

    let engine = engine_without_delay();
    let result = engine.reconstruct_raw(&raws).unwrap();

    let sequential = engine.window_statistics(&result.dataset).unwrap();
    let parallel = engine.window_statistics_parallel(&result.dataset).await.unwrap();
    assert!(!sequential.is_empty());
    assert_eq!(sequential, parallel);
    for s in &sequential {
        assert!(s.hm0.is_finite());
        assert!(s.hm0 >= 0.0);
    }
}
