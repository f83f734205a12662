//! Package store interface.
//!
//! Raw packages live in an external store (the data hub, or a local cache of it). The
//! engine only needs two operations: list the packages a device uploaded in a time range
//! and fetch the raw content of one of them. [`MemoryStore`] keeps everything in memory
//! and serves tests and callers that already hold raw events.

use crate::error::{AppResult, TelemetryError};
use crate::package::wire::{self, ParseReport};
use crate::package::Package;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, error};

/// A listed package.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageEntry {
    /// Store key of the raw package
    pub key: String,
    /// Upload time, seconds since the UNIX epoch
    pub received: f64,
}

/// Source of raw packages.
#[async_trait::async_trait]
pub trait PackageStore: Send + Sync {
    /// Packages uploaded by `device` with `from <= received <= to`, ordered by upload time.
    async fn list(&self, device: &str, from: f64, to: f64) -> AppResult<Vec<PackageEntry>>;

    /// Raw JSON event of one package.
    async fn fetch(&self, device: &str, key: &str) -> AppResult<String>;
}

#[derive(Debug, Clone)]
struct Stored {
    entry: PackageEntry,
    raw: String,
}

/// In-memory package store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    devices: RwLock<HashMap<String, Vec<Stored>>>,
}

impl MemoryStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a raw package.
    pub async fn insert(
        &self,
        device: impl Into<String>,
        key: impl Into<String>,
        received: f64,
        raw: impl Into<String>,
    ) {
        let key = key.into();
        let mut devices = self.devices.write().await;
        let packages = devices.entry(device.into()).or_default();
        packages.retain(|s| s.entry.key != key);
        packages.push(Stored {
            entry: PackageEntry { key, received },
            raw: raw.into(),
        });
    }

    /// Number of packages stored for `device`.
    pub async fn len(&self, device: &str) -> usize {
        self.devices.read().await.get(device).map_or(0, Vec::len)
    }
}

#[async_trait::async_trait]
impl PackageStore for MemoryStore {
    async fn list(&self, device: &str, from: f64, to: f64) -> AppResult<Vec<PackageEntry>> {
        let devices = self.devices.read().await;
        let mut entries: Vec<PackageEntry> = devices
            .get(device)
            .map(|packages| {
                packages
                    .iter()
                    .filter(|s| s.entry.received >= from && s.entry.received <= to)
                    .map(|s| s.entry.clone())
                    .collect()
            })
            .unwrap_or_default();
        entries.sort_by(|a, b| a.received.total_cmp(&b.received));
        Ok(entries)
    }

    async fn fetch(&self, device: &str, key: &str) -> AppResult<String> {
        let devices = self.devices.read().await;
        devices
            .get(device)
            .and_then(|packages| packages.iter().find(|s| s.entry.key == key))
            .map(|s| s.raw.clone())
            .ok_or_else(|| TelemetryError::Store(format!("no package '{key}' for {device}")))
    }
}

/// Counts gathered while fetching a time range.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FetchReport {
    /// Packages listed by the store
    pub listed: usize,
    /// Packages whose content could not be fetched
    pub failed: usize,
    /// Parse counts of the fetched content
    pub parse: ParseReport,
}

impl FetchReport {
    /// Listed packages that did not make it into the result.
    pub fn skipped(&self) -> usize {
        self.failed + self.parse.skipped
    }
}

/// List, fetch and parse the packages `device` uploaded between `from` and `to`.
///
/// Failing to list aborts. A package that cannot be fetched or parsed is logged and
/// counted; the rest of the range proceeds.
pub async fn fetch_packages(
    store: &dyn PackageStore,
    device: &str,
    from: f64,
    to: f64,
) -> AppResult<(Vec<Package>, FetchReport)> {
    let entries = store.list(device, from, to).await?;
    debug!(device, from, to, listed = entries.len(), "Fetching packages");

    let results =
        futures::future::join_all(entries.iter().map(|e| store.fetch(device, &e.key))).await;

    let mut failed = 0;
    let mut raws = Vec::with_capacity(results.len());
    for (entry, result) in entries.iter().zip(results) {
        match result {
            Ok(raw) => raws.push(raw),
            Err(e) => {
                failed += 1;
                error!(device, key = %entry.key, error = %e, "failed to fetch package, skipping");
            }
        }
    }

    let (packages, parse) = wire::parse_batch(&raws);

    Ok((
        packages,
        FetchReport {
            listed: entries.len(),
            failed,
            parse,
        },
    ))
}
