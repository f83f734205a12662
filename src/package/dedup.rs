//! Duplicate detection.
//!
//! Duplicates occur when a buoy sends a package, the modem reports an ambiguous
//! failure, and the buoy retries although the first attempt went through. Header,
//! timestamp and every sample of the retransmission are identical, so duplicates can be
//! identified exactly.
//!
//! Hashing uses only the identity header ([`DuplicateKey`]). Samples are always compared
//! before two packages are treated as the same: a matching key with differing samples is
//! a collision, which is logged and both packages are kept.

use super::Package;
use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Identity header used to bucket packages.
///
/// Floating point positions are compared bitwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DuplicateKey {
    timestamp: i64,
    storage_id: Option<u32>,
    storage_version: u32,
    lon: Option<u64>,
    lat: Option<u64>,
    offset: u32,
}

impl DuplicateKey {
    /// Identity header of `pck`.
    pub fn of(pck: &Package) -> Self {
        let position = pck.position();
        Self {
            timestamp: pck.timestamp(),
            storage_id: pck.storage_id(),
            storage_version: pck.storage_version(),
            lon: position.map(|p| p.lon.to_bits()),
            lat: position.map(|p| p.lat.to_bits()),
            offset: pck.offset(),
        }
    }
}

/// Outcome of comparing two packages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Match {
    /// Same identity header and identical samples
    Duplicate,
    /// Same identity header but different samples
    Collision,
    /// Different identity headers
    Distinct,
}

/// Compare two packages without logging.
pub fn classify(a: &Package, b: &Package) -> Match {
    if DuplicateKey::of(a) != DuplicateKey::of(b) {
        return Match::Distinct;
    }

    let same = |x: &[super::Channel], y: &[super::Channel]| {
        x.len() == y.len() && x.iter().zip(y).all(|(p, q)| p.same_samples(q))
    };

    if same(a.channels(), b.channels()) && same(a.raw_channels(), b.raw_channels()) {
        Match::Duplicate
    } else {
        Match::Collision
    }
}

/// Two packages are duplicates iff their identity headers are equal and every sample
/// channel is element-wise equal.
pub fn is_duplicate(a: &Package, b: &Package) -> bool {
    classify(a, b) == Match::Duplicate
}

/// Counts gathered while deduplicating a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DedupReport {
    /// Packages offered
    pub input: usize,
    /// Packages dropped as exact duplicates
    pub duplicates: usize,
    /// Packages kept although their identity header matched an earlier one
    pub collisions: usize,
}

impl DedupReport {
    /// Packages left after removing duplicates.
    pub fn kept(&self) -> usize {
        self.input - self.duplicates
    }
}

/// Remove exact duplicates, keeping the first occurrence and the input order.
pub fn deduplicate(packages: Vec<Package>) -> (Vec<Package>, DedupReport) {
    let mut report = DedupReport {
        input: packages.len(),
        ..Default::default()
    };

    let mut buckets: HashMap<DuplicateKey, Vec<usize>> = HashMap::with_capacity(packages.len());
    let mut unique: Vec<Package> = Vec::with_capacity(packages.len());

    debug!(packages = packages.len(), "Removing duplicates..");

    for pck in packages {
        let bucket = buckets.entry(DuplicateKey::of(&pck)).or_default();

        if bucket.iter().any(|&i| is_duplicate(&unique[i], &pck)) {
            report.duplicates += 1;
            continue;
        }

        if !bucket.is_empty() {
            report.collisions += 1;
            warn!(
                device = pck.device(),
                timestamp = pck.timestamp(),
                storage_id = ?pck.storage_id(),
                "duplicate timestamp {:.3}, but other fields mismatch; keeping both packages",
                pck.start()
            );
        }

        bucket.push(unique.len());
        unique.push(pck);
    }

    if report.duplicates > 0 {
        warn!("Removed {} duplicates.", report.duplicates);
    }

    (unique, report)
}
