//! Merging retimed datasets.
//!
//! Datasets are ordered by their first timestamp and concatenated package by package.
//! Every package owns one block of `package_length` samples on the sample axis and one
//! entry on the package axis; a block is kept or dropped together with its entry, so
//! both axes stay aligned.
//!
//! A package is dropped when an identical one was already kept: same anchor, storage id
//! and offset, and bitwise equal samples. Overlapping fetch ranges and re-synced segments
//! reproduce such packages. Packages sharing the header but not the samples are
//! collisions and both are kept, as in the duplicate detector.
//! Attributes are taken from the earliest dataset.

use super::dataset::{to_ns, Dataset, PackageAxis};
use crate::error::{AppResult, TelemetryError};
use crate::package::Channel;
use std::collections::HashMap;
use std::ops::Range;
use tracing::{debug, warn};

/// Header identity of a package block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct BlockKey {
    anchor_ns: i64,
    storage_id: Option<u32>,
    offset: u32,
}

impl BlockKey {
    fn of(axis: &PackageAxis, i: usize) -> Self {
        Self {
            anchor_ns: to_ns(axis.package_start[i]),
            storage_id: axis.storage_id[i],
            offset: axis.offset[i],
        }
    }
}

fn same_names(a: &[Channel], b: &[Channel]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.name == y.name)
}

fn empty_like(channels: &[Channel]) -> Vec<Channel> {
    channels
        .iter()
        .map(|c| Channel::new(c.name.clone(), Vec::new()))
        .collect()
}

/// Bitwise equality of two sample blocks across all channels.
fn same_block(a: &[Channel], ra: Range<usize>, b: &[Channel], rb: Range<usize>) -> bool {
    a.iter().zip(b).all(|(x, y)| {
        x.values[ra.clone()]
            .iter()
            .zip(&y.values[rb.clone()])
            .all(|(p, q)| p.to_bits() == q.to_bits())
    })
}

/// Check that `ds` is laid out as whole blocks of `n` samples per package.
fn check_blocks(ds: &Dataset, n: usize) -> AppResult<()> {
    if ds.package_length != n {
        return Err(TelemetryError::InconsistentPackageLength {
            expected: n,
            found: ds.package_length,
        });
    }
    if ds.len() != ds.packages.len() * n {
        return Err(TelemetryError::LengthMismatch(format!(
            "dataset of {} has {} samples for {} packages of {}",
            ds.device,
            ds.len(),
            ds.packages.len(),
            n
        )));
    }
    Ok(())
}

/// Concatenate datasets along time.
pub fn concat(mut datasets: Vec<Dataset>) -> AppResult<Dataset> {
    datasets.sort_by(|a, b| {
        let first = |d: &Dataset| d.time.first().copied().unwrap_or(f64::INFINITY);
        first(a).total_cmp(&first(b))
    });

    let mut iter = datasets.into_iter();
    let first = iter.next().ok_or(TelemetryError::EmptyMerge)?;
    let rest: Vec<Dataset> = iter.collect();

    let n = first.package_length;
    check_blocks(&first, n)?;
    if rest.is_empty() {
        return Ok(first);
    }

    for ds in &rest {
        if !same_names(&first.channels, &ds.channels) || !same_names(&first.raw, &ds.raw) {
            return Err(TelemetryError::ChannelMismatch(format!(
                "cannot merge dataset of {} starting at {:?} with channels of {}",
                ds.device,
                ds.time.first(),
                first.device
            )));
        }
        check_blocks(ds, n)?;
    }

    let capacity = first.len() + rest.iter().map(Dataset::len).sum::<usize>();
    let mut merged = Dataset {
        device: first.device.clone(),
        serial: first.serial.clone(),
        kind: first.kind,
        frequency: first.frequency,
        package_length: n,
        time: Vec::with_capacity(capacity),
        original_time: Vec::with_capacity(capacity),
        channels: empty_like(&first.channels),
        raw: empty_like(&first.raw),
        packages: PackageAxis::default(),
        estimated_frequency: first.estimated_frequency,
        signal_delay_ms: first.signal_delay_ms,
        stats: first.stats,
    };

    // Block index in `merged` of every kept package, by header.
    let mut kept: HashMap<BlockKey, Vec<usize>> = HashMap::new();
    let mut input_packages = 0;
    let mut collisions = 0;

    for ds in std::iter::once(&first).chain(&rest) {
        input_packages += ds.packages.len();

        for i in 0..ds.packages.len() {
            let src = i * n..(i + 1) * n;
            let bucket = kept.entry(BlockKey::of(&ds.packages, i)).or_default();

            let duplicate = bucket.iter().any(|&j| {
                let dst = j * n..(j + 1) * n;
                same_block(&merged.channels, dst.clone(), &ds.channels, src.clone())
                    && same_block(&merged.raw, dst, &ds.raw, src.clone())
            });
            if duplicate {
                continue;
            }
            if !bucket.is_empty() {
                collisions += 1;
            }

            bucket.push(merged.packages.len());
            merged.time.extend_from_slice(&ds.time[src.clone()]);
            merged
                .original_time
                .extend_from_slice(&ds.original_time[src.clone()]);
            for (dst, c) in merged.channels.iter_mut().zip(&ds.channels) {
                dst.values.extend_from_slice(&c.values[src.clone()]);
            }
            for (dst, c) in merged.raw.iter_mut().zip(&ds.raw) {
                dst.values.extend_from_slice(&c.values[src.clone()]);
            }
            merged.packages.push_from(&ds.packages, i);
        }
    }

    if collisions > 0 {
        warn!(
            collisions,
            "Merged packages share a header but differ in samples; keeping both"
        );
    }

    debug!(
        datasets = rest.len() + 1,
        samples = merged.len(),
        packages = merged.packages.len(),
        dropped_packages = input_packages - merged.packages.len(),
        "Merged datasets"
    );

    merged.validate()?;
    Ok(merged)
}
