//! Collections of packages.
//!
//! A [`Collection`] is a non-empty, duplicate-free batch of packages from one device,
//! sorted by start time, all sharing one declared frequency. It is the unit the
//! segmenter and the retimer work on.
//!
//! After construction a collection only changes through [`Collection::clip`] and
//! [`Collection::merge`] (or `+`), both of which act on a single owned instance.

pub mod segments;

use crate::error::{AppResult, TelemetryError};
use crate::package::dedup::{self, DedupReport};
use crate::package::Package;
use serde::Serialize;
use std::collections::BTreeMap;
use std::ops::Add;
use tracing::debug;

pub use segments::{summarize_segments, SegmentSummary, Segments};

/// Sorted, duplicate-free packages sharing one frequency.
#[derive(Debug, Clone)]
pub struct Collection {
    packages: Vec<Package>,
    frequency: f64,
    report: DedupReport,
}

/// Summary attributes of a collection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CollectionStats {
    /// Number of member packages
    pub number_of_packages: usize,
    /// Largest `next.start - previous.end`, `None` for fewer than two packages
    pub max_gap: Option<f64>,
}

fn common_frequency(packages: &[Package]) -> AppResult<f64> {
    let first = packages.first().ok_or(TelemetryError::EmptyCollection)?;
    let expected = first.frequency();

    match packages
        .iter()
        .find(|p| p.frequency().to_bits() != expected.to_bits())
    {
        Some(other) => Err(TelemetryError::FrequencyMismatch {
            expected,
            found: other.frequency(),
        }),
        None => Ok(expected),
    }
}

impl Collection {
    /// Build a collection: removes exact duplicates and sorts by start time.
    ///
    /// Fails on an empty list or on differing declared frequencies.
    pub fn new(packages: Vec<Package>) -> AppResult<Self> {
        let frequency = common_frequency(&packages)?;

        let (mut packages, report) = dedup::deduplicate(packages);
        packages.sort_by(|a, b| a.start().total_cmp(&b.start()));

        debug!(
            packages = packages.len(),
            duplicates = report.duplicates,
            frequency,
            "Built collection"
        );

        Ok(Self {
            packages,
            frequency,
            report,
        })
    }

    /// Build a collection from packages that are already sorted and duplicate-free,
    /// e.g. a run taken out of another collection. Only emptiness and the common
    /// frequency are checked.
    pub fn from_sorted_unique(packages: Vec<Package>) -> AppResult<Self> {
        let frequency = common_frequency(&packages)?;
        Ok(Self::from_parts(packages, frequency))
    }

    /// Infallible constructor for runs of an existing collection.
    pub(crate) fn from_parts(packages: Vec<Package>, frequency: f64) -> Self {
        let report = DedupReport {
            input: packages.len(),
            ..Default::default()
        };
        Self {
            packages,
            frequency,
            report,
        }
    }

    /// Keep packages overlapping `[start, end]` (seconds). The collection may become
    /// empty.
    pub fn clip(&mut self, start: f64, end: f64) -> &mut Self {
        let before = self.packages.len();
        self.packages.retain(|p| p.end() >= start && p.start() <= end);
        debug!(
            before,
            after = self.packages.len(),
            start,
            end,
            "Clipped collection"
        );
        self
    }

    /// Union of two collections, de-duplicated and re-sorted.
    pub fn merge(self, other: Collection) -> AppResult<Collection> {
        let mut packages = self.packages;
        packages.extend(other.packages);
        Collection::new(packages)
    }

    /// Largest gap `next.start - previous.end` between consecutive packages. Negative
    /// values mean the packages overlap.
    pub fn max_gap(&self) -> Option<f64> {
        self.gaps().reduce(f64::max)
    }

    /// Largest absolute distance between consecutive packages.
    pub(crate) fn max_abs_gap(&self) -> Option<f64> {
        self.gaps().map(f64::abs).reduce(f64::max)
    }

    fn gaps(&self) -> impl Iterator<Item = f64> + '_ {
        self.packages.windows(2).map(|w| w[1].start() - w[0].end())
    }

    /// Whether every pair of consecutive packages is within `eps_gap` seconds, i.e. the
    /// collection forms exactly one segment.
    pub fn is_gap_free(&self, eps_gap: f64) -> bool {
        self.max_abs_gap().map_or(true, |gap| gap <= eps_gap)
    }

    /// Split into maximal runs with no gap larger than `eps_gap` seconds.
    pub fn segments(&self, eps_gap: f64) -> Segments {
        Segments::new(self.packages.clone(), self.frequency, eps_gap)
    }

    /// Number of segments [`Collection::segments`] would yield, without copying packages.
    pub fn segment_count(&self, eps_gap: f64) -> usize {
        if self.packages.is_empty() {
            return 0;
        }
        1 + self.gaps().filter(|gap| gap.abs() > eps_gap).count()
    }

    /// Like [`Collection::segments`], consuming the collection.
    pub fn into_segments(self, eps_gap: f64) -> Segments {
        Segments::new(self.packages, self.frequency, eps_gap)
    }

    /// Number of member packages.
    pub fn len(&self) -> usize {
        self.packages.len()
    }

    /// Whether clipping removed every package.
    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    /// Iterate over members in start order.
    pub fn iter(&self) -> std::slice::Iter<'_, Package> {
        self.packages.iter()
    }

    /// Members in start order.
    pub fn packages(&self) -> &[Package] {
        &self.packages
    }

    /// Take the members out of the collection.
    pub fn into_packages(self) -> Vec<Package> {
        self.packages
    }

    /// Declared frequency shared by all members (Hz).
    pub fn frequency(&self) -> f64 {
        self.frequency
    }

    /// Start of the first package.
    pub fn start(&self) -> Option<f64> {
        self.packages.first().map(Package::start)
    }

    /// End of the last package.
    pub fn end(&self) -> Option<f64> {
        self.packages.last().map(Package::end)
    }

    /// Sum of package durations, excluding gaps.
    pub fn duration(&self) -> f64 {
        self.packages.iter().map(Package::duration).sum()
    }

    /// Device of the first package.
    pub fn device(&self) -> Option<&str> {
        self.packages.first().map(Package::device)
    }

    /// Buoy name of the first package.
    pub fn serial(&self) -> Option<&str> {
        self.packages.first().map(Package::serial)
    }

    /// Sample count of the first package.
    pub fn package_length(&self) -> Option<usize> {
        self.packages.first().map(Package::len)
    }

    /// Package count and largest gap, as written into dataset attributes.
    pub fn stats(&self) -> CollectionStats {
        CollectionStats {
            number_of_packages: self.packages.len(),
            max_gap: self.max_gap(),
        }
    }

    /// Duplicate counts from construction.
    pub fn dedup_report(&self) -> DedupReport {
        self.report
    }
}

impl PartialEq for Collection {
    fn eq(&self, other: &Self) -> bool {
        self.frequency.to_bits() == other.frequency.to_bits() && self.packages == other.packages
    }
}

impl Add for Collection {
    type Output = AppResult<Collection>;

    fn add(self, rhs: Collection) -> Self::Output {
        self.merge(rhs)
    }
}

impl<'a> IntoIterator for &'a Collection {
    type Item = &'a Package;
    type IntoIter = std::slice::Iter<'a, Package>;

    fn into_iter(self) -> Self::IntoIter {
        self.packages.iter()
    }
}

/// Keep packages whose declared frequency is within `tolerance` Hz of `frequency`.
pub fn filter_frequency(packages: Vec<Package>, frequency: f64, tolerance: f64) -> Vec<Package> {
    let before = packages.len();
    let kept: Vec<Package> = packages
        .into_iter()
        .filter(|p| (p.frequency() - frequency).abs() <= tolerance)
        .collect();
    debug!(
        before,
        after = kept.len(),
        frequency,
        tolerance,
        "Filtered packages on frequency"
    );
    kept
}

/// Group packages by exact declared frequency, ascending.
pub fn partition_by_frequency(packages: Vec<Package>) -> Vec<(f64, Vec<Package>)> {
    // Positive finite f64 bit patterns sort like the values.
    let mut groups: BTreeMap<u64, Vec<Package>> = BTreeMap::new();
    for pck in packages {
        groups.entry(pck.frequency().to_bits()).or_default().push(pck);
    }
    groups
        .into_iter()
        .map(|(bits, group)| (f64::from_bits(bits), group))
        .collect()
}
