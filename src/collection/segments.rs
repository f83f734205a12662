//! Segmenter.
//!
//! Walks the sorted members of a collection and cuts them into maximal runs where each
//! package starts within `eps_gap` seconds of the end of the previous one. Runs are
//! produced lazily, one [`Collection`] per run, in a single pass.

use super::Collection;
use crate::package::Package;
use serde::Serialize;
use std::fmt;
use std::iter::Peekable;
use std::vec::IntoIter;

/// Lazy iterator over the gap-free runs of a collection.
#[derive(Debug)]
pub struct Segments {
    packages: Peekable<IntoIter<Package>>,
    frequency: f64,
    eps_gap: f64,
}

impl Segments {
    pub(crate) fn new(packages: Vec<Package>, frequency: f64, eps_gap: f64) -> Self {
        Self {
            packages: packages.into_iter().peekable(),
            frequency,
            eps_gap,
        }
    }

    /// Gap tolerance in seconds.
    pub fn eps_gap(&self) -> f64 {
        self.eps_gap
    }
}

impl Iterator for Segments {
    type Item = Collection;

    fn next(&mut self) -> Option<Collection> {
        let first = self.packages.next()?;
        let mut end = first.end();
        let mut run = vec![first];

        while let Some(next) = self
            .packages
            .next_if(|next| (end - next.start()).abs() <= self.eps_gap)
        {
            end = next.end();
            run.push(next);
        }

        Some(Collection::from_parts(run, self.frequency))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let (lower, upper) = self.packages.size_hint();
        (lower.min(1), upper)
    }
}

impl std::iter::FusedIterator for Segments {}

/// Overview of one segment.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SegmentSummary {
    /// Start of the first package (s)
    pub start: f64,
    /// End of the last package (s)
    pub end: f64,
    /// `end - start` (s)
    pub duration: f64,
    /// Largest gap inside the segment (s)
    pub max_gap: Option<f64>,
    /// Gap from the end of the previous segment (s)
    pub segment_gap: Option<f64>,
    /// Number of packages
    pub packages: usize,
    /// Storage id of the first package
    pub first_storage_id: Option<u32>,
    /// Storage id of the last package
    pub last_storage_id: Option<u32>,
}

impl fmt::Display for SegmentSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let opt = |v: Option<f64>| v.map_or_else(|| "-".to_string(), |v| format!("{v:.2}"));
        let id = |v: Option<u32>| v.map_or_else(|| "-".to_string(), |v| v.to_string());
        write!(
            f,
            "{:.3} -> {:.3} ({:.1} s, max gap {} s, segment gap {} s, {} packages, storage id {} - {})",
            self.start,
            self.end,
            self.duration,
            opt(self.max_gap),
            opt(self.segment_gap),
            self.packages,
            id(self.first_storage_id),
            id(self.last_storage_id)
        )
    }
}

/// Summarize the segments of `collection`.
pub fn summarize_segments(collection: &Collection, eps_gap: f64) -> Vec<SegmentSummary> {
    let mut previous_end: Option<f64> = None;
    let mut summaries = Vec::new();

    for segment in collection.segments(eps_gap) {
        let (Some(start), Some(end)) = (segment.start(), segment.end()) else {
            continue;
        };
        let packages = segment.packages();
        summaries.push(SegmentSummary {
            start,
            end,
            duration: end - start,
            max_gap: segment.max_gap(),
            segment_gap: previous_end.map(|prev| start - prev),
            packages: packages.len(),
            first_storage_id: packages.first().and_then(Package::storage_id),
            last_storage_id: packages.last().and_then(Package::storage_id),
        });
        previous_end = Some(end);
    }

    summaries
}

#[cfg(test)]
mod tests {
    use super::*;

    const N: usize = 1024;
    const F: f64 = 52.0;

    fn collection(starts: &[f64]) -> Collection {
        let packages = starts
            .iter()
            .enumerate()
            .map(|(i, s)| {
                Package::builder("dev:1", (s * 1000.0).round() as i64, F)
                    .storage_id(Some(i as u32))
                    .channel("z", vec![i as f32; N])
                    .build()
                    .unwrap()
            })
            .collect();
        Collection::new(packages).unwrap()
    }

    fn p() -> f64 {
        N as f64 / F
    }

    #[test]
    fn single_package_yields_one_segment() {
        let c = collection(&[1000.0]);
        let segments: Vec<Collection> = c.segments(10.0).collect();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0], c);
    }

    #[test]
    fn splits_on_gap() {
        let c = collection(&[1000.0, 1000.0 + p(), 1000.0 + 2.0 * p() + 60.0]);
        let sizes: Vec<usize> = c.segments(10.0).map(|s| s.len()).collect();
        assert_eq!(sizes, vec![2, 1]);
        assert_eq!(c.segment_count(10.0), 2);
    }

    #[test]
    fn small_gaps_stay_together() {
        let c = collection(&[1000.0, 1000.0 + p() + 9.0, 1000.0 + 2.0 * p() + 18.0]);
        assert_eq!(c.segments(10.0).count(), 1);
        assert_eq!(c.segments(5.0).count(), 3);
    }

    #[test]
    fn gap_equal_to_limit_stays_in_segment() {
        // 1024 samples at 64 Hz last exactly 16 s, so gaps are exact in whole ms.
        let at = |timestamp: i64, fill: f32| {
            Package::builder("dev:1", timestamp, 64.0)
                .channel("z", vec![fill; N])
                .build()
                .unwrap()
        };

        let on_limit = Collection::new(vec![at(1_000_000, 0.0), at(1_026_000, 1.0)]).unwrap();
        assert_eq!(on_limit.max_gap(), Some(10.0));
        assert!(on_limit.is_gap_free(10.0));
        assert_eq!(on_limit.segments(10.0).count(), 1);
        assert_eq!(on_limit.segment_count(10.0), 1);

        let above = Collection::new(vec![at(1_000_000, 0.0), at(1_026_001, 1.0)]).unwrap();
        assert!(!above.is_gap_free(10.0));
        assert_eq!(above.segments(10.0).count(), 2);
        assert_eq!(above.segment_count(10.0), 2);

        // Overlaps count by magnitude.
        let overlap = Collection::new(vec![at(1_000_000, 0.0), at(1_006_000, 1.0)]).unwrap();
        assert_eq!(overlap.max_gap(), Some(-10.0));
        assert_eq!(overlap.segments(10.0).count(), 1);
    }

    #[test]
    fn iterator_is_fused() {
        let mut segments = collection(&[1000.0]).into_segments(10.0);
        assert!(segments.next().is_some());
        assert!(segments.next().is_none());
        assert!(segments.next().is_none());
    }

    #[test]
    fn summaries() {
        let c = collection(&[1000.0, 1000.0 + p(), 1000.0 + 2.0 * p() + 60.0]);
        let summary = summarize_segments(&c, 10.0);
        assert_eq!(summary.len(), 2);

        assert_eq!(summary[0].packages, 2);
        assert_eq!(summary[0].first_storage_id, Some(0));
        assert_eq!(summary[0].last_storage_id, Some(1));
        assert_eq!(summary[0].segment_gap, None);

        assert_eq!(summary[1].packages, 1);
        assert_eq!(summary[1].max_gap, None);
        assert!((summary[1].segment_gap.unwrap() - 60.0).abs() < 1e-2);
        assert!(summary[1].to_string().contains("1 packages"));
    }
}
