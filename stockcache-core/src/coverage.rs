//! Coverage bookkeeping for ranged datasets.
//!
//! `covered_start..=covered_end` is the hull of everything ever fetched and
//! only ever widens. Whether the hull alone decides cache hits depends on
//! [`CoverageMode`]:
//!
//! - [`CoverageMode::Hull`] trusts the hull. Two far-apart requests make
//!   the gap between them look cached although it was never fetched.
//! - [`CoverageMode::Segments`] also keeps the disjoint list of fetched
//!   intervals and only reports a hit when one segment contains the whole
//!   request. Intervals that overlap or abut (next day) coalesce.

use crate::dates::DateRange;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// How coverage is tracked and tested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoverageMode {
    /// Disjoint fetched intervals.
    #[default]
    Segments,
    /// Single min/max hull.
    Hull,
}

/// Sidecar record describing what a ranged table is complete for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverageMetadata {
    pub covered_start: NaiveDate,
    pub covered_end: NaiveDate,
    pub last_update: NaiveDateTime,
    /// Sorted, disjoint, non-touching fetched intervals.
    #[serde(default)]
    pub segments: Vec<DateRange>,
    #[serde(default)]
    pub row_count: usize,
    #[serde(default)]
    pub data_hash: String,
}

/// How well the cache covers a requested range.
#[derive(Debug, Clone, PartialEq)]
pub enum CoverageResult {
    NotCached,
    FullyCovered,
    PartiallyCovered {
        cached_start: NaiveDate,
        cached_end: NaiveDate,
    },
}

impl CoverageMetadata {
    /// Metadata for a first successful fetch of `range`.
    pub fn initial(range: DateRange, last_update: NaiveDateTime) -> Self {
        Self {
            covered_start: range.start(),
            covered_end: range.end(),
            last_update,
            segments: vec![range],
            row_count: 0,
            data_hash: String::new(),
        }
    }

    /// The hull as a range, or `None` if the record is inverted.
    pub fn hull(&self) -> Option<DateRange> {
        DateRange::new(self.covered_start, self.covered_end).ok()
    }

    /// Sanity-check a record loaded from disk and fill in segments for
    /// records written before segments were tracked.
    ///
    /// Returns `None` when the record cannot be trusted.
    pub fn validated(mut self) -> Option<Self> {
        let hull = self.hull()?;
        if self.segments.is_empty() {
            self.segments = vec![hull];
        }
        let mut prev: Option<DateRange> = None;
        for seg in &self.segments {
            if seg.start() > seg.end() || !hull.covers(seg) {
                return None;
            }
            if let Some(p) = prev {
                if p.touches(seg) || p.start() > seg.start() {
                    return None;
                }
            }
            prev = Some(*seg);
        }
        Some(self)
    }

    /// Whether `range` is served entirely from the table.
    pub fn covers(&self, range: &DateRange, mode: CoverageMode) -> bool {
        match mode {
            CoverageMode::Hull => self.hull().is_some_and(|h| h.covers(range)),
            CoverageMode::Segments => self.segments.iter().any(|s| s.covers(range)),
        }
    }

    /// Classify `range` against this record.
    pub fn classify(&self, range: &DateRange, mode: CoverageMode) -> CoverageResult {
        if self.covers(range, mode) {
            CoverageResult::FullyCovered
        } else {
            CoverageResult::PartiallyCovered {
                cached_start: self.covered_start,
                cached_end: self.covered_end,
            }
        }
    }

    /// Record that `range` has now been fetched and merged.
    ///
    /// The hull widens to include `range`; it never shrinks.
    pub fn extend(&mut self, range: DateRange, last_update: NaiveDateTime) {
        self.covered_start = self.covered_start.min(range.start());
        self.covered_end = self.covered_end.max(range.end());
        self.last_update = last_update;
        self.segments = insert_segment(std::mem::take(&mut self.segments), range);
    }
}

/// Insert `range` into a sorted disjoint list, coalescing anything it
/// overlaps or abuts.
fn insert_segment(segments: Vec<DateRange>, range: DateRange) -> Vec<DateRange> {
    let mut out = Vec::with_capacity(segments.len() + 1);
    let mut pending = range;
    let mut placed = false;

    for seg in segments {
        if placed {
            out.push(seg);
        } else if seg.touches(&pending) {
            pending = pending.hull(&seg);
        } else if seg.end() < pending.start() {
            out.push(seg);
        } else {
            out.push(pending);
            out.push(seg);
            placed = true;
        }
    }
    if !placed {
        out.push(pending);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn r(a: NaiveDate, b: NaiveDate) -> DateRange {
        DateRange::new(a, b).unwrap()
    }

    fn ts() -> NaiveDateTime {
        d(2024, 1, 1).and_hms_opt(0, 0, 0).unwrap()
    }

    #[test]
    fn contiguous_requests_coalesce() {
        let mut meta = CoverageMetadata::initial(r(d(2023, 1, 1), d(2023, 1, 31)), ts());
        meta.extend(r(d(2023, 2, 1), d(2023, 2, 10)), ts());

        assert_eq!(meta.covered_start, d(2023, 1, 1));
        assert_eq!(meta.covered_end, d(2023, 2, 10));
        assert_eq!(meta.segments, vec![r(d(2023, 1, 1), d(2023, 2, 10))]);
    }

    #[test]
    fn disjoint_requests_stay_apart() {
        let mut meta = CoverageMetadata::initial(r(d(2023, 1, 1), d(2023, 1, 31)), ts());
        meta.extend(r(d(2023, 6, 1), d(2023, 6, 30)), ts());

        let gap = r(d(2023, 3, 1), d(2023, 3, 31));
        assert!(meta.covers(&gap, CoverageMode::Hull));
        assert!(!meta.covers(&gap, CoverageMode::Segments));
        assert_eq!(meta.segments.len(), 2);
    }

    #[test]
    fn bridging_request_merges_segments() {
        let mut meta = CoverageMetadata::initial(r(d(2023, 1, 1), d(2023, 1, 31)), ts());
        meta.extend(r(d(2023, 6, 1), d(2023, 6, 30)), ts());
        meta.extend(r(d(2023, 8, 1), d(2023, 8, 31)), ts());
        meta.extend(r(d(2023, 1, 15), d(2023, 6, 10)), ts());

        assert_eq!(
            meta.segments,
            vec![r(d(2023, 1, 1), d(2023, 6, 30)), r(d(2023, 8, 1), d(2023, 8, 31))]
        );
    }

    #[test]
    fn earlier_request_is_inserted_in_order() {
        let mut meta = CoverageMetadata::initial(r(d(2023, 6, 1), d(2023, 6, 30)), ts());
        meta.extend(r(d(2023, 1, 1), d(2023, 1, 31)), ts());
        assert_eq!(meta.segments[0], r(d(2023, 1, 1), d(2023, 1, 31)));
        assert_eq!(meta.covered_start, d(2023, 1, 1));
        assert_eq!(meta.covered_end, d(2023, 6, 30));
    }

    #[test]
    fn legacy_record_without_segments_uses_hull() {
        let json = r#"{"covered_start":"2023-01-01","covered_end":"2023-01-31","last_update":"2023-02-01T10:00:00"}"#;
        let meta: CoverageMetadata = serde_json::from_str(json).unwrap();
        let meta = meta.validated().unwrap();
        assert_eq!(meta.segments, vec![r(d(2023, 1, 1), d(2023, 1, 31))]);
        assert!(meta.covers(&r(d(2023, 1, 10), d(2023, 1, 20)), CoverageMode::Segments));
    }

    #[test]
    fn inverted_record_is_rejected() {
        let mut meta = CoverageMetadata::initial(r(d(2023, 1, 1), d(2023, 1, 31)), ts());
        meta.covered_start = d(2023, 3, 1);
        assert!(meta.validated().is_none());
    }

    #[test]
    fn classify_reports_partial_with_hull() {
        let meta = CoverageMetadata::initial(r(d(2023, 1, 1), d(2023, 1, 31)), ts());
        assert_eq!(
            meta.classify(&r(d(2023, 1, 20), d(2023, 2, 5)), CoverageMode::Segments),
            CoverageResult::PartiallyCovered {
                cached_start: d(2023, 1, 1),
                cached_end: d(2023, 1, 31),
            }
        );
    }
}
