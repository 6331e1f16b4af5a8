//! Range-covered cache for date-indexed series.
//!
//! Each `(entity, dataset)` pair has one table and one coverage record.
//! A request is served from disk when the coverage says the whole range
//! was fetched before; otherwise exactly the requested range is fetched,
//! merged into the table (one row per date, newest fetch wins) and the
//! coverage widened. The table is persisted before the metadata so a crash
//! in between leaves metadata describing a subset of what is on disk.

use super::{CacheError, CoverageResult};
use crate::coverage::{CoverageMetadata, CoverageMode};
use crate::dataset::DatasetKind;
use crate::dates::{DateFormats, DateRange};
use crate::locks::KeyedLocks;
use crate::provider::FetchError;
use crate::store::EntityStore;
use crate::table::DatasetTable;
use chrono::{NaiveDate, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What was found on disk for one key.
struct Cached {
    table: Option<DatasetTable>,
    meta: Option<CoverageMetadata>,
}

pub struct RangeCoverageCache {
    store: Arc<EntityStore>,
    locks: Arc<KeyedLocks>,
    mode: CoverageMode,
    formats: DateFormats,
}

impl RangeCoverageCache {
    pub fn new(store: Arc<EntityStore>, locks: Arc<KeyedLocks>) -> Self {
        Self {
            store,
            locks,
            mode: CoverageMode::default(),
            formats: DateFormats::default(),
        }
    }

    pub fn with_mode(mut self, mode: CoverageMode) -> Self {
        self.mode = mode;
        self
    }

    /// Formats tried when a fetched date column arrives as text.
    pub fn with_date_formats(mut self, formats: DateFormats) -> Self {
        self.formats = formats;
        self
    }

    pub fn mode(&self) -> CoverageMode {
        self.mode
    }

    pub fn store(&self) -> &Arc<EntityStore> {
        &self.store
    }

    /// How well the cache already covers `range`, without fetching.
    pub fn coverage(&self, entity: &str, kind: &DatasetKind, range: &DateRange) -> CoverageResult {
        let Some(date_col) = ranged_date_column(kind) else {
            return CoverageResult::NotCached;
        };
        match self.load_cached(entity, kind, date_col).meta {
            Some(meta) => meta.classify(range, self.mode),
            None => CoverageResult::NotCached,
        }
    }

    /// Rows of `kind` for `entity` dated within `start..=end`, ascending.
    ///
    /// `fetch` is called at most once, with exactly the requested range,
    /// and only when the coverage does not already contain it. A fetch
    /// error is returned unchanged and leaves the cache as it was.
    pub fn get_range<F>(
        &self,
        entity: &str,
        kind: &DatasetKind,
        start: NaiveDate,
        end: NaiveDate,
        fetch: F,
    ) -> Result<DatasetTable, CacheError>
    where
        F: FnOnce(DateRange) -> Result<DatasetTable, FetchError>,
    {
        let range = DateRange::new(start, end)?;
        let date_col =
            ranged_date_column(kind).ok_or_else(|| CacheError::NotRanged(kind.storage_name()))?;

        let key = format!("{entity}/{}", kind.storage_name());
        self.locks
            .with_lock(&key, || self.get_range_locked(entity, kind, date_col, range, fetch))
    }

    fn get_range_locked<F>(
        &self,
        entity: &str,
        kind: &DatasetKind,
        date_col: &str,
        range: DateRange,
        fetch: F,
    ) -> Result<DatasetTable, CacheError>
    where
        F: FnOnce(DateRange) -> Result<DatasetTable, FetchError>,
    {
        let Cached { table, meta } = self.load_cached(entity, kind, date_col);

        match &meta {
            Some(m) if m.covers(&range, self.mode) => {
                debug!(entity, dataset = %kind, %range, "cache hit");
                let table = match table {
                    Some(t) => t,
                    None => DatasetTable::new([date_col])?,
                };
                let mut slice =
                    table.filter_dates(date_col, Some(range.start()), Some(range.end()))?;
                slice.sort_by_date(date_col)?;
                return Ok(slice);
            }
            Some(m) => info!(
                entity,
                dataset = %kind,
                %range,
                cached_start = %m.covered_start,
                cached_end = %m.covered_end,
                "partial cache hit, fetching requested range"
            ),
            None => info!(entity, dataset = %kind, %range, "cache miss, fetching"),
        }

        let fresh = fetch(range)?;
        let mut merged = match self.prepare_fetched(fresh, kind, date_col)? {
            Some(fresh) => DatasetTable::merge_by_date(table, fresh, date_col)?,
            None => match table {
                Some(t) => t,
                None => DatasetTable::new([date_col])?,
            },
        };

        // Return exactly what a later hit would read back.
        merged.unify_column_types();

        let now = Utc::now().naive_utc();
        let mut meta = match meta {
            Some(mut m) => {
                m.extend(range, now);
                m
            }
            None => CoverageMetadata::initial(range, now),
        };
        meta.row_count = merged.height();
        meta.data_hash = merged.content_hash();

        self.store.save_table(entity, kind, &merged)?;
        self.store.save_metadata(entity, kind, &meta)?;
        info!(
            entity,
            dataset = %kind,
            rows = merged.height(),
            covered_start = %meta.covered_start,
            covered_end = %meta.covered_end,
            "cache updated"
        );

        Ok(merged.filter_dates(date_col, Some(range.start()), Some(range.end()))?)
    }

    /// Check and normalize a fetched table. `None` means the fetch returned
    /// nothing to merge.
    fn prepare_fetched(
        &self,
        mut fresh: DatasetTable,
        kind: &DatasetKind,
        date_col: &str,
    ) -> Result<Option<DatasetTable>, CacheError> {
        if fresh.is_empty() {
            debug!(dataset = %kind, "fetch returned no rows");
            return Ok(None);
        }
        if !fresh.has_column(date_col) {
            return Err(CacheError::MissingColumn {
                column: date_col.to_string(),
                dataset: kind.storage_name(),
            });
        }
        let dropped = fresh.normalize_dates(date_col, &self.formats)?;
        if dropped > 0 {
            warn!(dataset = %kind, column = date_col, dropped, "dropping fetched rows with unparseable dates");
        }
        Ok(Some(fresh))
    }

    /// Load table and metadata, discarding anything that cannot be trusted.
    fn load_cached(&self, entity: &str, kind: &DatasetKind, date_col: &str) -> Cached {
        let meta = self.store.load_metadata(entity, kind);
        let table = match self.store.load_table(entity, kind) {
            Some(t) if !t.has_column(date_col) => {
                warn!(entity, dataset = %kind, column = date_col, "cached table lacks its date column, discarding");
                self.store.quarantine_table(entity, kind);
                None
            }
            Some(mut t) => {
                match t.normalize_dates(date_col, &self.formats) {
                    Ok(n) if n > 0 => {
                        warn!(entity, dataset = %kind, unparseable = n, "cached rows with unparseable dates")
                    }
                    _ => {}
                }
                Some(t)
            }
            None => None,
        };

        match (table, meta) {
            (Some(table), meta) => Cached {
                table: Some(table),
                meta,
            },
            // An empty table is never written to disk as rows, so a record
            // of zero rows with nothing on disk is still valid coverage.
            (None, Some(meta)) if meta.row_count == 0 && !meta.data_hash.is_empty() => Cached {
                table: None,
                meta: Some(meta),
            },
            (None, Some(_)) => {
                debug!(entity, dataset = %kind, "coverage metadata without a table, ignoring");
                Cached {
                    table: None,
                    meta: None,
                }
            }
            (None, None) => Cached {
                table: None,
                meta: None,
            },
        }
    }
}

fn ranged_date_column(kind: &DatasetKind) -> Option<&'static str> {
    if kind.is_ranged() {
        kind.date_column()
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Adjust;
    use crate::table::Cell;
    use std::cell::Cell as Counter;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn history() -> DatasetKind {
        DatasetKind::History { adjust: Adjust::Qfq }
    }

    fn cache(dir: &std::path::Path) -> RangeCoverageCache {
        let store = Arc::new(EntityStore::open(dir).unwrap());
        RangeCoverageCache::new(store, Arc::new(KeyedLocks::new()))
    }

    /// One row per calendar day, dates as provider-style text.
    fn daily(range: DateRange) -> DatasetTable {
        let mut t = DatasetTable::new(["日期", "收盘"]).unwrap();
        let mut day = range.start();
        while day <= range.end() {
            t.push_row(vec![Cell::from(day.format("%Y-%m-%d").to_string()), Cell::Float(1.0)])
                .unwrap();
            day = day.succ_opt().unwrap();
        }
        t
    }

    #[test]
    fn second_request_is_served_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(dir.path());
        let calls = Counter::new(0);
        let fetch = |r: DateRange| -> Result<DatasetTable, FetchError> {
            calls.set(calls.get() + 1);
            Ok(daily(r))
        };

        let first = cache
            .get_range("000858", &history(), d(2023, 1, 1), d(2023, 1, 31), fetch)
            .unwrap();
        let second = cache
            .get_range("000858", &history(), d(2023, 1, 1), d(2023, 1, 31), fetch)
            .unwrap();

        assert_eq!(calls.get(), 1);
        assert_eq!(first.height(), 31);
        assert_eq!(first, second);
    }

    #[test]
    fn inverted_range_is_rejected_before_fetching() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(dir.path());
        let result = cache.get_range("000858", &history(), d(2023, 2, 1), d(2023, 1, 1), |_| {
            panic!("must not fetch")
        });
        assert!(matches!(result, Err(CacheError::InvalidRange(_))));
    }

    #[test]
    fn snapshot_kinds_are_not_ranged() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(dir.path());
        let result = cache.get_range(
            "000858",
            &DatasetKind::Dividends,
            d(2023, 1, 1),
            d(2023, 1, 31),
            |r| Ok(daily(r)),
        );
        assert!(matches!(result, Err(CacheError::NotRanged(_))));
    }

    #[test]
    fn empty_fetch_still_records_coverage() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(dir.path());
        let calls = Counter::new(0);
        let fetch = |_: DateRange| -> Result<DatasetTable, FetchError> {
            calls.set(calls.get() + 1);
            Ok(DatasetTable::default())
        };
        let range = DateRange::new(d(2023, 1, 21), d(2023, 1, 22)).unwrap();

        let first = cache
            .get_range("000858", &history(), range.start(), range.end(), fetch)
            .unwrap();
        assert!(first.is_empty());
        assert_eq!(cache.coverage("000858", &history(), &range), CoverageResult::FullyCovered);

        cache
            .get_range("000858", &history(), range.start(), range.end(), fetch)
            .unwrap();
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn rows_without_date_column_are_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(dir.path());
        let result = cache.get_range("000858", &history(), d(2023, 1, 1), d(2023, 1, 2), |_| {
            Ok(DatasetTable::from_rows(["收盘"], vec![vec![Cell::Float(1.0)]]).unwrap())
        });

        assert!(matches!(result, Err(CacheError::MissingColumn { .. })));
        assert!(cache.store().load_metadata("000858", &history()).is_none());
    }

    #[test]
    fn unparseable_fetched_dates_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(dir.path());
        let table = cache
            .get_range("000858", &history(), d(2023, 1, 1), d(2023, 1, 31), |_| {
                Ok(DatasetTable::from_rows(
                    ["日期", "收盘"],
                    vec![
                        vec![Cell::from("2023-01-03"), Cell::Float(1.0)],
                        vec![Cell::from("not a date"), Cell::Float(2.0)],
                        vec![Cell::from("20230104"), Cell::Float(3.0)],
                    ],
                )
                .unwrap())
            })
            .unwrap();

        assert_eq!(table.height(), 2);
        assert_eq!(table.get(1, "日期"), Some(&Cell::Date(d(2023, 1, 4))));
    }

    #[test]
    fn coverage_reports_partial_hull() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(dir.path());
        let jan = DateRange::new(d(2023, 1, 1), d(2023, 1, 31)).unwrap();
        assert_eq!(cache.coverage("000858", &history(), &jan), CoverageResult::NotCached);

        cache
            .get_range("000858", &history(), jan.start(), jan.end(), |r| Ok(daily(r)))
            .unwrap();

        let wider = DateRange::new(d(2023, 1, 15), d(2023, 2, 15)).unwrap();
        assert_eq!(
            cache.coverage("000858", &history(), &wider),
            CoverageResult::PartiallyCovered {
                cached_start: d(2023, 1, 1),
                cached_end: d(2023, 1, 31),
            }
        );
    }
}
