//! Whole-table snapshots: present and complete, or absent.

use super::{CacheError, CacheWarning};
use crate::dataset::DatasetKind;
use crate::dates::DateFormats;
use crate::locks::KeyedLocks;
use crate::provider::FetchError;
use crate::store::EntityStore;
use crate::table::DatasetTable;
use chrono::NaiveDate;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Single-record snapshot, e.g. company info as `item -> value`.
pub type InfoRecord = serde_json::Map<String, serde_json::Value>;

/// A table after optional date filtering.
#[derive(Debug, Clone, PartialEq)]
pub struct Filtered {
    pub table: DatasetTable,
    pub warnings: Vec<CacheWarning>,
}

pub struct SnapshotCache {
    store: Arc<EntityStore>,
    locks: Arc<KeyedLocks>,
}

impl SnapshotCache {
    pub fn new(store: Arc<EntityStore>, locks: Arc<KeyedLocks>) -> Self {
        Self { store, locks }
    }

    pub fn store(&self) -> &Arc<EntityStore> {
        &self.store
    }

    /// The stored table for `(entity, kind)`, fetching and persisting it
    /// when absent or when `force_refresh` is set.
    ///
    /// An empty stored table counts as absent, so an empty fetch result is
    /// fetched again next time.
    pub fn get<F>(
        &self,
        entity: &str,
        kind: &DatasetKind,
        force_refresh: bool,
        fetch: F,
    ) -> Result<DatasetTable, CacheError>
    where
        F: FnOnce() -> Result<DatasetTable, FetchError>,
    {
        let key = format!("{entity}/{}", kind.storage_name());
        self.locks.with_lock(&key, || {
            if !force_refresh {
                if let Some(table) = self.store.load_table(entity, kind) {
                    debug!(entity, dataset = %kind, rows = table.height(), "snapshot cache hit");
                    return Ok(table);
                }
            }

            info!(entity, dataset = %kind, force_refresh, "fetching snapshot");
            let mut table = fetch()?;
            table.unify_column_types();
            self.store.save_table(entity, kind, &table)?;
            debug!(entity, dataset = %kind, rows = table.height(), "snapshot stored");
            Ok(table)
        })
    }

    /// Same as [`get`](Self::get) for single-record datasets.
    pub fn get_record<F>(
        &self,
        entity: &str,
        kind: &DatasetKind,
        force_refresh: bool,
        fetch: F,
    ) -> Result<InfoRecord, CacheError>
    where
        F: FnOnce() -> Result<InfoRecord, FetchError>,
    {
        let key = format!("{entity}/{}", kind.storage_name());
        self.locks.with_lock(&key, || {
            if !force_refresh {
                if let Some(record) = self.store.load_record::<InfoRecord>(entity, kind) {
                    debug!(entity, dataset = %kind, "record cache hit");
                    return Ok(record);
                }
            }

            info!(entity, dataset = %kind, force_refresh, "fetching record");
            let record = fetch()?;
            self.store.save_record(entity, kind, &record)?;
            Ok(record)
        })
    }
}

/// Keep rows of `table` whose `column` date lies within the optional
/// bounds. Text dates are parsed with `formats`; rows without a usable
/// date are dropped once any bound is given.
///
/// A missing column is not an error: the table comes back unfiltered with
/// a warning attached.
pub fn filter_by_date(
    mut table: DatasetTable,
    column: &str,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
    formats: &DateFormats,
) -> Filtered {
    if start.is_none() && end.is_none() {
        return Filtered {
            table,
            warnings: Vec::new(),
        };
    }

    let filtered = table
        .normalize_dates(column, formats)
        .and_then(|_| table.filter_dates(column, start, end));
    match filtered {
        Ok(table) => Filtered {
            table,
            warnings: Vec::new(),
        },
        Err(_) => {
            warn!(column, "date filter column missing, returning unfiltered table");
            Filtered {
                table,
                warnings: vec![CacheWarning::MissingColumn {
                    column: column.to_string(),
                }],
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::Cell;
    use std::cell::Cell as Counter;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn dividends() -> DatasetTable {
        DatasetTable::from_rows(
            ["除权除息日", "派息"],
            vec![
                vec![Cell::from("2021-06-18"), Cell::Float(25.8)],
                vec![Cell::from("2022-06-24"), Cell::Float(30.0)],
                vec![Cell::Null, Cell::Float(0.0)],
                vec![Cell::from("2023-06-20"), Cell::Float(37.8)],
            ],
        )
        .unwrap()
    }

    fn snapshots(dir: &std::path::Path) -> SnapshotCache {
        SnapshotCache::new(
            Arc::new(EntityStore::open(dir).unwrap()),
            Arc::new(KeyedLocks::new()),
        )
    }

    #[test]
    fn stored_snapshot_is_reused_until_forced() {
        let dir = tempfile::tempdir().unwrap();
        let cache = snapshots(dir.path());
        let calls = Counter::new(0);
        let fetch = || -> Result<DatasetTable, FetchError> {
            calls.set(calls.get() + 1);
            Ok(dividends())
        };

        cache.get("000858", &DatasetKind::Dividends, false, fetch).unwrap();
        cache.get("000858", &DatasetKind::Dividends, false, fetch).unwrap();
        assert_eq!(calls.get(), 1);

        cache.get("000858", &DatasetKind::Dividends, true, fetch).unwrap();
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn fetch_error_leaves_previous_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let cache = snapshots(dir.path());
        cache
            .get("000858", &DatasetKind::Dividends, false, || Ok(dividends()))
            .unwrap();

        let err = cache
            .get("000858", &DatasetKind::Dividends, true, || {
                Err(FetchError::NetworkUnreachable("timeout".into()))
            })
            .unwrap_err();
        assert!(matches!(err, CacheError::Fetch(FetchError::NetworkUnreachable(_))));

        let kept = cache
            .get("000858", &DatasetKind::Dividends, false, || panic!("must not fetch"))
            .unwrap();
        assert_eq!(kept.height(), 4);
    }

    #[test]
    fn records_are_cached() {
        let dir = tempfile::tempdir().unwrap();
        let cache = snapshots(dir.path());
        let mut record = InfoRecord::new();
        record.insert("股票简称".into(), "五粮液".into());

        let first = cache
            .get_record("000858", &DatasetKind::Info, false, || Ok(record.clone()))
            .unwrap();
        let second = cache
            .get_record("000858", &DatasetKind::Info, false, || panic!("must not fetch"))
            .unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn filter_keeps_rows_within_bounds() {
        let out = filter_by_date(
            dividends(),
            "除权除息日",
            Some(d(2022, 1, 1)),
            None,
            &DateFormats::default(),
        );
        assert!(out.warnings.is_empty());
        assert_eq!(out.table.height(), 2);
        assert_eq!(out.table.get(0, "除权除息日"), Some(&Cell::Date(d(2022, 6, 24))));
    }

    #[test]
    fn filter_without_bounds_is_identity() {
        let out = filter_by_date(dividends(), "除权除息日", None, None, &DateFormats::default());
        assert_eq!(out.table, dividends());
    }

    #[test]
    fn filter_on_missing_column_warns() {
        let out = filter_by_date(
            dividends(),
            "日期",
            Some(d(2022, 1, 1)),
            Some(d(2022, 12, 31)),
            &DateFormats::default(),
        );
        assert_eq!(out.table, dividends());
        assert_eq!(
            out.warnings,
            vec![CacheWarning::MissingColumn {
                column: "日期".into()
            }]
        );
    }
}
