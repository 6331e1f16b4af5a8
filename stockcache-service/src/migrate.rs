//! Import of per-stock caches kept in the flat CSV layout.
//!
//! That layout stores, per stock directory:
//! - `history_data.csv` plus `history_meta.json` holding only the covered
//!   hull as date strings
//! - one `{stem}.csv` per snapshot dataset, with the same stems the store
//!   uses
//! - `info.json` with the company info record
//!
//! Imported history keeps its hull as a single segment. Rows are
//! deduplicated by date and sorted on the way in.

use crate::export::import_table_csv;
use crate::service::KNOWN_VALUATION_INDICATORS;
use anyhow::{Context, Result};
use chrono::{NaiveDateTime, Utc};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use stockcache_core::{
    Adjust, CoverageMetadata, DatasetKind, DatasetTable, DateFormats, DateRange, EntityStore,
    FinancialReport, InfoRecord,
};
use tracing::{info, warn};

const LEGACY_HISTORY_FILE: &str = "history_data.csv";
const LEGACY_HISTORY_META: &str = "history_meta.json";
const LEGACY_INFO_FILE: &str = "info.json";

/// What an import brought over.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LegacyImport {
    /// Rows of daily history imported, if a history file was present.
    pub history_rows: Option<usize>,
    /// Coverage recorded for the imported history.
    pub history_coverage: Option<DateRange>,
    /// Storage names of imported snapshot tables.
    pub snapshots: Vec<String>,
    pub info: bool,
}

#[derive(Debug, Deserialize)]
struct LegacyHistoryMeta {
    covered_start: String,
    covered_end: String,
    #[serde(default)]
    last_update: Option<String>,
}

/// Snapshot kinds whose legacy file name is derivable.
fn snapshot_kinds() -> Vec<DatasetKind> {
    let mut kinds = vec![
        DatasetKind::Dividends,
        DatasetKind::ResearchReports,
        DatasetKind::InstituteRecommendations,
    ];
    kinds.extend(
        KNOWN_VALUATION_INDICATORS
            .iter()
            .map(|indicator| DatasetKind::Valuation {
                indicator: (*indicator).to_string(),
            }),
    );
    kinds.extend(
        [
            FinancialReport::BalanceSheet,
            FinancialReport::Income,
            FinancialReport::CashFlow,
        ]
        .into_iter()
        .map(|report| DatasetKind::Financial { report }),
    );
    kinds
}

/// Copy everything found in `legacy_dir` into `store` under `entity`.
///
/// Legacy history carries no adjustment in its name; it is filed under
/// `adjust`. Existing entries in the store are overwritten. Not
/// synchronized with live cache traffic for the same entity.
pub fn import_legacy_dir(
    store: &EntityStore,
    legacy_dir: &Path,
    entity: &str,
    adjust: Adjust,
    formats: &DateFormats,
) -> Result<LegacyImport> {
    let mut report = LegacyImport::default();

    let history = DatasetKind::History { adjust };
    if let Some((table, meta)) = read_legacy_history(legacy_dir, formats)? {
        report.history_rows = Some(table.height());
        // Coverage from an earlier cache must not outlive the table it
        // described.
        store
            .remove_metadata(entity, &history)
            .with_context(|| format!("failed to clear coverage for {entity}"))?;
        store
            .save_table(entity, &history, &table)
            .with_context(|| format!("failed to store imported history for {entity}"))?;
        if let Some(meta) = meta {
            report.history_coverage = meta.hull();
            store
                .save_metadata(entity, &history, &meta)
                .with_context(|| format!("failed to store imported coverage for {entity}"))?;
        }
    }

    for kind in snapshot_kinds() {
        let path = legacy_dir.join(format!("{}.csv", kind.storage_name()));
        if !path.exists() {
            continue;
        }
        let text = fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let table = import_table_csv(&text)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        store.save_table(entity, &kind, &table)?;
        report.snapshots.push(kind.storage_name());
    }

    let info_path = legacy_dir.join(LEGACY_INFO_FILE);
    if info_path.exists() {
        let text = fs::read_to_string(&info_path)
            .with_context(|| format!("failed to read {}", info_path.display()))?;
        let record: InfoRecord = serde_json::from_str(&text)
            .with_context(|| format!("failed to parse {}", info_path.display()))?;
        store.save_record(entity, &DatasetKind::Info, &record)?;
        report.info = true;
    }

    info!(
        entity,
        history_rows = ?report.history_rows,
        snapshots = report.snapshots.len(),
        info = report.info,
        "imported legacy cache"
    );
    Ok(report)
}

/// History table and, when the sidecar is usable, its coverage.
fn read_legacy_history(
    legacy_dir: &Path,
    formats: &DateFormats,
) -> Result<Option<(DatasetTable, Option<CoverageMetadata>)>> {
    let path = legacy_dir.join(LEGACY_HISTORY_FILE);
    if !path.exists() {
        return Ok(None);
    }
    let text =
        fs::read_to_string(&path).with_context(|| format!("failed to read {}", path.display()))?;
    if text.trim().is_empty() {
        warn!(path = %path.display(), "legacy history file is empty, skipping");
        return Ok(None);
    }

    let mut table = import_table_csv(&text)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    if !table.has_column("日期") {
        warn!(path = %path.display(), "legacy history has no 日期 column, skipping");
        return Ok(None);
    }
    let dropped = table.normalize_dates("日期", formats)?;
    if dropped > 0 {
        warn!(path = %path.display(), dropped, "dropping legacy rows with unparseable dates");
    }
    let table = DatasetTable::merge_by_date(None, table, "日期")?;

    let meta = read_legacy_meta(&legacy_dir.join(LEGACY_HISTORY_META), formats).map(|mut m| {
        m.row_count = table.height();
        m.data_hash = table.content_hash();
        m
    });
    Ok(Some((table, meta)))
}

/// Coverage from a legacy sidecar. An unreadable sidecar means the rows
/// are imported without any coverage claim.
fn read_legacy_meta(path: &Path, formats: &DateFormats) -> Option<CoverageMetadata> {
    let text = fs::read_to_string(path).ok()?;
    let parsed: LegacyHistoryMeta = match serde_json::from_str(&text) {
        Ok(m) => m,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "unreadable legacy coverage, ignoring");
            return None;
        }
    };

    let range = formats
        .parse(&parsed.covered_start)
        .and_then(|start| DateRange::new(start, formats.parse(&parsed.covered_end)?));
    let range = match range {
        Ok(r) => r,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "invalid legacy coverage, ignoring");
            return None;
        }
    };

    let last_update = parsed
        .last_update
        .as_deref()
        .and_then(|s| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f").ok())
        .unwrap_or_else(|| Utc::now().naive_utc());
    Some(CoverageMetadata::initial(range, last_update))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use stockcache_core::Cell;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn python_timestamps_parse() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history_meta.json");
        fs::write(
            &path,
            r#"{"covered_start": "2023-01-01", "covered_end": "2023-01-31", "last_update": "2023-02-01 09:15:02.123456"}"#,
        )
        .unwrap();

        let meta = read_legacy_meta(&path, &DateFormats::default()).unwrap();
        assert_eq!(meta.covered_start, d(2023, 1, 1));
        assert_eq!(meta.covered_end, d(2023, 1, 31));
        assert_eq!(
            meta.last_update,
            d(2023, 2, 1).and_hms_micro_opt(9, 15, 2, 123_456).unwrap()
        );
    }

    #[test]
    fn inverted_legacy_coverage_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history_meta.json");
        fs::write(
            &path,
            r#"{"covered_start": "2023-03-01", "covered_end": "2023-01-31"}"#,
        )
        .unwrap();
        assert!(read_legacy_meta(&path, &DateFormats::default()).is_none());
    }

    #[test]
    fn import_without_sidecar_drops_earlier_coverage() {
        let legacy = tempfile::tempdir().unwrap();
        fs::write(
            legacy.path().join(LEGACY_HISTORY_FILE),
            "日期,收盘\n2023-06-01,1.0\n",
        )
        .unwrap();
        let root = tempfile::tempdir().unwrap();
        let store = EntityStore::open(root.path()).unwrap();
        let history = DatasetKind::History { adjust: Adjust::Qfq };
        let earlier = CoverageMetadata::initial(
            DateRange::new(d(2023, 1, 1), d(2023, 12, 31)).unwrap(),
            d(2024, 1, 1).and_hms_opt(0, 0, 0).unwrap(),
        );
        store.save_metadata("000858", &history, &earlier).unwrap();

        let report = import_legacy_dir(
            &store,
            legacy.path(),
            "000858",
            Adjust::Qfq,
            &DateFormats::default(),
        )
        .unwrap();

        assert_eq!(report.history_rows, Some(1));
        assert_eq!(report.history_coverage, None);
        assert!(store.load_metadata("000858", &history).is_none());
        assert_eq!(store.load_table("000858", &history).unwrap().height(), 1);
    }

    #[test]
    fn duplicate_legacy_rows_collapse() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(LEGACY_HISTORY_FILE),
            "日期,收盘\n2023-01-04,2.0\n2023-01-03,1.0\n2023-01-04,3.0\n",
        )
        .unwrap();

        let (table, meta) = read_legacy_history(dir.path(), &DateFormats::default())
            .unwrap()
            .unwrap();
        assert!(meta.is_none());
        assert_eq!(table.height(), 2);
        assert_eq!(table.get(0, "日期"), Some(&Cell::Date(d(2023, 1, 3))));
        assert_eq!(table.get(1, "收盘"), Some(&Cell::Float(3.0)));
    }
}
