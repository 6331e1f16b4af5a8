//! Per-dataset facade over the caches.
//!
//! Each operation normalizes the caller's ticker, picks the cache that
//! fits the dataset (range-covered for daily history, snapshot for the
//! rest) and routes fetches to the configured [`RemoteDataSource`].

use crate::config::ServiceConfig;
use crate::migrate::{import_legacy_dir, LegacyImport};
use chrono::{Months, NaiveDate};
use std::path::Path;
use std::sync::Arc;
use stockcache_core::{
    filter_by_date, Adjust, CacheError, Cell, DatasetKind, DatasetStatus, DatasetTable,
    DateError, EntityStore, FetchError, Filtered, FinancialReport, InfoRecord, KeyedLocks,
    RangeCoverageCache, RemoteDataSource, SnapshotCache, StoreError, SymbolError,
    SymbolIdentity,
};
use thiserror::Error;
use tracing::{debug, info};

/// Valuation indicators whose cache state `cache_status` reports.
pub const KNOWN_VALUATION_INDICATORS: [&str; 5] =
    ["总市值", "市盈率(TTM)", "市盈率(静)", "市净率", "市现率"];

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Symbol(#[from] SymbolError),

    #[error(transparent)]
    Date(#[from] DateError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ServiceError {
    /// The remote failure behind this error, if any.
    pub fn fetch_error(&self) -> Option<&FetchError> {
        match self {
            ServiceError::Cache(CacheError::Fetch(e)) => Some(e),
            _ => None,
        }
    }
}

/// Look-back window applied to a cached valuation series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValuationPeriod {
    OneYear,
    ThreeYears,
    FiveYears,
    #[default]
    All,
}

impl ValuationPeriod {
    /// Parse the provider's labels (`近1年`, `近3年`, `近5年`, `全部`).
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim() {
            "近1年" => Some(ValuationPeriod::OneYear),
            "近3年" => Some(ValuationPeriod::ThreeYears),
            "近5年" => Some(ValuationPeriod::FiveYears),
            "全部" => Some(ValuationPeriod::All),
            _ => None,
        }
    }

    fn years(self) -> Option<u32> {
        match self {
            ValuationPeriod::OneYear => Some(1),
            ValuationPeriod::ThreeYears => Some(3),
            ValuationPeriod::FiveYears => Some(5),
            ValuationPeriod::All => None,
        }
    }

    /// First date inside the window ending at `latest`.
    pub fn window_start(self, latest: NaiveDate) -> Option<NaiveDate> {
        let years = self.years()?;
        latest.checked_sub_months(Months::new(12 * years))
    }
}

pub struct StockDataService {
    config: ServiceConfig,
    source: Arc<dyn RemoteDataSource>,
    ranges: RangeCoverageCache,
    snapshots: SnapshotCache,
}

impl StockDataService {
    /// Open the store at `config.data_dir` and wire both caches to `source`.
    pub fn new(
        config: ServiceConfig,
        source: Arc<dyn RemoteDataSource>,
    ) -> Result<Self, ServiceError> {
        let store = Arc::new(EntityStore::open(&config.data_dir)?);
        let locks = Arc::new(KeyedLocks::new());
        let ranges = RangeCoverageCache::new(Arc::clone(&store), Arc::clone(&locks))
            .with_mode(config.coverage_mode)
            .with_date_formats(config.date_formats.clone());
        let snapshots = SnapshotCache::new(store, locks);
        info!(
            data_dir = %config.data_dir.display(),
            source = source.name(),
            coverage_mode = ?config.coverage_mode,
            "stock data service ready"
        );
        Ok(Self {
            config,
            source,
            ranges,
            snapshots,
        })
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<EntityStore> {
        self.ranges.store()
    }

    /// Basic company information as an `item -> value` record.
    pub fn stock_info(&self, symbol: &str, force: bool) -> Result<InfoRecord, ServiceError> {
        let symbol = SymbolIdentity::parse(symbol)?;
        let kind = DatasetKind::Info;
        let record = self
            .snapshots
            .get_record(symbol.pure_code(), &kind, force, || {
                self.source
                    .fetch_snapshot(&symbol, &kind)
                    .map(|table| info_from_table(&table))
            })?;
        Ok(record)
    }

    /// Daily history for `start..=end`, fetched only where not cached.
    ///
    /// `adjust` falls back to the configured default.
    pub fn stock_history(
        &self,
        symbol: &str,
        start: &str,
        end: &str,
        adjust: Option<Adjust>,
    ) -> Result<DatasetTable, ServiceError> {
        let symbol = SymbolIdentity::parse(symbol)?;
        let formats = &self.config.date_formats;
        let (start, end) = (formats.parse(start)?, formats.parse(end)?);
        let kind = DatasetKind::History {
            adjust: adjust.unwrap_or(self.config.default_adjust),
        };

        let table = self
            .ranges
            .get_range(symbol.pure_code(), &kind, start, end, |range| {
                self.source.fetch_range(&symbol, &kind, range)
            })?;
        Ok(table)
    }

    /// Dividend history, optionally limited by ex-dividend date.
    pub fn dividends(
        &self,
        symbol: &str,
        start: Option<&str>,
        end: Option<&str>,
        force: bool,
    ) -> Result<Filtered, ServiceError> {
        self.filtered_snapshot(symbol, DatasetKind::Dividends, start, end, force)
    }

    /// Broker research reports, optionally limited by report date.
    pub fn research_reports(
        &self,
        symbol: &str,
        start: Option<&str>,
        end: Option<&str>,
        force: bool,
    ) -> Result<Filtered, ServiceError> {
        self.filtered_snapshot(symbol, DatasetKind::ResearchReports, start, end, force)
    }

    /// Institutional ratings. A provider with nothing on record yields an
    /// empty table rather than an error; nothing is cached in that case.
    pub fn institute_recommendations(
        &self,
        symbol: &str,
        force: bool,
    ) -> Result<DatasetTable, ServiceError> {
        let symbol = SymbolIdentity::parse(symbol)?;
        let kind = DatasetKind::InstituteRecommendations;
        let result = self.snapshots.get(symbol.pure_code(), &kind, force, || {
            self.source.fetch_snapshot(&symbol, &kind)
        });
        match result {
            Err(CacheError::Fetch(FetchError::EmptyResult(reason))) => {
                debug!(symbol = %symbol, %reason, "no institute recommendations on record");
                Ok(DatasetTable::default())
            }
            other => Ok(other?),
        }
    }

    /// One valuation indicator over `period`.
    ///
    /// The full series is cached; the period is cut in memory relative to
    /// the latest date present.
    pub fn valuation(
        &self,
        symbol: &str,
        indicator: &str,
        period: ValuationPeriod,
        force: bool,
    ) -> Result<Filtered, ServiceError> {
        let symbol = SymbolIdentity::parse(symbol)?;
        let kind = DatasetKind::Valuation {
            indicator: indicator.to_string(),
        };
        let table = self.snapshots.get(symbol.pure_code(), &kind, force, || {
            self.source.fetch_snapshot(&symbol, &kind)
        })?;

        let column = kind.date_column().unwrap_or("date");
        let formats = &self.config.date_formats;
        if period == ValuationPeriod::All {
            return Ok(filter_by_date(table, column, None, None, formats));
        }

        let mut dated = table.clone();
        let latest = dated
            .normalize_dates(column, formats)
            .and_then(|_| dated.latest_date(column))
            .ok()
            .flatten();
        // Without any usable date the window is empty; a missing column is
        // reported by the filter.
        let start = latest
            .and_then(|d| period.window_start(d))
            .unwrap_or(NaiveDate::MAX);
        Ok(filter_by_date(table, column, Some(start), None, formats))
    }

    /// One financial statement.
    pub fn financial_report(
        &self,
        symbol: &str,
        report: FinancialReport,
        force: bool,
    ) -> Result<DatasetTable, ServiceError> {
        let symbol = SymbolIdentity::parse(symbol)?;
        let kind = DatasetKind::Financial { report };
        let table = self.snapshots.get(symbol.pure_code(), &kind, force, || {
            self.source.fetch_snapshot(&symbol, &kind)
        })?;
        Ok(table)
    }

    /// What is cached for `symbol`, one entry per known dataset.
    pub fn cache_status(&self, symbol: &str) -> Result<Vec<DatasetStatus>, ServiceError> {
        let symbol = SymbolIdentity::parse(symbol)?;
        let mut kinds = vec![
            DatasetKind::Info,
            DatasetKind::History { adjust: Adjust::Qfq },
            DatasetKind::History { adjust: Adjust::Hfq },
            DatasetKind::History { adjust: Adjust::None },
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
        Ok(self.store().status(symbol.pure_code(), &kinds))
    }

    /// Bring a stock's cache over from the flat CSV layout rooted at
    /// `legacy_root`, filing its history under `adjust`.
    pub fn import_legacy(
        &self,
        legacy_root: &Path,
        symbol: &str,
        adjust: Adjust,
    ) -> anyhow::Result<LegacyImport> {
        let symbol = SymbolIdentity::parse(symbol)?;
        import_legacy_dir(
            self.store(),
            &legacy_root.join(symbol.pure_code()),
            symbol.pure_code(),
            adjust,
            &self.config.date_formats,
        )
    }

    fn filtered_snapshot(
        &self,
        symbol: &str,
        kind: DatasetKind,
        start: Option<&str>,
        end: Option<&str>,
        force: bool,
    ) -> Result<Filtered, ServiceError> {
        let symbol = SymbolIdentity::parse(symbol)?;
        let formats = &self.config.date_formats;
        let start = formats.parse_opt(start)?;
        let end = formats.parse_opt(end)?;

        let table = self.snapshots.get(symbol.pure_code(), &kind, force, || {
            self.source.fetch_snapshot(&symbol, &kind)
        })?;
        let Some(column) = kind.date_column() else {
            return Ok(Filtered {
                table,
                warnings: Vec::new(),
            });
        };
        Ok(filter_by_date(table, column, start, end, formats))
    }
}

/// Turn a provider info table into a record.
///
/// `item`/`value` tables become a map of item to value; anything else
/// contributes its first row; an empty table gives an empty record.
pub fn info_from_table(table: &DatasetTable) -> InfoRecord {
    let mut record = InfoRecord::new();
    if let (Some(item), Some(value)) = (table.column_index("item"), table.column_index("value")) {
        for row in table.rows() {
            let key = match &row[item] {
                Cell::Null => continue,
                Cell::Text(s) => s.clone(),
                other => other.to_string(),
            };
            record.insert(key, row[value].to_json());
        }
        return record;
    }
    if let Some(first) = table.rows().first() {
        for (name, cell) in table.columns().iter().zip(first) {
            record.insert(name.clone(), cell.to_json());
        }
    }
    record
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn item_value_tables_become_maps() {
        let table = DatasetTable::from_rows(
            ["item", "value"],
            vec![
                vec![Cell::from("股票简称"), Cell::from("五粮液")],
                vec![Cell::from("总股本"), Cell::Int(3_881_608_005)],
                vec![Cell::Null, Cell::from("ignored")],
            ],
        )
        .unwrap();
        let record = info_from_table(&table);
        assert_eq!(record.len(), 2);
        assert_eq!(record["股票简称"], serde_json::json!("五粮液"));
        assert_eq!(record["总股本"], serde_json::json!(3_881_608_005_i64));
    }

    #[test]
    fn other_tables_use_first_row() {
        let table = DatasetTable::from_rows(
            ["org_name", "main_operation_business"],
            vec![
                vec![Cell::from("宜宾五粮液股份有限公司"), Cell::from("白酒")],
                vec![Cell::from("second"), Cell::from("row")],
            ],
        )
        .unwrap();
        let record = info_from_table(&table);
        assert_eq!(record["org_name"], serde_json::json!("宜宾五粮液股份有限公司"));
        assert_eq!(record.len(), 2);
    }

    #[test]
    fn empty_table_gives_empty_record() {
        assert!(info_from_table(&DatasetTable::default()).is_empty());
    }

    #[test]
    fn valuation_windows() {
        let latest = d(2024, 2, 29);
        assert_eq!(ValuationPeriod::OneYear.window_start(latest), Some(d(2023, 2, 28)));
        assert_eq!(ValuationPeriod::FiveYears.window_start(latest), Some(d(2019, 2, 28)));
        assert_eq!(ValuationPeriod::All.window_start(latest), None);
        assert_eq!(ValuationPeriod::from_label("近3年"), Some(ValuationPeriod::ThreeYears));
        assert_eq!(ValuationPeriod::from_label("十年"), None);
    }
}
