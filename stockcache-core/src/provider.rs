//! Remote data source trait and its error type.
//!
//! The RemoteDataSource trait abstracts over the upstream provider so the
//! caches can be exercised against scripted sources in tests. Sources know
//! nothing about caching.

use crate::dataset::DatasetKind;
use crate::dates::DateRange;
use crate::symbol::SymbolIdentity;
use crate::table::DatasetTable;
use thiserror::Error;

/// Failures reported by a remote source. Propagated to callers unchanged.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("response format changed: {0}")]
    ResponseFormatChanged(String),

    #[error("symbol not found: {symbol}")]
    SymbolNotFound { symbol: String },

    /// The provider answered but had nothing for this request.
    #[error("provider returned no data: {0}")]
    EmptyResult(String),

    #[error("dataset {0} is not supported by this source")]
    Unsupported(String),

    #[error("fetch error: {0}")]
    Other(String),
}

/// Upstream provider of per-stock tables.
pub trait RemoteDataSource: Send + Sync {
    /// Human-readable name of this source.
    fn name(&self) -> &str;

    /// Rows of a ranged dataset for exactly `range`.
    ///
    /// The date column may come back as text; the cache normalizes it.
    fn fetch_range(
        &self,
        symbol: &SymbolIdentity,
        kind: &DatasetKind,
        range: DateRange,
    ) -> Result<DatasetTable, FetchError>;

    /// The whole table of a snapshot dataset.
    fn fetch_snapshot(
        &self,
        symbol: &SymbolIdentity,
        kind: &DatasetKind,
    ) -> Result<DatasetTable, FetchError>;
}
