//! stockcache core: local caching of per-stock provider datasets.
//!
//! This crate contains everything below the provider facade:
//! - Symbol normalization and exchange inference
//! - Date parsing and inclusive date ranges
//! - An in-memory table model with date-keyed merge
//! - A file-backed per-entity store (Parquet tables, JSON sidecars)
//! - Coverage tracking and the range-covered cache
//! - The snapshot cache for whole-table datasets
//! - The remote data source trait the caches fetch through

pub mod cache;
pub mod coverage;
pub mod dataset;
pub mod dates;
pub mod locks;
pub mod provider;
pub mod store;
pub mod symbol;
pub mod table;

pub use cache::{
    filter_by_date, CacheError, CacheWarning, Filtered, InfoRecord, RangeCoverageCache,
    SnapshotCache,
};
pub use coverage::{CoverageMetadata, CoverageMode, CoverageResult};
pub use dataset::{Adjust, DatasetKind, FinancialReport};
pub use dates::{DateError, DateFormats, DateRange};
pub use locks::KeyedLocks;
pub use provider::{FetchError, RemoteDataSource};
pub use store::{DatasetStatus, EntityStore, StoreError};
pub use symbol::{Exchange, ExchangeSource, SymbolError, SymbolIdentity};
pub use table::{Cell, ColumnKind, DatasetTable, TableError};
