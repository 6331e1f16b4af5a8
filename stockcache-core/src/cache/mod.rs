//! Caches layered over [`EntityStore`](crate::store::EntityStore).
//!
//! - [`RangeCoverageCache`] serves date-indexed series, fetching only what
//!   the recorded coverage does not already hold
//! - [`SnapshotCache`] serves whole tables that are either present or not

mod range;
mod snapshot;

pub use crate::coverage::CoverageResult;
pub use range::RangeCoverageCache;
pub use snapshot::{filter_by_date, Filtered, InfoRecord, SnapshotCache};

use crate::dates::DateError;
use crate::provider::FetchError;
use crate::store::StoreError;
use crate::table::TableError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error(transparent)]
    InvalidRange(#[from] DateError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// A fetched table lacks the column its rows are keyed on.
    #[error("dataset {dataset} has no '{column}' column")]
    MissingColumn { column: String, dataset: String },

    #[error("dataset {0} is not date-ranged")]
    NotRanged(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Table(#[from] TableError),
}

/// Non-fatal conditions reported alongside a result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheWarning {
    /// A date filter was requested on a column the table does not have;
    /// the table was returned unfiltered.
    MissingColumn { column: String },
}
