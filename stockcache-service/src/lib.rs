//! stockcache service: one call per provider dataset, backed by the
//! caches in `stockcache-core`.
//!
//! - [`ServiceConfig`] loads from TOML and picks store root, date formats,
//!   coverage mode and default price adjustment
//! - [`StockDataService`] routes each dataset to the right cache and the
//!   configured remote source
//! - [`export`] and [`migrate`] move tables in and out as CSV, including
//!   caches kept in the flat CSV layout

pub mod config;
pub mod export;
pub mod migrate;
pub mod service;

pub use config::{ConfigError, ServiceConfig};
pub use export::{export_table_csv, import_table_csv};
pub use migrate::{import_legacy_dir, LegacyImport};
pub use service::{
    info_from_table, ServiceError, StockDataService, ValuationPeriod, KNOWN_VALUATION_INDICATORS,
};
