//! Durable per-entity storage.
//!
//! Layout: `{root}/{entity}/{dataset}.parquet` for tables,
//! `{root}/{entity}/{dataset}.meta.json` for coverage metadata and
//! `{root}/{entity}/{dataset}.json` for single-record datasets.
//!
//! - Entity namespaces are created on first write
//! - Writes are atomic (write to `.tmp`, rename into place)
//! - Loads never fail: absent, empty or unreadable files come back as
//!   `None`; unreadable files are renamed to `{file}.quarantined`

use crate::coverage::CoverageMetadata;
use crate::dataset::DatasetKind;
use crate::table::{Cell, ColumnKind, DatasetTable};
use chrono::{Datelike, NaiveDate, NaiveDateTime};
use polars::prelude::*;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

/// Days from 0001-01-01 (CE) to the Unix epoch.
const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid entity key '{0}'")]
    InvalidKey(String),

    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parquet I/O error: {0}")]
    Parquet(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("corrupt cache file {}: {reason}", path.display())]
    Corrupt { path: PathBuf, reason: String },
}

fn io_error(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// What is stored for one dataset of one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetStatus {
    pub dataset: String,
    pub cached: bool,
    pub rows: Option<usize>,
    pub covered_start: Option<NaiveDate>,
    pub covered_end: Option<NaiveDate>,
    pub last_update: Option<NaiveDateTime>,
}

/// File-backed store rooted at one directory.
#[derive(Debug, Clone)]
pub struct EntityStore {
    root: PathBuf,
}

impl EntityStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| io_error(&root, e))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory for one entity: `{root}/{entity}/`.
    pub fn entity_dir(&self, entity: &str) -> Result<PathBuf, StoreError> {
        validate_key(entity)?;
        Ok(self.root.join(entity))
    }

    fn ensure_entity_dir(&self, entity: &str) -> Result<PathBuf, StoreError> {
        let dir = self.entity_dir(entity)?;
        fs::create_dir_all(&dir).map_err(|e| io_error(&dir, e))?;
        Ok(dir)
    }

    fn table_path(&self, entity: &str, kind: &DatasetKind) -> Result<PathBuf, StoreError> {
        Ok(self
            .entity_dir(entity)?
            .join(format!("{}.parquet", kind.storage_name())))
    }

    fn meta_path(&self, entity: &str, kind: &DatasetKind) -> Result<PathBuf, StoreError> {
        Ok(self
            .entity_dir(entity)?
            .join(format!("{}.meta.json", kind.storage_name())))
    }

    fn record_path(&self, entity: &str, kind: &DatasetKind) -> Result<PathBuf, StoreError> {
        Ok(self
            .entity_dir(entity)?
            .join(format!("{}.json", kind.storage_name())))
    }

    /// Load a table. Empty or unreadable tables count as absent.
    pub fn load_table(&self, entity: &str, kind: &DatasetKind) -> Option<DatasetTable> {
        let path = self.table_path(entity, kind).ok()?;
        if !path.exists() {
            return None;
        }

        match read_parquet_table(&path) {
            Ok(table) if table.is_empty() => {
                debug!(path = %path.display(), "cached table is empty, treating as absent");
                None
            }
            Ok(table) => Some(table),
            Err(e) => {
                warn!(error = %e, "unreadable cache table, treating as absent");
                quarantine(&path);
                None
            }
        }
    }

    /// Overwrite the table for `(entity, kind)`.
    ///
    /// A table without columns cannot be represented on disk; saving one
    /// removes any previous table so later loads see it as absent.
    pub fn save_table(
        &self,
        entity: &str,
        kind: &DatasetKind,
        table: &DatasetTable,
    ) -> Result<(), StoreError> {
        self.ensure_entity_dir(entity)?;
        let path = self.table_path(entity, kind)?;
        if table.width() == 0 {
            return remove_if_exists(&path);
        }

        let mut df = table_to_dataframe(table)?;
        write_atomic(&path, |tmp| {
            let file = fs::File::create(tmp).map_err(|e| io_error(tmp, e))?;
            ParquetWriter::new(file)
                .finish(&mut df)
                .map_err(|e| StoreError::Parquet(format!("write {}: {e}", tmp.display())))?;
            Ok(())
        })
    }

    /// Move a table that failed structural checks out of the way.
    pub fn quarantine_table(&self, entity: &str, kind: &DatasetKind) {
        if let Ok(path) = self.table_path(entity, kind) {
            quarantine(&path);
        }
    }

    /// Load coverage metadata. Unparseable or inconsistent records count
    /// as absent.
    pub fn load_metadata(&self, entity: &str, kind: &DatasetKind) -> Option<CoverageMetadata> {
        let path = self.meta_path(entity, kind).ok()?;
        let meta: CoverageMetadata = read_json(&path)?;
        match meta.validated() {
            Some(meta) => Some(meta),
            None => {
                warn!(path = %path.display(), "inconsistent coverage metadata, treating as absent");
                quarantine(&path);
                None
            }
        }
    }

    pub fn save_metadata(
        &self,
        entity: &str,
        kind: &DatasetKind,
        meta: &CoverageMetadata,
    ) -> Result<(), StoreError> {
        self.ensure_entity_dir(entity)?;
        write_json(&self.meta_path(entity, kind)?, meta)
    }

    /// Drop the coverage record for `(entity, kind)`, keeping the table.
    pub fn remove_metadata(&self, entity: &str, kind: &DatasetKind) -> Result<(), StoreError> {
        remove_if_exists(&self.meta_path(entity, kind)?)
    }

    /// Load a single-record dataset.
    pub fn load_record<T: DeserializeOwned>(&self, entity: &str, kind: &DatasetKind) -> Option<T> {
        read_json(&self.record_path(entity, kind).ok()?)
    }

    pub fn save_record<T: Serialize>(
        &self,
        entity: &str,
        kind: &DatasetKind,
        record: &T,
    ) -> Result<(), StoreError> {
        self.ensure_entity_dir(entity)?;
        write_json(&self.record_path(entity, kind)?, record)
    }

    /// Delete everything stored for `(entity, kind)`.
    pub fn remove_dataset(&self, entity: &str, kind: &DatasetKind) -> Result<(), StoreError> {
        remove_if_exists(&self.table_path(entity, kind)?)?;
        remove_if_exists(&self.meta_path(entity, kind)?)?;
        remove_if_exists(&self.record_path(entity, kind)?)
    }

    /// Entity keys that have a namespace, sorted.
    pub fn entities(&self) -> Result<Vec<String>, StoreError> {
        let entries = fs::read_dir(&self.root).map_err(|e| io_error(&self.root, e))?;
        let mut keys: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
            .collect();
        keys.sort();
        Ok(keys)
    }

    /// What is cached for each of `kinds`.
    pub fn status(&self, entity: &str, kinds: &[DatasetKind]) -> Vec<DatasetStatus> {
        kinds
            .iter()
            .map(|kind| {
                let meta = if kind.is_ranged() {
                    self.load_metadata(entity, kind)
                } else {
                    None
                };
                let rows = match kind {
                    DatasetKind::Info => self
                        .load_record::<serde_json::Value>(entity, kind)
                        .map(|_| 1),
                    _ => self.load_table(entity, kind).map(|t| t.height()),
                };
                DatasetStatus {
                    dataset: kind.storage_name(),
                    cached: rows.is_some(),
                    rows,
                    covered_start: meta.as_ref().map(|m| m.covered_start),
                    covered_end: meta.as_ref().map(|m| m.covered_end),
                    last_update: meta.as_ref().map(|m| m.last_update),
                }
            })
            .collect()
    }
}

/// Entity keys become directory names, so reject anything that could
/// escape the root.
fn validate_key(entity: &str) -> Result<(), StoreError> {
    let bad = entity.is_empty()
        || entity == "."
        || entity == ".."
        || entity.contains(['/', '\\', '\0']);
    if bad {
        return Err(StoreError::InvalidKey(entity.to_string()));
    }
    Ok(())
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut s = path.as_os_str().to_owned();
    s.push(".tmp");
    PathBuf::from(s)
}

fn write_atomic(
    path: &Path,
    write: impl FnOnce(&Path) -> Result<(), StoreError>,
) -> Result<(), StoreError> {
    let tmp = tmp_path(path);
    if let Err(e) = write(&tmp) {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }
    fs::rename(&tmp, path).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        io_error(path, e)
    })
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| StoreError::Serialization(e.to_string()))?;
    write_atomic(path, |tmp| fs::write(tmp, json).map_err(|e| io_error(tmp, e)))
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Option<T> {
    if !path.exists() {
        return None;
    }
    let parsed = fs::read_to_string(path)
        .map_err(|e| e.to_string())
        .and_then(|s| serde_json::from_str(&s).map_err(|e| e.to_string()));
    match parsed {
        Ok(value) => Some(value),
        Err(reason) => {
            warn!(path = %path.display(), %reason, "unreadable cache record, treating as absent");
            quarantine(path);
            None
        }
    }
}

fn remove_if_exists(path: &Path) -> Result<(), StoreError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(io_error(path, e)),
    }
}

fn quarantine(path: &Path) {
    let mut target = path.as_os_str().to_owned();
    target.push(".quarantined");
    warn!(path = %path.display(), "quarantining cache file");
    let _ = fs::rename(path, PathBuf::from(target));
}

// ── Parquet I/O helpers ─────────────────────────────────────────────

fn table_to_dataframe(table: &DatasetTable) -> Result<DataFrame, StoreError> {
    let mut columns = Vec::with_capacity(table.width());

    for (idx, name) in table.columns().iter().enumerate() {
        let cells = table.rows().iter().map(|r| &r[idx]);
        let column = match table.column_kind(idx) {
            ColumnKind::Bool => {
                let values: Vec<Option<bool>> = cells
                    .map(|c| match c {
                        Cell::Bool(b) => Some(*b),
                        _ => None,
                    })
                    .collect();
                Column::new(name.as_str().into(), values)
            }
            ColumnKind::Int => {
                let values: Vec<Option<i64>> = cells
                    .map(|c| match c {
                        Cell::Int(v) => Some(*v),
                        _ => None,
                    })
                    .collect();
                Column::new(name.as_str().into(), values)
            }
            ColumnKind::Float => {
                let values: Vec<Option<f64>> = cells.map(Cell::as_f64).collect();
                Column::new(name.as_str().into(), values)
            }
            ColumnKind::Date => {
                let values: Vec<Option<i32>> = cells
                    .map(|c| {
                        c.as_date()
                            .map(|d| d.num_days_from_ce() - UNIX_EPOCH_DAYS_FROM_CE)
                    })
                    .collect();
                Column::new(name.as_str().into(), values)
                    .cast(&DataType::Date)
                    .map_err(|e| StoreError::Parquet(format!("date cast '{name}': {e}")))?
            }
            ColumnKind::Text => {
                let values: Vec<Option<String>> = cells
                    .map(|c| if c.is_null() { None } else { Some(c.to_string()) })
                    .collect();
                Column::new(name.as_str().into(), values)
            }
        };
        columns.push(column);
    }

    DataFrame::new(columns).map_err(|e| StoreError::Parquet(format!("dataframe creation: {e}")))
}

fn read_parquet_table(path: &Path) -> Result<DatasetTable, StoreError> {
    let corrupt = |reason: String| StoreError::Corrupt {
        path: path.to_path_buf(),
        reason,
    };

    let file = fs::File::open(path).map_err(|e| io_error(path, e))?;
    let df = ParquetReader::new(file)
        .finish()
        .map_err(|e| corrupt(format!("read: {e}")))?;

    let names: Vec<String> = df
        .get_columns()
        .iter()
        .map(|c| c.name().to_string())
        .collect();
    let mut rows: Vec<Vec<Cell>> = vec![Vec::with_capacity(names.len()); df.height()];
    for column in df.get_columns() {
        let cells = column_to_cells(column).map_err(|e| corrupt(e.to_string()))?;
        for (row, cell) in rows.iter_mut().zip(cells) {
            row.push(cell);
        }
    }

    DatasetTable::from_rows(names, rows).map_err(|e| corrupt(e.to_string()))
}

fn column_to_cells(column: &Column) -> Result<Vec<Cell>, PolarsError> {
    let cells: Vec<Cell> = match column.dtype() {
        DataType::Boolean => column.bool()?.into_iter().map(Cell::from).collect(),
        DataType::String => column.str()?.into_iter().map(Cell::from).collect(),
        DataType::Date => {
            let days = column.cast(&DataType::Int32)?;
            days.i32()?
                .into_iter()
                .map(|v| {
                    Cell::from(v.and_then(|days| {
                        NaiveDate::from_num_days_from_ce_opt(days + UNIX_EPOCH_DAYS_FROM_CE)
                    }))
                })
                .collect()
        }
        DataType::Null => vec![Cell::Null; column.len()],
        dt if dt.is_integer() => {
            let ints = column.cast(&DataType::Int64)?;
            ints.i64()?.into_iter().map(Cell::from).collect()
        }
        dt if dt.is_float() => {
            let floats = column.cast(&DataType::Float64)?;
            floats.f64()?.into_iter().map(Cell::from).collect()
        }
        _ => {
            let text = column.cast(&DataType::String)?;
            text.str()?.into_iter().map(Cell::from).collect()
        }
    };
    Ok(cells)
}
