//! In-memory tabular data as returned by the provider.
//!
//! Provider endpoints return loosely-typed tables whose columns vary per
//! dataset (and sometimes per provider release). [`DatasetTable`] keeps
//! them as ordered, named columns over rows of [`Cell`]s. The only column
//! the caches care about is the primary date column of a dataset; every
//! other column is carried through untouched.

use crate::dates::DateFormats;
use chrono::NaiveDate;
use std::collections::{HashMap, HashSet};
use std::fmt;
use thiserror::Error;

/// A single value.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Date(NaiveDate),
}

impl Cell {
    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            Cell::Date(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Cell::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Float(v) => Some(*v),
            Cell::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Interpret the cell as a date, parsing text and `YYYYMMDD`-style
    /// integers with `formats`. Unparseable values become `None`.
    pub fn coerce_date(&self, formats: &DateFormats) -> Option<NaiveDate> {
        match self {
            Cell::Date(d) => Some(*d),
            Cell::Text(s) => formats.parse(s).ok(),
            Cell::Int(v) => formats.parse(&v.to_string()).ok(),
            _ => None,
        }
    }

    /// JSON rendering used for info records.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value;
        match self {
            Cell::Null => Value::Null,
            Cell::Bool(b) => Value::Bool(*b),
            Cell::Int(v) => Value::from(*v),
            Cell::Float(v) => serde_json::Number::from_f64(*v)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Cell::Text(s) => Value::String(s.clone()),
            Cell::Date(d) => Value::String(d.to_string()),
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Null => Ok(()),
            Cell::Bool(b) => write!(f, "{b}"),
            Cell::Int(v) => write!(f, "{v}"),
            Cell::Float(v) => write!(f, "{v}"),
            Cell::Text(s) => f.write_str(s),
            Cell::Date(d) => write!(f, "{d}"),
        }
    }
}

impl From<&str> for Cell {
    fn from(s: &str) -> Self {
        Cell::Text(s.to_string())
    }
}

impl From<String> for Cell {
    fn from(s: String) -> Self {
        Cell::Text(s)
    }
}

impl From<f64> for Cell {
    fn from(v: f64) -> Self {
        Cell::Float(v)
    }
}

impl From<i64> for Cell {
    fn from(v: i64) -> Self {
        Cell::Int(v)
    }
}

impl From<bool> for Cell {
    fn from(v: bool) -> Self {
        Cell::Bool(v)
    }
}

impl From<NaiveDate> for Cell {
    fn from(d: NaiveDate) -> Self {
        Cell::Date(d)
    }
}

impl<T: Into<Cell>> From<Option<T>> for Cell {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Cell::Null)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TableError {
    #[error("missing column '{0}'")]
    MissingColumn(String),

    #[error("duplicate column '{0}'")]
    DuplicateColumn(String),

    #[error("row {row} has {found} cells, expected {expected}")]
    WidthMismatch {
        row: usize,
        expected: usize,
        found: usize,
    },
}

/// Physical type a column is stored as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Bool,
    Int,
    Float,
    Date,
    Text,
}

/// Named columns over rows of cells.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DatasetTable {
    columns: Vec<String>,
    rows: Vec<Vec<Cell>>,
}

impl DatasetTable {
    /// Table with the given columns and no rows.
    pub fn new<I, S>(columns: I) -> Result<Self, TableError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let columns: Vec<String> = columns.into_iter().map(Into::into).collect();
        let mut seen = HashSet::new();
        for c in &columns {
            if !seen.insert(c.as_str()) {
                return Err(TableError::DuplicateColumn(c.clone()));
            }
        }
        Ok(Self {
            columns,
            rows: Vec::new(),
        })
    }

    pub fn from_rows<I, S>(columns: I, rows: Vec<Vec<Cell>>) -> Result<Self, TableError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut table = Self::new(columns)?;
        for row in rows {
            table.push_row(row)?;
        }
        Ok(table)
    }

    pub fn push_row(&mut self, row: Vec<Cell>) -> Result<(), TableError> {
        if row.len() != self.columns.len() {
            return Err(TableError::WidthMismatch {
                row: self.rows.len(),
                expected: self.columns.len(),
                found: row.len(),
            });
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Cell>] {
        &self.rows
    }

    pub fn height(&self) -> usize {
        self.rows.len()
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    fn require_column(&self, name: &str) -> Result<usize, TableError> {
        self.column_index(name)
            .ok_or_else(|| TableError::MissingColumn(name.to_string()))
    }

    pub fn get(&self, row: usize, column: &str) -> Option<&Cell> {
        let idx = self.column_index(column)?;
        self.rows.get(row).map(|r| &r[idx])
    }

    /// All values of one column, top to bottom.
    pub fn column(&self, name: &str) -> Result<Vec<&Cell>, TableError> {
        let idx = self.require_column(name)?;
        Ok(self.rows.iter().map(|r| &r[idx]).collect())
    }

    /// Rewrite `column` so every cell is either `Cell::Date` or `Cell::Null`.
    ///
    /// Returns the number of non-null cells that could not be parsed and
    /// were nulled out.
    pub fn normalize_dates(
        &mut self,
        column: &str,
        formats: &DateFormats,
    ) -> Result<usize, TableError> {
        let idx = self.require_column(column)?;
        let mut unparseable = 0;
        for row in &mut self.rows {
            let cell = &mut row[idx];
            if cell.is_null() || matches!(cell, Cell::Date(_)) {
                continue;
            }
            match cell.coerce_date(formats) {
                Some(d) => *cell = Cell::Date(d),
                None => {
                    unparseable += 1;
                    *cell = Cell::Null;
                }
            }
        }
        Ok(unparseable)
    }

    /// Rows whose date in `column` lies within the optional bounds.
    ///
    /// Expects a normalized date column; rows without a date are dropped.
    pub fn filter_dates(
        &self,
        column: &str,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<Self, TableError> {
        let idx = self.require_column(column)?;
        let rows = self
            .rows
            .iter()
            .filter(|r| match r[idx].as_date() {
                Some(d) => start.map_or(true, |s| d >= s) && end.map_or(true, |e| d <= e),
                None => false,
            })
            .cloned()
            .collect();
        Ok(Self {
            columns: self.columns.clone(),
            rows,
        })
    }

    /// Stable ascending sort on a normalized date column. Null dates sort last.
    pub fn sort_by_date(&mut self, column: &str) -> Result<(), TableError> {
        let idx = self.require_column(column)?;
        self.rows
            .sort_by_key(|r| (r[idx].as_date().is_none(), r[idx].as_date()));
        Ok(())
    }

    /// Latest date present in a normalized date column.
    pub fn latest_date(&self, column: &str) -> Result<Option<NaiveDate>, TableError> {
        let idx = self.require_column(column)?;
        Ok(self.rows.iter().filter_map(|r| r[idx].as_date()).max())
    }

    /// Append `other` below `self`, taking the union of columns.
    ///
    /// Columns keep `self`'s order followed by any columns only `other`
    /// has. Cells for columns a side lacks are `Null`.
    pub fn concat(mut self, other: DatasetTable) -> Self {
        for c in &other.columns {
            if !self.columns.contains(c) {
                self.columns.push(c.clone());
            }
        }
        let width = self.columns.len();
        for row in &mut self.rows {
            row.resize(width, Cell::Null);
        }

        let mapping: Vec<Option<usize>> = self
            .columns
            .iter()
            .map(|c| other.column_index(c))
            .collect();
        for mut row in other.rows {
            let aligned = mapping
                .iter()
                .map(|src| match src {
                    Some(i) => std::mem::replace(&mut row[*i], Cell::Null),
                    None => Cell::Null,
                })
                .collect();
            self.rows.push(aligned);
        }
        self
    }

    /// Combine `existing` with `fresh`: one row per date in `column`, the
    /// later row winning, sorted ascending.
    ///
    /// Both sides must already have `column` normalized. Rows with a null
    /// date are dropped since they can never be addressed by a range.
    pub fn merge_by_date(
        existing: Option<DatasetTable>,
        fresh: DatasetTable,
        column: &str,
    ) -> Result<Self, TableError> {
        let mut merged = match existing {
            Some(old) => old.concat(fresh),
            None => fresh,
        };
        let idx = merged.require_column(column)?;

        let mut last_seen: HashMap<NaiveDate, usize> = HashMap::new();
        for (i, row) in merged.rows.iter().enumerate() {
            if let Some(d) = row[idx].as_date() {
                last_seen.insert(d, i);
            }
        }

        let rows = std::mem::take(&mut merged.rows);
        merged.rows = rows
            .into_iter()
            .enumerate()
            .filter(|(i, row)| {
                row[idx]
                    .as_date()
                    .is_some_and(|d| last_seen.get(&d) == Some(i))
            })
            .map(|(_, row)| row)
            .collect();
        merged.sort_by_date(column)?;
        Ok(merged)
    }

    /// Narrowest type that holds every non-null cell of column `idx`.
    /// Mixed integer/float widens to float; anything else mixed becomes
    /// text. An all-null column is text.
    pub fn column_kind(&self, idx: usize) -> ColumnKind {
        let mut kind: Option<ColumnKind> = None;
        for row in &self.rows {
            let cell_kind = match &row[idx] {
                Cell::Null => continue,
                Cell::Bool(_) => ColumnKind::Bool,
                Cell::Int(_) => ColumnKind::Int,
                Cell::Float(_) => ColumnKind::Float,
                Cell::Date(_) => ColumnKind::Date,
                Cell::Text(_) => ColumnKind::Text,
            };
            kind = Some(match (kind, cell_kind) {
                (None, k) => k,
                (Some(a), b) if a == b => a,
                (Some(ColumnKind::Int), ColumnKind::Float)
                | (Some(ColumnKind::Float), ColumnKind::Int) => ColumnKind::Float,
                _ => return ColumnKind::Text,
            });
        }
        kind.unwrap_or(ColumnKind::Text)
    }

    /// Convert every cell to its column's [`ColumnKind`], so the table
    /// equals what a store round trip gives back.
    pub fn unify_column_types(&mut self) {
        for idx in 0..self.columns.len() {
            let kind = self.column_kind(idx);
            for row in &mut self.rows {
                let cell = &mut row[idx];
                match (kind, &*cell) {
                    (ColumnKind::Float, Cell::Int(v)) => *cell = Cell::Float(*v as f64),
                    (ColumnKind::Text, Cell::Text(_) | Cell::Null) => {}
                    (ColumnKind::Text, other) => *cell = Cell::Text(other.to_string()),
                    _ => {}
                }
            }
        }
    }

    /// BLAKE3 digest of columns and cells, hex-encoded.
    pub fn content_hash(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        for c in &self.columns {
            hasher.update(c.as_bytes());
            hasher.update(&[0]);
        }
        for row in &self.rows {
            for cell in row {
                match cell {
                    Cell::Null => hasher.update(&[0]),
                    Cell::Bool(b) => hasher.update(&[1, u8::from(*b)]),
                    Cell::Int(v) => hasher.update(&[2]).update(&v.to_le_bytes()),
                    Cell::Float(v) => hasher.update(&[3]).update(&v.to_le_bytes()),
                    Cell::Text(s) => hasher.update(&[4]).update(s.as_bytes()).update(&[0]),
                    Cell::Date(d) => hasher.update(&[5]).update(d.to_string().as_bytes()),
                };
            }
        }
        hasher.finalize().to_hex().to_string()
    }
}
