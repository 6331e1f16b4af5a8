//! Scripted remote source shared by the integration tests.

#![allow(dead_code)]

use chrono::NaiveDate;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use stockcache_core::{
    Cell, DatasetKind, DatasetTable, DateRange, FetchError, RemoteDataSource, SymbolIdentity,
};

pub fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

pub fn range(a: NaiveDate, b: NaiveDate) -> DateRange {
    DateRange::new(a, b).unwrap()
}

/// Returns one row per calendar day of the requested range with text
/// dates, the way the provider does. The `收盘` column carries the call
/// number so overwritten rows can be told apart.
#[derive(Default)]
pub struct ScriptedSource {
    calls: AtomicUsize,
    requested: Mutex<Vec<DateRange>>,
    fail_next: Mutex<Option<FetchError>>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requested(&self) -> Vec<DateRange> {
        self.requested.lock().unwrap().clone()
    }

    pub fn fail_next(&self, err: FetchError) {
        *self.fail_next.lock().unwrap() = Some(err);
    }
}

impl RemoteDataSource for ScriptedSource {
    fn name(&self) -> &str {
        "scripted"
    }

    fn fetch_range(
        &self,
        _symbol: &SymbolIdentity,
        _kind: &DatasetKind,
        range: DateRange,
    ) -> Result<DatasetTable, FetchError> {
        if let Some(err) = self.fail_next.lock().unwrap().take() {
            return Err(err);
        }
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.requested.lock().unwrap().push(range);

        let mut table = DatasetTable::new(["日期", "股票代码", "收盘"]).unwrap();
        let mut day = range.start();
        while day <= range.end() {
            table
                .push_row(vec![
                    Cell::from(day.format("%Y-%m-%d").to_string()),
                    Cell::from("000858"),
                    Cell::Int(call as i64),
                ])
                .unwrap();
            day = day.succ_opt().unwrap();
        }
        Ok(table)
    }

    fn fetch_snapshot(
        &self,
        _symbol: &SymbolIdentity,
        kind: &DatasetKind,
    ) -> Result<DatasetTable, FetchError> {
        Err(FetchError::Unsupported(kind.storage_name()))
    }
}

/// Dates of a table's `日期` column, top to bottom.
pub fn dates(table: &DatasetTable) -> Vec<NaiveDate> {
    table
        .column("日期")
        .unwrap()
        .into_iter()
        .map(|c| c.as_date().unwrap())
        .collect()
}

/// Every calendar day in `range`.
pub fn days(range: DateRange) -> Vec<NaiveDate> {
    range
        .start()
        .iter_days()
        .take_while(|day| *day <= range.end())
        .collect()
}
