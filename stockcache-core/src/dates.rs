//! Date normalization and inclusive date intervals.
//!
//! Dates enter the system as strings in one of a configurable set of
//! formats and are converted to [`NaiveDate`] immediately. Nothing past
//! this module compares date strings.

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DateError {
    #[error("unrecognized date '{input}' (accepted formats: {formats})")]
    Unrecognized { input: String, formats: String },

    #[error("invalid range: start {start} is after end {end}")]
    InvalidRange { start: NaiveDate, end: NaiveDate },
}

/// Ordered list of `chrono` format strings tried when parsing a date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DateFormats(Vec<String>);

impl DateFormats {
    pub fn new<I, S>(formats: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(formats.into_iter().map(Into::into).collect())
    }

    pub fn formats(&self) -> &[String] {
        &self.0
    }

    /// Parse `input` with the first format that accepts it.
    ///
    /// Surrounding whitespace is ignored. A trailing time component
    /// (`2023-01-05 00:00:00`, `2023-01-05T00:00:00`) is tolerated since
    /// some providers emit midnight timestamps in date columns.
    pub fn parse(&self, input: &str) -> Result<NaiveDate, DateError> {
        let trimmed = input.trim();
        let date_part = trimmed
            .split(|c: char| c == ' ' || c == 'T')
            .next()
            .unwrap_or(trimmed);

        for candidate in [trimmed, date_part] {
            for fmt in &self.0 {
                if let Ok(d) = NaiveDate::parse_from_str(candidate, fmt) {
                    return Ok(d);
                }
            }
        }

        Err(DateError::Unrecognized {
            input: input.to_string(),
            formats: self.0.join(", "),
        })
    }

    /// Like [`parse`](Self::parse) but for optional bounds.
    pub fn parse_opt(&self, input: Option<&str>) -> Result<Option<NaiveDate>, DateError> {
        input.map(|s| self.parse(s)).transpose()
    }
}

impl Default for DateFormats {
    fn default() -> Self {
        Self::new(["%Y-%m-%d", "%Y%m%d"])
    }
}

/// Inclusive date interval `[start, end]` with `start <= end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DateRange {
    start: NaiveDate,
    end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, DateError> {
        if start > end {
            return Err(DateError::InvalidRange { start, end });
        }
        Ok(Self { start, end })
    }

    /// Parse both bounds with `formats` and validate ordering.
    pub fn parse(start: &str, end: &str, formats: &DateFormats) -> Result<Self, DateError> {
        Self::new(formats.parse(start)?, formats.parse(end)?)
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    /// True if `other` lies entirely inside `self`.
    pub fn covers(&self, other: &DateRange) -> bool {
        self.start <= other.start && self.end >= other.end
    }

    /// True if the two intervals share a day or one starts the day after
    /// the other ends, i.e. their union has no gap.
    pub fn touches(&self, other: &DateRange) -> bool {
        let (first, second) = if self.start <= other.start {
            (self, other)
        } else {
            (other, self)
        };
        match first.end.checked_add_days(Days::new(1)) {
            Some(next) => second.start <= next,
            None => true,
        }
    }

    /// Smallest interval containing both.
    pub fn hull(&self, other: &DateRange) -> DateRange {
        DateRange {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..={}", self.start, self.end)
    }
}
