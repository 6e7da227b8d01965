//! Relative calendar windows used to batch scraping and clustering runs.
//!
//! Every window ends on the last day of the previous month, so the current
//! partial month is never included.

use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{AcmError, Result};

/// Named relative window
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum TimeRange {
    LastMonth,
    LastHalfYear,
    LastYear,
}

/// Concrete inclusive date window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl TimeWindow {
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

impl TimeRange {
    pub const ALL: [TimeRange; 3] = [
        TimeRange::LastMonth,
        TimeRange::LastHalfYear,
        TimeRange::LastYear,
    ];

    /// Suffix used in dataset and file names, e.g. `last_half_year`.
    pub fn slug(&self) -> &'static str {
        match self {
            TimeRange::LastMonth => "last_month",
            TimeRange::LastHalfYear => "last_half_year",
            TimeRange::LastYear => "last_year",
        }
    }

    /// First day covered by the window.
    ///
    /// `LastYear` keeps the current month and only moves the year back, so on
    /// 2024-03-15 it starts at 2023-03-01 rather than 2023-01-01.
    pub fn start_date(&self, today: NaiveDate) -> Result<NaiveDate> {
        let (year, month) = (today.year(), today.month());
        let (year, month) = match self {
            TimeRange::LastMonth if month == 1 => (year - 1, 12),
            TimeRange::LastMonth => (year, month - 1),
            TimeRange::LastHalfYear if month <= 6 => (year - 1, 12 - (6 - month)),
            TimeRange::LastHalfYear => (year, month - 6),
            TimeRange::LastYear => (year - 1, month),
        };
        first_of_month(year, month)
    }

    /// Last day covered by the window: the day before the first of `today`'s month.
    pub fn end_date(&self, today: NaiveDate) -> Result<NaiveDate> {
        let first = first_of_month(today.year(), today.month())?;
        Ok(first - Duration::days(1))
    }

    pub fn window(&self, today: NaiveDate) -> Result<TimeWindow> {
        Ok(TimeWindow {
            start: self.start_date(today)?,
            end: self.end_date(today)?,
        })
    }
}

fn first_of_month(year: i32, month: u32) -> Result<NaiveDate> {
    NaiveDate::from_ymd_opt(year, month, 1)
        .ok_or_else(|| AcmError::Validation(format!("invalid month {}-{}", year, month)))
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

impl FromStr for TimeRange {
    type Err = AcmError;

    fn from_str(s: &str) -> Result<Self> {
        match s.replace('-', "_").as_str() {
            "last_month" => Ok(TimeRange::LastMonth),
            "last_half_year" => Ok(TimeRange::LastHalfYear),
            "last_year" => Ok(TimeRange::LastYear),
            other => Err(AcmError::Validation(format!("unknown time range '{}'", other))),
        }
    }
}
