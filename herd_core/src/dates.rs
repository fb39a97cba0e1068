//! Date helpers shared by the engines.
//!
//! Dates are carried as `chrono::NaiveDate` internally and rendered as
//! `YYYY-MM-DD` at the edges. Every helper accepts either a date value or a
//! string through [`IntoDate`].

use crate::{Error, Result};
use chrono::{Duration, NaiveDate};

/// Canonical textual date format
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Length of the rolling lookback window, in days
pub const ROLLING_WINDOW_DAYS: i64 = 365;

/// Anything that can be normalized into a calendar date
pub trait IntoDate {
    fn into_date(self) -> Result<NaiveDate>;
}

impl IntoDate for NaiveDate {
    fn into_date(self) -> Result<NaiveDate> {
        Ok(self)
    }
}

impl IntoDate for &NaiveDate {
    fn into_date(self) -> Result<NaiveDate> {
        Ok(*self)
    }
}

impl IntoDate for &str {
    fn into_date(self) -> Result<NaiveDate> {
        NaiveDate::parse_from_str(self.trim(), DATE_FORMAT)
            .map_err(|e| Error::Format(format!("invalid date {:?}: {}", self, e)))
    }
}

impl IntoDate for &String {
    fn into_date(self) -> Result<NaiveDate> {
        self.as_str().into_date()
    }
}

impl IntoDate for String {
    fn into_date(self) -> Result<NaiveDate> {
        self.as_str().into_date()
    }
}

/// Parse a date (or pass a date through unchanged)
pub fn parse_date(value: impl IntoDate) -> Result<NaiveDate> {
    value.into_date()
}

/// Render a date (or re-render a date string) as `YYYY-MM-DD`
pub fn format_date(value: impl IntoDate) -> Result<String> {
    Ok(value.into_date()?.format(DATE_FORMAT).to_string())
}

/// Shift a date by `days` (negative moves backwards)
pub fn shift_date(date: NaiveDate, days: i64) -> Result<NaiveDate> {
    Duration::try_days(days)
        .and_then(|delta| date.checked_add_signed(delta))
        .ok_or_else(|| Error::Format(format!("{} shifted by {} days is out of range", date, days)))
}

/// `value + days`, rendered as `YYYY-MM-DD`
pub fn add_days(value: impl IntoDate, days: i64) -> Result<String> {
    format_date(shift_date(value.into_date()?, days)?)
}

/// `value - days`, rendered as `YYYY-MM-DD`
pub fn subtract_days(value: impl IntoDate, days: i64) -> Result<String> {
    format_date(shift_date(value.into_date()?, -days)?)
}

/// Days elapsed between the start of the rolling window and `date`.
///
/// The window starts 365 days before `today`. The result is positive when
/// `date` lies inside the last year, zero on the boundary day, and negative
/// once `date` has rolled out of the window.
pub fn rolling_window_offset(date: NaiveDate, today: NaiveDate) -> i64 {
    let window_start = today - Duration::days(ROLLING_WINDOW_DAYS);
    (date - window_start).num_days()
}

/// True when `date` is inside the rolling window (boundary day included)
pub fn within_rolling_window(date: NaiveDate, today: NaiveDate) -> bool {
    rolling_window_offset(date, today) >= 0
}
