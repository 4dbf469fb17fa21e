//! Civil-date and instant conversions. Everything is UTC.

use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, SecondsFormat, Utc};

use crate::model::Ms;

pub const MINUTE_MS: Ms = 60_000;
pub const HOUR_MS: Ms = 60 * MINUTE_MS;
pub const DAY_MS: Ms = 24 * HOUR_MS;

pub fn minutes(n: i64) -> Ms {
    n * MINUTE_MS
}

/// Anchor a time-of-day to a calendar date. The only place a rule's
/// wall-clock window becomes an absolute instant.
pub fn anchor(date: NaiveDate, time: NaiveTime) -> Ms {
    date.and_time(time).and_utc().timestamp_millis()
}

/// 0 = Sunday .. 6 = Saturday.
pub fn day_of_week(date: NaiveDate) -> u8 {
    date.weekday().num_days_from_sunday() as u8
}

/// UTC calendar date an instant falls on.
pub fn date_of(t: Ms) -> Option<NaiveDate> {
    DateTime::<Utc>::from_timestamp_millis(t).map(|dt| dt.date_naive())
}

/// Number of calendar days in the inclusive range `[from, to]` (0 if empty).
pub fn days_inclusive(from: NaiveDate, to: NaiveDate) -> i64 {
    if to < from {
        0
    } else {
        (to - from).num_days() + 1
    }
}

pub fn parse_date(s: &str) -> Result<NaiveDate, TimeError> {
    let s = s.trim();
    if s.is_empty() {
        return Err(TimeError::Empty("date"));
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|_| TimeError::BadDate(s.to_string()))
}

/// Accepts `HH:MM` or `HH:MM:SS`.
pub fn parse_time_of_day(s: &str) -> Result<NaiveTime, TimeError> {
    let s = s.trim();
    if s.is_empty() {
        return Err(TimeError::Empty("time"));
    }
    NaiveTime::parse_from_str(s, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S"))
        .map_err(|_| TimeError::BadTime(s.to_string()))
}

/// Parse an RFC 3339 timestamp with an explicit offset.
pub fn parse_instant(s: &str) -> Result<Ms, TimeError> {
    let s = s.trim();
    if s.is_empty() {
        return Err(TimeError::Empty("timestamp"));
    }
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.timestamp_millis())
        .map_err(|_| TimeError::BadInstant(s.to_string()))
}

/// `2024-01-01T09:00:00.000Z`
pub fn format_instant(t: Ms) -> String {
    match DateTime::<Utc>::from_timestamp_millis(t) {
        Some(dt) => dt.to_rfc3339_opts(SecondsFormat::Millis, true),
        None => t.to_string(),
    }
}

pub fn format_time_of_day(t: NaiveTime) -> String {
    t.format("%H:%M").to_string()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimeError {
    Empty(&'static str),
    BadDate(String),
    BadTime(String),
    BadInstant(String),
}

impl std::fmt::Display for TimeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimeError::Empty(what) => write!(f, "missing {what}"),
            TimeError::BadDate(s) => write!(f, "invalid date '{s}', expected YYYY-MM-DD"),
            TimeError::BadTime(s) => write!(f, "invalid time of day '{s}', expected HH:MM"),
            TimeError::BadInstant(s) => {
                write!(f, "invalid timestamp '{s}', expected RFC 3339 with offset")
            }
        }
    }
}

impl std::error::Error for TimeError {}
