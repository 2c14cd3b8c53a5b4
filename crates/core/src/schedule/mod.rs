//! Conversion between wall-clock schedule input and stored UTC instants.
//!
//! Every stored instant has millisecond precision and is written as
//! `YYYY-MM-DDTHH:MM:SS.mmmZ`, so lexical order in SQLite equals
//! chronological order.

use chrono::{
    DateTime, Datelike, FixedOffset, NaiveDate, NaiveDateTime, Offset, SecondsFormat,
    SubsecRound, TimeDelta, Utc,
};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("Invalid date: {0}")]
    InvalidDate(String),
}

/// Years that fit the four-digit storage format.
const STORABLE_YEARS: std::ops::RangeInclusive<i32> = 0..=9999;

/// 0000-01-01T00:00:00.000Z and 9999-12-31T23:59:59.999Z in epoch milliseconds.
const FIRST_STORABLE_MS: i64 = -62_167_219_200_000;
const LAST_STORABLE_MS: i64 = 253_402_300_799_999;

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
];

/// Zone in which callers express schedule times and calendar dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleZone {
    offset: FixedOffset,
}

impl ScheduleZone {
    /// Wall-clock values are stored as-is (zero offset).
    pub fn naive_local() -> Self {
        Self { offset: Utc.fix() }
    }

    /// Wall-clock values are local to `hours` east of UTC.
    pub fn utc_offset_hours(hours: i32) -> Self {
        let offset = FixedOffset::east_opt(hours * 3600).unwrap_or_else(|| Utc.fix());
        Self { offset }
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// Convert a wall-clock time in this zone to a UTC instant.
    pub fn from_local(&self, local: NaiveDateTime) -> DateTime<Utc> {
        let utc = local - TimeDelta::seconds(i64::from(self.offset.local_minus_utc()));
        utc.and_utc().trunc_subsecs(3)
    }

    /// First millisecond of `date` in this zone.
    pub fn start_of_day(&self, date: NaiveDate) -> DateTime<Utc> {
        self.from_local(date.and_time(chrono::NaiveTime::MIN))
    }

    /// Last millisecond (23:59:59.999) of `date` in this zone.
    pub fn end_of_day(&self, date: NaiveDate) -> DateTime<Utc> {
        match date.and_hms_milli_opt(23, 59, 59, 999) {
            Some(local) => self.from_local(local),
            None => self.start_of_day(date) + TimeDelta::milliseconds(86_399_999),
        }
    }

    /// Parse a scheduled time.
    ///
    /// Accepts an RFC 3339 instant (its own offset wins), a naive date-time
    /// (interpreted in this zone), or a bare date (start of that day).
    /// The resulting UTC instant must fall in years 0000 through 9999.
    pub fn parse_scheduled(&self, input: &str) -> Result<DateTime<Utc>, ScheduleError> {
        let input = input.trim();
        let instant = self
            .parse_any(input)
            .ok_or_else(|| ScheduleError::InvalidTimestamp(input.to_string()))?;

        if !STORABLE_YEARS.contains(&instant.year()) {
            return Err(ScheduleError::InvalidTimestamp(input.to_string()));
        }
        Ok(instant)
    }

    fn parse_any(&self, input: &str) -> Option<DateTime<Utc>> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
            return Some(dt.with_timezone(&Utc).trunc_subsecs(3));
        }

        for format in NAIVE_FORMATS {
            if let Ok(local) = NaiveDateTime::parse_from_str(input, format) {
                return Some(self.from_local(local));
            }
        }

        parse_date(input).ok().map(|date| self.start_of_day(date))
    }
}

impl Default for ScheduleZone {
    fn default() -> Self {
        Self::naive_local()
    }
}

/// Parse a calendar date in `YYYY-MM-DD` form with a year from 0000 to 9999.
pub fn parse_date(input: &str) -> Result<NaiveDate, ScheduleError> {
    NaiveDate::parse_from_str(input.trim(), "%Y-%m-%d")
        .ok()
        .filter(|date| STORABLE_YEARS.contains(&date.year()))
        .ok_or_else(|| ScheduleError::InvalidDate(input.to_string()))
}

/// Pull `instant` into the range the storage format can represent.
///
/// Day bounds near year 0000 or 9999 can cross it once the zone offset is
/// applied.
pub fn clamp_to_storable(instant: DateTime<Utc>) -> DateTime<Utc> {
    let millis = instant
        .timestamp_millis()
        .clamp(FIRST_STORABLE_MS, LAST_STORABLE_MS);
    DateTime::from_timestamp_millis(millis).unwrap_or(instant)
}

/// Current time truncated to storage precision.
pub fn now_millis() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

/// Canonical storage representation of an instant.
pub fn to_storage_string(instant: &DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse the canonical storage representation.
pub fn from_storage_string(value: &str) -> Result<DateTime<Utc>, ScheduleError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| ScheduleError::InvalidTimestamp(value.to_string()))
}
