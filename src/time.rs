//! Wall-clock parsing and formatting.
//!
//! Timestamps are naive wall-clock values stored as Unix milliseconds, as if
//! they were UTC. Hour-of-day therefore falls out of plain arithmetic.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Timelike};

use crate::model::Ms;

pub const MINUTE_MS: Ms = 60_000;
pub const HOUR_MS: Ms = 3_600_000;
pub const DAY_MS: Ms = 86_400_000;

const TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// Parse an ISO-8601 timestamp. An explicit offset is dropped in favour of the
/// wall-clock reading it was written with.
pub fn parse_timestamp(s: &str) -> Option<Ms> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_local().and_utc().timestamp_millis());
    }
    let s = s.strip_suffix('Z').unwrap_or(s);
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|dt| dt.and_utc().timestamp_millis())
}

pub fn format_timestamp(ms: Ms) -> String {
    match DateTime::from_timestamp_millis(ms) {
        Some(dt) => dt.naive_utc().format("%Y-%m-%dT%H:%M:%S%.3f").to_string(),
        None => ms.to_string(),
    }
}

/// Parse `HH:MM` or `HH:MM:SS` into milliseconds since midnight.
pub fn parse_time_of_day(s: &str) -> Option<Ms> {
    let s = s.trim();
    let t = NaiveTime::parse_from_str(s, "%H:%M:%S%.f")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
        .ok()?;
    Some(t.num_seconds_from_midnight() as Ms * 1000 + (t.nanosecond() / 1_000_000) as Ms)
}

pub fn format_time_of_day(ms: Ms) -> String {
    let secs = (ms.rem_euclid(DAY_MS) / 1000) as u32;
    match NaiveTime::from_num_seconds_from_midnight_opt(secs, 0) {
        Some(t) => t.format("%H:%M:%S").to_string(),
        None => ms.to_string(),
    }
}

/// Parse `YYYY-MM-DD` into the instant of that day's midnight.
pub fn parse_date(s: &str) -> Option<Ms> {
    let d = NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok()?;
    Some(d.and_hms_opt(0, 0, 0)?.and_utc().timestamp_millis())
}

/// Hour of day (0–23) of a timestamp or of a time-of-day value.
pub fn hour_of_day(ms: Ms) -> Ms {
    ms.rem_euclid(DAY_MS) / HOUR_MS
}

/// First and last millisecond of the day starting at `midnight`, both inclusive.
pub fn day_bounds(midnight: Ms) -> (Ms, Ms) {
    (midnight, midnight + DAY_MS - 1)
}

pub fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or(0)
}
