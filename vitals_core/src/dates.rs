//! Date normalization for export timestamps.
//!
//! Export dates look like `2023-09-08 07:12:58 +0200`. Aggregation works at
//! day granularity: only the leading `YYYY-MM-DD` is used and the time of day
//! and UTC offset are dropped, so a record logged just after midnight in a
//! far-off timezone lands on its local calendar day, not its UTC day.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};

const DAY_FORMAT: &str = "%Y-%m-%d";
const EXPORT_FORMAT: &str = "%Y-%m-%d %H:%M:%S %z";

/// Parse the leading `YYYY-MM-DD` of `raw` into a calendar date.
pub fn parse_day(raw: &str) -> Option<NaiveDate> {
    let prefix = raw.trim_start().get(..10)?;
    NaiveDate::parse_from_str(prefix, DAY_FORMAT).ok()
}

/// Epoch milliseconds of UTC midnight on the day `raw` starts with.
pub fn day_timestamp(raw: &str) -> Option<i64> {
    parse_day(raw).map(day_start)
}

/// Epoch milliseconds of UTC midnight on `day`.
pub fn day_start(day: NaiveDate) -> i64 {
    day.and_time(NaiveTime::MIN).and_utc().timestamp_millis()
}

/// Calendar-day key of an epoch-milliseconds timestamp.
pub fn date_key(timestamp_ms: i64) -> Option<NaiveDate> {
    DateTime::from_timestamp_millis(timestamp_ms).map(|dt| dt.date_naive())
}

/// Full-precision epoch milliseconds, honouring the offset.
///
/// Accepts the export format, RFC 3339 and offset-less `YYYY-MM-DD HH:MM:SS`
/// (taken as UTC). Only used where sub-day precision matters, such as workout
/// durations.
pub fn parse_instant(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_str(raw, EXPORT_FORMAT) {
        return Some(dt.timestamp_millis());
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.timestamp_millis());
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|dt| dt.and_utc().timestamp_millis())
}
