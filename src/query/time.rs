//! Time Range and Interval Handling
//!
//! The warehouse schema encodes request time as pre-split date columns
//! (`request_at_date`, `request_at_hour`, `request_at_year`,
//! `request_at_month`), so each interval granularity maps to a fixed SQL
//! expression rather than a date-truncation function. This module owns that
//! mapping, time-range normalization, and densification of sparse
//! time-keyed counts into complete bucket sequences.

use crate::query::error::{QueryError, QueryResult};
use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, SecondsFormat, TimeZone, Timelike, Utc};
use serde_json::{json, Value};
use std::collections::BTreeMap;

/// Time-bucketing granularity for time-series aggregation
///
/// Minute and week are recognized request tokens but the warehouse schema
/// has no column encoding for them, so [`Interval::from_token`] rejects
/// them instead of letting a query silently degrade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interval {
    Hour,
    Day,
    Month,
}

impl Interval {
    /// Parse an interval token from a request
    pub fn from_token(token: &str) -> QueryResult<Self> {
        match token {
            "hour" => Ok(Self::Hour),
            "day" => Ok(Self::Day),
            "month" => Ok(Self::Month),
            other => Err(QueryError::UnsupportedInterval(other.to_string())),
        }
    }

    /// The SQL expression producing this interval's grouping key
    pub fn sql_expr(&self) -> &'static str {
        match self {
            Self::Hour => {
                "CAST(request_at_date AS CHAR(10)) || '-' || CAST(request_at_hour AS CHAR(2))"
            }
            Self::Day => "request_at_date",
            Self::Month => {
                "CAST(request_at_year AS CHAR(4)) || '-' || CAST(request_at_month AS CHAR(2))"
            }
        }
    }

    /// Parse a grouping key emitted by [`Interval::sql_expr`] back into a
    /// UTC timestamp
    ///
    /// The warehouse casts numeric columns without zero padding, so keys
    /// are split on `-` and each component parsed as a bare integer
    /// (`2020-1` and `2020-01` are the same month key).
    pub fn parse_key(&self, key: &str) -> QueryResult<DateTime<Utc>> {
        let parts: Vec<u32> = key
            .split('-')
            .map(|p| p.trim().parse::<u32>())
            .collect::<Result<_, _>>()
            .map_err(|_| QueryError::InvalidTime(key.to_string()))?;

        let expected = match self {
            Self::Hour => 4,
            Self::Day => 3,
            Self::Month => 2,
        };
        if parts.len() != expected {
            return Err(QueryError::InvalidTime(key.to_string()));
        }

        let (year, month) = (parts[0] as i32, parts[1]);
        let day = if *self == Self::Month { 1 } else { parts[2] };
        let hour = if *self == Self::Hour { parts[3] } else { 0 };

        match Utc.with_ymd_and_hms(year, month, day, hour, 0, 0) {
            chrono::LocalResult::Single(dt) => Ok(dt),
            _ => Err(QueryError::InvalidTime(key.to_string())),
        }
    }

    /// Truncate a timestamp down to the start of this interval
    pub fn align(&self, t: DateTime<Utc>) -> DateTime<Utc> {
        let aligned = match self {
            Self::Hour => t.with_minute(0),
            Self::Day => t.with_hour(0).and_then(|d| d.with_minute(0)),
            Self::Month => t
                .with_day(1)
                .and_then(|d| d.with_hour(0))
                .and_then(|d| d.with_minute(0)),
        };
        aligned
            .and_then(|d| d.with_second(0))
            .and_then(|d| d.with_nanosecond(0))
            .unwrap_or(t)
    }

    /// The start of the interval immediately after `t`
    pub fn advance(&self, t: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Self::Hour => t + Duration::hours(1),
            Self::Day => t + Duration::days(1),
            Self::Month => t
                .checked_add_months(Months::new(1))
                .unwrap_or_else(|| t + Duration::days(31)),
        }
    }
}

impl std::fmt::Display for Interval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Hour => write!(f, "hour"),
            Self::Day => write!(f, "day"),
            Self::Month => write!(f, "month"),
        }
    }
}

/// A normalized query time range
///
/// After construction `start <= end` always holds: an end given as a bare
/// date extends to the end of that day, and an end in the future clamps to
/// the current moment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    /// Parse and normalize a time range from request strings
    ///
    /// Accepts RFC 3339 timestamps, `YYYY-MM-DD HH:MM:SS`, or bare
    /// `YYYY-MM-DD` dates. A bare start date means midnight; a bare end
    /// date means 23:59:59 of that day.
    pub fn parse(start: &str, end: &str) -> QueryResult<Self> {
        Self::parse_at(start, end, Utc::now())
    }

    /// Same as [`TimeRange::parse`] with an injectable "now" for the
    /// future-end clamp
    pub fn parse_at(start: &str, end: &str, now: DateTime<Utc>) -> QueryResult<Self> {
        let start = parse_time_value(start, false)?;
        let mut end = parse_time_value(end, true)?;
        if end > now {
            end = now;
        }
        Ok(Self {
            start: start.min(end),
            end,
        })
    }

    /// Start and end rendered as `YYYY-MM-DD` for date-column predicates
    pub fn date_bounds(&self) -> (String, String) {
        (
            self.start.format("%Y-%m-%d").to_string(),
            self.end.format("%Y-%m-%d").to_string(),
        )
    }
}

fn parse_time_value(value: &str, end_of_day: bool) -> QueryResult<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S") {
        return Ok(Utc.from_utc_datetime(&naive));
    }
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        let time = if end_of_day {
            date.and_hms_opt(23, 59, 59)
        } else {
            date.and_hms_opt(0, 0, 0)
        };
        if let Some(naive) = time {
            return Ok(Utc.from_utc_datetime(&naive));
        }
    }
    Err(QueryError::InvalidTime(value.to_string()))
}

/// Build the standard time bucket document
///
/// `key` is epoch milliseconds and `key_as_string` the ISO-8601 UTC form,
/// matching the legacy aggregation API.
pub fn time_bucket(time: DateTime<Utc>, doc_count: i64) -> Value {
    json!({
        "key": time.timestamp_millis(),
        "key_as_string": time.to_rfc3339_opts(SecondsFormat::Secs, true),
        "doc_count": doc_count,
    })
}

/// Densify a sparse epoch-keyed bucket mapping into a complete ascending
/// sequence
///
/// Covers every interval boundary from the range start (aligned down)
/// through the range end inclusive. Missing boundaries get a zero-count
/// placeholder with the same shape as an observed bucket. Output depends
/// only on the inputs, so identical sparse data and range always produce
/// identical sequences.
pub fn fill_time_buckets(
    observed: &BTreeMap<i64, Value>,
    range: &TimeRange,
    interval: Interval,
) -> Vec<Value> {
    let mut buckets = Vec::new();
    let mut time = interval.align(range.start);
    while time <= range.end {
        match observed.get(&time.timestamp()) {
            Some(bucket) => buckets.push(bucket.clone()),
            None => buckets.push(time_bucket(time, 0)),
        }
        time = interval.advance(time);
    }
    buckets
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn test_interval_tokens() {
        assert_eq!(Interval::from_token("day").unwrap(), Interval::Day);
        assert_eq!(Interval::from_token("hour").unwrap(), Interval::Hour);
        assert_eq!(Interval::from_token("month").unwrap(), Interval::Month);
    }

    #[test]
    fn test_unimplemented_intervals_fail_fast() {
        for token in ["minute", "week", "fortnight"] {
            match Interval::from_token(token) {
                Err(QueryError::UnsupportedInterval(t)) => assert_eq!(t, token),
                other => panic!("expected unsupported interval, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_parse_key_day() {
        let t = Interval::Day.parse_key("2020-01-03").unwrap();
        assert_eq!(t, utc(2020, 1, 3, 0, 0, 0));
    }

    #[test]
    fn test_parse_key_tolerates_unpadded_components() {
        let t = Interval::Month.parse_key("2020-1").unwrap();
        assert_eq!(t, utc(2020, 1, 1, 0, 0, 0));

        let t = Interval::Hour.parse_key("2020-01-03-5").unwrap();
        assert_eq!(t, utc(2020, 1, 3, 5, 0, 0));
    }

    #[test]
    fn test_parse_key_rejects_garbage() {
        assert!(Interval::Day.parse_key("not-a-date").is_err());
        assert!(Interval::Hour.parse_key("2020-01-03").is_err());
    }

    #[test]
    fn test_align_and_advance_month() {
        let t = utc(2020, 12, 15, 13, 45, 12);
        let aligned = Interval::Month.align(t);
        assert_eq!(aligned, utc(2020, 12, 1, 0, 0, 0));
        assert_eq!(Interval::Month.advance(aligned), utc(2021, 1, 1, 0, 0, 0));
    }

    #[test]
    fn test_time_range_end_of_day() {
        let now = utc(2021, 6, 1, 0, 0, 0);
        let range = TimeRange::parse_at("2020-01-01", "2020-01-03", now).unwrap();
        assert_eq!(range.start, utc(2020, 1, 1, 0, 0, 0));
        assert_eq!(range.end, utc(2020, 1, 3, 23, 59, 59));
    }

    #[test]
    fn test_time_range_clamps_future_end() {
        let now = utc(2020, 1, 2, 12, 0, 0);
        let range = TimeRange::parse_at("2020-01-01", "2030-01-01", now).unwrap();
        assert_eq!(range.end, now);
        assert!(range.start <= range.end);
    }

    #[test]
    fn test_fill_three_empty_day_buckets() {
        let now = utc(2021, 6, 1, 0, 0, 0);
        let range = TimeRange::parse_at("2020-01-01", "2020-01-03", now).unwrap();
        let buckets = fill_time_buckets(&BTreeMap::new(), &range, Interval::Day);

        assert_eq!(buckets.len(), 3);
        let keys: Vec<i64> = buckets.iter().map(|b| b["key"].as_i64().unwrap()).collect();
        assert!(keys.windows(2).all(|w| w[0] < w[1]));
        for bucket in &buckets {
            assert_eq!(bucket["doc_count"], 0);
        }
        assert_eq!(buckets[0]["key_as_string"], "2020-01-01T00:00:00Z");
    }

    #[test]
    fn test_fill_preserves_observed_buckets() {
        let now = utc(2021, 6, 1, 0, 0, 0);
        let range = TimeRange::parse_at("2020-01-01", "2020-01-03", now).unwrap();

        let day2 = utc(2020, 1, 2, 0, 0, 0);
        let mut observed = BTreeMap::new();
        observed.insert(day2.timestamp(), time_bucket(day2, 42));

        let buckets = fill_time_buckets(&observed, &range, Interval::Day);
        assert_eq!(buckets.len(), 3);
        assert_eq!(buckets[0]["doc_count"], 0);
        assert_eq!(buckets[1]["doc_count"], 42);
        assert_eq!(buckets[2]["doc_count"], 0);
    }
}
