//! Clock abstraction and client timestamp parsing
//!
//! The desktop client sends dates in several shapes: RFC 3339 strings with
//! `Z` or an offset, naive ISO strings, bare dates, and unix epochs in
//! seconds or milliseconds. Everything is normalised to `DateTime<Utc>`.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde_json::Value;
use std::sync::Mutex;

/// Epoch values above this are treated as milliseconds
const MILLIS_THRESHOLD: f64 = 1e12;

/// Source of "now" for services that must be testable without wall time
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Virtual clock advanced explicitly by tests
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(start) }
    }

    pub fn set(&self, instant: DateTime<Utc>) {
        if let Ok(mut now) = self.now.lock() {
            *now = instant;
        }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut now) = self.now.lock() {
            *now += by;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        match self.now.lock() {
            Ok(now) => *now,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Milliseconds since the unix epoch
pub fn to_millis(ts: &DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

/// Parse an ISO-8601 date or date-time string
///
/// Accepts `Z` or numeric offsets, naive date-times (taken as UTC), a space
/// instead of `T`, and bare dates (midnight UTC).
pub fn parse_iso(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    let spaced = s.replacen(' ', "T", 1);
    if let Ok(dt) = DateTime::parse_from_rfc3339(&spaced) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(&spaced, fmt) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// Parse a unix epoch given in seconds or milliseconds
pub fn parse_epoch(value: f64) -> Option<DateTime<Utc>> {
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    let millis = if value > MILLIS_THRESHOLD { value } else { value * 1000.0 };
    Utc.timestamp_millis_opt(millis.round() as i64).single()
}

/// Parse a timestamp field from a wire document (string or number)
pub fn parse_client_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => parse_iso(s).or_else(|| s.trim().parse::<f64>().ok().and_then(parse_epoch)),
        Value::Number(n) => n.as_f64().and_then(parse_epoch),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_iso_variants() {
        let expected = Utc.with_ymd_and_hms(2024, 3, 1, 10, 30, 0).unwrap();
        assert_eq!(parse_iso("2024-03-01T10:30:00Z"), Some(expected));
        assert_eq!(parse_iso("2024-03-01T13:30:00+03:00"), Some(expected));
        assert_eq!(parse_iso("2024-03-01 10:30:00"), Some(expected));
        assert_eq!(parse_iso("2024-03-01T10:30:00"), Some(expected));
        assert_eq!(
            parse_iso("2024-03-01"),
            Some(Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap())
        );
        assert_eq!(parse_iso("yesterday"), None);
        assert_eq!(parse_iso(""), None);
    }

    #[test]
    fn test_epoch_seconds_and_millis() {
        let expected = Utc.with_ymd_and_hms(2024, 3, 1, 10, 30, 0).unwrap();
        let secs = expected.timestamp() as f64;
        let millis = expected.timestamp_millis() as f64;
        assert_eq!(parse_epoch(secs), Some(expected));
        assert_eq!(parse_epoch(millis), Some(expected));
        assert_eq!(parse_client_timestamp(&serde_json::json!(millis)), Some(expected));
        assert_eq!(parse_epoch(-1.0), None);
    }

    #[test]
    fn test_parse_client_timestamp_rejects_non_scalars() {
        assert_eq!(parse_client_timestamp(&serde_json::json!(null)), None);
        assert_eq!(parse_client_timestamp(&serde_json::json!([1, 2])), None);
    }

    #[test]
    fn test_manual_clock_advances() {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let clock = ManualClock::new(start);
        clock.advance(Duration::minutes(5));
        assert_eq!(clock.now(), start + Duration::minutes(5));
        clock.set(start);
        assert_eq!(clock.now(), start);
    }
}
