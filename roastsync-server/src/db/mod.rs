//! Database access layer
//!
//! Query functions take `&mut SqliteConnection` so the same code runs on a
//! pooled connection or inside a write transaction. Identifiers are TEXT,
//! decimals are canonical decimal TEXT, timestamps are RFC 3339 TEXT with
//! millisecond precision (lexicographically ordered).

pub mod batches;
pub mod blends;
pub mod coffees;
pub mod goals;
pub mod idempotency;
pub mod machines;
pub mod profiles;
pub mod roasts;
pub mod schedules;
pub mod tasks;

use chrono::{DateTime, NaiveDate, NaiveTime, SecondsFormat, Utc};
use roastsync_common::{Error, Result};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::str::FromStr;
use uuid::Uuid;

/// Canonical timestamp text
pub fn ts_text(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn get_uuid(row: &SqliteRow, column: &str) -> Result<Uuid> {
    let text: String = row.try_get(column)?;
    Ok(Uuid::parse_str(&text)?)
}

pub(crate) fn get_opt_uuid(row: &SqliteRow, column: &str) -> Result<Option<Uuid>> {
    let text: Option<String> = row.try_get(column)?;
    match text {
        Some(t) if !t.is_empty() => Ok(Some(Uuid::parse_str(&t)?)),
        _ => Ok(None),
    }
}

pub(crate) fn get_decimal(row: &SqliteRow, column: &str) -> Result<Decimal> {
    let text: String = row.try_get(column)?;
    Ok(Decimal::from_str(&text)?)
}

pub(crate) fn get_opt_decimal(row: &SqliteRow, column: &str) -> Result<Option<Decimal>> {
    let text: Option<String> = row.try_get(column)?;
    text.map(|t| Decimal::from_str(&t).map_err(Error::from))
        .transpose()
}

pub(crate) fn get_ts(row: &SqliteRow, column: &str) -> Result<DateTime<Utc>> {
    let text: String = row.try_get(column)?;
    parse_ts(&text)
}

pub(crate) fn get_opt_ts(row: &SqliteRow, column: &str) -> Result<Option<DateTime<Utc>>> {
    let text: Option<String> = row.try_get(column)?;
    text.map(|t| parse_ts(&t)).transpose()
}

fn parse_ts(text: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Stored timestamp '{}' is corrupt: {}", text, e)))
}

pub(crate) fn get_opt_date(row: &SqliteRow, column: &str) -> Result<Option<NaiveDate>> {
    let text: Option<String> = row.try_get(column)?;
    text.map(|t| {
        NaiveDate::parse_from_str(&t, "%Y-%m-%d")
            .map_err(|e| Error::Internal(format!("Stored date '{}' is corrupt: {}", t, e)))
    })
    .transpose()
}

pub(crate) fn get_opt_time(row: &SqliteRow, column: &str) -> Result<Option<NaiveTime>> {
    let text: Option<String> = row.try_get(column)?;
    text.map(|t| parse_time(&t)).transpose()
}

/// `HH:MM` or `HH:MM:SS`
pub fn parse_time(text: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(text, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(text, "%H:%M"))
        .map_err(|e| Error::InvalidInput(format!("Invalid time '{}': {}", text, e)))
}

pub(crate) fn time_text(t: &NaiveTime) -> String {
    t.format("%H:%M:%S").to_string()
}

pub(crate) fn date_text(d: &NaiveDate) -> String {
    d.format("%Y-%m-%d").to_string()
}

/// Decode a JSON TEXT column
pub(crate) fn get_json<T: DeserializeOwned>(row: &SqliteRow, column: &str) -> Result<T> {
    let text: String = row.try_get(column)?;
    Ok(serde_json::from_str(&text)?)
}

pub(crate) fn get_opt_json<T: DeserializeOwned>(row: &SqliteRow, column: &str) -> Result<Option<T>> {
    let text: Option<String> = row.try_get(column)?;
    text.map(|t| serde_json::from_str(&t).map_err(Error::from))
        .transpose()
}

pub(crate) fn get_bool(row: &SqliteRow, column: &str) -> Result<bool> {
    let value: i64 = row.try_get(column)?;
    Ok(value != 0)
}
