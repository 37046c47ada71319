//! Roast schedule queries (only what the sync path touches)

use super::{date_text, get_opt_ts, get_uuid, ts_text};
use chrono::{DateTime, NaiveDate, Utc};
use roastsync_common::db::Schedule;
use roastsync_common::{Error, Result};
use sqlx::{Row, SqliteConnection};
use uuid::Uuid;

pub async fn get(conn: &mut SqliteConnection, id: Uuid) -> Result<Option<Schedule>> {
    let row = sqlx::query(
        "SELECT id, user_id, title, scheduled_date, status, completed_at FROM schedules WHERE id = ?",
    )
    .bind(id.to_string())
    .fetch_optional(&mut *conn)
    .await?;

    match row {
        Some(row) => {
            let date: String = row.try_get("scheduled_date")?;
            Ok(Some(Schedule {
                id: get_uuid(&row, "id")?,
                user_id: get_uuid(&row, "user_id")?,
                title: row.try_get("title")?,
                scheduled_date: NaiveDate::parse_from_str(&date, "%Y-%m-%d")
                    .map_err(|e| Error::Internal(format!("Stored date '{}' is corrupt: {}", date, e)))?,
                status: row.try_get("status")?,
                completed_at: get_opt_ts(&row, "completed_at")?,
            }))
        }
        None => Ok(None),
    }
}

pub async fn insert(conn: &mut SqliteConnection, schedule: &Schedule) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO schedules (id, user_id, title, scheduled_date, status, completed_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(schedule.id.to_string())
    .bind(schedule.user_id.to_string())
    .bind(&schedule.title)
    .bind(date_text(&schedule.scheduled_date))
    .bind(&schedule.status)
    .bind(schedule.completed_at.as_ref().map(ts_text))
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// pending -> completed; any other status is left alone.
/// Returns true when the transition happened.
pub async fn complete_if_pending(
    conn: &mut SqliteConnection,
    id: Uuid,
    at: DateTime<Utc>,
) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE schedules SET status = 'completed', completed_at = ? WHERE id = ? AND status = 'pending'",
    )
    .bind(ts_text(&at))
    .bind(id.to_string())
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() > 0)
}
