//! Production batch queries

use super::{get_decimal, get_opt_uuid, get_uuid, ts_text};
use roastsync_common::db::{Batch, BatchStatus};
use roastsync_common::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use uuid::Uuid;

fn from_row(row: &SqliteRow) -> Result<Batch> {
    let status: String = row.try_get("status")?;
    Ok(Batch {
        id: get_uuid(row, "id")?,
        coffee_id: get_opt_uuid(row, "coffee_id")?,
        lot_number: row.try_get("lot_number")?,
        initial_weight_kg: get_decimal(row, "initial_weight_kg")?,
        current_weight_kg: get_decimal(row, "current_weight_kg")?,
        roasted_total_weight_kg: get_decimal(row, "roasted_total_weight_kg")?,
        status: BatchStatus::parse(&status),
    })
}

pub async fn get(conn: &mut SqliteConnection, id: Uuid) -> Result<Option<Batch>> {
    let row = sqlx::query(
        r#"
        SELECT id, coffee_id, lot_number, initial_weight_kg, current_weight_kg,
               roasted_total_weight_kg, status
        FROM batches WHERE id = ?
        "#,
    )
    .bind(id.to_string())
    .fetch_optional(&mut *conn)
    .await?;
    row.as_ref().map(from_row).transpose()
}

pub async fn insert(conn: &mut SqliteConnection, batch: &Batch) -> Result<()> {
    let now = ts_text(&chrono::Utc::now());
    sqlx::query(
        r#"
        INSERT INTO batches (id, coffee_id, lot_number, initial_weight_kg, current_weight_kg,
                             roasted_total_weight_kg, status, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(batch.id.to_string())
    .bind(batch.coffee_id.map(|id| id.to_string()))
    .bind(&batch.lot_number)
    .bind(batch.initial_weight_kg.to_string())
    .bind(batch.current_weight_kg.to_string())
    .bind(batch.roasted_total_weight_kg.to_string())
    .bind(batch.status.as_str())
    .bind(&now)
    .bind(&now)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Persist weights and status; callers hold the write lock
pub async fn save_weights(conn: &mut SqliteConnection, batch: &Batch) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE batches
        SET current_weight_kg = ?, roasted_total_weight_kg = ?, status = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(batch.current_weight_kg.normalize().to_string())
    .bind(batch.roasted_total_weight_kg.normalize().to_string())
    .bind(batch.status.as_str())
    .bind(ts_text(&chrono::Utc::now()))
    .bind(batch.id.to_string())
    .execute(&mut *conn)
    .await?;

    Ok(())
}
