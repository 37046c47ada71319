//! Green coffee queries

use super::{get_decimal, get_ts, get_uuid, ts_text};
use roastsync_common::db::Coffee;
use roastsync_common::Result;
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use uuid::Uuid;

const COLUMNS: &str =
    "id, hr_id, label, origin, region, variety, processing, stock_weight_kg, created_at";

fn from_row(row: &SqliteRow) -> Result<Coffee> {
    Ok(Coffee {
        id: get_uuid(row, "id")?,
        hr_id: row.try_get("hr_id")?,
        label: row.try_get("label")?,
        origin: row.try_get("origin")?,
        region: row.try_get("region")?,
        variety: row.try_get("variety")?,
        processing: row.try_get("processing")?,
        stock_weight_kg: get_decimal(row, "stock_weight_kg")?,
        created_at: get_ts(row, "created_at")?,
    })
}

pub async fn get(conn: &mut SqliteConnection, id: Uuid) -> Result<Option<Coffee>> {
    let row = sqlx::query(&format!("SELECT {} FROM coffees WHERE id = ?", COLUMNS))
        .bind(id.to_string())
        .fetch_optional(&mut *conn)
        .await?;
    row.as_ref().map(from_row).transpose()
}

pub async fn get_by_hr_id(conn: &mut SqliteConnection, hr_id: &str) -> Result<Option<Coffee>> {
    let row = sqlx::query(&format!("SELECT {} FROM coffees WHERE hr_id = ?", COLUMNS))
        .bind(hr_id)
        .fetch_optional(&mut *conn)
        .await?;
    row.as_ref().map(from_row).transpose()
}

pub async fn insert(conn: &mut SqliteConnection, coffee: &Coffee) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO coffees (id, hr_id, label, origin, region, variety, processing,
                             stock_weight_kg, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(coffee.id.to_string())
    .bind(&coffee.hr_id)
    .bind(&coffee.label)
    .bind(&coffee.origin)
    .bind(&coffee.region)
    .bind(&coffee.variety)
    .bind(&coffee.processing)
    .bind(coffee.stock_weight_kg.to_string())
    .bind(ts_text(&coffee.created_at))
    .bind(ts_text(&coffee.created_at))
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Overwrite the stock balance; callers hold the write lock
pub async fn set_stock(conn: &mut SqliteConnection, id: Uuid, stock: Decimal) -> Result<()> {
    sqlx::query("UPDATE coffees SET stock_weight_kg = ?, updated_at = ? WHERE id = ?")
        .bind(stock.normalize().to_string())
        .bind(ts_text(&chrono::Utc::now()))
        .bind(id.to_string())
        .execute(&mut *conn)
        .await?;

    Ok(())
}
