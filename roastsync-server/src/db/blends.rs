//! Blend queries

use super::{get_json, get_ts, get_uuid, ts_text};
use roastsync_common::db::Blend;
use roastsync_common::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use uuid::Uuid;

const COLUMNS: &str = "id, user_id, name, description, recipe, created_at, updated_at";

fn from_row(row: &SqliteRow) -> Result<Blend> {
    Ok(Blend {
        id: get_uuid(row, "id")?,
        user_id: get_uuid(row, "user_id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        recipe: get_json(row, "recipe")?,
        created_at: get_ts(row, "created_at")?,
        updated_at: get_ts(row, "updated_at")?,
    })
}

pub async fn get(conn: &mut SqliteConnection, id: Uuid) -> Result<Option<Blend>> {
    let row = sqlx::query(&format!("SELECT {} FROM blends WHERE id = ?", COLUMNS))
        .bind(id.to_string())
        .fetch_optional(&mut *conn)
        .await?;
    row.as_ref().map(from_row).transpose()
}

/// Blend visible to `user_id`
pub async fn get_owned(conn: &mut SqliteConnection, id: Uuid, user_id: Uuid) -> Result<Option<Blend>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM blends WHERE id = ? AND user_id = ?",
        COLUMNS
    ))
    .bind(id.to_string())
    .bind(user_id.to_string())
    .fetch_optional(&mut *conn)
    .await?;
    row.as_ref().map(from_row).transpose()
}

pub async fn list(conn: &mut SqliteConnection, user_id: Uuid) -> Result<Vec<Blend>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM blends WHERE user_id = ? ORDER BY name",
        COLUMNS
    ))
    .bind(user_id.to_string())
    .fetch_all(&mut *conn)
    .await?;
    rows.iter().map(from_row).collect()
}

/// First blend named `name` (case-insensitive)
pub async fn find_by_name(conn: &mut SqliteConnection, name: &str) -> Result<Option<Blend>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM blends WHERE lower(name) = lower(?) ORDER BY created_at LIMIT 1",
        COLUMNS
    ))
    .bind(name.trim())
    .fetch_optional(&mut *conn)
    .await?;
    row.as_ref().map(from_row).transpose()
}

pub async fn insert(conn: &mut SqliteConnection, blend: &Blend) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO blends (id, user_id, name, description, recipe, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(blend.id.to_string())
    .bind(blend.user_id.to_string())
    .bind(&blend.name)
    .bind(&blend.description)
    .bind(serde_json::to_string(&blend.recipe)?)
    .bind(ts_text(&blend.created_at))
    .bind(ts_text(&blend.updated_at))
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub async fn update(conn: &mut SqliteConnection, blend: &Blend) -> Result<()> {
    sqlx::query(
        "UPDATE blends SET name = ?, description = ?, recipe = ?, updated_at = ? WHERE id = ?",
    )
    .bind(&blend.name)
    .bind(&blend.description)
    .bind(serde_json::to_string(&blend.recipe)?)
    .bind(ts_text(&blend.updated_at))
    .bind(blend.id.to_string())
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Returns false when nothing matched
pub async fn delete(conn: &mut SqliteConnection, id: Uuid, user_id: Uuid) -> Result<bool> {
    let result = sqlx::query("DELETE FROM blends WHERE id = ? AND user_id = ?")
        .bind(id.to_string())
        .bind(user_id.to_string())
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected() > 0)
}
