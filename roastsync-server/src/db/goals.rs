//! QC goal queries

use super::{get_bool, get_json, get_ts, get_uuid, ts_text};
use roastsync_common::db::{GoalSeverity, RoastGoal};
use roastsync_common::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use uuid::Uuid;

const COLUMNS: &str =
    "id, name, goal_type, is_active, failed_status, missing_value_status, parameters, created_at, updated_at";

fn from_row(row: &SqliteRow) -> Result<RoastGoal> {
    let failed: String = row.try_get("failed_status")?;
    let missing: String = row.try_get("missing_value_status")?;
    Ok(RoastGoal {
        id: get_uuid(row, "id")?,
        name: row.try_get("name")?,
        goal_type: row.try_get("goal_type")?,
        is_active: get_bool(row, "is_active")?,
        failed_status: GoalSeverity::parse(&failed).unwrap_or(GoalSeverity::Failed),
        missing_value_status: GoalSeverity::parse(&missing).unwrap_or(GoalSeverity::Warning),
        parameters: get_json(row, "parameters")?,
        created_at: get_ts(row, "created_at")?,
        updated_at: get_ts(row, "updated_at")?,
    })
}

pub async fn list(conn: &mut SqliteConnection) -> Result<Vec<RoastGoal>> {
    let rows = sqlx::query(&format!("SELECT {} FROM roast_goals ORDER BY created_at", COLUMNS))
        .fetch_all(&mut *conn)
        .await?;
    rows.iter().map(from_row).collect()
}

pub async fn list_active(conn: &mut SqliteConnection) -> Result<Vec<RoastGoal>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM roast_goals WHERE is_active = 1 ORDER BY created_at",
        COLUMNS
    ))
    .fetch_all(&mut *conn)
    .await?;
    rows.iter().map(from_row).collect()
}

pub async fn get(conn: &mut SqliteConnection, id: Uuid) -> Result<Option<RoastGoal>> {
    let row = sqlx::query(&format!("SELECT {} FROM roast_goals WHERE id = ?", COLUMNS))
        .bind(id.to_string())
        .fetch_optional(&mut *conn)
        .await?;
    row.as_ref().map(from_row).transpose()
}

pub async fn insert(conn: &mut SqliteConnection, goal: &RoastGoal) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO roast_goals (id, name, goal_type, is_active, failed_status,
                                 missing_value_status, parameters, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(goal.id.to_string())
    .bind(&goal.name)
    .bind(&goal.goal_type)
    .bind(goal.is_active)
    .bind(goal.failed_status.as_str())
    .bind(goal.missing_value_status.as_str())
    .bind(serde_json::to_string(&goal.parameters)?)
    .bind(ts_text(&goal.created_at))
    .bind(ts_text(&goal.updated_at))
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub async fn update(conn: &mut SqliteConnection, goal: &RoastGoal) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE roast_goals
        SET name = ?, goal_type = ?, is_active = ?, failed_status = ?,
            missing_value_status = ?, parameters = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&goal.name)
    .bind(&goal.goal_type)
    .bind(goal.is_active)
    .bind(goal.failed_status.as_str())
    .bind(goal.missing_value_status.as_str())
    .bind(serde_json::to_string(&goal.parameters)?)
    .bind(ts_text(&goal.updated_at))
    .bind(goal.id.to_string())
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub async fn delete(conn: &mut SqliteConnection, id: Uuid) -> Result<bool> {
    let result = sqlx::query("DELETE FROM roast_goals WHERE id = ?")
        .bind(id.to_string())
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected() > 0)
}
