//! User machine lookups

use super::get_uuid;
use roastsync_common::db::UserMachine;
use roastsync_common::Result;
use sqlx::{Row, SqliteConnection};
use uuid::Uuid;

/// Machine of `user_id` whose name matches (trimmed, case-insensitive)
pub async fn find_by_name(
    conn: &mut SqliteConnection,
    user_id: Uuid,
    name: &str,
) -> Result<Option<UserMachine>> {
    let row = sqlx::query(
        "SELECT id, user_id, name FROM user_machines WHERE user_id = ? AND lower(trim(name)) = lower(trim(?))",
    )
    .bind(user_id.to_string())
    .bind(name)
    .fetch_optional(&mut *conn)
    .await?;

    match row {
        Some(row) => Ok(Some(UserMachine {
            id: get_uuid(&row, "id")?,
            user_id: get_uuid(&row, "user_id")?,
            name: row.try_get("name")?,
        })),
        None => Ok(None),
    }
}

pub async fn get_name(conn: &mut SqliteConnection, id: Uuid) -> Result<Option<String>> {
    let name: Option<String> = sqlx::query_scalar("SELECT name FROM user_machines WHERE id = ?")
        .bind(id.to_string())
        .fetch_optional(&mut *conn)
        .await?;
    Ok(name)
}

pub async fn insert(conn: &mut SqliteConnection, machine: &UserMachine) -> Result<()> {
    sqlx::query("INSERT INTO user_machines (id, user_id, name) VALUES (?, ?, ?)")
        .bind(machine.id.to_string())
        .bind(machine.user_id.to_string())
        .bind(&machine.name)
        .execute(&mut *conn)
        .await?;
    Ok(())
}
