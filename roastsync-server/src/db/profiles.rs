//! Stored profile blobs

use super::ts_text;
use roastsync_common::Result;
use sqlx::SqliteConnection;
use uuid::Uuid;

pub async fn get_blob(conn: &mut SqliteConnection, roast_id: Uuid) -> Result<Option<Vec<u8>>> {
    let data: Option<Vec<u8>> = sqlx::query_scalar("SELECT data FROM roast_profiles WHERE roast_id = ?")
        .bind(roast_id.to_string())
        .fetch_optional(&mut *conn)
        .await?;
    Ok(data)
}

pub async fn put_blob(conn: &mut SqliteConnection, roast_id: Uuid, data: &[u8]) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO roast_profiles (roast_id, data, updated_at) VALUES (?, ?, ?)
        ON CONFLICT(roast_id) DO UPDATE SET data = excluded.data, updated_at = excluded.updated_at
        "#,
    )
    .bind(roast_id.to_string())
    .bind(data)
    .bind(ts_text(&chrono::Utc::now()))
    .execute(&mut *conn)
    .await?;

    Ok(())
}
