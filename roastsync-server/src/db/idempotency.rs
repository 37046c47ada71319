//! Idempotency cache queries

use super::{get_ts, ts_text};
use chrono::{DateTime, Utc};
use roastsync_common::db::IdempotencyEntry;
use roastsync_common::Result;
use sqlx::{Row, SqliteConnection};

/// Cached response for (key, endpoint) created at or after `not_before`
pub async fn lookup(
    conn: &mut SqliteConnection,
    key: &str,
    endpoint: &str,
    not_before: DateTime<Utc>,
) -> Result<Option<IdempotencyEntry>> {
    let row = sqlx::query(
        r#"
        SELECT idempotency_key, endpoint, status_code, response, created_at
        FROM idempotency_cache
        WHERE idempotency_key = ? AND endpoint = ? AND created_at >= ?
        "#,
    )
    .bind(key)
    .bind(endpoint)
    .bind(ts_text(&not_before))
    .fetch_optional(&mut *conn)
    .await?;

    match row {
        Some(row) => {
            let status: i64 = row.try_get("status_code")?;
            Ok(Some(IdempotencyEntry {
                key: row.try_get("idempotency_key")?,
                endpoint: row.try_get("endpoint")?,
                status_code: u16::try_from(status).unwrap_or(200),
                response: row.try_get("response")?,
                created_at: get_ts(&row, "created_at")?,
            }))
        }
        None => Ok(None),
    }
}

/// Store a response; a concurrent duplicate for the same key is ignored
pub async fn store(conn: &mut SqliteConnection, entry: &IdempotencyEntry) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO idempotency_cache (idempotency_key, endpoint, status_code, response, created_at)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(idempotency_key, endpoint) DO UPDATE SET
            status_code = excluded.status_code,
            response = excluded.response,
            created_at = excluded.created_at
        WHERE idempotency_cache.created_at < ?
        "#,
    )
    .bind(&entry.key)
    .bind(&entry.endpoint)
    .bind(i64::from(entry.status_code))
    .bind(&entry.response)
    .bind(ts_text(&entry.created_at))
    .bind(ts_text(&(entry.created_at - chrono::Duration::hours(24))))
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Drop entries older than `cutoff`; returns the number removed
pub async fn purge_older_than(conn: &mut SqliteConnection, cutoff: DateTime<Utc>) -> Result<u64> {
    let result = sqlx::query("DELETE FROM idempotency_cache WHERE created_at < ?")
        .bind(ts_text(&cutoff))
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::test_pool;
    use chrono::Duration;

    fn entry(key: &str, body: &str, created_at: DateTime<Utc>) -> IdempotencyEntry {
        IdempotencyEntry {
            key: key.to_string(),
            endpoint: "/api/v1/aroast".to_string(),
            status_code: 201,
            response: body.to_string(),
            created_at,
        }
    }

    #[tokio::test]
    async fn test_store_and_lookup_verbatim() {
        let (pool, _dir) = test_pool().await;
        let mut conn = pool.acquire().await.unwrap();
        let now = Utc::now();

        store(&mut conn, &entry("k1", r#"{"a":1}"#, now)).await.unwrap();
        let hit = lookup(&mut conn, "k1", "/api/v1/aroast", now - Duration::hours(24))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(hit.response, r#"{"a":1}"#);
        assert_eq!(hit.status_code, 201);

        assert!(lookup(&mut conn, "k1", "/api/v1/other", now - Duration::hours(24))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_duplicate_store_keeps_first_response() {
        let (pool, _dir) = test_pool().await;
        let mut conn = pool.acquire().await.unwrap();
        let now = Utc::now();

        store(&mut conn, &entry("k1", "first", now)).await.unwrap();
        store(&mut conn, &entry("k1", "second", now)).await.unwrap();

        let hit = lookup(&mut conn, "k1", "/api/v1/aroast", now - Duration::hours(1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(hit.response, "first");
    }

    #[tokio::test]
    async fn test_purge_removes_expired_only() {
        let (pool, _dir) = test_pool().await;
        let mut conn = pool.acquire().await.unwrap();
        let now = Utc::now();

        store(&mut conn, &entry("old", "x", now - Duration::hours(30))).await.unwrap();
        store(&mut conn, &entry("new", "y", now)).await.unwrap();

        let removed = purge_older_than(&mut conn, now - Duration::hours(24)).await.unwrap();
        assert_eq!(removed, 1);
        assert!(lookup(&mut conn, "new", "/api/v1/aroast", now - Duration::hours(24))
            .await
            .unwrap()
            .is_some());
    }
}
