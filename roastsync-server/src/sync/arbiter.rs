//! Exactly-once and last-writer checks for roast upserts

use crate::db::idempotency;
use crate::error::{ApiError, ApiResult};
use chrono::{DateTime, Duration, Utc};
use roastsync_common::db::{IdempotencyEntry, Roast};
use roastsync_common::Result;
use sqlx::SqliteConnection;
use tracing::{debug, info};

/// Logical endpoint all upsert aliases share in the cache
pub const UPSERT_ENDPOINT: &str = "/api/v1/aroast";

pub const IDEMPOTENCY_TTL_HOURS: i64 = 24;

/// A response as it went out the first time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredResponse {
    pub status: u16,
    pub body: String,
}

/// Purge expired entries, then look `key` up
pub async fn replay(
    conn: &mut SqliteConnection,
    key: &str,
    now: DateTime<Utc>,
) -> Result<Option<StoredResponse>> {
    let cutoff = now - Duration::hours(IDEMPOTENCY_TTL_HOURS);
    let purged = idempotency::purge_older_than(conn, cutoff).await?;
    if purged > 0 {
        debug!("Purged {} expired idempotency entries", purged);
    }

    let hit = idempotency::lookup(conn, key, UPSERT_ENDPOINT, cutoff).await?;
    if hit.is_some() {
        info!("Returning cached response for idempotency key {}...", prefix(key));
    }
    Ok(hit.map(|entry| StoredResponse {
        status: entry.status_code,
        body: entry.response,
    }))
}

/// Cache a response; runs inside the write transaction before commit
pub async fn remember(
    conn: &mut SqliteConnection,
    key: &str,
    response: &StoredResponse,
    now: DateTime<Utc>,
) -> Result<()> {
    idempotency::store(
        conn,
        &IdempotencyEntry {
            key: key.to_string(),
            endpoint: UPSERT_ENDPOINT.to_string(),
            status_code: response.status,
            response: response.body.clone(),
            created_at: now,
        },
    )
    .await
}

/// Reject a write whose client timestamp is strictly older than the server copy
pub fn check_modified(existing: &Roast, client_modified_at: Option<DateTime<Utc>>) -> ApiResult<()> {
    match client_modified_at {
        Some(client) if client < existing.modified_at => Err(ApiError::Conflict {
            server_modified_at: existing.modified_at,
            client_modified_at: client,
        }),
        _ => Ok(()),
    }
}

fn prefix(key: &str) -> &str {
    match key.char_indices().nth(8) {
        Some((idx, _)) => &key[..idx],
        None => key,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::test_pool;
    use crate::profile::resolver::tests::sample_roast;

    #[test]
    fn test_conflict_only_when_strictly_older() {
        let roast = sample_roast();
        let t = roast.modified_at;

        assert!(check_modified(&roast, None).is_ok());
        assert!(check_modified(&roast, Some(t)).is_ok());
        assert!(check_modified(&roast, Some(t + Duration::seconds(1))).is_ok());
        match check_modified(&roast, Some(t - Duration::milliseconds(1))) {
            Err(ApiError::Conflict { server_modified_at, client_modified_at }) => {
                assert_eq!(server_modified_at, t);
                assert_eq!(client_modified_at, t - Duration::milliseconds(1));
            }
            other => panic!("expected conflict, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_replay_returns_stored_body_until_expiry() {
        let (pool, _dir) = test_pool().await;
        let mut conn = pool.acquire().await.unwrap();
        let now = Utc::now();
        let response = StoredResponse { status: 201, body: "{\"success\":true}".into() };

        assert!(replay(&mut conn, "key-1", now).await.unwrap().is_none());
        remember(&mut conn, "key-1", &response, now).await.unwrap();
        assert_eq!(replay(&mut conn, "key-1", now).await.unwrap(), Some(response));

        let later = now + Duration::hours(IDEMPOTENCY_TTL_HOURS + 1);
        assert!(replay(&mut conn, "key-1", later).await.unwrap().is_none());
    }

    #[test]
    fn test_key_prefix_for_logs() {
        assert_eq!(prefix("abcdefghijkl"), "abcdefgh");
        assert_eq!(prefix("short"), "short");
    }
}
