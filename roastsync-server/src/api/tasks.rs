//! Production-task history actions

use axum::{
    extract::{Path, State},
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use sqlx::SqliteConnection;
use tracing::info;
use uuid::Uuid;

use super::{path_id, Caller};
use crate::db::tasks;
use crate::error::{ApiError, ApiResult};
use crate::scheduler;
use crate::AppState;

/// Snooze length when the request names none
pub const DEFAULT_SNOOZE_MINUTES: i64 = 60;

#[derive(Debug, Default, Deserialize)]
pub struct SnoozeRequest {
    pub minutes: Option<i64>,
}

fn not_found() -> ApiError {
    ApiError::NotFound("Task history item not found".into())
}

async fn history_body(conn: &mut SqliteConnection, id: Uuid) -> ApiResult<Json<Value>> {
    let item = tasks::get_history(conn, id).await?.ok_or_else(not_found)?;
    Ok(Json(json!({"data": item})))
}

/// POST /api/v1/tasks/history/:history_id/complete
pub async fn complete_history(
    State(state): State<AppState>,
    Caller(user_id): Caller,
    Path(history_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let id = path_id(&history_id, "history_id")?;
    let now = Utc::now();
    let mut conn = state.db.acquire().await?;
    if !scheduler::complete(&mut conn, id, user_id, now).await? {
        return Err(not_found());
    }
    info!("Task history {} completed by {}", id, user_id);
    history_body(&mut conn, id).await
}

/// POST /api/v1/tasks/history/:history_id/snooze
///
/// Body is optional; `minutes` must be positive.
pub async fn snooze_history(
    State(state): State<AppState>,
    Caller(user_id): Caller,
    Path(history_id): Path<String>,
    body: Option<Json<SnoozeRequest>>,
) -> ApiResult<Json<Value>> {
    let id = path_id(&history_id, "history_id")?;
    let minutes = body
        .and_then(|Json(b)| b.minutes)
        .unwrap_or(DEFAULT_SNOOZE_MINUTES);
    if minutes <= 0 {
        return Err(ApiError::BadRequest("minutes must be positive".into()));
    }

    let mut conn = state.db.acquire().await?;
    let until = scheduler::snooze(&mut conn, id, user_id, minutes, Utc::now())
        .await?
        .ok_or_else(not_found)?;
    info!("Task history {} snoozed until {}", id, until);
    history_body(&mut conn, id).await
}
