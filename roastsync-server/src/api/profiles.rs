//! Roast profile upload, download and parsed data

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use tracing::{info, warn};

use super::path_id;
use crate::db::{profiles, roasts};
use crate::error::{ApiError, ApiResult};
use crate::profile::{resolver, store};
use crate::AppState;

const MAX_LABEL_CHARS: usize = 255;

/// POST /api/v1/roasts/:roast_id/profile
///
/// Raw `.alog` body. Stored as the profile blob and as the legacy file,
/// then used to backfill label, operator, development time/ratio and
/// weight loss where the roast lacks them.
pub async fn upload_profile(
    State(state): State<AppState>,
    Path(roast_id): Path<String>,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    let id = path_id(&roast_id, "roast_id")?;
    if body.is_empty() {
        return Err(ApiError::BadRequest("Profile file is empty".into()));
    }

    let mut tx = state.db.begin_with("BEGIN IMMEDIATE").await?;
    let mut roast = roasts::get(&mut tx, id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Roast not found".into()))?;

    let path = store::write_legacy(&state.profiles_dir, id, &body).map_err(roastsync_common::Error::from)?;
    profiles::put_blob(&mut tx, id, &body).await?;

    let profile = resolver::resolve(&mut tx, &state.profiles_dir, &roast).await?;
    if profile.source.is_file_backed() {
        let mut changed = resolver::enrich_roast(&mut roast, &profile);
        if roast.label.trim().is_empty() {
            let title = profile
                .document
                .get("title")
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|t| !t.is_empty());
            if let Some(title) = title {
                roast.label = title.chars().take(MAX_LABEL_CHARS).collect();
                changed = true;
            }
        }
        if changed {
            roasts::save(&mut tx, &roast).await?;
        }
    } else {
        warn!("Uploaded profile for roast {} could not be parsed; stored as is", id);
    }
    tx.commit().await?;

    info!("Profile stored for roast {} ({} bytes)", id, body.len());
    Ok(Json(json!({"data": {"alog_file_path": path.display().to_string()}})))
}

/// GET /api/v1/roasts/:roast_id/profile
///
/// Stored blob first, legacy file second.
pub async fn download_profile(
    State(state): State<AppState>,
    Path(roast_id): Path<String>,
) -> ApiResult<Response> {
    let id = path_id(&roast_id, "roast_id")?;
    let mut conn = state.db.acquire().await?;
    if roasts::get(&mut conn, id).await?.is_none() {
        return Err(ApiError::NotFound("Roast not found".into()));
    }

    let bytes = match profiles::get_blob(&mut conn, id).await? {
        Some(blob) if !blob.is_empty() => blob,
        _ => store::read_legacy_bytes(&state.profiles_dir, id)
            .map_err(roastsync_common::Error::from)?
            .ok_or_else(|| ApiError::NotFound("Profile file not found".into()))?,
    };

    let disposition = format!("attachment; filename=\"{}.alog\"", id);
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response())
}

/// GET /api/v1/roasts/:roast_id/profile/data
///
/// The most authoritative profile, padded to what the desktop client
/// expects of a background curve.
pub async fn profile_data(
    State(state): State<AppState>,
    Path(roast_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let id = path_id(&roast_id, "roast_id")?;
    let mut conn = state.db.acquire().await?;
    let roast = roasts::get(&mut conn, id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Roast not found".into()))?;

    let profile = resolver::resolve(&mut conn, &state.profiles_dir, &roast).await?;
    Ok(Json(Value::Object(profile.into_background_profile())))
}
