//! Blend recipes owned by the caller

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use roastsync_common::db::{Blend, BlendComponent};
use serde::Deserialize;
use serde_json::{json, Value};
use sqlx::SqliteConnection;
use tracing::info;
use uuid::Uuid;

use super::{path_id, Caller};
use crate::blends::{self as recipes, BlendDetail};
use crate::db::{blends, roasts};
use crate::error::{ApiError, ApiResult};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateBlend {
    pub name: String,
    pub description: Option<String>,
    pub recipe: Vec<BlendComponent>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateBlend {
    pub name: Option<String>,
    pub description: Option<String>,
    pub recipe: Option<Vec<BlendComponent>>,
}

fn blend_name(raw: &str) -> ApiResult<String> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(ApiError::BadRequest("Blend name must not be empty".into()));
    }
    Ok(name.to_string())
}

async fn owned(conn: &mut SqliteConnection, id: Uuid, user_id: Uuid) -> ApiResult<Blend> {
    blends::get_owned(conn, id, user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Blend not found".into()))
}

async fn checked_recipe(conn: &mut SqliteConnection, recipe: &[BlendComponent]) -> ApiResult<()> {
    recipes::validate_recipe(recipe)?;
    recipes::ensure_coffees_exist(conn, recipe).await?;
    Ok(())
}

/// GET /api/v1/blends
pub async fn list_blends(
    State(state): State<AppState>,
    Caller(user_id): Caller,
) -> ApiResult<Json<Value>> {
    let mut conn = state.db.acquire().await?;
    let mut items: Vec<BlendDetail> = Vec::new();
    for blend in blends::list(&mut conn, user_id).await? {
        items.push(recipes::detail(&mut conn, &blend).await?);
    }
    let total = items.len();
    Ok(Json(json!({"data": {"items": items, "total": total}})))
}

/// POST /api/v1/blends
pub async fn create_blend(
    State(state): State<AppState>,
    Caller(user_id): Caller,
    Json(body): Json<CreateBlend>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let name = blend_name(&body.name)?;
    let mut tx = state.db.begin_with("BEGIN IMMEDIATE").await?;
    checked_recipe(&mut tx, &body.recipe).await?;

    let now = Utc::now();
    let blend = Blend {
        id: Uuid::new_v4(),
        user_id,
        name,
        description: body.description,
        recipe: body.recipe,
        created_at: now,
        updated_at: now,
    };
    blends::insert(&mut tx, &blend).await?;
    let detail = recipes::detail(&mut tx, &blend).await?;
    tx.commit().await?;

    info!("Blend {} '{}' created for user {}", blend.id, blend.name, user_id);
    Ok((StatusCode::CREATED, Json(json!({"data": detail}))))
}

/// GET /api/v1/blends/:blend_id
pub async fn get_blend(
    State(state): State<AppState>,
    Caller(user_id): Caller,
    Path(blend_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let id = path_id(&blend_id, "blend_id")?;
    let mut conn = state.db.acquire().await?;
    let blend = owned(&mut conn, id, user_id).await?;
    let detail = recipes::detail(&mut conn, &blend).await?;
    Ok(Json(json!({"data": detail})))
}

/// PATCH /api/v1/blends/:blend_id
pub async fn update_blend(
    State(state): State<AppState>,
    Caller(user_id): Caller,
    Path(blend_id): Path<String>,
    Json(body): Json<UpdateBlend>,
) -> ApiResult<Json<Value>> {
    let id = path_id(&blend_id, "blend_id")?;
    let mut tx = state.db.begin_with("BEGIN IMMEDIATE").await?;
    let mut blend = owned(&mut tx, id, user_id).await?;

    if let Some(name) = body.name.as_deref() {
        blend.name = blend_name(name)?;
    }
    if body.description.is_some() {
        blend.description = body.description;
    }
    if let Some(recipe) = body.recipe {
        checked_recipe(&mut tx, &recipe).await?;
        blend.recipe = recipe;
    }
    blend.updated_at = Utc::now();

    blends::update(&mut tx, &blend).await?;
    let detail = recipes::detail(&mut tx, &blend).await?;
    tx.commit().await?;

    info!("Blend {} updated", blend.id);
    Ok(Json(json!({"data": detail})))
}

/// DELETE /api/v1/blends/:blend_id
///
/// Refused while roasts still point at the blend.
pub async fn delete_blend(
    State(state): State<AppState>,
    Caller(user_id): Caller,
    Path(blend_id): Path<String>,
) -> ApiResult<StatusCode> {
    let id = path_id(&blend_id, "blend_id")?;
    let mut tx = state.db.begin_with("BEGIN IMMEDIATE").await?;
    owned(&mut tx, id, user_id).await?;

    let roast_count = roasts::count_for_blend(&mut tx, id).await?;
    if roast_count > 0 {
        return Err(ApiError::BadRequest(format!(
            "Cannot delete blend with {} roasts. Delete roasts first.",
            roast_count
        )));
    }
    blends::delete(&mut tx, id, user_id).await?;
    tx.commit().await?;

    info!("Blend {} deleted", id);
    Ok(StatusCode::NO_CONTENT)
}
