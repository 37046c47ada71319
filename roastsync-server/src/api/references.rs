//! Reference roasts
//!
//! A reference roast is the background curve offered to the desktop client
//! for one coffee or blend, optionally per machine.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use roastsync_common::db::{ReferenceInfo, Roast};
use serde::Deserialize;
use serde_json::{json, Value};
use sqlx::SqliteConnection;
use tracing::{debug, info};
use uuid::Uuid;

use super::path_id;
use crate::db::roasts::{self, ReferenceTarget};
use crate::db::{blends, coffees};
use crate::error::{ApiError, ApiResult};
use crate::sync::response;
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct ReferenceQuery {
    pub coffee_id: Option<String>,
    pub blend_id: Option<String>,
    pub coffee_hr_id: Option<String>,
    pub blend_hr_id: Option<String>,
    pub machine: Option<String>,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// `None` when a human-readable id names nothing; the listing is then empty
async fn target_of(conn: &mut SqliteConnection, query: &ReferenceQuery) -> ApiResult<Option<ReferenceTarget>> {
    let coffee = non_empty(&query.coffee_id).or(non_empty(&query.coffee_hr_id));
    let blend = non_empty(&query.blend_id).or(non_empty(&query.blend_hr_id));
    if coffee.is_some() && blend.is_some() {
        return Err(ApiError::BadRequest("Pass either coffee or blend, not both".into()));
    }

    if let Some(id) = non_empty(&query.coffee_id) {
        return Ok(Some(ReferenceTarget::Coffee(path_id(id, "coffee_id")?)));
    }
    if let Some(hr_id) = non_empty(&query.coffee_hr_id) {
        let found = coffees::get_by_hr_id(conn, hr_id).await?;
        return Ok(found.map(|c| ReferenceTarget::Coffee(c.id)));
    }
    if let Some(id) = non_empty(&query.blend_id) {
        return Ok(Some(ReferenceTarget::Blend(path_id(id, "blend_id")?)));
    }
    if let Some(hr_id) = non_empty(&query.blend_hr_id) {
        if let Some(blend) = blends::find_by_name(conn, hr_id).await? {
            return Ok(Some(ReferenceTarget::Blend(blend.id)));
        }
        return Ok(roastsync_common::uuid_utils::parse(hr_id)
            .ok()
            .map(ReferenceTarget::Blend));
    }
    Ok(Some(ReferenceTarget::Any))
}

/// GET /api/v1/references
///
/// A machine filter that matches nothing falls back to all machines.
pub async fn list_references(
    State(state): State<AppState>,
    Query(query): Query<ReferenceQuery>,
) -> ApiResult<Json<Value>> {
    let mut conn = state.db.acquire().await?;
    let Some(target) = target_of(&mut conn, &query).await? else {
        return Ok(Json(json!({"data": {"items": [], "total": 0}})));
    };

    let machine = non_empty(&query.machine);
    let mut found = roasts::list_references(&mut conn, target, machine).await?;
    if found.is_empty() && machine.is_some() {
        debug!("No references on machine {:?}; retrying without machine filter", machine);
        found = roasts::list_references(&mut conn, target, None).await?;
    }

    let items: Vec<Value> = found.iter().map(response::roast_body).collect();
    let total = items.len();
    Ok(Json(json!({"data": {"items": items, "total": total}})))
}

#[derive(Debug, Default, Deserialize)]
pub struct MarkReference {
    pub reference_name: Option<String>,
    pub reference_for_coffee_id: Option<String>,
    pub reference_for_blend_id: Option<String>,
    pub reference_machine: Option<String>,
}

fn reference_target(body: &MarkReference) -> ApiResult<ReferenceTarget> {
    match (
        non_empty(&body.reference_for_coffee_id),
        non_empty(&body.reference_for_blend_id),
    ) {
        (Some(coffee), None) => Ok(ReferenceTarget::Coffee(path_id(coffee, "reference_for_coffee_id")?)),
        (None, Some(blend)) => Ok(ReferenceTarget::Blend(path_id(blend, "reference_for_blend_id")?)),
        _ => Err(ApiError::BadRequest(
            "Set exactly one of reference_for_coffee_id or reference_for_blend_id".into(),
        )),
    }
}

fn mark(roast: &mut Roast, name: String, target: ReferenceTarget, machine: Option<String>) {
    let (coffee, blend) = match target {
        ReferenceTarget::Coffee(id) => (Some(id), None),
        ReferenceTarget::Blend(id) => (None, Some(id)),
        ReferenceTarget::Any => (None, None),
    };
    roast.reference = ReferenceInfo {
        is_reference: true,
        reference_name: Some(name),
        reference_for_coffee_id: coffee,
        reference_for_blend_id: blend,
        reference_machine: machine,
        reference_beans_notes: roast.reference.reference_beans_notes.take(),
    };
    roast.modified_at = Utc::now();
}

fn unmark(roast: &mut Roast) {
    roast.reference = ReferenceInfo {
        reference_beans_notes: roast.reference.reference_beans_notes.take(),
        ..ReferenceInfo::default()
    };
    roast.modified_at = Utc::now();
}

fn default_name(roast: &Roast) -> String {
    roast
        .title
        .clone()
        .filter(|t| !t.trim().is_empty())
        .or_else(|| Some(roast.label.clone()).filter(|l| !l.trim().is_empty()))
        .unwrap_or_else(|| "Reference".to_string())
}

async fn load(conn: &mut SqliteConnection, id: Uuid) -> ApiResult<Roast> {
    roasts::get(conn, id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Roast not found".into()))
}

/// POST /api/v1/roasts/:roast_id/reference
///
/// Replaces any other reference for the same target and machine.
pub async fn mark_reference(
    State(state): State<AppState>,
    Path(roast_id): Path<String>,
    Json(body): Json<MarkReference>,
) -> ApiResult<Json<Value>> {
    let id = path_id(&roast_id, "roast_id")?;
    let target = reference_target(&body)?;
    let machine = non_empty(&body.reference_machine).map(str::to_string);

    let mut tx = state.db.begin_with("BEGIN IMMEDIATE").await?;
    let mut roast = load(&mut tx, id).await?;
    let name = non_empty(&body.reference_name)
        .map(str::to_string)
        .unwrap_or_else(|| default_name(&roast));

    let cleared = roasts::clear_references_for(&mut tx, target, machine.as_deref(), roast.id).await?;
    mark(&mut roast, name, target, machine);
    roasts::save(&mut tx, &roast).await?;
    tx.commit().await?;

    info!("Roast {} marked as reference ({} superseded)", roast.id, cleared);
    Ok(Json(json!({"data": response::roast_body(&roast)})))
}

#[derive(Debug, Deserialize)]
pub struct ReplaceReference {
    pub replace_reference_roast_id: String,
    pub reference_name: Option<String>,
}

/// POST /api/v1/roasts/:roast_id/reference/replace
///
/// The roast in the path takes over the binding of the old reference.
pub async fn replace_reference(
    State(state): State<AppState>,
    Path(roast_id): Path<String>,
    Json(body): Json<ReplaceReference>,
) -> ApiResult<Json<Value>> {
    let new_id = path_id(&roast_id, "roast_id")?;
    let old_id = path_id(&body.replace_reference_roast_id, "replace_reference_roast_id")?;

    let mut tx = state.db.begin_with("BEGIN IMMEDIATE").await?;
    let mut new_roast = load(&mut tx, new_id).await?;
    let mut old_roast = match roasts::get(&mut tx, old_id).await? {
        Some(r) if r.reference.is_reference => r,
        _ => return Err(ApiError::NotFound("Reference roast to replace not found".into())),
    };

    let target = match (
        old_roast.reference.reference_for_coffee_id,
        old_roast.reference.reference_for_blend_id,
    ) {
        (Some(coffee), _) => ReferenceTarget::Coffee(coffee),
        (None, Some(blend)) => ReferenceTarget::Blend(blend),
        (None, None) => ReferenceTarget::Any,
    };
    let name = non_empty(&body.reference_name)
        .map(str::to_string)
        .or_else(|| old_roast.reference.reference_name.clone())
        .unwrap_or_else(|| default_name(&new_roast));
    let machine = old_roast.reference.reference_machine.clone();

    if old_roast.id != new_roast.id {
        unmark(&mut old_roast);
        roasts::save(&mut tx, &old_roast).await?;
    }
    mark(&mut new_roast, name, target, machine);
    roasts::save(&mut tx, &new_roast).await?;
    tx.commit().await?;

    info!("Reference {} replaced by roast {}", old_id, new_id);
    Ok(Json(json!({"data": response::roast_body(&new_roast)})))
}

/// DELETE /api/v1/roasts/:roast_id/reference
pub async fn unmark_reference(
    State(state): State<AppState>,
    Path(roast_id): Path<String>,
) -> ApiResult<StatusCode> {
    let id = path_id(&roast_id, "roast_id")?;
    let mut tx = state.db.begin_with("BEGIN IMMEDIATE").await?;
    let mut roast = load(&mut tx, id).await?;
    if !roast.reference.is_reference {
        return Err(ApiError::BadRequest("Roast is not a reference".into()));
    }
    unmark(&mut roast);
    roasts::save(&mut tx, &roast).await?;
    tx.commit().await?;

    info!("Roast {} is no longer a reference", roast.id);
    Ok(StatusCode::NO_CONTENT)
}
