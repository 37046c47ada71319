//! QC goal management

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use roastsync_common::db::{GoalParameter, GoalSeverity, RoastGoal};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tracing::info;
use uuid::Uuid;

use super::path_id;
use crate::db::goals;
use crate::error::{ApiError, ApiResult};
use crate::qc;
use crate::AppState;

pub const DEFAULT_GOAL_TYPE: &str = "match_reference";

#[derive(Debug, Deserialize)]
pub struct CreateGoal {
    pub name: String,
    pub goal_type: Option<String>,
    pub is_active: Option<bool>,
    pub failed_status: Option<GoalSeverity>,
    pub missing_value_status: Option<GoalSeverity>,
    #[serde(default)]
    pub parameters: BTreeMap<String, GoalParameter>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateGoal {
    pub name: Option<String>,
    pub goal_type: Option<String>,
    pub is_active: Option<bool>,
    pub failed_status: Option<GoalSeverity>,
    pub missing_value_status: Option<GoalSeverity>,
    pub parameters: Option<BTreeMap<String, GoalParameter>>,
}

fn check_parameters(parameters: &BTreeMap<String, GoalParameter>) -> ApiResult<()> {
    for (name, setting) in parameters {
        if !qc::is_known_parameter(name) {
            return Err(ApiError::BadRequest(format!("Unknown goal parameter '{}'", name)));
        }
        if !setting.tolerance.is_finite() || setting.tolerance < 0.0 {
            return Err(ApiError::BadRequest(format!(
                "Tolerance of '{}' must be a non-negative number",
                name
            )));
        }
    }
    Ok(())
}

fn goal_name(raw: &str) -> ApiResult<String> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(ApiError::BadRequest("Goal name must not be empty".into()));
    }
    Ok(name.to_string())
}

fn not_found() -> ApiError {
    ApiError::NotFound("Goal not found".into())
}

/// GET /api/v1/goals
pub async fn list_goals(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let mut conn = state.db.acquire().await?;
    let items = goals::list(&mut conn).await?;
    let total = items.len();
    Ok(Json(json!({"data": {"items": items, "total": total}})))
}

/// POST /api/v1/goals
pub async fn create_goal(
    State(state): State<AppState>,
    Json(body): Json<CreateGoal>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let name = goal_name(&body.name)?;
    check_parameters(&body.parameters)?;

    let now = Utc::now();
    let goal = RoastGoal {
        id: Uuid::new_v4(),
        name,
        goal_type: body.goal_type.unwrap_or_else(|| DEFAULT_GOAL_TYPE.to_string()),
        is_active: body.is_active.unwrap_or(true),
        failed_status: body.failed_status.unwrap_or(GoalSeverity::Failed),
        missing_value_status: body.missing_value_status.unwrap_or(GoalSeverity::Warning),
        parameters: body.parameters,
        created_at: now,
        updated_at: now,
    };
    let mut conn = state.db.acquire().await?;
    goals::insert(&mut conn, &goal).await?;

    info!("Goal {} '{}' created", goal.id, goal.name);
    Ok((StatusCode::CREATED, Json(json!({"data": goal}))))
}

/// GET /api/v1/goals/:goal_id
pub async fn get_goal(
    State(state): State<AppState>,
    Path(goal_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let id = path_id(&goal_id, "goal_id")?;
    let mut conn = state.db.acquire().await?;
    let goal = goals::get(&mut conn, id).await?.ok_or_else(not_found)?;
    Ok(Json(json!({"data": goal})))
}

/// PATCH /api/v1/goals/:goal_id
pub async fn update_goal(
    State(state): State<AppState>,
    Path(goal_id): Path<String>,
    Json(body): Json<UpdateGoal>,
) -> ApiResult<Json<Value>> {
    let id = path_id(&goal_id, "goal_id")?;
    let mut conn = state.db.acquire().await?;
    let mut goal = goals::get(&mut conn, id).await?.ok_or_else(not_found)?;

    if let Some(name) = body.name.as_deref() {
        goal.name = goal_name(name)?;
    }
    if let Some(goal_type) = body.goal_type {
        goal.goal_type = goal_type;
    }
    if let Some(active) = body.is_active {
        goal.is_active = active;
    }
    if let Some(severity) = body.failed_status {
        goal.failed_status = severity;
    }
    if let Some(severity) = body.missing_value_status {
        goal.missing_value_status = severity;
    }
    if let Some(parameters) = body.parameters {
        check_parameters(&parameters)?;
        goal.parameters = parameters;
    }
    goal.updated_at = Utc::now();
    goals::update(&mut conn, &goal).await?;

    info!("Goal {} updated", goal.id);
    Ok(Json(json!({"data": goal})))
}

/// DELETE /api/v1/goals/:goal_id
pub async fn delete_goal(
    State(state): State<AppState>,
    Path(goal_id): Path<String>,
) -> ApiResult<StatusCode> {
    let id = path_id(&goal_id, "goal_id")?;
    let mut conn = state.db.acquire().await?;
    if !goals::delete(&mut conn, id).await? {
        return Err(not_found());
    }
    info!("Goal {} deleted", id);
    Ok(StatusCode::NO_CONTENT)
}
