//! Roast endpoints
//!
//! Upsert is the desktop client's write path; the rest serve the web
//! client (listing, detail with goal evaluation, quality-control edits).

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use roastsync_common::db::Roast;
use roastsync_common::time::{parse_iso, to_millis};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};
use sqlx::SqliteConnection;
use std::path::Path as FsPath;
use tracing::info;

use super::{path_id, Caller};
use crate::db::roasts::{self, RoastFilter};
use crate::error::{ApiError, ApiResult};
use crate::profile::resolver;
use crate::qc::{self, GoalsReport};
use crate::sync::{self, response, UpsertRequest};
use crate::AppState;

pub const IDEMPOTENCY_HEADER: &str = "idempotency-key";

const MAX_LIMIT: i64 = 10_000;
const DEFAULT_LIMIT: i64 = 100;

/// POST /api/v1/aroast (alias POST /api/v1/roasts)
///
/// Body may be gzip-compressed. A repeated `Idempotency-Key` gets the
/// first response back byte for byte.
pub async fn upsert_roast(
    State(state): State<AppState>,
    Caller(user_id): Caller,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Response> {
    let content_encoding = headers
        .get(header::CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok());
    let idempotency_key = headers
        .get(IDEMPOTENCY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|k| !k.is_empty());

    let stored = sync::upsert(
        &state,
        user_id,
        UpsertRequest {
            body: &body,
            content_encoding,
            idempotency_key,
        },
    )
    .await?;

    let status = StatusCode::from_u16(stored.status)
        .map_err(|e| ApiError::Internal(format!("Stored status {} is invalid: {}", stored.status, e)))?;
    Ok((status, [(header::CONTENT_TYPE, "application/json")], stored.body).into_response())
}

/// Query parameters for GET /api/v1/roasts
#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub date_from: Option<String>,
    pub date_to: Option<String>,
    pub coffee_id: Option<String>,
    pub batch_id: Option<String>,
    pub in_quality_control: Option<bool>,
}

fn parse_bound(raw: Option<&str>, name: &str, end_of_day: bool) -> ApiResult<Option<DateTime<Utc>>> {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(None);
    };
    let ts = parse_iso(raw).ok_or_else(|| ApiError::BadRequest(format!("Invalid {} '{}'", name, raw)))?;
    let bare_date = NaiveDate::parse_from_str(raw, "%Y-%m-%d").is_ok();
    if end_of_day && bare_date {
        Ok(Some(ts + Duration::days(1) - Duration::milliseconds(1)))
    } else {
        Ok(Some(ts))
    }
}

fn parse_filter_id(raw: Option<&str>, name: &str) -> ApiResult<Option<uuid::Uuid>> {
    raw.map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| path_id(s, name))
        .transpose()
}

/// Resolve the roast's profile, fill gaps from it and evaluate goals
pub(crate) async fn evaluate(
    conn: &mut SqliteConnection,
    profiles_dir: &FsPath,
    mut roast: Roast,
) -> ApiResult<(Roast, Option<GoalsReport>)> {
    let profile = resolver::resolve(conn, profiles_dir, &roast).await?;
    resolver::enrich_roast(&mut roast, &profile);
    let report = qc::check_roast(conn, profiles_dir, &roast, &profile).await?;
    Ok((roast, report))
}

fn annotate(body: &mut Value, report: Option<&GoalsReport>, with_details: bool) -> ApiResult<()> {
    let (Some(report), Some(obj)) = (report, body.as_object_mut()) else {
        return Ok(());
    };
    obj.insert("goals_status".into(), serde_json::to_value(&report.status)?);
    if with_details {
        obj.insert("goals_check".into(), serde_json::to_value(report)?);
    }
    Ok(())
}

/// GET /api/v1/roasts
///
/// Newest first. Every user sees every roast.
pub async fn list_roasts(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Value>> {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT);
    if !(1..=MAX_LIMIT).contains(&limit) {
        return Err(ApiError::BadRequest(format!("limit must be between 1 and {}", MAX_LIMIT)));
    }
    let offset = query.offset.unwrap_or(0);
    if offset < 0 {
        return Err(ApiError::BadRequest("offset must not be negative".into()));
    }

    let filter = RoastFilter {
        date_from: parse_bound(query.date_from.as_deref(), "date_from", false)?,
        date_to: parse_bound(query.date_to.as_deref(), "date_to", true)?,
        coffee_id: parse_filter_id(query.coffee_id.as_deref(), "coffee_id")?,
        batch_id: parse_filter_id(query.batch_id.as_deref(), "batch_id")?,
        in_quality_control: query.in_quality_control,
    };

    let mut conn = state.db.acquire().await?;
    let (page, total) = roasts::list(&mut conn, &filter, limit, offset).await?;

    let mut items = Vec::with_capacity(page.len());
    for roast in page {
        let (roast, report) = evaluate(&mut conn, &state.profiles_dir, roast).await?;
        let mut body = response::roast_body(&roast);
        annotate(&mut body, report.as_ref(), false)?;
        items.push(body);
    }

    Ok(Json(json!({"data": {"items": items, "total": total}})))
}

#[derive(Debug, Default, Deserialize)]
pub struct GetQuery {
    /// Client's copy, epoch milliseconds
    pub modified_at: Option<i64>,
}

/// GET /api/v1/roasts/:roast_id
///
/// 204 when the client's `modified_at` is at least as new as the server's.
pub async fn get_roast(
    State(state): State<AppState>,
    Path(roast_id): Path<String>,
    Query(query): Query<GetQuery>,
) -> ApiResult<Response> {
    let id = path_id(&roast_id, "roast_id")?;
    let mut conn = state.db.acquire().await?;
    let roast = roasts::get(&mut conn, id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Roast not found".into()))?;

    if let Some(client_ms) = query.modified_at {
        if to_millis(&roast.modified_at) <= client_ms {
            return Ok(StatusCode::NO_CONTENT.into_response());
        }
    }

    let (roast, report) = evaluate(&mut conn, &state.profiles_dir, roast).await?;
    let mut body = response::envelope(&roast);
    annotate(&mut body["data"], report.as_ref(), true)?;
    Ok(Json(body).into_response())
}

/// Quality-control edit; absent fields stay as they are
#[derive(Debug, Default, Deserialize)]
pub struct RoastPatch {
    pub roasted_at: Option<String>,
    pub green_weight_kg: Option<Decimal>,
    pub roasted_weight_kg: Option<Decimal>,
    pub title: Option<String>,
    pub label: Option<String>,
    pub notes: Option<String>,
    pub batch_number: Option<i64>,
    pub machine: Option<String>,
    pub operator: Option<String>,
    pub email: Option<String>,
    pub whole_color: Option<i64>,
    pub ground_color: Option<i64>,
    pub cupping_score: Option<i64>,
    pub cupping_date: Option<NaiveDate>,
    pub cupping_verdict: Option<String>,
    pub espresso_date: Option<NaiveDate>,
    pub espresso_verdict: Option<String>,
    pub espresso_notes: Option<String>,
    pub reference_beans_notes: Option<String>,
    pub in_quality_control: Option<bool>,
}

fn bounded(value: Option<String>, field: &str, max: usize) -> ApiResult<Option<String>> {
    match value {
        Some(v) if v.chars().count() > max => Err(ApiError::BadRequest(format!(
            "{} must be at most {} characters",
            field, max
        ))),
        other => Ok(other),
    }
}

impl RoastPatch {
    fn apply(self, roast: &mut Roast, now: DateTime<Utc>) -> ApiResult<()> {
        if let Some(raw) = self.roasted_at.as_deref() {
            roast.roasted_at = parse_iso(raw)
                .ok_or_else(|| ApiError::BadRequest(format!("Invalid roasted_at '{}'", raw)))?;
        }
        if let Some(kg) = self.green_weight_kg {
            roast.green_weight_kg = kg;
        }
        if let Some(kg) = self.roasted_weight_kg {
            roast.roasted_weight_kg = Some(kg);
        }
        if let Some(title) = bounded(self.title, "title", 255)? {
            roast.title = Some(title);
        }
        if let Some(label) = self.label.filter(|l| !l.trim().is_empty()) {
            roast.label = label;
        }
        if let Some(notes) = bounded(self.notes, "notes", 2000)? {
            roast.notes = Some(notes);
        }
        if let Some(n) = self.batch_number {
            roast.batch_number = n;
        }
        if self.machine.is_some() {
            roast.machine = self.machine;
        }
        if self.operator.is_some() {
            roast.operator = self.operator;
        }
        if self.email.is_some() {
            roast.email = self.email;
        }
        if let Some(v) = self.whole_color {
            roast.whole_color = v;
        }
        if let Some(v) = self.ground_color {
            roast.ground_color = v;
        }
        if let Some(v) = self.cupping_score {
            roast.cupping_score = v;
        }
        if self.cupping_date.is_some() {
            roast.qc.cupping_date = self.cupping_date;
        }
        if let Some(v) = bounded(self.cupping_verdict, "cupping_verdict", 20)? {
            roast.qc.cupping_verdict = Some(v);
        }
        if self.espresso_date.is_some() {
            roast.qc.espresso_date = self.espresso_date;
        }
        if let Some(v) = bounded(self.espresso_verdict, "espresso_verdict", 20)? {
            roast.qc.espresso_verdict = Some(v);
        }
        if self.espresso_notes.is_some() {
            roast.qc.espresso_notes = self.espresso_notes;
        }
        if self.reference_beans_notes.is_some() {
            roast.reference.reference_beans_notes = self.reference_beans_notes;
        }
        if let Some(flag) = self.in_quality_control {
            roast.qc.in_quality_control = flag;
        }
        roast.modified_at = now;
        Ok(())
    }
}

/// PATCH /api/v1/roasts/:roast_id
pub async fn patch_roast(
    State(state): State<AppState>,
    Path(roast_id): Path<String>,
    Json(patch): Json<RoastPatch>,
) -> ApiResult<Json<Value>> {
    let id = path_id(&roast_id, "roast_id")?;
    let mut tx = state.db.begin_with("BEGIN IMMEDIATE").await?;
    let mut roast = roasts::get(&mut tx, id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Roast not found".into()))?;

    patch.apply(&mut roast, Utc::now())?;
    roasts::save(&mut tx, &roast).await?;
    tx.commit().await?;

    info!("Roast {} updated", roast.id);
    Ok(Json(json!({"data": response::roast_body(&roast)})))
}

/// DELETE /api/v1/roasts/:roast_id
pub async fn delete_roast(
    State(state): State<AppState>,
    Path(roast_id): Path<String>,
) -> ApiResult<StatusCode> {
    let id = path_id(&roast_id, "roast_id")?;
    sync::delete(&state, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::resolver::tests::sample_roast;
    use chrono::TimeZone;

    #[test]
    fn test_date_to_covers_whole_day() {
        let end = parse_bound(Some("2024-03-01"), "date_to", true).unwrap().unwrap();
        assert_eq!(end, Utc.with_ymd_and_hms(2024, 3, 1, 23, 59, 59).unwrap() + Duration::milliseconds(999));

        let exact = parse_bound(Some("2024-03-01T10:00:00Z"), "date_to", true).unwrap().unwrap();
        assert_eq!(exact, Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap());

        assert!(parse_bound(Some("yesterday"), "date_from", false).is_err());
        assert!(parse_bound(Some("  "), "date_from", false).unwrap().is_none());
    }

    #[test]
    fn test_patch_keeps_label_when_blank() {
        let mut roast = sample_roast();
        let original = roast.label.clone();
        let now = Utc::now();
        let patch = RoastPatch {
            label: Some("   ".into()),
            cupping_verdict: Some("ok".into()),
            in_quality_control: Some(true),
            ..Default::default()
        };
        patch.apply(&mut roast, now).unwrap();
        assert_eq!(roast.label, original);
        assert_eq!(roast.qc.cupping_verdict.as_deref(), Some("ok"));
        assert!(roast.qc.in_quality_control);
        assert_eq!(roast.modified_at, now);
    }

    #[test]
    fn test_patch_rejects_long_verdict() {
        let mut roast = sample_roast();
        let patch = RoastPatch {
            espresso_verdict: Some("x".repeat(21)),
            ..Default::default()
        };
        assert!(matches!(patch.apply(&mut roast, Utc::now()), Err(ApiError::BadRequest(_))));
    }
}
