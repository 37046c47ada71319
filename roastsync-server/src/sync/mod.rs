//! Roast upsert and delete
//!
//! Write path: decode and normalise the payload, consult the idempotency
//! cache, then inside one `BEGIN IMMEDIATE` transaction check for a stale
//! write, resolve what was roasted, deduct stock, persist the roast and
//! advance counter tasks. The response is cached before commit; task
//! notifications go out after commit.

pub mod arbiter;
pub mod identity;
pub mod ledger;
pub mod normalizer;
pub mod response;
pub mod telemetry;

use self::arbiter::StoredResponse;
use self::identity::RoastSource;
use self::normalizer::{BlendField, NormalizedRoast, TemplateField};
use crate::db::{roasts, schedules};
use crate::error::{ApiError, ApiResult};
use crate::scheduler;
use crate::AppState;
use chrono::{DateTime, Utc};
use roastsync_common::db::{QualityControl, ReferenceInfo, Roast};
use rust_decimal::Decimal;
use sqlx::SqliteConnection;
use tracing::{debug, info};
use uuid::Uuid;

/// Raw upsert request as it came off the wire
#[derive(Debug, Clone, Copy)]
pub struct UpsertRequest<'a> {
    pub body: &'a [u8],
    pub content_encoding: Option<&'a str>,
    pub idempotency_key: Option<&'a str>,
}

fn respond(status: u16, roast: &Roast) -> ApiResult<StoredResponse> {
    Ok(StoredResponse {
        status,
        body: serde_json::to_string(&response::envelope(roast))?,
    })
}

/// Bind a template only when it names a reference roast
async fn template_binding(conn: &mut SqliteConnection, candidate: Uuid) -> ApiResult<Option<Uuid>> {
    if roasts::is_reference(conn, candidate).await? {
        Ok(Some(candidate))
    } else {
        debug!("Template {} is not a reference roast; not bound", candidate);
        Ok(None)
    }
}

/// Merge the restricted field set of a partial update
async fn apply_partial(
    conn: &mut SqliteConnection,
    roast: &mut Roast,
    incoming: &NormalizedRoast,
    now: DateTime<Utc>,
) -> ApiResult<()> {
    if let Some(end_weight) = incoming.end_weight {
        roast.roasted_weight_kg = Some(end_weight);
    }
    roast.notes = incoming.notes.clone().filter(|n| !n.trim().is_empty());
    roast.label = incoming.label.clone();
    roast.whole_color = incoming.whole_color;
    roast.ground_color = incoming.ground_color;
    roast.cupping_score = incoming.cupping_score;
    match incoming.template {
        TemplateField::Absent => {}
        TemplateField::Clear => roast.reference_profile_id = None,
        TemplateField::Candidate(id) => roast.reference_profile_id = template_binding(conn, id).await?,
    }
    roast.modified_at = now;
    Ok(())
}

fn new_roast(
    incoming: &NormalizedRoast,
    user_id: Uuid,
    roasted_at: DateTime<Utc>,
    source: &RoastSource,
    now: DateTime<Utc>,
) -> Roast {
    let blend_hr_id = match &incoming.blend {
        BlendField::Reference(text) => Some(text.clone()),
        BlendField::Inline(spec) => spec
            .get("label")
            .and_then(|v| v.as_str())
            .map(str::to_string),
        BlendField::Absent => None,
    };
    Roast {
        id: incoming.roast_id,
        user_id,
        coffee_id: source.coffee_id(),
        blend_id: source.blend_id(),
        batch_id: incoming.batch_id,
        schedule_id: incoming.schedule_id,
        reference_profile_id: None,
        batch_number: incoming.batch_number,
        label: incoming.label.clone(),
        title: incoming.title.clone(),
        roasted_at,
        modified_at: incoming.modified_at.unwrap_or(now),
        gmt_offset: incoming.gmt_offset,
        green_weight_kg: incoming.amount.unwrap_or(Decimal::ZERO),
        roasted_weight_kg: incoming.end_weight,
        weight_loss: incoming.weight_loss,
        defects_weight: incoming.defects_weight,
        coffee_hr_id: incoming.coffee.clone(),
        blend_hr_id,
        location_hr_id: incoming.location.clone(),
        blend_spec: incoming.blend_spec.clone(),
        machine: incoming.machine.clone(),
        operator: incoming.operator.clone(),
        email: incoming.email.clone(),
        events: incoming.events.clone(),
        whole_color: incoming.whole_color,
        ground_color: incoming.ground_color,
        cupping_score: incoming.cupping_score,
        mode: incoming.mode.clone(),
        temp_unit: incoming.temp_unit.clone(),
        notes: incoming.notes.clone(),
        telemetry: incoming.telemetry.clone(),
        deducted_components: Vec::new(),
        batch_deducted_kg: None,
        reference: ReferenceInfo::default(),
        qc: QualityControl::default(),
        created_at: now,
    }
}

/// Create or update a roast from a desktop-client payload
pub async fn upsert(
    state: &AppState,
    user_id: Uuid,
    request: UpsertRequest<'_>,
) -> ApiResult<StoredResponse> {
    let now = Utc::now();
    let key = request
        .idempotency_key
        .map(str::trim)
        .filter(|k| !k.is_empty());

    if let Some(key) = key {
        let mut conn = state.db.acquire().await?;
        if let Some(cached) = arbiter::replay(&mut conn, key, now).await? {
            return Ok(cached);
        }
    }

    let document = normalizer::decode_body(request.body, request.content_encoding)?;
    let mut incoming = normalizer::normalize(document)?;

    let mut tx = state.db.begin_with("BEGIN IMMEDIATE").await?;
    let mut existing = roasts::get(&mut tx, incoming.roast_id).await?;

    if let Some(stored) = &existing {
        if stored.user_id != user_id {
            return Err(ApiError::BadRequest(format!(
                "Roast {} belongs to another user",
                stored.id
            )));
        }
        arbiter::check_modified(stored, incoming.modified_at)?;
    }

    if incoming.addressed_by_roast_id && incoming.date.is_none() {
        match existing.take() {
            Some(mut roast) => {
                apply_partial(&mut tx, &mut roast, &incoming, now).await?;
                roasts::save(&mut tx, &roast).await?;
                let reply = respond(200, &roast)?;
                if let Some(key) = key {
                    arbiter::remember(&mut tx, key, &reply, now).await?;
                }
                tx.commit().await?;
                info!("Roast {} partially updated", roast.id);
                return Ok(reply);
            }
            None => {
                incoming.date = incoming
                    .fallback_date
                    .or_else(|| incoming.amount.map(|_| now));
                if incoming.date.is_none() {
                    return Err(ApiError::NotFound(
                        "Roast not found for update. Include 'date' or 'roasted_at' to create new roast."
                            .into(),
                    ));
                }
            }
        }
    }

    let roasted_at = incoming
        .date
        .ok_or_else(|| ApiError::BadRequest("'date' field required for new roast".into()))?;

    if let Some(roast) = existing {
        debug!("Roast {} already stored; replaying it", roast.id);
        let reply = respond(200, &roast)?;
        if let Some(key) = key {
            arbiter::remember(&mut tx, key, &reply, now).await?;
        }
        tx.commit().await?;
        return Ok(reply);
    }

    let source =
        identity::resolve_source(&mut tx, &incoming, user_id, state.placeholder_stock).await?;
    let mut roast = new_roast(&incoming, user_id, roasted_at, &source, now);

    if let TemplateField::Candidate(id) = incoming.template {
        roast.reference_profile_id = template_binding(&mut tx, id).await?;
    }

    roast.deducted_components = ledger::deduct(&mut tx, &source, roast.green_weight_kg).await?;
    if let Some(batch_id) = roast.batch_id {
        roast.batch_deducted_kg =
            ledger::draw_from_batch(&mut tx, batch_id, roast.green_weight_kg, roast.roasted_weight_kg)
                .await?;
    }

    roasts::insert(&mut tx, &roast).await?;

    if let Some(schedule_id) = roast.schedule_id {
        if schedules::complete_if_pending(&mut tx, schedule_id, now).await? {
            info!("Schedule {} completed by roast {}", schedule_id, roast.id);
        }
    }

    let notifications = scheduler::count_roast(&mut tx, &roast, now).await?;

    let reply = respond(201, &roast)?;
    if let Some(key) = key {
        arbiter::remember(&mut tx, key, &reply, now).await?;
    }
    tx.commit().await?;

    info!(
        "Roast {} created: {} kg, {} stock deduction(s)",
        roast.id,
        roast.green_weight_kg,
        roast.deducted_components.len()
    );
    scheduler::publish_all(&state.hub, notifications);
    Ok(reply)
}

/// Delete a roast, putting back exactly what it took
pub async fn delete(state: &AppState, roast_id: Uuid) -> ApiResult<()> {
    let mut tx = state.db.begin_with("BEGIN IMMEDIATE").await?;
    let roast = roasts::get(&mut tx, roast_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Roast {} not found", roast_id)))?;

    ledger::restore(&mut tx, &roast.deducted_components).await?;
    ledger::return_to_batch(&mut tx, &roast).await?;
    roasts::delete(&mut tx, roast.id).await?;
    tx.commit().await?;

    info!(
        "Roast {} deleted, {} stock entr(ies) restored",
        roast.id,
        roast.deducted_components.len()
    );
    Ok(())
}
