//! Roast queries

use super::{
    date_text, get_bool, get_decimal, get_json, get_opt_date, get_opt_decimal, get_opt_json,
    get_opt_uuid, get_ts, get_uuid, ts_text,
};
use chrono::{DateTime, Utc};
use roastsync_common::db::{QualityControl, ReferenceInfo, Roast, RoastEvents, Telemetry};
use roastsync_common::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqliteConnection};
use uuid::Uuid;

const COLUMNS: &str = r#"
    id, user_id, coffee_id, blend_id, batch_id, schedule_id, reference_profile_id,
    batch_number, label, title, roasted_at, modified_at, gmt_offset,
    green_weight_kg, roasted_weight_kg, weight_loss, defects_weight,
    coffee_hr_id, blend_hr_id, location_hr_id, blend_spec, machine, operator, email,
    charge_temp, tp_temp, dry_temp, fcs_temp, fce_temp, scs_temp, sce_temp, drop_temp,
    tp_time, dry_time, fcs_time, fce_time, scs_time, sce_time, drop_time, dev_time, dev_ratio,
    whole_color, ground_color, cupping_score, mode, temp_unit, notes,
    timex, temp1, temp2, extra_temp1, extra_temp2, air, drum, gas, fan, heater, timeindex,
    deducted_components, batch_deducted_kg,
    is_reference, reference_name, reference_for_coffee_id, reference_for_blend_id,
    reference_machine, reference_beans_notes,
    in_quality_control, cupping_date, cupping_verdict, espresso_date, espresso_notes,
    espresso_verdict, created_at
"#;

fn from_row(row: &SqliteRow) -> Result<Roast> {
    Ok(Roast {
        id: get_uuid(row, "id")?,
        user_id: get_uuid(row, "user_id")?,
        coffee_id: get_opt_uuid(row, "coffee_id")?,
        blend_id: get_opt_uuid(row, "blend_id")?,
        batch_id: get_opt_uuid(row, "batch_id")?,
        schedule_id: get_opt_uuid(row, "schedule_id")?,
        reference_profile_id: get_opt_uuid(row, "reference_profile_id")?,
        batch_number: row.try_get("batch_number")?,
        label: row.try_get("label")?,
        title: row.try_get("title")?,
        roasted_at: get_ts(row, "roasted_at")?,
        modified_at: get_ts(row, "modified_at")?,
        gmt_offset: row.try_get("gmt_offset")?,
        green_weight_kg: get_decimal(row, "green_weight_kg")?,
        roasted_weight_kg: get_opt_decimal(row, "roasted_weight_kg")?,
        weight_loss: row.try_get("weight_loss")?,
        defects_weight: row.try_get("defects_weight")?,
        coffee_hr_id: row.try_get("coffee_hr_id")?,
        blend_hr_id: row.try_get("blend_hr_id")?,
        location_hr_id: row.try_get("location_hr_id")?,
        blend_spec: get_opt_json(row, "blend_spec")?,
        machine: row.try_get("machine")?,
        operator: row.try_get("operator")?,
        email: row.try_get("email")?,
        events: RoastEvents {
            charge_temp: row.try_get("charge_temp")?,
            tp_temp: row.try_get("tp_temp")?,
            dry_temp: row.try_get("dry_temp")?,
            fcs_temp: row.try_get("fcs_temp")?,
            fce_temp: row.try_get("fce_temp")?,
            scs_temp: row.try_get("scs_temp")?,
            sce_temp: row.try_get("sce_temp")?,
            drop_temp: row.try_get("drop_temp")?,
            tp_time: row.try_get("tp_time")?,
            dry_time: row.try_get("dry_time")?,
            fcs_time: row.try_get("fcs_time")?,
            fce_time: row.try_get("fce_time")?,
            scs_time: row.try_get("scs_time")?,
            sce_time: row.try_get("sce_time")?,
            drop_time: row.try_get("drop_time")?,
            dev_time: row.try_get("dev_time")?,
            dev_ratio: row.try_get("dev_ratio")?,
        },
        whole_color: row.try_get("whole_color")?,
        ground_color: row.try_get("ground_color")?,
        cupping_score: row.try_get("cupping_score")?,
        mode: row.try_get("mode")?,
        temp_unit: row.try_get("temp_unit")?,
        notes: row.try_get("notes")?,
        telemetry: Telemetry {
            timex: get_json(row, "timex")?,
            temp1: get_json(row, "temp1")?,
            temp2: get_json(row, "temp2")?,
            extra_temp1: get_json(row, "extra_temp1")?,
            extra_temp2: get_json(row, "extra_temp2")?,
            air: get_json(row, "air")?,
            drum: get_json(row, "drum")?,
            gas: get_json(row, "gas")?,
            fan: get_json(row, "fan")?,
            heater: get_json(row, "heater")?,
            timeindex: get_opt_json(row, "timeindex")?,
        },
        deducted_components: get_json(row, "deducted_components")?,
        batch_deducted_kg: get_opt_decimal(row, "batch_deducted_kg")?,
        reference: ReferenceInfo {
            is_reference: get_bool(row, "is_reference")?,
            reference_name: row.try_get("reference_name")?,
            reference_for_coffee_id: get_opt_uuid(row, "reference_for_coffee_id")?,
            reference_for_blend_id: get_opt_uuid(row, "reference_for_blend_id")?,
            reference_machine: row.try_get("reference_machine")?,
            reference_beans_notes: row.try_get("reference_beans_notes")?,
        },
        qc: QualityControl {
            in_quality_control: get_bool(row, "in_quality_control")?,
            cupping_date: get_opt_date(row, "cupping_date")?,
            cupping_verdict: row.try_get("cupping_verdict")?,
            espresso_date: get_opt_date(row, "espresso_date")?,
            espresso_notes: row.try_get("espresso_notes")?,
            espresso_verdict: row.try_get("espresso_verdict")?,
        },
        created_at: get_ts(row, "created_at")?,
    })
}

fn opt_id(id: Option<Uuid>) -> Option<String> {
    id.map(|v| v.to_string())
}

/// Bind every column after `id` in COLUMNS order
fn bind_columns<'q>(
    query: sqlx::query::Query<'q, Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
    roast: &'q Roast,
) -> Result<sqlx::query::Query<'q, Sqlite, sqlx::sqlite::SqliteArguments<'q>>> {
    let t = &roast.telemetry;
    let e = &roast.events;
    let r = &roast.reference;
    let qc = &roast.qc;
    Ok(query
        .bind(roast.user_id.to_string())
        .bind(opt_id(roast.coffee_id))
        .bind(opt_id(roast.blend_id))
        .bind(opt_id(roast.batch_id))
        .bind(opt_id(roast.schedule_id))
        .bind(opt_id(roast.reference_profile_id))
        .bind(roast.batch_number)
        .bind(&roast.label)
        .bind(&roast.title)
        .bind(ts_text(&roast.roasted_at))
        .bind(ts_text(&roast.modified_at))
        .bind(roast.gmt_offset)
        .bind(roast.green_weight_kg.to_string())
        .bind(roast.roasted_weight_kg.map(|w| w.to_string()))
        .bind(roast.weight_loss)
        .bind(roast.defects_weight)
        .bind(&roast.coffee_hr_id)
        .bind(&roast.blend_hr_id)
        .bind(&roast.location_hr_id)
        .bind(roast.blend_spec.as_ref().map(|v| v.to_string()))
        .bind(&roast.machine)
        .bind(&roast.operator)
        .bind(&roast.email)
        .bind(e.charge_temp)
        .bind(e.tp_temp)
        .bind(e.dry_temp)
        .bind(e.fcs_temp)
        .bind(e.fce_temp)
        .bind(e.scs_temp)
        .bind(e.sce_temp)
        .bind(e.drop_temp)
        .bind(e.tp_time)
        .bind(e.dry_time)
        .bind(e.fcs_time)
        .bind(e.fce_time)
        .bind(e.scs_time)
        .bind(e.sce_time)
        .bind(e.drop_time)
        .bind(e.dev_time)
        .bind(e.dev_ratio)
        .bind(roast.whole_color)
        .bind(roast.ground_color)
        .bind(roast.cupping_score)
        .bind(&roast.mode)
        .bind(&roast.temp_unit)
        .bind(&roast.notes)
        .bind(serde_json::to_string(&t.timex)?)
        .bind(serde_json::to_string(&t.temp1)?)
        .bind(serde_json::to_string(&t.temp2)?)
        .bind(serde_json::to_string(&t.extra_temp1)?)
        .bind(serde_json::to_string(&t.extra_temp2)?)
        .bind(serde_json::to_string(&t.air)?)
        .bind(serde_json::to_string(&t.drum)?)
        .bind(serde_json::to_string(&t.gas)?)
        .bind(serde_json::to_string(&t.fan)?)
        .bind(serde_json::to_string(&t.heater)?)
        .bind(t.timeindex.as_ref().map(serde_json::to_string).transpose()?)
        .bind(serde_json::to_string(&roast.deducted_components)?)
        .bind(roast.batch_deducted_kg.map(|w| w.to_string()))
        .bind(r.is_reference)
        .bind(&r.reference_name)
        .bind(opt_id(r.reference_for_coffee_id))
        .bind(opt_id(r.reference_for_blend_id))
        .bind(&r.reference_machine)
        .bind(&r.reference_beans_notes)
        .bind(qc.in_quality_control)
        .bind(qc.cupping_date.as_ref().map(date_text))
        .bind(&qc.cupping_verdict)
        .bind(qc.espresso_date.as_ref().map(date_text))
        .bind(&qc.espresso_notes)
        .bind(&qc.espresso_verdict)
        .bind(ts_text(&roast.created_at)))
}

fn column_names() -> Vec<&'static str> {
    COLUMNS
        .split(',')
        .map(|c| c.trim())
        .filter(|c| !c.is_empty())
        .collect()
}

pub async fn insert(conn: &mut SqliteConnection, roast: &Roast) -> Result<()> {
    let columns = column_names();
    let placeholders = vec!["?"; columns.len()].join(", ");
    let sql = format!(
        "INSERT INTO roasts ({}) VALUES ({})",
        columns.join(", "),
        placeholders
    );
    // `id` leads COLUMNS; the remaining binds follow in order
    let query = sqlx::query(&sql).bind(roast.id.to_string());
    bind_columns(query, roast)?.execute(&mut *conn).await?;
    Ok(())
}

/// Rewrite every mutable column of an existing roast
pub async fn save(conn: &mut SqliteConnection, roast: &Roast) -> Result<()> {
    let columns = column_names();
    let assignments: Vec<String> = columns
        .iter()
        .skip(1)
        .map(|c| format!("{} = ?", c))
        .collect();
    let sql = format!("UPDATE roasts SET {} WHERE id = ?", assignments.join(", "));
    let query = sqlx::query(&sql);
    bind_columns(query, roast)?
        .bind(roast.id.to_string())
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub async fn get(conn: &mut SqliteConnection, id: Uuid) -> Result<Option<Roast>> {
    let row = sqlx::query(&format!("SELECT {} FROM roasts WHERE id = ?", COLUMNS))
        .bind(id.to_string())
        .fetch_optional(&mut *conn)
        .await?;
    row.as_ref().map(from_row).transpose()
}

pub async fn delete(conn: &mut SqliteConnection, id: Uuid) -> Result<bool> {
    let result = sqlx::query("DELETE FROM roasts WHERE id = ?")
        .bind(id.to_string())
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// True when `id` names a roast flagged as reference
pub async fn is_reference(conn: &mut SqliteConnection, id: Uuid) -> Result<bool> {
    let flag: Option<i64> = sqlx::query_scalar("SELECT is_reference FROM roasts WHERE id = ?")
        .bind(id.to_string())
        .fetch_optional(&mut *conn)
        .await?;
    Ok(flag.unwrap_or(0) != 0)
}

/// Roasts made from a stored blend
pub async fn count_for_blend(conn: &mut SqliteConnection, blend_id: Uuid) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM roasts WHERE blend_id = ?")
        .bind(blend_id.to_string())
        .fetch_one(&mut *conn)
        .await?;
    Ok(count)
}

/// Roast list filters
#[derive(Debug, Clone, Default)]
pub struct RoastFilter {
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
    pub coffee_id: Option<Uuid>,
    pub batch_id: Option<Uuid>,
    pub in_quality_control: Option<bool>,
}

fn push_filter(qb: &mut QueryBuilder<'_, Sqlite>, filter: &RoastFilter) {
    qb.push(" WHERE 1 = 1");
    if let Some(from) = filter.date_from {
        qb.push(" AND roasted_at >= ").push_bind(ts_text(&from));
    }
    if let Some(to) = filter.date_to {
        qb.push(" AND roasted_at <= ").push_bind(ts_text(&to));
    }
    if let Some(coffee_id) = filter.coffee_id {
        qb.push(" AND coffee_id = ").push_bind(coffee_id.to_string());
    }
    if let Some(batch_id) = filter.batch_id {
        qb.push(" AND batch_id = ").push_bind(batch_id.to_string());
    }
    if let Some(flag) = filter.in_quality_control {
        qb.push(" AND in_quality_control = ").push_bind(flag);
    }
}

/// Newest first; returns (page, total matching)
pub async fn list(
    conn: &mut SqliteConnection,
    filter: &RoastFilter,
    limit: i64,
    offset: i64,
) -> Result<(Vec<Roast>, i64)> {
    let mut count_qb = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM roasts");
    push_filter(&mut count_qb, filter);
    let total: i64 = count_qb.build_query_scalar().fetch_one(&mut *conn).await?;

    let mut qb = QueryBuilder::<Sqlite>::new(format!("SELECT {} FROM roasts", COLUMNS));
    push_filter(&mut qb, filter);
    qb.push(" ORDER BY roasted_at DESC LIMIT ")
        .push_bind(limit)
        .push(" OFFSET ")
        .push_bind(offset);
    let rows = qb.build().fetch_all(&mut *conn).await?;

    let roasts = rows.iter().map(from_row).collect::<Result<Vec<_>>>()?;
    Ok((roasts, total))
}

/// Which entity a reference roast is bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceTarget {
    Coffee(Uuid),
    Blend(Uuid),
    Any,
}

/// Reference roasts for a target, optionally restricted to a machine
/// (trimmed, case-insensitive); newest first
pub async fn list_references(
    conn: &mut SqliteConnection,
    target: ReferenceTarget,
    machine: Option<&str>,
) -> Result<Vec<Roast>> {
    let mut qb = QueryBuilder::<Sqlite>::new(format!(
        "SELECT {} FROM roasts WHERE is_reference = 1",
        COLUMNS
    ));
    match target {
        ReferenceTarget::Coffee(id) => {
            qb.push(" AND reference_for_coffee_id = ").push_bind(id.to_string());
        }
        ReferenceTarget::Blend(id) => {
            qb.push(" AND reference_for_blend_id = ").push_bind(id.to_string());
        }
        ReferenceTarget::Any => {}
    }
    if let Some(machine) = machine {
        qb.push(" AND lower(trim(reference_machine)) = ")
            .push_bind(machine.trim().to_lowercase());
    }
    qb.push(" ORDER BY roasted_at DESC");
    let rows = qb.build().fetch_all(&mut *conn).await?;
    rows.iter().map(from_row).collect()
}

/// Clear the reference flag on every roast bound to `target` except `keep`
pub async fn clear_references_for(
    conn: &mut SqliteConnection,
    target: ReferenceTarget,
    machine: Option<&str>,
    keep: Uuid,
) -> Result<u64> {
    let mut qb = QueryBuilder::<Sqlite>::new(
        "UPDATE roasts SET is_reference = 0, reference_for_coffee_id = NULL, reference_for_blend_id = NULL, reference_machine = NULL WHERE is_reference = 1 AND id != ",
    );
    qb.push_bind(keep.to_string());
    match target {
        ReferenceTarget::Coffee(id) => {
            qb.push(" AND reference_for_coffee_id = ").push_bind(id.to_string());
        }
        ReferenceTarget::Blend(id) => {
            qb.push(" AND reference_for_blend_id = ").push_bind(id.to_string());
        }
        ReferenceTarget::Any => return Ok(0),
    }
    match machine {
        Some(m) => {
            qb.push(" AND lower(trim(reference_machine)) = ")
                .push_bind(m.trim().to_lowercase());
        }
        None => {
            qb.push(" AND (reference_machine IS NULL OR trim(reference_machine) = '')");
        }
    }
    let result = qb.build().execute(&mut *conn).await?;
    Ok(result.rows_affected())
}
