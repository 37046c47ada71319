//! Artisan-shaped roast documents and the upsert envelope

use super::telemetry;
use crate::db::ts_text;
use roastsync_common::db::Roast;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::{json, Map, Value};

fn kg(value: Decimal) -> Value {
    value.to_f64().map(Value::from).unwrap_or(Value::Null)
}

fn opt_kg(value: Option<Decimal>) -> Value {
    value.map(kg).unwrap_or(Value::Null)
}

fn id(value: Option<uuid::Uuid>) -> Value {
    value.map(|v| Value::String(v.to_string())).unwrap_or(Value::Null)
}

/// One roast in the client's field naming
pub fn roast_body(roast: &Roast) -> Value {
    let e = &roast.events;
    let mut body = json!({
        "roast_id": roast.id.to_string(),
        "user_id": roast.user_id.to_string(),
        "coffee_id": id(roast.coffee_id),
        "blend_id": id(roast.blend_id),
        "batch_id": id(roast.batch_id),
        "schedule_id": id(roast.schedule_id),
        "reference_profile_id": id(roast.reference_profile_id),
        "batch_number": roast.batch_number,
        "label": roast.label,
        "title": roast.title,
        "date": ts_text(&roast.roasted_at),
        "roasted_at": ts_text(&roast.roasted_at),
        "modified_at": ts_text(&roast.modified_at),
        "GMT_offset": roast.gmt_offset,
        "amount": kg(roast.green_weight_kg),
        "end_weight": opt_kg(roast.roasted_weight_kg),
        "weight_loss": roast.weight_loss,
        "defects_weight": roast.defects_weight,
        "coffee": roast.coffee_hr_id,
        "blend": roast.blend_spec.clone().or_else(|| roast.blend_hr_id.clone().map(Value::String)),
        "location": roast.location_hr_id,
        "machine": roast.machine,
        "operator": roast.operator,
        "email": roast.email,
        "charge_temp": e.charge_temp,
        "TP_temp": e.tp_temp,
        "TP_time": e.tp_time,
        "DRY_temp": e.dry_temp,
        "DRY_time": e.dry_time,
        "FCs_temp": e.fcs_temp,
        "FCs_time": e.fcs_time,
        "FCe_temp": e.fce_temp,
        "FCe_time": e.fce_time,
        "SCs_temp": e.scs_temp,
        "SCs_time": e.scs_time,
        "SCe_temp": e.sce_temp,
        "SCe_time": e.sce_time,
        "drop_temp": e.drop_temp,
        "drop_time": e.drop_time,
        "DEV_time": e.dev_time,
        "DEV_ratio": e.dev_ratio,
        "whole_color": roast.whole_color,
        "ground_color": roast.ground_color,
        "cupping_score": roast.cupping_score,
        "mode": roast.mode,
        "temp_unit": roast.temp_unit,
        "notes": roast.notes,
        "telemetry": telemetry::reassemble(&roast.telemetry),
        "timeindex": roast.telemetry.timeindex,
        "deducted_components": roast.deducted_components,
        "is_reference": roast.reference.is_reference,
        "reference_name": roast.reference.reference_name,
        "reference_for_coffee_id": id(roast.reference.reference_for_coffee_id),
        "reference_for_blend_id": id(roast.reference.reference_for_blend_id),
        "reference_machine": roast.reference.reference_machine,
        "reference_beans_notes": roast.reference.reference_beans_notes,
        "in_quality_control": roast.qc.in_quality_control,
        "cupping_date": roast.qc.cupping_date,
        "cupping_verdict": roast.qc.cupping_verdict,
        "espresso_date": roast.qc.espresso_date,
        "espresso_notes": roast.qc.espresso_notes,
        "espresso_verdict": roast.qc.espresso_verdict,
        "created_at": ts_text(&roast.created_at),
    });
    if let Some(obj) = body.as_object_mut() {
        if roast.batch_deducted_kg.is_some() {
            obj.insert("batch_deducted_kg".into(), opt_kg(roast.batch_deducted_kg));
        }
    }
    body
}

/// The `result` block the desktop client reads after an upsert
pub fn upsert_result(roast: &Roast) -> Value {
    let mut result = Map::new();
    result.insert("roast_id".into(), json!(roast.id.to_string()));
    result.insert("modified_at".into(), json!(ts_text(&roast.modified_at)));
    result.insert("date".into(), json!(ts_text(&roast.roasted_at)));
    result.insert("amount".into(), kg(roast.green_weight_kg));
    result.insert("end_weight".into(), opt_kg(roast.roasted_weight_kg));
    result.insert("coffee_id".into(), id(roast.coffee_id));
    result.insert("blend_id".into(), id(roast.blend_id));
    result.insert("message".into(), json!("Roast saved successfully"));
    if let Some(reference) = roast.reference_profile_id {
        result.insert("reference_profile_id".into(), json!(reference.to_string()));
    }
    Value::Object(result)
}

/// Full success envelope
pub fn envelope(roast: &Roast) -> Value {
    json!({
        "data": roast_body(roast),
        "result": upsert_result(roast),
        "success": true,
        "ol": {},
        "pu": "",
        "notifications": {"unqualified": 0, "machines": []},
    })
}
