//! Wire payload normalisation
//!
//! The desktop client never sends a field whose value equals its default,
//! may gzip the body, and may nest the curves under a `telemetry` object.
//! [`normalize`] turns such a body into a [`NormalizedRoast`] with every
//! suppressed field restored from [`suppression_defaults`].

use super::telemetry;
use crate::profile::Document;
use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use roastsync_common::db::{RoastEvents, Telemetry};
use roastsync_common::time::parse_client_timestamp;
use roastsync_common::{uuid_utils, Error, Result};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::borrow::Cow;
use std::io::Read;
use std::str::FromStr;
use uuid::Uuid;

const GZIP_MAGIC: [u8; 2] = [0x1F, 0x8B];

const LABEL_MAX: usize = 255;
const NOTES_MAX: usize = 2000;

/// Curve channels plus the event index, as named on the wire
pub const TELEMETRY_FIELDS: [&str; 11] = [
    "timex",
    "temp1",
    "temp2",
    "extra_temp1",
    "extra_temp2",
    "air",
    "drum",
    "gas",
    "fan",
    "heater",
    "timeindex",
];

/// Value restored for each field the client left out
pub fn suppression_defaults() -> Vec<(&'static str, Value)> {
    vec![
        ("batch_number", json!(0)),
        ("label", json!("")),
        ("notes", json!("")),
        ("whole_color", json!(0)),
        ("ground_color", json!(0)),
        ("cupping_score", json!(0)),
        ("defects_weight", json!(0)),
        ("weight_loss", Value::Null),
        ("FCe_temp", Value::Null),
        ("FCe_time", Value::Null),
        ("SCs_temp", Value::Null),
        ("SCs_time", Value::Null),
        ("SCe_temp", Value::Null),
        ("SCe_time", Value::Null),
        ("extra_temp1", json!([])),
        ("extra_temp2", json!([])),
        ("air", json!([])),
        ("drum", json!([])),
        ("gas", json!([])),
        ("fan", json!([])),
        ("heater", json!([])),
        ("timex", json!([])),
        ("temp1", json!([])),
        ("temp2", json!([])),
        ("mode", json!("C")),
        ("temp_unit", json!("C")),
        ("GMT_offset", json!(0)),
    ]
}

/// How the payload names the blend it was roasted from
#[derive(Debug, Clone, PartialEq)]
pub enum BlendField {
    Absent,
    /// `{label, ingredients: [{coffee, ratio}]}` carried in the payload
    Inline(Value),
    /// A bare string; only a caller-owned blend id resolves
    Reference(String),
}

/// What the payload says about the reference template
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateField {
    /// No `template` key at all
    Absent,
    /// Null, empty, or an unusable id
    Clear,
    Candidate(Uuid),
}

/// Typed view of one roast upsert payload
#[derive(Debug, Clone)]
pub struct NormalizedRoast {
    pub roast_id: Uuid,
    /// The payload used the `roast_id` key (rather than only `id`)
    pub addressed_by_roast_id: bool,
    pub date: Option<DateTime<Utc>>,
    /// First usable of `roasted_at`, `roastdate`, `modified_at`
    pub fallback_date: Option<DateTime<Utc>>,
    pub modified_at: Option<DateTime<Utc>>,
    /// `None` when the client did not send `amount`
    pub amount: Option<Decimal>,
    pub end_weight: Option<Decimal>,
    pub weight_loss: Option<f64>,
    pub defects_weight: f64,
    pub batch_number: i64,
    pub label: String,
    pub title: Option<String>,
    pub notes: Option<String>,
    pub gmt_offset: i64,
    pub coffee: Option<String>,
    pub blend: BlendField,
    pub blend_spec: Option<Value>,
    pub location: Option<String>,
    pub batch_id: Option<Uuid>,
    pub schedule_id: Option<Uuid>,
    pub template: TemplateField,
    pub machine: Option<String>,
    pub operator: Option<String>,
    pub email: Option<String>,
    /// Placeholder coffee label and origin
    pub bean: Option<String>,
    pub origin: Option<String>,
    pub events: RoastEvents,
    pub whole_color: i64,
    pub ground_color: i64,
    pub cupping_score: i64,
    pub mode: String,
    pub temp_unit: String,
    pub telemetry: Telemetry,
}

/// Decompress (when gzip) and parse a JSON object body
pub fn decode_body(raw: &[u8], content_encoding: Option<&str>) -> Result<Document> {
    if raw.is_empty() {
        return Err(Error::InvalidInput("JSON body required".into()));
    }

    let gzip_hint = content_encoding
        .map(|e| e.trim().eq_ignore_ascii_case("gzip"))
        .unwrap_or(false);
    let bytes: Cow<'_, [u8]> = if gzip_hint || raw.starts_with(&GZIP_MAGIC) {
        let mut out = Vec::new();
        GzDecoder::new(raw)
            .read_to_end(&mut out)
            .map_err(|_| Error::InvalidInput("Invalid gzip body".into()))?;
        Cow::Owned(out)
    } else {
        Cow::Borrowed(raw)
    };

    let value: Value = serde_json::from_slice(&bytes)
        .map_err(|_| Error::InvalidInput("JSON body required".into()))?;
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(Error::InvalidInput("JSON object expected".into())),
    }
}

/// Lift a nested `telemetry` object onto the top level
pub fn flatten_telemetry(doc: &mut Document) {
    let nested = match doc.remove("telemetry") {
        Some(Value::Object(t)) => t,
        Some(other) => {
            doc.insert("telemetry".into(), other);
            return;
        }
        None => return,
    };
    for field in TELEMETRY_FIELDS {
        let value = match nested.get(field) {
            Some(v) if !v.is_null() => v.clone(),
            _ => doc.get(field).cloned().unwrap_or_else(|| json!([])),
        };
        doc.insert(field.to_string(), value);
    }
}

/// Fill every absent field from the defaults table
pub fn restore_suppressed(doc: &mut Document) {
    for (key, default) in suppression_defaults() {
        doc.entry(key).or_insert(default);
    }
}

/// Full normalisation pass over a decoded document
pub fn normalize(mut doc: Document) -> Result<NormalizedRoast> {
    flatten_telemetry(&mut doc);

    let addressed_by_roast_id = doc.contains_key("roast_id");
    let raw_id = [doc.get("roast_id"), doc.get("id")]
        .into_iter()
        .flatten()
        .find(|v| truthy(v))
        .ok_or_else(|| Error::InvalidInput("roast_id or id required".into()))?;
    let roast_id = uuid_utils::parse(&value_text(raw_id))
        .map_err(|_| Error::InvalidInput("Invalid roast_id UUID".into()))?;

    // Absent, not zero, when the client did not send it
    let amount = match doc.get("amount") {
        None | Some(Value::Null) => None,
        Some(v) => Some(
            decimal(v).ok_or_else(|| Error::InvalidInput(format!("Invalid amount: {}", v)))?,
        ),
    };

    restore_suppressed(&mut doc);

    let date = match doc.get("date").filter(|v| truthy(v)) {
        Some(v) => Some(
            parse_client_timestamp(v)
                .ok_or_else(|| Error::InvalidInput(format!("Invalid date: {}", v)))?,
        ),
        None => None,
    };
    let fallback_date = ["roasted_at", "roastdate", "modified_at"]
        .iter()
        .filter_map(|k| doc.get(*k))
        .filter(|v| truthy(v))
        .find_map(parse_client_timestamp);
    let modified_at = match doc.get("modified_at").filter(|v| truthy(v)) {
        Some(v) => Some(
            parse_client_timestamp(v)
                .ok_or_else(|| Error::InvalidInput(format!("Invalid modified_at: {}", v)))?,
        ),
        None => None,
    };

    let blend = match doc.get("blend") {
        Some(Value::Object(spec)) if spec.contains_key("label") || spec.contains_key("ingredients") => {
            BlendField::Inline(Value::Object(spec.clone()))
        }
        Some(Value::String(s)) if !s.trim().is_empty() => BlendField::Reference(s.trim().to_string()),
        _ => BlendField::Absent,
    };
    let blend_spec = match &blend {
        BlendField::Inline(spec) => Some(spec.clone()),
        _ => doc.get("blend_spec").filter(|v| v.is_object()).cloned(),
    };

    let template = match doc.get("template") {
        None => TemplateField::Absent,
        Some(Value::Object(t)) => t
            .get("id")
            .filter(|v| truthy(v))
            .and_then(|v| uuid_utils::parse(&value_text(v)).ok())
            .map(TemplateField::Candidate)
            .unwrap_or(TemplateField::Clear),
        Some(_) => TemplateField::Clear,
    };

    let schedule_id = ["schedule_id", "s_item_id"]
        .iter()
        .filter_map(|k| doc.get(*k))
        .find(|v| truthy(v))
        .and_then(|v| uuid_utils::parse(&value_text(v)).ok());
    let batch_id = match doc.get("batch_id").filter(|v| truthy(v)) {
        Some(v) => Some(
            uuid_utils::parse(&value_text(v))
                .map_err(|_| Error::InvalidInput("Invalid batch_id UUID".into()))?,
        ),
        None => None,
    };

    let events = RoastEvents {
        charge_temp: nonzero_f64(&doc, "charge_temp"),
        tp_temp: nonzero_f64(&doc, "TP_temp"),
        dry_temp: nonzero_f64(&doc, "DRY_temp"),
        fcs_temp: nonzero_f64(&doc, "FCs_temp"),
        fce_temp: nonzero_f64(&doc, "FCe_temp"),
        scs_temp: nonzero_f64(&doc, "SCs_temp"),
        sce_temp: nonzero_f64(&doc, "SCe_temp"),
        drop_temp: nonzero_f64(&doc, "drop_temp"),
        tp_time: nonzero_i64(&doc, "TP_time"),
        dry_time: nonzero_i64(&doc, "DRY_time"),
        fcs_time: nonzero_i64(&doc, "FCs_time"),
        fce_time: nonzero_i64(&doc, "FCe_time"),
        scs_time: nonzero_i64(&doc, "SCs_time"),
        sce_time: nonzero_i64(&doc, "SCe_time"),
        drop_time: nonzero_i64(&doc, "drop_time"),
        dev_time: nonzero_i64(&doc, "DEV_time"),
        dev_ratio: nonzero_f64(&doc, "DEV_ratio"),
    };

    Ok(NormalizedRoast {
        roast_id,
        addressed_by_roast_id,
        date,
        fallback_date,
        modified_at,
        amount,
        end_weight: doc.get("end_weight").filter(|v| truthy(v)).and_then(decimal),
        weight_loss: nonzero_f64(&doc, "weight_loss"),
        defects_weight: doc.get("defects_weight").and_then(number).unwrap_or(0.0),
        batch_number: int_or_zero(&doc, "batch_number"),
        label: truncate(&text(&doc, "label").unwrap_or_default(), LABEL_MAX),
        title: text(&doc, "title"),
        notes: text(&doc, "notes").map(|n| truncate(&n, NOTES_MAX)),
        gmt_offset: int_or_zero(&doc, "GMT_offset"),
        coffee: text(&doc, "coffee"),
        blend,
        blend_spec,
        location: text(&doc, "location"),
        batch_id,
        schedule_id,
        template,
        machine: text(&doc, "machine"),
        operator: text(&doc, "operator"),
        email: text(&doc, "email"),
        bean: text(&doc, "bean"),
        origin: text(&doc, "origin"),
        events,
        whole_color: int_or_zero(&doc, "whole_color"),
        ground_color: int_or_zero(&doc, "ground_color"),
        cupping_score: int_or_zero(&doc, "cupping_score"),
        mode: unit(&doc, "mode"),
        temp_unit: unit(&doc, "temp_unit"),
        telemetry: telemetry::extract(&doc),
    })
}

/// Falsy in the client's sense: null, false, 0, "" and empty containers
fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.trim().to_string(),
        other => other.to_string(),
    }
}

/// Number or numeric string
pub(crate) fn number(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|f| f.is_finite())
}

/// Exact decimal from a JSON number or numeric string
pub(crate) fn decimal(value: &Value) -> Option<Decimal> {
    let text = match value {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.trim().to_string(),
        _ => return None,
    };
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .ok()
}

fn nonzero_f64(doc: &Document, key: &str) -> Option<f64> {
    doc.get(key).and_then(number).filter(|f| *f != 0.0)
}

fn nonzero_i64(doc: &Document, key: &str) -> Option<i64> {
    nonzero_f64(doc, key).map(|f| f as i64)
}

fn int_or_zero(doc: &Document, key: &str) -> i64 {
    doc.get(key).and_then(number).map(|f| f as i64).unwrap_or(0)
}

fn text(doc: &Document, key: &str) -> Option<String> {
    match doc.get(key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Single-letter temperature unit, `C` when missing
fn unit(doc: &Document, key: &str) -> String {
    text(doc, key)
        .and_then(|s| s.chars().next())
        .map(|c| c.to_string())
        .unwrap_or_else(|| "C".to_string())
}

fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}
