//! Profile resolution for a roast
//!
//! Sources are tried in order, each only when the previous one is missing
//! or fails to decode:
//! 1. the stored profile blob
//! 2. the legacy profile file on disk
//! 3. telemetry columns with an event index
//! 4. telemetry columns without an index (curve scan)
//! 5. the roast's scalar event fields
//!
//! Decode failures are logged and never reach the caller.

use super::phases::{self, compute_from_arrays, compute_from_index, derive_phases, set_if_missing};
use super::{store, Document, ProfileError};
use crate::db::profiles;
use roastsync_common::db::Roast;
use roastsync_common::{uuid_utils, Result};
use serde_json::{json, Map, Value};
use sqlx::SqliteConnection;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

/// Where a resolved profile came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileSource {
    Blob,
    LegacyFile,
    TelemetryIndex,
    TelemetryScan,
    RoastFields,
}

impl ProfileSource {
    /// True for sources that carry a full desktop profile document
    pub fn is_file_backed(&self) -> bool {
        matches!(self, ProfileSource::Blob | ProfileSource::LegacyFile)
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedProfile {
    pub source: ProfileSource,
    pub document: Document,
}

impl ResolvedProfile {
    pub fn computed(&self) -> Option<&Map<String, Value>> {
        self.document.get("computed").and_then(Value::as_object)
    }

    /// Numeric entry of the `computed` map
    pub fn metric(&self, key: &str) -> Option<f64> {
        self.computed().and_then(|c| c.get(key)).and_then(phases::num)
    }

    /// Reference roast this profile was recorded against
    pub fn background_uuid(&self) -> Option<Uuid> {
        let text = self.document.get("backgroundUUID")?.as_str()?;
        match uuid_utils::parse(text.trim()) {
            Ok(id) => Some(id),
            Err(_) => {
                warn!("Ignoring invalid backgroundUUID '{}'", text);
                None
            }
        }
    }

    /// Document padded for the desktop client's background-profile loader
    pub fn into_background_profile(self) -> Document {
        pad_background_profile(self.document)
    }
}

async fn decode_blocking<F>(what: &str, roast_id: Uuid, decode: F) -> Option<Document>
where
    F: FnOnce() -> std::result::Result<Document, ProfileError> + Send + 'static,
{
    match tokio::task::spawn_blocking(decode).await {
        Ok(Ok(document)) => Some(document),
        Ok(Err(e)) => {
            warn!("Failed to parse {} for roast {}: {}", what, roast_id, e);
            None
        }
        Err(e) => {
            warn!("Profile decode task for roast {} failed: {}", roast_id, e);
            None
        }
    }
}

/// Resolve the most authoritative profile of `roast`
pub async fn resolve(
    conn: &mut SqliteConnection,
    profiles_dir: &Path,
    roast: &Roast,
) -> Result<ResolvedProfile> {
    if let Some(blob) = profiles::get_blob(conn, roast.id).await? {
        if !blob.is_empty() {
            let decoded =
                decode_blocking("profile blob", roast.id, move || store::decode_via_scratch(&blob))
                    .await;
            if let Some(document) = decoded {
                return Ok(from_document(document, roast, ProfileSource::Blob));
            }
        }
    }

    if let Some(path) = store::legacy_path(profiles_dir, roast.id) {
        let file: PathBuf = path.clone();
        let decoded = decode_blocking("profile file", roast.id, move || {
            store::read_profile_file(&file)
        })
        .await;
        if let Some(document) = decoded {
            return Ok(from_document(document, roast, ProfileSource::LegacyFile));
        }
        debug!("Falling back to stored telemetry for roast {} ({})", roast.id, path.display());
    }

    Ok(from_roast(roast))
}

fn with_reference_beans(mut document: Document, roast: &Roast) -> Document {
    if roast.reference.is_reference {
        if let Some(notes) = roast.reference.reference_beans_notes.as_ref() {
            document.insert("beans".to_string(), json!(notes));
        }
    }
    document
}

fn from_document(document: Document, roast: &Roast, source: ProfileSource) -> ResolvedProfile {
    let document = with_reference_beans(compute_from_index(document), roast);
    ResolvedProfile { source, document }
}

/// Tiers 3 to 5: rebuild a profile from the roast row
pub fn from_roast(roast: &Roast) -> ResolvedProfile {
    let t = &roast.telemetry;
    let has_arrays = !t.timex.is_empty() || !t.temp1.is_empty() || !t.temp2.is_empty();
    let timeindex: Vec<i64> = t.timeindex.clone().unwrap_or_default();

    let (source, mut computed) = if !has_arrays {
        (ProfileSource::RoastFields, Map::new())
    } else if timeindex.len() >= phases::MIN_TIMEINDEX_LEN {
        let mut doc = Document::new();
        doc.insert("timex".into(), Value::Array(t.timex.clone()));
        doc.insert("temp1".into(), Value::Array(t.temp1.clone()));
        doc.insert("temp2".into(), Value::Array(t.temp2.clone()));
        doc.insert("timeindex".into(), json!(timeindex));
        let computed = compute_from_index(doc)
            .remove("computed")
            .and_then(|v| match v {
                Value::Object(map) => Some(map),
                _ => None,
            })
            .unwrap_or_default();
        (ProfileSource::TelemetryIndex, computed)
    } else {
        (
            ProfileSource::TelemetryScan,
            compute_from_arrays(&t.timex, &t.temp1, &t.temp2),
        )
    };

    supplement_from_roast(&mut computed, roast);

    let title = if roast.label.is_empty() {
        roast.title.clone().unwrap_or_default()
    } else {
        roast.label.clone()
    };
    let mut document = Document::new();
    document.insert("title".into(), json!(title));
    document.insert("timex".into(), Value::Array(t.timex.clone()));
    document.insert("temp1".into(), Value::Array(t.temp1.clone()));
    document.insert("temp2".into(), Value::Array(t.temp2.clone()));
    if has_arrays {
        document.insert("timeindex".into(), json!(timeindex));
        document.insert("extra_temp1".into(), Value::Array(t.extra_temp1.clone()));
        document.insert("extra_temp2".into(), Value::Array(t.extra_temp2.clone()));
        document.insert("air".into(), Value::Array(t.air.clone()));
        document.insert("drum".into(), Value::Array(t.drum.clone()));
        document.insert("gas".into(), Value::Array(t.gas.clone()));
    }
    let mode = if roast.temp_unit.is_empty() { "C" } else { roast.temp_unit.as_str() };
    document.insert("mode".into(), json!(mode));
    document.insert("operator".into(), json!(roast.operator));
    document.insert("roastertype".into(), json!(roast.machine));
    document.insert("computed".into(), Value::Object(computed));

    ResolvedProfile {
        source,
        document: with_reference_beans(document, roast),
    }
}

/// Fill metrics the curves did not yield from the roast's own event fields
fn supplement_from_roast(computed: &mut Map<String, Value>, roast: &Roast) {
    let e = &roast.events;
    let secs = |v: Option<i64>| v.map(|s| s as f64);

    set_if_missing(computed, "CHARGE_BT", e.charge_temp);
    set_if_missing(computed, "TP_time", secs(e.tp_time));
    set_if_missing(computed, "TP_BT", e.tp_temp);
    set_if_missing(computed, "DRY_time", secs(e.dry_time));
    set_if_missing(computed, "DRY_BT", e.dry_temp);
    set_if_missing(computed, "FCs_time", secs(e.fcs_time));
    set_if_missing(computed, "FCs_BT", e.fcs_temp);
    set_if_missing(computed, "FCe_time", secs(e.fce_time));
    set_if_missing(computed, "FCe_BT", e.fce_temp);
    set_if_missing(computed, "DROP_time", secs(e.drop_time));
    set_if_missing(computed, "DROP_BT", e.drop_temp);
    set_if_missing(computed, "totaltime", secs(e.drop_time));

    if let (Some(drop), Some(fcs)) = (e.drop_time, e.fcs_time) {
        set_if_missing(computed, "finishphasetime", Some((drop - fcs) as f64));
    }
    set_if_missing(computed, "finishphasetime", secs(e.dev_time));
    set_if_missing(computed, "DEV_ratio", e.dev_ratio);

    derive_phases(computed);
}

/// Add every key the desktop background loader indexes without checking
pub fn pad_background_profile(mut document: Document) -> Document {
    let defaults = [
        ("extratimex", json!([])),
        ("extratemp1", json!([])),
        ("extratemp2", json!([])),
        ("extraname1", json!([])),
        ("extraname2", json!([])),
        ("specialevents", json!([])),
        ("specialeventstype", json!([])),
        ("specialeventsvalue", json!([])),
        ("specialeventsStrings", json!([])),
        ("flavors", json!([5.0, 5.0, 5.0, 5.0])),
        ("roastbatchnr", json!(0)),
        ("roastbatchprefix", json!("")),
        ("roastbatchpos", json!(1)),
        ("weight", json!([0.0, 0.0, "g"])),
        ("title", json!("")),
        ("mode", json!("C")),
        ("computed", json!({})),
    ];
    for (key, value) in defaults {
        document.entry(key).or_insert(value);
    }

    let mut timeindex = document
        .get("timeindex")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    if timeindex.len() < 8 {
        timeindex.resize(8, json!(-1));
    }
    document.insert("timeindex".into(), Value::Array(timeindex));
    document
}

/// Profile weight loss as a percentage
///
/// The desktop client stores either a fraction (0..1) or a percentage;
/// anything outside 0 < pct < 50 is rejected as implausible.
pub fn weight_loss_percent(raw: f64) -> Option<f64> {
    let pct = if raw <= 1.0 { raw * 100.0 } else { raw };
    (pct > 0.0 && pct < 50.0).then_some(pct)
}

/// Fill operator, development time/ratio and weight loss from the profile
/// where the roast record lacks them. Returns true when anything changed.
pub fn enrich_roast(roast: &mut Roast, profile: &ResolvedProfile) -> bool {
    let mut changed = false;

    if roast.operator.is_none() {
        let operator = profile
            .document
            .get("operator")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty());
        if let Some(op) = operator {
            roast.operator = Some(op.to_string());
            changed = true;
        }
    }

    let finish = profile.metric("finishphasetime");
    if roast.events.dev_time.is_none() {
        if let Some(fin) = finish {
            roast.events.dev_time = Some(fin as i64);
            changed = true;
        }
    }

    if roast.events.dev_ratio.is_none() {
        let total = profile
            .metric("totaltime")
            .filter(|t| *t > 0.0)
            .or_else(|| profile.metric("DROP_time").filter(|t| *t > 0.0));
        if let (Some(total), Some(fin)) = (total, finish) {
            roast.events.dev_ratio = Some(phases::round1(100.0 * fin / total));
            changed = true;
        }
    }

    if roast.weight_loss.is_none() {
        if let Some(pct) = profile.metric("weight_loss").and_then(weight_loss_percent) {
            roast.weight_loss = Some(pct);
            changed = true;
        }
    }

    changed
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db::test_support::test_pool;
    use crate::db::{profiles, roasts};
    use crate::profile::decoder::tests::zip_bytes;
    use chrono::Utc;
    use roastsync_common::db::{QualityControl, ReferenceInfo, RoastEvents, Telemetry};
    use rust_decimal::Decimal;
    use tempfile::TempDir;

    pub(crate) fn sample_roast() -> Roast {
        let now = Utc::now();
        Roast {
            id: Uuid::new_v4(),
            user_id: roastsync_common::config::anonymous_user(),
            coffee_id: None,
            blend_id: None,
            batch_id: None,
            schedule_id: None,
            reference_profile_id: None,
            batch_number: 0,
            label: "Kenya AA".into(),
            title: None,
            roasted_at: now,
            modified_at: now,
            gmt_offset: 0,
            green_weight_kg: Decimal::new(25, 1),
            roasted_weight_kg: None,
            weight_loss: None,
            defects_weight: 0.0,
            coffee_hr_id: None,
            blend_hr_id: None,
            location_hr_id: None,
            blend_spec: None,
            machine: Some("Giesen W6".into()),
            operator: None,
            email: None,
            events: RoastEvents::default(),
            whole_color: 0,
            ground_color: 0,
            cupping_score: 0,
            mode: String::new(),
            temp_unit: "C".into(),
            notes: None,
            telemetry: Telemetry::default(),
            deducted_components: Vec::new(),
            batch_deducted_kg: None,
            reference: ReferenceInfo::default(),
            qc: QualityControl::default(),
            created_at: now,
        }
    }

    #[test]
    fn test_scalar_fields_only() {
        let mut roast = sample_roast();
        roast.events.dry_time = Some(300);
        roast.events.fcs_time = Some(540);
        roast.events.drop_time = Some(660);
        roast.events.drop_temp = Some(212.5);

        let profile = from_roast(&roast);
        assert_eq!(profile.source, ProfileSource::RoastFields);
        assert_eq!(profile.metric("DROP_BT"), Some(212.5));
        assert_eq!(profile.metric("totaltime"), Some(660.0));
        assert_eq!(profile.metric("midphasetime"), Some(240.0));
        assert_eq!(profile.metric("finishphasetime"), Some(120.0));
        assert_eq!(profile.document["title"], "Kenya AA");
        assert_eq!(profile.document["roastertype"], "Giesen W6");
    }

    #[test]
    fn test_telemetry_scan_supplemented_by_fields() {
        let mut roast = sample_roast();
        roast.telemetry.timex = (0..10).map(|i| json!(i)).collect();
        roast.telemetry.temp2 = vec![
            json!(200.0), json!(150.0), json!(120.0), json!(110.0), json!(115.0),
            json!(130.0), json!(150.0), json!(170.0), json!(190.0), json!(205.0),
        ];
        roast.events.fcs_time = Some(7);

        let profile = from_roast(&roast);
        assert_eq!(profile.source, ProfileSource::TelemetryScan);
        assert_eq!(profile.metric("TP_time"), Some(3.0));
        assert_eq!(profile.metric("TP_BT"), Some(110.0));
        assert_eq!(profile.metric("DROP_time"), Some(9.0));
        assert_eq!(profile.metric("FCs_time"), Some(7.0));
        assert_eq!(profile.metric("finishphasetime"), Some(2.0));
    }

    #[test]
    fn test_telemetry_index_tier() {
        let mut roast = sample_roast();
        roast.telemetry.timex = (0..10).map(|i| json!(i * 60)).collect();
        roast.telemetry.temp2 = (0..10).map(|i| json!(100 + i * 10)).collect();
        roast.telemetry.timeindex = Some(vec![0, 4, 7, 0, 0, 0, 9, 0]);
        // not overwritten by the index
        roast.events.charge_temp = Some(99.0);

        let profile = from_roast(&roast);
        assert_eq!(profile.source, ProfileSource::TelemetryIndex);
        assert_eq!(profile.metric("DRY_time"), Some(240.0));
        assert_eq!(profile.metric("FCs_time"), Some(420.0));
        assert_eq!(profile.metric("DROP_time"), Some(540.0));
        assert_eq!(profile.metric("CHARGE_BT"), Some(100.0));
        assert_eq!(profile.metric("DEV_ratio"), Some(22.2));
    }

    #[test]
    fn test_padding_fills_every_default() {
        let doc = pad_background_profile(from_roast(&sample_roast()).document);
        assert_eq!(doc["timeindex"], json!([-1, -1, -1, -1, -1, -1, -1, -1]));
        assert_eq!(doc["flavors"], json!([5.0, 5.0, 5.0, 5.0]));
        assert_eq!(doc["weight"], json!([0.0, 0.0, "g"]));
        assert_eq!(doc["roastbatchpos"], 1);
        assert_eq!(doc["specialeventsStrings"], json!([]));
        assert_eq!(doc["mode"], "C");
        assert_eq!(doc["title"], "Kenya AA");
    }

    #[test]
    fn test_padding_extends_short_timeindex() {
        let mut doc = Document::new();
        doc.insert("timeindex".into(), json!([3, 40, 90]));
        let doc = pad_background_profile(doc);
        assert_eq!(doc["timeindex"], json!([3, 40, 90, -1, -1, -1, -1, -1]));
    }

    #[test]
    fn test_weight_loss_percent() {
        assert_eq!(weight_loss_percent(0.15), Some(15.0));
        assert_eq!(weight_loss_percent(14.2), Some(14.2));
        assert_eq!(weight_loss_percent(0.0), None);
        assert_eq!(weight_loss_percent(62.0), None);
    }

    #[test]
    fn test_enrich_only_fills_missing_fields() {
        let mut roast = sample_roast();
        roast.events.dev_time = Some(95);
        let mut document = Document::new();
        document.insert("operator".into(), json!("  Dana "));
        document.insert(
            "computed".into(),
            json!({"finishphasetime": 120.0, "totaltime": 600.0, "weight_loss": 0.142}),
        );
        let profile = ResolvedProfile {
            source: ProfileSource::Blob,
            document,
        };

        assert!(enrich_roast(&mut roast, &profile));
        assert_eq!(roast.operator.as_deref(), Some("Dana"));
        assert_eq!(roast.events.dev_time, Some(95));
        assert_eq!(roast.events.dev_ratio, Some(20.0));
        assert!((roast.weight_loss.unwrap() - 14.2).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_blob_beats_legacy_file_and_bad_blob_falls_through() {
        let (pool, _dir) = test_pool().await;
        let profiles_dir = TempDir::new().unwrap();
        let mut conn = pool.acquire().await.unwrap();

        let mut roast = sample_roast();
        roast.reference.is_reference = true;
        roast.reference.reference_beans_notes = Some("washed, floral".into());
        roasts::insert(&mut conn, &roast).await.unwrap();

        store::write_legacy(
            profiles_dir.path(),
            roast.id,
            b"{'title': 'from file', 'backgroundUUID': None}",
        )
        .unwrap();

        let blob = zip_bytes(&[(
            "profile.json",
            r#"{"title": "from blob", "backgroundUUID": "0b3f5ad2c2a54b4c8f3bb1c7d0a1e2f3"}"#,
        )]);
        profiles::put_blob(&mut conn, roast.id, &blob).await.unwrap();

        let profile = resolve(&mut conn, profiles_dir.path(), &roast).await.unwrap();
        assert_eq!(profile.source, ProfileSource::Blob);
        assert_eq!(profile.document["title"], "from blob");
        assert_eq!(profile.document["beans"], "washed, floral");
        assert_eq!(
            profile.background_uuid(),
            Some(Uuid::parse_str("0b3f5ad2-c2a5-4b4c-8f3b-b1c7d0a1e2f3").unwrap())
        );

        profiles::put_blob(&mut conn, roast.id, b"garbage").await.unwrap();
        let profile = resolve(&mut conn, profiles_dir.path(), &roast).await.unwrap();
        assert_eq!(profile.source, ProfileSource::LegacyFile);
        assert_eq!(profile.document["title"], "from file");
        assert_eq!(profile.background_uuid(), None);

        std::fs::write(store::legacy_path(profiles_dir.path(), roast.id).unwrap(), b"{{{").unwrap();
        let profile = resolve(&mut conn, profiles_dir.path(), &roast).await.unwrap();
        assert_eq!(profile.source, ProfileSource::RoastFields);
    }
}
