//! Roast phase metrics
//!
//! Two derivations fill a profile's `computed` map:
//! - [`compute_from_index`] uses the event-index array (`timeindex`) to read
//!   event times and temperatures at exact sample positions.
//! - [`compute_from_arrays`] scans bare curves; only CHARGE, DROP and the
//!   turning point can be inferred that way.
//!
//! `temp1` is the environment (ET) channel, `temp2` the bean (BT) channel.
//! Existing keys are never overwritten.

use super::Document;
use serde_json::{json, Map, Value};

/// Minimum `timeindex` length for index-driven computation
pub const MIN_TIMEINDEX_LEN: usize = 7;

/// Turning-point search window in samples after CHARGE
pub const TP_SEARCH_SAMPLES: usize = 120;

/// `timeindex` slots
pub const CHARGE: usize = 0;
pub const DRY: usize = 1;
pub const FCS: usize = 2;
pub const FCE: usize = 3;
pub const SCS: usize = 4;
pub const SCE: usize = 5;
pub const DROP: usize = 6;

/// Numeric value of a JSON scalar (null and non-numbers are absent)
pub fn num(value: &Value) -> Option<f64> {
    value.as_f64()
}

fn array<'a>(doc: &'a Document, key: &str) -> &'a [Value] {
    doc.get(key)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

/// Insert `value` under `key` unless the key is already present
pub fn set_if_missing(computed: &mut Map<String, Value>, key: &str, value: Option<f64>) {
    if let Some(v) = value {
        if !computed.contains_key(key) {
            computed.insert(key.to_string(), json!(v));
        }
    }
}

fn get_f64(computed: &Map<String, Value>, key: &str) -> Option<f64> {
    computed.get(key).and_then(num)
}

/// Round to one decimal place
pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Index of the lowest bean temperature in `from + 1 .. to`, if lower than at `from`
fn turning_point(bt: &[Value], from: usize, to: usize) -> Option<usize> {
    let mut min_idx = from;
    for i in (from + 1)..to.min(bt.len()) {
        if let Some(t) = bt.get(i).and_then(num) {
            match bt.get(min_idx).and_then(num) {
                Some(current) if t >= current => {}
                _ => min_idx = i,
            }
        }
    }
    (min_idx > from && bt.get(min_idx).and_then(num).is_some()).then_some(min_idx)
}

/// Fill the phase durations and development ratio from event times
pub fn derive_phases(computed: &mut Map<String, Value>) {
    let dry = get_f64(computed, "DRY_time");
    let fcs = get_f64(computed, "FCs_time");
    let drop = get_f64(computed, "DROP_time").or_else(|| get_f64(computed, "totaltime"));

    set_if_missing(computed, "dryphasetime", dry);
    if let (Some(dry), Some(fcs)) = (dry, fcs) {
        set_if_missing(computed, "midphasetime", Some(fcs - dry));
    }
    if let (Some(drop), Some(fcs)) = (drop, fcs) {
        set_if_missing(computed, "finishphasetime", Some(drop - fcs));
    }

    let total = get_f64(computed, "totaltime").or_else(|| get_f64(computed, "DROP_time"));
    if let (Some(total), Some(finish)) = (total, get_f64(computed, "finishphasetime")) {
        if total > 0.0 {
            set_if_missing(computed, "DEV_ratio", Some(round1(100.0 * finish / total)));
        }
    }
}

/// Supplement `doc["computed"]` from its event-index array
///
/// Returns the document unchanged when the index is shorter than
/// [`MIN_TIMEINDEX_LEN`], the time axis is empty, or the bean channel is
/// shorter than the time axis. A slot holding a negative or out-of-range
/// position means the event was not recorded; so does position 0 in any
/// slot after CHARGE.
pub fn compute_from_index(mut doc: Document) -> Document {
    let timeindex: Vec<Option<f64>> = match doc.get("timeindex").and_then(Value::as_array) {
        Some(idx) if idx.len() >= MIN_TIMEINDEX_LEN => idx.iter().map(num).collect(),
        _ => return doc,
    };
    let timex = array(&doc, "timex");
    let et = array(&doc, "temp1");
    let bt = array(&doc, "temp2");
    let n = timex.len();
    if n == 0 || bt.len() < n {
        return doc;
    }

    let slot_index = |slot: usize| -> Option<usize> {
        let raw = timeindex.get(slot).copied().flatten()?;
        if raw < 0.0 || raw >= n as f64 || (slot != CHARGE && raw == 0.0) {
            return None;
        }
        Some(raw as usize)
    };

    let charge_idx = slot_index(CHARGE).unwrap_or(0);
    let charge_time = timex.get(charge_idx).and_then(num).unwrap_or(0.0);

    let time_at = |slot: usize| slot_index(slot).and_then(|i| timex.get(i)).and_then(num);
    let temp_at = |channel: &[Value], slot: usize| {
        slot_index(slot).and_then(|i| channel.get(i)).and_then(num)
    };

    let mut computed = doc
        .get("computed")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();

    set_if_missing(&mut computed, "CHARGE_BT", temp_at(bt, CHARGE));
    set_if_missing(&mut computed, "CHARGE_ET", temp_at(et, CHARGE));

    if !computed.contains_key("TP_time") || !computed.contains_key("TP_BT") {
        let end = (charge_idx + TP_SEARCH_SAMPLES).min(n);
        if let Some(tp) = turning_point(bt, charge_idx, end) {
            set_if_missing(&mut computed, "TP_time", timex.get(tp).and_then(num).map(|t| t - charge_time));
            set_if_missing(&mut computed, "TP_BT", bt.get(tp).and_then(num));
            set_if_missing(&mut computed, "TP_ET", et.get(tp).and_then(num));
        }
    }

    for (slot, event, with_et) in [
        (DRY, "DRY", true),
        (FCS, "FCs", true),
        (FCE, "FCe", true),
        (SCS, "SCs", false),
        (SCE, "SCe", false),
    ] {
        set_if_missing(
            &mut computed,
            &format!("{}_time", event),
            time_at(slot).map(|t| t - charge_time),
        );
        set_if_missing(&mut computed, &format!("{}_BT", event), temp_at(bt, slot));
        if with_et {
            set_if_missing(&mut computed, &format!("{}_ET", event), temp_at(et, slot));
        }
    }

    let drop_time = time_at(DROP).map(|t| t - charge_time);
    set_if_missing(&mut computed, "DROP_time", drop_time);
    set_if_missing(&mut computed, "totaltime", drop_time);
    set_if_missing(&mut computed, "DROP_BT", temp_at(bt, DROP));
    set_if_missing(&mut computed, "DROP_ET", temp_at(et, DROP));

    derive_phases(&mut computed);

    doc.insert("computed".to_string(), Value::Object(computed));
    doc
}

/// Metrics inferable from bare curves: CHARGE at the first sample, DROP at
/// the last, turning point as the lowest bean temperature in the first
/// [`TP_SEARCH_SAMPLES`] samples
pub fn compute_from_arrays(timex: &[Value], et: &[Value], bt: &[Value]) -> Map<String, Value> {
    let mut computed = Map::new();
    if timex.len() < 2 || bt.len() < 2 {
        return computed;
    }

    let n = timex.len().min(bt.len());
    let charge_time = timex.first().and_then(num).unwrap_or(0.0);
    let last_time = timex.get(n - 1).and_then(num);

    set_if_missing(&mut computed, "CHARGE_BT", bt.first().and_then(num));
    set_if_missing(&mut computed, "DROP_BT", bt.get(n - 1).and_then(num));
    if let Some(last) = last_time {
        if last >= charge_time {
            set_if_missing(&mut computed, "DROP_time", Some(last - charge_time));
            set_if_missing(&mut computed, "totaltime", Some(last - charge_time));
        }
    }
    set_if_missing(&mut computed, "CHARGE_ET", et.first().and_then(num));
    if n <= et.len() {
        set_if_missing(&mut computed, "DROP_ET", et.get(n - 1).and_then(num));
    }

    let end = TP_SEARCH_SAMPLES.min(n - 1);
    if end > 1 {
        if let Some(tp) = turning_point(bt, 0, end) {
            set_if_missing(&mut computed, "TP_time", timex.get(tp).and_then(num).map(|t| t - charge_time));
            set_if_missing(&mut computed, "TP_BT", bt.get(tp).and_then(num));
            set_if_missing(&mut computed, "TP_ET", et.get(tp).and_then(num));
        }
    }

    computed
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 600 samples at 1 Hz; BT falls to 80.0 at sample 45 then climbs
    fn synthetic_curve() -> (Vec<Value>, Vec<Value>, Vec<Value>) {
        let timex: Vec<Value> = (0..600).map(|i| json!(i as f64)).collect();
        let bt: Vec<Value> = (0..600)
            .map(|i| {
                let i = i as f64;
                let t = if i <= 45.0 { 200.0 - i * 8.0 / 3.0 } else { 80.0 + (i - 45.0) * 0.25 };
                json!(t)
            })
            .collect();
        let et: Vec<Value> = (0..600).map(|i| json!(220.0 + i as f64 * 0.01)).collect();
        (timex, et, bt)
    }

    fn doc_with(timeindex: Value) -> Document {
        let (timex, et, bt) = synthetic_curve();
        let mut doc = Document::new();
        doc.insert("timex".into(), Value::Array(timex));
        doc.insert("temp1".into(), Value::Array(et));
        doc.insert("temp2".into(), Value::Array(bt));
        doc.insert("timeindex".into(), timeindex);
        doc
    }

    #[test]
    fn test_index_driven_matches_hand_calculation() {
        // CHARGE 5, DRY 245, FCs 485, FCe 535, SC not recorded, DROP 595
        let doc = compute_from_index(doc_with(json!([5, 245, 485, 535, 0, 0, 595, 0])));
        let c = doc["computed"].as_object().unwrap();

        assert_eq!(c["DRY_time"], json!(240.0));
        assert_eq!(c["FCs_time"], json!(480.0));
        assert_eq!(c["FCe_time"], json!(530.0));
        assert_eq!(c["DROP_time"], json!(590.0));
        assert_eq!(c["totaltime"], json!(590.0));
        assert_eq!(c["DRY_BT"], json!(80.0 + 200.0 * 0.25));
        assert_eq!(c["FCs_BT"], json!(80.0 + 440.0 * 0.25));
        assert_eq!(c["DROP_BT"], json!(80.0 + 550.0 * 0.25));
        assert_eq!(c["TP_time"], json!(40.0));
        assert_eq!(c["TP_BT"], json!(80.0));
        assert_eq!(c["dryphasetime"], json!(240.0));
        assert_eq!(c["midphasetime"], json!(240.0));
        assert_eq!(c["finishphasetime"], json!(110.0));
        assert_eq!(c["DEV_ratio"], json!(18.6));
        assert!(!c.contains_key("SCs_time"));
        assert!(!c.contains_key("SCe_BT"));
    }

    #[test]
    fn test_existing_computed_values_win() {
        let mut doc = doc_with(json!([0, 240, 480, 530, -1, -1, 590, 0]));
        doc.insert("computed".into(), json!({"FCs_time": 470.0, "TP_BT": 81.5}));
        let doc = compute_from_index(doc);
        let c = doc["computed"].as_object().unwrap();
        assert_eq!(c["FCs_time"], json!(470.0));
        assert_eq!(c["TP_BT"], json!(81.5));
        assert_eq!(c["finishphasetime"], json!(120.0));
    }

    #[test]
    fn test_short_index_leaves_document_untouched() {
        let doc = compute_from_index(doc_with(json!([0, 240, 480])));
        assert!(!doc.contains_key("computed"));
    }

    #[test]
    fn test_bean_channel_shorter_than_time_axis() {
        let mut doc = doc_with(json!([0, 240, 480, 530, 0, 0, 590, 0]));
        doc.insert("temp2".into(), json!([1.0, 2.0]));
        assert!(!compute_from_index(doc).contains_key("computed"));
    }

    #[test]
    fn test_out_of_range_charge_defaults_to_first_sample() {
        let doc = compute_from_index(doc_with(json!([9999, 240, 480, 530, 0, 0, 590, 0])));
        let c = doc["computed"].as_object().unwrap();
        assert_eq!(c["DRY_time"], json!(240.0));
        assert!(!c.contains_key("CHARGE_BT"));
    }

    #[test]
    fn test_scan_finds_turning_point_in_window() {
        let (timex, et, bt) = synthetic_curve();
        let c = compute_from_arrays(&timex, &et, &bt);
        assert_eq!(c["TP_time"], json!(45.0));
        assert_eq!(c["TP_BT"], json!(80.0));
        assert!(c["TP_time"].as_f64().unwrap() < TP_SEARCH_SAMPLES as f64);
        assert_eq!(c["CHARGE_BT"], json!(200.0));
        assert_eq!(c["DROP_time"], json!(599.0));
        assert_eq!(c["DROP_BT"], json!(80.0 + 554.0 * 0.25));
        assert!(!c.contains_key("DRY_time"));
    }

    #[test]
    fn test_scan_needs_two_samples() {
        assert!(compute_from_arrays(&[json!(0)], &[], &[json!(150.0)]).is_empty());
    }

    #[test]
    fn test_derive_phases_ratio() {
        let mut c = Map::new();
        set_if_missing(&mut c, "DRY_time", Some(300.0));
        set_if_missing(&mut c, "FCs_time", Some(540.0));
        set_if_missing(&mut c, "DROP_time", Some(660.0));
        derive_phases(&mut c);
        assert_eq!(c["midphasetime"], json!(240.0));
        assert_eq!(c["finishphasetime"], json!(120.0));
        assert_eq!(c["DEV_ratio"], json!(18.2));
    }
}
