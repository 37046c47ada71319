//! Curve channels between the wire shape and the stored columns

use crate::profile::Document;
use roastsync_common::db::Telemetry;
use serde_json::{json, Value};
use tracing::debug;

fn channel(doc: &Document, key: &str) -> Vec<Value> {
    match doc.get(key) {
        Some(Value::Array(values)) => values.clone(),
        Some(Value::Null) | None => Vec::new(),
        Some(other) => {
            debug!("Ignoring non-array telemetry channel {}: {}", key, other);
            Vec::new()
        }
    }
}

/// Marks an event slot that was not recorded
const UNSET: i64 = -1;

/// Event positions; an empty index is absent and an unusable slot is unset
fn timeindex(doc: &Document) -> Option<Vec<i64>> {
    let values = doc.get("timeindex")?.as_array()?;
    let index: Vec<i64> = values
        .iter()
        .map(|v| {
            v.as_i64()
                .or_else(|| v.as_f64().filter(|f| f.is_finite()).map(|f| f as i64))
                .unwrap_or(UNSET)
        })
        .collect();
    Some(index).filter(|i| !i.is_empty())
}

/// Read the ten channels and the event index from a flattened payload
pub fn extract(doc: &Document) -> Telemetry {
    Telemetry {
        timex: channel(doc, "timex"),
        temp1: channel(doc, "temp1"),
        temp2: channel(doc, "temp2"),
        extra_temp1: channel(doc, "extra_temp1"),
        extra_temp2: channel(doc, "extra_temp2"),
        air: channel(doc, "air"),
        drum: channel(doc, "drum"),
        gas: channel(doc, "gas"),
        fan: channel(doc, "fan"),
        heater: channel(doc, "heater"),
        timeindex: timeindex(doc),
    }
}

/// Nested wire shape; every channel is an array, never null
pub fn reassemble(t: &Telemetry) -> Value {
    json!({
        "timex": t.timex,
        "temp1": t.temp1,
        "temp2": t.temp2,
        "extra_temp1": t.extra_temp1,
        "extra_temp2": t.extra_temp2,
        "air": t.air,
        "drum": t.drum,
        "gas": t.gas,
        "fan": t.fan,
        "heater": t.heater,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_keeps_values_verbatim() {
        let doc = json!({
            "timex": [0.0, 1.5, 3.0],
            "temp2": [200, null, "198.5"],
            "gas": 5,
            "timeindex": [0, 120.0, -1]
        });
        let t = extract(doc.as_object().unwrap());
        assert_eq!(t.timex, vec![json!(0.0), json!(1.5), json!(3.0)]);
        assert_eq!(t.temp2[1], Value::Null);
        assert_eq!(t.temp2[2], json!("198.5"));
        assert!(t.gas.is_empty());
        assert_eq!(t.timeindex, Some(vec![0, 120, -1]));
    }

    #[test]
    fn test_reassemble_never_emits_null() {
        let shaped = reassemble(&Telemetry::default());
        for (key, value) in shaped.as_object().unwrap() {
            assert_eq!(value, &json!([]), "channel {}", key);
        }
        assert_eq!(shaped.as_object().unwrap().len(), 10);
    }

    #[test]
    fn test_empty_index_is_absent() {
        let empty = json!({"timeindex": []});
        assert_eq!(extract(empty.as_object().unwrap()).timeindex, None);
        let scalar = json!({"timeindex": 3});
        assert_eq!(extract(scalar.as_object().unwrap()).timeindex, None);
    }

    #[test]
    fn test_unusable_index_slots_become_unset() {
        let bad = json!({"timeindex": [0, "x", null, 412, {}, 600.0, -1, 0]});
        assert_eq!(
            extract(bad.as_object().unwrap()).timeindex,
            Some(vec![0, -1, -1, 412, -1, 600, -1, 0])
        );
    }
}
