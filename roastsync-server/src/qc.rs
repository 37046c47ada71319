//! Quality-control goal evaluation
//!
//! Each enabled goal parameter compares the roast's value against the
//! reference roast's value within a band of `tolerance` (full width,
//! centred on the reference). Results fold into a traffic light:
//! green < yellow < red, worst wins.

use crate::db::{goals, roasts};
use crate::profile::resolver::{resolve, weight_loss_percent, ResolvedProfile};
use roastsync_common::db::{GoalSeverity, Roast, RoastGoal};
use roastsync_common::Result;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::SqliteConnection;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;
use uuid::Uuid;

/// Parameters a goal may constrain
pub const PARAMETERS: [&str; 15] = [
    "charge_temp",
    "drop_temp",
    "TP_temp",
    "DRY_temp",
    "FCs_temp",
    "total_time",
    "FCs_time",
    "DEV_time",
    "DEV_ratio",
    "DRY_time",
    "green_weight_kg",
    "roasted_weight_kg",
    "weight_loss",
    "whole_color",
    "ground_color",
];

/// Half-band used when a tolerance of zero is configured
const MIN_HALF_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Light {
    Green,
    Yellow,
    Red,
}

/// Raw outcome of one comparison, before goal policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Pass,
    Fail,
    Missing,
}

#[derive(Debug, Clone, Serialize)]
pub struct ParameterCheck {
    pub status: Light,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub range: Option<[f64; 2]>,
    #[serde(skip)]
    pub outcome: Outcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct GoalCheck {
    pub goal_id: Uuid,
    pub goal_name: String,
    pub status: Light,
    pub parameters: BTreeMap<String, ParameterCheck>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GoalsReport {
    pub status: Light,
    pub goals: Vec<GoalCheck>,
    pub reference_roast_id: Uuid,
}

/// Compare one value against `[reference - tolerance/2, reference + tolerance/2]`
pub fn check_parameter(reference: Option<f64>, actual: Option<f64>, tolerance: f64) -> ParameterCheck {
    let (reference_value, actual_value) = match (reference, actual) {
        (_, None) => {
            return ParameterCheck {
                status: Light::Yellow,
                message: "Value missing in roast".to_string(),
                reference,
                actual: None,
                range: None,
                outcome: Outcome::Missing,
            }
        }
        (None, _) => {
            return ParameterCheck {
                status: Light::Yellow,
                message: "Value missing in reference".to_string(),
                reference: None,
                actual,
                range: None,
                outcome: Outcome::Missing,
            }
        }
        (Some(r), Some(a)) => (r, a),
    };

    let mut half = tolerance / 2.0;
    if half <= 0.0 {
        half = MIN_HALF_TOLERANCE;
    }
    let (min, max) = (reference_value - half, reference_value + half);
    let inside = min <= actual_value && actual_value <= max;

    ParameterCheck {
        status: if inside { Light::Green } else { Light::Red },
        message: format!(
            "{} ({:.1} - {:.1})",
            if inside { "Within range" } else { "Out of range" },
            min,
            max
        ),
        reference: Some(reference_value),
        actual: Some(actual_value),
        range: Some([min, max]),
        outcome: if inside { Outcome::Pass } else { Outcome::Fail },
    }
}

fn severity_light(severity: GoalSeverity) -> Light {
    match severity {
        GoalSeverity::Failed => Light::Red,
        GoalSeverity::Warning => Light::Yellow,
    }
}

/// Light of one parameter under the goal's policies
fn apply_policy(goal: &RoastGoal, outcome: Outcome) -> Light {
    match outcome {
        Outcome::Pass => Light::Green,
        Outcome::Fail => severity_light(goal.failed_status),
        Outcome::Missing => severity_light(goal.missing_value_status),
    }
}

/// Named metric values of one roast
#[derive(Debug, Clone, Default)]
pub struct Metrics(BTreeMap<&'static str, Option<f64>>);

impl Metrics {
    pub fn get(&self, name: &str) -> Option<f64> {
        self.0.get(name).copied().flatten()
    }

    fn set(&mut self, name: &'static str, value: Option<f64>) {
        self.0.insert(name, value);
    }
}

fn decimal(value: Option<Decimal>) -> Option<f64> {
    value.and_then(|d| d.to_f64()).filter(|v| *v != 0.0)
}

fn colour(value: i64) -> Option<f64> {
    (value > 0).then_some(value as f64)
}

fn secs(value: Option<i64>) -> Option<f64> {
    value.map(|v| v as f64)
}

/// Values measured on the roast itself
pub fn roast_metrics(roast: &Roast) -> Metrics {
    let e = &roast.events;
    let mut m = Metrics::default();
    m.set("charge_temp", e.charge_temp);
    m.set("drop_temp", e.drop_temp);
    m.set("TP_temp", e.tp_temp);
    m.set("DRY_temp", e.dry_temp);
    m.set("FCs_temp", e.fcs_temp);
    m.set("total_time", secs(e.drop_time));
    m.set("FCs_time", secs(e.fcs_time));
    m.set("DEV_time", secs(e.dev_time));
    m.set("DEV_ratio", e.dev_ratio);
    m.set("DRY_time", secs(e.dry_time));
    m.set("green_weight_kg", decimal(Some(roast.green_weight_kg)));
    m.set("roasted_weight_kg", decimal(roast.roasted_weight_kg));
    m.set("weight_loss", roast.weight_loss);
    m.set("whole_color", colour(roast.whole_color));
    m.set("ground_color", colour(roast.ground_color));
    m
}

/// Reference values: profile-derived metrics first, the reference roast's
/// own fields second
pub fn reference_metrics(reference: &Roast, profile: &ResolvedProfile) -> Metrics {
    let own = roast_metrics(reference);
    let derived = |key: &str, name: &str| profile.metric(key).or_else(|| own.get(name));

    let mut m = Metrics::default();
    m.set("charge_temp", derived("CHARGE_BT", "charge_temp"));
    m.set("drop_temp", derived("DROP_BT", "drop_temp"));
    m.set("TP_temp", derived("TP_BT", "TP_temp"));
    m.set("DRY_temp", derived("DRY_BT", "DRY_temp"));
    m.set("FCs_temp", derived("FCs_BT", "FCs_temp"));
    m.set("total_time", derived("totaltime", "total_time"));
    m.set("FCs_time", derived("FCs_time", "FCs_time"));
    m.set("DEV_time", derived("finishphasetime", "DEV_time"));
    m.set("DEV_ratio", derived("DEV_ratio", "DEV_ratio"));
    m.set("DRY_time", derived("DRY_time", "DRY_time"));
    m.set("green_weight_kg", own.get("green_weight_kg"));
    m.set("roasted_weight_kg", own.get("roasted_weight_kg"));
    m.set(
        "weight_loss",
        own.get("weight_loss")
            .or_else(|| profile.metric("weight_loss").and_then(weight_loss_percent)),
    );
    m.set("whole_color", own.get("whole_color"));
    m.set("ground_color", own.get("ground_color"));
    m
}

/// Evaluate `goals`; `None` when no goal had an enabled parameter
pub fn evaluate(
    goals: &[RoastGoal],
    reference: &Metrics,
    actual: &Metrics,
    reference_roast_id: Uuid,
) -> Option<GoalsReport> {
    let mut results = Vec::new();

    for goal in goals.iter().filter(|g| g.is_active) {
        let mut parameters = BTreeMap::new();
        let mut status = Light::Green;

        for (name, setting) in goal.parameters.iter().filter(|(_, p)| p.enabled) {
            let check = check_parameter(reference.get(name), actual.get(name), setting.tolerance);
            status = status.max(apply_policy(goal, check.outcome));
            parameters.insert(name.clone(), check);
        }

        if parameters.is_empty() {
            continue;
        }
        results.push(GoalCheck {
            goal_id: goal.id,
            goal_name: goal.name.clone(),
            status,
            parameters,
        });
    }

    let status = results.iter().map(|g| g.status).max()?;
    Some(GoalsReport {
        status,
        goals: results,
        reference_roast_id,
    })
}

/// Check a roast against every active goal
///
/// `profile` is the roast's own resolved profile; its `backgroundUUID`
/// names the reference roast, falling back to the roast's template
/// binding. Returns `None` (not evaluated) without active goals or without
/// a reference roast.
pub async fn check_roast(
    conn: &mut SqliteConnection,
    profiles_dir: &Path,
    roast: &Roast,
    profile: &ResolvedProfile,
) -> Result<Option<GoalsReport>> {
    let active = goals::list_active(conn).await?;
    if active.is_empty() {
        return Ok(None);
    }

    let reference_id = match profile.background_uuid().or(roast.reference_profile_id) {
        Some(id) => id,
        None => {
            debug!("Roast {} has no reference profile; goals not evaluated", roast.id);
            return Ok(None);
        }
    };

    let reference = match roasts::get(conn, reference_id).await? {
        Some(r) if r.reference.is_reference => r,
        _ => {
            debug!("Reference roast {} not found for roast {}", reference_id, roast.id);
            return Ok(None);
        }
    };

    let reference_profile = resolve(conn, profiles_dir, &reference).await?;
    Ok(evaluate(
        &active,
        &reference_metrics(&reference, &reference_profile),
        &roast_metrics(roast),
        reference_id,
    ))
}

/// Validate goal parameter names
pub fn is_known_parameter(name: &str) -> bool {
    PARAMETERS.contains(&name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use roastsync_common::db::GoalParameter;

    fn goal(params: &[(&str, f64)], failed: GoalSeverity, missing: GoalSeverity) -> RoastGoal {
        RoastGoal {
            id: Uuid::new_v4(),
            name: "House espresso".into(),
            goal_type: "reference".into(),
            is_active: true,
            failed_status: failed,
            missing_value_status: missing,
            parameters: params
                .iter()
                .map(|(name, tol)| {
                    (
                        name.to_string(),
                        GoalParameter {
                            enabled: true,
                            tolerance: *tol,
                        },
                    )
                })
                .collect(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn metrics(values: &[(&'static str, f64)]) -> Metrics {
        let mut m = Metrics::default();
        for (k, v) in values {
            m.set(*k, Some(*v));
        }
        m
    }

    #[test]
    fn test_band_is_closed_interval() {
        assert_eq!(check_parameter(Some(200.0), Some(205.0), 10.0).outcome, Outcome::Pass);
        assert_eq!(check_parameter(Some(200.0), Some(195.0), 10.0).outcome, Outcome::Pass);
        assert_eq!(check_parameter(Some(200.0), Some(206.0), 10.0).outcome, Outcome::Fail);
        assert_eq!(check_parameter(Some(200.0), Some(194.0), 10.0).outcome, Outcome::Fail);
    }

    #[test]
    fn test_zero_tolerance_needs_exact_match() {
        assert_eq!(check_parameter(Some(12.0), Some(12.0), 0.0).outcome, Outcome::Pass);
        assert_eq!(check_parameter(Some(12.0), Some(12.01), 0.0).outcome, Outcome::Fail);
    }

    #[test]
    fn test_missing_values() {
        let c = check_parameter(None, Some(1.0), 5.0);
        assert_eq!(c.outcome, Outcome::Missing);
        assert_eq!(c.status, Light::Yellow);
        assert_eq!(check_parameter(Some(1.0), None, 5.0).outcome, Outcome::Missing);
    }

    #[test]
    fn test_policies_shape_goal_status() {
        let reference = metrics(&[("drop_temp", 210.0), ("DEV_time", 90.0)]);
        let actual = metrics(&[("drop_temp", 220.0)]);

        let strict = goal(&[("drop_temp", 4.0)], GoalSeverity::Failed, GoalSeverity::Warning);
        let report = evaluate(&[strict], &reference, &actual, Uuid::nil()).unwrap();
        assert_eq!(report.status, Light::Red);

        let lenient = goal(&[("drop_temp", 4.0)], GoalSeverity::Warning, GoalSeverity::Warning);
        let report = evaluate(&[lenient], &reference, &actual, Uuid::nil()).unwrap();
        assert_eq!(report.status, Light::Yellow);

        let missing_fails = goal(&[("DEV_time", 10.0)], GoalSeverity::Warning, GoalSeverity::Failed);
        let report = evaluate(&[missing_fails], &reference, &actual, Uuid::nil()).unwrap();
        assert_eq!(report.status, Light::Red);
    }

    #[test]
    fn test_worst_goal_wins() {
        let reference = metrics(&[("drop_temp", 210.0), ("charge_temp", 190.0)]);
        let actual = metrics(&[("drop_temp", 211.0), ("charge_temp", 150.0)]);
        let passing = goal(&[("drop_temp", 4.0)], GoalSeverity::Failed, GoalSeverity::Warning);
        let failing = goal(&[("charge_temp", 4.0)], GoalSeverity::Failed, GoalSeverity::Warning);

        let report = evaluate(&[passing, failing], &reference, &actual, Uuid::nil()).unwrap();
        assert_eq!(report.status, Light::Red);
        assert_eq!(report.goals[0].status, Light::Green);
        assert_eq!(report.goals[1].status, Light::Red);
    }

    #[test]
    fn test_goal_without_enabled_parameters_is_skipped() {
        let mut g = goal(&[("drop_temp", 4.0)], GoalSeverity::Failed, GoalSeverity::Warning);
        for p in g.parameters.values_mut() {
            p.enabled = false;
        }
        assert!(evaluate(&[g], &Metrics::default(), &Metrics::default(), Uuid::nil()).is_none());
    }

    #[test]
    fn test_serialized_parameter_check() {
        let value = serde_json::to_value(check_parameter(Some(10.0), Some(10.5), 2.0)).unwrap();
        assert_eq!(value["status"], "green");
        assert_eq!(value["range"], serde_json::json!([9.0, 11.0]));
        assert!(value.get("outcome").is_none());
    }
}
