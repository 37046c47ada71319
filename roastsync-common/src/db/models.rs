//! Database models

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Coffee {
    pub id: Uuid,
    /// Human-readable identifier used by the desktop client (e.g. "C1001")
    pub hr_id: String,
    pub label: String,
    pub origin: Option<String>,
    pub region: Option<String>,
    pub variety: Option<String>,
    pub processing: Option<String>,
    pub stock_weight_kg: Decimal,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Active,
    Depleted,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Active => "active",
            BatchStatus::Depleted => "depleted",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "depleted" => BatchStatus::Depleted,
            _ => BatchStatus::Active,
        }
    }
}

/// Production lot of a green coffee
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    pub id: Uuid,
    pub coffee_id: Option<Uuid>,
    pub lot_number: String,
    pub initial_weight_kg: Decimal,
    pub current_weight_kg: Decimal,
    pub roasted_total_weight_kg: Decimal,
    pub status: BatchStatus,
}

/// One recipe line of a blend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlendComponent {
    pub coffee_id: Uuid,
    pub percentage: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Blend {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub recipe: Vec<BlendComponent>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserMachine {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub scheduled_date: NaiveDate,
    pub status: String,
    pub completed_at: Option<DateTime<Utc>>,
}

/// One entry of a roast's ledger snapshot
///
/// The quantity serializes as a decimal string so the stored snapshot
/// round-trips without float drift.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeductedComponent {
    pub coffee_id: Uuid,
    pub deducted_weight_kg: Decimal,
}

/// Per-second curves recorded by the roaster
///
/// Values are kept verbatim as JSON arrays; an absent channel is empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Telemetry {
    pub timex: Vec<Value>,
    /// Environment temperature (primary channel)
    pub temp1: Vec<Value>,
    /// Bean temperature (secondary channel)
    pub temp2: Vec<Value>,
    pub extra_temp1: Vec<Value>,
    pub extra_temp2: Vec<Value>,
    pub air: Vec<Value>,
    pub drum: Vec<Value>,
    pub gas: Vec<Value>,
    pub fan: Vec<Value>,
    pub heater: Vec<Value>,
    /// Event positions [CHARGE, DRY, FCs, FCe, SCs, SCe, DROP, COOL]
    pub timeindex: Option<Vec<i64>>,
}

/// Roast event temperatures and times (seconds from CHARGE)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoastEvents {
    pub charge_temp: Option<f64>,
    pub tp_temp: Option<f64>,
    pub dry_temp: Option<f64>,
    pub fcs_temp: Option<f64>,
    pub fce_temp: Option<f64>,
    pub scs_temp: Option<f64>,
    pub sce_temp: Option<f64>,
    pub drop_temp: Option<f64>,
    pub tp_time: Option<i64>,
    pub dry_time: Option<i64>,
    pub fcs_time: Option<i64>,
    pub fce_time: Option<i64>,
    pub scs_time: Option<i64>,
    pub sce_time: Option<i64>,
    pub drop_time: Option<i64>,
    pub dev_time: Option<i64>,
    pub dev_ratio: Option<f64>,
}

/// Reference-profile flags
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReferenceInfo {
    pub is_reference: bool,
    pub reference_name: Option<String>,
    pub reference_for_coffee_id: Option<Uuid>,
    pub reference_for_blend_id: Option<Uuid>,
    pub reference_machine: Option<String>,
    /// Shown as the bean description when this roast is a background curve
    pub reference_beans_notes: Option<String>,
}

/// Post-roast quality-control fields
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityControl {
    pub in_quality_control: bool,
    pub cupping_date: Option<NaiveDate>,
    pub cupping_verdict: Option<String>,
    pub espresso_date: Option<NaiveDate>,
    pub espresso_notes: Option<String>,
    pub espresso_verdict: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Roast {
    /// Client-supplied identifier; never generated server-side
    pub id: Uuid,
    pub user_id: Uuid,
    pub coffee_id: Option<Uuid>,
    pub blend_id: Option<Uuid>,
    pub batch_id: Option<Uuid>,
    pub schedule_id: Option<Uuid>,
    pub reference_profile_id: Option<Uuid>,

    pub batch_number: i64,
    pub label: String,
    pub title: Option<String>,
    pub roasted_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    pub gmt_offset: i64,

    pub green_weight_kg: Decimal,
    pub roasted_weight_kg: Option<Decimal>,
    pub weight_loss: Option<f64>,
    pub defects_weight: f64,

    pub coffee_hr_id: Option<String>,
    pub blend_hr_id: Option<String>,
    pub location_hr_id: Option<String>,
    /// Inline ad-hoc blend definition, stored as sent
    pub blend_spec: Option<Value>,

    pub machine: Option<String>,
    pub operator: Option<String>,
    pub email: Option<String>,

    pub events: RoastEvents,

    pub whole_color: i64,
    pub ground_color: i64,
    pub cupping_score: i64,
    pub mode: String,
    pub temp_unit: String,
    pub notes: Option<String>,

    pub telemetry: Telemetry,

    pub deducted_components: Vec<DeductedComponent>,
    /// Quantity taken from the linked batch, if any
    pub batch_deducted_kg: Option<Decimal>,

    pub reference: ReferenceInfo,
    pub qc: QualityControl,

    pub created_at: DateTime<Utc>,
}

/// Cached upsert response replayed for a repeated idempotency key
#[derive(Debug, Clone)]
pub struct IdempotencyEntry {
    pub key: String,
    pub endpoint: String,
    pub status_code: u16,
    pub response: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GoalSeverity {
    Failed,
    Warning,
}

impl GoalSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            GoalSeverity::Failed => "failed",
            GoalSeverity::Warning => "warning",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "failed" => Some(GoalSeverity::Failed),
            "warning" => Some(GoalSeverity::Warning),
            _ => None,
        }
    }
}

/// Tolerance setting of one goal parameter
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GoalParameter {
    #[serde(default)]
    pub enabled: bool,
    /// Full band width around the reference value
    #[serde(default)]
    pub tolerance: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoastGoal {
    pub id: Uuid,
    pub name: String,
    pub goal_type: String,
    pub is_active: bool,
    pub failed_status: GoalSeverity,
    pub missing_value_status: GoalSeverity,
    pub parameters: std::collections::BTreeMap<String, GoalParameter>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Schedule,
    Counter,
    OneTime,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Schedule => "schedule",
            TaskType::Counter => "counter",
            TaskType::OneTime => "one_time",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "schedule" => Some(TaskType::Schedule),
            "counter" => Some(TaskType::Counter),
            "one_time" => Some(TaskType::OneTime),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductionTask {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub notification_text: String,
    pub task_type: TaskType,
    /// 0 = Monday
    pub schedule_day_of_week: Option<i64>,
    pub schedule_time: Option<NaiveTime>,
    pub counter_trigger_value: Option<i64>,
    pub counter_current_value: i64,
    pub counter_reset_on_trigger: bool,
    pub machine_id: Option<Uuid>,
    pub scheduled_date: Option<NaiveDate>,
    pub scheduled_time: Option<NaiveTime>,
    pub repeat_after_days: Option<i64>,
    pub is_active: bool,
    pub last_triggered_at: Option<DateTime<Utc>>,
    pub last_triggered_roast_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskHistory {
    pub id: Uuid,
    pub task_id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub notification_text: String,
    pub task_type: String,
    pub machine_id: Option<Uuid>,
    pub machine_name: Option<String>,
    pub triggered_at: DateTime<Utc>,
    pub triggered_by_roast_id: Option<Uuid>,
    pub trigger_reason: Option<String>,
    pub marked_completed_at: Option<DateTime<Utc>>,
    pub snoozed_until: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_deducted_component_keeps_exact_decimal() {
        let entry = DeductedComponent {
            coffee_id: Uuid::nil(),
            deducted_weight_kg: Decimal::from_str("2.500").unwrap(),
        };
        let text = serde_json::to_string(&vec![entry]).unwrap();
        assert!(text.contains("\"2.500\""));
        let back: Vec<DeductedComponent> = serde_json::from_str(&text).unwrap();
        assert_eq!(back[0], entry);
    }

    #[test]
    fn test_goal_parameter_defaults() {
        let p: GoalParameter = serde_json::from_str("{}").unwrap();
        assert!(!p.enabled);
        assert_eq!(p.tolerance, 0.0);
    }

    #[test]
    fn test_task_type_names() {
        assert_eq!(TaskType::parse("one_time"), Some(TaskType::OneTime));
        assert_eq!(TaskType::OneTime.as_str(), "one_time");
        assert_eq!(TaskType::parse("weekly"), None);
    }
}
