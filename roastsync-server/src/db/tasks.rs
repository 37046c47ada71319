//! Production task and task history queries

use super::{
    date_text, get_bool, get_opt_date, get_opt_time, get_opt_ts, get_opt_uuid, get_ts, get_uuid,
    time_text, ts_text,
};
use chrono::{DateTime, NaiveDate, Utc};
use roastsync_common::db::{ProductionTask, TaskHistory, TaskType};
use roastsync_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use uuid::Uuid;

const TASK_COLUMNS: &str = r#"
    id, user_id, title, notification_text, task_type, schedule_day_of_week, schedule_time,
    counter_trigger_value, counter_current_value, counter_reset_on_trigger, machine_id,
    scheduled_date, scheduled_time, repeat_after_days, is_active, last_triggered_at,
    last_triggered_roast_id
"#;

const HISTORY_COLUMNS: &str = r#"
    id, task_id, user_id, title, notification_text, task_type, machine_id, machine_name,
    triggered_at, triggered_by_roast_id, trigger_reason, marked_completed_at, snoozed_until
"#;

fn task_from_row(row: &SqliteRow) -> Result<ProductionTask> {
    let task_type: String = row.try_get("task_type")?;
    Ok(ProductionTask {
        id: get_uuid(row, "id")?,
        user_id: get_uuid(row, "user_id")?,
        title: row.try_get("title")?,
        notification_text: row.try_get("notification_text")?,
        task_type: TaskType::parse(&task_type)
            .ok_or_else(|| Error::Internal(format!("Unknown task type '{}'", task_type)))?,
        schedule_day_of_week: row.try_get("schedule_day_of_week")?,
        schedule_time: get_opt_time(row, "schedule_time")?,
        counter_trigger_value: row.try_get("counter_trigger_value")?,
        counter_current_value: row.try_get("counter_current_value")?,
        counter_reset_on_trigger: get_bool(row, "counter_reset_on_trigger")?,
        machine_id: get_opt_uuid(row, "machine_id")?,
        scheduled_date: get_opt_date(row, "scheduled_date")?,
        scheduled_time: get_opt_time(row, "scheduled_time")?,
        repeat_after_days: row.try_get("repeat_after_days")?,
        is_active: get_bool(row, "is_active")?,
        last_triggered_at: get_opt_ts(row, "last_triggered_at")?,
        last_triggered_roast_id: get_opt_uuid(row, "last_triggered_roast_id")?,
    })
}

fn history_from_row(row: &SqliteRow) -> Result<TaskHistory> {
    Ok(TaskHistory {
        id: get_uuid(row, "id")?,
        task_id: get_uuid(row, "task_id")?,
        user_id: get_uuid(row, "user_id")?,
        title: row.try_get("title")?,
        notification_text: row.try_get("notification_text")?,
        task_type: row.try_get("task_type")?,
        machine_id: get_opt_uuid(row, "machine_id")?,
        machine_name: row.try_get("machine_name")?,
        triggered_at: get_ts(row, "triggered_at")?,
        triggered_by_roast_id: get_opt_uuid(row, "triggered_by_roast_id")?,
        trigger_reason: row.try_get("trigger_reason")?,
        marked_completed_at: get_opt_ts(row, "marked_completed_at")?,
        snoozed_until: get_opt_ts(row, "snoozed_until")?,
    })
}

pub async fn insert_task(conn: &mut SqliteConnection, task: &ProductionTask) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO production_tasks (
            id, user_id, title, notification_text, task_type, schedule_day_of_week, schedule_time,
            counter_trigger_value, counter_current_value, counter_reset_on_trigger, machine_id,
            scheduled_date, scheduled_time, repeat_after_days, is_active, last_triggered_at,
            last_triggered_roast_id
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(task.id.to_string())
    .bind(task.user_id.to_string())
    .bind(&task.title)
    .bind(&task.notification_text)
    .bind(task.task_type.as_str())
    .bind(task.schedule_day_of_week)
    .bind(task.schedule_time.as_ref().map(time_text))
    .bind(task.counter_trigger_value)
    .bind(task.counter_current_value)
    .bind(task.counter_reset_on_trigger)
    .bind(task.machine_id.map(|id| id.to_string()))
    .bind(task.scheduled_date.as_ref().map(date_text))
    .bind(task.scheduled_time.as_ref().map(time_text))
    .bind(task.repeat_after_days)
    .bind(task.is_active)
    .bind(task.last_triggered_at.as_ref().map(ts_text))
    .bind(task.last_triggered_roast_id.map(|id| id.to_string()))
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub async fn get_task(conn: &mut SqliteConnection, id: Uuid) -> Result<Option<ProductionTask>> {
    let row = sqlx::query(&format!("SELECT {} FROM production_tasks WHERE id = ?", TASK_COLUMNS))
        .bind(id.to_string())
        .fetch_optional(&mut *conn)
        .await?;
    row.as_ref().map(task_from_row).transpose()
}

/// Active tasks of one kind
pub async fn list_active(conn: &mut SqliteConnection, task_type: TaskType) -> Result<Vec<ProductionTask>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM production_tasks WHERE task_type = ? AND is_active = 1 ORDER BY created_at",
        TASK_COLUMNS
    ))
    .bind(task_type.as_str())
    .fetch_all(&mut *conn)
    .await?;
    rows.iter().map(task_from_row).collect()
}

/// Persist counter, trigger bookkeeping, next date and active flag
pub async fn save_task_state(conn: &mut SqliteConnection, task: &ProductionTask) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE production_tasks
        SET counter_current_value = ?, scheduled_date = ?, is_active = ?,
            last_triggered_at = ?, last_triggered_roast_id = ?
        WHERE id = ?
        "#,
    )
    .bind(task.counter_current_value)
    .bind(task.scheduled_date.as_ref().map(date_text))
    .bind(task.is_active)
    .bind(task.last_triggered_at.as_ref().map(ts_text))
    .bind(task.last_triggered_roast_id.map(|id| id.to_string()))
    .bind(task.id.to_string())
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub async fn insert_history(conn: &mut SqliteConnection, item: &TaskHistory) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO production_task_history (
            id, task_id, user_id, title, notification_text, task_type, machine_id, machine_name,
            triggered_at, triggered_by_roast_id, trigger_reason, marked_completed_at, snoozed_until
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(item.id.to_string())
    .bind(item.task_id.to_string())
    .bind(item.user_id.to_string())
    .bind(&item.title)
    .bind(&item.notification_text)
    .bind(&item.task_type)
    .bind(item.machine_id.map(|id| id.to_string()))
    .bind(&item.machine_name)
    .bind(ts_text(&item.triggered_at))
    .bind(item.triggered_by_roast_id.map(|id| id.to_string()))
    .bind(&item.trigger_reason)
    .bind(item.marked_completed_at.as_ref().map(ts_text))
    .bind(item.snoozed_until.as_ref().map(ts_text))
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub async fn get_history(conn: &mut SqliteConnection, id: Uuid) -> Result<Option<TaskHistory>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM production_task_history WHERE id = ?",
        HISTORY_COLUMNS
    ))
    .bind(id.to_string())
    .fetch_optional(&mut *conn)
    .await?;
    row.as_ref().map(history_from_row).transpose()
}

/// Uncompleted items triggered since `since` and not snoozed past `now`
pub async fn list_pending_reminders(
    conn: &mut SqliteConnection,
    since: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<Vec<TaskHistory>> {
    let rows = sqlx::query(&format!(
        r#"
        SELECT {} FROM production_task_history
        WHERE marked_completed_at IS NULL
          AND triggered_at >= ?
          AND (snoozed_until IS NULL OR snoozed_until <= ?)
        ORDER BY triggered_at
        "#,
        HISTORY_COLUMNS
    ))
    .bind(ts_text(&since))
    .bind(ts_text(&now))
    .fetch_all(&mut *conn)
    .await?;
    rows.iter().map(history_from_row).collect()
}

pub async fn mark_completed(
    conn: &mut SqliteConnection,
    id: Uuid,
    user_id: Uuid,
    at: DateTime<Utc>,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE production_task_history
        SET marked_completed_at = ?, marked_completed_by_user_id = ?
        WHERE id = ? AND user_id = ?
        "#,
    )
    .bind(ts_text(&at))
    .bind(user_id.to_string())
    .bind(id.to_string())
    .bind(user_id.to_string())
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn snooze(
    conn: &mut SqliteConnection,
    id: Uuid,
    user_id: Uuid,
    until: DateTime<Utc>,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE production_task_history
        SET snoozed_until = ?, snoozed_by_user_id = ?
        WHERE id = ? AND user_id = ?
        "#,
    )
    .bind(ts_text(&until))
    .bind(user_id.to_string())
    .bind(id.to_string())
    .bind(user_id.to_string())
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// One-time tasks whose date has arrived
pub async fn list_due_one_time(
    conn: &mut SqliteConnection,
    today: NaiveDate,
) -> Result<Vec<ProductionTask>> {
    let rows = sqlx::query(&format!(
        r#"
        SELECT {} FROM production_tasks
        WHERE task_type = 'one_time' AND is_active = 1
          AND scheduled_date IS NOT NULL AND scheduled_date <= ?
        ORDER BY created_at
        "#,
        TASK_COLUMNS
    ))
    .bind(date_text(&today))
    .fetch_all(&mut *conn)
    .await?;
    rows.iter().map(task_from_row).collect()
}
