//! Production task scheduler
//!
//! Three periodic jobs drive production tasks:
//! - schedule check, every minute at :00 (weekday + time-of-day tasks)
//! - one-time check, every minute at :00 (dated tasks, optional repeat)
//! - reminders, every five minutes at :30 (re-push uncompleted history)
//!
//! Counter tasks are not polled; [`count_roast`] advances them inside the
//! roast's write transaction.
//!
//! All "today" decisions use the configured wall-clock offset. A task
//! whose `last_triggered_at` falls at or after local midnight does not fire
//! again the same day, so a job that runs twice in one window is harmless.

use crate::db::{machines, tasks};
use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, TimeZone, Timelike, Utc};
use roastsync_common::db::{ProductionTask, Roast, TaskHistory, TaskType};
use roastsync_common::events::{Notification, NotificationHub};
use roastsync_common::time::Clock;
use roastsync_common::{uuid_utils, Result};
use serde_json::json;
use sqlx::{SqliteConnection, SqlitePool};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub const TASK_EVENT: &str = "production_task";
pub const REMINDER_EVENT: &str = "production_task_reminder";

/// Window in which uncompleted history items are re-announced
pub const REMINDER_WINDOW_HOURS: i64 = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Job {
    ScheduleCheck,
    OneTimeCheck,
    Reminders,
}

impl Job {
    pub const ALL: [Job; 3] = [Job::ScheduleCheck, Job::OneTimeCheck, Job::Reminders];

    /// First firing instant strictly after `after`
    pub fn next_fire(&self, after: DateTime<Utc>) -> DateTime<Utc> {
        let minute = after
            .with_second(0)
            .and_then(|t| t.with_nanosecond(0))
            .unwrap_or(after);
        match self {
            Job::ScheduleCheck | Job::OneTimeCheck => minute + Duration::minutes(1),
            Job::Reminders => {
                let mut candidate = minute - Duration::minutes(i64::from(minute.minute() % 5))
                    + Duration::seconds(30);
                while candidate <= after {
                    candidate += Duration::minutes(5);
                }
                candidate
            }
        }
    }
}

/// Start of the local day containing `now`, as a UTC instant
pub fn local_midnight(now: DateTime<Utc>, offset: FixedOffset) -> DateTime<Utc> {
    let local = now.with_timezone(&offset);
    local
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .and_then(|midnight| offset.from_local_datetime(&midnight).single())
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or(now)
}

fn fired_today(task: &ProductionTask, midnight: DateTime<Utc>) -> bool {
    task.last_triggered_at.map(|t| t >= midnight).unwrap_or(false)
}

/// Record a firing: history row, task bookkeeping, and the notification to
/// publish once the caller's transaction commits
async fn fire(
    conn: &mut SqliteConnection,
    task: &mut ProductionTask,
    reason: &str,
    roast_id: Option<Uuid>,
    now: DateTime<Utc>,
) -> Result<Notification> {
    let machine_name = match task.machine_id {
        Some(id) => machines::get_name(conn, id).await?,
        None => None,
    };
    let item = TaskHistory {
        id: uuid_utils::generate(),
        task_id: task.id,
        user_id: task.user_id,
        title: task.title.clone(),
        notification_text: task.notification_text.clone(),
        task_type: task.task_type.as_str().to_string(),
        machine_id: task.machine_id,
        machine_name,
        triggered_at: now,
        triggered_by_roast_id: roast_id,
        trigger_reason: Some(reason.to_string()),
        marked_completed_at: None,
        snoozed_until: None,
    };
    tasks::insert_history(conn, &item).await?;

    task.last_triggered_at = Some(now);
    if roast_id.is_some() {
        task.last_triggered_roast_id = roast_id;
    }

    info!("Production task '{}' ({}) fired: {}", task.title, task.id, reason);
    Ok(history_notification(&item, TASK_EVENT, false, now))
}

fn history_notification(
    item: &TaskHistory,
    event_type: &str,
    is_reminder: bool,
    now: DateTime<Utc>,
) -> Notification {
    let mut payload = json!({
        "task_id": item.task_id.to_string(),
        "history_id": item.id.to_string(),
        "user_id": item.user_id.to_string(),
        "title": item.title,
        "notification_text": item.notification_text,
        "task_type": item.task_type,
        "machine_id": item.machine_id.map(|id| id.to_string()),
        "machine_name": item.machine_name,
        "triggered_at": item.triggered_at.to_rfc3339(),
        "trigger_reason": item.trigger_reason,
    });
    if is_reminder {
        payload["is_reminder"] = json!(true);
    }
    let mut notification = Notification::new(event_type, item.user_id, payload);
    notification.timestamp = now;
    notification
}

/// Advance counter tasks for a newly created roast
///
/// Runs inside the roast's write transaction. A task bound to a machine only
/// counts roasts from that machine (matched by name among the roast owner's
/// machines); an unbound task counts every roast. Returned notifications are
/// published by the caller after commit.
pub async fn count_roast(
    conn: &mut SqliteConnection,
    roast: &Roast,
    now: DateTime<Utc>,
) -> Result<Vec<Notification>> {
    let roast_machine = match roast.machine.as_deref().map(str::trim).filter(|m| !m.is_empty()) {
        Some(name) => machines::find_by_name(conn, roast.user_id, name)
            .await?
            .map(|m| m.id),
        None => None,
    };

    let mut fired = Vec::new();
    for mut task in tasks::list_active(conn, TaskType::Counter).await? {
        if let (Some(wanted), Some(actual)) = (task.machine_id, roast_machine) {
            if wanted != actual {
                continue;
            }
        }
        let trigger = match task.counter_trigger_value {
            Some(t) if t > 0 => t,
            _ => {
                debug!("Counter task {} has no trigger value", task.id);
                continue;
            }
        };

        task.counter_current_value += 1;
        if task.counter_current_value >= trigger {
            fired.push(fire(conn, &mut task, "counter_reached", Some(roast.id), now).await?);
            if task.counter_reset_on_trigger {
                task.counter_current_value = 0;
            }
        }
        tasks::save_task_state(conn, &task).await?;
    }
    Ok(fired)
}

/// Mark a history item done for `user_id`; false when it is not theirs
pub async fn complete(
    conn: &mut SqliteConnection,
    history_id: Uuid,
    user_id: Uuid,
    now: DateTime<Utc>,
) -> Result<bool> {
    tasks::mark_completed(conn, history_id, user_id, now).await
}

/// Silence reminders for a history item for `minutes`
pub async fn snooze(
    conn: &mut SqliteConnection,
    history_id: Uuid,
    user_id: Uuid,
    minutes: i64,
    now: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>> {
    let until = now + Duration::minutes(minutes);
    Ok(tasks::snooze(conn, history_id, user_id, until).await?.then_some(until))
}

/// What one `tick` did
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub ran: Vec<Job>,
    pub published: usize,
}

/// Periodic job runner with an injected clock
pub struct TaskScheduler {
    pool: SqlitePool,
    hub: NotificationHub,
    clock: Arc<dyn Clock>,
    offset: FixedOffset,
    next: [DateTime<Utc>; 3],
}

impl TaskScheduler {
    pub fn new(
        pool: SqlitePool,
        hub: NotificationHub,
        clock: Arc<dyn Clock>,
        offset: FixedOffset,
    ) -> Self {
        let now = clock.now();
        let next = Job::ALL.map(|job| job.next_fire(now));
        Self { pool, hub, clock, offset, next }
    }

    fn slot(job: Job) -> usize {
        match job {
            Job::ScheduleCheck => 0,
            Job::OneTimeCheck => 1,
            Job::Reminders => 2,
        }
    }

    pub fn next_fire(&self, job: Job) -> DateTime<Utc> {
        self.next[Self::slot(job)]
    }

    /// Run every job that is due, once, and move its next fire time forward
    pub async fn tick(&mut self) -> Result<TickReport> {
        let now = self.clock.now();
        let mut report = TickReport::default();

        for job in Job::ALL {
            let slot = Self::slot(job);
            if self.next[slot] > now {
                continue;
            }
            let notifications = match job {
                Job::ScheduleCheck => self.check_schedules(now).await,
                Job::OneTimeCheck => self.check_one_time(now).await,
                Job::Reminders => self.remind(now).await,
            };
            match notifications {
                Ok(list) => {
                    for n in list {
                        self.hub.publish(n);
                        report.published += 1;
                    }
                }
                Err(e) => error!("Scheduler job {:?} failed: {}", job, e),
            }
            self.next[slot] = job.next_fire(now);
            report.ran.push(job);
        }
        Ok(report)
    }

    /// Sleep until the earliest due job, tick, repeat
    pub async fn run(mut self) {
        info!("Production task scheduler started (UTC offset {})", self.offset);
        loop {
            let now = self.clock.now();
            let earliest = self.next.iter().min().copied().unwrap_or(now);
            if let Ok(wait) = (earliest - now).to_std() {
                tokio::time::sleep(wait).await;
            }
            if let Err(e) = self.tick().await {
                error!("Scheduler tick failed: {}", e);
            }
        }
    }

    async fn check_schedules(&self, now: DateTime<Utc>) -> Result<Vec<Notification>> {
        let local = now.with_timezone(&self.offset);
        let weekday = i64::from(local.weekday().num_days_from_monday());
        let midnight = local_midnight(now, self.offset);

        let mut tx = self.pool.begin_with("BEGIN IMMEDIATE").await?;
        let mut fired = Vec::new();
        for mut task in tasks::list_active(&mut tx, TaskType::Schedule).await? {
            let time = match (task.schedule_day_of_week, task.schedule_time) {
                (Some(day), Some(time)) if day == weekday => time,
                _ => continue,
            };
            if time.hour() != local.hour() || time.minute() != local.minute() {
                continue;
            }
            if fired_today(&task, midnight) {
                debug!("Schedule task {} already fired today", task.id);
                continue;
            }
            fired.push(fire(&mut tx, &mut task, "scheduled", None, now).await?);
            tasks::save_task_state(&mut tx, &task).await?;
        }
        tx.commit().await?;
        Ok(fired)
    }

    async fn check_one_time(&self, now: DateTime<Utc>) -> Result<Vec<Notification>> {
        let local = now.with_timezone(&self.offset);
        let today: NaiveDate = local.date_naive();
        let midnight = local_midnight(now, self.offset);

        let mut tx = self.pool.begin_with("BEGIN IMMEDIATE").await?;
        let mut fired = Vec::new();
        for mut task in tasks::list_due_one_time(&mut tx, today).await? {
            if task.scheduled_date == Some(today) {
                if let Some(at) = task.scheduled_time {
                    if at > local.time() {
                        continue;
                    }
                }
            }
            if fired_today(&task, midnight) {
                continue;
            }
            fired.push(fire(&mut tx, &mut task, "one_time", None, now).await?);

            match task.repeat_after_days.filter(|d| *d > 0) {
                Some(days) => {
                    task.scheduled_date = Some(today + Duration::days(days));
                    task.last_triggered_at = None;
                    debug!("One-time task {} rescheduled to {:?}", task.id, task.scheduled_date);
                }
                None => task.is_active = false,
            }
            tasks::save_task_state(&mut tx, &task).await?;
        }
        tx.commit().await?;
        Ok(fired)
    }

    async fn remind(&self, now: DateTime<Utc>) -> Result<Vec<Notification>> {
        let since = now - Duration::hours(REMINDER_WINDOW_HOURS);
        let mut conn = self.pool.acquire().await?;
        let pending = tasks::list_pending_reminders(&mut conn, since, now).await?;
        if !pending.is_empty() {
            debug!("Re-announcing {} uncompleted task(s)", pending.len());
        }
        Ok(pending
            .iter()
            .map(|item| history_notification(item, REMINDER_EVENT, true, now))
            .collect())
    }
}

/// Publish notifications produced inside a committed transaction
pub fn publish_all(hub: &NotificationHub, notifications: Vec<Notification>) {
    for n in notifications {
        let user = n.target_user_id;
        if hub.publish(n) == 0 {
            warn!("No live subscriber for task notification to user {}", user);
        }
    }
}
