//! Database initialization
//!
//! Creates the database on first run, applies connection PRAGMAs and
//! creates every table idempotently before running versioned migrations.

use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // Per-connection PRAGMAs go through the connect options so every pooled
    // connection gets them, not just the first one.
    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let options = SqliteConnectOptions::from_str(&db_url)?
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_millis(5000));

    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .min_connections(1)
        .connect_with(options)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    create_tables(&pool).await?;
    crate::db::migrations::run_migrations(&pool).await?;

    Ok(pool)
}

/// Create every table (idempotent)
pub async fn create_tables(pool: &SqlitePool) -> Result<()> {
    create_schema_version_table(pool).await?;
    create_users_table(pool).await?;
    create_coffees_table(pool).await?;
    create_batches_table(pool).await?;
    create_blends_table(pool).await?;
    create_user_machines_table(pool).await?;
    create_schedules_table(pool).await?;
    create_roasts_table(pool).await?;
    create_roast_profiles_table(pool).await?;
    create_idempotency_cache_table(pool).await?;
    create_roast_goals_table(pool).await?;
    create_production_tasks_table(pool).await?;
    create_production_task_history_table(pool).await?;
    Ok(())
}

async fn create_schema_version_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_users_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            guid TEXT PRIMARY KEY,
            username TEXT NOT NULL UNIQUE,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Requests without an identity header act as this user
    sqlx::query(
        r#"
        INSERT OR IGNORE INTO users (guid, username)
        VALUES ('00000000-0000-0000-0000-000000000001', 'Anonymous')
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Green coffees; stock is decimal TEXT
async fn create_coffees_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS coffees (
            id TEXT PRIMARY KEY,
            hr_id TEXT NOT NULL UNIQUE,
            label TEXT NOT NULL,
            origin TEXT,
            region TEXT,
            variety TEXT,
            processing TEXT,
            stock_weight_kg TEXT NOT NULL DEFAULT '0',
            created_at TIMESTAMP NOT NULL,
            updated_at TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_batches_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS batches (
            id TEXT PRIMARY KEY,
            coffee_id TEXT REFERENCES coffees(id) ON DELETE SET NULL,
            lot_number TEXT NOT NULL,
            initial_weight_kg TEXT NOT NULL DEFAULT '0',
            current_weight_kg TEXT NOT NULL DEFAULT '0',
            roasted_total_weight_kg TEXT NOT NULL DEFAULT '0',
            status TEXT NOT NULL DEFAULT 'active' CHECK (status IN ('active', 'depleted')),
            created_at TIMESTAMP NOT NULL,
            updated_at TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Blends; `recipe` is a JSON array of {coffee_id, percentage}
async fn create_blends_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS blends (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            name TEXT NOT NULL,
            description TEXT,
            recipe TEXT NOT NULL,
            created_at TIMESTAMP NOT NULL,
            updated_at TIMESTAMP NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_blends_user ON blends(user_id)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_user_machines_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS user_machines (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            name TEXT NOT NULL,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_schedules_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schedules (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            coffee_id TEXT,
            batch_id TEXT,
            machine_id TEXT,
            title TEXT NOT NULL,
            scheduled_date TEXT NOT NULL,
            scheduled_weight_kg TEXT,
            status TEXT NOT NULL DEFAULT 'pending',
            completed_at TIMESTAMP,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Roasts
///
/// Telemetry channels and the ledger snapshot are JSON TEXT columns;
/// weights are decimal TEXT. Later columns are added by migrations.
async fn create_roasts_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS roasts (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            coffee_id TEXT,
            blend_id TEXT,
            batch_id TEXT,
            schedule_id TEXT,
            reference_profile_id TEXT,
            batch_number INTEGER NOT NULL DEFAULT 0,
            label TEXT NOT NULL DEFAULT '',
            title TEXT,
            roasted_at TIMESTAMP NOT NULL,
            modified_at TIMESTAMP NOT NULL,
            gmt_offset INTEGER NOT NULL DEFAULT 0,
            green_weight_kg TEXT NOT NULL,
            roasted_weight_kg TEXT,
            weight_loss REAL,
            defects_weight REAL NOT NULL DEFAULT 0,
            coffee_hr_id TEXT,
            blend_hr_id TEXT,
            location_hr_id TEXT,
            blend_spec TEXT,
            machine TEXT,
            operator TEXT,
            email TEXT,
            charge_temp REAL,
            tp_temp REAL,
            dry_temp REAL,
            fcs_temp REAL,
            fce_temp REAL,
            scs_temp REAL,
            sce_temp REAL,
            drop_temp REAL,
            tp_time INTEGER,
            dry_time INTEGER,
            fcs_time INTEGER,
            fce_time INTEGER,
            scs_time INTEGER,
            sce_time INTEGER,
            drop_time INTEGER,
            dev_time INTEGER,
            dev_ratio REAL,
            whole_color INTEGER NOT NULL DEFAULT 0,
            ground_color INTEGER NOT NULL DEFAULT 0,
            cupping_score INTEGER NOT NULL DEFAULT 0,
            mode TEXT NOT NULL DEFAULT 'C',
            temp_unit TEXT NOT NULL DEFAULT 'C',
            notes TEXT,
            timex TEXT NOT NULL DEFAULT '[]',
            temp1 TEXT NOT NULL DEFAULT '[]',
            temp2 TEXT NOT NULL DEFAULT '[]',
            extra_temp1 TEXT NOT NULL DEFAULT '[]',
            extra_temp2 TEXT NOT NULL DEFAULT '[]',
            air TEXT NOT NULL DEFAULT '[]',
            drum TEXT NOT NULL DEFAULT '[]',
            gas TEXT NOT NULL DEFAULT '[]',
            fan TEXT NOT NULL DEFAULT '[]',
            heater TEXT NOT NULL DEFAULT '[]',
            timeindex TEXT,
            deducted_components TEXT NOT NULL DEFAULT '[]',
            is_reference INTEGER NOT NULL DEFAULT 0,
            reference_name TEXT,
            reference_for_coffee_id TEXT,
            reference_for_blend_id TEXT,
            reference_machine TEXT,
            cupping_date TEXT,
            cupping_verdict TEXT,
            espresso_date TEXT,
            espresso_notes TEXT,
            espresso_verdict TEXT,
            created_at TIMESTAMP NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_roasts_user_roasted ON roasts(user_id, roasted_at)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_roasts_reference ON roasts(is_reference)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Uploaded `.alog` blobs, one per roast
async fn create_roast_profiles_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS roast_profiles (
            roast_id TEXT PRIMARY KEY REFERENCES roasts(id) ON DELETE CASCADE,
            data BLOB NOT NULL,
            updated_at TIMESTAMP NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_idempotency_cache_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS idempotency_cache (
            idempotency_key TEXT NOT NULL,
            endpoint TEXT NOT NULL,
            status_code INTEGER NOT NULL,
            response TEXT NOT NULL,
            created_at TIMESTAMP NOT NULL,
            PRIMARY KEY (idempotency_key, endpoint)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_roast_goals_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS roast_goals (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            goal_type TEXT NOT NULL DEFAULT 'match_reference',
            is_active INTEGER NOT NULL DEFAULT 1,
            failed_status TEXT NOT NULL DEFAULT 'failed',
            missing_value_status TEXT NOT NULL DEFAULT 'warning',
            parameters TEXT NOT NULL DEFAULT '{}',
            created_at TIMESTAMP NOT NULL,
            updated_at TIMESTAMP NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_production_tasks_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS production_tasks (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            title TEXT NOT NULL,
            notification_text TEXT NOT NULL,
            task_type TEXT NOT NULL CHECK (task_type IN ('schedule', 'counter', 'one_time')),
            schedule_day_of_week INTEGER,
            schedule_time TEXT,
            counter_trigger_value INTEGER,
            counter_current_value INTEGER NOT NULL DEFAULT 0,
            counter_reset_on_trigger INTEGER NOT NULL DEFAULT 1,
            machine_id TEXT,
            scheduled_date TEXT,
            scheduled_time TEXT,
            repeat_after_days INTEGER,
            is_active INTEGER NOT NULL DEFAULT 1,
            last_triggered_at TIMESTAMP,
            last_triggered_roast_id TEXT,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_production_task_history_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS production_task_history (
            id TEXT PRIMARY KEY,
            task_id TEXT NOT NULL REFERENCES production_tasks(id) ON DELETE CASCADE,
            user_id TEXT NOT NULL,
            title TEXT NOT NULL,
            notification_text TEXT NOT NULL,
            task_type TEXT NOT NULL,
            machine_id TEXT,
            machine_name TEXT,
            triggered_at TIMESTAMP NOT NULL,
            triggered_by_roast_id TEXT,
            trigger_reason TEXT,
            marked_completed_at TIMESTAMP,
            marked_completed_by_user_id TEXT,
            snoozed_until TIMESTAMP,
            snoozed_by_user_id TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_task_history_triggered ON production_task_history(triggered_at)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
