//! Database schema migrations
//!
//! Versioned, idempotent upgrades tracked in `schema_version`. Tables are
//! created in their original shape by `init`; every column added since
//! lands here so existing databases upgrade in place.
//!
//! Never modify an existing migration; add a new one and bump
//! `CURRENT_SCHEMA_VERSION`.

use crate::Result;
use sqlx::SqlitePool;
use tracing::{info, warn};

/// Current schema version
const CURRENT_SCHEMA_VERSION: i32 = 3;

/// Get current schema version from database
///
/// Returns 0 if schema_version table doesn't exist or has no rows
async fn get_schema_version(pool: &SqlitePool) -> Result<i32> {
    let table_exists: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS(
            SELECT 1 FROM sqlite_master
            WHERE type='table' AND name='schema_version'
        )
        "#,
    )
    .fetch_one(pool)
    .await?;

    if !table_exists {
        return Ok(0);
    }

    let version: Option<i32> =
        sqlx::query_scalar("SELECT version FROM schema_version ORDER BY version DESC LIMIT 1")
            .fetch_optional(pool)
            .await?;

    Ok(version.unwrap_or(0))
}

async fn set_schema_version(pool: &SqlitePool, version: i32) -> Result<()> {
    sqlx::query("INSERT INTO schema_version (version) VALUES (?)")
        .bind(version)
        .execute(pool)
        .await?;

    Ok(())
}

/// Run all pending migrations
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    let current_version = get_schema_version(pool).await?;

    if current_version == CURRENT_SCHEMA_VERSION {
        info!("Database schema is up to date (v{})", current_version);
        return Ok(());
    }

    if current_version > CURRENT_SCHEMA_VERSION {
        warn!(
            "Database schema version ({}) is newer than code version ({})",
            current_version, CURRENT_SCHEMA_VERSION
        );
        return Ok(());
    }

    info!(
        "Running database migrations: v{} -> v{}",
        current_version, CURRENT_SCHEMA_VERSION
    );

    if current_version < 1 {
        migrate_v1(pool).await?;
        set_schema_version(pool, 1).await?;
    }

    if current_version < 2 {
        migrate_v2(pool).await?;
        set_schema_version(pool, 2).await?;
    }

    if current_version < 3 {
        migrate_v3(pool).await?;
        set_schema_version(pool, 3).await?;
    }

    info!("All migrations completed successfully");
    Ok(())
}

/// Add a column unless it is already present
async fn add_column_if_missing(
    pool: &SqlitePool,
    table: &str,
    column: &str,
    definition: &str,
) -> Result<()> {
    let has_column: i64 = sqlx::query_scalar(&format!(
        "SELECT COUNT(*) FROM pragma_table_info('{}') WHERE name = ?",
        table
    ))
    .bind(column)
    .fetch_one(pool)
    .await?;

    if has_column > 0 {
        info!("  {}.{} already exists - skipping", table, column);
        return Ok(());
    }

    sqlx::query(&format!("ALTER TABLE {} ADD COLUMN {} {}", table, column, definition))
        .execute(pool)
        .await?;

    info!("  Added {}.{}", table, column);
    Ok(())
}

/// Migration v1: bean notes shown when a reference roast is used as background
async fn migrate_v1(pool: &SqlitePool) -> Result<()> {
    info!("Running migration v1: roasts.reference_beans_notes");
    add_column_if_missing(pool, "roasts", "reference_beans_notes", "TEXT").await
}

/// Migration v2: quality-control queue flag
async fn migrate_v2(pool: &SqlitePool) -> Result<()> {
    info!("Running migration v2: roasts.in_quality_control");
    add_column_if_missing(pool, "roasts", "in_quality_control", "INTEGER NOT NULL DEFAULT 0").await
}

/// Migration v3: quantity taken from the linked production batch
///
/// Restoring a batch on delete uses this recorded amount; rows written
/// before v3 have NULL and are not restored.
async fn migrate_v3(pool: &SqlitePool) -> Result<()> {
    info!("Running migration v3: roasts.batch_deducted_kg");
    add_column_if_missing(pool, "roasts", "batch_deducted_kg", "TEXT").await
}
