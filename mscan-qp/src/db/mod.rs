//! Database access for mscan-qp
//!
//! Queue tables live in the shared MusicScan database alongside the
//! common settings table. All timestamps are stored as RFC3339 TEXT in
//! UTC; since every value uses the same format, SQL string comparison
//! orders them correctly (the scheduled_at eligibility check relies on
//! this).

pub mod batches;
pub mod locked;
pub mod queue_items;

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::path::Path;

/// Initialize database connection pool and service tables
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    let pool = mscan_common::db::init_database(db_path).await?;
    init_tables(&pool).await?;
    Ok(pool)
}

/// Initialize mscan-qp specific tables
///
/// Creates queue_items and batch_records if they don't exist
pub async fn init_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS batch_records (
            id TEXT PRIMARY KEY,
            process_type TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            total_items INTEGER NOT NULL DEFAULT 0,
            processed_items INTEGER NOT NULL DEFAULT 0,
            successful_items INTEGER NOT NULL DEFAULT 0,
            failed_items INTEGER NOT NULL DEFAULT 0,
            started_at TEXT NOT NULL,
            completed_at TEXT,
            last_heartbeat TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            current_item TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS queue_items (
            id TEXT PRIMARY KEY,
            batch_id TEXT NOT NULL,
            item_id TEXT NOT NULL,
            item_type TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            attempts INTEGER NOT NULL DEFAULT 0,
            max_attempts INTEGER NOT NULL DEFAULT 3,
            priority INTEGER NOT NULL DEFAULT 0,
            metadata TEXT NOT NULL DEFAULT 'null',
            error_message TEXT,
            scheduled_at TEXT NOT NULL,
            created_at TEXT NOT NULL,
            processed_at TEXT,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS stories (
            id TEXT PRIMARY KEY,
            item_id TEXT NOT NULL,
            item_type TEXT NOT NULL,
            title TEXT,
            content TEXT NOT NULL,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Claim path scans by batch + status + eligibility
    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_queue_items_claim
        ON queue_items (batch_id, status, priority, created_at)
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_batch_records_type_status
        ON batch_records (process_type, status)
        "#,
    )
    .execute(pool)
    .await?;

    tracing::info!("Database tables initialized (batch_records, queue_items, stories)");

    Ok(())
}

/// Parse a stored RFC3339 timestamp
pub(crate) fn parse_timestamp(value: &str, column: &str) -> mscan_common::Result<DateTime<Utc>> {
    chrono::DateTime::parse_from_rfc3339(value)
        .map_err(|e| {
            mscan_common::Error::Internal(format!("Failed to parse {}: {}", column, e))
        })
        .map(|dt| dt.with_timezone(&Utc))
}

/// Parse an optional stored RFC3339 timestamp
pub(crate) fn parse_opt_timestamp(
    value: Option<String>,
    column: &str,
) -> mscan_common::Result<Option<DateTime<Utc>>> {
    value.map(|s| parse_timestamp(&s, column)).transpose()
}
