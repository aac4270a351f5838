//! Batch record persistence
//!
//! Batch records are never deleted by this service; completed batches
//! remain as an audit trail of every run.

use chrono::Utc;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use mscan_common::{Error, Result};

use super::{parse_opt_timestamp, parse_timestamp};
use crate::models::{BatchRecord, BatchStatus};

const BATCH_COLUMNS: &str = "id, process_type, status, total_items, processed_items, \
     successful_items, failed_items, started_at, completed_at, last_heartbeat, \
     updated_at, current_item";

fn batch_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<BatchRecord> {
    let id_str: String = row.get("id");
    let id = Uuid::parse_str(&id_str)
        .map_err(|e| Error::Internal(format!("Failed to parse batch id: {}", e)))?;

    let status_str: String = row.get("status");
    let status = BatchStatus::parse(&status_str)
        .ok_or_else(|| Error::Internal(format!("Unknown batch status: {}", status_str)))?;

    let started_at: String = row.get("started_at");
    let last_heartbeat: String = row.get("last_heartbeat");
    let updated_at: String = row.get("updated_at");
    let completed_at: Option<String> = row.get("completed_at");

    Ok(BatchRecord {
        id,
        process_type: row.get("process_type"),
        status,
        total_items: row.get::<i64, _>("total_items") as u32,
        processed_items: row.get::<i64, _>("processed_items") as u32,
        successful_items: row.get::<i64, _>("successful_items") as u32,
        failed_items: row.get::<i64, _>("failed_items") as u32,
        started_at: parse_timestamp(&started_at, "started_at")?,
        completed_at: parse_opt_timestamp(completed_at, "completed_at")?,
        last_heartbeat: parse_timestamp(&last_heartbeat, "last_heartbeat")?,
        updated_at: parse_timestamp(&updated_at, "updated_at")?,
        current_item: row.get("current_item"),
    })
}

/// Insert a new batch record
pub async fn insert_batch<'e, E>(executor: E, batch: &BatchRecord) -> Result<()>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO batch_records (
            id, process_type, status, total_items, processed_items,
            successful_items, failed_items, started_at, completed_at,
            last_heartbeat, updated_at, current_item
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(batch.id.to_string())
    .bind(&batch.process_type)
    .bind(batch.status.as_str())
    .bind(batch.total_items as i64)
    .bind(batch.processed_items as i64)
    .bind(batch.successful_items as i64)
    .bind(batch.failed_items as i64)
    .bind(batch.started_at.to_rfc3339())
    .bind(batch.completed_at.map(|dt| dt.to_rfc3339()))
    .bind(batch.last_heartbeat.to_rfc3339())
    .bind(batch.updated_at.to_rfc3339())
    .bind(&batch.current_item)
    .execute(executor)
    .await?;

    Ok(())
}

/// Insert a batch and its queue items in one transaction
///
/// A mid-insert failure rolls everything back, so a half-created batch
/// can never be picked up by a later tick.
pub async fn insert_batch_with_items(
    pool: &SqlitePool,
    batch: &BatchRecord,
    items: &[crate::models::QueueItem],
) -> Result<()> {
    let mut tx = pool.begin().await?;
    insert_batch(&mut *tx, batch).await?;
    for item in items {
        super::queue_items::insert_item(&mut *tx, item).await?;
    }
    tx.commit().await?;
    Ok(())
}

/// Load a batch record by id
pub async fn get_batch(pool: &SqlitePool, id: Uuid) -> Result<Option<BatchRecord>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM batch_records WHERE id = ?",
        BATCH_COLUMNS
    ))
    .bind(id.to_string())
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(batch_from_row).transpose()
}

/// Find the running batch for a process type, if any
pub async fn find_running(pool: &SqlitePool, process_type: &str) -> Result<Option<BatchRecord>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM batch_records WHERE process_type = ? AND status = 'running' \
         ORDER BY started_at DESC LIMIT 1",
        BATCH_COLUMNS
    ))
    .bind(process_type)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(batch_from_row).transpose()
}

/// Find a non-running batch of this process type that still owns pending
/// items
///
/// Scoping by process_type is mandatory: a stalled batch of one worker
/// family must never be resumed by another family's tick.
pub async fn find_reactivatable(
    pool: &SqlitePool,
    process_type: &str,
) -> Result<Option<BatchRecord>> {
    let row = sqlx::query(&format!(
        r#"
        SELECT {} FROM batch_records br
        WHERE br.process_type = ?
          AND br.status != 'running'
          AND EXISTS (
              SELECT 1 FROM queue_items qi
              WHERE qi.batch_id = br.id AND qi.status = 'pending'
          )
        ORDER BY br.started_at DESC
        LIMIT 1
        "#,
        BATCH_COLUMNS
    ))
    .bind(process_type)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(batch_from_row).transpose()
}

/// Find a batch of this process type that is pending or running
///
/// Used by enqueue to enforce one active batch per process type.
pub async fn find_active(pool: &SqlitePool, process_type: &str) -> Result<Option<BatchRecord>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM batch_records WHERE process_type = ? \
         AND status IN ('pending', 'running') ORDER BY started_at DESC LIMIT 1",
        BATCH_COLUMNS
    ))
    .bind(process_type)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(batch_from_row).transpose()
}

/// Most recent batch of a process type regardless of status
pub async fn find_latest(pool: &SqlitePool, process_type: &str) -> Result<Option<BatchRecord>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM batch_records WHERE process_type = ? \
         ORDER BY started_at DESC LIMIT 1",
        BATCH_COLUMNS
    ))
    .bind(process_type)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(batch_from_row).transpose()
}

/// Move a batch (back) to running: clears completed_at and refreshes the
/// heartbeat
pub async fn reactivate(pool: &SqlitePool, id: Uuid) -> Result<()> {
    let now = Utc::now().to_rfc3339();
    sqlx::query(
        r#"
        UPDATE batch_records
        SET status = 'running', completed_at = NULL, last_heartbeat = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&now)
    .bind(&now)
    .bind(id.to_string())
    .execute(pool)
    .await?;

    Ok(())
}

/// Refresh the liveness heartbeat
pub async fn touch_heartbeat(pool: &SqlitePool, id: Uuid) -> Result<()> {
    let now = Utc::now().to_rfc3339();
    sqlx::query("UPDATE batch_records SET last_heartbeat = ?, updated_at = ? WHERE id = ?")
        .bind(&now)
        .bind(&now)
        .bind(id.to_string())
        .execute(pool)
        .await?;

    Ok(())
}

/// Snapshot (or clear) the currently claimed item
pub async fn set_current_item(
    pool: &SqlitePool,
    id: Uuid,
    current_item: Option<&str>,
) -> Result<()> {
    sqlx::query("UPDATE batch_records SET current_item = ?, updated_at = ? WHERE id = ?")
        .bind(current_item)
        .bind(Utc::now().to_rfc3339())
        .bind(id.to_string())
        .execute(pool)
        .await?;

    Ok(())
}

/// Count one successful item into the batch totals
pub async fn record_success(pool: &SqlitePool, id: Uuid) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE batch_records
        SET processed_items = processed_items + 1,
            successful_items = successful_items + 1,
            updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(Utc::now().to_rfc3339())
    .bind(id.to_string())
    .execute(pool)
    .await?;

    Ok(())
}

/// Count `count` terminally failed items into the batch totals
pub async fn record_failures(pool: &SqlitePool, id: Uuid, count: u32) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE batch_records
        SET processed_items = processed_items + ?,
            failed_items = failed_items + ?,
            updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(count as i64)
    .bind(count as i64)
    .bind(Utc::now().to_rfc3339())
    .bind(id.to_string())
    .execute(pool)
    .await?;

    Ok(())
}

/// Mark the batch completed
pub async fn mark_completed(pool: &SqlitePool, id: Uuid) -> Result<()> {
    let now = Utc::now().to_rfc3339();
    sqlx::query(
        r#"
        UPDATE batch_records
        SET status = 'completed', completed_at = ?, current_item = NULL, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&now)
    .bind(&now)
    .bind(id.to_string())
    .execute(pool)
    .await?;

    Ok(())
}

/// Reopen a batch after retry_failed reset `reset_count` failed items
///
/// Rolls the processed/failed counters back so the completion identity
/// (processed == successful + failed) holds again once the retried items
/// drain.
pub async fn reopen_for_retry(pool: &SqlitePool, id: Uuid, reset_count: u32) -> Result<()> {
    let now = Utc::now().to_rfc3339();
    sqlx::query(
        r#"
        UPDATE batch_records
        SET status = 'running',
            completed_at = NULL,
            processed_items = MAX(0, processed_items - ?),
            failed_items = MAX(0, failed_items - ?),
            last_heartbeat = ?,
            updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(reset_count as i64)
    .bind(reset_count as i64)
    .bind(&now)
    .bind(&now)
    .bind(id.to_string())
    .execute(pool)
    .await?;

    Ok(())
}
