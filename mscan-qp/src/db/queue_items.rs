//! Queue item persistence
//!
//! The claim path uses a compare-and-swap UPDATE guarded by the expected
//! prior status, checking rows_affected, so overlapping ticks (manual
//! trigger racing cron) cannot both claim the same item.

use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use mscan_common::{Error, Result};

use super::{parse_opt_timestamp, parse_timestamp};
use crate::models::{ItemStatus, QueueItem, QueueStats};

/// Failure marker for items whose batch record no longer exists
pub const ORPHANED_ERROR: &str = "orphaned: missing batch record";

const ITEM_COLUMNS: &str = "id, batch_id, item_id, item_type, status, attempts, max_attempts, \
     priority, metadata, error_message, scheduled_at, created_at, processed_at, updated_at";

fn item_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<QueueItem> {
    let id_str: String = row.get("id");
    let id = Uuid::parse_str(&id_str)
        .map_err(|e| Error::Internal(format!("Failed to parse item id: {}", e)))?;

    let batch_id_str: String = row.get("batch_id");
    let batch_id = Uuid::parse_str(&batch_id_str)
        .map_err(|e| Error::Internal(format!("Failed to parse batch_id: {}", e)))?;

    let status_str: String = row.get("status");
    let status = ItemStatus::parse(&status_str)
        .ok_or_else(|| Error::Internal(format!("Unknown item status: {}", status_str)))?;

    let metadata: String = row.get("metadata");
    let metadata = serde_json::from_str(&metadata)
        .map_err(|e| Error::Internal(format!("Failed to deserialize metadata: {}", e)))?;

    let scheduled_at: String = row.get("scheduled_at");
    let created_at: String = row.get("created_at");
    let updated_at: String = row.get("updated_at");
    let processed_at: Option<String> = row.get("processed_at");

    Ok(QueueItem {
        id,
        batch_id,
        item_id: row.get("item_id"),
        item_type: row.get("item_type"),
        status,
        attempts: row.get::<i64, _>("attempts") as u32,
        max_attempts: row.get::<i64, _>("max_attempts") as u32,
        priority: row.get::<i64, _>("priority") as i32,
        metadata,
        error_message: row.get("error_message"),
        scheduled_at: parse_timestamp(&scheduled_at, "scheduled_at")?,
        created_at: parse_timestamp(&created_at, "created_at")?,
        processed_at: parse_opt_timestamp(processed_at, "processed_at")?,
        updated_at: parse_timestamp(&updated_at, "updated_at")?,
    })
}

/// Insert a new queue item
///
/// Generic over the executor so batch creation can run it inside a
/// transaction.
pub async fn insert_item<'e, E>(executor: E, item: &QueueItem) -> Result<()>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    let metadata = serde_json::to_string(&item.metadata)
        .map_err(|e| Error::Internal(format!("Failed to serialize metadata: {}", e)))?;

    sqlx::query(
        r#"
        INSERT INTO queue_items (
            id, batch_id, item_id, item_type, status, attempts, max_attempts,
            priority, metadata, error_message, scheduled_at, created_at,
            processed_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(item.id.to_string())
    .bind(item.batch_id.to_string())
    .bind(&item.item_id)
    .bind(&item.item_type)
    .bind(item.status.as_str())
    .bind(item.attempts as i64)
    .bind(item.max_attempts as i64)
    .bind(item.priority as i64)
    .bind(&metadata)
    .bind(&item.error_message)
    .bind(item.scheduled_at.to_rfc3339())
    .bind(item.created_at.to_rfc3339())
    .bind(item.processed_at.map(|dt| dt.to_rfc3339()))
    .bind(item.updated_at.to_rfc3339())
    .execute(executor)
    .await?;

    Ok(())
}

/// Load a queue item by id
pub async fn get_item(pool: &SqlitePool, id: Uuid) -> Result<Option<QueueItem>> {
    let row = sqlx::query(&format!("SELECT {} FROM queue_items WHERE id = ?", ITEM_COLUMNS))
        .bind(id.to_string())
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(item_from_row).transpose()
}

/// Select the next eligible pending item of a batch
///
/// Ordering is priority descending, then created_at ascending (oldest
/// first as the tie-break). Items scheduled in the future are skipped.
pub async fn next_eligible(
    pool: &SqlitePool,
    batch_id: Uuid,
    now: DateTime<Utc>,
) -> Result<Option<QueueItem>> {
    let row = sqlx::query(&format!(
        r#"
        SELECT {} FROM queue_items
        WHERE batch_id = ? AND status = 'pending' AND scheduled_at <= ?
        ORDER BY priority DESC, created_at ASC
        LIMIT 1
        "#,
        ITEM_COLUMNS
    ))
    .bind(batch_id.to_string())
    .bind(now.to_rfc3339())
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(item_from_row).transpose()
}

/// Attempt to claim an item: pending -> processing, attempts incremented
///
/// Returns false when the guarded update matched no row, meaning another
/// tick claimed (or otherwise transitioned) the item first.
pub async fn try_claim(pool: &SqlitePool, id: Uuid) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE queue_items
        SET status = 'processing', attempts = attempts + 1, updated_at = ?
        WHERE id = ? AND status = 'pending'
        "#,
    )
    .bind(Utc::now().to_rfc3339())
    .bind(id.to_string())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Mark an item completed
pub async fn mark_completed(pool: &SqlitePool, id: Uuid) -> Result<()> {
    let now = Utc::now().to_rfc3339();
    sqlx::query(
        r#"
        UPDATE queue_items
        SET status = 'completed', processed_at = ?, error_message = NULL, updated_at = ?
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

/// Put an item back to pending with a delayed scheduled_at after a
/// transient failure
pub async fn reschedule(
    pool: &SqlitePool,
    id: Uuid,
    scheduled_at: DateTime<Utc>,
    error_message: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE queue_items
        SET status = 'pending', scheduled_at = ?, error_message = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(scheduled_at.to_rfc3339())
    .bind(error_message)
    .bind(Utc::now().to_rfc3339())
    .bind(id.to_string())
    .execute(pool)
    .await?;

    Ok(())
}

/// Mark an item terminally failed
pub async fn mark_failed(pool: &SqlitePool, id: Uuid, error_message: &str) -> Result<()> {
    let now = Utc::now().to_rfc3339();
    sqlx::query(
        r#"
        UPDATE queue_items
        SET status = 'failed', error_message = ?, processed_at = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(error_message)
    .bind(&now)
    .bind(&now)
    .bind(id.to_string())
    .execute(pool)
    .await?;

    Ok(())
}

/// Defensive sweep: fail pending items that already exhausted their
/// attempts
///
/// Such items should have been failed at their last attempt; this catches
/// rows left behind by an interrupted tick. Returns the number swept.
pub async fn fail_exhausted_pending(pool: &SqlitePool, batch_id: Uuid) -> Result<u32> {
    let now = Utc::now().to_rfc3339();
    let result = sqlx::query(
        r#"
        UPDATE queue_items
        SET status = 'failed', error_message = 'max attempts exhausted', processed_at = ?, updated_at = ?
        WHERE batch_id = ? AND status = 'pending' AND attempts >= max_attempts
        "#,
    )
    .bind(&now)
    .bind(&now)
    .bind(batch_id.to_string())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() as u32)
}

/// Fail pending items whose batch record no longer exists
///
/// A missing parent is not transient: retrying cannot restore a deleted
/// batch record, so orphans are failed as a hard stop. Returns the number
/// failed.
pub async fn fail_orphaned_pending(pool: &SqlitePool) -> Result<u32> {
    let now = Utc::now().to_rfc3339();
    let result = sqlx::query(
        r#"
        UPDATE queue_items
        SET status = 'failed', error_message = ?, processed_at = ?, updated_at = ?
        WHERE status = 'pending'
          AND batch_id NOT IN (SELECT id FROM batch_records)
        "#,
    )
    .bind(ORPHANED_ERROR)
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() as u32)
}

/// Item counts grouped by status for one batch
pub async fn stats_for_batch(pool: &SqlitePool, batch_id: Uuid) -> Result<QueueStats> {
    let rows = sqlx::query(
        "SELECT status, COUNT(*) AS n FROM queue_items WHERE batch_id = ? GROUP BY status",
    )
    .bind(batch_id.to_string())
    .fetch_all(pool)
    .await?;

    let mut stats = QueueStats::default();
    for row in rows {
        let status: String = row.get("status");
        let n = row.get::<i64, _>("n") as u32;
        match status.as_str() {
            "pending" => stats.pending = n,
            "processing" => stats.processing = n,
            "completed" => stats.completed = n,
            "failed" => stats.failed = n,
            other => {
                tracing::warn!(status = other, "Ignoring unknown queue item status in stats");
            }
        }
    }

    Ok(stats)
}

/// Reset failed items of a batch back to pending
///
/// `reset_attempts` selects full amnesty (attempts back to 0) versus
/// "one more try" (attempts left as-is; the defensive sweep will fail
/// them again unless max_attempts was raised). Returns the reset count.
pub async fn reset_failed(pool: &SqlitePool, batch_id: Uuid, reset_attempts: bool) -> Result<u32> {
    let now = Utc::now().to_rfc3339();
    let sql = if reset_attempts {
        r#"
        UPDATE queue_items
        SET status = 'pending', attempts = 0, error_message = NULL,
            scheduled_at = ?, processed_at = NULL, updated_at = ?
        WHERE batch_id = ? AND status = 'failed'
        "#
    } else {
        r#"
        UPDATE queue_items
        SET status = 'pending', error_message = NULL,
            scheduled_at = ?, processed_at = NULL, updated_at = ?
        WHERE batch_id = ? AND status = 'failed'
        "#
    };

    let result = sqlx::query(sql)
        .bind(&now)
        .bind(&now)
        .bind(batch_id.to_string())
        .execute(pool)
        .await?;

    Ok(result.rows_affected() as u32)
}
