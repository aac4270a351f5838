//! Tick handler
//!
//! One invocation performs at most one claim-and-process cycle: locate or
//! recover the active batch, claim the next eligible item, invoke its
//! worker, persist the outcome. All state transitions are persisted
//! before the handler returns, so a crashed process leaves nothing in
//! memory to lose; the next tick picks up from the database.

use chrono::Utc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

use mscan_common::events::ScanEvent;
use mscan_common::Result;

use crate::db::locked::retry_on_lock;
use crate::db::{batches, queue_items};
use crate::models::{BatchRecord, BatchStatus, ItemOutcome, QueueItem, TickOutcome};
use crate::queue::backoff::retry_delay;
use crate::queue::worker::{WorkItem, WorkerError};
use crate::AppState;

/// Perform one unit of queue progress for a process type
pub async fn run_tick(state: &AppState, process_type: &str) -> Result<TickOutcome> {
    let batch = match locate_batch(state, process_type).await? {
        Located::Batch(batch) => batch,
        Located::OrphansFailed(count) => {
            return Ok(TickOutcome::OrphanedItemsFailed { count });
        }
        Located::Nothing => {
            return Ok(TickOutcome::Idle);
        }
    };

    batches::touch_heartbeat(&state.db, batch.id).await?;

    // Defensive sweep: items that exhausted attempts but were left pending
    // by an interrupted tick are failed here rather than claimed
    let swept = queue_items::fail_exhausted_pending(&state.db, batch.id).await?;
    if swept > 0 {
        warn!(
            batch_id = %batch.id,
            process_type,
            swept,
            "Failed pending items that already exhausted max attempts"
        );
        batches::record_failures(&state.db, batch.id, swept).await?;
    }

    let now = Utc::now();
    let item = match queue_items::next_eligible(&state.db, batch.id, now).await? {
        Some(item) => item,
        None => {
            let stats = queue_items::stats_for_batch(&state.db, batch.id).await?;
            if stats.processing > 0 {
                // Another tick may be mid-flight; do not double-claim
                return Ok(TickOutcome::Waiting);
            }
            if stats.pending > 0 {
                // Retries scheduled in the future; the batch is not done
                return Ok(TickOutcome::Waiting);
            }

            batches::mark_completed(&state.db, batch.id).await?;
            let completed = batches::get_batch(&state.db, batch.id)
                .await?
                .unwrap_or(batch);
            info!(
                batch_id = %completed.id,
                process_type,
                successful = completed.successful_items,
                failed = completed.failed_items,
                "Batch completed"
            );
            state.event_bus.emit_or_ignore(ScanEvent::BatchCompleted {
                batch_id: completed.id,
                process_type: process_type.to_string(),
                successful_items: completed.successful_items,
                failed_items: completed.failed_items,
                timestamp: Utc::now(),
            });
            return Ok(TickOutcome::BatchCompleted { batch_id: completed.id });
        }
    };

    // Compare-and-swap claim; losing the race means another tick is
    // already processing this item
    let claimed =
        retry_on_lock("claim_queue_item", || queue_items::try_claim(&state.db, item.id)).await?;
    if !claimed {
        warn!(
            item_id = %item.item_id,
            batch_id = %batch.id,
            "Lost claim race, another tick took the item"
        );
        return Ok(TickOutcome::Waiting);
    }

    batches::set_current_item(&state.db, batch.id, Some(&item.item_id)).await?;

    let attempts = item.attempts + 1;
    let outcome = invoke_worker(state, &item).await;
    let outcome = record_outcome(state, &batch, &item, attempts, outcome).await?;

    batches::set_current_item(&state.db, batch.id, None).await?;

    Ok(TickOutcome::ItemProcessed {
        item_id: item.item_id,
        item_type: item.item_type,
        outcome,
    })
}

enum Located {
    Batch(BatchRecord),
    OrphansFailed(u32),
    Nothing,
}

/// Find the running batch, or run the recovery sweep
///
/// Recovery is scoped strictly by process_type: a stalled batch of one
/// worker family is never resumed (and its items never failed) by another
/// family's tick.
async fn locate_batch(state: &AppState, process_type: &str) -> Result<Located> {
    if let Some(batch) = batches::find_running(&state.db, process_type).await? {
        return Ok(Located::Batch(batch));
    }

    if let Some(batch) = batches::find_reactivatable(&state.db, process_type).await? {
        let resumed = batch.status != BatchStatus::Pending;
        batches::reactivate(&state.db, batch.id).await?;
        if resumed {
            warn!(
                batch_id = %batch.id,
                process_type,
                prior_status = batch.status.as_str(),
                "Reactivated batch that still owned pending items"
            );
        } else {
            info!(batch_id = %batch.id, process_type, "Starting pending batch");
        }
        state.event_bus.emit_or_ignore(ScanEvent::BatchStarted {
            batch_id: batch.id,
            process_type: process_type.to_string(),
            total_items: batch.total_items,
            timestamp: Utc::now(),
        });
        let batch = batches::get_batch(&state.db, batch.id)
            .await?
            .unwrap_or(batch);
        return Ok(Located::Batch(batch));
    }

    // Orphaned items have no batch record left to scope by; failing them
    // is a hard stop, logged distinctly as a data-integrity anomaly
    let orphaned = queue_items::fail_orphaned_pending(&state.db).await?;
    if orphaned > 0 {
        error!(
            process_type,
            orphaned, "Failed pending items referencing missing batch records"
        );
        state.event_bus.emit_or_ignore(ScanEvent::OrphanedItemsFailed {
            process_type: process_type.to_string(),
            count: orphaned,
            timestamp: Utc::now(),
        });
        return Ok(Located::OrphansFailed(orphaned));
    }

    Ok(Located::Nothing)
}

/// Invoke the item's worker under the configured timeout
async fn invoke_worker(
    state: &AppState,
    item: &QueueItem,
) -> std::result::Result<(), WorkerError> {
    let worker = state.workers.get(&item.item_type).ok_or_else(|| {
        WorkerError::poison(format!("no worker registered for item_type '{}'", item.item_type))
    })?;

    let timeout_ms = crate::config::worker_timeout_ms(&state.db).await;

    let work_item = WorkItem {
        item_id: item.item_id.clone(),
        item_type: item.item_type.clone(),
        metadata: item.metadata.clone(),
    };

    match tokio::time::timeout(
        Duration::from_millis(timeout_ms),
        worker.perform(&work_item),
    )
    .await
    {
        Ok(Ok(output)) => {
            if let Some(detail) = output.detail {
                info!(item_id = %item.item_id, detail = %detail, "Worker succeeded");
            }
            Ok(())
        }
        Ok(Err(e)) => Err(e),
        Err(_) => Err(WorkerError::transient(format!(
            "worker timed out after {} ms",
            timeout_ms
        ))),
    }
}

/// Persist the per-item outcome and batch counters
async fn record_outcome(
    state: &AppState,
    batch: &BatchRecord,
    item: &QueueItem,
    attempts: u32,
    outcome: std::result::Result<(), WorkerError>,
) -> Result<ItemOutcome> {
    match outcome {
        Ok(()) => {
            queue_items::mark_completed(&state.db, item.id).await?;
            batches::record_success(&state.db, batch.id).await?;
            info!(
                item_id = %item.item_id,
                item_type = %item.item_type,
                batch_id = %batch.id,
                attempts,
                "Queue item completed"
            );
            state.event_bus.emit_or_ignore(ScanEvent::ItemCompleted {
                batch_id: batch.id,
                item_id: item.item_id.clone(),
                item_type: item.item_type.clone(),
                timestamp: Utc::now(),
            });
            Ok(ItemOutcome::Completed)
        }
        Err(e) if e.is_retryable() && attempts < item.max_attempts => {
            let scheduled_at = Utc::now() + retry_delay(attempts);
            queue_items::reschedule(&state.db, item.id, scheduled_at, &e.message).await?;
            warn!(
                item_id = %item.item_id,
                item_type = %item.item_type,
                batch_id = %batch.id,
                attempts,
                max_attempts = item.max_attempts,
                scheduled_at = %scheduled_at,
                error = %e.message,
                "Queue item failed transiently, rescheduled"
            );
            state.event_bus.emit_or_ignore(ScanEvent::ItemRescheduled {
                batch_id: batch.id,
                item_id: item.item_id.clone(),
                item_type: item.item_type.clone(),
                attempts,
                scheduled_at,
                timestamp: Utc::now(),
            });
            Ok(ItemOutcome::Rescheduled {
                attempts,
                scheduled_at,
            })
        }
        Err(e) => {
            queue_items::mark_failed(&state.db, item.id, &e.message).await?;
            batches::record_failures(&state.db, batch.id, 1).await?;
            error!(
                item_id = %item.item_id,
                item_type = %item.item_type,
                batch_id = %batch.id,
                attempts,
                retryable = e.is_retryable(),
                error = %e.message,
                "Queue item failed terminally"
            );
            state.event_bus.emit_or_ignore(ScanEvent::ItemFailed {
                batch_id: batch.id,
                item_id: item.item_id.clone(),
                item_type: item.item_type.clone(),
                error: e.message.clone(),
                timestamp: Utc::now(),
            });
            Ok(ItemOutcome::Failed)
        }
    }
}

/// Create a batch and its queue items
///
/// Returns the created batch id. The batch starts pending; the first tick
/// moves it to running.
pub async fn enqueue_batch(
    state: &AppState,
    process_type: &str,
    items: Vec<crate::models::NewQueueItem>,
) -> Result<Uuid> {
    let batch = BatchRecord::new(process_type, items.len() as u32);
    let items: Vec<QueueItem> = items
        .into_iter()
        .map(|spec| QueueItem::new(batch.id, spec))
        .collect();

    retry_on_lock("enqueue_batch", || {
        batches::insert_batch_with_items(&state.db, &batch, &items)
    })
    .await?;

    info!(
        batch_id = %batch.id,
        process_type,
        total_items = batch.total_items,
        "Batch enqueued"
    );

    Ok(batch.id)
}
