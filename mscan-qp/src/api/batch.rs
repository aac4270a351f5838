//! Batch queue API handlers
//!
//! The tick endpoint is what the external scheduler hits on its interval;
//! the same endpoint doubles as a command surface (status query,
//! retry_failed) for the admin dashboard.

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::{batches, queue_items};
use crate::error::{ApiError, ApiResult};
use crate::models::{BatchRecord, ItemOutcome, NewQueueItem, QueueStats, TickOutcome};
use crate::queue::tick::{enqueue_batch, run_tick};
use crate::AppState;

/// Commands accepted by the tick endpoint
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TickAction {
    #[default]
    Tick,
    Status,
    RetryFailed,
}

/// POST /batch/{process_type}/tick request (body optional)
#[derive(Debug, Default, Deserialize)]
pub struct TickRequest {
    #[serde(default)]
    pub action: TickAction,
    /// retry_failed only: reset attempts to 0 (full amnesty, the default)
    /// or leave them as-is (one more try)
    #[serde(default = "default_reset_attempts")]
    pub reset_attempts: bool,
}

fn default_reset_attempts() -> bool {
    true
}

/// Tick response
#[derive(Debug, Serialize)]
pub struct TickResponse {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_type: Option<String>,
}

/// Status response: the latest batch plus item counts by status
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub process_type: String,
    pub batch: Option<BatchRecord>,
    pub queue_stats: QueueStats,
}

/// retry_failed response
#[derive(Debug, Serialize)]
pub struct RetryFailedResponse {
    pub reset_count: u32,
}

/// Enqueue request
#[derive(Debug, Deserialize)]
pub struct EnqueueRequest {
    pub items: Vec<NewQueueItem>,
}

/// Enqueue response
#[derive(Debug, Serialize)]
pub struct EnqueueResponse {
    pub batch_id: Uuid,
    pub total_items: u32,
}

/// POST /batch/{process_type}/tick
pub async fn tick_handler(
    State(state): State<AppState>,
    Path(process_type): Path<String>,
    body: Option<Json<TickRequest>>,
) -> ApiResult<axum::response::Response> {
    use axum::response::IntoResponse;

    let request = body.map(|Json(r)| r).unwrap_or_default();

    match request.action {
        TickAction::Tick => {
            let outcome = execute_tick(&state, &process_type).await?;
            Ok(Json(outcome).into_response())
        }
        TickAction::Status => {
            let status = batch_status(&state, &process_type).await?;
            Ok(Json(status).into_response())
        }
        TickAction::RetryFailed => {
            let response = retry_failed(&state, &process_type, request.reset_attempts).await?;
            Ok(Json(response).into_response())
        }
    }
}

/// GET /batch/{process_type}/status
pub async fn status_handler(
    State(state): State<AppState>,
    Path(process_type): Path<String>,
) -> ApiResult<Json<StatusResponse>> {
    Ok(Json(batch_status(&state, &process_type).await?))
}

/// POST /batch/{process_type}/enqueue
///
/// Creates a batch plus its queue items. One batch per process type may
/// be pending or running at a time.
pub async fn enqueue_handler(
    State(state): State<AppState>,
    Path(process_type): Path<String>,
    Json(request): Json<EnqueueRequest>,
) -> ApiResult<Json<EnqueueResponse>> {
    if request.items.is_empty() {
        return Err(ApiError::BadRequest("items must not be empty".to_string()));
    }
    for item in &request.items {
        if item.item_type.trim().is_empty() {
            return Err(ApiError::BadRequest("item_type must not be empty".to_string()));
        }
    }

    if let Some(active) = batches::find_active(&state.db, &process_type).await? {
        return Err(ApiError::Conflict(format!(
            "Batch already {} for process type '{}': {}",
            active.status.as_str(),
            process_type,
            active.id
        )));
    }

    let total_items = request.items.len() as u32;
    let batch_id = enqueue_batch(&state, &process_type, request.items).await?;

    Ok(Json(EnqueueResponse {
        batch_id,
        total_items,
    }))
}

async fn execute_tick(state: &AppState, process_type: &str) -> ApiResult<TickResponse> {
    let outcome = match run_tick(state, process_type).await {
        Ok(outcome) => outcome,
        Err(e) => {
            // Infrastructure failure: surface as 5xx so the scheduler's
            // own alerting reacts
            *state.last_error.write().await = Some(e.to_string());
            return Err(ApiError::Common(e));
        }
    };

    let response = match outcome {
        TickOutcome::Idle => TickResponse {
            message: "no active batch and no pending items".to_string(),
            item_id: None,
            item_type: None,
        },
        TickOutcome::Waiting => TickResponse {
            message: "nothing claimable this tick".to_string(),
            item_id: None,
            item_type: None,
        },
        TickOutcome::BatchCompleted { batch_id } => TickResponse {
            message: format!("batch {} completed", batch_id),
            item_id: None,
            item_type: None,
        },
        TickOutcome::OrphanedItemsFailed { count } => TickResponse {
            message: format!("failed {} orphaned items", count),
            item_id: None,
            item_type: None,
        },
        TickOutcome::ItemProcessed {
            item_id,
            item_type,
            outcome,
        } => {
            let message = match outcome {
                ItemOutcome::Completed => "item completed".to_string(),
                ItemOutcome::Rescheduled { attempts, scheduled_at } => format!(
                    "item rescheduled after attempt {} for {}",
                    attempts, scheduled_at
                ),
                ItemOutcome::Failed => "item failed".to_string(),
            };
            TickResponse {
                message,
                item_id: Some(item_id),
                item_type: Some(item_type),
            }
        }
    };

    Ok(response)
}

async fn batch_status(state: &AppState, process_type: &str) -> ApiResult<StatusResponse> {
    // Prefer the running batch; otherwise report the most recent one of
    // any status, so a completed batch's counters stay visible
    let batch = latest_batch(state, process_type).await?;

    let queue_stats = match &batch {
        Some(batch) => queue_items::stats_for_batch(&state.db, batch.id).await?,
        None => QueueStats::default(),
    };

    Ok(StatusResponse {
        process_type: process_type.to_string(),
        batch,
        queue_stats,
    })
}

async fn retry_failed(
    state: &AppState,
    process_type: &str,
    reset_attempts: bool,
) -> ApiResult<RetryFailedResponse> {
    // retry_failed applies to the most recent batch of the process type,
    // completed or not
    let batch = latest_batch(state, process_type)
        .await?
        .ok_or_else(|| {
            ApiError::NotFound(format!("No batch found for process type '{}'", process_type))
        })?;

    let reset_count = queue_items::reset_failed(&state.db, batch.id, reset_attempts).await?;
    if reset_count > 0 {
        batches::reopen_for_retry(&state.db, batch.id, reset_count).await?;
        tracing::info!(
            batch_id = %batch.id,
            process_type,
            reset_count,
            reset_attempts,
            "Reset failed items back to pending"
        );
    }

    Ok(RetryFailedResponse { reset_count })
}

async fn latest_batch(
    state: &AppState,
    process_type: &str,
) -> Result<Option<BatchRecord>, mscan_common::Error> {
    if let Some(batch) = batches::find_running(&state.db, process_type).await? {
        return Ok(Some(batch));
    }
    batches::find_latest(&state.db, process_type).await
}

/// Build batch queue routes
pub fn batch_routes() -> Router<AppState> {
    Router::new()
        .route("/batch/:process_type/tick", post(tick_handler))
        .route("/batch/:process_type/status", get(status_handler))
        .route("/batch/:process_type/enqueue", post(enqueue_handler))
}
