//! Queue domain models
//!
//! A QueueItem is one persisted unit of work; a BatchRecord is the
//! aggregate for one run of a process type, owning many items. Both live
//! in the shared database and are the sole source of truth for queue
//! state: "the current batch" is discovered by query, never held in
//! memory across ticks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Queue item lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Pending,
    Processing,
    Completed,
    /// Terminal: a failed item never transitions again (except via the
    /// administrative retry_failed action)
    Failed,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Pending => "pending",
            ItemStatus::Processing => "processing",
            ItemStatus::Completed => "completed",
            ItemStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ItemStatus::Pending),
            "processing" => Some(ItemStatus::Processing),
            "completed" => Some(ItemStatus::Completed),
            "failed" => Some(ItemStatus::Failed),
            _ => None,
        }
    }
}

/// Batch lifecycle states
///
/// There is no failed terminal state: a batch completes even when
/// individual items failed; the counters carry the outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Pending,
    Running,
    Completed,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Pending => "pending",
            BatchStatus::Running => "running",
            BatchStatus::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(BatchStatus::Pending),
            "running" => Some(BatchStatus::Running),
            "completed" => Some(BatchStatus::Completed),
            _ => None,
        }
    }
}

/// One persisted unit of work
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: Uuid,
    /// Owning batch record
    pub batch_id: Uuid,
    /// Identifier of the domain entity being processed (foreign id, or a
    /// generated UUID when the payload is carried entirely in metadata)
    pub item_id: String,
    /// Kind of work, e.g. "blog_post", "composer_story", "artist_story"
    pub item_type: String,
    pub status: ItemStatus,
    /// Processing attempts so far; incremented when an item is claimed
    pub attempts: u32,
    /// Ceiling on attempts before permanent failure
    pub max_attempts: u32,
    /// Higher priority is claimed first
    pub priority: i32,
    /// Free-form payload for the worker
    pub metadata: Value,
    /// Last failure reason
    pub error_message: Option<String>,
    /// Earliest time eligible for (re)processing; delayed retries push
    /// this into the future
    pub scheduled_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl QueueItem {
    /// Build a fresh pending item for a batch
    pub fn new(batch_id: Uuid, spec: NewQueueItem) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            batch_id,
            item_id: spec.item_id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            item_type: spec.item_type,
            status: ItemStatus::Pending,
            attempts: 0,
            max_attempts: spec.max_attempts,
            priority: spec.priority,
            metadata: spec.metadata,
            error_message: None,
            scheduled_at: now,
            created_at: now,
            processed_at: None,
            updated_at: now,
        }
    }
}

/// Caller-supplied description of an item to enqueue
#[derive(Debug, Clone, Deserialize)]
pub struct NewQueueItem {
    #[serde(default)]
    pub item_id: Option<String>,
    pub item_type: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default)]
    pub metadata: Value,
}

fn default_max_attempts() -> u32 {
    3
}

/// Aggregate record for one run of a process type
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRecord {
    pub id: Uuid,
    /// Worker family owning this batch, e.g. "blog_generation";
    /// recovery is scoped strictly to this tag
    pub process_type: String,
    pub status: BatchStatus,
    pub total_items: u32,
    pub processed_items: u32,
    pub successful_items: u32,
    pub failed_items: u32,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Liveness signal refreshed on every tick; external monitors alarm
    /// on staleness
    pub last_heartbeat: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Snapshot of the item currently claimed, for observability only
    pub current_item: Option<String>,
}

impl BatchRecord {
    pub fn new(process_type: &str, total_items: u32) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            process_type: process_type.to_string(),
            status: BatchStatus::Pending,
            total_items,
            processed_items: 0,
            successful_items: 0,
            failed_items: 0,
            started_at: now,
            completed_at: None,
            last_heartbeat: now,
            updated_at: now,
            current_item: None,
        }
    }
}

/// Queue item counts grouped by status, for the status endpoint
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: u32,
    pub processing: u32,
    pub completed: u32,
    pub failed: u32,
}

/// Per-item outcome of a tick that processed an item
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "result")]
pub enum ItemOutcome {
    Completed,
    /// Transient failure; the item went back to pending with a delayed
    /// scheduled_at
    Rescheduled {
        attempts: u32,
        scheduled_at: DateTime<Utc>,
    },
    Failed,
}

/// Result of one tick handler invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// No batch and no recoverable pending items
    Idle,
    /// Nothing claimable right now (items mid-flight or scheduled in the
    /// future)
    Waiting,
    /// No pending or processing items remained; the batch was completed
    BatchCompleted { batch_id: Uuid },
    /// Orphaned pending items were failed; no worker was invoked
    OrphanedItemsFailed { count: u32 },
    /// One item was claimed and processed
    ItemProcessed {
        item_id: String,
        item_type: String,
        outcome: ItemOutcome,
    },
}
