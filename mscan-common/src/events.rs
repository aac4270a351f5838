//! Event types for the MusicScan event system
//!
//! Provides shared event definitions and the EventBus used by services to
//! broadcast queue progress to SSE subscribers. Event emission is
//! best-effort observability: queue state never depends on a subscriber
//! receiving an event.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// MusicScan back-office event types
///
/// Events are broadcast via EventBus and serialized for SSE transmission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ScanEvent {
    /// A batch began (or resumed) consuming ticks
    BatchStarted {
        batch_id: Uuid,
        process_type: String,
        total_items: u32,
        timestamp: DateTime<Utc>,
    },

    /// A queue item completed successfully
    ItemCompleted {
        batch_id: Uuid,
        item_id: String,
        item_type: String,
        timestamp: DateTime<Utc>,
    },

    /// A queue item failed terminally (poison payload or retries exhausted)
    ItemFailed {
        batch_id: Uuid,
        item_id: String,
        item_type: String,
        error: String,
        timestamp: DateTime<Utc>,
    },

    /// A queue item failed transiently and was rescheduled
    ItemRescheduled {
        batch_id: Uuid,
        item_id: String,
        item_type: String,
        attempts: u32,
        scheduled_at: DateTime<Utc>,
        timestamp: DateTime<Utc>,
    },

    /// No pending or processing items remain; the batch is done
    BatchCompleted {
        batch_id: Uuid,
        process_type: String,
        successful_items: u32,
        failed_items: u32,
        timestamp: DateTime<Utc>,
    },

    /// Pending items referenced a missing batch record and were failed
    ///
    /// Indicates a data-integrity anomaly upstream, logged distinctly
    /// from normal failures.
    OrphanedItemsFailed {
        process_type: String,
        count: u32,
        timestamp: DateTime<Utc>,
    },
}

/// Broadcast event bus shared by a service's components
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ScanEvent>,
}

impl EventBus {
    /// Creates a new EventBus with the specified channel capacity
    ///
    /// Old events are dropped once the buffer fills; subscribers that lag
    /// observe a `Lagged` error and resume from the current position.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<ScanEvent> {
        self.tx.subscribe()
    }

    /// Emit an event, ignoring the case where no subscribers are listening
    ///
    /// Queue progress must not fail because nobody is watching the SSE
    /// stream, so this is the form services use.
    pub fn emit_or_ignore(&self, event: ScanEvent) {
        let _ = self.tx.send(event);
    }

    /// Current subscriber count (for diagnostics)
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
