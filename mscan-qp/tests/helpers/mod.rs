//! Shared test helpers for mscan-qp integration tests

// Each test binary compiles this module separately and uses a subset
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use sqlx::SqlitePool;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use mscan_common::events::EventBus;
use mscan_qp::db::{batches, queue_items};
use mscan_qp::models::{BatchRecord, ItemStatus, NewQueueItem, QueueItem};
use mscan_qp::queue::worker::{WorkItem, Worker, WorkerError, WorkerOutput, WorkerRegistry};
use mscan_qp::AppState;

/// Create an in-memory database with the full service schema
pub async fn test_pool() -> SqlitePool {
    let pool = SqlitePool::connect(":memory:").await.unwrap();
    mscan_common::db::init::create_settings_table(&pool).await.unwrap();
    mscan_qp::db::init_tables(&pool).await.unwrap();
    pool
}

/// Application state wired to an in-memory database and the given workers
pub async fn test_state(workers: WorkerRegistry) -> AppState {
    let pool = test_pool().await;
    AppState::new(pool, EventBus::new(100), workers)
}

/// Worker that replays a script of outcomes and counts invocations
pub struct ScriptedWorker {
    script: Mutex<VecDeque<Result<(), WorkerError>>>,
    pub invocations: AtomicU32,
}

impl ScriptedWorker {
    pub fn new(script: Vec<Result<(), WorkerError>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            invocations: AtomicU32::new(0),
        })
    }

    /// Worker that always succeeds
    pub fn always_ok() -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            invocations: AtomicU32::new(0),
        })
    }

    pub fn invocation_count(&self) -> u32 {
        self.invocations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Worker for ScriptedWorker {
    async fn perform(&self, _item: &WorkItem) -> Result<WorkerOutput, WorkerError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Ok(())) => Ok(WorkerOutput::default()),
            Some(Err(e)) => Err(e),
            // Script exhausted: default to success
            None => Ok(WorkerOutput::default()),
        }
    }
}

/// Worker that never finishes within any test-scale timeout
pub struct HangingWorker;

#[async_trait]
impl Worker for HangingWorker {
    async fn perform(&self, _item: &WorkItem) -> Result<WorkerOutput, WorkerError> {
        tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
        Ok(WorkerOutput::default())
    }
}

/// Registry with one scripted worker registered for the given item types
pub fn registry_with(worker: Arc<ScriptedWorker>, item_types: &[&str]) -> WorkerRegistry {
    let mut registry = WorkerRegistry::new();
    for item_type in item_types {
        registry.register(item_type, worker.clone());
    }
    registry
}

/// Insert a pending batch with explicitly controlled items
pub async fn seed_batch(
    pool: &SqlitePool,
    process_type: &str,
    items: &[SeedItem],
) -> BatchRecord {
    let batch = BatchRecord::new(process_type, items.len() as u32);
    batches::insert_batch(pool, &batch).await.unwrap();

    let base = Utc::now() - Duration::seconds(60);
    for (i, seed) in items.iter().enumerate() {
        let mut item = QueueItem::new(
            batch.id,
            NewQueueItem {
                item_id: Some(seed.item_id.clone()),
                item_type: seed.item_type.clone(),
                priority: seed.priority,
                max_attempts: seed.max_attempts,
                metadata: seed.metadata.clone(),
            },
        );
        // Distinct, ordered created_at values make tie-breaks deterministic
        item.created_at = base + Duration::milliseconds(i as i64 * 100);
        item.scheduled_at = item.created_at;
        item.attempts = seed.attempts;
        queue_items::insert_item(pool, &item).await.unwrap();
    }

    batch
}

/// Seed description for one queue item
pub struct SeedItem {
    pub item_id: String,
    pub item_type: String,
    pub priority: i32,
    pub max_attempts: u32,
    pub attempts: u32,
    pub metadata: Value,
}

impl SeedItem {
    pub fn new(item_id: &str, item_type: &str) -> Self {
        Self {
            item_id: item_id.to_string(),
            item_type: item_type.to_string(),
            priority: 0,
            max_attempts: 3,
            attempts: 0,
            metadata: Value::Null,
        }
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }
}

/// Find a queue item row by its domain item_id
pub async fn item_by_domain_id(pool: &SqlitePool, batch_id: Uuid, item_id: &str) -> QueueItem {
    let rows = sqlx::query_scalar::<_, String>(
        "SELECT id FROM queue_items WHERE batch_id = ? AND item_id = ?",
    )
    .bind(batch_id.to_string())
    .bind(item_id)
    .fetch_all(pool)
    .await
    .unwrap();
    assert_eq!(rows.len(), 1, "expected exactly one row for {}", item_id);
    let id = Uuid::parse_str(&rows[0]).unwrap();
    queue_items::get_item(pool, id).await.unwrap().unwrap()
}

/// Force an item's scheduled_at into the past so the next tick can claim it
pub async fn make_eligible(pool: &SqlitePool, id: Uuid) {
    sqlx::query("UPDATE queue_items SET scheduled_at = ? WHERE id = ?")
        .bind((Utc::now() - Duration::seconds(1)).to_rfc3339())
        .bind(id.to_string())
        .execute(pool)
        .await
        .unwrap();
}

/// Assert a timestamp lies within `tolerance_secs` of `expected`
pub fn assert_close(actual: DateTime<Utc>, expected: DateTime<Utc>, tolerance_secs: i64) {
    let delta = (actual - expected).num_seconds().abs();
    assert!(
        delta <= tolerance_secs,
        "timestamp {} not within {}s of {}",
        actual,
        tolerance_secs,
        expected
    );
}

/// Shorthand for asserting an item's persisted status
pub async fn assert_status(pool: &SqlitePool, id: Uuid, expected: ItemStatus) {
    let item = queue_items::get_item(pool, id).await.unwrap().unwrap();
    assert_eq!(item.status, expected, "item {} status", id);
}
