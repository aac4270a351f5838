//! Tick handler integration tests
//!
//! Exercise the claim ordering, retry/backoff policy, attempt ceiling,
//! and batch completion accounting against a real (in-memory) database.

mod helpers;

use chrono::{Duration, Utc};
use std::sync::Arc;

use mscan_common::db::init::set_setting;
use mscan_qp::config::WORKER_TIMEOUT_SETTING;
use mscan_qp::db::{batches, queue_items};
use mscan_qp::models::{
    BatchRecord, BatchStatus, ItemOutcome, ItemStatus, NewQueueItem, QueueItem, TickOutcome,
};
use mscan_qp::queue::tick::run_tick;
use mscan_qp::queue::worker::{WorkerError, WorkerRegistry};
use serde_json::Value;

use helpers::{
    assert_close, assert_status, item_by_domain_id, make_eligible, registry_with, seed_batch,
    test_pool, test_state, HangingWorker, ScriptedWorker, SeedItem,
};

fn processed_id(outcome: &TickOutcome) -> &str {
    match outcome {
        TickOutcome::ItemProcessed { item_id, .. } => item_id,
        other => panic!("expected ItemProcessed, got {:?}", other),
    }
}

#[tokio::test]
async fn claims_by_priority_then_created_at() {
    let worker = ScriptedWorker::always_ok();
    let state = test_state(registry_with(worker.clone(), &["demo"])).await;

    // A and C share a priority; A was created first
    seed_batch(
        &state.db,
        "blog_generation",
        &[
            SeedItem::new("item-a", "demo").priority(1),
            SeedItem::new("item-b", "demo").priority(5),
            SeedItem::new("item-c", "demo").priority(1),
        ],
    )
    .await;

    let first = run_tick(&state, "blog_generation").await.unwrap();
    assert_eq!(processed_id(&first), "item-b");

    let second = run_tick(&state, "blog_generation").await.unwrap();
    assert_eq!(processed_id(&second), "item-a");

    let third = run_tick(&state, "blog_generation").await.unwrap();
    assert_eq!(processed_id(&third), "item-c");

    assert_eq!(worker.invocation_count(), 3);
}

#[tokio::test]
async fn poison_failure_is_terminal_on_first_attempt() {
    let worker = ScriptedWorker::new(vec![Err(WorkerError::poison("missing composer name"))]);
    let state = test_state(registry_with(worker.clone(), &["composer_story"])).await;

    let batch = seed_batch(
        &state.db,
        "composer_story_gen",
        &[SeedItem::new("composer-1", "composer_story")],
    )
    .await;

    let outcome = run_tick(&state, "composer_story_gen").await.unwrap();
    match outcome {
        TickOutcome::ItemProcessed { outcome, .. } => {
            assert_eq!(outcome, ItemOutcome::Failed);
        }
        other => panic!("expected ItemProcessed, got {:?}", other),
    }

    let item = item_by_domain_id(&state.db, batch.id, "composer-1").await;
    assert_eq!(item.status, ItemStatus::Failed);
    assert_eq!(item.attempts, 1);
    assert_eq!(item.error_message.as_deref(), Some("missing composer name"));
    assert_eq!(worker.invocation_count(), 1);

    let batch = batches::get_batch(&state.db, batch.id).await.unwrap().unwrap();
    assert_eq!(batch.processed_items, 1);
    assert_eq!(batch.failed_items, 1);
    assert_eq!(batch.successful_items, 0);
}

#[tokio::test]
async fn transient_failures_reschedule_then_exhaust() {
    let worker = ScriptedWorker::new(vec![
        Err(WorkerError::transient("rate limited")),
        Err(WorkerError::transient("rate limited")),
        Err(WorkerError::transient("rate limited")),
    ]);
    let state = test_state(registry_with(worker.clone(), &["blog_post"])).await;

    let batch = seed_batch(
        &state.db,
        "blog_generation",
        &[SeedItem::new("post-1", "blog_post").max_attempts(3)],
    )
    .await;

    // Attempt 1: rescheduled 5 minutes out
    let outcome = run_tick(&state, "blog_generation").await.unwrap();
    match outcome {
        TickOutcome::ItemProcessed {
            outcome: ItemOutcome::Rescheduled { attempts, scheduled_at },
            ..
        } => {
            assert_eq!(attempts, 1);
            assert_close(scheduled_at, Utc::now() + Duration::minutes(5), 5);
        }
        other => panic!("expected reschedule, got {:?}", other),
    }

    let item = item_by_domain_id(&state.db, batch.id, "post-1").await;
    assert_eq!(item.status, ItemStatus::Pending);
    assert_eq!(item.attempts, 1);

    // The delayed item is not claimable yet
    let outcome = run_tick(&state, "blog_generation").await.unwrap();
    assert_eq!(outcome, TickOutcome::Waiting);
    assert_eq!(worker.invocation_count(), 1);

    // Attempt 2: rescheduled 10 minutes out
    make_eligible(&state.db, item.id).await;
    let outcome = run_tick(&state, "blog_generation").await.unwrap();
    match outcome {
        TickOutcome::ItemProcessed {
            outcome: ItemOutcome::Rescheduled { attempts, scheduled_at },
            ..
        } => {
            assert_eq!(attempts, 2);
            assert_close(scheduled_at, Utc::now() + Duration::minutes(10), 5);
        }
        other => panic!("expected reschedule, got {:?}", other),
    }

    // Attempt 3 hits max_attempts: failed, no further reschedule
    make_eligible(&state.db, item.id).await;
    let outcome = run_tick(&state, "blog_generation").await.unwrap();
    match outcome {
        TickOutcome::ItemProcessed { outcome, .. } => {
            assert_eq!(outcome, ItemOutcome::Failed);
        }
        other => panic!("expected ItemProcessed, got {:?}", other),
    }

    let item = item_by_domain_id(&state.db, batch.id, "post-1").await;
    assert_eq!(item.status, ItemStatus::Failed);
    assert_eq!(item.attempts, 3);
    assert_eq!(worker.invocation_count(), 3);

    // Nothing pending or processing remains: the next tick completes
    let outcome = run_tick(&state, "blog_generation").await.unwrap();
    assert_eq!(outcome, TickOutcome::BatchCompleted { batch_id: batch.id });

    let batch = batches::get_batch(&state.db, batch.id).await.unwrap().unwrap();
    assert_eq!(batch.status, BatchStatus::Completed);
    assert_eq!(batch.processed_items, batch.successful_items + batch.failed_items);
    assert_eq!(batch.failed_items, 1);
}

#[tokio::test]
async fn exhausted_pending_item_is_swept_without_worker_invocation() {
    let worker = ScriptedWorker::always_ok();
    let state = test_state(registry_with(worker.clone(), &["demo"])).await;

    // An interrupted run left a pending item that already burned all its
    // attempts; the sweep must fail it instead of claiming it
    let batch = seed_batch(
        &state.db,
        "blog_generation",
        &[SeedItem::new("stale-1", "demo").attempts(3).max_attempts(3)],
    )
    .await;

    let outcome = run_tick(&state, "blog_generation").await.unwrap();
    assert_eq!(outcome, TickOutcome::BatchCompleted { batch_id: batch.id });
    assert_eq!(worker.invocation_count(), 0);

    let item = item_by_domain_id(&state.db, batch.id, "stale-1").await;
    assert_eq!(item.status, ItemStatus::Failed);
    assert_eq!(item.error_message.as_deref(), Some("max attempts exhausted"));

    let batch = batches::get_batch(&state.db, batch.id).await.unwrap().unwrap();
    assert_eq!(batch.failed_items, 1);
    assert_eq!(batch.processed_items, 1);
}

#[tokio::test]
async fn failed_item_stays_failed_across_ticks() {
    let worker = ScriptedWorker::new(vec![Err(WorkerError::poison("bad payload"))]);
    let state = test_state(registry_with(worker.clone(), &["demo"])).await;

    let batch = seed_batch(
        &state.db,
        "blog_generation",
        &[SeedItem::new("item-1", "demo")],
    )
    .await;

    run_tick(&state, "blog_generation").await.unwrap();
    assert_status(
        &state.db,
        item_by_domain_id(&state.db, batch.id, "item-1").await.id,
        ItemStatus::Failed,
    )
    .await;

    run_tick(&state, "blog_generation").await.unwrap();
    let outcome = run_tick(&state, "blog_generation").await.unwrap();
    assert_eq!(outcome, TickOutcome::Idle);

    let item = item_by_domain_id(&state.db, batch.id, "item-1").await;
    assert_eq!(item.status, ItemStatus::Failed);
    assert_eq!(item.attempts, 1);
    assert_eq!(worker.invocation_count(), 1);
}

#[tokio::test]
async fn second_claim_of_same_item_loses() {
    let state = test_state(registry_with(ScriptedWorker::always_ok(), &["demo"])).await;
    let batch = seed_batch(
        &state.db,
        "blog_generation",
        &[SeedItem::new("item-1", "demo")],
    )
    .await;

    let item = item_by_domain_id(&state.db, batch.id, "item-1").await;

    assert!(queue_items::try_claim(&state.db, item.id).await.unwrap());
    assert!(!queue_items::try_claim(&state.db, item.id).await.unwrap());

    let item = item_by_domain_id(&state.db, batch.id, "item-1").await;
    assert_eq!(item.status, ItemStatus::Processing);
    assert_eq!(item.attempts, 1);
}

#[tokio::test]
async fn batch_counters_balance_at_completion() {
    let worker = ScriptedWorker::new(vec![
        Ok(()),
        Err(WorkerError::poison("bad payload")),
        Ok(()),
    ]);
    let state = test_state(registry_with(worker, &["demo"])).await;

    let batch = seed_batch(
        &state.db,
        "blog_generation",
        &[
            SeedItem::new("item-1", "demo"),
            SeedItem::new("item-2", "demo"),
            SeedItem::new("item-3", "demo"),
        ],
    )
    .await;

    loop {
        match run_tick(&state, "blog_generation").await.unwrap() {
            TickOutcome::BatchCompleted { .. } => break,
            TickOutcome::ItemProcessed { .. } => {}
            other => panic!("unexpected outcome while draining: {:?}", other),
        }
    }

    let batch = batches::get_batch(&state.db, batch.id).await.unwrap().unwrap();
    assert_eq!(batch.status, BatchStatus::Completed);
    assert!(batch.completed_at.is_some());
    assert_eq!(batch.processed_items, 3);
    assert_eq!(batch.successful_items, 2);
    assert_eq!(batch.failed_items, 1);
    assert_eq!(batch.processed_items, batch.successful_items + batch.failed_items);
    assert!(batch.current_item.is_none());
}

#[tokio::test]
async fn missing_worker_fails_item_as_unprocessable() {
    // No worker registered for the item type at all
    let state = test_state(registry_with(ScriptedWorker::always_ok(), &["other_type"])).await;

    let batch = seed_batch(
        &state.db,
        "blog_generation",
        &[SeedItem::new("item-1", "unknown_type")],
    )
    .await;

    let outcome = run_tick(&state, "blog_generation").await.unwrap();
    match outcome {
        TickOutcome::ItemProcessed { outcome, .. } => {
            assert_eq!(outcome, ItemOutcome::Failed);
        }
        other => panic!("expected ItemProcessed, got {:?}", other),
    }

    let item = item_by_domain_id(&state.db, batch.id, "item-1").await;
    assert_eq!(item.status, ItemStatus::Failed);
    assert_eq!(item.attempts, 1);
    assert!(item
        .error_message
        .unwrap()
        .contains("no worker registered"));
}

#[tokio::test]
async fn hung_worker_times_out_and_is_rescheduled() {
    let mut registry = WorkerRegistry::new();
    registry.register("demo", Arc::new(HangingWorker));
    let state = test_state(registry).await;

    // Shrink the per-invocation timeout so the hang trips it quickly
    set_setting(&state.db, WORKER_TIMEOUT_SETTING, "50").await.unwrap();

    let batch = seed_batch(
        &state.db,
        "blog_generation",
        &[SeedItem::new("item-1", "demo")],
    )
    .await;

    let outcome = run_tick(&state, "blog_generation").await.unwrap();
    match outcome {
        TickOutcome::ItemProcessed {
            outcome: ItemOutcome::Rescheduled { attempts, scheduled_at },
            ..
        } => {
            assert_eq!(attempts, 1);
            assert_close(scheduled_at, Utc::now() + Duration::minutes(5), 5);
        }
        other => panic!("expected timeout reschedule, got {:?}", other),
    }

    let item = item_by_domain_id(&state.db, batch.id, "item-1").await;
    assert_eq!(item.status, ItemStatus::Pending);
    assert_eq!(item.attempts, 1);
    assert!(item.error_message.unwrap().contains("timed out"));
}

#[tokio::test]
async fn enqueue_rolls_back_when_an_item_insert_fails() {
    let pool = test_pool().await;

    let batch = BatchRecord::new("blog_generation", 2);
    let first = QueueItem::new(
        batch.id,
        NewQueueItem {
            item_id: Some("item-1".to_string()),
            item_type: "demo".to_string(),
            priority: 0,
            max_attempts: 3,
            metadata: Value::Null,
        },
    );
    // Same primary key as the first item: the second insert must fail
    let mut duplicate = first.clone();
    duplicate.item_id = "item-2".to_string();

    let result = batches::insert_batch_with_items(&pool, &batch, &[first, duplicate]).await;
    assert!(result.is_err());

    // Nothing of the batch survives, so no tick can drain a partial batch
    let batch_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM batch_records")
        .fetch_one(&pool)
        .await
        .unwrap();
    let item_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM queue_items")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(batch_count, 0);
    assert_eq!(item_count, 0);
}
