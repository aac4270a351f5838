//! Worker interface
//!
//! A worker is the domain-specific unit-of-work capability invoked once
//! per claimed queue item. The tick handler treats workers as opaque:
//! input is the item's payload, output is success or a typed error whose
//! kind drives the retry policy. Free-text error matching is deliberately
//! avoided; the poison/transient split is carried in the type.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Domain payload handed to a worker
#[derive(Debug, Clone)]
pub struct WorkItem {
    /// Identifier of the domain entity being processed
    pub item_id: String,
    /// Kind of work, e.g. "blog_post"
    pub item_type: String,
    /// Free-form payload (artist name, prompt hints, ...)
    pub metadata: Value,
}

/// Error classification driving the retry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerErrorKind {
    /// The payload can never succeed as-is (missing required fields);
    /// never retried, since retrying a structurally incomplete input only
    /// burns quota against the external API
    Poison,
    /// Network failure, rate limit, timeout, transient upstream error;
    /// retried per backoff until attempts are exhausted
    Transient,
}

/// Typed worker failure
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct WorkerError {
    pub kind: WorkerErrorKind,
    pub message: String,
}

impl WorkerError {
    pub fn poison(message: impl Into<String>) -> Self {
        Self {
            kind: WorkerErrorKind::Poison,
            message: message.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: WorkerErrorKind::Transient,
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind == WorkerErrorKind::Transient
    }
}

/// Successful worker output
///
/// The queue does not interpret the detail; it is logged and discarded.
/// Workers persist their own results (generated stories land in their
/// content tables).
#[derive(Debug, Clone, Default)]
pub struct WorkerOutput {
    pub detail: Option<String>,
}

/// Unit-of-work capability invoked by the tick handler
#[async_trait]
pub trait Worker: Send + Sync {
    async fn perform(&self, item: &WorkItem) -> Result<WorkerOutput, WorkerError>;
}

/// Workers keyed by item_type
#[derive(Default)]
pub struct WorkerRegistry {
    workers: HashMap<String, Arc<dyn Worker>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a worker for an item type, replacing any previous one
    pub fn register(&mut self, item_type: &str, worker: Arc<dyn Worker>) {
        self.workers.insert(item_type.to_string(), worker);
    }

    pub fn get(&self, item_type: &str) -> Option<Arc<dyn Worker>> {
        self.workers.get(item_type).cloned()
    }

    pub fn registered_types(&self) -> Vec<&str> {
        self.workers.keys().map(String::as_str).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoWorker;

    #[async_trait]
    impl Worker for EchoWorker {
        async fn perform(&self, item: &WorkItem) -> Result<WorkerOutput, WorkerError> {
            Ok(WorkerOutput {
                detail: Some(item.item_id.clone()),
            })
        }
    }

    #[tokio::test]
    async fn registry_dispatches_by_item_type() {
        let mut registry = WorkerRegistry::new();
        registry.register("blog_post", Arc::new(EchoWorker));

        let worker = registry.get("blog_post").expect("registered worker");
        let output = worker
            .perform(&WorkItem {
                item_id: "post-1".to_string(),
                item_type: "blog_post".to_string(),
                metadata: Value::Null,
            })
            .await
            .unwrap();
        assert_eq!(output.detail.as_deref(), Some("post-1"));

        assert!(registry.get("composer_story").is_none());
    }

    #[test]
    fn error_kinds_drive_retryability() {
        assert!(WorkerError::transient("rate limited").is_retryable());
        assert!(!WorkerError::poison("missing artist name").is_retryable());
    }
}
