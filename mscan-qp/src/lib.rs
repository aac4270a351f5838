//! mscan-qp library interface for testing
//!
//! Exposes public APIs for integration testing

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod queue;
pub mod services;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::queue::worker::WorkerRegistry;
use mscan_common::events::EventBus;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: SqlitePool,
    /// Event bus for SSE broadcasting
    pub event_bus: EventBus,
    /// Workers keyed by item_type
    pub workers: Arc<WorkerRegistry>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
    /// Last error for diagnostic purposes
    pub last_error: Arc<RwLock<Option<String>>>,
}

impl AppState {
    pub fn new(db: SqlitePool, event_bus: EventBus, workers: WorkerRegistry) -> Self {
        Self {
            db,
            event_bus,
            workers: Arc::new(workers),
            startup_time: Utc::now(),
            last_error: Arc::new(RwLock::new(None)),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::get;

    Router::new()
        .merge(api::batch_routes())
        .merge(api::matrix_routes())
        .merge(api::health_routes())
        .route("/events", get(api::event_stream))
        .with_state(state)
}
