//! Batch queue processing core
//!
//! The tick handler performs exactly one unit of queue progress per
//! invocation and is driven by an external scheduler hitting the tick
//! endpoint. One worker invocation per tick bounds external API usage to
//! one unit of work per scheduler interval.

pub mod backoff;
pub mod tick;
pub mod worker;

pub use tick::run_tick;
pub use worker::{WorkItem, Worker, WorkerError, WorkerErrorKind, WorkerRegistry};
