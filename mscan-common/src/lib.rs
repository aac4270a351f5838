//! # MusicScan Common Library
//!
//! Shared code for the MusicScan back-office services including:
//! - Error types
//! - Configuration loading and root folder resolution
//! - Database initialization
//! - Event types (ScanEvent enum) and EventBus
//! - SSE utilities

pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod sse;

pub use error::{Error, Result};
