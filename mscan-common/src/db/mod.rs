//! Shared database access for MusicScan services

pub mod init;

pub use init::init_database;
