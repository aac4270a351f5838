//! Database initialization
//!
//! Opens or creates the shared SQLite database with the pragmas all
//! services rely on, and creates the tables common to every service.
//! Initialization is idempotent; services call their own table init on
//! top of this.

use crate::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::info;

/// Initialize database connection and create shared tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // mode=rwc: read, write, create
    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(20)
        .min_connections(5)
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    configure_pragmas(&pool).await?;
    create_settings_table(&pool).await?;

    Ok(pool)
}

/// Apply the pragmas required for concurrent service access
pub async fn configure_pragmas(pool: &SqlitePool) -> Result<()> {
    sqlx::query("PRAGMA foreign_keys = ON").execute(pool).await?;

    // WAL allows concurrent readers alongside the single writer, which
    // matters when the tick handler and the status endpoint overlap
    sqlx::query("PRAGMA journal_mode = WAL").execute(pool).await?;

    sqlx::query("PRAGMA busy_timeout = 5000").execute(pool).await?;

    Ok(())
}

/// Create the settings key/value table
///
/// Settings are the authoritative store for runtime-configurable values
/// (API keys, timeouts); TOML files and environment variables act as
/// fallback and durable backup.
pub async fn create_settings_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Read a setting value, returning None when unset
pub async fn get_setting(pool: &SqlitePool, key: &str) -> Result<Option<String>> {
    let value: Option<String> =
        sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(pool)
            .await?;
    Ok(value)
}

/// Write a setting value (upsert)
pub async fn set_setting(pool: &SqlitePool, key: &str, value: &str) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO settings (key, value) VALUES (?, ?)
        ON CONFLICT(key) DO UPDATE SET value = excluded.value
        "#,
    )
    .bind(key)
    .bind(value)
    .execute(pool)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn init_creates_database_and_settings_table() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("mscan.db");

        let pool = init_database(&db_path).await.unwrap();
        assert!(db_path.exists());

        assert_eq!(get_setting(&pool, "missing").await.unwrap(), None);

        set_setting(&pool, "qp_worker_timeout_ms", "120000").await.unwrap();
        assert_eq!(
            get_setting(&pool, "qp_worker_timeout_ms").await.unwrap(),
            Some("120000".to_string())
        );
    }

    #[tokio::test]
    async fn init_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("mscan.db");

        let pool = init_database(&db_path).await.unwrap();
        set_setting(&pool, "key", "value").await.unwrap();
        pool.close().await;

        // Reopen the same database; existing data survives
        let pool2 = init_database(&db_path).await.unwrap();
        assert_eq!(
            get_setting(&pool2, "key").await.unwrap(),
            Some("value".to_string())
        );
    }
}
