//! Configuration resolution for mscan-qp
//!
//! Provides multi-tier configuration resolution with Database → ENV → TOML
//! priority. The database is authoritative; the environment and TOML file
//! act as bootstrap and durable backup.

use sqlx::SqlitePool;
use tracing::{info, warn};

use mscan_common::config::TomlConfig;
use mscan_common::db::init::{get_setting, set_setting};
use mscan_common::{Error, Result};

/// Settings key holding the story-generation API key
pub const STORY_API_KEY_SETTING: &str = "qp_story_api_key";

/// Settings key holding the per-invocation worker timeout
pub const WORKER_TIMEOUT_SETTING: &str = "qp_worker_timeout_ms";

/// Default worker timeout when unset: a hanging AI generation call must
/// not block the tick cadence indefinitely
pub const DEFAULT_WORKER_TIMEOUT_MS: u64 = 120_000;

/// Resolve the story-generation API key from 3-tier configuration
///
/// Priority: Database → ENV (`MSCAN_STORY_API_KEY`) → TOML
pub async fn resolve_story_api_key(db: &SqlitePool, toml_config: &TomlConfig) -> Result<String> {
    let mut sources = Vec::new();

    let db_key = get_setting(db, STORY_API_KEY_SETTING).await?;
    if db_key.as_deref().is_some_and(is_valid_key) {
        sources.push("database");
    }

    let env_key = std::env::var("MSCAN_STORY_API_KEY").ok();
    if env_key.as_deref().is_some_and(is_valid_key) {
        sources.push("environment");
    }

    let toml_key = toml_config.story_api_key.as_ref();
    if toml_key.map(String::as_str).is_some_and(is_valid_key) {
        sources.push("TOML");
    }

    if sources.len() > 1 {
        warn!(
            "Story API key found in multiple sources: {}. Using database (highest priority).",
            sources.join(", ")
        );
    }

    if let Some(key) = db_key {
        if is_valid_key(&key) {
            info!("Story API key loaded from database");
            return Ok(key);
        }
    }

    if let Some(key) = env_key {
        if is_valid_key(&key) {
            info!("Story API key loaded from environment variable");
            // Migrate into the authoritative store for next startup
            set_setting(db, STORY_API_KEY_SETTING, &key).await?;
            return Ok(key);
        }
    }

    if let Some(key) = toml_key {
        if is_valid_key(key) {
            info!("Story API key loaded from TOML config");
            set_setting(db, STORY_API_KEY_SETTING, key).await?;
            return Ok(key.clone());
        }
    }

    Err(Error::Config(
        "Story API key not configured. Configure using one of:\n\
         1. Environment: MSCAN_STORY_API_KEY=your-key-here\n\
         2. TOML config: ~/.config/musicscan/mscan-qp.toml (story_api_key = \"your-key\")"
            .to_string(),
    ))
}

/// Validate an API key (non-empty, non-whitespace)
pub fn is_valid_key(key: &str) -> bool {
    !key.trim().is_empty()
}

/// Per-invocation worker timeout from settings, with default
///
/// Read each tick so operators can adjust it without a restart; a
/// malformed or missing setting degrades to the default.
pub async fn worker_timeout_ms(db: &SqlitePool) -> u64 {
    match get_setting(db, WORKER_TIMEOUT_SETTING).await {
        Ok(Some(value)) => match value.parse::<u64>() {
            Ok(ms) if ms > 0 => ms,
            _ => {
                warn!(value = %value, "Invalid {} setting, using default", WORKER_TIMEOUT_SETTING);
                DEFAULT_WORKER_TIMEOUT_MS
            }
        },
        Ok(None) => DEFAULT_WORKER_TIMEOUT_MS,
        Err(e) => {
            warn!(error = %e, "Failed to read worker timeout setting, using default");
            DEFAULT_WORKER_TIMEOUT_MS
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mscan_common::db::init::create_settings_table;

    async fn test_pool() -> SqlitePool {
        let pool = SqlitePool::connect(":memory:").await.unwrap();
        create_settings_table(&pool).await.unwrap();
        pool
    }

    #[test]
    fn key_validation() {
        assert!(is_valid_key("abc"));
        assert!(!is_valid_key(""));
        assert!(!is_valid_key("   "));
    }

    #[tokio::test]
    async fn worker_timeout_defaults_when_unset() {
        let pool = test_pool().await;
        assert_eq!(worker_timeout_ms(&pool).await, DEFAULT_WORKER_TIMEOUT_MS);
    }

    #[tokio::test]
    async fn worker_timeout_reads_setting() {
        let pool = test_pool().await;
        set_setting(&pool, WORKER_TIMEOUT_SETTING, "30000").await.unwrap();
        assert_eq!(worker_timeout_ms(&pool).await, 30_000);
    }

    #[tokio::test]
    async fn worker_timeout_rejects_garbage() {
        let pool = test_pool().await;
        set_setting(&pool, WORKER_TIMEOUT_SETTING, "not-a-number").await.unwrap();
        assert_eq!(worker_timeout_ms(&pool).await, DEFAULT_WORKER_TIMEOUT_MS);

        set_setting(&pool, WORKER_TIMEOUT_SETTING, "0").await.unwrap();
        assert_eq!(worker_timeout_ms(&pool).await, DEFAULT_WORKER_TIMEOUT_MS);
    }

    #[tokio::test]
    async fn database_key_wins() {
        let pool = test_pool().await;
        set_setting(&pool, STORY_API_KEY_SETTING, "db-key").await.unwrap();

        let toml_config = TomlConfig {
            story_api_key: Some("toml-key".to_string()),
            ..Default::default()
        };

        let key = resolve_story_api_key(&pool, &toml_config).await.unwrap();
        assert_eq!(key, "db-key");
    }

    #[tokio::test]
    async fn toml_key_migrates_to_database() {
        let pool = test_pool().await;
        let toml_config = TomlConfig {
            story_api_key: Some("toml-key".to_string()),
            ..Default::default()
        };

        let key = resolve_story_api_key(&pool, &toml_config).await.unwrap();
        assert_eq!(key, "toml-key");

        // Next resolution finds it in the authoritative store
        assert_eq!(
            get_setting(&pool, STORY_API_KEY_SETTING).await.unwrap(),
            Some("toml-key".to_string())
        );
    }

    #[tokio::test]
    async fn missing_key_is_config_error() {
        let pool = test_pool().await;
        let result = resolve_story_api_key(&pool, &TomlConfig::default()).await;
        let message = result.unwrap_err().to_string();
        assert!(message.contains("Story API key not configured"));
        assert!(message.contains("MSCAN_STORY_API_KEY"));
    }
}
