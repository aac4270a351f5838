//! Story generation worker
//!
//! Produces one piece of editorial content (blog post, composer story,
//! artist story) per queue item by calling the external text-generation
//! API, and records the result in the stories table. Payload validation
//! happens before any network call: a structurally incomplete item is a
//! poison payload and must not burn quota on retries.

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use sqlx::SqlitePool;
use std::time::Duration;
use uuid::Uuid;

use crate::queue::worker::{WorkItem, Worker, WorkerError, WorkerOutput};

const DEFAULT_BASE_URL: &str = "https://api.musicscan.app/generate";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(90);

/// Item types this worker handles
pub const STORY_ITEM_TYPES: [&str; 3] = ["blog_post", "composer_story", "artist_story"];

/// Generation API response body
#[derive(Debug, Deserialize)]
struct GenerateResponse {
    text: String,
    #[serde(default)]
    title: Option<String>,
}

/// Worker generating editorial content via the external text API
pub struct StoryGenerator {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    db: SqlitePool,
}

impl StoryGenerator {
    pub fn new(db: SqlitePool, api_key: String) -> Self {
        Self::with_base_url(db, api_key, DEFAULT_BASE_URL.to_string())
    }

    pub fn with_base_url(db: SqlitePool, api_key: String, base_url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("story generator HTTP client construction");
        Self {
            client,
            base_url,
            api_key,
            db,
        }
    }

    /// Validate the payload and build the generation prompt
    ///
    /// Missing required fields make the item unprocessable regardless of
    /// retries, hence poison.
    fn build_prompt(item: &WorkItem) -> Result<String, WorkerError> {
        match item.item_type.as_str() {
            "blog_post" => {
                let topic = require_field(&item.metadata, "topic", &item.item_type)?;
                Ok(format!(
                    "Write an engaging blog post for vinyl and CD collectors about: {}",
                    topic
                ))
            }
            "composer_story" => {
                let composer = require_field(&item.metadata, "composer_name", &item.item_type)?;
                Ok(format!(
                    "Write a biographical story about the composer {} for a music collection app",
                    composer
                ))
            }
            "artist_story" => {
                let artist = require_field(&item.metadata, "artist_name", &item.item_type)?;
                Ok(format!(
                    "Write an artist story about {} for a music collection app",
                    artist
                ))
            }
            other => Err(WorkerError::poison(format!(
                "unsupported story item_type '{}'",
                other
            ))),
        }
    }

    /// Persist a generated story
    async fn save_story(
        &self,
        item: &WorkItem,
        title: Option<&str>,
        content: &str,
    ) -> Result<(), WorkerError> {
        // A database hiccup here is transient; the generation call is
        // repeated on retry, which is acceptable for idempotent prompts
        sqlx::query(
            r#"
            INSERT INTO stories (id, item_id, item_type, title, content, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&item.item_id)
        .bind(&item.item_type)
        .bind(title)
        .bind(content)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.db)
        .await
        .map_err(|e| WorkerError::transient(format!("failed to save story: {}", e)))?;

        Ok(())
    }
}

fn require_field<'a>(
    metadata: &'a Value,
    field: &str,
    item_type: &str,
) -> Result<&'a str, WorkerError> {
    metadata
        .get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| {
            WorkerError::poison(format!(
                "incomplete metadata: '{}' requires field '{}'",
                item_type, field
            ))
        })
}

#[async_trait]
impl Worker for StoryGenerator {
    async fn perform(&self, item: &WorkItem) -> Result<WorkerOutput, WorkerError> {
        let prompt = Self::build_prompt(item)?;

        let response = self
            .client
            .post(&self.base_url)
            .bearer_auth(&self.api_key)
            .json(&json!({ "prompt": prompt, "max_tokens": 1200 }))
            .send()
            .await
            .map_err(|e| WorkerError::transient(format!("generation request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            // 4xx means the request itself is malformed for this payload
            // and will not improve on retry; everything else is upstream
            // weather (rate limits, 5xx)
            return if status.is_client_error()
                && status != reqwest::StatusCode::TOO_MANY_REQUESTS
            {
                Err(WorkerError::poison(format!(
                    "generation API rejected payload ({}): {}",
                    status, body
                )))
            } else {
                Err(WorkerError::transient(format!(
                    "generation API error ({}): {}",
                    status, body
                )))
            };
        }

        let generated: GenerateResponse = response
            .json()
            .await
            .map_err(|e| WorkerError::transient(format!("malformed generation response: {}", e)))?;

        self.save_story(item, generated.title.as_deref(), &generated.text)
            .await?;

        Ok(WorkerOutput {
            detail: Some(format!("generated {} characters", generated.text.len())),
        })
    }
}
