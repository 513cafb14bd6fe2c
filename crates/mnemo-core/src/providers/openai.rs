//! OpenAI embeddings client
//!
//! Thin wrapper over the `/v1/embeddings` endpoint: 30-second timeout,
//! three attempts, linearly increasing backoff when rate limited.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use super::{Embedder, ProviderError, ProviderResult};
use crate::config::EmbeddingConfig;

const EMBEDDINGS_URL: &str = "https://api.openai.com/v1/embeddings";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_RETRIES: u32 = 3;
const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Remote embedder backed by the OpenAI embeddings API
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    api_key: String,
    model: String,
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Deserialize)]
struct EmbeddingItem {
    index: usize,
    embedding: Vec<f32>,
}

impl OpenAiEmbedder {
    /// Build a client for the given model
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> ProviderResult<Self> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            model: model.into(),
        })
    }

    /// Build from configuration, reading the key from `OPENAI_API_KEY`
    pub fn from_config(config: &EmbeddingConfig) -> ProviderResult<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| ProviderError::Config("OPENAI_API_KEY is not set".to_string()))?;
        Self::new(api_key, config.model.clone())
    }

    async fn request(&self, input: serde_json::Value) -> ProviderResult<Vec<Vec<f32>>> {
        let response = self
            .client
            .post(EMBEDDINGS_URL)
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({
                "model": self.model,
                "input": input,
            }))
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(ProviderError::RateLimited);
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let mut body: EmbeddingsResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Malformed(e.to_string()))?;

        // The API preserves input order, but sort by index to be sure
        body.data.sort_by_key(|item| item.index);
        Ok(body.data.into_iter().map(|item| item.embedding).collect())
    }

    async fn request_with_retry(&self, input: serde_json::Value) -> ProviderResult<Vec<Vec<f32>>> {
        let mut last_error = ProviderError::Config("no attempts made".to_string());

        for attempt in 0..MAX_RETRIES {
            match self.request(input.clone()).await {
                Ok(embeddings) => return Ok(embeddings),
                Err(err @ ProviderError::Malformed(_)) => return Err(err),
                Err(err) => {
                    tracing::warn!(attempt, error = %err, "embedding request failed");
                    if attempt + 1 < MAX_RETRIES {
                        let delay = match err {
                            // Back off harder each time we are throttled
                            ProviderError::RateLimited => RETRY_DELAY * (attempt + 1),
                            _ => RETRY_DELAY,
                        };
                        tokio::time::sleep(delay).await;
                    }
                    last_error = err;
                }
            }
        }

        Err(last_error)
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> ProviderResult<Vec<f32>> {
        let mut embeddings = self
            .request_with_retry(serde_json::Value::String(text.to_string()))
            .await?;
        embeddings
            .pop()
            .ok_or_else(|| ProviderError::Malformed("empty embedding response".to_string()))
    }

    async fn embed_batch(&self, texts: &[String]) -> ProviderResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let embeddings = self
            .request_with_retry(serde_json::json!(texts))
            .await?;

        if embeddings.len() != texts.len() {
            return Err(ProviderError::Malformed(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                embeddings.len()
            )));
        }
        Ok(embeddings)
    }
}
