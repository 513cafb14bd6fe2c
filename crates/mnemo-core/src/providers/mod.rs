//! External provider seams
//!
//! The engine never talks to the network directly; it goes through the
//! `Embedder` and `Analyzer` traits. Production implementations live in
//! [`openai`] (embeddings) and [`anthropic`] (analysis and compression);
//! tests substitute in-memory fakes.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::memory::{Category, EmotionSnapshot, Turn, TurnAnalysis};

pub mod anthropic;
pub mod openai;

pub use anthropic::ClaudeAnalyzer;
pub use openai::OpenAiEmbedder;

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Error from an external provider call
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// Transport-level failure (includes client timeouts)
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// The provider asked us to back off
    #[error("rate limited")]
    RateLimited,
    /// Non-success response from the API
    #[error("api error ({status}): {message}")]
    Api { status: u16, message: String },
    /// The response body could not be interpreted
    #[error("malformed response: {0}")]
    Malformed(String),
    /// Client-side configuration problem (missing API key etc.)
    #[error("provider not configured: {0}")]
    Config(String),
}

/// Provider result type
pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

// ============================================================================
// TRAITS
// ============================================================================

/// Classification of a retrieval prompt
#[derive(Debug, Clone, Default)]
pub struct PromptClassification {
    pub category: Option<Category>,
    pub emotion: Option<EmotionSnapshot>,
}

/// Text-to-vector provider
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a single text
    async fn embed(&self, text: &str) -> ProviderResult<Vec<f32>>;

    /// Embed a batch; the output order matches the input order
    async fn embed_batch(&self, texts: &[String]) -> ProviderResult<Vec<Vec<f32>>>;
}

/// LLM-backed analysis provider
#[async_trait]
pub trait Analyzer: Send + Sync {
    /// Analyze a batch of turns. The result maps input index to analysis;
    /// a missing index means that turn failed and is dropped by the caller.
    async fn analyze_batch(&self, turns: &[Turn]) -> ProviderResult<HashMap<usize, TurnAnalysis>>;

    /// Classify a retrieval prompt into a category and an emotion snapshot
    async fn classify_prompt(&self, prompt: &str) -> ProviderResult<PromptClassification>;

    /// Summarize trigger/content for the level 1 -> 2 transition
    async fn compress_to_level2(&self, trigger: &str, content: &str)
    -> ProviderResult<(String, String)>;

    /// Reduce trigger/content to keyword form for the -> level 3 transition
    async fn compress_to_level3(&self, trigger: &str, content: &str)
    -> ProviderResult<(String, String)>;
}
