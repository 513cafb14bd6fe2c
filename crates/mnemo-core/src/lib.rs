//! # Mnemo Core
//!
//! Long-term memory engine for a conversational assistant. Conversation
//! turns become emotionally annotated records that decay over simulated
//! time, compress through four fidelity levels, and come back when a new
//! prompt makes them relevant.
//!
//! - **Retention**: `intensity * decay^days`, category-seeded decay
//! - **Daily batch**: reinforce, age, rescore, compress, revive, relink, purge
//! - **Retrieval**: normalized retention x squared cosine similarity, with
//!   category boost, recall weighting, emotional resonance, and graph
//!   expansion over cross-references
//! - **Storage**: single-file SQLite, WAL, one transaction per mutation
//!
//! The embedding and LLM providers stay behind the [`providers::Embedder`]
//! and [`providers::Analyzer`] traits; everything else is deterministic
//! given their outputs.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use mnemo_core::{Config, Store, ingest, retrieval};
//! use mnemo_core::providers::{ClaudeAnalyzer, OpenAiEmbedder};
//!
//! let config = Config::load(None)?;
//! let store = Store::new(None)?;
//! let embedder = OpenAiEmbedder::from_config(&config.embedding)?;
//! let analyzer = ClaudeAnalyzer::from_config(&config.llm)?;
//!
//! // End of session: distill the turns into records
//! let records = ingest::process_turns(&store, &embedder, &analyzer, &turns, &config).await?;
//!
//! // New prompt: recall what matters
//! let hits = retrieval::retrieve(&store, &embedder, Some(&analyzer), prompt, &config).await?;
//! println!("{}", retrieval::format_memories(&hits));
//! ```

// ============================================================================
// MODULES
// ============================================================================

pub mod batch;
pub mod config;
pub mod embedding;
pub mod ingest;
pub mod memory;
pub mod providers;
pub mod recall;
pub mod relations;
pub mod resonance;
pub mod retention;
pub mod retrieval;
pub mod storage;

// ============================================================================
// PUBLIC API RE-EXPORTS
// ============================================================================

pub use batch::{BatchResult, CompressionCounts, LAST_RUN_STATE_KEY};
pub use config::{Config, ConfigError, DeleteConditionMode};
pub use embedding::{EMBEDDING_DIMENSIONS, MAX_EMBEDDING_CHARS, cosine_similarity};
pub use memory::{Category, EmotionSnapshot, MemoryRecord, Turn, TurnAnalysis, Valence};
pub use providers::{
    Analyzer, ClaudeAnalyzer, Embedder, OpenAiEmbedder, PromptClassification, ProviderError,
};
pub use relations::RelationCounts;
pub use retrieval::RetrievedMemory;
pub use storage::{MemoryPatch, Result, StorageError, Store};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
