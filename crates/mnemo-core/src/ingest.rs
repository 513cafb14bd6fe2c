//! Ingestion - turning a finished session's turns into memory records
//!
//! Analysis and embedding run concurrently in two tasks; their results are
//! joined before the sequential writes, so records land in conversation
//! order. A turn survives only if its analysis came back; embeddings are
//! optional and absent after retry exhaustion.

use std::time::Duration;

use chrono::Local;
use uuid::Uuid;

use crate::config::Config;
use crate::embedding::{MAX_EMBEDDING_CHARS, truncate_for_embedding};
use crate::memory::{MemoryRecord, Turn};
use crate::providers::{Analyzer, Embedder};
use crate::relations;
use crate::retention;
use crate::retrieval::should_skip;
use crate::storage::{Result, Store};

/// Simulated age at ingestion: roughly half a day until the next batch
pub const INITIAL_MEMORY_DAYS: f64 = 0.5;

const EMBED_MAX_ATTEMPTS: u32 = 3;
const EMBED_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Generate a record id: `mem_YYYYMMDD_<8-hex>`
pub fn generate_memory_id() -> String {
    let date = Local::now().format("%Y%m%d");
    let suffix = Uuid::new_v4().simple().to_string();
    format!("mem_{}_{}", date, &suffix[..8])
}

/// Batch-embed with bounded retries and increasing backoff.
/// Exhaustion yields `None`: the records are stored without embeddings.
async fn embed_with_retry(embedder: &dyn Embedder, texts: &[String]) -> Option<Vec<Vec<f32>>> {
    for attempt in 0..EMBED_MAX_ATTEMPTS {
        match embedder.embed_batch(texts).await {
            Ok(embeddings) => return Some(embeddings),
            Err(err) => {
                tracing::warn!(attempt, error = %err, "batch embedding failed");
                if attempt + 1 < EMBED_MAX_ATTEMPTS {
                    tokio::time::sleep(EMBED_RETRY_DELAY * (attempt + 1)).await;
                }
            }
        }
    }
    None
}

/// Ingest a session's turns
///
/// Filters command-like and empty turns, analyzes and embeds the rest, and
/// persists one record per analyzed turn in the original order. Newly
/// persisted ids get a similarity auto-link pass at the end.
pub async fn process_turns(
    store: &Store,
    embedder: &dyn Embedder,
    analyzer: &dyn Analyzer,
    turns: &[Turn],
    config: &Config,
) -> Result<Vec<MemoryRecord>> {
    let filtered: Vec<Turn> = turns
        .iter()
        .filter(|turn| !should_skip(&turn.user))
        .cloned()
        .collect();
    if filtered.is_empty() {
        return Ok(Vec::new());
    }

    let texts: Vec<String> = filtered
        .iter()
        .map(|turn| {
            truncate_for_embedding(&format!("{} {}", turn.user, turn.assistant), MAX_EMBEDDING_CHARS)
        })
        .collect();

    let (analyses, embeddings) = tokio::join!(
        analyzer.analyze_batch(&filtered),
        embed_with_retry(embedder, &texts),
    );

    let analyses = match analyses {
        Ok(map) => map,
        Err(err) => {
            tracing::warn!(error = %err, "turn analysis failed, nothing ingested");
            return Ok(Vec::new());
        }
    };
    if embeddings.is_none() {
        tracing::warn!("embedding retries exhausted, storing records without embeddings");
    }

    let mut records = Vec::new();
    let mut new_ids = Vec::new();

    for (index, turn) in filtered.iter().enumerate() {
        let Some(analysis) = analyses.get(&index) else {
            tracing::debug!(index, "turn dropped: no analysis");
            continue;
        };
        let embedding = embeddings
            .as_ref()
            .and_then(|batch| batch.get(index))
            .cloned();

        let mut protected = analysis.protected;
        if protected && store.count_protected()? >= config.protection.max_protected_memories {
            tracing::warn!(
                limit = config.protection.max_protected_memories,
                "protection limit reached, storing record unprotected"
            );
            protected = false;
        }

        let decay_coefficient = retention::initial_decay_coefficient(
            analysis.category,
            analysis.emotional_intensity,
            &config.retention,
        );
        let retention_score = retention::retention_score(
            analysis.emotional_intensity,
            decay_coefficient,
            INITIAL_MEMORY_DAYS,
        );

        let record = MemoryRecord {
            id: generate_memory_id(),
            created: Local::now().fixed_offset(),
            memory_days: INITIAL_MEMORY_DAYS,
            recalled_since_last_batch: false,
            recall_count: 0,
            emotional_intensity: analysis.emotional_intensity,
            emotional_valence: analysis.emotional_valence,
            emotional_arousal: analysis.emotional_arousal,
            emotional_tags: analysis.emotional_tags.clone(),
            decay_coefficient,
            category: analysis.category,
            keywords: analysis.keywords.clone(),
            current_level: 1,
            trigger: turn.user.clone(),
            content: turn.assistant.clone(),
            embedding,
            relations: Vec::new(),
            retention_score: Some(retention_score),
            archived_at: None,
            protected,
            revival_requested: false,
            revival_requested_at: None,
        };

        store.add(&record)?;
        new_ids.push(record.id.clone());
        records.push(record);
    }

    if !new_ids.is_empty() {
        let linked = relations::auto_link_new_memories(store, &new_ids, config)?;
        if linked > 0 {
            tracing::debug!(linked, "auto-linked new records");
        }
    }

    Ok(records)
}

// ============================================================================
// TESTS
// ============================================================================
