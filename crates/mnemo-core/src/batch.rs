//! Daily compression batch
//!
//! Once per local date (or forced), walks every record through a strict
//! pipeline: reinforce recalled records, age the rest, rescore, compress
//! level transitions, revive requested archive hits, maintain relations,
//! and optionally garbage-collect the archive. The completion marker is
//! written last, so an interrupted batch repeats on the next invocation.

use chrono::{DateTime, Duration, Local};

use crate::config::{Config, DeleteConditionMode};
use crate::providers::{Analyzer, Embedder};
use crate::recall;
use crate::relations::{self, RelationCounts};
use crate::retention;
use crate::storage::{MemoryPatch, Result, Store};

/// State slot holding the last completion timestamp (RFC 3339, with zone)
pub const LAST_RUN_STATE_KEY: &str = "last_compression_run";

/// Level-transition counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompressionCounts {
    pub level1_to_level2: usize,
    pub level2_to_level3: usize,
    pub archived: usize,
}

/// Report of one batch invocation
#[derive(Debug, Clone, Default)]
pub struct BatchResult {
    pub executed: bool,
    pub skipped_reason: Option<String>,
    pub recalled_processed: usize,
    pub memory_days_updated: usize,
    pub retention_rescored: usize,
    pub compression: CompressionCounts,
    pub revived: usize,
    pub relations: RelationCounts,
    pub deleted: usize,
}

// ============================================================================
// DATE GATE
// ============================================================================

/// Whether the batch is due: true unless it already completed on today's
/// local date. An unparsable marker counts as never run.
pub fn should_run(store: &Store) -> Result<bool> {
    let Some(last_run) = store.state_get(LAST_RUN_STATE_KEY)? else {
        return Ok(true);
    };

    match DateTime::parse_from_rfc3339(&last_run) {
        Ok(timestamp) => {
            Ok(timestamp.with_timezone(&Local).date_naive() != Local::now().date_naive())
        }
        Err(_) => Ok(true),
    }
}

// ============================================================================
// PIPELINE
// ============================================================================

/// Run the daily batch
///
/// Safe to re-run: reinforcement clears the flag it consumed, aging only
/// touches unflagged records, compression only moves levels upward, and the
/// date gate makes a completed run a no-op for the rest of the day.
pub async fn run(
    store: &Store,
    embedder: &dyn Embedder,
    analyzer: &dyn Analyzer,
    config: &Config,
    force: bool,
) -> Result<BatchResult> {
    let mut result = BatchResult::default();

    if !force && !should_run(store)? {
        result.skipped_reason = Some("already ran today".to_string());
        return Ok(result);
    }
    result.executed = true;

    result.recalled_processed = recall::process_recalled(store, config)?;
    result.memory_days_updated = store.age_active_unrecalled()?;
    result.retention_rescored = rescore_active(store)?;
    result.compression = compress_all(store, embedder, analyzer, config).await?;
    result.revived = process_revival(store, config)?;
    result.relations = relations::process_relations(store, &[], config)?;
    result.deleted = auto_delete(store, config)?;

    store.state_set(LAST_RUN_STATE_KEY, &Local::now().fixed_offset().to_rfc3339())?;

    tracing::info!(
        recalled = result.recalled_processed,
        aged = result.memory_days_updated,
        archived = result.compression.archived,
        revived = result.revived,
        deleted = result.deleted,
        "compression batch complete"
    );
    Ok(result)
}

/// Recompute the cached retention score of every active record
fn rescore_active(store: &Store) -> Result<usize> {
    let active = store.get_active()?;
    let count = active.len();

    for record in active {
        store.update(
            &record.id,
            MemoryPatch {
                retention_score: Some(retention::rescore(&record)),
                ..Default::default()
            },
        )?;
    }

    Ok(count)
}

/// Evaluate every active record against the level thresholds
async fn compress_all(
    store: &Store,
    embedder: &dyn Embedder,
    analyzer: &dyn Analyzer,
    config: &Config,
) -> Result<CompressionCounts> {
    let mut counts = CompressionCounts::default();

    for record in store.get_active()? {
        let (should, new_level) = retention::should_compress(&record, &config.levels);
        if !should {
            continue;
        }

        compress_memory(store, embedder, analyzer, &record, new_level).await?;

        match (record.current_level, new_level) {
            (1, 2) => counts.level1_to_level2 += 1,
            (2, 3) => counts.level2_to_level3 += 1,
            (_, 4) => counts.archived += 1,
            _ => {}
        }
    }

    Ok(counts)
}

/// Apply one level transition
///
/// The level change (and the archive stamp for level 4) always lands.
/// External rewrite and embedding steps accumulate into the same patch;
/// the first failure stops accumulation, leaving earlier text intact and
/// the embedding stale.
async fn compress_memory(
    store: &Store,
    embedder: &dyn Embedder,
    analyzer: &dyn Analyzer,
    record: &crate::memory::MemoryRecord,
    new_level: i64,
) -> Result<()> {
    let mut patch = MemoryPatch {
        current_level: Some(new_level),
        ..Default::default()
    };
    if new_level == 4 {
        patch.archived_at = Some(Some(Local::now().fixed_offset()));
    }

    let mut trigger = record.trigger.clone();
    let mut content = record.content.clone();
    let mut external_failed = false;

    if record.current_level == 1 && new_level >= 2 {
        match analyzer.compress_to_level2(&trigger, &content).await {
            Ok((new_trigger, new_content)) => {
                trigger = new_trigger;
                content = new_content;
                patch.trigger = Some(trigger.clone());
                patch.content = Some(content.clone());
            }
            Err(err) => {
                tracing::warn!(id = %record.id, error = %err, "level 2 rewrite failed");
                external_failed = true;
            }
        }
    }

    if !external_failed && record.current_level <= 2 && new_level >= 3 {
        match analyzer.compress_to_level3(&trigger, &content).await {
            Ok((new_trigger, new_content)) => {
                trigger = new_trigger;
                content = new_content;
                patch.trigger = Some(trigger.clone());
                patch.content = Some(content.clone());
            }
            Err(err) => {
                tracing::warn!(id = %record.id, error = %err, "level 3 rewrite failed");
                external_failed = true;
            }
        }
    }

    if !external_failed {
        match embedder.embed(&format!("{trigger} {content}")).await {
            Ok(embedding) => patch.embedding = Some(Some(embedding)),
            Err(err) => {
                tracing::warn!(id = %record.id, error = %err, "embedding regeneration failed");
            }
        }
    }

    store.update(&record.id, patch)
}

/// Move requested archive records back to level 3
fn process_revival(store: &Store, config: &Config) -> Result<usize> {
    let pending = store.get_revival_requested()?;
    let now = Local::now().fixed_offset();
    let floor = config.levels.level3_threshold + config.archive.revival_min_margin;

    for record in &pending {
        let days_in_archive = record
            .archived_at
            .map(|archived| (now - archived).num_days().max(0))
            .unwrap_or(0);

        let decayed = record.emotional_intensity as f64
            * config.archive.revival_decay_per_day.powi(days_in_archive as i32);
        let new_score = decayed.max(floor);

        store.update(
            &record.id,
            MemoryPatch {
                archived_at: Some(None),
                current_level: Some(3),
                retention_score: Some(new_score),
                revival_requested: Some(false),
                revival_requested_at: Some(None),
                ..Default::default()
            },
        )?;
        tracing::debug!(id = %record.id, new_score, days_in_archive, "revived from archive");
    }

    Ok(pending.len())
}

/// Garbage-collect the archive when enabled; protected records are exempt
fn auto_delete(store: &Store, config: &Config) -> Result<usize> {
    if !config.archive.auto_delete_enabled {
        return Ok(0);
    }

    let cutoff = Local::now().fixed_offset() - Duration::days(config.archive.retention_days);
    let mut deleted = 0;

    for record in store.get_archived()? {
        if record.protected {
            continue;
        }
        let Some(archived_at) = record.archived_at else {
            continue;
        };

        let mut conditions = vec![archived_at < cutoff];
        if config.archive.delete_require_zero_recall {
            conditions.push(record.recall_count == 0);
        }
        conditions.push(record.emotional_intensity <= config.archive.delete_max_intensity);

        let matched = match config.archive.delete_condition_mode {
            DeleteConditionMode::And => conditions.iter().all(|c| *c),
            DeleteConditionMode::Or => conditions.iter().any(|c| *c),
        };

        if matched && store.delete(&record.id)? {
            deleted += 1;
        }
    }

    Ok(deleted)
}

// ============================================================================
// TESTS
// ============================================================================
