//! Recall reinforcement - strengthening applied when a record was recalled
//!
//! Runs only inside the daily batch, over active records whose
//! `recalled_since_last_batch` flag is set: the simulated age halves, the
//! decay coefficient climbs toward its cap, and the recall counter grows.

use crate::config::Config;
use crate::memory::MemoryRecord;
use crate::storage::{MemoryPatch, Result, Store};

/// Reinforcement deltas for one recalled record
#[derive(Debug, Clone, PartialEq)]
pub struct Reinforcement {
    pub memory_days: f64,
    pub decay_coefficient: f64,
    pub recall_count: i64,
}

/// Compute the reinforcement for a recalled record
pub fn reinforce(record: &MemoryRecord, config: &Config) -> Reinforcement {
    let new_decay = (record.decay_coefficient + config.recall.decay_coefficient_boost)
        .min(config.retention.max_decay_coefficient);

    Reinforcement {
        memory_days: record.memory_days * config.recall.memory_days_reduction,
        decay_coefficient: new_decay,
        recall_count: record.recall_count + 1,
    }
}

/// Apply reinforcement to every active flagged record, clearing the flag
///
/// Returns the number of records processed.
pub fn process_recalled(store: &Store, config: &Config) -> Result<usize> {
    let recalled = store.get_recalled_active()?;
    let count = recalled.len();

    for record in recalled {
        let reinforcement = reinforce(&record, config);
        store.update(
            &record.id,
            MemoryPatch {
                memory_days: Some(reinforcement.memory_days),
                decay_coefficient: Some(reinforcement.decay_coefficient),
                recall_count: Some(reinforcement.recall_count),
                recalled_since_last_batch: Some(false),
                ..Default::default()
            },
        )?;
    }

    Ok(count)
}

/// Retrieval weight contributed by the recall counter
pub fn recall_weight(recall_count: i64, config: &Config) -> f64 {
    1.0 + config.recall.recall_count_weight * recall_count as f64
}

// ============================================================================
// TESTS
// ============================================================================
