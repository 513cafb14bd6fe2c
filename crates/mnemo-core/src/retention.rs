//! Retention math - pure scoring and level determination
//!
//! A record's retention score decays exponentially with simulated age:
//!
//! ```text
//! retention_score = emotional_intensity * decay_coefficient ^ memory_days
//! ```
//!
//! The score maps onto four compression levels through three thresholds.

use crate::config::{LevelsConfig, RetentionConfig};
use crate::memory::{Category, MemoryRecord};

/// Compute a retention score from the three decay inputs
pub fn retention_score(emotional_intensity: i64, decay_coefficient: f64, memory_days: f64) -> f64 {
    emotional_intensity as f64 * decay_coefficient.powf(memory_days)
}

/// Recompute a record's retention score from its current decay state
pub fn rescore(record: &MemoryRecord) -> f64 {
    retention_score(
        record.emotional_intensity,
        record.decay_coefficient,
        record.memory_days,
    )
}

/// Map a retention score onto a compression level (1..=4)
///
/// - `score >= level1_threshold` -> 1 (verbatim)
/// - `score >= level2_threshold` -> 2 (summary)
/// - `score >= level3_threshold` -> 3 (keywords)
/// - otherwise -> 4 (archive)
pub fn determine_level(score: f64, levels: &LevelsConfig) -> i64 {
    if score >= levels.level1_threshold {
        1
    } else if score >= levels.level2_threshold {
        2
    } else if score >= levels.level3_threshold {
        3
    } else {
        4
    }
}

/// Seed the decay coefficient for a new record
///
/// The category's `[min, max]` interval is linearly interpolated by
/// `emotional_intensity / 100`: higher intensity decays slower.
pub fn initial_decay_coefficient(
    category: Category,
    emotional_intensity: i64,
    retention: &RetentionConfig,
) -> f64 {
    let range = retention.decay_by_category.range(category);
    let ratio = emotional_intensity as f64 / 100.0;
    range.min + (range.max - range.min) * ratio
}

/// Decide whether a record transitions to a deeper level
///
/// Protected records never compress. Levels only move upward here; the
/// downward transition exists only through archive revival.
pub fn should_compress(record: &MemoryRecord, levels: &LevelsConfig) -> (bool, i64) {
    let score = match record.retention_score {
        Some(score) => score,
        None => rescore(record),
    };

    if record.protected {
        return (false, record.current_level);
    }

    let new_level = determine_level(score, levels);
    if new_level > record.current_level {
        (true, new_level)
    } else {
        (false, record.current_level)
    }
}

// ============================================================================
// TESTS
// ============================================================================
