//! Emotional resonance - affinity between a record and a live emotion snapshot
//!
//! Three additive components: valence match, arousal proximity, and tag
//! overlap. Bounded at 1.0 with the default weights.

use std::collections::HashSet;

use crate::config::ResonanceConfig;
use crate::memory::{EmotionSnapshot, MemoryRecord};

/// Resonance between a record's emotional fields and the current emotion
pub fn resonance(record: &MemoryRecord, current: &EmotionSnapshot, config: &ResonanceConfig) -> f64 {
    let mut score = 0.0;

    if record.emotional_valence == current.valence {
        score += config.valence_match_bonus;
    }

    let arousal_diff = (record.emotional_arousal - current.arousal).abs() as f64 / 100.0;
    score += (config.arousal_proximity_bonus * (1.0 - arousal_diff)).max(0.0);

    if !record.emotional_tags.is_empty() && !current.tags.is_empty() {
        let memory_tags: HashSet<&str> = record.emotional_tags.iter().map(String::as_str).collect();
        let current_tags: HashSet<&str> = current.tags.iter().map(String::as_str).collect();
        let overlap = memory_tags.intersection(&current_tags).count() as f64
            / memory_tags.len().max(current_tags.len()) as f64;
        score += overlap * config.tags_overlap_weight;
    }

    score
}

// ============================================================================
// TESTS
// ============================================================================
