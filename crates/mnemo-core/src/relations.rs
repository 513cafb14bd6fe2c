//! Cross-references between memory records
//!
//! Edges are directed from the higher-scored record to the lower-scored one
//! and live as id lists on the source record. Three maintenance operations,
//! executed in order: integrity sweep, direction reevaluation, and
//! similarity-based auto-linking of newly ingested records.

use std::collections::{HashMap, HashSet};

use crate::config::Config;
use crate::embedding::cosine_similarity;
use crate::memory::MemoryRecord;
use crate::storage::{MemoryPatch, Result, Store};

/// Counters reported by a relations pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelationCounts {
    pub integrity_fixed: usize,
    pub direction_fixed: usize,
    pub auto_linked: usize,
}

// ============================================================================
// PURE EDGE HELPERS
// ============================================================================

/// Decide edge direction: the higher retention score references the lower.
/// Ties keep the first argument as the source.
pub fn relation_direction<'a>(a: &'a MemoryRecord, b: &'a MemoryRecord) -> (&'a str, &'a str) {
    if a.retention() >= b.retention() {
        (&a.id, &b.id)
    } else {
        (&b.id, &a.id)
    }
}

/// Append a relation, skipping duplicates and respecting the cap.
/// Existing entries keep their order.
pub fn add_relation(relations: &[String], target_id: &str, max_relations: usize) -> Vec<String> {
    let mut updated = relations.to_vec();
    if updated.iter().any(|id| id == target_id) || updated.len() >= max_relations {
        return updated;
    }
    updated.push(target_id.to_string());
    updated
}

/// Remove a relation if present
pub fn remove_relation(relations: &[String], target_id: &str) -> Vec<String> {
    relations
        .iter()
        .filter(|id| id.as_str() != target_id)
        .cloned()
        .collect()
}

/// Candidates whose embedding similarity to `record` meets the threshold
pub fn find_similar<'a>(
    record: &MemoryRecord,
    candidates: &'a [MemoryRecord],
    threshold: f64,
) -> Vec<(&'a MemoryRecord, f64)> {
    let Some(embedding) = record.embedding.as_deref() else {
        return Vec::new();
    };

    candidates
        .iter()
        .filter_map(|candidate| {
            let other = candidate.embedding.as_deref()?;
            let similarity = cosine_similarity(embedding, other);
            (similarity >= threshold).then_some((candidate, similarity))
        })
        .collect()
}

// ============================================================================
// STORE-LEVEL PHASES
// ============================================================================

/// Phase 1: drop relation entries that point at deleted records
pub fn check_integrity(store: &Store) -> Result<usize> {
    let all = store.get_all(true)?;
    let ids: HashSet<&str> = all.iter().map(|m| m.id.as_str()).collect();

    let mut fixed = 0;
    for record in &all {
        let valid: Vec<String> = record
            .relations
            .iter()
            .filter(|id| ids.contains(id.as_str()))
            .cloned()
            .collect();

        if valid.len() != record.relations.len() {
            store.update(
                &record.id,
                MemoryPatch {
                    relations: Some(valid),
                    ..Default::default()
                },
            )?;
            fixed += 1;
        }
    }

    Ok(fixed)
}

/// Phase 2: flip edges whose target now outscores the source
pub fn reevaluate_directions(store: &Store, config: &Config) -> Result<usize> {
    let all = store.get_all(true)?;
    let scores: HashMap<&str, f64> = all.iter().map(|m| (m.id.as_str(), m.retention())).collect();
    let mut relations: HashMap<String, Vec<String>> = all
        .iter()
        .map(|m| (m.id.clone(), m.relations.clone()))
        .collect();

    let max_relations = config.relations.max_relations_per_memory;
    let mut fixed = 0;

    for record in &all {
        let my_score = record.retention();

        for target_id in &record.relations {
            let Some(&target_score) = scores.get(target_id.as_str()) else {
                continue;
            };

            if target_score > my_score {
                let source = remove_relation(&relations[&record.id], target_id);
                store.update(
                    &record.id,
                    MemoryPatch {
                        relations: Some(source.clone()),
                        ..Default::default()
                    },
                )?;
                relations.insert(record.id.clone(), source);

                let target = add_relation(&relations[target_id], &record.id, max_relations);
                store.update(
                    target_id,
                    MemoryPatch {
                        relations: Some(target.clone()),
                        ..Default::default()
                    },
                )?;
                relations.insert(target_id.clone(), target);

                fixed += 1;
            }
        }
    }

    Ok(fixed)
}

/// Phase 3: link newly ingested records to similar existing ones
///
/// The edge runs from the higher-scored record to the lower-scored one;
/// archived records never participate.
pub fn auto_link_new_memories(store: &Store, new_ids: &[String], config: &Config) -> Result<usize> {
    if !config.relations.enable_auto_linking || new_ids.is_empty() {
        return Ok(0);
    }

    let threshold = config.relations.auto_link_similarity_threshold;
    let max_relations = config.relations.max_relations_per_memory;

    let all = store.get_all(false)?;
    let new_set: HashSet<&str> = new_ids.iter().map(String::as_str).collect();
    let existing: Vec<MemoryRecord> = all
        .iter()
        .filter(|m| !new_set.contains(m.id.as_str()))
        .cloned()
        .collect();
    let mut relations: HashMap<String, Vec<String>> = all
        .iter()
        .map(|m| (m.id.clone(), m.relations.clone()))
        .collect();
    let by_id: HashMap<&str, &MemoryRecord> = all.iter().map(|m| (m.id.as_str(), m)).collect();

    let mut linked = 0;

    for new_id in new_ids {
        let Some(new_record) = by_id.get(new_id.as_str()) else {
            continue;
        };

        for (target, similarity) in find_similar(new_record, &existing, threshold) {
            let (from_id, to_id) = relation_direction(new_record, target);
            let current = &relations[from_id];
            let updated = add_relation(current, to_id, max_relations);

            if updated.len() > current.len() {
                tracing::debug!(from = from_id, to = to_id, similarity, "auto-linked");
                store.update(
                    from_id,
                    MemoryPatch {
                        relations: Some(updated.clone()),
                        ..Default::default()
                    },
                )?;
                relations.insert(from_id.to_string(), updated);
                linked += 1;
            }
        }
    }

    Ok(linked)
}

/// Run the three phases in order
pub fn process_relations(store: &Store, new_ids: &[String], config: &Config) -> Result<RelationCounts> {
    Ok(RelationCounts {
        integrity_fixed: check_integrity(store)?,
        direction_fixed: reevaluate_directions(store, config)?,
        auto_linked: auto_link_new_memories(store, new_ids, config)?,
    })
}

// ============================================================================
// TESTS
// ============================================================================
