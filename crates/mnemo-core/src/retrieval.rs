//! Retrieval engine - per-prompt relevance scoring and recall
//!
//! Ranks candidates by category-normalized retention, squared cosine
//! similarity, recall weighting, categorical boost, and emotional resonance,
//! then expands the result set over cross-references. Side effects (recall
//! flags, revival requests) land only after the expanded set is final.

use std::collections::{HashMap, HashSet};

use chrono::Local;

use crate::config::Config;
use crate::embedding::cosine_similarity;
use crate::memory::{Category, EmotionSnapshot, MemoryRecord};
use crate::providers::{Analyzer, Embedder};
use crate::recall::recall_weight;
use crate::resonance::resonance;
use crate::storage::{MemoryPatch, Result, Store};

/// Per-category `(mean, std)` of retention scores over the candidate set
pub type CategoryStats = HashMap<Category, (f64, f64)>;

/// One retrieval hit
#[derive(Debug, Clone)]
pub struct RetrievedMemory {
    pub record: MemoryRecord,
    /// Came from the archive tier
    pub archived: bool,
    /// Reached through graph expansion rather than direct ranking
    pub related: bool,
}

// ============================================================================
// SKIP RULE
// ============================================================================

/// Prompts that must not touch the memory system at all
pub fn should_skip(prompt: &str) -> bool {
    let trimmed = prompt.trim();
    trimmed.is_empty() || trimmed.starts_with('/') || prompt.contains("<command-name>")
}

// ============================================================================
// SCORING
// ============================================================================

/// Per-category mean and population standard deviation of retention scores.
/// A zero deviation (single member, identical scores) substitutes 1.0.
pub fn category_stats<'a>(records: impl IntoIterator<Item = &'a MemoryRecord>) -> CategoryStats {
    let mut by_category: HashMap<Category, Vec<f64>> = HashMap::new();
    for record in records {
        by_category
            .entry(record.category)
            .or_default()
            .push(record.retention());
    }

    let mut stats = CategoryStats::new();
    for (category, values) in by_category {
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let variance = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
        let mut std = variance.sqrt();
        if std == 0.0 {
            std = 1.0;
        }
        let _ = stats.insert(category, (mean, std));
    }
    stats
}

/// Relevance of one candidate for the query
///
/// ```text
/// base  = normalized_retention * similarity^2 * recall_weight * category_boost
/// bonus = alpha * resonance * normalized_retention     (when emotion known)
/// ```
pub fn relevance(
    record: &MemoryRecord,
    query_embedding: &[f32],
    query_category: Option<Category>,
    stats: Option<&CategoryStats>,
    emotion: Option<&EmotionSnapshot>,
    config: &Config,
) -> f64 {
    let score = record.retention();

    let normalized = match stats.and_then(|s| s.get(&record.category)) {
        Some((mean, std)) => (score - mean) / std,
        None => score,
    };

    let similarity = record
        .embedding
        .as_deref()
        .map(|embedding| cosine_similarity(query_embedding, embedding).max(0.0))
        .unwrap_or(0.0);

    let weight = recall_weight(record.recall_count, config);

    let boost = if query_category.is_some_and(|c| c == record.category) {
        config.retrieval.category_boost_beta
    } else {
        1.0
    };

    let base = normalized * similarity * similarity * weight * boost;

    let bonus = emotion
        .map(|e| config.resonance.priority_weight_alpha * resonance(record, e, &config.resonance) * normalized)
        .unwrap_or(0.0);

    base + bonus
}

// ============================================================================
// RANKING
// ============================================================================

/// Score, filter, and truncate the candidate set
///
/// Candidates at or above the relevance threshold win when there are at
/// least `top_k` of them; otherwise the overall top-K stands in. Ties break
/// on ascending id so rankings are reproducible.
fn rank_candidates(
    candidates: Vec<(MemoryRecord, bool)>,
    query_embedding: &[f32],
    query_category: Option<Category>,
    emotion: Option<&EmotionSnapshot>,
    config: &Config,
) -> Vec<(MemoryRecord, bool)> {
    let stats = category_stats(candidates.iter().map(|(record, _)| record));

    let mut scored: Vec<(f64, MemoryRecord, bool)> = candidates
        .into_iter()
        .filter_map(|(record, is_archived)| {
            let score = relevance(
                &record,
                query_embedding,
                query_category,
                Some(&stats),
                emotion,
                config,
            );
            (score > 0.0).then_some((score, record, is_archived))
        })
        .collect();

    scored.sort_by(|a, b| {
        b.0.partial_cmp(&a.0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.1.id.cmp(&b.1.id))
    });

    let top_k = config.retrieval.top_k;
    let threshold = config.retrieval.relevance_threshold;
    let high_count = scored.iter().filter(|(score, ..)| *score >= threshold).count();

    let take: Vec<(f64, MemoryRecord, bool)> = if high_count >= top_k {
        scored
            .into_iter()
            .filter(|(score, ..)| *score >= threshold)
            .take(top_k)
            .collect()
    } else {
        scored.into_iter().take(top_k).collect()
    };

    take.into_iter()
        .map(|(_, record, is_archived)| (record, is_archived))
        .collect()
}

// ============================================================================
// GRAPH EXPANSION
// ============================================================================

/// Follow `relations` from each ranked record up to `depth` hops, appending
/// records not already present. A visited set breaks cycles.
fn expand_relations(
    store: &Store,
    ranked: Vec<(MemoryRecord, bool)>,
    depth: usize,
) -> Result<Vec<RetrievedMemory>> {
    let mut seen: HashSet<String> = ranked.iter().map(|(record, _)| record.id.clone()).collect();
    let mut frontier: Vec<String> = ranked
        .iter()
        .flat_map(|(record, _)| record.relations.iter().cloned())
        .collect();

    let mut results: Vec<RetrievedMemory> = ranked
        .into_iter()
        .map(|(record, is_archived)| RetrievedMemory {
            record,
            archived: is_archived,
            related: false,
        })
        .collect();

    for _ in 0..depth {
        let mut next = Vec::new();
        for id in frontier {
            if !seen.insert(id.clone()) {
                continue;
            }
            let Some(record) = store.get(&id)? else {
                continue;
            };
            next.extend(record.relations.iter().cloned());
            results.push(RetrievedMemory {
                archived: record.is_archived(),
                related: true,
                record,
            });
        }
        if next.is_empty() {
            break;
        }
        frontier = next;
    }

    Ok(results)
}

// ============================================================================
// RETRIEVAL PIPELINE
// ============================================================================

/// Run retrieval for one prompt
///
/// Skipped prompts and embedding failures return empty without side
/// effects. Classification failures degrade to unboosted ranking. On a hit,
/// active records get their recalled flag raised and archived records get a
/// revival request.
pub async fn retrieve(
    store: &Store,
    embedder: &dyn Embedder,
    analyzer: Option<&dyn Analyzer>,
    prompt: &str,
    config: &Config,
) -> Result<Vec<RetrievedMemory>> {
    if should_skip(prompt) {
        return Ok(Vec::new());
    }

    let active = store.get_active()?;
    let archived = if config.archive.enable_archive_recall {
        store.get_archived()?
    } else {
        Vec::new()
    };
    if active.is_empty() && archived.is_empty() {
        return Ok(Vec::new());
    }

    let query_embedding = match embedder.embed(prompt).await {
        Ok(embedding) => embedding,
        Err(err) => {
            tracing::warn!(error = %err, "query embedding failed, skipping retrieval");
            return Ok(Vec::new());
        }
    };

    let (query_category, emotion) = match analyzer {
        Some(analyzer) => match analyzer.classify_prompt(prompt).await {
            Ok(classification) => (classification.category, classification.emotion),
            Err(err) => {
                tracing::warn!(error = %err, "prompt classification failed");
                (None, None)
            }
        },
        None => (None, None),
    };

    let candidates: Vec<(MemoryRecord, bool)> = active
        .into_iter()
        .map(|record| (record, false))
        .chain(archived.into_iter().map(|record| (record, true)))
        .collect();

    let ranked = rank_candidates(
        candidates,
        &query_embedding,
        query_category,
        emotion.as_ref(),
        config,
    );
    let results = expand_relations(store, ranked, config.relations.relation_traversal_depth)?;

    if !results.is_empty() {
        apply_recall_effects(store, &results)?;
    }

    Ok(results)
}

/// Mark active hits recalled and request revival for archived hits
fn apply_recall_effects(store: &Store, results: &[RetrievedMemory]) -> Result<()> {
    let active_ids: Vec<String> = results
        .iter()
        .filter(|hit| !hit.archived)
        .map(|hit| hit.record.id.clone())
        .collect();
    let _ = store.mark_recalled(&active_ids)?;

    let now = Local::now().fixed_offset();
    for hit in results.iter().filter(|hit| hit.archived) {
        store.update(
            &hit.record.id,
            MemoryPatch {
                revival_requested: Some(true),
                revival_requested_at: Some(Some(now)),
                ..Default::default()
            },
        )?;
    }

    Ok(())
}

// ============================================================================
// OUTPUT FORMATTING
// ============================================================================

/// Render hits as the `<memories>` block the host runtime injects
pub fn format_memories(results: &[RetrievedMemory]) -> String {
    if results.is_empty() {
        return String::new();
    }

    let mut lines = vec!["<memories>".to_string()];
    for hit in results {
        let archived_mark = if hit.archived { "[archived]" } else { "" };
        let related_mark = if hit.related { "[related]" } else { "" };
        lines.push(format!(
            "- [{}][L{}]{}{} {} → {}",
            hit.record.created.format("%Y-%m-%d"),
            hit.record.current_level,
            archived_mark,
            related_mark,
            hit.record.trigger,
            hit.record.content,
        ));
    }
    lines.push("</memories>".to_string());
    lines.join("\n")
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Valence;
    use chrono::{FixedOffset, TimeZone};

    fn record(id: &str, category: Category, score: f64, embedding: Option<Vec<f32>>) -> MemoryRecord {
        MemoryRecord {
            id: id.to_string(),
            created: FixedOffset::east_opt(9 * 3600)
                .unwrap()
                .with_ymd_and_hms(2026, 1, 20, 10, 0, 0)
                .unwrap(),
            memory_days: 0.0,
            recalled_since_last_batch: false,
            recall_count: 0,
            emotional_intensity: 50,
            emotional_valence: Valence::Neutral,
            emotional_arousal: 50,
            emotional_tags: vec![],
            decay_coefficient: 0.995,
            category,
            keywords: vec![],
            current_level: 1,
            trigger: "trigger".to_string(),
            content: "content".to_string(),
            embedding,
            relations: vec![],
            retention_score: Some(score),
            archived_at: None,
            protected: false,
            revival_requested: false,
            revival_requested_at: None,
        }
    }

    #[test]
    fn skip_rule() {
        assert!(should_skip(""));
        assert!(should_skip("   "));
        assert!(should_skip("/help"));
        assert!(should_skip("  /clear"));
        assert!(should_skip("<command-name>/commit</command-name>"));
        assert!(!should_skip("hello"));
        assert!(!should_skip("こんにちは"));
        assert!(!should_skip("What is the meaning of life?"));
    }

    #[test]
    fn relevance_without_stats_uses_raw_score() {
        let config = Config::default();
        let mem = record("a", Category::Work, 50.0, Some(vec![1.0, 0.0, 0.0]));
        let result = relevance(&mem, &[1.0, 0.0, 0.0], None, None, None, &config);
        assert!((result - 50.0).abs() < 1e-6);
    }

    #[test]
    fn relevance_normalizes_within_category() {
        let config = Config::default();
        let mem = record("a", Category::Emotional, 80.0, Some(vec![1.0, 0.0, 0.0]));
        let mut stats = CategoryStats::new();
        let _ = stats.insert(Category::Emotional, (60.0, 10.0));
        let result = relevance(&mem, &[1.0, 0.0, 0.0], None, Some(&stats), None, &config);
        assert!((result - 2.0).abs() < 1e-6);
    }

    #[test]
    fn relevance_squares_similarity() {
        let config = Config::default();
        let mem = record("a", Category::Work, 10.0, Some(vec![0.8, 0.6, 0.0]));
        let result = relevance(&mem, &[1.0, 0.0, 0.0], None, None, None, &config);
        assert!((result - 10.0 * 0.64).abs() < 1e-4);
    }

    #[test]
    fn relevance_category_boost() {
        let config = Config::default();
        let mem = record("a", Category::Work, 30.0, Some(vec![1.0, 0.0, 0.0]));
        let boosted = relevance(&mem, &[1.0, 0.0, 0.0], Some(Category::Work), None, None, &config);
        assert!((boosted - 60.0).abs() < 1e-6);

        let other = record("b", Category::Emotional, 30.0, Some(vec![1.0, 0.0, 0.0]));
        let unboosted = relevance(&other, &[1.0, 0.0, 0.0], Some(Category::Work), None, None, &config);
        assert!((unboosted - 30.0).abs() < 1e-6);
    }

    #[test]
    fn normalization_equalizes_categories() {
        let config = Config::default();
        let mut stats = CategoryStats::new();
        let _ = stats.insert(Category::Emotional, (80.0, 5.0));
        let _ = stats.insert(Category::Work, (25.0, 5.0));

        let emotional = record("a", Category::Emotional, 82.0, Some(vec![1.0, 0.0, 0.0]));
        let work = record("b", Category::Work, 27.0, Some(vec![1.0, 0.0, 0.0]));

        let emotional_score =
            relevance(&emotional, &[1.0, 0.0, 0.0], None, Some(&stats), None, &config);
        let work_score = relevance(&work, &[1.0, 0.0, 0.0], None, Some(&stats), None, &config);
        assert!((emotional_score - work_score).abs() < 1e-6);
    }

    #[test]
    fn relevance_recall_weighting() {
        let config = Config::default();
        let mut mem = record("a", Category::Work, 50.0, Some(vec![1.0, 0.0, 0.0]));
        mem.recall_count = 5;
        let result = relevance(&mem, &[1.0, 0.0, 0.0], None, None, None, &config);
        assert!((result - 75.0).abs() < 1e-6);
    }

    #[test]
    fn relevance_zero_cases() {
        let config = Config::default();
        let orthogonal = record("a", Category::Work, 50.0, Some(vec![1.0, 0.0, 0.0]));
        assert_eq!(
            relevance(&orthogonal, &[0.0, 1.0, 0.0], None, None, None, &config),
            0.0
        );

        let no_embedding = record("b", Category::Work, 50.0, None);
        assert_eq!(
            relevance(&no_embedding, &[1.0, 0.0, 0.0], None, None, None, &config),
            0.0
        );

        let negative = record("c", Category::Work, 50.0, Some(vec![-1.0, 0.0, 0.0]));
        assert_eq!(
            relevance(&negative, &[1.0, 0.0, 0.0], None, None, None, &config),
            0.0
        );
    }

    #[test]
    fn resonance_bonus_scales_with_normalized_retention() {
        let config = Config::default();
        let mut mem = record("a", Category::Emotional, 40.0, Some(vec![1.0, 0.0, 0.0]));
        mem.emotional_valence = Valence::Positive;
        mem.emotional_arousal = 50;
        let emotion = EmotionSnapshot {
            valence: Valence::Positive,
            arousal: 50,
            tags: vec![],
        };
        // base 40, resonance 0.5, bonus 0.3 * 0.5 * 40 = 6
        let result = relevance(&mem, &[1.0, 0.0, 0.0], None, None, Some(&emotion), &config);
        assert!((result - 46.0).abs() < 1e-6);
    }

    #[test]
    fn stats_mean_and_population_std() {
        let records = vec![
            record("a", Category::Emotional, 80.0, None),
            record("b", Category::Emotional, 60.0, None),
            record("c", Category::Work, 30.0, None),
            record("d", Category::Work, 20.0, None),
        ];
        let stats = category_stats(records.iter());

        let (emotional_mean, emotional_std) = stats[&Category::Emotional];
        assert!((emotional_mean - 70.0).abs() < 1e-6);
        assert!((emotional_std - 10.0).abs() < 1e-6);

        let (work_mean, work_std) = stats[&Category::Work];
        assert!((work_mean - 25.0).abs() < 1e-6);
        assert!((work_std - 5.0).abs() < 1e-6);
    }

    #[test]
    fn stats_single_member_substitutes_std_one() {
        let records = vec![record("a", Category::Decision, 50.0, None)];
        let stats = category_stats(records.iter());
        let (mean, std) = stats[&Category::Decision];
        assert!((mean - 50.0).abs() < 1e-6);
        assert!((std - 1.0).abs() < 1e-6);
    }

    #[test]
    fn stats_empty_and_missing_scores() {
        assert!(category_stats(std::iter::empty::<&MemoryRecord>()).is_empty());

        let mut a = record("a", Category::Casual, 0.0, None);
        a.retention_score = None;
        let b = record("b", Category::Casual, 10.0, None);
        let stats = category_stats([&a, &b]);
        let (mean, _) = stats[&Category::Casual];
        assert!((mean - 5.0).abs() < 1e-6);
    }

    #[test]
    fn ranking_ties_break_on_id() {
        let mut config = Config::default();
        config.retrieval.top_k = 2;
        let query = vec![1.0, 0.0, 0.0];

        // Three work records: the two tied at 30 normalize to the same
        // positive value, the third only widens the deviation
        let candidates = vec![
            (record("mem_b", Category::Work, 30.0, Some(query.clone())), false),
            (record("mem_a", Category::Work, 30.0, Some(query.clone())), false),
            (record("mem_c", Category::Work, 10.0, Some(query.clone())), false),
        ];

        let ranked = rank_candidates(candidates, &query, None, None, &config);
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].0.id, "mem_a");
        assert_eq!(ranked[1].0.id, "mem_b");
    }

    #[test]
    fn fallback_when_below_threshold_count() {
        let mut config = Config::default();
        config.retrieval.top_k = 2;
        config.retrieval.relevance_threshold = 1000.0;
        let query = vec![1.0, 0.0, 0.0];

        // Same category, spread scores: only the top one survives the
        // relevance > 0 filter, nothing reaches the absurd threshold
        let candidates = vec![
            (record("mem_a", Category::Work, 40.0, Some(query.clone())), false),
            (record("mem_b", Category::Work, 30.0, Some(query.clone())), false),
            (record("mem_c", Category::Work, 20.0, Some(query.clone())), false),
        ];

        let ranked = rank_candidates(candidates, &query, None, None, &config);
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].0.id, "mem_a");
    }

    #[test]
    fn format_block_markers() {
        let base = record("a", Category::Work, 50.0, None);

        let mut archived = base.clone();
        archived.current_level = 4;
        let results = vec![
            RetrievedMemory {
                record: base.clone(),
                archived: false,
                related: false,
            },
            RetrievedMemory {
                record: archived,
                archived: true,
                related: true,
            },
        ];

        let block = format_memories(&results);
        let lines: Vec<&str> = block.lines().collect();
        assert_eq!(lines[0], "<memories>");
        assert_eq!(lines[lines.len() - 1], "</memories>");
        assert!(lines[1].starts_with("- [2026-01-20][L1] trigger"));
        assert!(lines[2].contains("[L4][archived][related]"));
        assert!(lines[1].contains("→"));
    }

    #[test]
    fn format_empty_is_empty() {
        assert_eq!(format_memories(&[]), "");
    }
}
