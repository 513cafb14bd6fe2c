//! Ingestion pipeline tests: filtering, ordering, retries, protection limit

mod common;

use std::collections::HashMap;
use std::sync::atomic::Ordering;

use common::{MockAnalyzer, MockEmbedder, analysis, embedding_fixture, record, temp_store};
use mnemo_core::{Category, Config, Turn, Valence, ingest};

fn turns(count: usize) -> Vec<Turn> {
    (0..count)
        .map(|i| Turn::new(format!("user {i}"), format!("assistant {i}")))
        .collect()
}

fn analyses(count: usize) -> HashMap<usize, mnemo_core::TurnAnalysis> {
    (0..count).map(|i| (i, analysis(i as i64))).collect()
}

#[tokio::test]
async fn one_record_per_turn() {
    let (_dir, store) = temp_store();
    let config = Config::default();

    let embedder = MockEmbedder::returning(embedding_fixture(1536));
    let analyzer = MockAnalyzer::with_analyses(analyses(5));

    let records = ingest::process_turns(&store, &embedder, &analyzer, &turns(5), &config)
        .await
        .unwrap();

    assert_eq!(records.len(), 5);
    assert_eq!(analyzer.analyze_calls.load(Ordering::SeqCst), 1);
    assert_eq!(embedder.call_count(), 1);
    assert_eq!(store.count_memories(true).unwrap(), 5);
}

#[tokio::test]
async fn conversation_order_is_preserved() {
    let (_dir, store) = temp_store();
    let config = Config::default();

    let embedder = MockEmbedder::returning(embedding_fixture(16));
    let analyzer = MockAnalyzer::with_analyses(analyses(10));

    let records = ingest::process_turns(&store, &embedder, &analyzer, &turns(10), &config)
        .await
        .unwrap();

    assert_eq!(records.len(), 10);
    for (i, record) in records.iter().enumerate() {
        assert_eq!(record.trigger, format!("user {i}"));
        assert_eq!(record.content, format!("assistant {i}"));
    }
}

#[tokio::test]
async fn command_turns_are_filtered() {
    let (_dir, store) = temp_store();
    let config = Config::default();

    let input = vec![
        Turn::new("/help", "help text"),
        Turn::new("first real message", "first answer"),
        Turn::new("/commit", "commit output"),
        Turn::new("second real message", "second answer"),
        Turn::new("<command-name>/clear</command-name>", "cleared"),
    ];

    // Indices are assigned after filtering
    let embedder = MockEmbedder::returning(embedding_fixture(16));
    let analyzer = MockAnalyzer::with_analyses(analyses(2));

    let records = ingest::process_turns(&store, &embedder, &analyzer, &input, &config)
        .await
        .unwrap();

    assert_eq!(records.len(), 2);
    assert_eq!(records[0].trigger, "first real message");
    assert_eq!(records[1].trigger, "second real message");
}

#[tokio::test]
async fn all_commands_means_no_api_calls() {
    let (_dir, store) = temp_store();
    let config = Config::default();

    let input = vec![Turn::new("/help", "h"), Turn::new("/commit", "c")];
    let embedder = MockEmbedder::returning(embedding_fixture(16));
    let analyzer = MockAnalyzer::default();

    let records = ingest::process_turns(&store, &embedder, &analyzer, &input, &config)
        .await
        .unwrap();

    assert!(records.is_empty());
    assert_eq!(analyzer.analyze_calls.load(Ordering::SeqCst), 0);
    assert_eq!(embedder.call_count(), 0);
}

#[tokio::test]
async fn empty_input_is_a_noop() {
    let (_dir, store) = temp_store();
    let config = Config::default();

    let embedder = MockEmbedder::returning(embedding_fixture(16));
    let analyzer = MockAnalyzer::default();

    let records = ingest::process_turns(&store, &embedder, &analyzer, &[], &config)
        .await
        .unwrap();
    assert!(records.is_empty());
    assert_eq!(embedder.call_count(), 0);
}

#[tokio::test]
async fn partially_failed_analysis_keeps_the_rest() {
    let (_dir, store) = temp_store();
    let config = Config::default();

    let mut partial = analyses(5);
    let _ = partial.remove(&2);

    let embedder = MockEmbedder::returning(embedding_fixture(16));
    let analyzer = MockAnalyzer::with_analyses(partial);

    let records = ingest::process_turns(&store, &embedder, &analyzer, &turns(5), &config)
        .await
        .unwrap();

    assert_eq!(records.len(), 4);
    let triggers: Vec<&str> = records.iter().map(|r| r.trigger.as_str()).collect();
    assert!(!triggers.contains(&"user 2"));
    assert!(triggers.contains(&"user 0"));
    assert!(triggers.contains(&"user 4"));
}

#[tokio::test]
async fn embedding_retry_then_success() {
    let (_dir, store) = temp_store();
    let config = Config::default();

    let embedder = MockEmbedder::failing_first(1, embedding_fixture(16));
    let analyzer = MockAnalyzer::with_analyses(analyses(1));

    let records = ingest::process_turns(&store, &embedder, &analyzer, &turns(1), &config)
        .await
        .unwrap();

    assert_eq!(records.len(), 1);
    assert!(records[0].embedding.is_some());
    assert_eq!(embedder.call_count(), 2);
}

#[tokio::test]
async fn embedding_exhaustion_stores_without_vectors() {
    let (_dir, store) = temp_store();
    let config = Config::default();

    let embedder = MockEmbedder::always_failing();
    let analyzer = MockAnalyzer::with_analyses(analyses(1));

    let records = ingest::process_turns(&store, &embedder, &analyzer, &turns(1), &config)
        .await
        .unwrap();

    assert_eq!(records.len(), 1);
    assert!(records[0].embedding.is_none());
    assert_eq!(embedder.call_count(), 3);

    let stored = store.get(&records[0].id).unwrap().unwrap();
    assert!(stored.embedding.is_none());
}

#[tokio::test]
async fn analyzer_outage_ingests_nothing() {
    let (_dir, store) = temp_store();
    let config = Config::default();

    let embedder = MockEmbedder::returning(embedding_fixture(16));
    let analyzer = MockAnalyzer {
        fail_batch: true,
        ..Default::default()
    };

    let records = ingest::process_turns(&store, &embedder, &analyzer, &turns(3), &config)
        .await
        .unwrap();
    assert!(records.is_empty());
    assert_eq!(store.count_memories(true).unwrap(), 0);
}

#[tokio::test]
async fn new_record_fields() {
    let (_dir, store) = temp_store();
    let config = Config::default();

    // S1: one turn, intensity 50, positive, arousal 40, casual
    let input = vec![Turn::new("テスト入力", "テスト応答")];
    let embedder = MockEmbedder::returning(embedding_fixture(1536));
    let mut batch = HashMap::new();
    let mut turn_analysis = analysis(0);
    turn_analysis.emotional_intensity = 50;
    turn_analysis.emotional_arousal = 40;
    let _ = batch.insert(0, turn_analysis);
    let analyzer = MockAnalyzer::with_analyses(batch);

    let records = ingest::process_turns(&store, &embedder, &analyzer, &input, &config)
        .await
        .unwrap();
    let rec = &records[0];

    assert!(rec.id.starts_with("mem_"));
    assert_eq!(rec.trigger, "テスト入力");
    assert_eq!(rec.content, "テスト応答");
    assert_eq!(rec.emotional_intensity, 50);
    assert_eq!(rec.emotional_valence, Valence::Positive);
    assert_eq!(rec.category, Category::Casual);
    assert_eq!(rec.current_level, 1);
    assert_eq!(rec.memory_days, 0.5);
    assert_eq!(rec.recall_count, 0);
    assert!(!rec.recalled_since_last_batch);
    assert!(rec.archived_at.is_none());
    assert_eq!(rec.embedding.as_ref().unwrap().len(), 1536);

    // Casual interval [0.70, 0.80] interpolated at 50/100
    assert!((rec.decay_coefficient - 0.75).abs() < 1e-9);
    let expected_score = 50.0 * 0.75f64.powf(0.5);
    assert!((rec.retention_score.unwrap() - expected_score).abs() < 1e-9);

    // And it is persisted verbatim
    let stored = store.get(&rec.id).unwrap().unwrap();
    assert_eq!(stored.trigger, "テスト入力");
    assert_eq!(stored.retention_score, rec.retention_score);
}

#[tokio::test]
async fn protection_limit_downgrades_but_persists() {
    let (_dir, store) = temp_store();
    let mut config = Config::default();
    config.protection.max_protected_memories = 2;

    for i in 0..2 {
        let mut existing = record(&format!("mem_20260101_dddd000{i}"));
        existing.protected = true;
        store.add(&existing).unwrap();
    }

    let embedder = MockEmbedder::returning(embedding_fixture(16));
    let mut batch = HashMap::new();
    let mut protected_analysis = analysis(0);
    protected_analysis.protected = true;
    let _ = batch.insert(0, protected_analysis);
    let analyzer = MockAnalyzer::with_analyses(batch);

    let input = vec![Turn::new("please remember this", "noted")];
    let records = ingest::process_turns(&store, &embedder, &analyzer, &input, &config)
        .await
        .unwrap();

    assert_eq!(records.len(), 1);
    assert!(!records[0].protected);
    assert_eq!(store.count_protected().unwrap(), 2);
    assert_eq!(store.count_memories(true).unwrap(), 3);
}

#[tokio::test]
async fn below_protection_limit_keeps_the_flag() {
    let (_dir, store) = temp_store();
    let config = Config::default();

    let embedder = MockEmbedder::returning(embedding_fixture(16));
    let mut batch = HashMap::new();
    let mut protected_analysis = analysis(0);
    protected_analysis.protected = true;
    let _ = batch.insert(0, protected_analysis);
    let analyzer = MockAnalyzer::with_analyses(batch);

    let input = vec![Turn::new("please remember this", "noted")];
    let records = ingest::process_turns(&store, &embedder, &analyzer, &input, &config)
        .await
        .unwrap();
    assert!(records[0].protected);
}

#[tokio::test]
async fn similar_existing_records_get_auto_linked() {
    let (_dir, store) = temp_store();
    let config = Config::default();

    // Existing record with a high score and the same embedding the
    // embedder returns for the new turn
    let mut existing = record("mem_20260101_eeee0001");
    existing.retention_score = Some(90.0);
    existing.embedding = Some(embedding_fixture(16));
    store.add(&existing).unwrap();

    let embedder = MockEmbedder::returning(embedding_fixture(16));
    let analyzer = MockAnalyzer::with_analyses(analyses(1));

    let records = ingest::process_turns(&store, &embedder, &analyzer, &turns(1), &config)
        .await
        .unwrap();

    // New record scores ~43 < 90: the edge runs existing -> new
    let existing_after = store.get(&existing.id).unwrap().unwrap();
    assert_eq!(existing_after.relations, vec![records[0].id.clone()]);
    assert!(store.get(&records[0].id).unwrap().unwrap().relations.is_empty());
}

#[tokio::test]
async fn sixty_turn_session() {
    let (_dir, store) = temp_store();
    let config = Config::default();

    let input: Vec<Turn> = (0..60)
        .map(|i| Turn::new(format!("user {i:03}"), format!("assistant {i:03}")))
        .collect();

    let embedder = MockEmbedder::returning(embedding_fixture(16));
    let analyzer = MockAnalyzer::with_analyses(
        (0..60).map(|i| (i, analysis((i % 50) as i64))).collect(),
    );

    let records = ingest::process_turns(&store, &embedder, &analyzer, &input, &config)
        .await
        .unwrap();

    assert_eq!(records.len(), 60);
    for (i, record) in records.iter().enumerate() {
        assert_eq!(record.trigger, format!("user {i:03}"));
    }
    assert_eq!(store.count_memories(true).unwrap(), 60);
}
