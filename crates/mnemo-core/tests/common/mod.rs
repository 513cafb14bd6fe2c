//! Shared fixtures: temp stores, record builders, and mock providers
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{Duration, Local};

use mnemo_core::providers::{
    Analyzer, Embedder, PromptClassification, ProviderError, ProviderResult,
};
use mnemo_core::{Category, MemoryRecord, Store, Turn, TurnAnalysis, Valence};

pub fn temp_store() -> (tempfile::TempDir, Store) {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::new(Some(dir.path().join("memories.db"))).unwrap();
    (dir, store)
}

/// A level-1 active record with neutral defaults; tweak fields per test
pub fn record(id: &str) -> MemoryRecord {
    MemoryRecord {
        id: id.to_string(),
        created: Local::now().fixed_offset() - Duration::days(1),
        memory_days: 1.0,
        recalled_since_last_batch: false,
        recall_count: 0,
        emotional_intensity: 50,
        emotional_valence: Valence::Neutral,
        emotional_arousal: 50,
        emotional_tags: vec![],
        decay_coefficient: 0.95,
        category: Category::Casual,
        keywords: vec![],
        current_level: 1,
        trigger: format!("{id} trigger"),
        content: format!("{id} content"),
        embedding: None,
        relations: vec![],
        retention_score: Some(40.0),
        archived_at: None,
        protected: false,
        revival_requested: false,
        revival_requested_at: None,
    }
}

/// Analyzer output shaped like the production prompt's answers
pub fn analysis(index: i64) -> TurnAnalysis {
    TurnAnalysis {
        emotional_intensity: 50 + index,
        emotional_valence: Valence::Positive,
        emotional_arousal: 40 + index,
        emotional_tags: vec![format!("tag_{index}")],
        category: Category::Casual,
        keywords: vec![format!("keyword_{index}")],
        protected: false,
    }
}

/// A deterministic non-trivial embedding
pub fn embedding_fixture(dimensions: usize) -> Vec<f32> {
    (0..dimensions).map(|i| 0.01 * (i % 100) as f32).collect()
}

// ============================================================================
// MOCK EMBEDDER
// ============================================================================

pub struct MockEmbedder {
    vector: Vec<f32>,
    fail_first: usize,
    fail_always: bool,
    pub calls: AtomicUsize,
}

impl MockEmbedder {
    pub fn returning(vector: Vec<f32>) -> Self {
        Self {
            vector,
            fail_first: 0,
            fail_always: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing_first(failures: usize, vector: Vec<f32>) -> Self {
        Self {
            vector,
            fail_first: failures,
            fail_always: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn always_failing() -> Self {
        Self {
            vector: Vec::new(),
            fail_first: 0,
            fail_always: true,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn attempt(&self) -> ProviderResult<()> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_always || call < self.fail_first {
            Err(ProviderError::Api {
                status: 500,
                message: "mock embedder failure".to_string(),
            })
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed(&self, _text: &str) -> ProviderResult<Vec<f32>> {
        self.attempt()?;
        Ok(self.vector.clone())
    }

    async fn embed_batch(&self, texts: &[String]) -> ProviderResult<Vec<Vec<f32>>> {
        self.attempt()?;
        Ok(vec![self.vector.clone(); texts.len()])
    }
}

// ============================================================================
// MOCK ANALYZER
// ============================================================================

#[derive(Default)]
pub struct MockAnalyzer {
    /// Per-index batch results; a missing index simulates a failed turn
    pub analyses: HashMap<usize, TurnAnalysis>,
    /// `None` makes classify_prompt fail
    pub classification: Option<PromptClassification>,
    /// `None` makes the level-2 rewrite fail
    pub level2_result: Option<(String, String)>,
    /// `None` makes the level-3 rewrite fail
    pub level3_result: Option<(String, String)>,
    /// Makes analyze_batch fail outright
    pub fail_batch: bool,
    pub analyze_calls: AtomicUsize,
    pub classify_calls: AtomicUsize,
    pub level2_calls: AtomicUsize,
    pub level3_calls: AtomicUsize,
    /// (trigger, content) inputs seen by the rewrite calls
    pub rewrite_inputs: Mutex<Vec<(String, String)>>,
}

impl MockAnalyzer {
    pub fn with_analyses(analyses: HashMap<usize, TurnAnalysis>) -> Self {
        Self {
            analyses,
            ..Default::default()
        }
    }

    pub fn with_compression() -> Self {
        Self {
            level2_result: Some(("summary trigger".to_string(), "summary content".to_string())),
            level3_result: Some((
                "keyword, trigger".to_string(),
                "keyword, content".to_string(),
            )),
            ..Default::default()
        }
    }

    fn fail() -> ProviderError {
        ProviderError::Api {
            status: 500,
            message: "mock analyzer failure".to_string(),
        }
    }
}

#[async_trait]
impl Analyzer for MockAnalyzer {
    async fn analyze_batch(&self, _turns: &[Turn]) -> ProviderResult<HashMap<usize, TurnAnalysis>> {
        let _ = self.analyze_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_batch {
            return Err(Self::fail());
        }
        Ok(self.analyses.clone())
    }

    async fn classify_prompt(&self, _prompt: &str) -> ProviderResult<PromptClassification> {
        let _ = self.classify_calls.fetch_add(1, Ordering::SeqCst);
        match &self.classification {
            Some(classification) => Ok(classification.clone()),
            None => Err(Self::fail()),
        }
    }

    async fn compress_to_level2(
        &self,
        trigger: &str,
        content: &str,
    ) -> ProviderResult<(String, String)> {
        let _ = self.level2_calls.fetch_add(1, Ordering::SeqCst);
        self.rewrite_inputs
            .lock()
            .unwrap()
            .push((trigger.to_string(), content.to_string()));
        self.level2_result.clone().ok_or_else(Self::fail)
    }

    async fn compress_to_level3(
        &self,
        trigger: &str,
        content: &str,
    ) -> ProviderResult<(String, String)> {
        let _ = self.level3_calls.fetch_add(1, Ordering::SeqCst);
        self.rewrite_inputs
            .lock()
            .unwrap()
            .push((trigger.to_string(), content.to_string()));
        self.level3_result.clone().ok_or_else(Self::fail)
    }
}
