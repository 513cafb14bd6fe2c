//! Memory record - the fundamental unit of storage
//!
//! Each record carries one conversation turn distilled into:
//! - Trigger/content text at the current compression level
//! - Emotional annotations fixed at ingestion
//! - Decay state driven by the daily batch
//! - Cross-references to other records

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Deserializer, Serialize};

// ============================================================================
// CATEGORIES AND VALENCE
// ============================================================================

/// Memory category, drives the initial decay coefficient and retrieval boost
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// Small talk, low retention by default
    #[default]
    Casual,
    /// Work-related exchanges
    Work,
    /// Decisions that were made
    Decision,
    /// Emotionally loaded exchanges, slowest decay
    Emotional,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Casual => "casual",
            Category::Work => "work",
            Category::Decision => "decision",
            Category::Emotional => "emotional",
        }
    }

    /// Parse from the persisted string form. Unknown values map to `Casual`.
    pub fn parse_name(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "work" => Category::Work,
            "decision" => Category::Decision,
            "emotional" => Category::Emotional,
            _ => Category::Casual,
        }
    }

    /// All categories, in persistence order
    pub const ALL: [Category; 4] = [
        Category::Casual,
        Category::Work,
        Category::Decision,
        Category::Emotional,
    ];
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl<'de> Deserialize<'de> for Category {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(Category::parse_name(&s))
    }
}

/// Emotional valence of a record or a live emotion snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Valence {
    Positive,
    Negative,
    #[default]
    Neutral,
}

impl Valence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Valence::Positive => "positive",
            Valence::Negative => "negative",
            Valence::Neutral => "neutral",
        }
    }

    /// Parse from the persisted string form. Unknown values map to `Neutral`.
    pub fn parse_name(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "positive" => Valence::Positive,
            "negative" => Valence::Negative,
            _ => Valence::Neutral,
        }
    }
}

impl std::fmt::Display for Valence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl<'de> Deserialize<'de> for Valence {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(Valence::parse_name(&s))
    }
}

// ============================================================================
// MEMORY RECORD
// ============================================================================

/// A persisted memory record
///
/// Created by ingestion, mutated only by retrieval (flags), the daily batch
/// (decay state, level transitions), and the management CLI. The emotional
/// annotations are immutable after ingestion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecord {
    /// `mem_YYYYMMDD_<8-hex>`
    pub id: String,
    /// Ingestion timestamp, with zone
    pub created: DateTime<FixedOffset>,
    /// Simulated age in days; +1.0 per batch when unrecalled, halved on recall
    pub memory_days: f64,
    /// Raised by retrieval, cleared by the next batch
    pub recalled_since_last_batch: bool,
    /// Cumulative reinforcement counter
    pub recall_count: i64,
    /// 0..=100
    pub emotional_intensity: i64,
    pub emotional_valence: Valence,
    /// 0..=100
    pub emotional_arousal: i64,
    pub emotional_tags: Vec<String>,
    /// In (0, max_decay]; raised on recall, capped
    pub decay_coefficient: f64,
    pub category: Category,
    pub keywords: Vec<String>,
    /// Compression tier 1..=4; monotone non-decreasing except via revival
    pub current_level: i64,
    /// What prompted the turn; rewritten on level transitions
    pub trigger: String,
    /// How the assistant responded; rewritten on level transitions
    pub content: String,
    /// 1536-dim vector, absent when embedding generation failed
    pub embedding: Option<Vec<f32>>,
    /// Directed references to lower-scored records
    pub relations: Vec<String>,
    /// Cached score; recomputed each batch
    pub retention_score: Option<f64>,
    /// Present iff `current_level == 4`
    pub archived_at: Option<DateTime<FixedOffset>>,
    /// Protected records are never compressed and never auto-deleted
    pub protected: bool,
    /// Raised by retrieval on archived hits, consumed by the batch
    pub revival_requested: bool,
    pub revival_requested_at: Option<DateTime<FixedOffset>>,
}

impl MemoryRecord {
    /// Cached retention score, absent read as zero
    pub fn retention(&self) -> f64 {
        self.retention_score.unwrap_or(0.0)
    }

    /// Whether this record sits in the archive tier
    pub fn is_archived(&self) -> bool {
        self.archived_at.is_some()
    }
}

// ============================================================================
// EXTERNAL-FACING VALUE TYPES
// ============================================================================

/// One user/assistant exchange extracted from a session log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub user: String,
    pub assistant: String,
}

impl Turn {
    pub fn new(user: impl Into<String>, assistant: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            assistant: assistant.into(),
        }
    }
}

/// Live emotion snapshot attached to a retrieval query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmotionSnapshot {
    #[serde(default)]
    pub valence: Valence,
    /// 0..=100
    #[serde(default = "default_arousal")]
    pub arousal: i64,
    #[serde(default)]
    pub tags: Vec<String>,
}

fn default_arousal() -> i64 {
    50
}

/// Analyzer output for one ingested turn
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnAnalysis {
    pub emotional_intensity: i64,
    #[serde(default)]
    pub emotional_valence: Valence,
    #[serde(default = "default_arousal")]
    pub emotional_arousal: i64,
    #[serde(default)]
    pub emotional_tags: Vec<String>,
    #[serde(default)]
    pub category: Category,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub protected: bool,
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_roundtrip() {
        for category in Category::ALL {
            assert_eq!(Category::parse_name(category.as_str()), category);
        }
    }

    #[test]
    fn unknown_category_falls_back_to_casual() {
        assert_eq!(Category::parse_name("gossip"), Category::Casual);
        assert_eq!(Category::parse_name(""), Category::Casual);
    }

    #[test]
    fn unknown_valence_falls_back_to_neutral() {
        assert_eq!(Valence::parse_name("positive"), Valence::Positive);
        assert_eq!(Valence::parse_name("ambivalent"), Valence::Neutral);
    }

    #[test]
    fn turn_analysis_accepts_unknown_variants() {
        let json = r#"{
            "emotional_intensity": 40,
            "emotional_valence": "mixed",
            "emotional_arousal": 55,
            "category": "chitchat"
        }"#;
        let analysis: TurnAnalysis = serde_json::from_str(json).unwrap();
        assert_eq!(analysis.emotional_valence, Valence::Neutral);
        assert_eq!(analysis.category, Category::Casual);
        assert!(!analysis.protected);
        assert!(analysis.keywords.is_empty());
    }
}
