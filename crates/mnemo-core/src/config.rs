//! Configuration - a JSON document layered over built-in defaults
//!
//! Loaded once per process. Every field has a serde default, so a partial
//! user file only overrides the keys it names; unknown keys are ignored.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Deserializer, Serialize};

use crate::memory::Category;

/// Configuration error
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config file: {0}")]
    Parse(#[from] serde_json::Error),
}

// ============================================================================
// SECTIONS
// ============================================================================

/// Closed interval for initial decay interpolation
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DecayRange {
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecayByCategory {
    #[serde(default = "default_decay_casual")]
    pub casual: DecayRange,
    #[serde(default = "default_decay_work")]
    pub work: DecayRange,
    #[serde(default = "default_decay_decision")]
    pub decision: DecayRange,
    #[serde(default = "default_decay_emotional")]
    pub emotional: DecayRange,
}

impl DecayByCategory {
    pub fn range(&self, category: Category) -> DecayRange {
        match category {
            Category::Casual => self.casual,
            Category::Work => self.work,
            Category::Decision => self.decision,
            Category::Emotional => self.emotional,
        }
    }
}

fn default_decay_casual() -> DecayRange {
    DecayRange { min: 0.70, max: 0.80 }
}
fn default_decay_work() -> DecayRange {
    DecayRange { min: 0.85, max: 0.92 }
}
fn default_decay_decision() -> DecayRange {
    DecayRange { min: 0.93, max: 0.97 }
}
fn default_decay_emotional() -> DecayRange {
    DecayRange { min: 0.98, max: 0.999 }
}

impl Default for DecayByCategory {
    fn default() -> Self {
        Self {
            casual: default_decay_casual(),
            work: default_decay_work(),
            decision: default_decay_decision(),
            emotional: default_decay_emotional(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Upper bound on the decay coefficient after reinforcement
    #[serde(default = "default_max_decay")]
    pub max_decay_coefficient: f64,
    #[serde(default)]
    pub decay_by_category: DecayByCategory,
}

fn default_max_decay() -> f64 {
    0.999
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            max_decay_coefficient: default_max_decay(),
            decay_by_category: DecayByCategory::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LevelsConfig {
    #[serde(default = "default_level1_threshold")]
    pub level1_threshold: f64,
    #[serde(default = "default_level2_threshold")]
    pub level2_threshold: f64,
    #[serde(default = "default_level3_threshold")]
    pub level3_threshold: f64,
}

fn default_level1_threshold() -> f64 {
    50.0
}
fn default_level2_threshold() -> f64 {
    20.0
}
fn default_level3_threshold() -> f64 {
    5.0
}

impl Default for LevelsConfig {
    fn default() -> Self {
        Self {
            level1_threshold: default_level1_threshold(),
            level2_threshold: default_level2_threshold(),
            level3_threshold: default_level3_threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecallConfig {
    /// Added to the decay coefficient per recall, capped at max_decay
    #[serde(default = "default_decay_boost")]
    pub decay_coefficient_boost: f64,
    /// memory_days multiplier applied on recall
    #[serde(default = "default_days_reduction")]
    pub memory_days_reduction: f64,
    /// Per-recall weight in retrieval ranking
    #[serde(default = "default_recall_count_weight")]
    pub recall_count_weight: f64,
}

fn default_decay_boost() -> f64 {
    0.02
}
fn default_days_reduction() -> f64 {
    0.5
}
fn default_recall_count_weight() -> f64 {
    0.1
}

impl Default for RecallConfig {
    fn default() -> Self {
        Self {
            decay_coefficient_boost: default_decay_boost(),
            memory_days_reduction: default_days_reduction(),
            recall_count_weight: default_recall_count_weight(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResonanceConfig {
    #[serde(default = "default_valence_bonus")]
    pub valence_match_bonus: f64,
    #[serde(default = "default_arousal_bonus")]
    pub arousal_proximity_bonus: f64,
    #[serde(default = "default_tags_weight")]
    pub tags_overlap_weight: f64,
    /// Weight of the resonance bonus in retrieval relevance
    #[serde(default = "default_priority_alpha")]
    pub priority_weight_alpha: f64,
}

fn default_valence_bonus() -> f64 {
    0.3
}
fn default_arousal_bonus() -> f64 {
    0.2
}
fn default_tags_weight() -> f64 {
    0.5
}
fn default_priority_alpha() -> f64 {
    0.3
}

impl Default for ResonanceConfig {
    fn default() -> Self {
        Self {
            valence_match_bonus: default_valence_bonus(),
            arousal_proximity_bonus: default_arousal_bonus(),
            tags_overlap_weight: default_tags_weight(),
            priority_weight_alpha: default_priority_alpha(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationsConfig {
    #[serde(default = "default_auto_link_threshold")]
    pub auto_link_similarity_threshold: f64,
    #[serde(default = "default_max_relations")]
    pub max_relations_per_memory: usize,
    #[serde(default = "default_traversal_depth")]
    pub relation_traversal_depth: usize,
    #[serde(default = "default_enable_auto_linking")]
    pub enable_auto_linking: bool,
}

fn default_auto_link_threshold() -> f64 {
    0.85
}
fn default_max_relations() -> usize {
    10
}
fn default_traversal_depth() -> usize {
    1
}
fn default_enable_auto_linking() -> bool {
    true
}

impl Default for RelationsConfig {
    fn default() -> Self {
        Self {
            auto_link_similarity_threshold: default_auto_link_threshold(),
            max_relations_per_memory: default_max_relations(),
            relation_traversal_depth: default_traversal_depth(),
            enable_auto_linking: default_enable_auto_linking(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_relevance_threshold")]
    pub relevance_threshold: f64,
    /// Multiplier when the query category matches the record category
    #[serde(default = "default_category_boost_beta")]
    pub category_boost_beta: f64,
}

fn default_top_k() -> usize {
    10
}
fn default_relevance_threshold() -> f64 {
    0.5
}
fn default_category_boost_beta() -> f64 {
    2.0
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            relevance_threshold: default_relevance_threshold(),
            category_boost_beta: default_category_boost_beta(),
        }
    }
}

/// How auto-delete conditions combine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeleteConditionMode {
    #[default]
    And,
    Or,
}

impl Serialize for DeleteConditionMode {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(match self {
            DeleteConditionMode::And => "AND",
            DeleteConditionMode::Or => "OR",
        })
    }
}

impl<'de> Deserialize<'de> for DeleteConditionMode {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(match s.to_uppercase().as_str() {
            "OR" => DeleteConditionMode::Or,
            _ => DeleteConditionMode::And,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveConfig {
    /// Include archived records in retrieval candidates
    #[serde(default = "default_enable_archive_recall")]
    pub enable_archive_recall: bool,
    /// Per-day decay applied to intensity when computing a revival score
    #[serde(default = "default_revival_decay")]
    pub revival_decay_per_day: f64,
    /// Revived records land at least this far above the archive threshold
    #[serde(default = "default_revival_margin")]
    pub revival_min_margin: f64,
    #[serde(default)]
    pub auto_delete_enabled: bool,
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
    #[serde(default = "default_require_zero_recall")]
    pub delete_require_zero_recall: bool,
    #[serde(default = "default_delete_max_intensity")]
    pub delete_max_intensity: i64,
    #[serde(default)]
    pub delete_condition_mode: DeleteConditionMode,
}

fn default_enable_archive_recall() -> bool {
    true
}
fn default_revival_decay() -> f64 {
    0.995
}
fn default_revival_margin() -> f64 {
    3.0
}
fn default_retention_days() -> i64 {
    365
}
fn default_require_zero_recall() -> bool {
    true
}
fn default_delete_max_intensity() -> i64 {
    20
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            enable_archive_recall: default_enable_archive_recall(),
            revival_decay_per_day: default_revival_decay(),
            revival_min_margin: default_revival_margin(),
            auto_delete_enabled: false,
            retention_days: default_retention_days(),
            delete_require_zero_recall: default_require_zero_recall(),
            delete_max_intensity: default_delete_max_intensity(),
            delete_condition_mode: DeleteConditionMode::And,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtectionConfig {
    /// Global cap on protected records
    #[serde(default = "default_max_protected")]
    pub max_protected_memories: usize,
}

fn default_max_protected() -> usize {
    50
}

impl Default for ProtectionConfig {
    fn default() -> Self {
        Self {
            max_protected_memories: default_max_protected(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_embedding_dimensions")]
    pub dimensions: usize,
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}
fn default_embedding_dimensions() -> usize {
    1536
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: default_embedding_model(),
            dimensions: default_embedding_dimensions(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default)]
    pub temperature: f64,
    #[serde(default = "default_llm_max_tokens")]
    pub max_tokens: u32,
}

fn default_llm_model() -> String {
    "claude-3-5-haiku-20241022".to_string()
}
fn default_llm_max_tokens() -> u32 {
    1024
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: default_llm_model(),
            temperature: 0.0,
            max_tokens: default_llm_max_tokens(),
        }
    }
}

// ============================================================================
// TOP LEVEL
// ============================================================================

/// Full configuration, one immutable value per process
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub levels: LevelsConfig,
    #[serde(default)]
    pub recall: RecallConfig,
    #[serde(default)]
    pub resonance: ResonanceConfig,
    #[serde(default)]
    pub relations: RelationsConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub archive: ArchiveConfig,
    #[serde(default)]
    pub protection: ProtectionConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
}

impl Config {
    /// Default path: `<config dir>/config.json`
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("com", "mnemo", "mnemo").map(|dirs| dirs.config_dir().join("config.json"))
    }

    /// Load from the given path, or the default path when `None`.
    /// A missing file yields the built-in defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => match Self::default_path() {
                Some(p) => p,
                None => return Ok(Config::default()),
            },
        };

        if !path.exists() {
            return Ok(Config::default());
        }

        let raw = std::fs::read_to_string(&path)?;
        let config = serde_json::from_str(&raw)?;
        tracing::debug!("loaded config from {}", path.display());
        Ok(config)
    }
}

// ============================================================================
// TESTS
// ============================================================================
