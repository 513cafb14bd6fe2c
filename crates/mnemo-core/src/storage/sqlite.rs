//! SQLite Storage Implementation
//!
//! Single-writer, multi-reader persistence for memory records. Every
//! mutating call is one statement, so one implicit transaction; a failed
//! call leaves the record set unchanged.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{DateTime, FixedOffset};
use directories::ProjectDirs;
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};

use crate::memory::{Category, MemoryRecord, Valence};

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Storage error type
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    /// Record not found
    #[error("Memory not found: {0}")]
    NotFound(String),
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Initialization error
    #[error("Initialization error: {0}")]
    Init(String),
}

/// Storage result type
pub type Result<T> = std::result::Result<T, StorageError>;

// ============================================================================
// PATCH
// ============================================================================

/// Partial update for a memory record
///
/// `Some(...)` fields are written, `None` fields untouched. Nullable columns
/// take a double `Option`: `Some(None)` clears them.
#[derive(Debug, Clone, Default)]
pub struct MemoryPatch {
    pub memory_days: Option<f64>,
    pub recalled_since_last_batch: Option<bool>,
    pub recall_count: Option<i64>,
    pub decay_coefficient: Option<f64>,
    pub keywords: Option<Vec<String>>,
    pub current_level: Option<i64>,
    pub trigger: Option<String>,
    pub content: Option<String>,
    pub embedding: Option<Option<Vec<f32>>>,
    pub relations: Option<Vec<String>>,
    pub retention_score: Option<f64>,
    pub archived_at: Option<Option<DateTime<FixedOffset>>>,
    pub protected: Option<bool>,
    pub revival_requested: Option<bool>,
    pub revival_requested_at: Option<Option<DateTime<FixedOffset>>>,
}

// ============================================================================
// STORE
// ============================================================================

const MEMORY_COLUMNS: &str = "id, created, memory_days, recalled_since_last_batch, recall_count, \
     emotional_intensity, emotional_valence, emotional_arousal, emotional_tags, \
     decay_coefficient, category, keywords, current_level, \"trigger\", content, \
     embedding, relations, retention_score, archived_at, protected, \
     revival_requested, revival_requested_at";

/// SQLite-backed memory store
///
/// Uses separate reader/writer connections behind mutexes so all methods
/// take `&self` and the store is `Send + Sync`.
pub struct Store {
    writer: Mutex<Connection>,
    reader: Mutex<Connection>,
    path: PathBuf,
}

impl Store {
    /// Default path: `<data dir>/memories.db`
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("com", "mnemo", "mnemo").map(|dirs| dirs.data_dir().join("memories.db"))
    }

    /// Apply PRAGMAs to a connection
    fn configure_connection(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 30000;
             PRAGMA foreign_keys = ON;",
        )?;
        Ok(())
    }

    /// Open (and migrate) the store at the given path, or the default path
    pub fn new(db_path: Option<PathBuf>) -> Result<Self> {
        let path = match db_path {
            Some(p) => p,
            None => Self::default_path()
                .ok_or_else(|| StorageError::Init("Could not determine data directory".to_string()))?,
        };

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let writer = Connection::open(&path)?;
        Self::configure_connection(&writer)?;
        super::migrations::apply_migrations(&writer)?;

        let reader = Connection::open(&path)?;
        Self::configure_connection(&reader)?;

        Ok(Self {
            writer: Mutex::new(writer),
            reader: Mutex::new(reader),
            path,
        })
    }

    /// Path of the backing database file
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    fn writer(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.writer
            .lock()
            .map_err(|_| StorageError::Init("Writer lock poisoned".to_string()))
    }

    fn reader(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.reader
            .lock()
            .map_err(|_| StorageError::Init("Reader lock poisoned".to_string()))
    }

    // ========================================================================
    // WRITES
    // ========================================================================

    /// Insert a new record
    pub fn add(&self, record: &MemoryRecord) -> Result<()> {
        let writer = self.writer()?;
        writer.execute(
            "INSERT INTO memories (
                id, created, memory_days, recalled_since_last_batch, recall_count,
                emotional_intensity, emotional_valence, emotional_arousal, emotional_tags,
                decay_coefficient, category, keywords, current_level, \"trigger\", content,
                embedding, relations, retention_score, archived_at, protected,
                revival_requested, revival_requested_at
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5,
                ?6, ?7, ?8, ?9,
                ?10, ?11, ?12, ?13, ?14, ?15,
                ?16, ?17, ?18, ?19, ?20,
                ?21, ?22
            )",
            params![
                record.id,
                record.created.to_rfc3339(),
                record.memory_days,
                record.recalled_since_last_batch,
                record.recall_count,
                record.emotional_intensity,
                record.emotional_valence.as_str(),
                record.emotional_arousal,
                encode_list(&record.emotional_tags),
                record.decay_coefficient,
                record.category.as_str(),
                encode_list(&record.keywords),
                record.current_level,
                record.trigger,
                record.content,
                record.embedding.as_deref().map(encode_embedding),
                encode_list(&record.relations),
                record.retention_score,
                record.archived_at.map(|t| t.to_rfc3339()),
                record.protected,
                record.revival_requested,
                record.revival_requested_at.map(|t| t.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    /// Apply a partial update; a no-op when the patch is empty
    pub fn update(&self, id: &str, patch: MemoryPatch) -> Result<()> {
        let mut sets: Vec<&'static str> = Vec::new();
        let mut values: Vec<Value> = Vec::new();

        if let Some(v) = patch.memory_days {
            sets.push("memory_days = ?");
            values.push(Value::Real(v));
        }
        if let Some(v) = patch.recalled_since_last_batch {
            sets.push("recalled_since_last_batch = ?");
            values.push(Value::Integer(i64::from(v)));
        }
        if let Some(v) = patch.recall_count {
            sets.push("recall_count = ?");
            values.push(Value::Integer(v));
        }
        if let Some(v) = patch.decay_coefficient {
            sets.push("decay_coefficient = ?");
            values.push(Value::Real(v));
        }
        if let Some(v) = &patch.keywords {
            sets.push("keywords = ?");
            values.push(Value::Text(encode_list(v)));
        }
        if let Some(v) = patch.current_level {
            sets.push("current_level = ?");
            values.push(Value::Integer(v));
        }
        if let Some(v) = patch.trigger {
            sets.push("\"trigger\" = ?");
            values.push(Value::Text(v));
        }
        if let Some(v) = patch.content {
            sets.push("content = ?");
            values.push(Value::Text(v));
        }
        if let Some(v) = &patch.embedding {
            sets.push("embedding = ?");
            values.push(match v {
                Some(embedding) => Value::Blob(encode_embedding(embedding)),
                None => Value::Null,
            });
        }
        if let Some(v) = &patch.relations {
            sets.push("relations = ?");
            values.push(Value::Text(encode_list(v)));
        }
        if let Some(v) = patch.retention_score {
            sets.push("retention_score = ?");
            values.push(Value::Real(v));
        }
        if let Some(v) = patch.archived_at {
            sets.push("archived_at = ?");
            values.push(match v {
                Some(t) => Value::Text(t.to_rfc3339()),
                None => Value::Null,
            });
        }
        if let Some(v) = patch.protected {
            sets.push("protected = ?");
            values.push(Value::Integer(i64::from(v)));
        }
        if let Some(v) = patch.revival_requested {
            sets.push("revival_requested = ?");
            values.push(Value::Integer(i64::from(v)));
        }
        if let Some(v) = patch.revival_requested_at {
            sets.push("revival_requested_at = ?");
            values.push(match v {
                Some(t) => Value::Text(t.to_rfc3339()),
                None => Value::Null,
            });
        }

        if sets.is_empty() {
            return Ok(());
        }

        values.push(Value::Text(id.to_string()));
        let sql = format!("UPDATE memories SET {} WHERE id = ?", sets.join(", "));

        let writer = self.writer()?;
        writer.execute(&sql, params_from_iter(values))?;
        Ok(())
    }

    /// Delete a record; returns whether a row was removed
    pub fn delete(&self, id: &str) -> Result<bool> {
        let writer = self.writer()?;
        let changed = writer.execute("DELETE FROM memories WHERE id = ?1", params![id])?;
        Ok(changed > 0)
    }

    /// Raise the recalled flag for the given ids. Archived records are
    /// ignored; their revival goes through `revival_requested` instead.
    pub fn mark_recalled(&self, ids: &[String]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }

        let placeholders = vec!["?"; ids.len()].join(",");
        let sql = format!(
            "UPDATE memories SET recalled_since_last_batch = 1
             WHERE id IN ({placeholders}) AND archived_at IS NULL"
        );

        let writer = self.writer()?;
        let changed = writer.execute(
            &sql,
            params_from_iter(ids.iter().map(|id| Value::Text(id.clone()))),
        )?;
        Ok(changed)
    }

    /// Age every active record that was not recalled since the last batch
    pub fn age_active_unrecalled(&self) -> Result<usize> {
        let writer = self.writer()?;
        let changed = writer.execute(
            "UPDATE memories SET memory_days = memory_days + 1.0
             WHERE recalled_since_last_batch = 0 AND archived_at IS NULL",
            [],
        )?;
        Ok(changed)
    }

    // ========================================================================
    // READS
    // ========================================================================

    /// Fetch one record by id
    pub fn get(&self, id: &str) -> Result<Option<MemoryRecord>> {
        let reader = self.reader()?;
        let sql = format!("SELECT {MEMORY_COLUMNS} FROM memories WHERE id = ?1");
        let record = reader
            .query_row(&sql, params![id], row_to_record)
            .optional()?;
        Ok(record)
    }

    fn select_where(&self, predicate: &str, bind: &[&dyn rusqlite::ToSql]) -> Result<Vec<MemoryRecord>> {
        let reader = self.reader()?;
        let sql = format!("SELECT {MEMORY_COLUMNS} FROM memories WHERE {predicate}");
        let mut stmt = reader.prepare(&sql)?;
        let rows = stmt.query_map(bind, row_to_record)?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }

    /// All non-archived records
    pub fn get_active(&self) -> Result<Vec<MemoryRecord>> {
        self.select_where("archived_at IS NULL", &[])
    }

    /// All archived records
    pub fn get_archived(&self) -> Result<Vec<MemoryRecord>> {
        self.select_where("archived_at IS NOT NULL", &[])
    }

    /// Active records whose recalled flag is raised
    pub fn get_recalled_active(&self) -> Result<Vec<MemoryRecord>> {
        self.select_where("recalled_since_last_batch = 1 AND archived_at IS NULL", &[])
    }

    /// Archived records with a pending revival request
    pub fn get_revival_requested(&self) -> Result<Vec<MemoryRecord>> {
        self.select_where("revival_requested = 1 AND archived_at IS NOT NULL", &[])
    }

    /// Records at the given compression level
    pub fn get_by_level(&self, level: i64, include_archived: bool) -> Result<Vec<MemoryRecord>> {
        if include_archived {
            self.select_where("current_level = ?1", &[&level as &dyn rusqlite::ToSql])
        } else {
            self.select_where(
                "current_level = ?1 AND archived_at IS NULL",
                &[&level as &dyn rusqlite::ToSql],
            )
        }
    }

    /// Every record, optionally excluding the archive
    pub fn get_all(&self, include_archived: bool) -> Result<Vec<MemoryRecord>> {
        if include_archived {
            self.select_where("1 = 1", &[])
        } else {
            self.select_where("archived_at IS NULL", &[])
        }
    }

    // ========================================================================
    // COUNTS AND AGGREGATES
    // ========================================================================

    fn count_where(&self, predicate: &str) -> Result<usize> {
        let reader = self.reader()?;
        let sql = format!("SELECT COUNT(*) FROM memories WHERE {predicate}");
        let count: i64 = reader.query_row(&sql, [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Total record count
    pub fn count_memories(&self, include_archived: bool) -> Result<usize> {
        if include_archived {
            self.count_where("1 = 1")
        } else {
            self.count_where("archived_at IS NULL")
        }
    }

    /// Per-level counts over active records
    pub fn count_by_level(&self) -> Result<HashMap<i64, usize>> {
        let reader = self.reader()?;
        let mut stmt = reader.prepare(
            "SELECT current_level, COUNT(*) FROM memories
             WHERE archived_at IS NULL GROUP BY current_level",
        )?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)))?;
        let mut counts = HashMap::new();
        for row in rows {
            let (level, count) = row?;
            counts.insert(level, count as usize);
        }
        Ok(counts)
    }

    /// Per-category counts over active records
    pub fn count_by_category(&self) -> Result<HashMap<Category, usize>> {
        let reader = self.reader()?;
        let mut stmt = reader.prepare(
            "SELECT category, COUNT(*) FROM memories
             WHERE archived_at IS NULL GROUP BY category",
        )?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;
        let mut counts = HashMap::new();
        for row in rows {
            let (category, count) = row?;
            *counts.entry(Category::parse_name(&category)).or_insert(0) += count as usize;
        }
        Ok(counts)
    }

    /// Count of protected records
    pub fn count_protected(&self) -> Result<usize> {
        self.count_where("protected = 1")
    }

    /// Count of active records awaiting the next batch's reinforcement
    pub fn count_recalled_pending(&self) -> Result<usize> {
        self.count_where("recalled_since_last_batch = 1 AND archived_at IS NULL")
    }

    /// Mean retention score over active records (0 when empty)
    pub fn average_retention(&self) -> Result<f64> {
        let reader = self.reader()?;
        let avg: Option<f64> = reader.query_row(
            "SELECT AVG(retention_score) FROM memories WHERE archived_at IS NULL",
            [],
            |row| row.get(0),
        )?;
        Ok(avg.unwrap_or(0.0))
    }

    // ========================================================================
    // STATE SLOTS
    // ========================================================================

    /// Read a state slot
    pub fn state_get(&self, key: &str) -> Result<Option<String>> {
        let reader = self.reader()?;
        let value = reader
            .query_row("SELECT value FROM state WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    /// Write a state slot
    pub fn state_set(&self, key: &str, value: &str) -> Result<()> {
        let writer = self.writer()?;
        writer.execute(
            "INSERT OR REPLACE INTO state (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }
}

// ============================================================================
// ENCODING
// ============================================================================

/// Pack a vector as little-endian IEEE-754 single-precision bytes
pub fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(embedding.len() * 4);
    for value in embedding {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

/// Unpack a little-endian f32 blob
pub fn decode_embedding(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

fn encode_list(list: &[String]) -> String {
    serde_json::to_string(list).unwrap_or_else(|_| "[]".to_string())
}

fn decode_list(raw: Option<String>) -> Vec<String> {
    raw.as_deref()
        .and_then(|s| serde_json::from_str(s).ok())
        .unwrap_or_default()
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<MemoryRecord> {
    let valence: String = row.get(6)?;
    let category: String = row.get(10)?;
    let embedding: Option<Vec<u8>> = row.get(15)?;

    Ok(MemoryRecord {
        id: row.get(0)?,
        created: row.get(1)?,
        memory_days: row.get(2)?,
        recalled_since_last_batch: row.get(3)?,
        recall_count: row.get(4)?,
        emotional_intensity: row.get(5)?,
        emotional_valence: Valence::parse_name(&valence),
        emotional_arousal: row.get(7)?,
        emotional_tags: decode_list(row.get(8)?),
        decay_coefficient: row.get(9)?,
        category: Category::parse_name(&category),
        keywords: decode_list(row.get(11)?),
        current_level: row.get(12)?,
        trigger: row.get(13)?,
        content: row.get(14)?,
        embedding: embedding.as_deref().map(decode_embedding),
        relations: decode_list(row.get(16)?),
        retention_score: row.get(17)?,
        archived_at: row.get(18)?,
        protected: row.get(19)?,
        revival_requested: row.get(20)?,
        revival_requested_at: row.get(21)?,
    })
}

// ============================================================================
// TESTS
// ============================================================================
