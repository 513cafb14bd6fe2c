//! Database Migrations
//!
//! Schema migration definitions for the storage layer.

/// Migration definitions
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "Initial schema: memories and state tables",
        up: MIGRATION_V1_UP,
    },
    Migration {
        version: 2,
        description: "Archive revival request tracking",
        up: MIGRATION_V2_UP,
    },
];

/// A database migration
#[derive(Debug, Clone)]
pub struct Migration {
    /// Version number
    pub version: u32,
    /// Description
    pub description: &'static str,
    /// SQL to apply
    pub up: &'static str,
}

/// V1: Initial schema
const MIGRATION_V1_UP: &str = r#"
CREATE TABLE IF NOT EXISTS memories (
    id TEXT PRIMARY KEY,
    created TEXT NOT NULL,

    -- Decay state, driven by the daily batch
    memory_days REAL NOT NULL DEFAULT 0.0,
    recalled_since_last_batch INTEGER NOT NULL DEFAULT 0,
    recall_count INTEGER NOT NULL DEFAULT 0,
    decay_coefficient REAL NOT NULL,
    retention_score REAL,

    -- Emotional annotations, immutable after ingestion
    emotional_intensity INTEGER NOT NULL,
    emotional_valence TEXT NOT NULL,
    emotional_arousal INTEGER NOT NULL,
    emotional_tags TEXT DEFAULT '[]',

    -- Classification
    category TEXT NOT NULL,
    keywords TEXT DEFAULT '[]',

    -- Compression tier and text at the current tier
    current_level INTEGER NOT NULL DEFAULT 1,
    "trigger" TEXT NOT NULL,
    content TEXT NOT NULL,

    -- 1536-dim f32 little-endian blob, NULL when embedding failed
    embedding BLOB,

    -- Directed cross-references (JSON array of ids)
    relations TEXT DEFAULT '[]',

    -- Archive and protection
    archived_at TEXT,
    protected INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_memories_retention ON memories(retention_score);
CREATE INDEX IF NOT EXISTS idx_memories_level ON memories(current_level);
CREATE INDEX IF NOT EXISTS idx_memories_archived ON memories(archived_at);
CREATE INDEX IF NOT EXISTS idx_memories_created ON memories(created);

-- Key/value slots, carries at least last_compression_run
CREATE TABLE IF NOT EXISTS state (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL
);

INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, datetime('now'));
"#;

/// V2: Revival requests raised by retrieval on archived hits
const MIGRATION_V2_UP: &str = r#"
ALTER TABLE memories ADD COLUMN revival_requested INTEGER NOT NULL DEFAULT 0;
ALTER TABLE memories ADD COLUMN revival_requested_at TEXT;

CREATE INDEX IF NOT EXISTS idx_memories_revival ON memories(revival_requested);

UPDATE schema_version SET version = 2, applied_at = datetime('now');
"#;

/// Get current schema version from database
pub fn get_current_version(conn: &rusqlite::Connection) -> rusqlite::Result<u32> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )
    .or(Ok(0))
}

/// Apply pending migrations
pub fn apply_migrations(conn: &rusqlite::Connection) -> rusqlite::Result<u32> {
    let current_version = get_current_version(conn)?;
    let mut applied = 0;

    for migration in MIGRATIONS {
        if migration.version > current_version {
            tracing::info!(
                "Applying migration v{}: {}",
                migration.version,
                migration.description
            );
            conn.execute_batch(migration.up)?;
            applied += 1;
        }
    }

    Ok(applied)
}
