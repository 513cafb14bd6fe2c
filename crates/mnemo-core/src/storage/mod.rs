//! Storage Module
//!
//! SQLite-based persistence with:
//! - One `memories` table, one `state` key/value table
//! - WAL journal, 30-second busy timeout
//! - Embeddings packed as little-endian f32 blobs
//! - One implicit transaction per mutating call

mod migrations;
mod sqlite;

pub use migrations::MIGRATIONS;
pub use sqlite::{MemoryPatch, Result, Store, StorageError, decode_embedding, encode_embedding};
