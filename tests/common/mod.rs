//! Shared setup for engine integration tests.

#![allow(dead_code)]

use campus_poll::Engine;
use campus_poll::config::EngineConfig;
use campus_poll::db::{MemoryStore, SqliteStore};
use campus_poll::models::{Poll, PollDefinition, ScopeKind};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

pub const ADMIN: &str = "admin";

pub fn memory_engine() -> Engine {
    Engine::new(Arc::new(MemoryStore::new()), &EngineConfig::default())
}

/// Engine over a private in-memory SQLite database. A single pooled
/// connection keeps every query on the same database.
pub async fn sqlite_engine() -> Engine {
    let store = SqliteStore::connect("sqlite::memory:", 1)
        .await
        .expect("Failed to open in-memory SQLite store");
    Engine::new(Arc::new(store), &EngineConfig::default())
}

/// A fresh SQLite database file path under the temp dir.
pub fn temp_db_path() -> PathBuf {
    std::env::temp_dir().join(format!("campus-poll-{}.db", Uuid::new_v4()))
}

pub fn sqlite_url(path: &Path) -> String {
    format!("sqlite://{}", path.display())
}

/// Engine over a SQLite file with `connections` pooled connections, so
/// concurrent tasks really hit the database from separate connections.
pub async fn sqlite_file_engine(path: &Path, connections: u32) -> Engine {
    let store = SqliteStore::connect(&sqlite_url(path), connections)
        .await
        .expect("Failed to open SQLite file store");
    Engine::new(Arc::new(store), &EngineConfig::default())
}

pub fn remove_db(path: &Path) {
    for suffix in ["", "-journal", "-wal", "-shm"] {
        let _ = std::fs::remove_file(format!("{}{}", path.display(), suffix));
    }
}

pub fn lunch() -> PollDefinition {
    PollDefinition::new("Lunch", ScopeKind::University, &["Pizza", "Sushi"])
}

pub fn option_id(poll: &Poll, text: &str) -> String {
    poll.options
        .iter()
        .find(|o| o.text == text)
        .map(|o| o.id.clone())
        .unwrap_or_else(|| panic!("poll has no option {:?}", text))
}

pub fn votes_for(poll: &Poll, text: &str) -> u64 {
    poll.options
        .iter()
        .find(|o| o.text == text)
        .map(|o| o.vote_count)
        .unwrap_or_else(|| panic!("poll has no option {:?}", text))
}
