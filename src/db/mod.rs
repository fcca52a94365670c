pub mod models;
pub mod queries;

use crate::fingerprint::StructureFingerprint;
use rusqlite::Connection;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Fingerprint payload error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Migration failed: {0}")]
    Migration(String),
}

pub type Result<T> = std::result::Result<T, DbError>;

/// Keyed collection of fingerprints, one per song id.
///
/// `upsert` takes `&mut self`: the store assumes a single writer and callers
/// that analyze in parallel must funnel writes through one owner.
pub trait FingerprintStore {
    fn get(&self, song_id: &str) -> Result<Option<StructureFingerprint>>;
    /// Replace the record with the same song id, else append.
    fn upsert(&mut self, fingerprint: StructureFingerprint) -> Result<()>;
    fn all(&self) -> Result<Vec<StructureFingerprint>>;
}

/// In-process store with the same replace-by-id semantics as [`Database`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Vec<StructureFingerprint>,
}

impl FingerprintStore for MemoryStore {
    fn get(&self, song_id: &str) -> Result<Option<StructureFingerprint>> {
        Ok(self.records.iter().find(|f| f.song_id == song_id).cloned())
    }

    fn upsert(&mut self, fingerprint: StructureFingerprint) -> Result<()> {
        match self.records.iter_mut().find(|f| f.song_id == fingerprint.song_id) {
            Some(existing) => *existing = fingerprint,
            None => self.records.push(fingerprint),
        }
        Ok(())
    }

    fn all(&self) -> Result<Vec<StructureFingerprint>> {
        Ok(self.records.clone())
    }
}

pub struct Database {
    pub conn: Connection,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        self.conn.pragma_update(None, "journal_mode", "WAL")?;
        self.conn.pragma_update(None, "synchronous", "NORMAL")?;
        self.migrate()?;
        Ok(())
    }

    fn migrate(&self) -> Result<()> {
        let version: i32 = self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap_or(0);

        if version > SCHEMA_VERSION {
            return Err(DbError::Migration(format!(
                "database schema v{} is newer than supported v{}",
                version, SCHEMA_VERSION
            )));
        }
        if version < 1 {
            self.migrate_v1()?;
        }

        self.conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        Ok(())
    }

    /// V1: one row per song with summary columns and the full fingerprint as JSON.
    fn migrate_v1(&self) -> Result<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS fingerprints (
                song_id         TEXT PRIMARY KEY,
                tempo           REAL NOT NULL,
                meter           TEXT NOT NULL,
                archetype       TEXT NOT NULL,
                duration        REAL NOT NULL,
                chorus_count    INTEGER NOT NULL,
                chorus_ratio    REAL NOT NULL,
                structure       TEXT NOT NULL,
                payload         TEXT NOT NULL,

                created_at      TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at      TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE INDEX IF NOT EXISTS idx_fingerprints_archetype ON fingerprints(archetype);
            CREATE INDEX IF NOT EXISTS idx_fingerprints_meter ON fingerprints(meter);
            ",
        )?;
        Ok(())
    }
}

const SCHEMA_VERSION: i32 = 1;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::tests::make_fingerprint;

    #[test]
    fn test_open_in_memory_sets_version() {
        let db = Database::open_in_memory().unwrap();
        let version: i32 = db
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);
        // Re-running migrations is a no-op
        db.migrate().unwrap();
    }

    #[test]
    fn test_rejects_newer_schema() {
        let db = Database::open_in_memory().unwrap();
        db.conn.pragma_update(None, "user_version", 99).unwrap();
        assert!(matches!(db.migrate(), Err(DbError::Migration(_))));
    }

    #[test]
    fn test_memory_store_replaces_by_id() {
        let mut store = MemoryStore::default();
        store.upsert(make_fingerprint("a", 100.0)).unwrap();
        store.upsert(make_fingerprint("b", 120.0)).unwrap();
        store.upsert(make_fingerprint("a", 90.0)).unwrap();

        let all = store.all().unwrap();
        assert_eq!(all.len(), 2);
        // Replaced in place, order kept
        assert_eq!(all[0].song_id, "a");
        assert_eq!(all[0].tempo, 90.0);
        assert!(store.get("missing").unwrap().is_none());
    }
}
