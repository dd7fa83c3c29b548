//! Persistent record of entries already acted upon.
//!
//! Backed by a single SQLite file so the history can be inspected with the
//! `sqlite3` shell. All identifiers are loaded into memory on open; lookups
//! never touch the disk.

use std::collections::HashSet;
use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use tracing::debug;

use crate::error::StoreError;

pub(crate) const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS seen (
    entry_id      TEXT PRIMARY KEY,
    first_seen_at TEXT NOT NULL,
    title         TEXT NOT NULL,
    link          TEXT
)";

/// One persisted row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeenRecord {
    pub entry_id: String,
    pub first_seen_at: DateTime<Utc>,
    pub title: String,
    pub link: Option<String>,
}

/// Dedup store: an in-memory index in front of an append-only table.
pub struct SeenStore {
    conn: Connection,
    index: HashSet<String>,
}

impl SeenStore {
    /// Open (creating if needed) the store at `path` and load its index.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        Self::init(Connection::open(path)?)
    }

    /// A throwaway store for tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;

        let index = {
            let mut stmt = conn.prepare("SELECT entry_id FROM seen")?;
            let ids = stmt.query_map([], |row| row.get::<_, String>(0))?;
            ids.collect::<Result<HashSet<_>, _>>()?
        };
        debug!(records = index.len(), "dedup store loaded");

        Ok(Self { conn, index })
    }

    pub fn has_seen(&self, entry_id: &str) -> bool {
        self.index.contains(entry_id)
    }

    /// Durably record `entry_id`. Recording an id twice is a no-op.
    pub fn record_seen(
        &mut self,
        entry_id: &str,
        title: &str,
        link: Option<&str>,
        seen_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        if self.index.contains(entry_id) {
            return Ok(());
        }
        self.conn.execute(
            "INSERT OR IGNORE INTO seen (entry_id, first_seen_at, title, link)
             VALUES (?1, ?2, ?3, ?4)",
            params![entry_id, seen_at, title, link],
        )?;
        self.index.insert(entry_id.to_string());
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Every record, oldest first.
    pub fn records(&self) -> Result<Vec<SeenRecord>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT entry_id, first_seen_at, title, link FROM seen
             ORDER BY first_seen_at, entry_id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(SeenRecord {
                entry_id: row.get(0)?,
                first_seen_at: row.get(1)?,
                title: row.get(2)?,
                link: row.get(3)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}
