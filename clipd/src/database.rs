//! SQLite persistence mirror for clipboard history.
//!
//! The in-memory store is authoritative at runtime; this layer only
//! mirrors mutations so history survives a restart. Every call is
//! best-effort — callers log failures and move on.

use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;
use thiserror::Error;

use crate::models::Entry;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),
}

pub type DatabaseResult<T> = Result<T, DatabaseError>;

/// Thread-safe database handle using a small connection pool.
/// WAL mode lets the async mirror writes proceed without blocking reads.
pub struct Database {
    pool: Pool<SqliteConnectionManager>,
}

impl Database {
    /// Open or create a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> DatabaseResult<Self> {
        let manager = SqliteConnectionManager::file(path).with_init(|conn| {
            conn.execute_batch(
                "
                PRAGMA journal_mode=WAL;
                PRAGMA synchronous=NORMAL;
                PRAGMA cache_size=-8000;
                PRAGMA busy_timeout=5000;
            ",
            )?;
            Ok(())
        });

        let pool = Pool::builder().max_size(4).build(manager)?;

        let db = Self { pool };
        db.setup_schema()?;
        Ok(db)
    }

    fn conn(&self) -> DatabaseResult<PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }

    fn setup_schema(&self) -> DatabaseResult<()> {
        let conn = self.conn()?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS clips (
                id INTEGER PRIMARY KEY,
                content BLOB NOT NULL,
                mime_type TEXT NOT NULL,
                hash TEXT UNIQUE NOT NULL,
                preview TEXT,
                timestamp INTEGER NOT NULL,
                pinned INTEGER DEFAULT 0,
                size INTEGER NOT NULL
            );
        ",
        )?;
        Ok(())
    }

    /// Fetch every persisted entry, newest first. Used once at startup
    /// to seed the store.
    pub fn load_all(&self) -> DatabaseResult<Vec<Entry>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, content, mime_type, hash, preview, timestamp, pinned, size
             FROM clips ORDER BY timestamp DESC",
        )?;
        let entries = stmt
            .query_map([], |row| {
                let content: Vec<u8> = row.get(1)?;
                Ok(Entry {
                    id: row.get::<_, i64>(0)? as u64,
                    content: Bytes::from(content),
                    media_type: row.get(2)?,
                    fingerprint: row.get(3)?,
                    preview: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
                    timestamp: row.get(5)?,
                    pinned: row.get(6)?,
                    size: row.get::<_, i64>(7)? as usize,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    /// Upsert one entry.
    pub fn save(&self, entry: &Entry) -> DatabaseResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO clips
             (id, content, mime_type, hash, preview, timestamp, pinned, size)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                entry.id as i64,
                entry.content.as_ref(),
                entry.media_type,
                entry.fingerprint,
                entry.preview,
                entry.timestamp,
                entry.pinned,
                entry.size as i64,
            ],
        )?;
        Ok(())
    }

    /// Fire-and-forget mirror write, off the request path. Failures are
    /// logged and never surfaced to the client.
    pub fn save_async(self: &Arc<Self>, entry: Entry) {
        let db = Arc::clone(self);
        tokio::task::spawn_blocking(move || {
            if let Err(err) = db.save(&entry) {
                tracing::warn!(id = entry.id, %err, "failed to mirror entry to database");
            }
        });
    }

    pub fn delete(&self, id: u64) -> DatabaseResult<()> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM clips WHERE id = ?1", params![id as i64])?;
        Ok(())
    }

    pub fn clear(&self) -> DatabaseResult<()> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM clips", [])?;
        Ok(())
    }

    pub fn update_pin(&self, id: u64, pinned: bool) -> DatabaseResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE clips SET pinned = ?1 WHERE id = ?2",
            params![pinned, id as i64],
        )?;
        Ok(())
    }
}
