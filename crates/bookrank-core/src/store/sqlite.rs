//! SQLite persistent store.
//!
//! Writes go through a single connection behind a [`Mutex`]; reads use a
//! [`ReadPool`] of read-only connections so concurrent lookups don't queue
//! behind a write. WAL mode lets the two coexist.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rusqlite::{Connection, OpenFlags, OptionalExtension, params};

use super::{PersistentStore, StoreError, StoredEntry, now_epoch};

/// Open a SQLite connection with WAL mode and standard pragmas.
fn open_sqlite(path: &Path, read_only: bool) -> Result<Connection, rusqlite::Error> {
    let flags = if read_only {
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX
    } else {
        OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX
    };
    let conn = Connection::open_with_flags(path, flags)?;
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA busy_timeout = 5000;",
    )?;
    Ok(conn)
}

struct SqliteWriter {
    conn: Connection,
}

impl SqliteWriter {
    fn open(path: &Path) -> Result<Self, rusqlite::Error> {
        let conn = open_sqlite(path, false)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS fetch_cache (
                 cache_key  TEXT PRIMARY KEY,
                 payload    TEXT NOT NULL,
                 written_at INTEGER NOT NULL
             );",
        )?;
        Ok(Self { conn })
    }

    fn upsert(&self, key: &str, payload: &str, epoch: u64) -> Result<(), rusqlite::Error> {
        self.conn.execute(
            "INSERT OR REPLACE INTO fetch_cache (cache_key, payload, written_at)
             VALUES (?1, ?2, ?3)",
            params![key, payload, epoch],
        )?;
        Ok(())
    }

    fn clear(&self) -> Result<(), rusqlite::Error> {
        self.conn.execute("DELETE FROM fetch_cache", [])?;
        // Without VACUUM the deleted pages stay allocated.
        self.conn.execute_batch("VACUUM")
    }
}

/// Pool of read-only connections. Opens a new one when the pool is empty.
struct ReadPool {
    pool: Mutex<Vec<Connection>>,
    path: PathBuf,
}

impl ReadPool {
    fn new(path: &Path) -> Self {
        Self {
            pool: Mutex::new(Vec::new()),
            path: path.to_path_buf(),
        }
    }

    fn acquire(&self) -> Result<Connection, rusqlite::Error> {
        if let Ok(mut pool) = self.pool.lock()
            && let Some(conn) = pool.pop()
        {
            return Ok(conn);
        }
        open_sqlite(&self.path, true)
    }

    fn release(&self, conn: Connection) {
        if let Ok(mut pool) = self.pool.lock() {
            pool.push(conn);
        }
    }

    fn with_conn<R>(
        &self,
        f: impl FnOnce(&Connection) -> Result<R, rusqlite::Error>,
    ) -> Result<R, rusqlite::Error> {
        let conn = self.acquire()?;
        let result = f(&conn);
        self.release(conn);
        result
    }
}

/// Persistent store backed by a single SQLite table.
pub struct SqliteStore {
    writer: Mutex<SqliteWriter>,
    read_pool: ReadPool,
    path: PathBuf,
}

impl SqliteStore {
    /// Open (or create) the database at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let writer = SqliteWriter::open(path)?;
        tracing::info!(path = %path.display(), "opened sqlite cache");
        Ok(Self {
            writer: Mutex::new(writer),
            read_pool: ReadPool::new(path),
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PersistentStore for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<StoredEntry>, StoreError> {
        let entry = self.read_pool.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT payload, written_at FROM fetch_cache WHERE cache_key = ?1",
            )?;
            stmt.query_row(params![key], |row| {
                Ok(StoredEntry {
                    payload: row.get(0)?,
                    written_at: row.get(1)?,
                })
            })
            .optional()
        })?;
        Ok(entry)
    }

    fn set(&self, key: &str, payload: &str) -> Result<(), StoreError> {
        let writer = self.writer.lock().map_err(|_| StoreError::Poisoned)?;
        writer.upsert(key, payload, now_epoch())?;
        Ok(())
    }

    fn has(&self, key: &str) -> Result<bool, StoreError> {
        let found = self.read_pool.with_conn(|conn| {
            conn.query_row(
                "SELECT 1 FROM fetch_cache WHERE cache_key = ?1",
                params![key],
                |_| Ok(()),
            )
            .optional()
        })?;
        Ok(found.is_some())
    }

    fn len(&self) -> Result<usize, StoreError> {
        let count: i64 = self.read_pool.with_conn(|conn| {
            conn.query_row("SELECT COUNT(*) FROM fetch_cache", [], |row| row.get(0))
        })?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    fn clear(&self) -> Result<(), StoreError> {
        let writer = self.writer.lock().map_err(|_| StoreError::Poisoned)?;
        writer.clear()?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "sqlite"
    }
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore")
            .field("path", &self.path)
            .finish()
    }
}
