//! Storage tiers below the fetch cache.
//!
//! [`MemoryLayer`] is the process-lifetime tier and never fails.
//! [`PersistentStore`] is the survives-a-restart tier; it stores JSON text and
//! reports I/O problems as [`StoreError`], which the cache logs and treats as
//! a miss.

use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;

pub mod file;
pub mod memory;
pub mod sqlite;

pub use file::FileStore;
pub use memory::MemoryLayer;
pub use sqlite::SqliteStore;

/// A payload read back from a persistent store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEntry {
    /// Serialized JSON payload.
    pub payload: String,
    /// Wall-clock write time, seconds since the Unix epoch.
    pub written_at: u64,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("store lock poisoned")]
    Poisoned,
}

/// Durable key → JSON store. Implementations must be safe to share across threads.
pub trait PersistentStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<StoredEntry>, StoreError>;

    /// Insert or overwrite `key`, stamping it with the current time.
    fn set(&self, key: &str, payload: &str) -> Result<(), StoreError>;

    fn has(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.get(key)?.is_some())
    }

    fn written_at(&self, key: &str) -> Result<Option<u64>, StoreError> {
        Ok(self.get(key)?.map(|e| e.written_at))
    }

    fn len(&self) -> Result<usize, StoreError>;

    fn clear(&self) -> Result<(), StoreError>;

    /// Short name for logs and `cache stats`.
    fn backend_name(&self) -> &'static str;
}

/// Which persistent backend to open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StoreBackend {
    #[default]
    Sqlite,
    File,
}

impl std::str::FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sqlite" => Ok(StoreBackend::Sqlite),
            "file" | "files" => Ok(StoreBackend::File),
            other => Err(format!(
                "unknown cache backend '{other}' (expected 'sqlite' or 'file')"
            )),
        }
    }
}

impl std::fmt::Display for StoreBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            StoreBackend::Sqlite => "sqlite",
            StoreBackend::File => "file",
        })
    }
}

pub(crate) fn now_epoch() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_from_str() {
        assert_eq!("sqlite".parse::<StoreBackend>(), Ok(StoreBackend::Sqlite));
        assert_eq!(" FILE ".parse::<StoreBackend>(), Ok(StoreBackend::File));
        assert!("redis".parse::<StoreBackend>().is_err());
        assert_eq!(StoreBackend::File.to_string(), "file");
    }
}
