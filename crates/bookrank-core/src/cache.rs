//! Tiered fetch cache with graceful degradation.
//!
//! **Memory** – [`MemoryLayer`], process lifetime, never fails.
//! **Persistent** – optional [`PersistentStore`] (SQLite or JSON files), survives restarts.
//! **Remote** – the caller's fetch closure.
//!
//! [`get_or_fetch`](FetchCache::get_or_fetch) reads Memory, then Persistent,
//! then calls the remote once. A successful fetch is written through to
//! Memory and then Persistent. A failed fetch falls back to whatever the
//! Persistent tier holds and reports it as [`FetchResult::Degraded`]; with
//! nothing to fall back on the result is [`FetchResult::Unavailable`] carrying
//! the remote's error, including any retry-after hint.
//!
//! Write-throughs are serialized, so concurrent writers to one key leave
//! both tiers holding the same value.
//!
//! Entries are never expired or evicted here. The remote is never retried
//! here either; see [`crate::retry`] for caller-side retry.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::rate_limit::FetchError;
use crate::store::{MemoryLayer, PersistentStore, StoreError};

/// Outcome of a [`FetchCache::get_or_fetch`] call.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchResult<T> {
    /// Just fetched from the remote and written through.
    Fresh(T),
    /// Served from Memory or Persistent without touching the remote.
    Cached(T),
    /// The remote failed; this is the last persisted value and may be stale.
    Degraded { value: T, cause: FetchError },
    /// The remote failed and no tier had a value.
    Unavailable(FetchError),
}

impl<T> FetchResult<T> {
    pub fn value(&self) -> Option<&T> {
        match self {
            FetchResult::Fresh(v) | FetchResult::Cached(v) => Some(v),
            FetchResult::Degraded { value, .. } => Some(value),
            FetchResult::Unavailable(_) => None,
        }
    }

    pub fn into_value(self) -> Option<T> {
        match self {
            FetchResult::Fresh(v) | FetchResult::Cached(v) => Some(v),
            FetchResult::Degraded { value, .. } => Some(value),
            FetchResult::Unavailable(_) => None,
        }
    }

    /// True for a degraded result, which should be shown as possibly stale.
    pub fn is_stale(&self) -> bool {
        matches!(self, FetchResult::Degraded { .. })
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, FetchResult::Unavailable(_))
    }

    /// The remote error behind a degraded or unavailable result.
    pub fn cause(&self) -> Option<&FetchError> {
        match self {
            FetchResult::Degraded { cause, .. } | FetchResult::Unavailable(cause) => Some(cause),
            _ => None,
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        self.cause().and_then(FetchError::retry_after)
    }

    /// Transform the value, keeping the outcome kind and cause.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> FetchResult<U> {
        match self {
            FetchResult::Fresh(v) => FetchResult::Fresh(f(v)),
            FetchResult::Cached(v) => FetchResult::Cached(f(v)),
            FetchResult::Degraded { value, cause } => FetchResult::Degraded {
                value: f(value),
                cause,
            },
            FetchResult::Unavailable(cause) => FetchResult::Unavailable(cause),
        }
    }

    /// Short outcome name for logs and terminal output.
    pub fn tier(&self) -> &'static str {
        match self {
            FetchResult::Fresh(_) => "fresh",
            FetchResult::Cached(_) => "cached",
            FetchResult::Degraded { .. } => "degraded",
            FetchResult::Unavailable(_) => "unavailable",
        }
    }
}

/// Snapshot of cache counters and tier sizes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub memory_hits: u64,
    pub persistent_hits: u64,
    pub fresh: u64,
    pub degraded: u64,
    pub unavailable: u64,
    /// Write-throughs to the Persistent tier that failed and were skipped.
    pub persist_failures: u64,
    pub memory_entries: usize,
    /// `None` without a Persistent tier or when counting failed.
    pub persistent_entries: Option<usize>,
    pub backend: Option<&'static str>,
}

/// Thread-safe three-tier cache for remote fetch results.
pub struct FetchCache<T> {
    memory: MemoryLayer<T>,
    persistent: Option<Arc<dyn PersistentStore>>,
    write_lock: Mutex<()>,
    memory_hits: AtomicU64,
    persistent_hits: AtomicU64,
    fresh: AtomicU64,
    degraded: AtomicU64,
    unavailable: AtomicU64,
    persist_failures: AtomicU64,
}

impl<T> FetchCache<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync,
{
    /// Memory-only cache; nothing survives the process.
    pub fn in_memory() -> Self {
        Self::build(None)
    }

    /// Cache backed by `store` for the Persistent tier.
    pub fn with_store(store: Arc<dyn PersistentStore>) -> Self {
        Self::build(Some(store))
    }

    fn build(persistent: Option<Arc<dyn PersistentStore>>) -> Self {
        Self {
            memory: MemoryLayer::new(),
            persistent,
            write_lock: Mutex::new(()),
            memory_hits: AtomicU64::new(0),
            persistent_hits: AtomicU64::new(0),
            fresh: AtomicU64::new(0),
            degraded: AtomicU64::new(0),
            unavailable: AtomicU64::new(0),
            persist_failures: AtomicU64::new(0),
        }
    }

    /// Return the value for `key` from the cheapest tier that has it.
    ///
    /// With `force_refresh` the Memory and Persistent reads are skipped and the
    /// remote is always called; a successful result is still written through,
    /// and a failure still falls back to the Persistent tier.
    ///
    /// `fetch_fn` is called at most once.
    pub async fn get_or_fetch<F, Fut>(
        &self,
        key: impl AsRef<str>,
        fetch_fn: F,
        force_refresh: bool,
    ) -> FetchResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let key = key.as_ref();
        if key.is_empty() {
            self.unavailable.fetch_add(1, Ordering::Relaxed);
            return FetchResult::Unavailable(FetchError::InvalidKey);
        }

        if !force_refresh {
            if let Some(value) = self.memory.get(key) {
                self.memory_hits.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(key, "cache memory hit");
                return FetchResult::Cached(value);
            }

            if let Some(value) = self.read_persistent(key) {
                tracing::trace!(key, "cache persistent hit, refilling memory");
                self.memory.set(key, value.clone());
                self.persistent_hits.fetch_add(1, Ordering::Relaxed);
                return FetchResult::Cached(value);
            }

            tracing::trace!(key, "cache miss");
        }

        match fetch_fn().await {
            Ok(value) => {
                tracing::debug!(key, force_refresh, "fetched from remote");
                self.write_through(key, &value);
                self.fresh.fetch_add(1, Ordering::Relaxed);
                FetchResult::Fresh(value)
            }
            Err(cause) => match self.read_persistent(key) {
                Some(value) => {
                    tracing::warn!(key, error = %cause, "remote fetch failed, serving stale copy");
                    self.degraded.fetch_add(1, Ordering::Relaxed);
                    FetchResult::Degraded { value, cause }
                }
                None => {
                    tracing::warn!(key, error = %cause, "remote fetch failed, nothing cached");
                    self.unavailable.fetch_add(1, Ordering::Relaxed);
                    FetchResult::Unavailable(cause)
                }
            },
        }
    }

    /// Look at what the tiers hold for `key` without refilling or fetching.
    pub fn peek(&self, key: &str) -> Option<T> {
        self.memory.get(key).or_else(|| self.read_persistent(key))
    }

    /// Store a value computed outside [`get_or_fetch`](Self::get_or_fetch) in both tiers.
    pub fn put(&self, key: &str, value: &T) {
        if key.is_empty() {
            return;
        }
        self.write_through(key, value);
    }

    /// Wall-clock write time of the persisted entry for `key`.
    pub fn written_at(&self, key: &str) -> Option<u64> {
        let store = self.persistent.as_ref()?;
        match store.written_at(key) {
            Ok(at) => at,
            Err(e) => {
                tracing::warn!(key, error = %e, "persistent timestamp read failed");
                None
            }
        }
    }

    /// Drop every entry from both tiers.
    pub fn clear(&self) -> Result<(), StoreError> {
        self.memory.clear();
        if let Some(store) = &self.persistent {
            store.clear()?;
        }
        Ok(())
    }

    pub fn has_persistence(&self) -> bool {
        self.persistent.is_some()
    }

    /// The Memory tier, for inspection and seeding.
    pub fn memory(&self) -> &MemoryLayer<T> {
        &self.memory
    }

    pub fn stats(&self) -> CacheStats {
        let persistent_entries = self.persistent.as_ref().and_then(|s| s.len().ok());
        CacheStats {
            memory_hits: self.memory_hits.load(Ordering::Relaxed),
            persistent_hits: self.persistent_hits.load(Ordering::Relaxed),
            fresh: self.fresh.load(Ordering::Relaxed),
            degraded: self.degraded.load(Ordering::Relaxed),
            unavailable: self.unavailable.load(Ordering::Relaxed),
            persist_failures: self.persist_failures.load(Ordering::Relaxed),
            memory_entries: self.memory.len(),
            persistent_entries,
            backend: self.persistent.as_ref().map(|s| s.backend_name()),
        }
    }

    /// Read and decode from the Persistent tier. Errors count as a miss.
    fn read_persistent(&self, key: &str) -> Option<T> {
        let store = self.persistent.as_ref()?;
        let entry = match store.get(key) {
            Ok(entry) => entry?,
            Err(e) => {
                tracing::warn!(key, error = %e, "persistent read failed, treating as miss");
                return None;
            }
        };
        match serde_json::from_str(&entry.payload) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(key, error = %e, "undecodable persisted payload, treating as miss");
                None
            }
        }
    }

    /// Memory first, then Persistent. A Persistent failure is logged and skipped.
    fn write_through(&self, key: &str, value: &T) {
        // Guards no data, so a poisoned lock is still usable.
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        self.memory.set(key, value.clone());

        let Some(store) = &self.persistent else {
            return;
        };
        let result = serde_json::to_string(value)
            .map_err(StoreError::from)
            .and_then(|json| store.set(key, &json));
        if let Err(e) = result {
            self.persist_failures.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(key, backend = store.backend_name(), error = %e, "persistent write failed");
        }
    }
}

impl<T> std::fmt::Debug for FetchCache<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchCache")
            .field(
                "backend",
                &self.persistent.as_ref().map(|s| s.backend_name()),
            )
            .field("memory_hits", &self.memory_hits.load(Ordering::Relaxed))
            .field("persistent_hits", &self.persistent_hits.load(Ordering::Relaxed))
            .field("fresh", &self.fresh.load(Ordering::Relaxed))
            .field("degraded", &self.degraded.load(Ordering::Relaxed))
            .field("unavailable", &self.unavailable.load(Ordering::Relaxed))
            .finish()
    }
}
