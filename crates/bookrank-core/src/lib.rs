use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

pub mod book_service;
pub mod cache;
pub mod config_file;
pub mod key;
pub mod models;
pub mod rate_limit;
pub mod retry;
pub mod source;
pub mod store;
pub mod strategy;

// Re-export for convenience
pub use book_service::{AllCategories, BookService};
pub use cache::{CacheStats, FetchCache, FetchResult};
pub use key::CacheKey;
pub use models::{Award, AwardBook, Book, BookDetails, CachePayload, Category};
pub use rate_limit::{FetchError, RateLimiters};
pub use retry::{RetryPolicy, retry_unavailable};
pub use store::{FileStore, PersistentStore, SqliteStore, StoreBackend, StoreError};

use config_file::ConfigFile;

/// Errors from building the service or validating a request before it reaches the cache.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("failed to open {backend} cache at {}: {source}", .path.display())]
    OpenStore {
        backend: StoreBackend,
        path: PathBuf,
        #[source]
        source: StoreError,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("failed to build HTTP client: {0}")]
    Http(#[from] reqwest::Error),
    #[error("could not determine config directory")]
    NoConfigDir,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to serialize config: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),
    #[error("invalid config value for {field}: {message}")]
    InvalidConfig { field: &'static str, message: String },
    #[error("unknown category '{0}'")]
    UnknownCategory(String),
    #[error("unknown award '{0}'")]
    UnknownAward(String),
    #[error("invalid search keyword: {0}")]
    InvalidKeyword(String),
    #[error("invalid ISBN '{0}'")]
    InvalidIsbn(String),
    #[error("invalid year range {start}-{end}")]
    InvalidYearRange { start: i32, end: i32 },
}

/// Runtime configuration, resolved from config files, environment and flags.
#[derive(Clone)]
pub struct Config {
    pub nyt_api_key: Option<String>,
    pub google_api_key: Option<String>,
    /// Where the persistent tier lives. `None` keeps the cache in memory.
    pub cache_path: Option<PathBuf>,
    pub cache_backend: StoreBackend,
    pub nyt_calls_per_minute: u32,
    pub request_timeout_secs: u64,
    /// Extra attempts after an unavailable lookup. 0 disables retry.
    pub max_retries: u32,
    pub categories: Vec<Category>,
    pub rate_limiters: Arc<RateLimiters>,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("nyt_api_key", &self.nyt_api_key.as_ref().map(|_| "***"))
            .field(
                "google_api_key",
                &self.google_api_key.as_ref().map(|_| "***"),
            )
            .field("cache_path", &self.cache_path)
            .field("cache_backend", &self.cache_backend)
            .field("nyt_calls_per_minute", &self.nyt_calls_per_minute)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("max_retries", &self.max_retries)
            .field("categories", &self.categories.len())
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            nyt_api_key: None,
            google_api_key: None,
            cache_path: None,
            cache_backend: StoreBackend::Sqlite,
            nyt_calls_per_minute: 20,
            request_timeout_secs: 15,
            max_retries: 3,
            categories: models::default_categories(),
            rate_limiters: Arc::new(RateLimiters::default()),
        }
    }
}

impl Config {
    /// Resolve from a loaded config file and the environment.
    ///
    /// Environment variables override file values: `NYT_API_KEY`,
    /// `GOOGLE_API_KEY`, `BOOKRANK_CACHE_PATH`, `BOOKRANK_CACHE_BACKEND`.
    /// Without a configured path the platform cache directory is used.
    pub fn resolve(
        file: &ConfigFile,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, CoreError> {
        let defaults = Config::default();
        let env = |name: &str| env(name).filter(|v| !v.trim().is_empty());

        let keys = file.api_keys.clone().unwrap_or_default();
        let cache = file.cache.clone().unwrap_or_default();
        let limits = file.limits.clone().unwrap_or_default();

        let cache_backend = match env("BOOKRANK_CACHE_BACKEND").or(cache.backend) {
            Some(name) => name
                .parse::<StoreBackend>()
                .map_err(|message| CoreError::InvalidConfig {
                    field: "cache.backend",
                    message,
                })?,
            None => defaults.cache_backend,
        };
        let cache_path = env("BOOKRANK_CACHE_PATH")
            .or(cache.path)
            .map(PathBuf::from)
            .or_else(|| default_cache_path(cache_backend));

        let categories = match &file.categories {
            Some(table) if !table.is_empty() => table
                .iter()
                .map(|(id, name)| Category::new(id.clone(), name.clone()))
                .collect(),
            _ => defaults.categories,
        };

        let nyt_calls_per_minute = limits
            .nyt_calls_per_minute
            .unwrap_or(defaults.nyt_calls_per_minute);
        if nyt_calls_per_minute == 0 {
            return Err(CoreError::InvalidConfig {
                field: "limits.nyt_calls_per_minute",
                message: "must be at least 1".into(),
            });
        }

        Ok(Self {
            nyt_api_key: env("NYT_API_KEY").or(keys.nyt_api_key),
            google_api_key: env("GOOGLE_API_KEY").or(keys.google_api_key),
            cache_path,
            cache_backend,
            nyt_calls_per_minute,
            request_timeout_secs: limits
                .request_timeout_secs
                .unwrap_or(defaults.request_timeout_secs),
            max_retries: limits.max_retries.unwrap_or(defaults.max_retries),
            categories,
            rate_limiters: Arc::new(RateLimiters::new(nyt_calls_per_minute)),
        })
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Retry policy for interactive use: short waits, `max_retries` extra attempts.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_retries.saturating_add(1),
            base_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(10),
        }
    }

    /// The config file that `config init` writes: current values, keys omitted.
    pub fn to_config_file(&self) -> ConfigFile {
        ConfigFile {
            api_keys: Some(config_file::ApiKeysConfig::default()),
            cache: Some(config_file::CacheConfig {
                path: self.cache_path.as_ref().map(|p| p.display().to_string()),
                backend: Some(self.cache_backend.to_string()),
            }),
            limits: Some(config_file::LimitsConfig {
                nyt_calls_per_minute: Some(self.nyt_calls_per_minute),
                request_timeout_secs: Some(self.request_timeout_secs),
                max_retries: Some(self.max_retries),
            }),
            categories: Some(
                self.categories
                    .iter()
                    .map(|c| (c.id.clone(), c.name.clone()))
                    .collect(),
            ),
        }
    }
}

/// Default persistent location under the platform cache directory.
pub fn default_cache_path(backend: StoreBackend) -> Option<PathBuf> {
    let dir = dirs::cache_dir()?.join("bookrank");
    Some(match backend {
        StoreBackend::Sqlite => dir.join("cache.db"),
        StoreBackend::File => dir.join("entries"),
    })
}

/// Open the persistent store for `backend` at `path`.
pub fn open_store(
    path: &Path,
    backend: StoreBackend,
) -> Result<Arc<dyn PersistentStore>, CoreError> {
    let opened: Result<Arc<dyn PersistentStore>, StoreError> = match backend {
        StoreBackend::Sqlite => {
            if let Some(parent) = path.parent()
                && !parent.as_os_str().is_empty()
            {
                std::fs::create_dir_all(parent)?;
            }
            SqliteStore::open(path).map(|s| Arc::new(s) as Arc<dyn PersistentStore>)
        }
        StoreBackend::File => FileStore::open(path).map(|s| Arc::new(s) as Arc<dyn PersistentStore>),
    };
    opened.map_err(|source| CoreError::OpenStore {
        backend,
        path: path.to_path_buf(),
        source,
    })
}

/// Build a [`FetchCache`] from configuration.
///
/// If `cache_path` is set, opens the persistent store for `backend`. When that
/// fails, or no path is given, returns a memory-only cache.
pub fn build_fetch_cache<T>(cache_path: Option<&Path>, backend: StoreBackend) -> Arc<FetchCache<T>>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync,
{
    if let Some(path) = cache_path {
        match open_store(path, backend) {
            Ok(store) => return Arc::new(FetchCache::with_store(store)),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to open cache, falling back to in-memory");
            }
        }
    }
    Arc::new(FetchCache::in_memory())
}

#[cfg(test)]
mod build_cache_tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};

    static COUNTER: AtomicU32 = AtomicU32::new(0);

    fn temp_path() -> PathBuf {
        let id = COUNTER.fetch_add(1, Ordering::SeqCst);
        std::env::temp_dir()
            .join(format!(
                "bookrank_build_cache_test_{}_{}",
                std::process::id(),
                id,
            ))
            .join("cache.db")
    }

    #[test]
    fn no_path_returns_in_memory() {
        let cache = build_fetch_cache::<CachePayload>(None, StoreBackend::Sqlite);
        assert!(!cache.has_persistence());
    }

    #[test]
    fn creates_parent_directory() {
        let path = temp_path();
        if let Some(parent) = path.parent() {
            let _ = std::fs::remove_dir_all(parent);
        }

        let cache = build_fetch_cache::<CachePayload>(Some(&path), StoreBackend::Sqlite);
        assert!(cache.has_persistence());
        assert_eq!(cache.stats().backend, Some("sqlite"));
        assert!(path.parent().unwrap().exists());

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn file_backend_uses_directory() {
        let dir = tempfile::tempdir().unwrap();
        let cache =
            build_fetch_cache::<CachePayload>(Some(&dir.path().join("entries")), StoreBackend::File);
        assert_eq!(cache.stats().backend, Some("file"));
    }

    #[test]
    fn unopenable_path_falls_back_to_memory() {
        let dir = tempfile::tempdir().unwrap();
        // A regular file where the SQLite parent directory should be.
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "x").unwrap();
        let cache = build_fetch_cache::<CachePayload>(
            Some(&blocker.join("cache.db")),
            StoreBackend::Sqlite,
        );
        assert!(!cache.has_persistence());
    }

    // ── Config::resolve ────────────────────────────────────────────────

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn resolve_defaults() {
        let config = Config::resolve(&ConfigFile::default(), env_from(&[])).unwrap();
        assert_eq!(config.nyt_calls_per_minute, 20);
        assert_eq!(config.request_timeout(), Duration::from_secs(15));
        assert_eq!(config.categories.len(), 4);
        assert_eq!(config.cache_backend, StoreBackend::Sqlite);
        assert_eq!(config.retry_policy().max_attempts, 4);
        assert!(config.nyt_api_key.is_none());
    }

    #[test]
    fn env_overrides_file() {
        let file: ConfigFile = toml::from_str(
            r#"
[api_keys]
nyt_api_key = "from-file"
google_api_key = "google-file"

[cache]
path = "/file/cache.db"
"#,
        )
        .unwrap();
        let config = Config::resolve(
            &file,
            env_from(&[
                ("NYT_API_KEY", "from-env"),
                ("GOOGLE_API_KEY", "  "),
                ("BOOKRANK_CACHE_BACKEND", "file"),
                ("BOOKRANK_CACHE_PATH", "/env/entries"),
            ]),
        )
        .unwrap();
        assert_eq!(config.nyt_api_key.as_deref(), Some("from-env"));
        // Blank env values don't override.
        assert_eq!(config.google_api_key.as_deref(), Some("google-file"));
        assert_eq!(config.cache_backend, StoreBackend::File);
        assert_eq!(config.cache_path, Some(PathBuf::from("/env/entries")));
    }

    #[test]
    fn resolve_rejects_bad_values() {
        let file: ConfigFile = toml::from_str("[cache]\nbackend = \"redis\"\n").unwrap();
        assert!(matches!(
            Config::resolve(&file, env_from(&[])),
            Err(CoreError::InvalidConfig { field: "cache.backend", .. })
        ));

        let file: ConfigFile = toml::from_str("[limits]\nnyt_calls_per_minute = 0\n").unwrap();
        assert!(Config::resolve(&file, env_from(&[])).is_err());
    }

    #[test]
    fn custom_categories_replace_defaults() {
        let file: ConfigFile =
            toml::from_str("[categories]\nyoung-adult-hardcover = \"Young Adult\"\n").unwrap();
        let config = Config::resolve(&file, env_from(&[])).unwrap();
        assert_eq!(
            config.categories,
            vec![Category::new("young-adult-hardcover", "Young Adult")]
        );
    }

    #[test]
    fn debug_redacts_keys() {
        let config = Config {
            nyt_api_key: Some("secret-nyt".into()),
            ..Default::default()
        };
        let printed = format!("{config:?}");
        assert!(!printed.contains("secret-nyt"));
        assert!(printed.contains("***"));
    }

    #[test]
    fn config_file_round_trip_keeps_limits() {
        let config = Config {
            max_retries: 1,
            ..Default::default()
        };
        let file = config.to_config_file();
        let resolved = Config::resolve(&file, env_from(&[])).unwrap();
        assert_eq!(resolved.max_retries, 1);
        assert_eq!(resolved.categories.len(), 4);
    }
}
