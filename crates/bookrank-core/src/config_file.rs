use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::CoreError;

/// On-disk TOML configuration structure.
/// All fields are optional so partial configs work (merge with defaults).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigFile {
    pub api_keys: Option<ApiKeysConfig>,
    pub cache: Option<CacheConfig>,
    pub limits: Option<LimitsConfig>,
    /// Category id → display name. Replaces the default list when present.
    pub categories: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiKeysConfig {
    pub nyt_api_key: Option<String>,
    pub google_api_key: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// SQLite file, or directory for the file backend.
    pub path: Option<String>,
    /// `"sqlite"` or `"file"`.
    pub backend: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LimitsConfig {
    pub nyt_calls_per_minute: Option<u32>,
    pub request_timeout_secs: Option<u64>,
    pub max_retries: Option<u32>,
}

/// Platform config directory path: `<config_dir>/bookrank/config.toml`.
pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("bookrank").join("config.toml"))
}

/// Load config by cascading CWD `.bookrank.toml` over platform config.
/// CWD values override platform values.
pub fn load_config() -> ConfigFile {
    let platform = config_path().and_then(|p| load_from_path(&p));
    let cwd = load_from_path(Path::new(".bookrank.toml"));

    match (platform, cwd) {
        (None, None) => ConfigFile::default(),
        (Some(p), None) => p,
        (None, Some(c)) => c,
        (Some(p), Some(c)) => merge(p, c),
    }
}

/// Load a config from a specific path. Returns `None` if the file doesn't
/// exist or can't be parsed.
pub fn load_from_path(path: &Path) -> Option<ConfigFile> {
    let content = std::fs::read_to_string(path).ok()?;
    match toml::from_str(&content) {
        Ok(config) => Some(config),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "ignoring unparsable config file");
            None
        }
    }
}

/// First `Some` from `overlay`, else from `base`.
fn pick<S, T>(overlay: &Option<S>, base: &Option<S>, field: impl Fn(&S) -> Option<T>) -> Option<T> {
    overlay
        .as_ref()
        .and_then(&field)
        .or_else(|| base.as_ref().and_then(&field))
}

/// Merge two configs: `overlay` values take precedence over `base`.
pub fn merge(base: ConfigFile, overlay: ConfigFile) -> ConfigFile {
    ConfigFile {
        api_keys: Some(ApiKeysConfig {
            nyt_api_key: pick(&overlay.api_keys, &base.api_keys, |a| a.nyt_api_key.clone()),
            google_api_key: pick(&overlay.api_keys, &base.api_keys, |a| {
                a.google_api_key.clone()
            }),
        }),
        cache: Some(CacheConfig {
            path: pick(&overlay.cache, &base.cache, |c| c.path.clone()),
            backend: pick(&overlay.cache, &base.cache, |c| c.backend.clone()),
        }),
        limits: Some(LimitsConfig {
            nyt_calls_per_minute: pick(&overlay.limits, &base.limits, |l| l.nyt_calls_per_minute),
            request_timeout_secs: pick(&overlay.limits, &base.limits, |l| l.request_timeout_secs),
            max_retries: pick(&overlay.limits, &base.limits, |l| l.max_retries),
        }),
        // A category table is replaced as a whole, not merged key by key.
        categories: overlay.categories.or(base.categories),
    }
}

/// Save the config to the platform config directory.
pub fn save_config(config: &ConfigFile) -> Result<PathBuf, CoreError> {
    let path = config_path().ok_or(CoreError::NoConfigDir)?;
    save_config_to(config, &path)?;
    Ok(path)
}

/// Write `config` as pretty TOML to `path`, creating parent directories.
pub fn save_config_to(config: &ConfigFile, path: &Path) -> Result<(), CoreError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_file_parses() {
        let toml_str = r#"
[api_keys]
nyt_api_key = "nyt-123"

[cache]
path = "/tmp/bookrank.db"
backend = "sqlite"

[limits]
nyt_calls_per_minute = 10
max_retries = 0

[categories]
hardcover-fiction = "Hardcover Fiction"
young-adult-hardcover = "Young Adult"
"#;
        let parsed: ConfigFile = toml::from_str(toml_str).unwrap();
        assert_eq!(parsed.api_keys.unwrap().nyt_api_key.unwrap(), "nyt-123");
        let limits = parsed.limits.unwrap();
        assert_eq!(limits.nyt_calls_per_minute, Some(10));
        assert_eq!(limits.request_timeout_secs, None);
        assert_eq!(parsed.categories.unwrap().len(), 2);
    }

    #[test]
    fn cache_path_round_trip_toml() {
        let config = ConfigFile {
            cache: Some(CacheConfig {
                path: Some("/tmp/test_cache.db".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: ConfigFile = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.cache.unwrap().path.unwrap(), "/tmp/test_cache.db");
    }

    #[test]
    fn merge_overlay_wins() {
        let base = ConfigFile {
            api_keys: Some(ApiKeysConfig {
                nyt_api_key: Some("base-key".into()),
                google_api_key: Some("base-google".into()),
            }),
            limits: Some(LimitsConfig {
                nyt_calls_per_minute: Some(20),
                ..Default::default()
            }),
            ..Default::default()
        };
        let overlay = ConfigFile {
            api_keys: Some(ApiKeysConfig {
                nyt_api_key: Some("cwd-key".into()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let merged = merge(base, overlay);
        let keys = merged.api_keys.unwrap();
        assert_eq!(keys.nyt_api_key.unwrap(), "cwd-key");
        assert_eq!(keys.google_api_key.unwrap(), "base-google");
        assert_eq!(merged.limits.unwrap().nyt_calls_per_minute, Some(20));
    }

    #[test]
    fn merge_replaces_category_table() {
        let mut base_cats = BTreeMap::new();
        base_cats.insert("a".to_string(), "A".to_string());
        base_cats.insert("b".to_string(), "B".to_string());
        let mut overlay_cats = BTreeMap::new();
        overlay_cats.insert("c".to_string(), "C".to_string());

        let merged = merge(
            ConfigFile {
                categories: Some(base_cats),
                ..Default::default()
            },
            ConfigFile {
                categories: Some(overlay_cats),
                ..Default::default()
            },
        );
        let cats = merged.categories.unwrap();
        assert_eq!(cats.len(), 1);
        assert!(cats.contains_key("c"));
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let config = ConfigFile {
            cache: Some(CacheConfig {
                backend: Some("file".into()),
                ..Default::default()
            }),
            ..Default::default()
        };
        save_config_to(&config, &path).unwrap();
        assert_eq!(load_from_path(&path), Some(config));
    }

    #[test]
    fn unparsable_file_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[limits\nmax_retries = ").unwrap();
        assert!(load_from_path(&path).is_none());
        assert!(load_from_path(&dir.path().join("missing.toml")).is_none());
    }
}
