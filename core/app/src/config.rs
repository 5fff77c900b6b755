//! Application configuration.
//!
//! Stored as JSON. Every field has a default, so a missing file or a partial
//! file both load.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::debug;
use url::Url;

use cipherdrop_common::{Error, Result};

/// Environment variable consulted for the Pinata JWT.
pub const PINATA_JWT_ENV: &str = "PINATA_JWT";

/// Default share base URL.
pub const DEFAULT_BASE_URL: &str = "http://localhost:3000";

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("cipherdrop")
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Directory holding the record and key databases.
    pub data_dir: PathBuf,
    /// Content store selection.
    pub content_store: ContentStoreConfig,
    /// Share link defaults.
    pub share: ShareConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            content_store: ContentStoreConfig::default(),
            share: ShareConfig::default(),
        }
    }
}

/// Content store provider and its provider-specific configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContentStoreConfig {
    /// Registered provider name: `memory`, `local` or `pinata`.
    pub provider: String,
    /// Passed to the provider factory as is.
    pub config: Value,
}

impl Default for ContentStoreConfig {
    fn default() -> Self {
        Self {
            provider: "local".to_string(),
            config: Value::Null,
        }
    }
}

/// Share link defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShareConfig {
    /// Origin (and optional path prefix) links are issued under.
    pub base_url: String,
    /// Link lifetime when none is given.
    pub default_ttl_secs: u64,
    /// Redemptions per link when none is given.
    pub default_max_access_count: u32,
}

impl Default for ShareConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            default_ttl_secs: 24 * 60 * 60,
            default_max_access_count: 1,
        }
    }
}

impl AppConfig {
    /// Load configuration from a JSON file.
    ///
    /// A missing file yields the defaults. Environment fallbacks are applied
    /// and the result is validated.
    ///
    /// # Errors
    /// - `Serialization` if the file is not valid configuration JSON
    /// - `InvalidInput` if validation fails
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(path)?;
            serde_json::from_str(&text)?
        } else {
            debug!(path = %path.display(), "No config file, using defaults");
            Self::default()
        };

        config.apply_env(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    /// Write configuration as pretty JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text)?;
        Ok(())
    }

    /// Fill settings that may come from the environment.
    ///
    /// Currently the Pinata JWT, used only when the file does not set one.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if self.content_store.provider != "pinata" {
            return;
        }
        let has_jwt = self
            .content_store
            .config
            .get("jwt")
            .and_then(Value::as_str)
            .is_some_and(|s| !s.trim().is_empty());
        if has_jwt {
            return;
        }
        let Some(jwt) = lookup(PINATA_JWT_ENV).filter(|s| !s.trim().is_empty()) else {
            return;
        };

        if !self.content_store.config.is_object() {
            self.content_store.config = Value::Object(Default::default());
        }
        if let Value::Object(map) = &mut self.content_store.config {
            map.insert("jwt".to_string(), Value::String(jwt));
        }
    }

    /// Check value constraints.
    ///
    /// # Errors
    /// - `InvalidInput` naming the first offending field
    pub fn validate(&self) -> Result<()> {
        if self.content_store.provider.trim().is_empty() {
            return Err(Error::InvalidInput(
                "content_store.provider cannot be empty".to_string(),
            ));
        }
        self.share.parsed_base_url()?;
        if self.share.default_ttl_secs == 0 {
            return Err(Error::InvalidInput(
                "share.default_ttl_secs must be at least 1".to_string(),
            ));
        }
        if self.share.default_max_access_count == 0 {
            return Err(Error::InvalidInput(
                "share.default_max_access_count must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Path of the record database.
    pub fn records_db_path(&self) -> PathBuf {
        self.data_dir.join("records.db")
    }

    /// Path of the key vault database.
    pub fn keys_db_path(&self) -> PathBuf {
        self.data_dir.join("keys.db")
    }

    /// Provider configuration with data-dir defaults filled in.
    ///
    /// The local store keeps blobs under `<data_dir>/blobs` unless a `root`
    /// is configured.
    pub fn store_config(&self) -> Value {
        let mut config = self.content_store.config.clone();
        if self.content_store.provider == "local" && config.get("root").is_none() {
            let root = self.data_dir.join("blobs").to_string_lossy().into_owned();
            config = serde_json::json!({ "root": root });
        }
        config
    }
}

impl ShareConfig {
    /// Parse `base_url`.
    ///
    /// # Errors
    /// - `InvalidInput` unless it is an absolute http(s) URL with a host
    pub fn parsed_base_url(&self) -> Result<Url> {
        let url = Url::parse(&self.base_url).map_err(|e| {
            Error::InvalidInput(format!("share.base_url '{}' is invalid: {}", self.base_url, e))
        })?;
        if !matches!(url.scheme(), "http" | "https") || !url.has_host() {
            return Err(Error::InvalidInput(format!(
                "share.base_url '{}' must be an http(s) URL",
                self.base_url
            )));
        }
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config = AppConfig::load(dir.path().join("absent.json")).unwrap();

        assert_eq!(config.content_store.provider, "local");
        assert_eq!(config.share.default_max_access_count, 1);
        assert_eq!(config.share.default_ttl_secs, 86_400);
    }

    #[test]
    fn test_partial_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{ "share": { "base_url": "https://drop.example" } }"#,
        )
        .unwrap();

        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.share.base_url, "https://drop.example");
        assert_eq!(config.share.default_ttl_secs, 86_400);
        assert_eq!(config.content_store.provider, "local");
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let mut config = AppConfig::default();
        config.data_dir = dir.path().to_path_buf();
        config.share.default_max_access_count = 4;
        config.save(&path).unwrap();

        assert_eq!(AppConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_malformed_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();

        assert!(matches!(
            AppConfig::load(&path),
            Err(Error::Serialization(_))
        ));
    }

    #[test]
    fn test_validation() {
        let mut config = AppConfig::default();
        assert!(config.validate().is_ok());

        config.share.base_url = "ftp://drop.example".to_string();
        assert!(config.validate().is_err());

        config.share.base_url = "not a url".to_string();
        assert!(config.validate().is_err());

        config = AppConfig::default();
        config.share.default_ttl_secs = 0;
        assert!(config.validate().is_err());

        config = AppConfig::default();
        config.share.default_max_access_count = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_pinata_jwt_from_env() {
        let mut config = AppConfig::default();
        config.content_store.provider = "pinata".to_string();

        config.apply_env(|name| (name == PINATA_JWT_ENV).then(|| "env-jwt".to_string()));
        assert_eq!(config.content_store.config["jwt"], "env-jwt");
    }

    #[test]
    fn test_file_jwt_wins_over_env() {
        let mut config = AppConfig::default();
        config.content_store.provider = "pinata".to_string();
        config.content_store.config = json!({ "jwt": "file-jwt", "max_retries": 1 });

        config.apply_env(|_| Some("env-jwt".to_string()));
        assert_eq!(config.content_store.config["jwt"], "file-jwt");
        assert_eq!(config.content_store.config["max_retries"], 1);
    }

    #[test]
    fn test_env_ignored_for_other_providers() {
        let mut config = AppConfig::default();
        config.apply_env(|_| Some("env-jwt".to_string()));
        assert_eq!(config.content_store.config, Value::Null);
    }

    #[test]
    fn test_local_store_defaults_under_data_dir() {
        let mut config = AppConfig::default();
        config.data_dir = PathBuf::from("/var/lib/cipherdrop");

        let store = config.store_config();
        assert_eq!(
            store["root"],
            PathBuf::from("/var/lib/cipherdrop").join("blobs").to_string_lossy().as_ref()
        );

        config.content_store.config = json!({ "root": "/srv/blobs" });
        assert_eq!(config.store_config()["root"], "/srv/blobs");
    }
}
