//! Application configuration management.
//!
//! This module handles loading and saving the application configuration,
//! which includes the API base URL, the session storage backend, and the
//! last used email address.
//!
//! Configuration is stored at `~/.config/thermodash/config.json`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::api::transport::DEFAULT_REQUEST_TIMEOUT_SECS;
use crate::api::ReqwestTransport;
use crate::auth::{FileStore, KeyValueStore, KeyringStore, SessionManager};

/// Application name used for config/cache directory paths and the keyring service
pub const APP_NAME: &str = "thermodash";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Used when neither the config file nor the environment names a server
pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8000/api";

/// Environment variable overriding `api_base_url`
pub const API_URL_ENV: &str = "THERMODASH_API_URL";

/// Where tokens and the cached profile are persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    File,
    Keyring,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_base_url: Option<String>,
    pub last_email: Option<String>,
    pub storage: StorageBackend,
    pub request_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: None,
            last_email: None,
            storage: StorageBackend::default(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            serde_json::from_str(&contents).with_context(|| format!("Invalid config file {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents).with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    /// Environment first, then the config file, then the built-in default.
    pub fn api_base_url(&self) -> String {
        resolve_base_url(std::env::var(API_URL_ENV).ok(), self.api_base_url.as_deref())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    /// The persistent store selected by `storage`.
    pub fn open_store(&self) -> Result<Arc<dyn KeyValueStore>> {
        Ok(match self.storage {
            StorageBackend::File => Arc::new(FileStore::new(self.cache_dir()?)),
            StorageBackend::Keyring => Arc::new(KeyringStore::new(APP_NAME)),
        })
    }

    /// Wire a session manager for this configuration.
    pub fn build_session(&self) -> Result<Arc<SessionManager>> {
        let base_url = self.api_base_url();
        debug!(base_url = %base_url, storage = ?self.storage, "Building session");
        let transport = ReqwestTransport::with_timeout(base_url, self.request_timeout())
            .context("Failed to create HTTP client")?;
        let store = self.open_store()?;
        Ok(Arc::new(SessionManager::new(Arc::new(transport), store)))
    }
}

fn resolve_base_url(env: Option<String>, configured: Option<&str>) -> String {
    env.map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .or_else(|| configured.map(str::trim).filter(|v| !v.is_empty()).map(String::from))
        .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config = Config::load_from(&dir.path().join("config.json")).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
        assert_eq!(config.storage, StorageBackend::File);
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let config = Config {
            api_base_url: Some("https://thermo.example.com/api".to_string()),
            last_email: Some("pat@example.com".to_string()),
            storage: StorageBackend::Keyring,
            request_timeout_secs: 10,
        };
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded, config);
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains(r#""storage": "keyring""#));
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"last_email": "pat@example.com"}"#).unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.last_email.as_deref(), Some("pat@example.com"));
        assert_eq!(config.request_timeout_secs, DEFAULT_REQUEST_TIMEOUT_SECS);
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(Config::load_from(&path).is_err());
    }

    #[test]
    fn test_base_url_precedence() {
        assert_eq!(resolve_base_url(None, None), DEFAULT_API_BASE_URL);
        assert_eq!(resolve_base_url(None, Some("https://a.test")), "https://a.test");
        assert_eq!(
            resolve_base_url(Some("https://env.test".to_string()), Some("https://a.test")),
            "https://env.test"
        );
        assert_eq!(resolve_base_url(Some("  ".to_string()), Some(" ")), DEFAULT_API_BASE_URL);
    }

    #[test]
    fn test_zero_timeout_is_clamped() {
        let config = Config {
            request_timeout_secs: 0,
            ..Config::default()
        };
        assert_eq!(config.request_timeout(), Duration::from_secs(1));
    }
}
