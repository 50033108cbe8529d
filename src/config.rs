//! Configuration management for flowcache
//!
//! Handles persistent settings for the cache layer: the page origin, the
//! agent script location, storage key names and coordinator timings.
//! Supports Windows, macOS, and Linux config directories.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::coordinator::CoordinatorSettings;
use crate::lifecycle::LifecycleSettings;

/// Overrides the configured origin
pub const ORIGIN_ENV: &str = "FLOWCACHE_ORIGIN";
/// Overrides the debug flag ("1"/"true" or "0"/"false")
pub const DEBUG_ENV: &str = "FLOWCACHE_DEBUG";

/// Errors that can occur loading or saving configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Could not determine config path")]
    NoConfigDir,

    #[error("Failed to access config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid origin '{origin}': {reason}")]
    InvalidOrigin { origin: String, reason: String },
}

/// Cache layer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Origin the page is served from
    pub origin: String,
    /// Build-time debug flag
    pub debug: bool,
    /// Root-relative path of the agent script
    pub agent_script: String,
    /// Agent registration scope
    pub agent_scope: String,
    /// Durable storage key of the cache-bust token
    pub token_key: String,
    /// Query parameter carrying the cache-bust token
    pub token_param: String,
    /// Session key holding the last agent version seen
    pub version_key: String,
    pub reload_delay_ms: u64,
    pub version_timeout_ms: u64,
    pub auto_refresh_on_version_change: bool,
    /// Path fetched with no-cache directives after a full clear
    pub prime_path: String,
    /// JSON file backing durable storage; in-memory when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub durable_store: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            origin: "http://localhost:3000".to_string(),
            debug: false,
            agent_script: "/sw.js".to_string(),
            agent_scope: "/".to_string(),
            token_key: crate::token::DEFAULT_TOKEN_KEY.to_string(),
            token_param: crate::token::DEFAULT_TOKEN_PARAM.to_string(),
            version_key: "sw_version".to_string(),
            reload_delay_ms: 100,
            version_timeout_ms: 5_000,
            auto_refresh_on_version_change: false,
            prime_path: "/".to_string(),
            durable_store: None,
        }
    }
}

impl CacheConfig {
    /// Gets the config directory path (cross-platform)
    fn config_dir() -> Option<PathBuf> {
        #[cfg(target_os = "windows")]
        {
            std::env::var("APPDATA")
                .ok()
                .map(|p| PathBuf::from(p).join("flowcache"))
        }

        #[cfg(target_os = "macos")]
        {
            std::env::var("HOME")
                .ok()
                .map(|p| PathBuf::from(p).join("Library/Application Support/flowcache"))
        }

        #[cfg(target_os = "linux")]
        {
            std::env::var("XDG_CONFIG_HOME")
                .ok()
                .map(PathBuf::from)
                .or_else(|| std::env::var("HOME").ok().map(|p| PathBuf::from(p).join(".config")))
                .map(|p| p.join("flowcache"))
        }

        #[cfg(not(any(target_os = "windows", target_os = "macos", target_os = "linux")))]
        {
            None
        }
    }

    /// Gets the config file path
    pub fn config_path() -> Option<PathBuf> {
        Self::config_dir().map(|dir| dir.join("config.json"))
    }

    /// Loads configuration from the platform config directory
    ///
    /// Falls back to defaults when the file is missing or unreadable, then
    /// applies environment overrides.
    pub fn load() -> Self {
        let mut config = match Self::config_path() {
            Some(path) if path.exists() => Self::load_from(&path).unwrap_or_else(|e| {
                tracing::warn!("Ignoring config at {}: {}", path.display(), e);
                Self::default()
            }),
            _ => Self::default(),
        };
        config.apply_env();
        config
    }

    /// Loads configuration from a specific file
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Saves configuration to the platform config directory
    pub fn save(&self) -> Result<(), ConfigError> {
        let path = Self::config_path().ok_or(ConfigError::NoConfigDir)?;
        self.save_to(&path)
    }

    /// Saves configuration to a specific file, creating parent directories
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    fn apply_env(&mut self) {
        self.apply_overrides(
            std::env::var(ORIGIN_ENV).ok(),
            std::env::var(DEBUG_ENV).ok(),
        );
    }

    fn apply_overrides(&mut self, origin: Option<String>, debug: Option<String>) {
        if let Some(origin) = origin.filter(|o| !o.trim().is_empty()) {
            self.origin = origin.trim().to_string();
        }

        match debug.as_deref().map(str::trim) {
            Some("1") | Some("true") => self.debug = true,
            Some("0") | Some("false") => self.debug = false,
            Some(other) => tracing::warn!("Ignoring {}={}", DEBUG_ENV, other),
            None => {}
        }
    }

    /// Parses the configured origin
    pub fn origin_url(&self) -> Result<Url, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidOrigin {
            origin: self.origin.clone(),
            reason,
        };

        let url = Url::parse(&self.origin).map_err(|e| invalid(e.to_string()))?;
        if url.cannot_be_a_base() {
            return Err(invalid("not a hierarchical URL".to_string()));
        }
        Ok(url)
    }

    pub fn coordinator_settings(&self) -> CoordinatorSettings {
        CoordinatorSettings {
            reload_delay: Duration::from_millis(self.reload_delay_ms),
            version_timeout: Duration::from_millis(self.version_timeout_ms),
            auto_refresh_on_version_change: self.auto_refresh_on_version_change,
            prime_path: self.prime_path.clone(),
            version_key: self.version_key.clone(),
        }
    }

    pub fn lifecycle_settings(&self) -> LifecycleSettings {
        LifecycleSettings {
            script_path: self.agent_script.clone(),
            scope: self.agent_scope.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn test_default_config() {
        let config = CacheConfig::default();
        assert_eq!(config.agent_script, "/sw.js");
        assert_eq!(config.token_key, "cache_bust_token");
        assert_eq!(config.token_param, "_cb");
        assert_eq!(config.reload_delay_ms, 100);
        assert!(!config.auto_refresh_on_version_change);
        assert!(config.durable_store.is_none());
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/config.json");

        let config = CacheConfig {
            origin: "https://yoga.test".to_string(),
            debug: true,
            durable_store: Some(dir.path().join("durable.json")),
            ..CacheConfig::default()
        };
        assert_ok!(config.save_to(&path));

        let loaded = assert_ok!(CacheConfig::load_from(&path));
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{ "origin": "https://yoga.test", "version_timeout_ms": 250 }"#).unwrap();

        let loaded = CacheConfig::load_from(&path).unwrap();
        assert_eq!(loaded.origin, "https://yoga.test");
        assert_eq!(loaded.version_timeout_ms, 250);
        assert_eq!(loaded.agent_scope, "/");
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "not json").unwrap();

        assert!(matches!(
            CacheConfig::load_from(&path),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            CacheConfig::load_from(&dir.path().join("missing.json")),
            Err(ConfigError::Io(_))
        ));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = CacheConfig::default();
        config.apply_overrides(Some(" https://yoga.test ".to_string()), Some("1".to_string()));
        assert_eq!(config.origin, "https://yoga.test");
        assert!(config.debug);

        config.apply_overrides(Some("".to_string()), Some("false".to_string()));
        assert_eq!(config.origin, "https://yoga.test");
        assert!(!config.debug);

        config.apply_overrides(None, Some("maybe".to_string()));
        assert!(!config.debug);
    }

    #[test]
    fn test_origin_url() {
        let mut config = CacheConfig::default();
        assert_eq!(
            assert_ok!(config.origin_url()).as_str(),
            "http://localhost:3000/"
        );

        config.origin = "not a url".to_string();
        assert_err!(config.origin_url());

        config.origin = "mailto:ops@yoga.test".to_string();
        assert_err!(config.origin_url());
    }

    #[test]
    fn test_derived_settings() {
        let config = CacheConfig {
            reload_delay_ms: 250,
            version_timeout_ms: 1_000,
            agent_script: "/agent.js".to_string(),
            ..CacheConfig::default()
        };

        let coordinator = config.coordinator_settings();
        assert_eq!(coordinator.reload_delay, Duration::from_millis(250));
        assert_eq!(coordinator.version_timeout, Duration::from_secs(1));
        assert_eq!(coordinator.version_key, "sw_version");

        let lifecycle = config.lifecycle_settings();
        assert_eq!(lifecycle.script_path, "/agent.js");
        assert_eq!(lifecycle.scope, "/");
    }

    #[test]
    fn test_config_path_ends_with_file_name() {
        if let Some(path) = CacheConfig::config_path() {
            assert!(path.ends_with("flowcache/config.json"));
        }
    }
}
