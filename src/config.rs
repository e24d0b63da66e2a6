//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides.

use crate::lock::LockConfig;
use crate::remote::RedditConfig;
use crate::storage::StoreConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub lock: LockSettings,

    #[serde(default)]
    pub seen_posts: SeenPostsConfig,

    #[serde(default)]
    pub remote: RemoteConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Record store configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

fn default_data_dir() -> String {
    dirs::data_local_dir()
        .map(|p| p.join("photon-session").to_string_lossy().to_string())
        .unwrap_or_else(|| "./photon_data".to_string())
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

/// Auth lock configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LockSettings {
    #[serde(default = "default_lock_timeout")]
    pub timeout_ms: u64,
}

fn default_lock_timeout() -> u64 {
    7500
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            timeout_ms: default_lock_timeout(),
        }
    }
}

/// Seen posts configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SeenPostsConfig {
    #[serde(default = "default_flush_interval")]
    pub flush_interval_secs: u64,
}

fn default_flush_interval() -> u64 {
    30
}

impl Default for SeenPostsConfig {
    fn default() -> Self {
        Self {
            flush_interval_secs: default_flush_interval(),
        }
    }
}

/// Reddit API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,

    #[serde(default = "default_token_url")]
    pub token_url: String,

    #[serde(default)]
    pub client_id: String,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
}

fn default_api_url() -> String {
    RedditConfig::default().api_url
}

fn default_token_url() -> String {
    RedditConfig::default().token_url
}

fn default_request_timeout() -> u64 {
    RedditConfig::default().request_timeout_ms
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            token_url: default_token_url(),
            client_id: String::new(),
            request_timeout_ms: default_request_timeout(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Self::parse(&content, path)
    }

    fn parse(content: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("photon-session").join("config.toml")),
            Some(PathBuf::from("/etc/photon-session/config.toml")),
            Some(PathBuf::from("./config.toml")),
        ];

        for path in config_paths.iter().flatten() {
            if path.exists() {
                match Self::load_with_env(path) {
                    Ok(config) => {
                        tracing::info!(path = ?path, "Loaded config");
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!(path = ?path, error = %e, "Failed to load config");
                    }
                }
            }
        }

        tracing::info!("Using default config with environment overrides");
        Self::from_env()
    }

    /// Apply environment variable overrides to an existing config
    fn apply_env_overrides(&mut self) {
        if let Ok(data_dir) = std::env::var("PHOTON_DATA_DIR") {
            self.storage.data_dir = data_dir;
        }

        if let Ok(timeout) = std::env::var("PHOTON_LOCK_TIMEOUT_MS") {
            if let Ok(ms) = timeout.parse() {
                self.lock.timeout_ms = ms;
            }
        }

        if let Ok(interval) = std::env::var("PHOTON_SEEN_FLUSH_SECS") {
            if let Ok(secs) = interval.parse() {
                self.seen_posts.flush_interval_secs = secs;
            }
        }

        if let Ok(url) = std::env::var("PHOTON_API_URL") {
            self.remote.api_url = url;
        }
        if let Ok(client_id) = std::env::var("PHOTON_CLIENT_ID") {
            self.remote.client_id = client_id;
        }

        if let Ok(level) = std::env::var("PHOTON_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("PHOTON_LOG_FORMAT") {
            self.logging.format = format;
        }
    }

    pub fn store_config(&self) -> StoreConfig {
        StoreConfig::new(&self.storage.data_dir)
    }

    pub fn lock_config(&self) -> LockConfig {
        LockConfig {
            timeout: Duration::from_millis(self.lock.timeout_ms),
        }
    }

    pub fn seen_flush_interval(&self) -> Duration {
        // A zero period would make tokio's interval panic
        Duration::from_secs(self.seen_posts.flush_interval_secs.max(1))
    }

    pub fn reddit_config(&self) -> RedditConfig {
        RedditConfig {
            api_url: self.remote.api_url.clone(),
            token_url: self.remote.token_url.clone(),
            client_id: self.remote.client_id.clone(),
            request_timeout_ms: self.remote.request_timeout_ms,
            ..RedditConfig::default()
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# photon-session configuration
#
# Environment variables override these settings:
# - PHOTON_DATA_DIR
# - PHOTON_LOCK_TIMEOUT_MS
# - PHOTON_SEEN_FLUSH_SECS
# - PHOTON_API_URL
# - PHOTON_CLIENT_ID
# - PHOTON_LOG_LEVEL
# - PHOTON_LOG_FORMAT

[storage]
# Directory holding session.db
data_dir = "~/.local/share/photon-session"

[lock]
# How long to wait for another tab's auth lock before taking it over (ms)
timeout_ms = 7500

[seen_posts]
# How often seen posts are merged and written back (seconds)
flush_interval_secs = 30

[remote]
# Reddit OAuth API
api_url = "https://oauth.reddit.com"
token_url = "https://www.reddit.com/api/v1/access_token"

# Installed-app client id used for token refreshes
client_id = ""

# Request timeout (ms)
request_timeout_ms = 10000

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_generated_config_parses() {
        let config = Config::parse(&generate_default_config(), Path::new("generated")).unwrap();

        assert_eq!(config.lock.timeout_ms, 7500);
        assert_eq!(config.seen_posts.flush_interval_secs, 30);
        assert_eq!(config.remote.api_url, "https://oauth.reddit.com");
        assert_eq!(config.logging.format, "pretty");
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config = Config::parse("[lock]\ntimeout_ms = 100\n", Path::new("partial")).unwrap();

        assert_eq!(config.lock_config().timeout, Duration::from_millis(100));
        assert_eq!(config.seen_flush_interval(), Duration::from_secs(30));
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_load_errors() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("missing.toml");
        assert!(matches!(Config::load(&missing), Err(ConfigError::Io { .. })));

        let broken = dir.path().join("broken.toml");
        std::fs::write(&broken, "[lock\ntimeout_ms =").unwrap();
        assert!(matches!(Config::load(&broken), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_env_overrides() {
        std::env::set_var("PHOTON_LOCK_TIMEOUT_MS", "1234");
        std::env::set_var("PHOTON_SEEN_FLUSH_SECS", "not a number");
        let config = Config::from_env();
        std::env::remove_var("PHOTON_LOCK_TIMEOUT_MS");
        std::env::remove_var("PHOTON_SEEN_FLUSH_SECS");

        assert_eq!(config.lock.timeout_ms, 1234);
        assert_eq!(config.seen_posts.flush_interval_secs, 30);
    }

    #[test]
    fn test_reddit_config_mapping() {
        let mut config = Config::default();
        config.remote.client_id = "abc".into();

        let reddit = config.reddit_config();
        assert_eq!(reddit.client_id, "abc");
        assert!(reddit.user_agent.starts_with("photon-session/"));
    }
}
