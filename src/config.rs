//! Client configuration
//!
//! Provides centralized configuration for the controller and its components,
//! optionally read from a TOML file.

use crate::error::{ClientError, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Default backend location
pub const DEFAULT_BASE_URL: &str = "http://localhost:5001";

/// Configuration for the whole client
#[derive(Clone, Debug, PartialEq)]
pub struct ClientConfig {
    /// Backend base URL, without trailing slash
    pub base_url: String,

    /// Poll interval while a submission is outstanding
    pub fast_poll: Duration,

    /// Poll interval while idle
    pub slow_poll: Duration,

    /// Recording counter tick
    pub recording_tick: Duration,

    /// Upper bound for a single background log fetch
    pub poll_timeout: Duration,

    /// Capacity of the command channel between front-end and controller
    pub command_buffer: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            fast_poll: Duration::from_millis(1000),
            slow_poll: Duration::from_millis(3000),
            recording_tick: Duration::from_secs(1),
            poll_timeout: Duration::from_secs(10),
            command_buffer: 32,
        }
    }
}

/// On-disk shape of the configuration; every key is optional
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    base_url: Option<String>,
    fast_poll_ms: Option<u64>,
    slow_poll_ms: Option<u64>,
    recording_tick_ms: Option<u64>,
    poll_timeout_ms: Option<u64>,
    command_buffer: Option<usize>,
}

impl ClientConfig {
    /// Create a configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the backend base URL
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Set both poll intervals
    pub fn with_poll_intervals(mut self, fast: Duration, slow: Duration) -> Self {
        self.fast_poll = fast;
        self.slow_poll = slow;
        self
    }

    /// Set the background fetch timeout
    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    /// Parse a configuration from TOML text, on top of the defaults
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let file: FileConfig = toml::from_str(text)
            .map_err(|e| ClientError::ConfigError(format!("Invalid config file: {}", e)))?;

        let mut config = Self::default();
        if let Some(url) = file.base_url {
            config = config.with_base_url(url);
        }
        if let Some(ms) = file.fast_poll_ms {
            config.fast_poll = Duration::from_millis(ms);
        }
        if let Some(ms) = file.slow_poll_ms {
            config.slow_poll = Duration::from_millis(ms);
        }
        if let Some(ms) = file.recording_tick_ms {
            config.recording_tick = Duration::from_millis(ms);
        }
        if let Some(ms) = file.poll_timeout_ms {
            config.poll_timeout = Duration::from_millis(ms);
        }
        if let Some(size) = file.command_buffer {
            config.command_buffer = size;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            ClientError::ConfigError(format!("Failed to read {}: {}", path.display(), e))
        })?;
        info!("Loaded client config from {}", path.display());
        Self::from_toml_str(&text)
    }

    /// Load the explicit path if given, else the per-user file if present,
    /// else the defaults
    pub fn discover(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        match Self::user_config_path() {
            Some(path) if path.exists() => Self::load(path),
            _ => {
                debug!("No config file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Per-user config location, `<config dir>/talkback/config.toml`
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("talkback").join("config.toml"))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(ClientError::ConfigError(format!(
                "Base URL must be http(s): {}",
                self.base_url
            )));
        }
        if self.fast_poll.is_zero() || self.slow_poll.is_zero() {
            return Err(ClientError::ConfigError(
                "Poll intervals must be non-zero".to_string(),
            ));
        }
        if self.fast_poll > self.slow_poll {
            return Err(ClientError::ConfigError(
                "Fast poll interval must not exceed the slow one".to_string(),
            ));
        }
        if self.recording_tick.is_zero() {
            return Err(ClientError::ConfigError(
                "Recording tick must be non-zero".to_string(),
            ));
        }
        if self.command_buffer == 0 {
            return Err(ClientError::ConfigError(
                "Command buffer must hold at least one command".to_string(),
            ));
        }
        Ok(())
    }

    /// Join an API path onto the base URL
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.base_url, "http://localhost:5001");
        assert_eq!(config.fast_poll, Duration::from_secs(1));
        assert_eq!(config.slow_poll, Duration::from_secs(3));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let config = ClientConfig::new().with_base_url("http://host:9000/");
        assert_eq!(config.endpoint("/api/models"), "http://host:9000/api/models");
    }

    #[test]
    fn test_partial_toml() {
        let config = ClientConfig::from_toml_str("slow_poll_ms = 5000\n").unwrap();
        assert_eq!(config.slow_poll, Duration::from_secs(5));
        assert_eq!(config.fast_poll, Duration::from_secs(1));
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
    }

    #[test]
    fn test_unknown_key_rejected() {
        let err = ClientConfig::from_toml_str("colour = \"blue\"\n").unwrap_err();
        assert!(matches!(err, ClientError::ConfigError(_)));
    }

    #[test]
    fn test_inverted_intervals_rejected() {
        let config = ClientConfig::new()
            .with_poll_intervals(Duration::from_secs(5), Duration::from_secs(1));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_non_http_url_rejected() {
        let err = ClientConfig::from_toml_str("base_url = \"ftp://x\"\n").unwrap_err();
        assert!(matches!(err, ClientError::ConfigError(_)));
    }
}
