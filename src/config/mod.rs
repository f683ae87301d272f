//! Configuration management for cardctl

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{ConfigError, Result, StoreError};

/// Default backend base URL
pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8000";

/// Header sent on every request so tunneling proxies pass API traffic through
pub const DEFAULT_TUNNEL_HEADER: &str = "ngrok-skip-browser-warning";

/// Application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Backend base URL (without the `/api` prefix)
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Name of the tunneling-proxy bypass header
    #[serde(default = "default_tunnel_header")]
    pub tunnel_header: String,

    /// Location of the token store database
    #[serde(default)]
    pub token_store: Option<PathBuf>,

    /// HTTP timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Session controller tuning
    #[serde(default)]
    pub session: SessionSettings,
}

/// Session controller timing
#[derive(Debug, Clone, Deserialize)]
pub struct SessionSettings {
    /// Interval between proactive expiry checks
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,

    /// Refresh proactively once the access token expires within this window
    #[serde(default = "default_refresh_threshold_secs")]
    pub refresh_threshold_secs: u64,
}

fn default_api_base_url() -> String {
    DEFAULT_API_BASE_URL.to_string()
}

fn default_tunnel_header() -> String {
    DEFAULT_TUNNEL_HEADER.to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_tick_secs() -> u64 {
    60
}

fn default_refresh_threshold_secs() -> u64 {
    5 * 60
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            tick_secs: default_tick_secs(),
            refresh_threshold_secs: default_refresh_threshold_secs(),
        }
    }
}

impl SessionSettings {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_secs.max(1))
    }

    pub fn refresh_threshold(&self) -> Duration {
        Duration::from_secs(self.refresh_threshold_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            tunnel_header: default_tunnel_header(),
            token_store: None,
            timeout_secs: default_timeout_secs(),
            session: SessionSettings::default(),
        }
    }
}

impl Config {
    /// Directory holding cardctl state (~/.cardctl)
    fn state_dir() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".cardctl"))
    }

    pub fn home_dir() -> Result<PathBuf> {
        Self::state_dir().ok_or_else(|| {
            ConfigError::Invalid("Could not determine home directory".to_string()).into()
        })
    }

    /// Get the default config file path
    pub fn default_path() -> Result<PathBuf> {
        Ok(Self::home_dir()?.join("config.yaml"))
    }

    /// Resolve an optional override into a concrete config path
    pub fn resolve_path(path: Option<&str>) -> Result<PathBuf> {
        match path {
            Some(p) => Ok(PathBuf::from(p)),
            None => Self::default_path(),
        }
    }

    /// Load configuration, falling back to defaults when the file is absent
    pub fn load_at(path: Option<&str>) -> Result<Self> {
        let path = Self::resolve_path(path)?;
        if !path.exists() {
            log::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        Self::load_from(path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: PathBuf) -> Result<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()).into());
        }

        let contents = std::fs::read_to_string(&path)?;
        let config: Config = serde_yaml::from_str(&contents).map_err(ConfigError::from)?;
        config.validate()?;

        Ok(config)
    }

    /// Path of the token store database
    pub fn token_store_path(&self) -> Result<PathBuf> {
        match &self.token_store {
            Some(path) => Ok(path.clone()),
            None => Ok(Self::state_dir().ok_or(StoreError::NoHome)?.join("tokens.db")),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Check values that would otherwise only fail on first use
    pub fn validate(&self) -> Result<()> {
        if !(self.api_base_url.starts_with("http://") || self.api_base_url.starts_with("https://"))
        {
            return Err(ConfigError::Invalid(format!(
                "api_base_url must be an http(s) URL, got '{}'",
                self.api_base_url
            ))
            .into());
        }
        if self.tunnel_header.trim().is_empty() {
            return Err(ConfigError::Invalid("tunnel_header must not be empty".to_string()).into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.api_base_url, DEFAULT_API_BASE_URL);
        assert_eq!(config.tunnel_header, DEFAULT_TUNNEL_HEADER);
        assert_eq!(config.session.tick_interval(), Duration::from_secs(60));
        assert_eq!(config.session.refresh_threshold(), Duration::from_secs(300));
        assert_eq!(config.timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nope.yaml");
        let config = Config::load_at(Some(path.to_str().unwrap())).unwrap();
        assert_eq!(config.api_base_url, DEFAULT_API_BASE_URL);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(
            &path,
            "api_base_url: https://admin.example.com\nsession:\n  tick_secs: 10\n",
        )
        .unwrap();

        let config = Config::load_from(path).unwrap();
        assert_eq!(config.api_base_url, "https://admin.example.com");
        assert_eq!(config.session.tick_secs, 10);
        assert_eq!(config.session.refresh_threshold_secs, 300);
        assert_eq!(config.tunnel_header, DEFAULT_TUNNEL_HEADER);
    }

    #[test]
    fn test_invalid_base_url_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "api_base_url: ftp://nope\n").unwrap();

        assert!(Config::load_from(path).is_err());
    }

    #[test]
    fn test_token_store_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "token_store: /tmp/cardctl-tokens.db\n").unwrap();

        let loaded = Config::load_from(path).unwrap();
        assert_eq!(
            loaded.token_store_path().unwrap(),
            PathBuf::from("/tmp/cardctl-tokens.db")
        );

        if let Some(home) = dirs::home_dir() {
            assert_eq!(
                Config::default().token_store_path().unwrap(),
                home.join(".cardctl").join("tokens.db")
            );
        }
    }

    #[test]
    fn test_overridden_base_url_is_validated() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        config.api_base_url = "ftp://x".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("http(s)"));
    }
}
