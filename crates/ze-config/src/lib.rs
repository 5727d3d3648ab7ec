//! zkelect Configuration System
//!
//! TOML-based configuration with environment variable override support.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

mod loader;

pub use loader::ConfigLoader;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Root application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub election: ElectionSettings,
    pub dev: DevSettings,
}

/// Leader election settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ElectionSettings {
    /// Comma-joined coordination service addresses
    pub servers: String,

    /// Election root node, must begin with '/'
    pub root: String,

    /// Leader slot name under the root
    pub election_id: String,

    /// Log label; generated per candidate when empty
    pub identity: String,

    pub backoff_ms: u64,

    pub connect_timeout_ms: u64,

    pub session_timeout_ms: u64,
}

impl Default for ElectionSettings {
    fn default() -> Self {
        Self {
            servers: "127.0.0.1:2181".to_string(),
            root: "/zkelect".to_string(),
            election_id: "leader".to_string(),
            identity: String::new(),
            backoff_ms: 2000,
            connect_timeout_ms: 3000,
            session_timeout_ms: 1000,
        }
    }
}

impl ElectionSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if ze_common::split_servers(&self.servers).is_empty() {
            return Err(ConfigError::ValidationError("election.servers is required".to_string()));
        }
        if ze_common::is_blank(&self.root) {
            return Err(ConfigError::ValidationError("election.root is required".to_string()));
        }
        if !self.root.starts_with('/') {
            return Err(ConfigError::ValidationError(
                "election.root should begin with '/'".to_string(),
            ));
        }
        if self.root.contains("//") {
            return Err(ConfigError::ValidationError(
                "election.root must not contain '//'".to_string(),
            ));
        }
        if ze_common::is_blank(&self.election_id) {
            return Err(ConfigError::ValidationError(
                "election.election_id is required".to_string(),
            ));
        }
        if self.election_id.contains('/') {
            return Err(ConfigError::ValidationError(
                "election.election_id must not contain '/'".to_string(),
            ));
        }
        if self.backoff_ms == 0 || self.connect_timeout_ms == 0 || self.session_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "election timeouts must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_millis(self.session_timeout_ms)
    }
}

/// Settings for the in-process development runner
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DevSettings {
    /// Candidates started against the embedded coordinator
    pub candidates: usize,

    /// Expire the leader's session this often; 0 disables forced failover
    pub failover_interval_secs: u64,

    /// How often the leader task reports that it is working
    pub leader_work_interval_ms: u64,
}

impl Default for DevSettings {
    fn default() -> Self {
        Self {
            candidates: 3,
            failover_interval_secs: 10,
            leader_work_interval_ms: 1000,
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration with environment variable override
    pub fn load() -> Result<Self, ConfigError> {
        ConfigLoader::new().load()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.election.validate()?;
        if self.dev.candidates == 0 {
            return Err(ConfigError::ValidationError(
                "dev.candidates must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Generate an example TOML configuration
    pub fn example_toml() -> String {
        r#"# zkelect Configuration
# Environment variables (ZKELECT_*) override these settings

[election]
servers = "127.0.0.1:2181"   # comma-joined
root = "/zkelect"
election_id = "leader"
identity = ""                # generated when empty
backoff_ms = 2000
connect_timeout_ms = 3000
session_timeout_ms = 1000

[dev]
candidates = 3
failover_interval_secs = 10  # 0 disables forced failover
leader_work_interval_ms = 1000
"#
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.election.backoff(), Duration::from_secs(2));
        assert_eq!(config.election.connect_timeout(), Duration::from_secs(3));
        assert_eq!(config.election.session_timeout(), Duration::from_secs(1));
    }

    #[test]
    fn test_example_toml_parses_to_defaults() {
        let config: AppConfig = toml::from_str(&AppConfig::example_toml()).unwrap();
        let defaults = AppConfig::default();
        assert_eq!(config.election.servers, defaults.election.servers);
        assert_eq!(config.election.root, defaults.election.root);
        assert_eq!(config.dev.candidates, defaults.dev.candidates);
        assert_eq!(config.dev.failover_interval_secs, defaults.dev.failover_interval_secs);
    }

    #[test]
    fn test_from_file_fills_missing_fields() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[election]\nroot = \"/services/election\"\nbackoff_ms = 500").unwrap();

        let config = AppConfig::from_file(file.path()).unwrap();
        assert_eq!(config.election.root, "/services/election");
        assert_eq!(config.election.backoff_ms, 500);
        assert_eq!(config.election.election_id, "leader");
        assert_eq!(config.dev.candidates, 3);
    }

    #[test]
    fn test_from_file_rejects_bad_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[election\nroot = ").unwrap();
        assert!(matches!(
            AppConfig::from_file(file.path()),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn test_validation() {
        let mut settings = ElectionSettings::default();
        settings.root = "zkelect".to_string();
        assert!(settings.validate().unwrap_err().to_string().contains("begin with '/'"));

        let mut settings = ElectionSettings::default();
        settings.servers = " , ".to_string();
        assert!(settings.validate().unwrap_err().to_string().contains("servers"));

        let mut settings = ElectionSettings::default();
        settings.root = "/a//b".to_string();
        assert!(settings.validate().unwrap_err().to_string().contains("'//'"));

        let mut settings = ElectionSettings::default();
        settings.election_id = "a/b".to_string();
        assert!(settings.validate().is_err());

        let mut settings = ElectionSettings::default();
        settings.backoff_ms = 0;
        assert!(settings.validate().is_err());

        let mut config = AppConfig::default();
        config.dev.candidates = 0;
        assert!(config.validate().is_err());
    }
}
