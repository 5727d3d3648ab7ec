//! Configuration loader with file and environment variable support

use crate::{AppConfig, ConfigError};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::{info, warn};

/// Standard config file search paths
const CONFIG_PATHS: &[&str] = &[
    "zkelect.toml",
    "config.toml",
    "./config/zkelect.toml",
    "/etc/zkelect/config.toml",
];

/// Configuration loader
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
}

impl ConfigLoader {
    /// Create a new configuration loader
    pub fn new() -> Self {
        Self { config_path: None }
    }

    /// Create a loader with a specific config file path
    pub fn with_path<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            config_path: Some(path.into()),
        }
    }

    /// Load configuration from file (if found) with environment variable overrides
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let mut config = AppConfig::default();

        if let Some(path) = self.find_config_file() {
            info!(?path, "Loading configuration from file");
            config = AppConfig::from_file(&path)?;
        }

        apply_overrides(&mut config, |key| env::var(key).ok());
        config.validate()?;

        Ok(config)
    }

    /// Find the configuration file to use
    fn find_config_file(&self) -> Option<PathBuf> {
        if let Some(path) = &self.config_path {
            if path.exists() {
                return Some(path.clone());
            }
            warn!(?path, "Configured config file does not exist");
        }

        if let Ok(path) = env::var("ZKELECT_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        CONFIG_PATHS
            .iter()
            .map(PathBuf::from)
            .find(|path| path.exists())
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_into<T: FromStr>(key: &str, value: &str, target: &mut T) {
    match value.trim().parse() {
        Ok(parsed) => *target = parsed,
        Err(_) => warn!(key, value, "Ignoring unparsable environment override"),
    }
}

/// Apply `ZKELECT_*` overrides read through `lookup`.
pub(crate) fn apply_overrides<F>(config: &mut AppConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    // Election
    if let Some(val) = lookup("ZKELECT_SERVERS") {
        config.election.servers = val;
    }
    if let Some(val) = lookup("ZKELECT_ROOT") {
        config.election.root = val;
    }
    if let Some(val) = lookup("ZKELECT_ELECTION_ID") {
        config.election.election_id = val;
    }
    if let Some(val) = lookup("ZKELECT_IDENTITY") {
        config.election.identity = val;
    }
    if let Some(val) = lookup("ZKELECT_BACKOFF_MS") {
        parse_into("ZKELECT_BACKOFF_MS", &val, &mut config.election.backoff_ms);
    }
    if let Some(val) = lookup("ZKELECT_CONNECT_TIMEOUT_MS") {
        parse_into("ZKELECT_CONNECT_TIMEOUT_MS", &val, &mut config.election.connect_timeout_ms);
    }
    if let Some(val) = lookup("ZKELECT_SESSION_TIMEOUT_MS") {
        parse_into("ZKELECT_SESSION_TIMEOUT_MS", &val, &mut config.election.session_timeout_ms);
    }

    // Dev runner
    if let Some(val) = lookup("ZKELECT_DEV_CANDIDATES") {
        parse_into("ZKELECT_DEV_CANDIDATES", &val, &mut config.dev.candidates);
    }
    if let Some(val) = lookup("ZKELECT_DEV_FAILOVER_INTERVAL_SECS") {
        parse_into("ZKELECT_DEV_FAILOVER_INTERVAL_SECS", &val, &mut config.dev.failover_interval_secs);
    }
    if let Some(val) = lookup("ZKELECT_DEV_LEADER_WORK_INTERVAL_MS") {
        parse_into("ZKELECT_DEV_LEADER_WORK_INTERVAL_MS", &val, &mut config.dev.leader_work_interval_ms);
    }
}
