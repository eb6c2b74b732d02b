//! Relay configuration.
//!
//! One `RelayConfig` is built at startup and passed explicitly into the store
//! backend and each component; nothing is kept in process-wide state.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment variable prefix, e.g. `RELAY_USER_ID`.
pub const ENV_PREFIX: &str = "RELAY";

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Store backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    /// In-process store, for tests and offline demos.
    #[default]
    Memory,
    /// Firebase Realtime Database over REST.
    Firebase,
}

/// How responses are matched to dispatched commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrelationMode {
    /// Read the response stored under the command's generated key.
    #[default]
    Key,
    /// Scan the response list for the first entry echoing the action.
    Action,
}

/// How the correlator waits for a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitMode {
    /// Re-read the response list at a fixed interval.
    #[default]
    Poll,
    /// Subscribe to the response list and rescan on each notification.
    Watch,
}

/// Relay configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Identifier of the target device.
    #[serde(default)]
    pub user_id: String,

    /// Store backend.
    #[serde(default)]
    pub backend: Backend,

    /// Realtime Database URL (required by the firebase backend).
    #[serde(default)]
    pub database_url: Option<String>,

    /// Database secret or ID token sent as the `auth` query parameter.
    #[serde(default)]
    pub auth_token: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Seconds to wait for a response.
    #[serde(default = "default_response_timeout_secs")]
    pub response_timeout_secs: u64,

    /// Milliseconds between response polls.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default)]
    pub wait_strategy: WaitMode,

    #[serde(default)]
    pub correlation: CorrelationMode,

    /// Directory receiving ingested media files.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Milliseconds before a failed stream subscription is retried.
    #[serde(default = "default_resubscribe_backoff_ms")]
    pub resubscribe_backoff_ms: u64,
}

fn default_log_level() -> String {
    "info".to_string()
}

const fn default_response_timeout_secs() -> u64 {
    10
}

const fn default_poll_interval_ms() -> u64 {
    500
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

const fn default_resubscribe_backoff_ms() -> u64 {
    1000
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            user_id: String::new(),
            backend: Backend::default(),
            database_url: None,
            auth_token: None,
            log_level: default_log_level(),
            response_timeout_secs: default_response_timeout_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            wait_strategy: WaitMode::default(),
            correlation: CorrelationMode::default(),
            output_dir: default_output_dir(),
            resubscribe_backoff_ms: default_resubscribe_backoff_ms(),
        }
    }
}

impl RelayConfig {
    /// Load from `RELAY_*` environment variables.
    ///
    /// # Errors
    /// Returns error if a variable cannot be deserialized.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Load from an optional TOML file, then `RELAY_*` environment variables.
    ///
    /// # Errors
    /// Returns error if the file is unreadable or a value cannot be
    /// deserialized.
    pub fn load(file: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(file) = file {
            builder = builder.add_source(File::from(file).required(true));
        }
        let config = builder
            .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?
            .try_deserialize()?;
        Ok(config)
    }

    /// Check cross-field constraints.
    ///
    /// # Errors
    /// Returns error describing the first violated constraint.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.user_id.trim().is_empty() {
            return Err(ConfigError::Invalid("user_id must not be empty".into()));
        }
        if self.backend == Backend::Firebase && self.database_url.is_none() {
            return Err(ConfigError::Invalid(
                "database_url is required for the firebase backend".into(),
            ));
        }
        if self.response_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "response_timeout_secs must be positive".into(),
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid("poll_interval_ms must be positive".into()));
        }
        Ok(())
    }

    #[must_use]
    pub const fn response_timeout(&self) -> Duration {
        Duration::from_secs(self.response_timeout_secs)
    }

    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    #[must_use]
    pub const fn resubscribe_backoff(&self) -> Duration {
        Duration::from_millis(self.resubscribe_backoff_ms)
    }
}

#[cfg(test)]
mod tests {
    use std::{io::Write, sync::Mutex};

    use super::*;

    // Serializes access to RELAY_* variables across tests.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn test_default_config() {
        let _lock = ENV_LOCK.lock().unwrap();
        // SAFETY: env access is serialized by ENV_LOCK.
        unsafe {
            std::env::remove_var("RELAY_POLL_INTERVAL_MS");
            std::env::remove_var("RELAY_USER_ID");
        }

        let config = RelayConfig::from_env().unwrap();
        assert_eq!(config.log_level, "info");
        assert_eq!(config.response_timeout(), Duration::from_secs(10));
        assert_eq!(config.poll_interval(), Duration::from_millis(500));
        assert_eq!(config.backend, Backend::Memory);
        assert_eq!(config.correlation, CorrelationMode::Key);
        assert_eq!(config.wait_strategy, WaitMode::Poll);
    }

    #[test]
    fn test_env_override() {
        let _lock = ENV_LOCK.lock().unwrap();
        // SAFETY: env access is serialized by ENV_LOCK.
        unsafe {
            std::env::set_var("RELAY_POLL_INTERVAL_MS", "250");
            std::env::set_var("RELAY_USER_ID", "device-7");
        }

        let config = RelayConfig::from_env().unwrap();

        // SAFETY: env access is serialized by ENV_LOCK.
        unsafe {
            std::env::remove_var("RELAY_POLL_INTERVAL_MS");
            std::env::remove_var("RELAY_USER_ID");
        }

        assert_eq!(config.poll_interval_ms, 250);
        assert_eq!(config.user_id, "device-7");
    }

    #[test]
    fn test_file_source() {
        let _lock = ENV_LOCK.lock().unwrap();
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "user_id = \"phone\"\nbackend = \"firebase\"\ndatabase_url = \"https://x.firebaseio.com\"\ncorrelation = \"action\""
        )
        .unwrap();

        let config = RelayConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.backend, Backend::Firebase);
        assert_eq!(config.correlation, CorrelationMode::Action);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate() {
        let mut config = RelayConfig::default();
        assert!(config.validate().is_err());

        config.user_id = "phone".into();
        assert!(config.validate().is_ok());

        config.backend = Backend::Firebase;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        config.database_url = Some("https://x.firebaseio.com".into());
        config.response_timeout_secs = 0;
        assert!(config.validate().is_err());
    }
}
