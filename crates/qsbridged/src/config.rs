//! Configuration file parsing and structures.
//!
//! qsbridged reads a single TOML file: cloud credentials, the two bridge
//! timings (inter-command delay and poll interval), and the log level.

use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use tracing_subscriber::filter::LevelFilter;

/// Top-level configuration structure
#[derive(Debug, Deserialize)]
pub struct Config {
    pub api: ApiConfig,
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Credentials for the QwikSwitch cloud account
#[derive(Debug, Deserialize)]
pub struct ApiConfig {
    /// Email the master key is registered under
    pub email: String,

    /// Master key printed on the QwikSwitch hub
    pub master_key: String,

    /// Override for the API base URL (testing against a local stub)
    #[serde(default)]
    pub base_url: Option<String>,
}

/// Bridge timing configuration
#[derive(Debug, Deserialize)]
pub struct BridgeConfig {
    /// Seconds to pause between consecutive API calls. Zero disables
    /// throttling; the vendor rate-limits, so the default is conservative.
    #[serde(default = "default_command_delay")]
    pub command_delay: u64,

    /// Seconds between periodic status polls. Must be at least 1.
    #[serde(default = "default_poll_interval")]
    pub poll_interval: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            command_delay: default_command_delay(),
            poll_interval: default_poll_interval(),
        }
    }
}

fn default_command_delay() -> u64 {
    2
}

fn default_poll_interval() -> u64 {
    30
}

#[derive(Debug, Default, Deserialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => LevelFilter::TRACE,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default)]
    pub level: LogLevel,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(path.as_ref().to_path_buf(), e))?;

        let config: Config = toml::from_str(&contents).map_err(ConfigError::Parse)?;
        config.validate()
    }

    fn validate(self) -> Result<Self, ConfigError> {
        if self.bridge.poll_interval == 0 {
            return Err(ConfigError::InvalidPollInterval);
        }
        Ok(self)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {0}: {1}")]
    Io(PathBuf, #[source] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("poll_interval must be at least 1 second")]
    InvalidPollInterval,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_config() {
        let toml = r#"
            [api]
            email = "user@example.com"
            master_key = "0123-4567"
        "#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.api.email, "user@example.com");
        assert_eq!(config.bridge.command_delay, 2);
        assert_eq!(config.bridge.poll_interval, 30);
        assert_eq!(config.logging.level, LogLevel::Info);
        assert!(config.api.base_url.is_none());
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
            [api]
            email = "user@example.com"
            master_key = "0123-4567"
            base_url = "http://localhost:8080/api/v1"

            [bridge]
            command_delay = 0
            poll_interval = 10

            [logging]
            level = "debug"
        "#;

        let config: Config = toml::from_str(toml).unwrap();
        let config = config.validate().unwrap();
        assert_eq!(config.bridge.command_delay, 0);
        assert_eq!(config.bridge.poll_interval, 10);
        assert_eq!(config.logging.level, LogLevel::Debug);
        assert_eq!(
            config.api.base_url.as_deref(),
            Some("http://localhost:8080/api/v1")
        );
    }

    #[test]
    fn test_zero_poll_interval_rejected() {
        let toml = r#"
            [api]
            email = "user@example.com"
            master_key = "0123-4567"

            [bridge]
            poll_interval = 0
        "#;

        let config: Config = toml::from_str(toml).unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidPollInterval)
        ));
    }

    #[test]
    fn test_missing_credentials_rejected() {
        let toml = r#"
            [bridge]
            poll_interval = 10
        "#;

        assert!(toml::from_str::<Config>(toml).is_err());
    }
}
