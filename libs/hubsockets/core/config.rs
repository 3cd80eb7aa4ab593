//! YAML client configuration

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load config file: {0}")]
    FileError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Transport names the client knows how to build
pub const KNOWN_TRANSPORTS: &[&str] = &["webSockets"];

/// Connection settings for one hub endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base URL of the hub endpoint, e.g. `http://localhost:8080/signalr`
    pub url: String,
    #[serde(default = "default_protocol_version")]
    pub protocol_version: String,
    /// Raw connection data; hub connections compute their own
    #[serde(default)]
    pub connection_data: Option<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub query: BTreeMap<String, String>,
    /// Hub proxies to create before starting
    #[serde(default)]
    pub hubs: Vec<String>,
    /// Transports to try, in order
    #[serde(default = "default_transports")]
    pub transports: Vec<String>,
    #[serde(default = "default_ping_interval")]
    pub ping_interval_secs: u64,
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_protocol_version() -> String {
    "1.3".to_string()
}

fn default_transports() -> Vec<String> {
    vec!["webSockets".to_string()]
}

fn default_ping_interval() -> u64 {
    300
}

fn default_log_level() -> String {
    "info".to_string()
}

impl ClientConfig {
    /// Load configuration from a YAML file
    pub fn load(config_path: impl AsRef<Path>) -> Result<Self> {
        let yaml_content = std::fs::read_to_string(config_path)?;
        Self::from_yaml_str(&yaml_content)
    }

    /// Parse YAML, apply environment overrides and validate
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let mut config: ClientConfig = serde_yaml::from_str(yaml)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("HUB_URL") {
            info!("Overriding hub URL from environment variable");
            self.url = url;
        }
        if let Ok(data) = std::env::var("HUB_CONNECTION_DATA") {
            info!("Overriding connection data from environment variable");
            self.connection_data = Some(data);
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.url.trim().is_empty() {
            return Err(ConfigError::ValidationError("url must not be empty".to_string()));
        }
        if let Err(e) = reqwest::Url::parse(self.url.trim()) {
            return Err(ConfigError::ValidationError(format!(
                "url {:?} is not valid: {}",
                self.url, e
            )));
        }

        if self.protocol_version.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "protocol_version must not be empty".to_string(),
            ));
        }

        if self.transports.is_empty() {
            return Err(ConfigError::ValidationError(
                "transports must list at least one transport".to_string(),
            ));
        }
        for name in &self.transports {
            if !KNOWN_TRANSPORTS.contains(&name.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "unknown transport {:?}, expected one of: {}",
                    name,
                    KNOWN_TRANSPORTS.join(", ")
                )));
            }
        }

        if self.ping_interval_secs == 0 {
            return Err(ConfigError::ValidationError(
                "ping_interval_secs must be greater than 0".to_string(),
            ));
        }

        let valid_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_levels.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "log_level must be one of: {}",
                valid_levels.join(", ")
            )));
        }

        Ok(())
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    /// Log configuration summary
    pub fn log(&self) {
        info!("Configuration loaded:");
        info!("  URL: {}", self.url);
        info!("  Protocol version: {}", self.protocol_version);
        info!("  Transports: {}", self.transports.join(", "));
        info!("  Hubs: {}", self.hubs.join(", "));
        info!("  Headers: {}", self.headers.len());
        info!("  Query parameters: {}", self.query.len());
        info!("  Ping interval: {}s", self.ping_interval_secs);
        info!("  Log level: {}", self.log_level);
    }
}
