//! # Configuration Management
//!
//! Centralized configuration for the server core.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()` / `from_toml()`
//! - Environment-variable overrides via `from_env()`
//! - Direct instantiation with defaults
//!
//! The accept timeout bounds how long a freshly connected client may sit
//! unidentified before the server rejects it; keep it short enough that idle
//! probes cannot pin registry slots.

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::Level;

use crate::error::{NetError, Result};

/// Default cap on concurrently registered clients.
pub const DEFAULT_MAX_CLIENTS: u16 = 1000;

/// Default seconds a session may stay pending before auto-rejection.
pub const DEFAULT_ACCEPT_TIMEOUT_SECS: u16 = 10;

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    /// Server-specific configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)
            .map_err(|e| NetError::ConfigError(format!("Failed to open config file: {e}")))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| NetError::ConfigError(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    /// Load configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| NetError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Load configuration from environment variables, starting from defaults.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(host) = std::env::var("R2O_NET_HOST") {
            config.server.host = host;
        }

        if let Ok(port) = std::env::var("R2O_NET_PORT") {
            if let Ok(val) = port.parse::<u16>() {
                config.server.port = val;
            }
        }

        if let Ok(max) = std::env::var("R2O_NET_MAX_CLIENTS") {
            if let Ok(val) = max.parse::<u16>() {
                config.server.max_clients = val;
            }
        }

        if let Ok(timeout) = std::env::var("R2O_NET_ACCEPT_TIMEOUT_SECS") {
            if let Ok(val) = timeout.parse::<u16>() {
                config.server.accept_timeout_secs = val;
            }
        }

        Ok(config)
    }

    /// Validate the configuration for common misconfigurations.
    ///
    /// Returns a list of validation errors; empty means valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.server.validate());
        errors
    }

    /// Validate and return a Result.
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(NetError::ConfigError(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

/// Server-specific configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0")
    pub host: String,

    /// Bind port; 0 asks the OS for an ephemeral port
    pub port: u16,

    /// Hard cap on registered clients; connections beyond it are rejected
    /// with the server-is-full fatal error
    pub max_clients: u16,

    /// Seconds a connection may stay unaccepted before it is auto-rejected
    pub accept_timeout_secs: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: String::from("127.0.0.1"),
            port: 9000,
            max_clients: DEFAULT_MAX_CLIENTS,
            accept_timeout_secs: DEFAULT_ACCEPT_TIMEOUT_SECS,
        }
    }
}

impl ServerConfig {
    /// Configuration for `host:port` with default limits.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    /// The `host:port` string the listener binds.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Validate server configuration.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.host.is_empty() {
            errors.push("Server host cannot be empty".to_string());
        }

        if self.max_clients == 0 {
            errors.push("Max clients must be greater than 0".to_string());
        }

        if self.accept_timeout_secs == 0 {
            errors.push("Accept timeout must be greater than 0 seconds".to_string());
        } else if self.accept_timeout_secs > 300 {
            errors.push(format!(
                "Accept timeout very long: {} seconds (maximum recommended: 300)",
                self.accept_timeout_secs
            ));
        }

        errors
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(with = "log_level_serde")]
    pub level: Level,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            json_format: false,
        }
    }
}

/// Helper module for tracing::Level serialization/deserialization.
mod log_level_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;
    use tracing::Level;

    pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let level_str = match *level {
            Level::TRACE => "trace",
            Level::DEBUG => "debug",
            Level::INFO => "info",
            Level::WARN => "warn",
            Level::ERROR => "error",
        };
        level_str.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        let level_str = String::deserialize(deserializer)?;
        Level::from_str(&level_str)
            .map_err(|_| serde::de::Error::custom(format!("Invalid log level: {level_str}")))
    }
}
