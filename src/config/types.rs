//! Configuration types for sockbridge
//!
//! This module defines all configuration structures used by the bridge.
//! Configuration is loaded from JSON files and can be validated at startup.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::registry::DEFAULT_BUFFER_HINT;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Channel-to-backend-socket mappings
    pub channels: Vec<ChannelConfig>,

    /// Relay engine tuning
    #[serde(default)]
    pub engine: EngineConfig,

    /// Logging configuration
    #[serde(default)]
    pub log: LogConfig,
}

impl Config {
    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if validation fails.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.channels.is_empty() {
            return Err(ConfigError::ValidationError(
                "At least one channel must be configured".into(),
            ));
        }

        let mut names: std::collections::HashSet<&str> = std::collections::HashSet::new();
        for channel in &self.channels {
            channel.validate()?;
            if !names.insert(&channel.name) {
                return Err(ConfigError::ValidationError(format!(
                    "Duplicate channel name: {}",
                    channel.name
                )));
            }
        }

        self.engine.validate()?;

        Ok(())
    }

    /// Create a minimal default configuration
    #[must_use]
    pub fn default_config() -> Self {
        Self {
            channels: vec![ChannelConfig {
                name: "backend".into(),
                socket: "/run/backend.sock".into(),
                buffer_hint: DEFAULT_BUFFER_HINT,
            }],
            engine: EngineConfig::default(),
            log: LogConfig::default(),
        }
    }
}

/// One channel mapping entry
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChannelConfig {
    /// Channel name clients ask for
    pub name: String,

    /// Backend Unix socket path
    pub socket: PathBuf,

    /// Per-channel read buffer hint in bytes
    #[serde(default = "default_buffer_hint")]
    pub buffer_hint: usize,
}

impl ChannelConfig {
    /// Validate a single channel entry
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if validation fails.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::ValidationError(
                "Channel name cannot be empty".into(),
            ));
        }
        if self.name.contains(':') {
            return Err(ConfigError::ValidationError(format!(
                "Channel name '{}' cannot contain ':'",
                self.name
            )));
        }
        if self.socket.as_os_str().is_empty() {
            return Err(ConfigError::ValidationError(format!(
                "Channel '{}' has an empty socket path",
                self.name
            )));
        }
        if self.buffer_hint == 0 {
            return Err(ConfigError::ValidationError(format!(
                "Channel '{}' has a zero buffer hint",
                self.name
            )));
        }
        Ok(())
    }

    /// Parse a `name:/path/to.sock` command-line pair
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if the pair is malformed.
    pub fn parse_pair(pair: &str) -> Result<Self, ConfigError> {
        let (name, socket) = pair.split_once(':').ok_or_else(|| {
            ConfigError::ValidationError(format!("Expected name:path, got '{pair}'"))
        })?;

        let channel = Self {
            name: name.to_owned(),
            socket: socket.into(),
            buffer_hint: DEFAULT_BUFFER_HINT,
        };
        channel.validate()?;
        Ok(channel)
    }
}

/// Relay engine tuning
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Depth of the multiplexer command queue
    #[serde(default = "default_command_queue_depth")]
    pub command_queue_depth: usize,
}

impl EngineConfig {
    /// Validate engine tuning
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if validation fails.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.command_queue_depth == 0 {
            return Err(ConfigError::ValidationError(
                "command_queue_depth must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            command_queue_depth: default_command_queue_depth(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: "text" or "json"
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Include timestamps in log output
    #[serde(default = "default_true")]
    pub timestamps: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            timestamps: true,
        }
    }
}

fn default_buffer_hint() -> usize {
    DEFAULT_BUFFER_HINT
}

fn default_command_queue_depth() -> usize {
    32
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "text".into()
}

fn default_true() -> bool {
    true
}
