//! Error types for sockbridge
//!
//! This module defines the error hierarchy for the relay engine.
//! All errors are categorized by subsystem and include recovery hints.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::ConnId;

/// Top-level error type for sockbridge
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Configuration errors (file parsing, validation)
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Socket registry errors
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Connection directory errors
    #[error("Directory error: {0}")]
    Directory(#[from] DirectoryError),

    /// Connection establishment errors
    #[error("Open error: {0}")]
    Open(#[from] OpenError),

    /// Multiplexer loop errors
    #[error("Multiplexer error: {0}")]
    Mux(#[from] MuxError),

    /// Operation referenced a connection that is not live
    #[error("Connection {id} not found")]
    ConnectionNotFound { id: ConnId },

    /// Data transfer error on the backend socket
    #[error("Transfer error on connection {id}: {source}")]
    Transfer {
        id: ConnId,
        #[source]
        source: io::Error,
    },

    /// I/O errors not covered by other categories
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl BridgeError {
    /// Check if this error is recoverable (can retry operation)
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Config(_) => false,
            Self::Registry(e) => e.is_recoverable(),
            Self::Directory(e) => e.is_recoverable(),
            Self::Open(e) => e.is_recoverable(),
            Self::Mux(e) => e.is_recoverable(),
            Self::ConnectionNotFound { .. } => false,
            Self::Transfer { source, .. } => matches!(
                source.kind(),
                io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
            ),
            Self::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::TimedOut
                    | io::ErrorKind::Interrupted
                    | io::ErrorKind::WouldBlock
                    | io::ErrorKind::ConnectionReset
            ),
        }
    }
}

/// Configuration-related errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File not found or inaccessible
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    /// JSON parsing error
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Validation error (invalid values, missing required fields)
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),

    /// Environment variable error
    #[error("Environment variable error: {name}: {reason}")]
    EnvError { name: String, reason: String },

    /// I/O error while reading config
    #[error("I/O error reading configuration: {0}")]
    IoError(#[from] io::Error),
}

impl ConfigError {
    /// Config errors are fatal at startup; never recoverable
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        false
    }
}

/// Socket registry errors
#[derive(Debug, Error)]
pub enum RegistryError {
    /// A channel with this name is already registered
    #[error("Duplicate channel: {name}")]
    DuplicateChannel { name: String },

    /// No channel with this name is registered
    #[error("Unknown channel: {name}")]
    UnknownChannel { name: String },

    /// The backend address does not resolve to a usable local socket
    #[error("Invalid backend address {path:?}: {reason}")]
    InvalidAddress { path: PathBuf, reason: String },
}

impl RegistryError {
    /// Check if this error is recoverable
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        // A dead backend socket may come back; the registry itself never
        // changes after startup.
        matches!(self, Self::InvalidAddress { .. })
    }

    /// Create an invalid address error
    pub fn invalid_address(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::InvalidAddress {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Connection directory errors
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// A live connection already uses this id.
    ///
    /// This signals a reused descriptor before its prior entry was removed,
    /// which is a programming defect upstream, not an ordinary connection
    /// failure. It is logged distinctly and never silently merged.
    #[error("Connection id collision: {id} (channel {channel})")]
    IdCollision { id: ConnId, channel: String },
}

impl DirectoryError {
    /// Collisions indicate a defect; retrying will not help
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        false
    }
}

/// Connection establishment errors, reported synchronously to `open`
///
/// The core performs no retry; retry policy belongs to the session layer.
#[derive(Debug, Error)]
pub enum OpenError {
    /// The channel name is not registered
    #[error("Unknown channel: {name}")]
    UnknownChannel { name: String },

    /// The backend address failed validation at open time
    #[error("Bad backend address {path:?}: {reason}")]
    BadAddress { path: PathBuf, reason: String },

    /// Socket creation failed
    #[error("Failed to create backend socket: {reason}")]
    SocketCreate { reason: String },

    /// Connecting to the backend socket failed
    #[error("Failed to connect to {path:?}: {reason}")]
    ConnectFailed { path: PathBuf, reason: String },

    /// The new descriptor collided with a live directory entry
    #[error("Descriptor {id} already present in connection directory")]
    IdCollision { id: ConnId },

    /// The multiplexer loop has stopped
    #[error("Relay engine is stopped")]
    EngineStopped,
}

impl OpenError {
    /// Check if this error is recoverable
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        match self {
            Self::UnknownChannel { .. } | Self::IdCollision { .. } | Self::EngineStopped => false,
            Self::BadAddress { .. } | Self::SocketCreate { .. } | Self::ConnectFailed { .. } => true,
        }
    }

    /// Create a bad address error
    pub fn bad_address(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::BadAddress {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a connect failed error
    pub fn connect_failed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::ConnectFailed {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

impl From<RegistryError> for OpenError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::UnknownChannel { name }
            | RegistryError::DuplicateChannel { name } => Self::UnknownChannel { name },
            RegistryError::InvalidAddress { path, reason } => Self::BadAddress { path, reason },
        }
    }
}

/// Multiplexer loop errors
#[derive(Debug, Error)]
pub enum MuxError {
    /// The loop task has stopped; no further fd-set changes are possible
    #[error("Multiplexer loop is stopped")]
    Stopped,

    /// The loop dropped the acknowledgement for a command
    #[error("Multiplexer dropped command acknowledgement")]
    AckDropped,
}

impl MuxError {
    /// Loop-fatal conditions are never recoverable
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        false
    }
}

/// Type alias for Result with BridgeError
pub type Result<T> = std::result::Result<T, BridgeError>;
