//! Core error types for the session gateway

use std::path::PathBuf;
use thiserror::Error;

use crate::types::ConnectionState;

/// Credential store failures
///
/// Any of these leaves persisted and in-memory credentials possibly out of
/// sync, so the supervisor treats them as fatal.
#[derive(Error, Debug)]
pub enum PersistenceError {
    /// Filesystem operation failed
    #[error("Failed to {action} {path}: {source}")]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Entry name is not a plain file name
    #[error("Invalid credential entry name: {0:?}")]
    InvalidEntry(String),

    /// Entry contents are not valid UTF-8
    #[error("Credential entry {0:?} is not valid UTF-8")]
    NotUtf8(String),

    /// Blocking task was cancelled or panicked
    #[error("Credential store task failed: {0}")]
    Task(String),
}

impl PersistenceError {
    /// Wrap an I/O error with the operation and path that failed
    pub fn io(action: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PersistenceError::Io {
            action,
            path: path.into(),
            source,
        }
    }
}

/// Session transport failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// `connect` was called while a socket is already open or connecting
    #[error("A session socket is already active")]
    AlreadyActive,

    /// No live socket to act on
    #[error("No active session socket")]
    NotConnected,

    /// Socket closed before the operation completed
    #[error("Session socket closed: {0}")]
    Closed(String),

    /// Operation did not complete in time
    #[error("Timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The platform rejected the operation
    #[error("Rejected by platform: {0}")]
    Rejected(String),
}

/// Outbound send failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// Required fields were missing or empty
    #[error("Missing required fields: {}", fields.join(", "))]
    Validation { fields: Vec<&'static str> },

    /// No live session to send on
    #[error("Not connected (status: {status})")]
    ServiceUnavailable { status: ConnectionState },

    /// The transport failed to deliver
    #[error("Send failed: {0}")]
    Transport(#[from] TransportError),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}
