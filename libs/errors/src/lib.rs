//! Unified error handling for the spoofing proxy
//!
//! One error enum shared by the wire layer, the proxy service and the binary,
//! so every fallible public API returns `MitmResult<T>`.

use std::io;
use thiserror::Error;

// ============================================================================
// MitmError - Main error type
// ============================================================================

/// Main error type for all proxy crates
#[derive(Debug, Error)]
pub enum MitmError {
    // ======================================
    // Configuration Errors
    // ======================================
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid configuration: {field}: {reason}")]
    InvalidConfig { field: String, reason: String },

    // ======================================
    // Network Errors
    // ======================================
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("Connection failed: {endpoint}: {reason}")]
    ConnectionFailed { endpoint: String, reason: String },

    #[error("Timeout: {0}")]
    Timeout(String),

    // ======================================
    // Protocol Errors
    // ======================================
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Frame error: {0}")]
    Frame(String),

    // ======================================
    // I/O Errors
    // ======================================
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    // ======================================
    // Service & Runtime Errors
    // ======================================
    #[error("Service startup failed: {0}")]
    ServiceStartup(String),
}

/// Result type alias using MitmError
pub type MitmResult<T> = Result<T, MitmError>;

impl MitmError {
    /// Shorthand for `InvalidConfig`
    pub fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        MitmError::InvalidConfig {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Whether this error only reports that the peer went away.
    ///
    /// Resets, aborts, broken pipes and EOF mid-frame are the normal way a
    /// Modbus master or PLC drops a TCP session, so callers log them quietly.
    pub fn is_connection_closed(&self) -> bool {
        match self {
            MitmError::Io(err) => is_closed_kind(err.kind()),
            _ => false,
        }
    }

    /// Whether the error is a configuration problem (exit before binding)
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            MitmError::Configuration(_) | MitmError::InvalidConfig { .. }
        )
    }
}

fn is_closed_kind(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof
            | io::ErrorKind::NotConnected
    )
}

// ============================================================================
// From implementations for configuration sources
// ============================================================================

impl From<figment::Error> for MitmError {
    fn from(err: figment::Error) -> Self {
        MitmError::Configuration(err.to_string())
    }
}

impl From<serde_yaml::Error> for MitmError {
    fn from(err: serde_yaml::Error) -> Self {
        MitmError::Configuration(format!("YAML error: {}", err))
    }
}
