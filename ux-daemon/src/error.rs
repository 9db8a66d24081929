//! Error types for the UX daemon

use thiserror::Error;
use ux_comms::CommsError;

/// Result type for daemon operations
pub type DaemonResult<T> = Result<T, DaemonError>;

/// Errors that can occur while configuring or running the daemon
#[derive(Error, Debug)]
pub enum DaemonError {
    /// No driver registered under this name
    #[error("Unknown driver '{name}' (available: {available})")]
    UnknownDriver { name: String, available: String },

    /// Configuration value rejected
    #[error("Configuration error: {0}")]
    Config(String),

    /// No reply arrived before the deadline
    #[error("No reply within {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// The link failed before a reply arrived
    #[error("Link to {address}:{port} failed")]
    LinkFailed { address: String, port: u16 },

    /// Transport error
    #[error("Transport error: {0}")]
    Comms(#[from] CommsError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

