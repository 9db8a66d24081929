//! Error types for transport operations
//!
//! Every failure the transport can report to its owner is a [`CommsError`].
//! Each variant carries:
//! - A human-readable message
//! - A stable error code for programmatic handling
//! - A category for grouping
//!
//! Link-level faults (peer gone, connect refused) are normally *not* returned
//! from API calls at all; they surface as control events on the channel. The
//! errors below are what a caller sees when it asks for something the
//! transport cannot do right now.
//!
//! # Example
//!
//! ```rust
//! use ux_comms::error::{CommsError, ErrorCategory};
//! use ux_comms::ChannelId;
//!
//! fn handle_error(err: CommsError) {
//!     match err.category() {
//!         ErrorCategory::Transient => println!("flush and retry"),
//!         ErrorCategory::Caller => println!("bad request"),
//!         _ => println!("other error"),
//!     }
//!
//!     if err.is_recoverable() {
//!         println!("Retry may succeed");
//!     }
//! }
//!
//! handle_error(CommsError::Busy { channel: ChannelId::new(3) });
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::registry::ChannelId;

/// Result type alias for transport operations
pub type Result<T> = std::result::Result<T, CommsError>;

/// Error category for grouping related errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Caller passed something the transport cannot act on
    Caller,
    /// Try again after flushing or waiting
    Transient,
    /// Peer unreachable or link not established
    Link,
    /// OS-level socket fault
    Socket,
    /// Bytes on the wire did not form a valid frame
    Protocol,
    /// Memory could not be obtained
    Resource,
    /// Configuration could not be loaded or is inconsistent
    Config,
}

/// Errors that can occur in transport operations
#[derive(Error, Debug)]
pub enum CommsError {
    // ═══════════════════════════════════════════════════════════════════════
    // Caller errors (no state change)
    // ═══════════════════════════════════════════════════════════════════════

    /// No live connection holds this channel id, or the channel cannot carry data
    #[error("Invalid channel: {channel}. The channel is not registered or cannot carry data.")]
    InvalidChannel { channel: ChannelId },

    /// Payload does not fit in one frame
    #[error("Payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    // ═══════════════════════════════════════════════════════════════════════
    // Link errors
    // ═══════════════════════════════════════════════════════════════════════

    /// A previous send on this channel is still draining
    #[error("Channel {channel} busy: previous frame still draining. Flush with an empty send and retry.")]
    Busy { channel: ChannelId },

    /// The peer is not connected (client link down or not yet established)
    #[error("No service on channel {channel}: link is not up")]
    NoService { channel: ChannelId },

    /// The socket failed and the connection cannot be used again
    #[error("Bad socket on channel {channel}: {reason}")]
    BadSocket { channel: ChannelId, reason: String },

    /// Host name could not be turned into a socket address
    #[error("Address resolution failed for '{address}': {reason}")]
    AddressResolution { address: String, reason: String },

    // ═══════════════════════════════════════════════════════════════════════
    // Wire errors
    // ═══════════════════════════════════════════════════════════════════════

    /// Bytes did not decode as a frame
    #[error("Protocol desync: {reason}")]
    ProtocolDesync { reason: String },

    // ═══════════════════════════════════════════════════════════════════════
    // Infrastructure errors (memory, configuration, I/O)
    // ═══════════════════════════════════════════════════════════════════════

    /// Buffer growth or allocation failed
    #[error("Out of memory while {context}")]
    NoMemory { context: String },

    /// Configuration values are inconsistent
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    /// JSON serialization or deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CommsError {
    /// Returns true if this error might succeed on retry
    ///
    /// `Busy` clears once the pending frame drains, `NoService` once the
    /// client reconnects, `NoMemory` once memory is available again.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            CommsError::Busy { .. } | CommsError::NoService { .. } | CommsError::NoMemory { .. }
        )
    }

    /// Returns the error category for grouping
    pub fn category(&self) -> ErrorCategory {
        match self {
            CommsError::InvalidChannel { .. } | CommsError::PayloadTooLarge { .. } => {
                ErrorCategory::Caller
            }
            CommsError::Busy { .. } => ErrorCategory::Transient,
            CommsError::NoService { .. } | CommsError::AddressResolution { .. } => {
                ErrorCategory::Link
            }
            CommsError::BadSocket { .. } | CommsError::Io(_) => ErrorCategory::Socket,
            CommsError::ProtocolDesync { .. } => ErrorCategory::Protocol,
            CommsError::NoMemory { .. } => ErrorCategory::Resource,
            CommsError::InvalidConfig { .. } | CommsError::Json(_) => ErrorCategory::Config,
        }
    }

    /// Returns the stable error code for this error
    pub fn error_code(&self) -> &'static str {
        match self {
            CommsError::InvalidChannel { .. } => "INVALID_CHANNEL",
            CommsError::PayloadTooLarge { .. } => "PAYLOAD_TOO_LARGE",
            CommsError::Busy { .. } => "BUSY",
            CommsError::NoService { .. } => "NO_SERVICE",
            CommsError::BadSocket { .. } => "BAD_SOCKET",
            CommsError::AddressResolution { .. } => "ADDRESS_RESOLUTION",
            CommsError::ProtocolDesync { .. } => "PROTOCOL_DESYNC",
            CommsError::NoMemory { .. } => "NO_MEMORY",
            CommsError::InvalidConfig { .. } => "INVALID_CONFIG",
            CommsError::Json(_) => "JSON_ERROR",
            CommsError::Io(_) => "IO_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_is_recoverable() {
        let channel = ChannelId::new(1);
        assert!(CommsError::Busy { channel }.is_recoverable());
        assert!(CommsError::NoService { channel }.is_recoverable());
        assert!(!CommsError::InvalidChannel { channel }.is_recoverable());
        assert!(!CommsError::BadSocket {
            channel,
            reason: "reset".to_string()
        }
        .is_recoverable());
    }

    #[test]
    fn test_error_codes() {
        let channel = ChannelId::new(7);
        assert_eq!(CommsError::Busy { channel }.error_code(), "BUSY");
        assert_eq!(
            CommsError::InvalidChannel { channel }.error_code(),
            "INVALID_CHANNEL"
        );
        assert_eq!(
            CommsError::ProtocolDesync {
                reason: "crc".to_string()
            }
            .error_code(),
            "PROTOCOL_DESYNC"
        );
    }

    #[test]
    fn test_error_categories() {
        let channel = ChannelId::new(2);
        assert_eq!(CommsError::Busy { channel }.category(), ErrorCategory::Transient);
        assert_eq!(
            CommsError::PayloadTooLarge { size: 70000, max: 65535 }.category(),
            ErrorCategory::Caller
        );
        let io = std::io::Error::from(std::io::ErrorKind::ConnectionReset);
        assert_eq!(CommsError::from(io).category(), ErrorCategory::Socket);
    }

    #[test]
    fn test_category_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorCategory::Transient).unwrap();
        assert_eq!(json, "\"transient\"");
    }

    #[test]
    fn test_error_messages_name_the_channel() {
        let msg = CommsError::NoService {
            channel: ChannelId::new(42),
        }
        .to_string();
        assert!(msg.contains("42"));
    }
}
