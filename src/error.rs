//! Error types for the outbox.

use std::path::PathBuf;

/// Top-level error returned when setting up a buffer.
#[derive(Debug, thiserror::Error)]
pub enum BufferError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Invalid or unusable configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Buffer capacity must be at least {minimum} bytes to store one entry, got {capacity}")]
    CapacityTooSmall { capacity: u64, minimum: u64 },

    #[error("Invalid page geometry: {reason}")]
    InvalidPageSize { reason: String },

    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("No usable data directory for the outbox")]
    NoDataDir,
}

/// Errors from the on-disk page queue.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Queue directory {0} is locked by another process")]
    Locked(PathBuf),

    #[error("Entry of {size} bytes does not fit in a data page of {page_size} bytes")]
    EntryTooLarge { size: u64, page_size: u64 },

    #[error("Entry {index} is corrupted: {reason}")]
    Corrupted { index: u64, reason: String },

    #[error("Invalid queue metadata: {0}")]
    InvalidMetadata(String),

    #[error("Queue is closed")]
    Closed,
}

/// Errors converting envelopes to and from their stored form.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("Failed to encode envelope: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("Failed to decode envelope: {0}")]
    Decode(#[from] bincode::error::DecodeError),

    #[error("Trailing {0} bytes after envelope")]
    TrailingBytes(usize),
}

/// Errors reported by a sender when delivering to the remote side.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SendError {
    /// The connection carrying messages is gone. The message was not delivered.
    #[error("Connection lost: {reason}")]
    ConnectionLost { reason: String },

    /// The remote side received the message and refused it.
    #[error("Rejected by server: {reason}")]
    Rejected { reason: String },

    #[error("Timed out waiting for a response")]
    Timeout,
}

impl SendError {
    /// Returns true for failures of the transport itself, which are worth retrying
    /// once a new sender is attached.
    pub fn is_transport(&self) -> bool {
        matches!(self, SendError::ConnectionLost { .. })
    }
}

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_connection_loss_is_transport() {
        assert!(
            SendError::ConnectionLost {
                reason: "eof".to_string()
            }
            .is_transport()
        );
        assert!(
            !SendError::Rejected {
                reason: "bad".to_string()
            }
            .is_transport()
        );
        assert!(!SendError::Timeout.is_transport());
    }

    #[test]
    fn test_capacity_error_message() {
        let err = ConfigError::CapacityTooSmall {
            capacity: 10,
            minimum: 88,
        };
        assert_eq!(
            err.to_string(),
            "Buffer capacity must be at least 88 bytes to store one entry, got 10"
        );
    }
}
