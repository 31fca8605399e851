//! Error types for filesystem operations.

use std::io;
use thiserror::Error;

/// Result type for filesystem operations.
pub type FsResult<T> = Result<T, FsError>;

/// Errors that can occur during filesystem operations.
#[derive(Debug, Error)]
pub enum FsError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// No node exists at the path.
    #[error("no such node: {0}")]
    NotFound(String),

    /// A node already exists at the path.
    #[error("node already exists: {0}")]
    AlreadyExists(String),

    /// The path is not a valid node path.
    #[error("invalid path: {0:?}")]
    InvalidPath(String),

    /// Extended attribute storage failed.
    #[error("attribute error on {path}: {message}")]
    Attribute {
        /// Node path.
        path: String,
        /// What went wrong.
        message: String,
    },

    /// Persisted metadata could not be read back.
    #[error("store corrupted: {0}")]
    Corrupted(String),

    /// Another process holds the store lock.
    #[error("store is locked by another process")]
    Locked,
}

impl FsError {
    /// Creates an attribute error.
    pub fn attribute(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Attribute {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl From<drivesync_protocol::ProtocolError> for FsError {
    fn from(err: drivesync_protocol::ProtocolError) -> Self {
        match err {
            drivesync_protocol::ProtocolError::InvalidPath(path) => FsError::InvalidPath(path),
            other => FsError::Corrupted(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for FsError {
    fn from(err: serde_json::Error) -> Self {
        FsError::Corrupted(err.to_string())
    }
}
