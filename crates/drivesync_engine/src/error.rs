//! Error types for the sync engine.

use drivesync_fs::FsError;
use drivesync_protocol::{ProtocolError, Rejection, RejectionCode};
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// Protocol error (undecodable or unexpected message).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The server gatekeeper refused the step.
    #[error("rejected: {0}")]
    Rejected(Rejection),

    /// Local filesystem error.
    #[error("filesystem error: {0}")]
    Fs(#[from] FsError),

    /// A cycle is already in flight on this engine.
    #[error("a sync cycle is already in progress")]
    CycleInProgress,

    /// Sync was cancelled.
    #[error("sync cancelled")]
    Cancelled,

    /// `resolve` was called for a path with no recorded conflict.
    #[error("no pending conflict for {0}")]
    NotConflicted(String),

    /// Not connected.
    #[error("not connected to server")]
    NotConnected,
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::Rejected(rejection) => rejection.code.is_retryable(),
            _ => false,
        }
    }

    /// The gatekeeper code, if the server refused the step.
    pub fn rejection_code(&self) -> Option<RejectionCode> {
        match self {
            SyncError::Rejected(rejection) => Some(rejection.code),
            _ => None,
        }
    }

    /// Returns true if the session must be discarded and the engine
    /// reconnected before the next cycle.
    pub fn requires_reconnect(&self) -> bool {
        self.rejection_code()
            .is_some_and(|code| code.requires_reconnect())
    }
}

impl From<ProtocolError> for SyncError {
    fn from(err: ProtocolError) -> Self {
        SyncError::Protocol(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(SyncError::transport_retryable("connection lost").is_retryable());
        assert!(!SyncError::transport_fatal("invalid certificate").is_retryable());
        assert!(SyncError::Rejected(Rejection::session_locked()).is_retryable());
        assert!(SyncError::Rejected(Rejection::already_active()).is_retryable());
        assert!(!SyncError::Rejected(Rejection::session_lost()).is_retryable());
        assert!(!SyncError::Cancelled.is_retryable());
        assert!(!SyncError::CycleInProgress.is_retryable());
    }

    #[test]
    fn reconnect_classification() {
        assert!(SyncError::Rejected(Rejection::session_lost()).requires_reconnect());
        assert!(SyncError::Rejected(Rejection::out_of_order(
            "/sync/upstream",
            drivesync_protocol::Phase::AwaitingDownstream
        ))
        .requires_reconnect());
        assert!(!SyncError::Rejected(Rejection::session_locked()).requires_reconnect());
        assert!(!SyncError::NotConnected.requires_reconnect());
    }

    #[test]
    fn error_display() {
        let err = SyncError::NotConnected;
        assert_eq!(err.to_string(), "not connected to server");

        let err = SyncError::Rejected(Rejection::session_locked());
        assert!(err.to_string().starts_with("rejected"));
        assert_eq!(err.rejection_code(), Some(RejectionCode::SessionLocked));
    }
}
