//! Error types for the sync server.

use drivesync_protocol::{ProtocolError, Rejection};
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the sync server.
#[derive(Error, Debug)]
pub enum ServerError {
    /// The gatekeeper refused the request.
    #[error("rejected: {0}")]
    Rejected(#[from] Rejection),

    /// Invalid request format.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Credentials could not be verified.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Envelope or reply could not be encoded or decoded.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// HTTP-equivalent status code.
    pub fn status(&self) -> u16 {
        match self {
            ServerError::Rejected(rejection) => rejection.status(),
            ServerError::InvalidRequest(_) | ServerError::Protocol(_) => 400,
            ServerError::AuthenticationFailed(_) => 401,
            ServerError::Internal(_) => 500,
        }
    }

    /// Returns true if this is a client error (4xx).
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status())
    }

    /// Returns true if this is a server error (5xx).
    pub fn is_server_error(&self) -> bool {
        self.status() >= 500
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_classification() {
        assert!(ServerError::InvalidRequest("bad".into()).is_client_error());
        assert!(ServerError::Internal("oops".into()).is_server_error());
        assert!(!ServerError::InvalidRequest("bad".into()).is_server_error());
    }

    #[test]
    fn rejection_status_passes_through() {
        let locked = ServerError::from(Rejection::session_locked());
        assert_eq!(locked.status(), 423);
        assert!(locked.is_client_error());

        let lost = ServerError::from(Rejection::session_lost());
        assert_eq!(lost.status(), 500);
        assert!(lost.is_server_error());
    }

    #[test]
    fn error_display() {
        let err = ServerError::from(Rejection::missing_session_id());
        assert!(err.to_string().contains("syncId not passed!"));
    }
}
