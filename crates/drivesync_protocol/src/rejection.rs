//! Typed rejections returned by the server gatekeeper.

use crate::phase::Phase;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a sync request was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectionCode {
    /// No identity on the request.
    Unauthenticated,
    /// The route requires a sync in progress and the user has none.
    NoActiveSession,
    /// The session correlation id was not sent.
    MissingSessionId,
    /// Another session is in progress for this user.
    SessionLocked,
    /// Registry and session state disagree; the session was killed.
    SessionLost,
    /// The step was called out of order.
    OutOfOrder,
    /// `begin` was called while a session is already active.
    AlreadyActive,
    /// Remote and local state diverged.
    Conflict,
}

impl RejectionCode {
    /// HTTP-equivalent status code.
    pub fn status(&self) -> u16 {
        match self {
            RejectionCode::Unauthenticated => 401,
            RejectionCode::NoActiveSession => 401,
            RejectionCode::MissingSessionId => 400,
            RejectionCode::SessionLocked => 423,
            RejectionCode::SessionLost => 500,
            RejectionCode::OutOfOrder => 401,
            RejectionCode::AlreadyActive => 423,
            RejectionCode::Conflict => 409,
        }
    }

    /// Returns true if the same request may succeed after a backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RejectionCode::SessionLocked | RejectionCode::AlreadyActive
        )
    }

    /// Returns true if the client must discard its session and reconnect.
    pub fn requires_reconnect(&self) -> bool {
        matches!(self, RejectionCode::SessionLost | RejectionCode::OutOfOrder)
    }
}

impl fmt::Display for RejectionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RejectionCode::Unauthenticated => "UNAUTHENTICATED",
            RejectionCode::NoActiveSession => "NO_ACTIVE_SESSION",
            RejectionCode::MissingSessionId => "MISSING_SESSION_ID",
            RejectionCode::SessionLocked => "SESSION_LOCKED",
            RejectionCode::SessionLost => "SESSION_LOST",
            RejectionCode::OutOfOrder => "OUT_OF_ORDER",
            RejectionCode::AlreadyActive => "ALREADY_ACTIVE",
            RejectionCode::Conflict => "CONFLICT",
        };
        f.write_str(name)
    }
}

/// A rejection with a human readable message.
///
/// The message is illustrative; callers branch on [`Rejection::code`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    /// Rejection kind.
    pub code: RejectionCode,
    /// Message for logs and users.
    pub message: String,
}

impl Rejection {
    /// Creates a rejection.
    pub fn new(code: RejectionCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Authentication required.
    pub fn unauthenticated() -> Self {
        Self::new(RejectionCode::Unauthenticated, "Authentication required.")
    }

    /// The route requires a sync in progress.
    pub fn no_active_session() -> Self {
        Self::new(
            RejectionCode::NoActiveSession,
            "This route requires a sync in progress!",
        )
    }

    /// The session id was not passed.
    pub fn missing_session_id() -> Self {
        Self::new(RejectionCode::MissingSessionId, "syncId not passed!")
    }

    /// Another client holds the sync lock.
    pub fn session_locked() -> Self {
        Self::new(
            RejectionCode::SessionLocked,
            "Sync already in progress, try again later!",
        )
    }

    /// Session state vanished.
    pub fn session_lost() -> Self {
        Self::new(RejectionCode::SessionLost, "Critical error! Sync lost.")
    }

    /// A step arrived while the session was in another phase.
    pub fn out_of_order(route: &str, actual: Phase) -> Self {
        Self::new(
            RejectionCode::OutOfOrder,
            format!("{route} called out of order! (session is {actual})"),
        )
    }

    /// `begin` collided with an active session.
    pub fn already_active() -> Self {
        Self::new(
            RejectionCode::AlreadyActive,
            "A sync is already active for this user, try again later!",
        )
    }

    /// HTTP-equivalent status code.
    pub fn status(&self) -> u16 {
        self.code.status()
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.code, self.status(), self.message)
    }
}

impl std::error::Error for Rejection {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_table() {
        assert_eq!(Rejection::unauthenticated().status(), 401);
        assert_eq!(Rejection::no_active_session().status(), 401);
        assert_eq!(Rejection::missing_session_id().status(), 400);
        assert_eq!(Rejection::session_locked().status(), 423);
        assert_eq!(Rejection::session_lost().status(), 500);
        assert_eq!(Rejection::out_of_order("/sync/upstream", Phase::Idle).status(), 401);
    }

    #[test]
    fn retry_classification() {
        assert!(RejectionCode::SessionLocked.is_retryable());
        assert!(RejectionCode::AlreadyActive.is_retryable());
        assert!(!RejectionCode::SessionLost.is_retryable());
        assert!(!RejectionCode::OutOfOrder.is_retryable());
        assert!(!RejectionCode::Conflict.is_retryable());

        assert!(RejectionCode::SessionLost.requires_reconnect());
        assert!(RejectionCode::OutOfOrder.requires_reconnect());
        assert!(!RejectionCode::SessionLocked.requires_reconnect());
    }

    #[test]
    fn out_of_order_names_route() {
        let rejection = Rejection::out_of_order("/sync/downstream", Phase::UpstreamActive);
        assert!(rejection.message.contains("/sync/downstream"));
        assert!(rejection.message.contains("UPSTREAM_ACTIVE"));
    }
}
