//! Per-session sync state machine.

use drivesync_protocol::{Phase, Rejection, SessionId};
use tracing::{debug, warn};

/// The phase of one sync session and the rules for moving it.
///
/// A machine is bound 1:1 to a session token. It is only ever mutated
/// behind the session's mutex, so two requests never advance the same
/// session at once.
///
/// # Invariants
///
/// - A rejected step leaves the phase untouched
/// - `Killed` is absorbing: every later step fails with `SESSION_LOST`
/// - `Idle` is only observed before admission and after the registry ended
///   the session; steps against it fail with `NO_ACTIVE_SESSION`
#[derive(Debug)]
pub struct SyncStateMachine {
    token: SessionId,
    phase: Phase,
}

impl SyncStateMachine {
    /// Creates a machine in `Idle` for a freshly issued token.
    pub fn new(token: SessionId) -> Self {
        Self {
            token,
            phase: Phase::Idle,
        }
    }

    /// Session token this machine belongs to.
    pub fn token(&self) -> &SessionId {
        &self.token
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Checks that `route` may run against the current phase.
    ///
    /// With `expected` set to `None` any live phase is accepted.
    pub fn validate(&self, route: &str, expected: Option<Phase>) -> Result<(), Rejection> {
        match self.phase {
            Phase::Killed => return Err(Rejection::session_lost()),
            Phase::Idle if expected != Some(Phase::Idle) => {
                return Err(Rejection::no_active_session())
            }
            _ => {}
        }

        match expected {
            Some(expected) if expected != self.phase => {
                debug!(
                    session = %self.token,
                    route,
                    expected = %expected,
                    actual = %self.phase,
                    "step out of order"
                );
                Err(Rejection::out_of_order(route, self.phase))
            }
            _ => Ok(()),
        }
    }

    /// Validates `route` and moves to `next`. Returns the previous phase.
    pub fn validate_and_advance(
        &mut self,
        route: &str,
        expected: Option<Phase>,
        next: Phase,
    ) -> Result<Phase, Rejection> {
        self.validate(route, expected)?;
        let previous = self.phase;
        self.phase = next;
        debug!(session = %self.token, route, from = %previous, to = %next, "phase advanced");
        Ok(previous)
    }

    /// Routes an active session to `Conflict`.
    pub fn enter_conflict(&mut self, route: &str) -> Result<(), Rejection> {
        if self.phase == Phase::Killed {
            return Err(Rejection::session_lost());
        }
        if !self.phase.is_active() {
            return Err(Rejection::out_of_order(route, self.phase));
        }
        warn!(session = %self.token, route, from = %self.phase, "session diverged from remote");
        self.phase = Phase::Conflict;
        Ok(())
    }

    /// Returns a finished session to `Idle`.
    pub(crate) fn retire(&mut self) {
        if self.phase != Phase::Killed {
            self.phase = Phase::Idle;
        }
    }

    /// Kills the session. Idempotent.
    pub fn kill(&mut self) {
        self.phase = Phase::Killed;
    }
}
