//! Session registry: at most one active sync session per user.

use crate::machine::SyncStateMachine;
use crate::state_store::{SessionStateStore, SharedMachine};
use drivesync_protocol::{Phase, Rejection, SessionId, ROUTE_BEGIN};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// An active session as seen by the registry.
///
/// The session's phase lives in its [`SyncStateMachine`], reachable through
/// the state store under `token`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    /// User identity owning the session.
    pub owner: String,
    /// Token correlating requests with this session.
    pub token: SessionId,
    /// When the session was admitted.
    pub created_at: Instant,
    /// Last request that passed the token check.
    pub last_activity: Instant,
}

/// How an idle session was torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    /// Ended normally.
    Ended,
    /// Killed because its state object was gone.
    Killed,
}

/// Process-wide map from user identity to its single active session.
///
/// Admission is a compare-and-set under one lock, so concurrent `begin`
/// calls for the same identity yield exactly one session. The registry lock
/// is never held while a session machine is locked.
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, SessionRecord>>,
    states: Arc<dyn SessionStateStore>,
}

impl SessionRegistry {
    /// Creates a registry backed by a state store.
    pub fn new(states: Arc<dyn SessionStateStore>) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            states,
        }
    }

    /// Admits a new session for `identity`.
    ///
    /// # Errors
    ///
    /// Returns `ALREADY_ACTIVE` if the user has a session; the existing
    /// session is left untouched.
    pub fn begin(&self, identity: &str) -> Result<SessionRecord, Rejection> {
        let mut sessions = self.sessions.lock();
        if sessions.contains_key(identity) {
            debug!(user = identity, "begin refused, session already active");
            return Err(Rejection::already_active());
        }

        let token = SessionId::new(Uuid::new_v4().to_string());
        let mut machine = SyncStateMachine::new(token.clone());
        machine.validate_and_advance(ROUTE_BEGIN, Some(Phase::Idle), Phase::AwaitingDownstream)?;
        self.states
            .insert(token.clone(), Arc::new(Mutex::new(machine)));

        let now = Instant::now();
        let record = SessionRecord {
            owner: identity.to_string(),
            token,
            created_at: now,
            last_activity: now,
        };
        sessions.insert(identity.to_string(), record.clone());

        info!(user = identity, session = %record.token, "session admitted");
        Ok(record)
    }

    /// Looks up the active session for `identity` and checks its token.
    ///
    /// # Errors
    ///
    /// Returns `NO_ACTIVE_SESSION` if the user has none and
    /// `SESSION_LOCKED` if `token` belongs to another conversation.
    pub fn lookup(&self, identity: &str, token: &SessionId) -> Result<SessionRecord, Rejection> {
        let sessions = self.sessions.lock();
        let record = sessions
            .get(identity)
            .ok_or_else(Rejection::no_active_session)?;
        if record.token != *token {
            return Err(Rejection::session_locked());
        }
        Ok(record.clone())
    }

    /// Returns the active session for `identity`, if any.
    pub fn get(&self, identity: &str) -> Option<SessionRecord> {
        self.sessions.lock().get(identity).cloned()
    }

    /// Gate checks 2 to 5: session exists, id present, id matches, state
    /// object retrievable. A missing state object kills the session.
    pub(crate) fn resolve(
        &self,
        identity: &str,
        token: Option<&SessionId>,
    ) -> Result<(SessionRecord, SharedMachine), Rejection> {
        let mut sessions = self.sessions.lock();
        let record = sessions
            .get_mut(identity)
            .ok_or_else(Rejection::no_active_session)?;
        let token = token.ok_or_else(Rejection::missing_session_id)?;
        if record.token != *token {
            debug!(user = identity, "request collided with the active session");
            return Err(Rejection::session_locked());
        }

        let Some(machine) = self.states.get(token) else {
            warn!(
                user = identity,
                session = %token,
                "session state missing, killing session"
            );
            sessions.remove(identity);
            return Err(Rejection::session_lost());
        };

        record.last_activity = Instant::now();
        Ok((record.clone(), machine))
    }

    /// Removes the session for `identity` unconditionally and marks its
    /// machine `Killed`. Idempotent. Returns true if a session was removed.
    pub fn kill(&self, identity: &str) -> bool {
        self.teardown(identity, None, true)
    }

    /// Ends the session for `identity` after a completed cycle. The user may
    /// begin a new session immediately. Returns true if one was removed.
    pub fn end(&self, identity: &str) -> bool {
        self.teardown(identity, None, false)
    }

    /// Ends the session for `identity` only if it is still `token`.
    pub(crate) fn end_session(&self, identity: &str, token: &SessionId) -> bool {
        self.teardown(identity, Some(token), false)
    }

    /// Sessions with no activity for at least `timeout` as of `now`.
    pub fn idle_sessions(&self, now: Instant, timeout: Duration) -> Vec<SessionRecord> {
        self.sessions
            .lock()
            .values()
            .filter(|record| now.saturating_duration_since(record.last_activity) >= timeout)
            .cloned()
            .collect()
    }

    /// Tears down `token` if it is still the idle session of `identity`.
    ///
    /// The session is ended, or killed when its state object is gone.
    pub fn expire(
        &self,
        identity: &str,
        token: &SessionId,
        now: Instant,
        timeout: Duration,
    ) -> Option<Expiry> {
        let record = {
            let mut sessions = self.sessions.lock();
            let still_idle = sessions.get(identity).map_or(false, |record| {
                record.token == *token
                    && now.saturating_duration_since(record.last_activity) >= timeout
            });
            if !still_idle {
                return None;
            }
            sessions.remove(identity)?
        };

        match self.states.remove(&record.token) {
            Some(machine) => {
                machine.lock().retire();
                info!(user = identity, session = %record.token, "idle session ended");
                Some(Expiry::Ended)
            }
            None => {
                warn!(user = identity, session = %record.token, "idle session had no state, killed");
                Some(Expiry::Killed)
            }
        }
    }

    /// Number of active sessions.
    pub fn active_count(&self) -> usize {
        self.sessions.lock().len()
    }

    /// The state store backing this registry.
    pub fn states(&self) -> &Arc<dyn SessionStateStore> {
        &self.states
    }

    fn teardown(&self, identity: &str, token: Option<&SessionId>, kill: bool) -> bool {
        let record = {
            let mut sessions = self.sessions.lock();
            match (sessions.get(identity), token) {
                (None, _) => return false,
                (Some(record), Some(token)) if record.token != *token => return false,
                _ => {}
            }
            match sessions.remove(identity) {
                Some(record) => record,
                None => return false,
            }
        };

        if let Some(machine) = self.states.remove(&record.token) {
            let mut machine = machine.lock();
            if kill {
                machine.kill();
            } else {
                machine.retire();
            }
        }

        if kill {
            warn!(user = identity, session = %record.token, "session killed");
        } else {
            info!(user = identity, session = %record.token, "session ended");
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_store::MemoryStateStore;
    use drivesync_protocol::RejectionCode;
    use std::sync::Barrier;
    use std::thread;

    fn registry() -> (SessionRegistry, Arc<MemoryStateStore>) {
        let states = Arc::new(MemoryStateStore::new());
        (SessionRegistry::new(states.clone()), states)
    }

    #[test]
    fn begin_then_lookup() {
        let (registry, states) = registry();
        let record = registry.begin("alice").unwrap();

        assert_eq!(record.owner, "alice");
        assert_eq!(registry.lookup("alice", &record.token).unwrap(), record);
        let machine = states.get(&record.token).unwrap();
        assert_eq!(machine.lock().phase(), Phase::AwaitingDownstream);
    }

    #[test]
    fn second_begin_is_refused() {
        let (registry, _) = registry();
        let first = registry.begin("alice").unwrap();

        let err = registry.begin("alice").unwrap_err();
        assert_eq!(err.code, RejectionCode::AlreadyActive);
        assert_eq!(registry.get("alice").unwrap().token, first.token);

        // Other users are unaffected.
        assert!(registry.begin("bob").is_ok());
        assert_eq!(registry.active_count(), 2);
    }

    #[test]
    fn lookup_failures() {
        let (registry, _) = registry();
        assert_eq!(
            registry
                .lookup("alice", &SessionId::new("x"))
                .unwrap_err()
                .code,
            RejectionCode::NoActiveSession
        );

        registry.begin("alice").unwrap();
        assert_eq!(
            registry
                .lookup("alice", &SessionId::new("x"))
                .unwrap_err()
                .code,
            RejectionCode::SessionLocked
        );
    }

    #[test]
    fn concurrent_begin_admits_exactly_one() {
        let (registry, _) = registry();
        let registry = Arc::new(registry);
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    registry.begin("alice")
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let admitted = results.iter().filter(|r| r.is_ok()).count();
        let refused = results
            .iter()
            .filter(|r| matches!(r, Err(rej) if rej.code == RejectionCode::AlreadyActive))
            .count();

        assert_eq!(admitted, 1);
        assert_eq!(refused, 7);
        assert_eq!(registry.active_count(), 1);
    }

    #[test]
    fn kill_is_idempotent() {
        let (registry, states) = registry();
        let record = registry.begin("alice").unwrap();
        let machine = states.get(&record.token).unwrap();

        assert!(registry.kill("alice"));
        assert!(!registry.kill("alice"));
        assert_eq!(machine.lock().phase(), Phase::Killed);
        assert!(states.is_empty());

        assert!(registry.begin("alice").is_ok());
    }

    #[test]
    fn end_allows_new_session() {
        let (registry, states) = registry();
        let record = registry.begin("alice").unwrap();
        let machine = states.get(&record.token).unwrap();

        assert!(registry.end("alice"));
        assert_eq!(machine.lock().phase(), Phase::Idle);

        let next = registry.begin("alice").unwrap();
        assert_ne!(next.token, record.token);
    }

    #[test]
    fn end_session_checks_token() {
        let (registry, _) = registry();
        registry.begin("alice").unwrap();
        assert!(!registry.end_session("alice", &SessionId::new("stale")));
        assert_eq!(registry.active_count(), 1);
    }

    #[test]
    fn resolve_heals_missing_state() {
        let (registry, states) = registry();
        let record = registry.begin("alice").unwrap();
        states.evict(&record.token);

        let err = registry.resolve("alice", Some(&record.token)).unwrap_err();
        assert_eq!(err.code, RejectionCode::SessionLost);
        assert!(registry.get("alice").is_none());
        assert!(registry.begin("alice").is_ok());
    }

    #[test]
    fn expire_respects_activity() {
        let (registry, states) = registry();
        let record = registry.begin("alice").unwrap();
        let timeout = Duration::from_secs(60);

        assert!(registry.idle_sessions(Instant::now(), timeout).is_empty());
        assert_eq!(
            registry.expire("alice", &record.token, Instant::now(), timeout),
            None
        );

        let later = Instant::now() + Duration::from_secs(120);
        assert_eq!(registry.idle_sessions(later, timeout).len(), 1);
        assert_eq!(
            registry.expire("alice", &record.token, later, timeout),
            Some(Expiry::Ended)
        );
        assert!(states.is_empty());

        let record = registry.begin("bob").unwrap();
        states.evict(&record.token);
        assert_eq!(
            registry.expire("bob", &record.token, later + timeout, timeout),
            Some(Expiry::Killed)
        );
    }
}
