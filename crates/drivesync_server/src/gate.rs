//! The validation gate every in-session route passes through.
//!
//! Checks run in a fixed order and the first failure short-circuits:
//!
//! 1. identity present, else `UNAUTHENTICATED`
//! 2. session exists for the identity, else `NO_ACTIVE_SESSION`
//! 3. session id present, else `MISSING_SESSION_ID`
//! 4. session id matches the active token, else `SESSION_LOCKED`
//! 5. session state retrievable, else the session is killed and the
//!    request fails with `SESSION_LOST`
//! 6. expected phase matches, else `OUT_OF_ORDER`
//!
//! The session machine stays locked from check 6 until the route handler
//! returns and the phase has advanced.

use crate::error::ServerResult;
use crate::machine::SyncStateMachine;
use crate::registry::{SessionRecord, SessionRegistry};
use drivesync_protocol::{Phase, Rejection, SessionId};

/// Caller facts the gate checks, resolved from the transport envelope.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    /// Authenticated user identity.
    pub identity: Option<String>,
    /// Session correlation id sent with the request.
    pub session_id: Option<SessionId>,
}

impl RequestContext {
    /// Creates a context.
    pub fn new(identity: Option<String>, session_id: Option<SessionId>) -> Self {
        Self {
            identity,
            session_id,
        }
    }

    /// A context for an authenticated user without a session id.
    pub fn user(identity: impl Into<String>) -> Self {
        Self::new(Some(identity.into()), None)
    }

    /// Attaches a session id.
    pub fn with_session(mut self, session_id: SessionId) -> Self {
        self.session_id = Some(session_id);
        self
    }
}

/// Ordering rule of one route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteRule {
    /// Route name, used in out-of-order messages.
    pub route: &'static str,
    /// Phase the session must be in, `None` for any live phase.
    pub expected: Option<Phase>,
    /// Phase after the handler succeeds.
    pub next: Phase,
}

/// Ordered admission checks in front of route handlers.
pub struct ValidationGate<'a> {
    registry: &'a SessionRegistry,
}

impl<'a> ValidationGate<'a> {
    /// Creates a gate over a registry.
    pub fn new(registry: &'a SessionRegistry) -> Self {
        Self { registry }
    }

    /// Runs all checks, then `handler`, then advances the phase to
    /// `rule.next`.
    ///
    /// The handler may move the session itself (for instance to
    /// `Conflict`), in which case the rule's next phase is not applied. A
    /// handler error leaves the phase untouched.
    pub fn admit<T, F>(&self, ctx: &RequestContext, rule: RouteRule, handler: F) -> ServerResult<T>
    where
        F: FnOnce(&SessionRecord, &mut SyncStateMachine) -> ServerResult<T>,
    {
        let identity = ctx
            .identity
            .as_deref()
            .ok_or_else(Rejection::unauthenticated)?;

        let (record, machine) = self.registry.resolve(identity, ctx.session_id.as_ref())?;

        let mut machine = machine.lock();
        machine.validate(rule.route, rule.expected)?;

        let before = machine.phase();
        let output = handler(&record, &mut machine)?;
        if machine.phase() == before {
            machine.validate_and_advance(rule.route, rule.expected, rule.next)?;
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ServerError;
    use crate::state_store::{MemoryStateStore, SessionStateStore};
    use drivesync_protocol::RejectionCode;
    use std::sync::Arc;

    const PULL: RouteRule = RouteRule {
        route: "/sync/downstream",
        expected: Some(Phase::AwaitingDownstream),
        next: Phase::DownstreamActive,
    };

    fn setup() -> (SessionRegistry, Arc<MemoryStateStore>) {
        let states = Arc::new(MemoryStateStore::new());
        (SessionRegistry::new(states.clone()), states)
    }

    fn code<T: std::fmt::Debug>(result: ServerResult<T>) -> RejectionCode {
        match result {
            Err(ServerError::Rejected(rejection)) => rejection.code,
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    fn noop(_: &SessionRecord, _: &mut SyncStateMachine) -> ServerResult<()> {
        Ok(())
    }

    #[test]
    fn checks_run_in_order() {
        let (registry, states) = setup();
        let gate = ValidationGate::new(&registry);

        // 1. identity
        assert_eq!(
            code(gate.admit(&RequestContext::default(), PULL, noop)),
            RejectionCode::Unauthenticated
        );
        // 1 wins over everything else, even with a bogus session id.
        let anonymous = RequestContext::new(None, Some(SessionId::new("x")));
        assert_eq!(
            code(gate.admit(&anonymous, PULL, noop)),
            RejectionCode::Unauthenticated
        );

        // 2. no session
        assert_eq!(
            code(gate.admit(&RequestContext::user("alice"), PULL, noop)),
            RejectionCode::NoActiveSession
        );

        let record = registry.begin("alice").unwrap();

        // 3. missing id
        assert_eq!(
            code(gate.admit(&RequestContext::user("alice"), PULL, noop)),
            RejectionCode::MissingSessionId
        );

        // 4. wrong id
        let intruder = RequestContext::user("alice").with_session(SessionId::new("other"));
        assert_eq!(
            code(gate.admit(&intruder, PULL, noop)),
            RejectionCode::SessionLocked
        );

        // 6. wrong phase
        let ctx = RequestContext::user("alice").with_session(record.token.clone());
        let upstream = RouteRule {
            route: "/sync/upstream",
            expected: Some(Phase::AwaitingUpstream),
            next: Phase::UpstreamActive,
        };
        assert_eq!(
            code(gate.admit(&ctx, upstream, noop)),
            RejectionCode::OutOfOrder
        );

        // 5. state lost, checked before phase
        states.evict(&record.token);
        assert_eq!(
            code(gate.admit(&ctx, upstream, noop)),
            RejectionCode::SessionLost
        );
        assert!(registry.get("alice").is_none());
    }

    #[test]
    fn admitted_request_advances() {
        let (registry, states) = setup();
        let gate = ValidationGate::new(&registry);
        let record = registry.begin("alice").unwrap();
        let ctx = RequestContext::user("alice").with_session(record.token.clone());

        let seen = gate
            .admit(&ctx, PULL, |record, machine| {
                Ok((record.owner.clone(), machine.phase()))
            })
            .unwrap();

        assert_eq!(seen, ("alice".to_string(), Phase::AwaitingDownstream));
        let machine = states.get(&record.token).unwrap();
        assert_eq!(machine.lock().phase(), Phase::DownstreamActive);
    }

    #[test]
    fn out_of_order_leaves_session_untouched() {
        let (registry, states) = setup();
        let gate = ValidationGate::new(&registry);
        let record = registry.begin("alice").unwrap();
        let ctx = RequestContext::user("alice").with_session(record.token.clone());

        gate.admit(&ctx, PULL, noop).unwrap();
        // Replaying the pull is out of order now.
        assert_eq!(code(gate.admit(&ctx, PULL, noop)), RejectionCode::OutOfOrder);

        let machine = states.get(&record.token).unwrap();
        assert_eq!(machine.lock().phase(), Phase::DownstreamActive);
        assert_eq!(registry.get("alice").unwrap().token, record.token);
    }

    #[test]
    fn handler_error_keeps_phase() {
        let (registry, states) = setup();
        let gate = ValidationGate::new(&registry);
        let record = registry.begin("alice").unwrap();
        let ctx = RequestContext::user("alice").with_session(record.token.clone());

        let result: ServerResult<()> = gate.admit(&ctx, PULL, |_, _| {
            Err(ServerError::InvalidRequest("bad cursor".into()))
        });
        assert!(matches!(result, Err(ServerError::InvalidRequest(_))));

        let machine = states.get(&record.token).unwrap();
        assert_eq!(machine.lock().phase(), Phase::AwaitingDownstream);
    }

    #[test]
    fn handler_may_divert_to_conflict() {
        let (registry, states) = setup();
        let gate = ValidationGate::new(&registry);
        let record = registry.begin("alice").unwrap();
        let ctx = RequestContext::user("alice").with_session(record.token.clone());

        gate.admit(&ctx, PULL, |_, machine| {
            machine.enter_conflict(PULL.route)?;
            Ok(())
        })
        .unwrap();

        let machine = states.get(&record.token).unwrap();
        assert_eq!(machine.lock().phase(), Phase::Conflict);
    }
}
