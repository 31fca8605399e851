//! Request handlers for sync routes.

use crate::config::ServerConfig;
use crate::error::ServerResult;
use crate::gate::{RequestContext, RouteRule, ValidationGate};
use crate::registry::SessionRegistry;
use crate::state_store::SessionStateStore;
use crate::store::RemoteStore;
use drivesync_protocol::{
    BeginRequest, BeginResponse, Phase, PullRequest, PullResponse, PushRequest, PushResponse,
    Rejection, ROUTE_DOWNSTREAM, ROUTE_DOWNSTREAM_ACK, ROUTE_END, ROUTE_UPSTREAM,
};
use std::sync::Arc;
use tracing::info;

/// `AWAITING_DOWNSTREAM → DOWNSTREAM_ACTIVE`
pub const DOWNSTREAM: RouteRule = RouteRule {
    route: ROUTE_DOWNSTREAM,
    expected: Some(Phase::AwaitingDownstream),
    next: Phase::DownstreamActive,
};

/// `DOWNSTREAM_ACTIVE → AWAITING_UPSTREAM`
pub const DOWNSTREAM_ACK: RouteRule = RouteRule {
    route: ROUTE_DOWNSTREAM_ACK,
    expected: Some(Phase::DownstreamActive),
    next: Phase::AwaitingUpstream,
};

/// `AWAITING_UPSTREAM → UPSTREAM_ACTIVE`, or `CONFLICT` on stale bases.
pub const UPSTREAM: RouteRule = RouteRule {
    route: ROUTE_UPSTREAM,
    expected: Some(Phase::AwaitingUpstream),
    next: Phase::UpstreamActive,
};

/// `* → SYNCED`, then the registry ends the session.
pub const END: RouteRule = RouteRule {
    route: ROUTE_END,
    expected: None,
    next: Phase::Synced,
};

/// Context for request handling.
pub struct HandlerContext {
    /// Server configuration.
    pub config: ServerConfig,
    /// Active sessions.
    pub registry: SessionRegistry,
    /// Canonical user trees.
    pub remote: RemoteStore,
}

impl HandlerContext {
    /// Creates a new handler context.
    pub fn new(config: ServerConfig, states: Arc<dyn SessionStateStore>) -> Self {
        Self {
            config,
            registry: SessionRegistry::new(states),
            remote: RemoteStore::new(),
        }
    }
}

/// Handler for sync requests.
pub struct RequestHandler {
    context: Arc<HandlerContext>,
}

impl RequestHandler {
    /// Creates a new request handler.
    pub fn new(context: Arc<HandlerContext>) -> Self {
        Self { context }
    }

    fn gate(&self) -> ValidationGate<'_> {
        ValidationGate::new(&self.context.registry)
    }

    /// Opens a session. Only the identity is checked.
    pub fn handle_begin(
        &self,
        ctx: &RequestContext,
        request: BeginRequest,
    ) -> ServerResult<BeginResponse> {
        let identity = ctx
            .identity
            .as_deref()
            .ok_or_else(Rejection::unauthenticated)?;
        let record = self.context.registry.begin(identity)?;

        if let Some(client) = request.client {
            info!(user = identity, client = %client, "client began sync");
        }
        Ok(BeginResponse {
            session_id: record.token,
            phase: Phase::AwaitingDownstream,
        })
    }

    /// Returns remote changes newer than the client's cursor.
    pub fn handle_pull(
        &self,
        ctx: &RequestContext,
        request: PullRequest,
    ) -> ServerResult<PullResponse> {
        self.gate().admit(ctx, DOWNSTREAM, |record, _| {
            Ok(self
                .context
                .remote
                .changes_since(&record.owner, request.cursor))
        })
    }

    /// Confirms the client applied the downstream changes.
    pub fn handle_downstream_ack(&self, ctx: &RequestContext) -> ServerResult<Phase> {
        self.gate().admit(ctx, DOWNSTREAM_ACK, |_, _| Ok(()))?;
        Ok(DOWNSTREAM_ACK.next)
    }

    /// Stores the pushed dirty set. Stale changes route the session to
    /// `CONFLICT`.
    pub fn handle_push(
        &self,
        ctx: &RequestContext,
        request: PushRequest,
    ) -> ServerResult<PushResponse> {
        self.gate().admit(ctx, UPSTREAM, |record, machine| {
            let response = self.context.remote.apply(&record.owner, &request.changes)?;
            if !response.is_clean() {
                machine.enter_conflict(UPSTREAM.route)?;
            }
            info!(
                user = %record.owner,
                acknowledged = response.acknowledged.len(),
                conflicts = response.conflicts.len(),
                "push stored"
            );
            Ok(response)
        })
    }

    /// Finishes the cycle and releases the user's session.
    pub fn handle_end(&self, ctx: &RequestContext) -> ServerResult<Phase> {
        let record = self.gate().admit(ctx, END, |record, _| Ok(record.clone()))?;
        self.context
            .registry
            .end_session(&record.owner, &record.token);
        Ok(END.next)
    }
}
