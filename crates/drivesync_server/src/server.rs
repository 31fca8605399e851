//! Main sync server.

use crate::auth::{AuthConfig, Authenticator, PlainAuthenticator, TokenAuthenticator};
use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::gate::RequestContext;
use crate::handler::{HandlerContext, RequestHandler};
use crate::reaper::SessionReaper;
use crate::registry::SessionRegistry;
use crate::state_store::{MemoryStateStore, SessionStateStore};
use crate::store::RemoteStore;
use drivesync_protocol::{decode, encode, SyncEnvelope, SyncMessage, SyncReply};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::debug;

/// The sync server.
///
/// Resolves request credentials to an identity, runs every in-session step
/// through the validation gate and answers with a [`SyncReply`]. Gate
/// refusals are replies, not errors: only malformed requests surface as
/// [`ServerError`].
///
/// # Example
///
/// ```
/// use drivesync_protocol::{BeginRequest, SyncMessage};
/// use drivesync_server::{RequestContext, ServerConfig, SyncServer};
///
/// let server = SyncServer::new(ServerConfig::default());
/// let reply = server
///     .handle(
///         &RequestContext::user("alice"),
///         SyncMessage::BeginRequest(BeginRequest::default()),
///     )
///     .unwrap();
/// assert!(reply.into_result().is_ok());
/// ```
pub struct SyncServer {
    handler: RequestHandler,
    context: Arc<HandlerContext>,
    authenticator: Box<dyn Authenticator>,
}

impl SyncServer {
    /// Creates a sync server with in-memory session state.
    pub fn new(config: ServerConfig) -> Self {
        Self::with_state_store(config, Arc::new(MemoryStateStore::new()))
    }

    /// Creates a sync server over an existing session state store.
    pub fn with_state_store(config: ServerConfig, states: Arc<dyn SessionStateStore>) -> Self {
        let authenticator: Box<dyn Authenticator> = match (&config.auth_secret, config.require_auth)
        {
            (Some(secret), true) => Box::new(TokenAuthenticator::new(
                AuthConfig::new(secret.clone()).with_expiry(config.token_expiry),
            )),
            _ => Box::new(PlainAuthenticator),
        };

        let context = Arc::new(HandlerContext::new(config, states));
        let handler = RequestHandler::new(Arc::clone(&context));

        Self {
            handler,
            context,
            authenticator,
        }
    }

    /// Handles a message for an already-resolved caller.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRequest` for response messages and malformed pushes.
    pub fn handle(&self, ctx: &RequestContext, message: SyncMessage) -> ServerResult<SyncReply> {
        let route = message.route();
        let result = match message {
            SyncMessage::BeginRequest(req) => self
                .handler
                .handle_begin(ctx, req)
                .map(SyncMessage::BeginResponse),
            SyncMessage::PullRequest(req) => self
                .handler
                .handle_pull(ctx, req)
                .map(SyncMessage::PullResponse),
            SyncMessage::DownstreamAck => self
                .handler
                .handle_downstream_ack(ctx)
                .map(SyncMessage::PhaseReport),
            SyncMessage::PushRequest(req) => self
                .handler
                .handle_push(ctx, req)
                .map(SyncMessage::PushResponse),
            SyncMessage::EndRequest => self
                .handler
                .handle_end(ctx)
                .map(SyncMessage::PhaseReport),
            other => Err(ServerError::InvalidRequest(format!(
                "unexpected message type {}",
                other.type_code()
            ))),
        };

        match result {
            Ok(message) => Ok(SyncReply::Ok(message)),
            Err(ServerError::Rejected(rejection)) => {
                debug!(
                    user = ctx.identity.as_deref().unwrap_or("-"),
                    route = route.unwrap_or("-"),
                    code = %rejection.code,
                    "request rejected"
                );
                Ok(SyncReply::Rejected(rejection))
            }
            Err(err) => Err(err),
        }
    }

    /// Handles an envelope: resolves credentials, then dispatches.
    ///
    /// Missing or invalid credentials leave the identity unset, so the
    /// request is refused as `UNAUTHENTICATED` by the first check.
    pub fn handle_envelope(&self, envelope: SyncEnvelope) -> ServerResult<SyncReply> {
        let identity = match envelope.credentials.as_deref() {
            Some(credentials) => match self.authenticator.authenticate(credentials) {
                Ok(identity) => Some(identity),
                Err(err) => {
                    debug!(error = %err, "credentials refused");
                    None
                }
            },
            None => None,
        };

        let ctx = RequestContext::new(identity, envelope.session_id);
        self.handle(&ctx, envelope.message)
    }

    /// Handles a CBOR-encoded envelope and returns the CBOR-encoded reply.
    pub fn handle_bytes(&self, request: &[u8]) -> ServerResult<Vec<u8>> {
        let envelope: SyncEnvelope = decode(request)?;
        let reply = self.handle_envelope(envelope)?;
        Ok(encode(&reply)?)
    }

    /// The session registry.
    pub fn registry(&self) -> &SessionRegistry {
        &self.context.registry
    }

    /// The canonical user trees.
    pub fn remote(&self) -> &RemoteStore {
        &self.context.remote
    }

    /// Creates an idle reaper for this server.
    pub fn reaper(&self) -> SessionReaper {
        SessionReaper::new(Arc::clone(&self.context))
    }

    /// Starts the idle reaper at the configured interval.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn_reaper(&self) -> JoinHandle<()> {
        self.reaper().spawn(self.context.config.reaper_interval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drivesync_protocol::{
        BeginRequest, FileChange, Phase, PullRequest, PushRequest, RejectionCode, SessionId,
    };

    fn ok(reply: SyncReply) -> SyncMessage {
        reply.into_result().unwrap()
    }

    #[test]
    fn full_sync_flow() {
        let server = SyncServer::new(ServerConfig::default());
        let user = RequestContext::user("alice");

        let SyncMessage::BeginResponse(begin) = ok(server
            .handle(&user, SyncMessage::BeginRequest(BeginRequest::default()))
            .unwrap())
        else {
            panic!("expected begin response");
        };
        let ctx = user.with_session(begin.session_id);

        ok(server
            .handle(&ctx, SyncMessage::PullRequest(PullRequest::new(0)))
            .unwrap());
        ok(server.handle(&ctx, SyncMessage::DownstreamAck).unwrap());
        let push = ok(server
            .handle(
                &ctx,
                SyncMessage::PushRequest(PushRequest::new(vec![FileChange::write(
                    "/a.txt",
                    b"a".to_vec(),
                    0,
                )])),
            )
            .unwrap());
        assert!(matches!(push, SyncMessage::PushResponse(r) if r.is_clean()));

        let end = ok(server.handle(&ctx, SyncMessage::EndRequest).unwrap());
        assert_eq!(end, SyncMessage::PhaseReport(Phase::Synced));
        assert_eq!(server.remote().read("alice", "/a.txt"), Some(b"a".to_vec()));
        assert_eq!(server.registry().active_count(), 0);
    }

    #[test]
    fn rejections_are_replies() {
        let server = SyncServer::new(ServerConfig::default());
        let reply = server
            .handle(&RequestContext::user("alice"), SyncMessage::EndRequest)
            .unwrap();
        let rejection = reply.into_result().unwrap_err();
        assert_eq!(rejection.code, RejectionCode::NoActiveSession);
    }

    #[test]
    fn response_message_is_invalid() {
        let server = SyncServer::new(ServerConfig::default());
        let result = server.handle(
            &RequestContext::user("alice"),
            SyncMessage::PhaseReport(Phase::Idle),
        );
        assert!(matches!(result, Err(ServerError::InvalidRequest(_))));
    }

    #[test]
    fn envelope_bytes_roundtrip() {
        let server = SyncServer::new(ServerConfig::default());
        let envelope = SyncEnvelope::new(
            Some(b"alice".to_vec()),
            None,
            SyncMessage::BeginRequest(BeginRequest::default()),
        );

        let reply: SyncReply = decode(&server.handle_bytes(&encode(&envelope).unwrap()).unwrap())
            .unwrap();
        assert!(matches!(reply, SyncReply::Ok(SyncMessage::BeginResponse(_))));

        assert!(matches!(
            server.handle_bytes(&[0xff, 0x00]),
            Err(ServerError::Protocol(_))
        ));
    }

    #[test]
    fn token_auth_resolves_identity() {
        let secret = b"server-secret".to_vec();
        let server = SyncServer::new(ServerConfig::default().with_auth(secret.clone()));
        let token = TokenAuthenticator::new(AuthConfig::new(secret))
            .create_token("alice")
            .unwrap();

        let signed = SyncEnvelope::new(
            Some(token),
            None,
            SyncMessage::BeginRequest(BeginRequest::default()),
        );
        assert!(server.handle_envelope(signed).unwrap().into_result().is_ok());
        assert!(server.registry().get("alice").is_some());

        // Plain identities are not accepted once auth is on.
        let plain = SyncEnvelope::new(
            Some(b"bob".to_vec()),
            Some(SessionId::new("x")),
            SyncMessage::EndRequest,
        );
        let rejection = server
            .handle_envelope(plain)
            .unwrap()
            .into_result()
            .unwrap_err();
        assert_eq!(rejection.code, RejectionCode::Unauthenticated);
    }
}
