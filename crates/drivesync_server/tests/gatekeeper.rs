//! Gatekeeper tests across the public server surface.

use drivesync_protocol::{
    BeginRequest, FileChange, Phase, PullRequest, PushRequest, RejectionCode, SessionId,
    SyncMessage, SyncReply,
};
use drivesync_server::{
    MemoryStateStore, RequestContext, ServerConfig, SessionStateStore, SyncServer,
};
use std::sync::{Arc, Barrier};
use std::thread;

fn begin(server: &SyncServer, user: &str) -> Result<SessionId, RejectionCode> {
    let reply = server
        .handle(
            &RequestContext::user(user),
            SyncMessage::BeginRequest(BeginRequest::default()),
        )
        .unwrap();
    match reply {
        SyncReply::Ok(SyncMessage::BeginResponse(response)) => Ok(response.session_id),
        SyncReply::Rejected(rejection) => Err(rejection.code),
        other => panic!("unexpected reply {other:?}"),
    }
}

fn step(server: &SyncServer, ctx: &RequestContext, message: SyncMessage) -> SyncReply {
    server.handle(ctx, message).unwrap()
}

fn code(reply: SyncReply) -> RejectionCode {
    reply.into_result().unwrap_err().code
}

#[test]
fn concurrent_begin_yields_one_session() {
    let server = Arc::new(SyncServer::new(ServerConfig::default()));
    let barrier = Arc::new(Barrier::new(16));

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let server = Arc::clone(&server);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                begin(&server, "alice")
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|code| *code == RejectionCode::AlreadyActive));
    assert_eq!(server.registry().active_count(), 1);
}

#[test]
fn second_client_is_locked_out() {
    let server = SyncServer::new(ServerConfig::default());
    let token = begin(&server, "alice").unwrap();
    let owner = RequestContext::user("alice").with_session(token.clone());

    // A second client for the same user with its own correlation id.
    let intruder = RequestContext::user("alice").with_session(SessionId::new("laptop-2"));
    let reply = step(
        &server,
        &intruder,
        SyncMessage::PullRequest(PullRequest::new(0)),
    );
    let rejection = reply.into_result().unwrap_err();
    assert_eq!(rejection.code, RejectionCode::SessionLocked);
    assert_eq!(rejection.status(), 423);

    // The active session is unaffected and continues from where it was.
    assert_eq!(server.registry().get("alice").unwrap().token, token);
    assert!(step(&server, &owner, SyncMessage::PullRequest(PullRequest::new(0)))
        .into_result()
        .is_ok());
}

#[test]
fn out_of_order_step_does_not_advance() {
    let states = Arc::new(MemoryStateStore::new());
    let server = SyncServer::with_state_store(ServerConfig::default(), states.clone());
    let token = begin(&server, "alice").unwrap();
    let ctx = RequestContext::user("alice").with_session(token.clone());

    let reply = step(&server, &ctx, SyncMessage::DownstreamAck);
    let rejection = reply.into_result().unwrap_err();
    assert_eq!(rejection.code, RejectionCode::OutOfOrder);
    assert!(rejection.message.contains("/sync/downstream/ack"));

    let machine = states.get(&token).unwrap();
    assert_eq!(machine.lock().phase(), Phase::AwaitingDownstream);
}

#[test]
fn lost_state_heals_registry() {
    let states = Arc::new(MemoryStateStore::new());
    let server = SyncServer::with_state_store(ServerConfig::default(), states.clone());
    let token = begin(&server, "alice").unwrap();
    let ctx = RequestContext::user("alice").with_session(token.clone());

    assert!(states.evict(&token));

    let reply = step(&server, &ctx, SyncMessage::PullRequest(PullRequest::new(0)));
    let rejection = reply.into_result().unwrap_err();
    assert_eq!(rejection.code, RejectionCode::SessionLost);
    assert_eq!(rejection.status(), 500);

    // The registry no longer points at the vanished state.
    assert!(server.registry().get("alice").is_none());
    assert_eq!(
        code(step(&server, &ctx, SyncMessage::EndRequest)),
        RejectionCode::NoActiveSession
    );

    let fresh = begin(&server, "alice").unwrap();
    assert_ne!(fresh, token);
}

#[test]
fn concurrent_steps_on_one_session_are_serialized() {
    let server = Arc::new(SyncServer::new(ServerConfig::default()));
    let token = begin(&server, "alice").unwrap();
    let ctx = RequestContext::user("alice").with_session(token);
    let barrier = Arc::new(Barrier::new(8));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let server = Arc::clone(&server);
            let ctx = ctx.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                server
                    .handle(&ctx, SyncMessage::PullRequest(PullRequest::new(0)))
                    .unwrap()
            })
        })
        .collect();

    let replies: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let accepted = replies
        .iter()
        .filter(|reply| matches!(reply, SyncReply::Ok(_)))
        .count();
    assert_eq!(accepted, 1);
    assert!(replies
        .into_iter()
        .filter_map(|reply| reply.into_result().err())
        .all(|rejection| rejection.code == RejectionCode::OutOfOrder));
}

#[test]
fn pushes_from_two_users_do_not_interfere() {
    let server = SyncServer::new(ServerConfig::default());

    for user in ["alice", "bob"] {
        let token = begin(&server, user).unwrap();
        let ctx = RequestContext::user(user).with_session(token);
        step(&server, &ctx, SyncMessage::PullRequest(PullRequest::new(0)));
        step(&server, &ctx, SyncMessage::DownstreamAck);
        let reply = step(
            &server,
            &ctx,
            SyncMessage::PushRequest(PushRequest::new(vec![FileChange::write(
                "/notes.txt",
                user.as_bytes().to_vec(),
                0,
            )])),
        );
        assert!(reply.into_result().is_ok());
    }

    assert_eq!(
        server.remote().read("alice", "/notes.txt"),
        Some(b"alice".to_vec())
    );
    assert_eq!(server.remote().read("bob", "/notes.txt"), Some(b"bob".to_vec()));
    assert_eq!(server.registry().active_count(), 2);
}
