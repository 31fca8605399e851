//! # drivesync Sync Server
//!
//! Sync-session gatekeeper for drivesync.
//!
//! This crate provides:
//! - A session registry admitting at most one sync session per user
//! - A per-session state machine enforcing the handshake phase order
//! - The validation gate every in-session route passes through
//! - The canonical per-user tree clients pull from and push to
//! - An idle reaper bounding session lifetime
//! - Authentication (plain identities or HMAC-SHA256 tokens)
//!
//! # Architecture
//!
//! The registry maps a user identity to the token of its active session.
//! The session's state object (its [`SyncStateMachine`]) lives in a
//! [`SessionStateStore`] keyed by that token. When the two disagree, the
//! gate kills the session so the registry never points at vanished state.
//!
//! # Authentication
//!
//! ```rust
//! use drivesync_server::{AuthConfig, ServerConfig, TokenAuthenticator};
//!
//! let secret = b"my-secure-secret".to_vec();
//! let config = ServerConfig::default().with_auth(secret.clone());
//!
//! let tokens = TokenAuthenticator::new(AuthConfig::new(secret));
//! let token = tokens.create_token("alice").unwrap();
//! assert_eq!(tokens.validate_token(&token).unwrap(), "alice");
//! ```
//!
//! # Protocol
//!
//! 1. `begin` admits a session (`AWAITING_DOWNSTREAM`)
//! 2. Client pulls remote changes (`DOWNSTREAM_ACTIVE`)
//! 3. Client acknowledges applying them (`AWAITING_UPSTREAM`)
//! 4. Client pushes its dirty set (`UPSTREAM_ACTIVE` or `CONFLICT`)
//! 5. `end` finishes the cycle (`SYNCED`) and releases the session

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod auth;
mod config;
mod error;
mod gate;
mod handler;
mod machine;
mod reaper;
mod registry;
mod server;
mod state_store;
mod store;

pub use auth::{AuthConfig, Authenticator, PlainAuthenticator, TokenAuthenticator};
pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use gate::{RequestContext, RouteRule, ValidationGate};
pub use handler::{HandlerContext, RequestHandler, DOWNSTREAM, DOWNSTREAM_ACK, END, UPSTREAM};
pub use machine::SyncStateMachine;
pub use reaper::{ReapReport, SessionReaper};
pub use registry::{Expiry, SessionRecord, SessionRegistry};
pub use server::SyncServer;
pub use state_store::{MemoryStateStore, SessionStateStore, SharedMachine};
pub use store::RemoteStore;
