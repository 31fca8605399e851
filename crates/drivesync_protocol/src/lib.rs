//! # drivesync Protocol
//!
//! Sync handshake types and CBOR codecs for drivesync.
//!
//! This crate provides:
//! - [`Phase`], the ordered handshake phases a session moves through
//! - [`RejectionCode`] and [`Rejection`], the typed refusals of the gatekeeper
//! - Protocol messages (begin, downstream pull, upstream push, end)
//! - CBOR encoding/decoding of envelopes and replies
//! - Node path normalisation shared by client and server
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod messages;
mod path;
mod phase;
mod rejection;

pub use error::{ProtocolError, ProtocolResult};
pub use messages::{
    decode, encode, BeginRequest, BeginResponse, ChangeKind, FileChange, PullRequest,
    PullResponse, PushRequest, PushResponse, SessionId, SyncEnvelope, SyncMessage, SyncReply,
    ROUTE_BEGIN, ROUTE_DOWNSTREAM, ROUTE_DOWNSTREAM_ACK, ROUTE_END, ROUTE_UPSTREAM,
};
pub use path::normalize_path;
pub use phase::Phase;
pub use rejection::{Rejection, RejectionCode};
