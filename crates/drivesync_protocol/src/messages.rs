//! Protocol messages for sync.
//!
//! Every message is carried in a [`SyncEnvelope`] together with the
//! caller's credentials and the session correlation id. The server answers
//! with a [`SyncReply`].

use crate::error::{ProtocolError, ProtocolResult};
use crate::phase::Phase;
use crate::rejection::Rejection;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Route for session admission.
pub const ROUTE_BEGIN: &str = "/sync/begin";
/// Route for the downstream pull.
pub const ROUTE_DOWNSTREAM: &str = "/sync/downstream";
/// Route confirming the downstream changes were applied.
pub const ROUTE_DOWNSTREAM_ACK: &str = "/sync/downstream/ack";
/// Route for the upstream push.
pub const ROUTE_UPSTREAM: &str = "/sync/upstream";
/// Route ending the session.
pub const ROUTE_END: &str = "/sync/end";

/// Session correlation id ("syncId" on the wire).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Wraps an existing id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// What happened to a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeKind {
    /// The node now holds these bytes.
    Write(Vec<u8>),
    /// The node was removed.
    Delete,
}

/// A change to one filesystem node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChange {
    /// Absolute node path.
    pub path: String,
    /// The change.
    pub kind: ChangeKind,
    /// Server revision the change was made against (upstream) or the
    /// revision the server assigned to it (downstream).
    pub revision: u64,
}

impl FileChange {
    /// Creates a write change.
    pub fn write(path: impl Into<String>, content: Vec<u8>, revision: u64) -> Self {
        Self {
            path: path.into(),
            kind: ChangeKind::Write(content),
            revision,
        }
    }

    /// Creates a delete change.
    pub fn delete(path: impl Into<String>, revision: u64) -> Self {
        Self {
            path: path.into(),
            kind: ChangeKind::Delete,
            revision,
        }
    }

    /// Returns true for deletions.
    pub fn is_delete(&self) -> bool {
        matches!(self.kind, ChangeKind::Delete)
    }
}

/// A sync protocol message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncMessage {
    /// Opens a session.
    BeginRequest(BeginRequest),
    /// Session admitted.
    BeginResponse(BeginResponse),
    /// Requests remote changes.
    PullRequest(PullRequest),
    /// Remote changes.
    PullResponse(PullResponse),
    /// Confirms downstream changes were applied locally.
    DownstreamAck,
    /// Pushes the dirty set.
    PushRequest(PushRequest),
    /// Push acknowledgment.
    PushResponse(PushResponse),
    /// Ends the session.
    EndRequest,
    /// Phase report returned by steps without a payload.
    PhaseReport(Phase),
}

impl SyncMessage {
    /// Returns the message type code.
    pub fn type_code(&self) -> u8 {
        match self {
            SyncMessage::BeginRequest(_) => 1,
            SyncMessage::BeginResponse(_) => 2,
            SyncMessage::PullRequest(_) => 3,
            SyncMessage::PullResponse(_) => 4,
            SyncMessage::DownstreamAck => 5,
            SyncMessage::PushRequest(_) => 6,
            SyncMessage::PushResponse(_) => 7,
            SyncMessage::EndRequest => 8,
            SyncMessage::PhaseReport(_) => 9,
        }
    }

    /// Route a request message is posted to. `None` for responses.
    pub fn route(&self) -> Option<&'static str> {
        match self {
            SyncMessage::BeginRequest(_) => Some(ROUTE_BEGIN),
            SyncMessage::PullRequest(_) => Some(ROUTE_DOWNSTREAM),
            SyncMessage::DownstreamAck => Some(ROUTE_DOWNSTREAM_ACK),
            SyncMessage::PushRequest(_) => Some(ROUTE_UPSTREAM),
            SyncMessage::EndRequest => Some(ROUTE_END),
            _ => None,
        }
    }
}

/// Opens a sync session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeginRequest {
    /// Free-form client label, for logs.
    pub client: Option<String>,
}

/// Session admitted by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeginResponse {
    /// Token correlating every later request with this session.
    pub session_id: SessionId,
    /// Phase the session starts in.
    pub phase: Phase,
}

/// Downstream pull.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    /// Last server revision the client has applied.
    pub cursor: u64,
}

impl PullRequest {
    /// Creates a pull request.
    pub fn new(cursor: u64) -> Self {
        Self { cursor }
    }
}

/// Remote changes newer than the pull cursor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullResponse {
    /// Changes in revision order.
    pub changes: Vec<FileChange>,
    /// Cursor to use for the next pull.
    pub new_cursor: u64,
}

impl PullResponse {
    /// Creates a pull response.
    pub fn new(changes: Vec<FileChange>, new_cursor: u64) -> Self {
        Self {
            changes,
            new_cursor,
        }
    }
}

/// Upstream push of a dirty-set snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushRequest {
    /// Changes, one per dirty path.
    pub changes: Vec<FileChange>,
}

impl PushRequest {
    /// Creates a push request.
    pub fn new(changes: Vec<FileChange>) -> Self {
        Self { changes }
    }
}

/// Server acknowledgment of a push.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushResponse {
    /// Paths durably stored, with the revision assigned to each.
    pub acknowledged: Vec<(String, u64)>,
    /// Paths refused because the remote copy moved on.
    pub conflicts: Vec<String>,
    /// Server revision after the push.
    pub new_cursor: u64,
}

impl PushResponse {
    /// Returns true if every pushed path was stored.
    pub fn is_clean(&self) -> bool {
        self.conflicts.is_empty()
    }

    /// Acknowledged paths without their revisions.
    pub fn acknowledged_paths(&self) -> impl Iterator<Item = &str> {
        self.acknowledged.iter().map(|(path, _)| path.as_str())
    }
}

/// A request as it travels over the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncEnvelope {
    /// Credentials resolved to an identity by the server.
    pub credentials: Option<Vec<u8>>,
    /// Session correlation id, absent on `begin`.
    pub session_id: Option<SessionId>,
    /// The request.
    pub message: SyncMessage,
}

impl SyncEnvelope {
    /// Creates an envelope.
    pub fn new(
        credentials: Option<Vec<u8>>,
        session_id: Option<SessionId>,
        message: SyncMessage,
    ) -> Self {
        Self {
            credentials,
            session_id,
            message,
        }
    }
}

/// Server answer to an envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncReply {
    /// The step was accepted.
    Ok(SyncMessage),
    /// The step was refused.
    Rejected(Rejection),
}

impl SyncReply {
    /// Converts into a `Result`.
    pub fn into_result(self) -> Result<SyncMessage, Rejection> {
        match self {
            SyncReply::Ok(message) => Ok(message),
            SyncReply::Rejected(rejection) => Err(rejection),
        }
    }
}

impl From<Result<SyncMessage, Rejection>> for SyncReply {
    fn from(result: Result<SyncMessage, Rejection>) -> Self {
        match result {
            Ok(message) => SyncReply::Ok(message),
            Err(rejection) => SyncReply::Rejected(rejection),
        }
    }
}

/// Encodes a protocol value to CBOR.
pub fn encode<T: Serialize>(value: &T) -> ProtocolResult<Vec<u8>> {
    let mut bytes = Vec::new();
    ciborium::ser::into_writer(value, &mut bytes)
        .map_err(|e| ProtocolError::Encode(e.to_string()))?;
    Ok(bytes)
}

/// Decodes a protocol value from CBOR.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> ProtocolResult<T> {
    ciborium::de::from_reader(bytes).map_err(|e| ProtocolError::Decode(e.to_string()))
}
