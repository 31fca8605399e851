//! Sync handshake phases.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Position of a sync session in the handshake sequence.
///
/// The normal cycle is:
///
/// ```text
/// Idle → AwaitingDownstream → DownstreamActive → AwaitingUpstream
///      → UpstreamActive → Synced → Idle
/// ```
///
/// `Conflict` is reachable from any active phase when the remote state
/// diverged from what a step expected. `Killed` is reachable from any phase
/// and is absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    /// No cycle in progress.
    Idle,
    /// Session admitted, downstream pull not yet requested.
    AwaitingDownstream,
    /// Remote changes handed to the client, not yet applied.
    DownstreamActive,
    /// Client applied the downstream changes and may push.
    AwaitingUpstream,
    /// Client pushed its dirty set; server acknowledged it.
    UpstreamActive,
    /// Full round trip finished.
    Synced,
    /// Remote and local state diverged.
    Conflict,
    /// Session torn down after an unrecoverable inconsistency.
    Killed,
}

impl Phase {
    /// All phases, in handshake order.
    pub const ALL: [Phase; 8] = [
        Phase::Idle,
        Phase::AwaitingDownstream,
        Phase::DownstreamActive,
        Phase::AwaitingUpstream,
        Phase::UpstreamActive,
        Phase::Synced,
        Phase::Conflict,
        Phase::Killed,
    ];

    /// Returns true while a cycle is in flight.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            Phase::AwaitingDownstream
                | Phase::DownstreamActive
                | Phase::AwaitingUpstream
                | Phase::UpstreamActive
        )
    }

    /// Returns true if no further step can be taken on this session.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Killed)
    }

    /// Returns the phase that follows this one in a conflict-free cycle.
    pub fn successor(&self) -> Option<Phase> {
        match self {
            Phase::Idle => Some(Phase::AwaitingDownstream),
            Phase::AwaitingDownstream => Some(Phase::DownstreamActive),
            Phase::DownstreamActive => Some(Phase::AwaitingUpstream),
            Phase::AwaitingUpstream => Some(Phase::UpstreamActive),
            Phase::UpstreamActive => Some(Phase::Synced),
            Phase::Synced => Some(Phase::Idle),
            Phase::Conflict | Phase::Killed => None,
        }
    }

    /// Wire name of the phase.
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Idle => "IDLE",
            Phase::AwaitingDownstream => "AWAITING_DOWNSTREAM",
            Phase::DownstreamActive => "DOWNSTREAM_ACTIVE",
            Phase::AwaitingUpstream => "AWAITING_UPSTREAM",
            Phase::UpstreamActive => "UPSTREAM_ACTIVE",
            Phase::Synced => "SYNCED",
            Phase::Conflict => "CONFLICT",
            Phase::Killed => "KILLED",
        }
    }
}

impl Default for Phase {
    fn default() -> Self {
        Phase::Idle
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
