//! Storage for per-session state objects.

use crate::machine::SyncStateMachine;
use drivesync_protocol::SessionId;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;

/// A session's state machine, shared between the registry and in-flight
/// requests.
pub type SharedMachine = Arc<Mutex<SyncStateMachine>>;

/// Where the transport layer keeps session state objects, keyed by token.
///
/// The registry records which token is active for a user; the state object
/// itself lives here. The two can disagree (state evicted, process
/// restarted), which the validation gate detects and heals.
pub trait SessionStateStore: Send + Sync {
    /// Stores the state for a token.
    fn insert(&self, token: SessionId, machine: SharedMachine);

    /// Retrieves the state for a token.
    fn get(&self, token: &SessionId) -> Option<SharedMachine>;

    /// Removes and returns the state for a token.
    fn remove(&self, token: &SessionId) -> Option<SharedMachine>;
}

/// In-memory state store.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    machines: RwLock<HashMap<SessionId, SharedMachine>>,
}

impl MemoryStateStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops the state for a token without telling the registry.
    ///
    /// Models a transport that lost session state, e.g. after a restart.
    pub fn evict(&self, token: &SessionId) -> bool {
        self.machines.write().remove(token).is_some()
    }

    /// Number of stored state objects.
    pub fn len(&self) -> usize {
        self.machines.read().len()
    }

    /// Returns true if no state is stored.
    pub fn is_empty(&self) -> bool {
        self.machines.read().is_empty()
    }
}

impl SessionStateStore for MemoryStateStore {
    fn insert(&self, token: SessionId, machine: SharedMachine) {
        self.machines.write().insert(token, machine);
    }

    fn get(&self, token: &SessionId) -> Option<SharedMachine> {
        self.machines.read().get(token).cloned()
    }

    fn remove(&self, token: &SessionId) -> Option<SharedMachine> {
        self.machines.write().remove(token)
    }
}
