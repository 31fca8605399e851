//! The `unsynced` marker, stored as an extended attribute on each node.

use crate::backend::NodeStore;
use crate::error::FsResult;
use std::sync::Arc;

/// Extended attribute carrying the unsynced marker.
pub const UNSYNCED_ATTR: &str = "user.drivesync.unsynced";

const MARKER_VALUE: &[u8] = b"1";

/// Per-node boolean marker "unsynced", persisted alongside node content.
pub struct AttributeStore<S: NodeStore> {
    store: Arc<S>,
}

impl<S: NodeStore> AttributeStore<S> {
    /// Creates an attribute store over a node store.
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Returns true if the node at `path` carries the marker.
    pub fn is_unsynced(&self, path: &str) -> FsResult<bool> {
        Ok(self.store.get_xattr(path, UNSYNCED_ATTR)?.is_some())
    }

    /// Sets the marker on `path`.
    pub fn set_unsynced(&self, path: &str) -> FsResult<()> {
        self.store.set_xattr(path, UNSYNCED_ATTR, MARKER_VALUE)
    }

    /// Clears the marker on `path`.
    pub fn clear_unsynced(&self, path: &str) -> FsResult<()> {
        self.store.remove_xattr(path, UNSYNCED_ATTR)
    }

    /// Every path currently carrying the marker, sorted.
    pub fn unsynced_paths(&self) -> FsResult<Vec<String>> {
        self.store.paths_with_xattr(UNSYNCED_ATTR)
    }
}
