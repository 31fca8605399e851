//! Change tracking: marks mutated nodes dirty and clears them on acknowledgment.
//!
//! The tracker pairs the persisted marker with an in-memory write epoch per
//! path. A [`DirtySnapshot`] records the epoch each path had when the push
//! began; [`ChangeTracker::clear`] only clears a path whose epoch is still
//! the one in the snapshot, so a write that lands between snapshot and
//! acknowledgment keeps its marker.

use crate::attr::AttributeStore;
use crate::backend::NodeStore;
use crate::error::FsResult;
use drivesync_protocol::normalize_path;
use parking_lot::{Mutex, MutexGuard};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Default)]
struct WriteEpochs {
    by_path: HashMap<String, u64>,
    last: u64,
}

impl WriteEpochs {
    fn current(&self, path: &str) -> u64 {
        self.by_path.get(path).copied().unwrap_or(0)
    }
}

/// The dirty set at the moment an upstream push began.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirtySnapshot {
    entries: BTreeMap<String, u64>,
}

impl DirtySnapshot {
    /// Paths in the snapshot, sorted.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Returns true if `path` is part of the snapshot.
    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    /// Drops a path from the snapshot so it is neither pushed nor cleared.
    pub fn exclude(&mut self, path: &str) -> bool {
        self.entries.remove(path).is_some()
    }

    /// Number of paths.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is dirty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Exclusive access to the tracker while a mutation runs.
///
/// Content writes performed while the guard is held are atomic with respect
/// to [`ChangeTracker::snapshot_dirty`] and [`ChangeTracker::clear`].
pub struct TrackerGuard<'a, S: NodeStore> {
    attrs: &'a AttributeStore<S>,
    epochs: MutexGuard<'a, WriteEpochs>,
}

impl<S: NodeStore> TrackerGuard<'_, S> {
    /// Marks an already-normalised path dirty.
    ///
    /// The epoch only advances once the marker is durably set.
    pub fn mark(&mut self, path: &str) -> FsResult<()> {
        self.attrs.set_unsynced(path)?;
        self.epochs.last += 1;
        let epoch = self.epochs.last;
        self.epochs.by_path.insert(path.to_string(), epoch);
        Ok(())
    }

    /// Drops the marker of an already-normalised path.
    ///
    /// Used when a mutation is undone or its node now matches the remote.
    pub fn unmark(&mut self, path: &str) -> FsResult<()> {
        self.attrs.clear_unsynced(path)?;
        self.epochs.by_path.remove(path);
        Ok(())
    }

    /// Returns true if the path carries the marker.
    pub fn is_unsynced(&self, path: &str) -> FsResult<bool> {
        self.attrs.is_unsynced(path)
    }
}

/// Tracks which nodes diverged from the last confirmed remote state.
pub struct ChangeTracker<S: NodeStore> {
    attrs: AttributeStore<S>,
    epochs: Mutex<WriteEpochs>,
}

impl<S: NodeStore> ChangeTracker<S> {
    /// Creates a tracker over a node store.
    pub fn new(store: Arc<S>) -> Self {
        Self {
            attrs: AttributeStore::new(store),
            epochs: Mutex::new(WriteEpochs::default()),
        }
    }

    /// Acquires the tracker for a mutation.
    pub fn lock(&self) -> TrackerGuard<'_, S> {
        TrackerGuard {
            attrs: &self.attrs,
            epochs: self.epochs.lock(),
        }
    }

    /// Marks `path` dirty after a local mutation.
    ///
    /// Only touches the local attribute store; never blocks on the network.
    pub fn on_local_write(&self, path: &str) -> FsResult<()> {
        let path = normalize_path(path)?;
        self.lock().mark(&path)
    }

    /// Returns true if `path` carries the marker.
    pub fn is_unsynced(&self, path: &str) -> FsResult<bool> {
        let path = normalize_path(path)?;
        self.attrs.is_unsynced(&path)
    }

    /// Every path currently marked, sorted.
    pub fn dirty_paths(&self) -> FsResult<Vec<String>> {
        self.attrs.unsynced_paths()
    }

    /// Snapshots the dirty set at the start of an upstream push.
    pub fn snapshot_dirty(&self) -> FsResult<DirtySnapshot> {
        let epochs = self.epochs.lock();
        let entries = self
            .attrs
            .unsynced_paths()?
            .into_iter()
            .map(|path| {
                let epoch = epochs.current(&path);
                (path, epoch)
            })
            .collect();
        Ok(DirtySnapshot { entries })
    }

    /// Clears the marker on acknowledged paths of `snapshot`.
    ///
    /// A path is cleared only if it belongs to the snapshot and has not been
    /// written since the snapshot was taken. Returns the cleared paths.
    pub fn clear<'p, I>(&self, snapshot: &DirtySnapshot, acknowledged: I) -> FsResult<Vec<String>>
    where
        I: IntoIterator<Item = &'p str>,
    {
        let mut epochs = self.epochs.lock();
        let mut cleared = Vec::new();

        for path in acknowledged {
            let Some(&snapshot_epoch) = snapshot.entries.get(path) else {
                debug!(path, "acknowledged path was not part of the push");
                continue;
            };
            if epochs.current(path) != snapshot_epoch {
                debug!(path, "path re-dirtied during push, keeping marker");
                continue;
            }
            self.attrs.clear_unsynced(path)?;
            epochs.by_path.remove(path);
            cleared.push(path.to_string());
        }

        Ok(cleared)
    }
}
