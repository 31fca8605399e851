//! Tracked filesystem: every local mutation marks its node unsynced.

use crate::backend::NodeStore;
use crate::error::{FsError, FsResult};
use crate::tracker::{ChangeTracker, DirtySnapshot, TrackerGuard};
use drivesync_protocol::{normalize_path, ChangeKind, FileChange};
use std::sync::Arc;
use tracing::{debug, warn};

/// Outcome of applying a downstream change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteApply {
    /// The change was written to the node.
    Applied,
    /// The node has unpushed local changes; the remote change was skipped.
    Conflict,
}

/// A node store whose mutations are bound to the unsynced marker.
///
/// Content writes and marker updates happen under the tracker lock, so a
/// mutation is never observed half done by a push snapshot or an
/// acknowledgment clear. If the marker cannot be set, the content change is
/// rolled back and the mutation fails.
///
/// # Example
///
/// ```rust
/// use drivesync_fs::{MemoryNodeStore, TrackedFs};
///
/// let fs = TrackedFs::new(MemoryNodeStore::new());
/// fs.write_file("/a.txt", b"hello").unwrap();
/// assert!(fs.is_unsynced("/a.txt").unwrap());
/// ```
pub struct TrackedFs<S: NodeStore> {
    store: Arc<S>,
    tracker: ChangeTracker<S>,
}

impl<S: NodeStore> TrackedFs<S> {
    /// Wraps a node store.
    pub fn new(store: S) -> Self {
        Self::from_arc(Arc::new(store))
    }

    /// Wraps a shared node store.
    pub fn from_arc(store: Arc<S>) -> Self {
        let tracker = ChangeTracker::new(Arc::clone(&store));
        Self { store, tracker }
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// The change tracker.
    pub fn tracker(&self) -> &ChangeTracker<S> {
        &self.tracker
    }

    /// Reads a file.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the node has no content.
    pub fn read_file(&self, path: &str) -> FsResult<Vec<u8>> {
        let path = normalize_path(path)?;
        self.store.read(&path)?.ok_or(FsError::NotFound(path))
    }

    /// Returns true if the node has content.
    pub fn exists(&self, path: &str) -> FsResult<bool> {
        let path = normalize_path(path)?;
        Ok(self.store.read(&path)?.is_some())
    }

    /// Writes a file, creating or replacing it.
    pub fn write_file(&self, path: &str, content: &[u8]) -> FsResult<()> {
        let path = normalize_path(path)?;
        let mut guard = self.tracker.lock();
        self.write_marked(&mut guard, &path, content)
    }

    /// Creates a file that must not exist yet.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyExists` if the node has content.
    pub fn create_file(&self, path: &str, content: &[u8]) -> FsResult<()> {
        let path = normalize_path(path)?;
        let mut guard = self.tracker.lock();
        if self.store.read(&path)?.is_some() {
            return Err(FsError::AlreadyExists(path));
        }
        self.write_marked(&mut guard, &path, content)
    }

    /// Deletes a file. The node keeps its marker so the deletion is pushed.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the node has no content.
    pub fn delete(&self, path: &str) -> FsResult<()> {
        let path = normalize_path(path)?;
        let mut guard = self.tracker.lock();
        let previous = self
            .store
            .read(&path)?
            .ok_or_else(|| FsError::NotFound(path.clone()))?;

        self.store.remove(&path)?;
        if let Err(err) = guard.mark(&path) {
            warn!(path = %path, error = %err, "marker failed, restoring deleted node");
            self.store.write(&path, &previous)?;
            return Err(err);
        }
        Ok(())
    }

    /// Renames a file. Both the destination and the vacated source are marked.
    ///
    /// If any step fails, both nodes get their previous content back and the
    /// destination keeps the marker state it had before.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the source has no content.
    pub fn rename(&self, from: &str, to: &str) -> FsResult<()> {
        let from = normalize_path(from)?;
        let to = normalize_path(to)?;
        if from == to {
            return Ok(());
        }

        let mut guard = self.tracker.lock();
        let content = self
            .store
            .read(&from)?
            .ok_or_else(|| FsError::NotFound(from.clone()))?;
        let replaced = self.store.read(&to)?;
        let to_was_unsynced = guard.is_unsynced(&to)?;

        self.store.write(&to, &content)?;
        if let Err(err) = self.store.remove(&from) {
            warn!(from = %from, to = %to, error = %err, "remove failed, undoing rename");
            self.restore(&to, replaced.as_deref())?;
            return Err(err);
        }

        if let Err(err) = guard.mark(&to) {
            warn!(from = %from, to = %to, error = %err, "marker failed, undoing rename");
            self.store.write(&from, &content)?;
            self.restore(&to, replaced.as_deref())?;
            return Err(err);
        }
        if let Err(err) = guard.mark(&from) {
            warn!(from = %from, to = %to, error = %err, "marker failed, undoing rename");
            self.store.write(&from, &content)?;
            self.restore(&to, replaced.as_deref())?;
            if !to_was_unsynced {
                guard.unmark(&to)?;
            }
            return Err(err);
        }
        Ok(())
    }

    /// Applies a downstream change without marking the node.
    ///
    /// A node that still has unpushed local changes is left alone and
    /// reported as [`RemoteApply::Conflict`].
    pub fn apply_remote(&self, change: &FileChange) -> FsResult<RemoteApply> {
        let path = normalize_path(&change.path)?;
        let guard = self.tracker.lock();
        if guard.is_unsynced(&path)? {
            debug!(path = %path, "remote change hits a dirty node");
            return Ok(RemoteApply::Conflict);
        }

        match &change.kind {
            ChangeKind::Write(content) => self.store.write(&path, content)?,
            ChangeKind::Delete => {
                self.store.remove(&path)?;
            }
        }
        Ok(RemoteApply::Applied)
    }

    /// Replaces a node with a remote change and drops its marker.
    ///
    /// Discards unpushed local changes; used to settle a conflict in favour
    /// of the remote copy.
    pub fn accept_remote(&self, change: &FileChange) -> FsResult<()> {
        let path = normalize_path(&change.path)?;
        let mut guard = self.tracker.lock();
        let previous = self.store.read(&path)?;

        match &change.kind {
            ChangeKind::Write(content) => self.store.write(&path, content)?,
            ChangeKind::Delete => {
                self.store.remove(&path)?;
            }
        }
        if let Err(err) = guard.unmark(&path) {
            warn!(path = %path, error = %err, "marker not cleared, restoring local copy");
            self.restore(&path, previous.as_deref())?;
            return Err(err);
        }
        Ok(())
    }

    /// Builds the upstream change for a dirty path against `base_revision`.
    pub fn pending_change(&self, path: &str, base_revision: u64) -> FsResult<FileChange> {
        let path = normalize_path(path)?;
        Ok(match self.store.read(&path)? {
            Some(content) => FileChange::write(path, content, base_revision),
            None => FileChange::delete(path, base_revision),
        })
    }

    /// Returns true if the node carries the marker.
    pub fn is_unsynced(&self, path: &str) -> FsResult<bool> {
        self.tracker.is_unsynced(path)
    }

    /// Every path currently marked, sorted.
    pub fn dirty_paths(&self) -> FsResult<Vec<String>> {
        self.tracker.dirty_paths()
    }

    /// Snapshots the dirty set for a push.
    pub fn snapshot_dirty(&self) -> FsResult<DirtySnapshot> {
        self.tracker.snapshot_dirty()
    }

    /// Every path with content, sorted.
    pub fn list(&self) -> FsResult<Vec<String>> {
        self.store.list()
    }

    fn write_marked(
        &self,
        guard: &mut TrackerGuard<'_, S>,
        path: &str,
        content: &[u8],
    ) -> FsResult<()> {
        let previous = self.store.read(path)?;
        self.store.write(path, content)?;
        if let Err(err) = guard.mark(path) {
            warn!(path, error = %err, "marker failed, rolling back write");
            self.restore(path, previous.as_deref())?;
            return Err(err);
        }
        Ok(())
    }

    fn restore(&self, path: &str, previous: Option<&[u8]>) -> FsResult<()> {
        match previous {
            Some(content) => self.store.write(path, content),
            None => self.store.remove(path).map(|_| ()),
        }
    }
}
