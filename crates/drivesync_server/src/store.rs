//! Server-side canonical copy of each user's tree.

use crate::error::{ServerError, ServerResult};
use drivesync_protocol::{
    normalize_path, ChangeKind, FileChange, PullResponse, PushResponse,
};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

#[derive(Debug, Clone)]
struct Entry {
    /// `None` is a tombstone.
    content: Option<Vec<u8>>,
    revision: u64,
}

#[derive(Debug, Default)]
struct UserTree {
    entries: BTreeMap<String, Entry>,
    revision: u64,
}

/// Canonical copy of every user's tree.
///
/// Each user has a monotonically increasing revision counter. Every stored
/// change takes the next revision, and deletions are kept as tombstones so
/// they can be pulled by other clients.
#[derive(Debug, Default)]
pub struct RemoteStore {
    trees: RwLock<HashMap<String, UserTree>>,
}

impl RemoteStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current revision of a user's tree.
    pub fn revision(&self, identity: &str) -> u64 {
        self.trees
            .read()
            .get(identity)
            .map_or(0, |tree| tree.revision)
    }

    /// Current content at `path`, `None` if absent or deleted.
    pub fn read(&self, identity: &str, path: &str) -> Option<Vec<u8>> {
        self.trees
            .read()
            .get(identity)?
            .entries
            .get(path)?
            .content
            .clone()
    }

    /// Every change newer than `cursor`, in revision order.
    pub fn changes_since(&self, identity: &str, cursor: u64) -> PullResponse {
        let trees = self.trees.read();
        let Some(tree) = trees.get(identity) else {
            return PullResponse::new(Vec::new(), cursor);
        };

        let mut changes: Vec<FileChange> = tree
            .entries
            .iter()
            .filter(|(_, entry)| entry.revision > cursor)
            .map(|(path, entry)| match &entry.content {
                Some(content) => FileChange::write(path.clone(), content.clone(), entry.revision),
                None => FileChange::delete(path.clone(), entry.revision),
            })
            .collect();
        changes.sort_by_key(|change| change.revision);

        PullResponse::new(changes, tree.revision.max(cursor))
    }

    /// Stores pushed changes.
    ///
    /// A change is accepted when its base revision is the path's current
    /// revision (0 for unknown paths); otherwise it is a conflict and is not
    /// stored.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRequest` if any path is malformed; nothing is stored
    /// in that case.
    pub fn apply(&self, identity: &str, changes: &[FileChange]) -> ServerResult<PushResponse> {
        let paths = changes
            .iter()
            .map(|change| normalize_path(&change.path))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| ServerError::InvalidRequest(e.to_string()))?;

        let mut trees = self.trees.write();
        let tree = trees.entry(identity.to_string()).or_default();
        let mut response = PushResponse::default();

        for (path, change) in paths.into_iter().zip(changes) {
            let current = tree.entries.get(&path).map_or(0, |entry| entry.revision);
            if change.revision != current {
                debug!(
                    user = identity,
                    path = %path,
                    base = change.revision,
                    current,
                    "stale push"
                );
                response.conflicts.push(path);
                continue;
            }

            tree.revision += 1;
            let content = match &change.kind {
                ChangeKind::Write(content) => Some(content.clone()),
                ChangeKind::Delete => None,
            };
            tree.entries.insert(
                path.clone(),
                Entry {
                    content,
                    revision: tree.revision,
                },
            );
            response.acknowledged.push((path, tree.revision));
        }

        response.new_cursor = tree.revision;
        Ok(response)
    }
}
