//! In-memory node store for testing.

use crate::backend::NodeStore;
use crate::error::{FsError, FsResult};
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Default, Clone)]
struct Node {
    content: Option<Vec<u8>>,
    xattrs: BTreeMap<String, Vec<u8>>,
}

impl Node {
    fn is_vacant(&self) -> bool {
        self.content.is_none() && self.xattrs.is_empty()
    }
}

/// An in-memory node store.
///
/// This store keeps every node in memory and is suitable for:
/// - Unit tests
/// - Integration tests
/// - Ephemeral clients that don't need persistence
///
/// Attribute writes can be made to fail with
/// [`MemoryNodeStore::fail_xattr_writes`] (or for a single path with
/// [`MemoryNodeStore::fail_xattr_writes_at`]), and removals with
/// [`MemoryNodeStore::fail_removes`]. Tests use these to observe how a
/// mutation behaves when one of its steps cannot be recorded.
///
/// # Example
///
/// ```rust
/// use drivesync_fs::{MemoryNodeStore, NodeStore};
///
/// let store = MemoryNodeStore::new();
/// store.write("/notes.txt", b"hello").unwrap();
/// assert_eq!(store.read("/notes.txt").unwrap(), Some(b"hello".to_vec()));
/// ```
#[derive(Debug, Default)]
pub struct MemoryNodeStore {
    nodes: RwLock<BTreeMap<String, Node>>,
    fail_xattr_writes: AtomicBool,
    failing_xattr_paths: RwLock<BTreeSet<String>>,
    fail_removes: AtomicBool,
}

impl MemoryNodeStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent `set_xattr` fail (or succeed again).
    pub fn fail_xattr_writes(&self, fail: bool) {
        self.fail_xattr_writes.store(fail, Ordering::SeqCst);
    }

    /// Makes `set_xattr` fail for `path` only.
    pub fn fail_xattr_writes_at(&self, path: &str) {
        self.failing_xattr_paths.write().insert(path.to_string());
    }

    /// Makes every subsequent `remove` fail (or succeed again).
    pub fn fail_removes(&self, fail: bool) {
        self.fail_removes.store(fail, Ordering::SeqCst);
    }

    /// Number of node entries, including content-less nodes that still
    /// carry attributes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.read().len()
    }
}

impl NodeStore for MemoryNodeStore {
    fn read(&self, path: &str) -> FsResult<Option<Vec<u8>>> {
        Ok(self
            .nodes
            .read()
            .get(path)
            .and_then(|node| node.content.clone()))
    }

    fn write(&self, path: &str, content: &[u8]) -> FsResult<()> {
        self.nodes
            .write()
            .entry(path.to_string())
            .or_default()
            .content = Some(content.to_vec());
        Ok(())
    }

    fn remove(&self, path: &str) -> FsResult<bool> {
        if self.fail_removes.load(Ordering::SeqCst) {
            return Err(FsError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                format!("cannot remove {path}"),
            )));
        }
        let mut nodes = self.nodes.write();
        let Some(node) = nodes.get_mut(path) else {
            return Ok(false);
        };
        let existed = node.content.take().is_some();
        if node.is_vacant() {
            nodes.remove(path);
        }
        Ok(existed)
    }

    fn get_xattr(&self, path: &str, name: &str) -> FsResult<Option<Vec<u8>>> {
        Ok(self
            .nodes
            .read()
            .get(path)
            .and_then(|node| node.xattrs.get(name).cloned()))
    }

    fn set_xattr(&self, path: &str, name: &str, value: &[u8]) -> FsResult<()> {
        if self.fail_xattr_writes.load(Ordering::SeqCst)
            || self.failing_xattr_paths.read().contains(path)
        {
            return Err(FsError::attribute(path, "attribute writes disabled"));
        }
        self.nodes
            .write()
            .entry(path.to_string())
            .or_default()
            .xattrs
            .insert(name.to_string(), value.to_vec());
        Ok(())
    }

    fn remove_xattr(&self, path: &str, name: &str) -> FsResult<()> {
        let mut nodes = self.nodes.write();
        if let Some(node) = nodes.get_mut(path) {
            node.xattrs.remove(name);
            if node.is_vacant() {
                nodes.remove(path);
            }
        }
        Ok(())
    }

    fn paths_with_xattr(&self, name: &str) -> FsResult<Vec<String>> {
        Ok(self
            .nodes
            .read()
            .iter()
            .filter(|(_, node)| node.xattrs.contains_key(name))
            .map(|(path, _)| path.clone())
            .collect())
    }

    fn list(&self) -> FsResult<Vec<String>> {
        Ok(self
            .nodes
            .read()
            .iter()
            .filter(|(_, node)| node.content.is_some())
            .map(|(path, _)| path.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_write_and_read() {
        let store = MemoryNodeStore::new();
        assert_eq!(store.read("/a").unwrap(), None);

        store.write("/a", b"one").unwrap();
        store.write("/a", b"two").unwrap();
        assert_eq!(store.read("/a").unwrap(), Some(b"two".to_vec()));
        assert_eq!(store.list().unwrap(), vec!["/a".to_string()]);
    }

    #[test]
    fn memory_remove_keeps_attributes() {
        let store = MemoryNodeStore::new();
        store.write("/a", b"data").unwrap();
        store.set_xattr("/a", "user.flag", b"1").unwrap();

        assert!(store.remove("/a").unwrap());
        assert_eq!(store.read("/a").unwrap(), None);
        assert!(store.list().unwrap().is_empty());
        assert_eq!(store.get_xattr("/a", "user.flag").unwrap(), Some(b"1".to_vec()));

        // Clearing the last attribute drops the node entirely.
        store.remove_xattr("/a", "user.flag").unwrap();
        assert_eq!(store.node_count(), 0);
    }

    #[test]
    fn memory_remove_missing() {
        let store = MemoryNodeStore::new();
        assert!(!store.remove("/nothing").unwrap());
    }

    #[test]
    fn memory_paths_with_xattr_sorted() {
        let store = MemoryNodeStore::new();
        store.set_xattr("/b", "user.flag", b"1").unwrap();
        store.set_xattr("/a", "user.flag", b"1").unwrap();
        store.set_xattr("/c", "user.other", b"1").unwrap();

        assert_eq!(
            store.paths_with_xattr("user.flag").unwrap(),
            vec!["/a".to_string(), "/b".to_string()]
        );
    }

    #[test]
    fn memory_failing_xattr_writes() {
        let store = MemoryNodeStore::new();
        store.fail_xattr_writes(true);
        assert!(matches!(
            store.set_xattr("/a", "user.flag", b"1"),
            Err(FsError::Attribute { .. })
        ));

        store.fail_xattr_writes(false);
        assert!(store.set_xattr("/a", "user.flag", b"1").is_ok());
    }

    #[test]
    fn memory_injected_faults_are_scoped() {
        let store = MemoryNodeStore::new();
        store.fail_xattr_writes_at("/b");
        assert!(store.set_xattr("/a", "user.flag", b"1").is_ok());
        assert!(store.set_xattr("/b", "user.flag", b"1").is_err());

        store.write("/a", b"data").unwrap();
        store.fail_removes(true);
        assert!(matches!(store.remove("/a"), Err(FsError::Io(_))));
        assert_eq!(store.read("/a").unwrap(), Some(b"data".to_vec()));
    }
}
