//! Node store trait definition.

use crate::error::FsResult;

/// The filesystem collaborator a drivesync client runs on.
///
/// A node store holds content keyed by absolute path and extended
/// attributes attached to each node. It knows nothing about sync: the
/// [`crate::ChangeTracker`] owns the meaning of the attributes it stores.
///
/// # Invariants
///
/// - Paths handed to a store are already normalised
/// - `read` returns exactly the bytes last written at that path
/// - Attributes survive `remove`: a removed node keeps its attributes until
///   they are cleared, so a deletion can still carry a marker
/// - Stores must be `Send + Sync`; all methods take `&self`
///
/// # Implementors
///
/// - [`super::MemoryNodeStore`] - For testing and ephemeral clients
/// - [`super::DirNodeStore`] - For a tree on the local disk
pub trait NodeStore: Send + Sync {
    /// Reads the content of a node, `None` if the node has no content.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn read(&self, path: &str) -> FsResult<Option<Vec<u8>>>;

    /// Replaces the content of a node, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn write(&self, path: &str, content: &[u8]) -> FsResult<()>;

    /// Removes the content of a node. Returns false if it had none.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn remove(&self, path: &str) -> FsResult<bool>;

    /// Reads an extended attribute.
    ///
    /// # Errors
    ///
    /// Returns an error if the attribute table cannot be read.
    fn get_xattr(&self, path: &str, name: &str) -> FsResult<Option<Vec<u8>>>;

    /// Sets an extended attribute, durably.
    ///
    /// # Errors
    ///
    /// Returns an error if the attribute cannot be persisted. Callers treat
    /// this as a failure of the whole mutation.
    fn set_xattr(&self, path: &str, name: &str, value: &[u8]) -> FsResult<()>;

    /// Removes an extended attribute. Removing a missing attribute is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the attribute table cannot be persisted.
    fn remove_xattr(&self, path: &str, name: &str) -> FsResult<()>;

    /// Returns every path carrying the named attribute, sorted.
    ///
    /// # Errors
    ///
    /// Returns an error if the attribute table cannot be read.
    fn paths_with_xattr(&self, name: &str) -> FsResult<Vec<String>>;

    /// Returns every path with content, sorted.
    ///
    /// # Errors
    ///
    /// Returns an error if the tree cannot be walked.
    fn list(&self) -> FsResult<Vec<String>>;
}

impl<S: NodeStore + ?Sized> NodeStore for std::sync::Arc<S> {
    fn read(&self, path: &str) -> FsResult<Option<Vec<u8>>> {
        (**self).read(path)
    }

    fn write(&self, path: &str, content: &[u8]) -> FsResult<()> {
        (**self).write(path, content)
    }

    fn remove(&self, path: &str) -> FsResult<bool> {
        (**self).remove(path)
    }

    fn get_xattr(&self, path: &str, name: &str) -> FsResult<Option<Vec<u8>>> {
        (**self).get_xattr(path, name)
    }

    fn set_xattr(&self, path: &str, name: &str, value: &[u8]) -> FsResult<()> {
        (**self).set_xattr(path, name, value)
    }

    fn remove_xattr(&self, path: &str, name: &str) -> FsResult<()> {
        (**self).remove_xattr(path, name)
    }

    fn paths_with_xattr(&self, name: &str) -> FsResult<Vec<String>> {
        (**self).paths_with_xattr(name)
    }

    fn list(&self) -> FsResult<Vec<String>> {
        (**self).list()
    }
}
