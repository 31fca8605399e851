//! # drivesync Filesystem
//!
//! Client-side filesystem collaborator and change tracking for drivesync.
//!
//! Node stores are **sync-agnostic** content stores with per-node extended
//! attributes. The change tracker gives one attribute, the `unsynced`
//! marker, its meaning: set on every local mutation, cleared only when the
//! server has acknowledged the exact content that was pushed.
//!
//! ## Design Principles
//!
//! - Node stores know nothing about sync (read, write, remove, xattrs)
//! - A mutation and its marker are one unit: if the marker fails, the
//!   content change is rolled back
//! - Acknowledgment clears never override a newer local write
//! - Must be `Send + Sync`; local writes never block on the network
//!
//! ## Available Stores
//!
//! - [`MemoryNodeStore`] - For testing and ephemeral clients
//! - [`DirNodeStore`] - For a tree on the local disk
//!
//! ## Example
//!
//! ```rust
//! use drivesync_fs::{MemoryNodeStore, TrackedFs};
//!
//! let fs = TrackedFs::new(MemoryNodeStore::new());
//! fs.write_file("/a.txt", b"hello").unwrap();
//!
//! let snapshot = fs.snapshot_dirty().unwrap();
//! fs.tracker().clear(&snapshot, ["/a.txt"]).unwrap();
//! assert!(!fs.is_unsynced("/a.txt").unwrap());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod attr;
mod backend;
mod error;
mod file;
mod memory;
mod tracked;
mod tracker;

pub use attr::{AttributeStore, UNSYNCED_ATTR};
pub use backend::NodeStore;
pub use error::{FsError, FsResult};
pub use file::DirNodeStore;
pub use memory::MemoryNodeStore;
pub use tracked::{RemoteApply, TrackedFs};
pub use tracker::{ChangeTracker, DirtySnapshot, TrackerGuard};
