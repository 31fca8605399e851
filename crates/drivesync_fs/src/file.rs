//! Directory-backed node store for a tree on the local disk.
//!
//! ```text
//! <root>/
//! ├─ .drivesync/
//! │  ├─ LOCK          # Advisory lock for single-writer
//! │  └─ xattrs.json   # Extended attribute table
//! └─ ...              # Node content, one file per node
//! ```

use crate::backend::NodeStore;
use crate::error::{FsError, FsResult};
use fs2::FileExt;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

const META_DIR: &str = ".drivesync";
const LOCK_FILE: &str = "LOCK";
const XATTR_FILE: &str = "xattrs.json";
const XATTR_TEMP: &str = "xattrs.json.tmp";

type XattrTable = BTreeMap<String, BTreeMap<String, Vec<u8>>>;

/// A node store rooted at a local directory.
///
/// Node content lives in ordinary files under the root. Extended attributes
/// are kept in a table inside `.drivesync/` rather than in OS xattrs, so the
/// store behaves the same on filesystems without xattr support.
///
/// # Durability
///
/// - Content writes call `File::sync_all()` before returning
/// - The attribute table is rewritten atomically (temp file, fsync, rename)
///   on every attribute change
///
/// # Thread Safety
///
/// The store holds an exclusive advisory lock on the root for its lifetime.
/// Only one `DirNodeStore` can exist per directory at a time.
///
/// # Example
///
/// ```no_run
/// use drivesync_fs::{DirNodeStore, NodeStore};
/// use std::path::Path;
///
/// let store = DirNodeStore::open(Path::new("my_drive"), true).unwrap();
/// store.write("/notes.txt", b"hello").unwrap();
/// ```
#[derive(Debug)]
pub struct DirNodeStore {
    root: PathBuf,
    xattrs: RwLock<XattrTable>,
    _lock_file: File,
}

impl DirNodeStore {
    /// Opens a store rooted at `root`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory doesn't exist and `create_if_missing` is false
    /// - Another process holds the lock (returns `Locked`)
    /// - The attribute table cannot be parsed
    /// - I/O errors occur
    pub fn open(root: &Path, create_if_missing: bool) -> FsResult<Self> {
        if !root.exists() {
            if create_if_missing {
                fs::create_dir_all(root)?;
            } else {
                return Err(FsError::NotFound(root.display().to_string()));
            }
        }

        let meta = root.join(META_DIR);
        fs::create_dir_all(&meta)?;

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(meta.join(LOCK_FILE))?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(FsError::Locked);
        }

        let xattrs = match fs::read(meta.join(XATTR_FILE)) {
            Ok(data) if data.is_empty() => XattrTable::new(),
            Ok(data) => serde_json::from_slice(&data)?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => XattrTable::new(),
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            root: root.to_path_buf(),
            xattrs: RwLock::new(xattrs),
            _lock_file: lock_file,
        })
    }

    /// Returns the root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn node_path(&self, path: &str) -> FsResult<PathBuf> {
        let relative = path.trim_start_matches('/');
        if relative.is_empty() || relative.split('/').next() == Some(META_DIR) {
            return Err(FsError::InvalidPath(path.to_string()));
        }
        Ok(self.root.join(relative))
    }

    fn persist(&self, table: &XattrTable) -> FsResult<()> {
        let meta = self.root.join(META_DIR);
        let temp_path = meta.join(XATTR_TEMP);

        let data = serde_json::to_vec(table)?;
        let mut file = File::create(&temp_path)?;
        file.write_all(&data)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&temp_path, meta.join(XATTR_FILE))?;
        Ok(())
    }

    fn walk(&self, dir: &Path, prefix: &str, out: &mut Vec<String>) -> FsResult<()> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if prefix.is_empty() && name == META_DIR {
                continue;
            }
            let node = format!("{prefix}/{name}");
            if entry.file_type()?.is_dir() {
                self.walk(&entry.path(), &node, out)?;
            } else {
                out.push(node);
            }
        }
        Ok(())
    }
}

impl NodeStore for DirNodeStore {
    fn read(&self, path: &str) -> FsResult<Option<Vec<u8>>> {
        let file_path = self.node_path(path)?;
        if file_path.is_dir() {
            return Ok(None);
        }
        match fs::read(file_path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, path: &str, content: &[u8]) -> FsResult<()> {
        let file_path = self.node_path(path)?;
        if let Some(parent) = file_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = File::create(&file_path)?;
        file.write_all(content)?;
        file.sync_all()?;
        Ok(())
    }

    fn remove(&self, path: &str) -> FsResult<bool> {
        match fs::remove_file(self.node_path(path)?) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn get_xattr(&self, path: &str, name: &str) -> FsResult<Option<Vec<u8>>> {
        Ok(self
            .xattrs
            .read()
            .get(path)
            .and_then(|attrs| attrs.get(name).cloned()))
    }

    fn set_xattr(&self, path: &str, name: &str, value: &[u8]) -> FsResult<()> {
        self.node_path(path)?;
        let mut table = self.xattrs.write();
        let mut next = table.clone();
        next.entry(path.to_string())
            .or_default()
            .insert(name.to_string(), value.to_vec());
        self.persist(&next)
            .map_err(|e| FsError::attribute(path, e.to_string()))?;
        *table = next;
        Ok(())
    }

    fn remove_xattr(&self, path: &str, name: &str) -> FsResult<()> {
        let mut table = self.xattrs.write();
        let present = table
            .get(path)
            .map_or(false, |attrs| attrs.contains_key(name));
        if !present {
            return Ok(());
        }

        let mut next = table.clone();
        if let Some(attrs) = next.get_mut(path) {
            attrs.remove(name);
            if attrs.is_empty() {
                next.remove(path);
            }
        }
        self.persist(&next)
            .map_err(|e| FsError::attribute(path, e.to_string()))?;
        *table = next;
        Ok(())
    }

    fn paths_with_xattr(&self, name: &str) -> FsResult<Vec<String>> {
        Ok(self
            .xattrs
            .read()
            .iter()
            .filter(|(_, attrs)| attrs.contains_key(name))
            .map(|(path, _)| path.clone())
            .collect())
    }

    fn list(&self) -> FsResult<Vec<String>> {
        let mut out = Vec::new();
        self.walk(&self.root, "", &mut out)?;
        out.sort();
        Ok(out)
    }
}
