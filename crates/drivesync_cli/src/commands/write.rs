//! Tracked mutation commands.
//!
//! Every mutation goes through [`TrackedFs`], so the touched nodes carry the
//! unsynced marker afterwards exactly as they would from any local writer.

use drivesync_fs::{DirNodeStore, TrackedFs};
use std::path::Path;
use tracing::info;

fn open(path: &Path, create: bool) -> Result<TrackedFs<DirNodeStore>, Box<dyn std::error::Error>> {
    Ok(TrackedFs::new(DirNodeStore::open(path, create)?))
}

/// Writes `content` to `file`.
pub fn write(path: &Path, file: &str, content: &str) -> Result<(), Box<dyn std::error::Error>> {
    open(path, true)?.write_file(file, content.as_bytes())?;
    info!(file, bytes = content.len(), "wrote file");
    Ok(())
}

/// Deletes `file`, leaving a marked tombstone.
pub fn remove(path: &Path, file: &str) -> Result<(), Box<dyn std::error::Error>> {
    open(path, false)?.delete(file)?;
    info!(file, "deleted file");
    Ok(())
}

/// Renames `from` to `to`.
pub fn rename(path: &Path, from: &str, to: &str) -> Result<(), Box<dyn std::error::Error>> {
    open(path, false)?.rename(from, to)?;
    info!(from, to, "renamed file");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn mutations_mark_nodes() {
        let dir = tempdir().unwrap();
        write(dir.path(), "/a.txt", "hello").unwrap();
        rename(dir.path(), "/a.txt", "/b.txt").unwrap();

        let fs = open(dir.path(), false).unwrap();
        assert_eq!(fs.read_file("/b.txt").unwrap(), b"hello");
        assert!(fs.is_unsynced("/a.txt").unwrap());
        assert!(fs.is_unsynced("/b.txt").unwrap());
    }

    #[test]
    fn remove_requires_existing_file() {
        let dir = tempdir().unwrap();
        write(dir.path(), "/a.txt", "x").unwrap();
        assert!(remove(dir.path(), "/missing.txt").is_err());
        assert!(remove(dir.path(), "/a.txt").is_ok());
    }
}
