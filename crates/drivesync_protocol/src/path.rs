//! Node path normalisation.

use crate::error::{ProtocolError, ProtocolResult};

/// Normalises a node path.
///
/// Paths are absolute and `/`-separated. Repeated separators and a trailing
/// separator are folded away; `.` and `..` segments are refused rather than
/// resolved so that a path can never escape the user's tree.
///
/// ```
/// use drivesync_protocol::normalize_path;
///
/// assert_eq!(normalize_path("/dir//file.txt/").unwrap(), "/dir/file.txt");
/// assert!(normalize_path("relative.txt").is_err());
/// assert!(normalize_path("/a/../b").is_err());
/// ```
pub fn normalize_path(path: &str) -> ProtocolResult<String> {
    if !path.starts_with('/') {
        return Err(ProtocolError::InvalidPath(path.to_string()));
    }

    let mut normalized = String::with_capacity(path.len());
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        if segment == "." || segment == ".." || segment.contains('\0') {
            return Err(ProtocolError::InvalidPath(path.to_string()));
        }
        normalized.push('/');
        normalized.push_str(segment);
    }

    if normalized.is_empty() {
        // The root itself is a directory, not a node.
        return Err(ProtocolError::InvalidPath(path.to_string()));
    }

    Ok(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn rejects_root_and_relative() {
        assert!(normalize_path("/").is_err());
        assert!(normalize_path("").is_err());
        assert!(normalize_path("a/b").is_err());
        assert!(normalize_path("/a/./b").is_err());
    }

    #[test]
    fn folds_separators() {
        assert_eq!(normalize_path("//a///b").unwrap(), "/a/b");
        assert_eq!(normalize_path("/a/b/").unwrap(), "/a/b");
    }

    proptest! {
        #[test]
        fn normalisation_is_idempotent(segments in prop::collection::vec("[a-z0-9_.-]{1,8}", 1..6)) {
            let raw = format!("/{}", segments.join("//"));
            if let Ok(once) = normalize_path(&raw) {
                let twice = normalize_path(&once).unwrap();
                prop_assert_eq!(&once, &twice);
                prop_assert!(once.starts_with('/'));
                prop_assert!(!once.contains("//"));
            }
        }
    }
}
