//! Path → [`FileId`] mapping.

#![allow(missing_docs)]

use std::path::{Component, Path, PathBuf};

use crate::core::config::fnv1a;
use crate::hints::cache::FileId;

/// Maps a path to the identity its hints are keyed by.
///
/// Two paths naming the same file should map to the same id. Distinct files
/// that collide simply share hints.
pub trait IdentityService: Send + Sync {
    fn identity_of(&self, path: &Path) -> FileId;
}

/// Hashes the lexically normalized absolute path. Symlinks are not resolved.
#[derive(Debug, Clone, Default)]
pub struct PathHashIdentity {
    base: Option<PathBuf>,
}

impl PathHashIdentity {
    /// Resolve relative paths against the process working directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve relative paths against `base` instead of the working directory.
    #[must_use]
    pub fn with_base(base: impl Into<PathBuf>) -> Self {
        Self {
            base: Some(base.into()),
        }
    }

    /// Absolute form of `path` with `.` and `..` folded away.
    #[must_use]
    pub fn normalize(&self, path: &Path) -> PathBuf {
        let joined = if path.is_absolute() {
            path.to_path_buf()
        } else {
            match self.base.clone().or_else(|| std::env::current_dir().ok()) {
                Some(base) => base.join(path),
                None => path.to_path_buf(),
            }
        };

        let mut out = PathBuf::new();
        for component in joined.components() {
            match component {
                Component::CurDir => {}
                Component::ParentDir => {
                    // `pop` refuses to remove the root, so `/..` stays `/`.
                    out.pop();
                }
                other => out.push(other.as_os_str()),
            }
        }
        out
    }
}

impl IdentityService for PathHashIdentity {
    fn identity_of(&self, path: &Path) -> FileId {
        let normalized = self.normalize(path);
        FileId(fnv1a(normalized.as_os_str().as_encoded_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dot_segments_do_not_change_identity() {
        let ids = PathHashIdentity::new();
        assert_eq!(
            ids.identity_of(Path::new("/srv/data/./a/../b.txt")),
            ids.identity_of(Path::new("/srv/data/b.txt"))
        );
    }

    #[test]
    fn relative_paths_resolve_against_base() {
        let ids = PathHashIdentity::with_base("/work");
        assert_eq!(
            ids.identity_of(Path::new("out/x.o")),
            ids.identity_of(Path::new("/work/out/x.o"))
        );
        assert_eq!(ids.normalize(Path::new("../etc")), PathBuf::from("/etc"));
    }

    #[test]
    fn parent_of_root_is_root() {
        let ids = PathHashIdentity::new();
        assert_eq!(ids.normalize(Path::new("/../../tmp")), PathBuf::from("/tmp"));
    }

    #[test]
    fn distinct_paths_get_distinct_ids() {
        let ids = PathHashIdentity::new();
        assert_ne!(
            ids.identity_of(Path::new("/a/b")),
            ids.identity_of(Path::new("/a/c"))
        );
    }
}
