//! In-memory set of mountpoints the broker believes it owns.
//!
//! This is the broker's sole defense against being used as a confused
//! deputy: every unmount or bind operation is authorized by checking the
//! target path against this registry before any syscall is issued.

use std::collections::HashSet;

/// Set of absolute mountpoint paths the broker has mounted.
///
/// Membership only, no associated values: insertion order and mount kind
/// are not tracked here (callers that need a `fuse` vs `nfs` vs `bind`
/// distinction keep their own map alongside the registry).
#[derive(Debug, Default)]
pub struct MountRegistry {
    mounts: HashSet<String>,
}

impl MountRegistry {
    pub fn new() -> Self {
        MountRegistry {
            mounts: HashSet::new(),
        }
    }

    /// Record `path` as mounted. Returns `true` if it was not already present.
    pub fn insert(&mut self, path: impl Into<String>) -> bool {
        self.mounts.insert(path.into())
    }

    /// Forget `path`. Returns `true` if it was present.
    pub fn remove(&mut self, path: &str) -> bool {
        self.mounts.remove(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.mounts.contains(path)
    }

    /// Find the mountpoint in the registry that owns `path`, i.e. the
    /// registered mount `m` such that `path` is exactly `m` or begins with
    /// `m` followed by `/`.
    pub fn find_prefix(&self, path: &str) -> Option<&str> {
        self.mounts
            .iter()
            .find(|mount| {
                path == mount.as_str() || path.starts_with(mount.as_str()) && {
                    let rest = &path[mount.len()..];
                    rest.starts_with('/')
                }
            })
            .map(String::as_str)
    }

    /// Iterate the currently registered mountpoints. Used by cleanup-on-exit
    /// (spec §4.6); order is unspecified.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.mounts.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.mounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mounts.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn insert_remove_contains() {
        let mut reg = MountRegistry::new();
        assert!(!reg.contains("/tmp/m1"));
        assert!(reg.insert("/tmp/m1"));
        assert!(reg.contains("/tmp/m1"));
        assert!(!reg.insert("/tmp/m1"));
        assert!(reg.remove("/tmp/m1"));
        assert!(!reg.contains("/tmp/m1"));
        assert!(!reg.remove("/tmp/m1"));
    }

    #[test]
    fn find_prefix_matches_subpaths() {
        let mut reg = MountRegistry::new();
        reg.insert("/tmp/m1");
        assert_eq!(reg.find_prefix("/tmp/m1"), Some("/tmp/m1"));
        assert_eq!(reg.find_prefix("/tmp/m1/sub"), Some("/tmp/m1"));
        assert_eq!(reg.find_prefix("/tmp/m1sibling"), None);
        assert_eq!(reg.find_prefix("/tmp/other"), None);
    }

    #[test]
    fn find_prefix_empty_registry() {
        let reg = MountRegistry::new();
        assert_eq!(reg.find_prefix("/etc/shadow"), None);
    }
}
