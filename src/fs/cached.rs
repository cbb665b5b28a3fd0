//! Snapshot filesystem view with memoized lookups.
//!
//! A `CachedFs` assumes the filesystem does not change for its lifetime.
//! Build a fresh one (via `Environment::cached`) to observe new changes.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;

use super::{FileSystem, Stat};
use crate::digest::ContentHash;

/// Memoizing wrapper around another [`FileSystem`].
pub struct CachedFs {
    inner: Arc<dyn FileSystem>,
    stats: DashMap<PathBuf, Option<Stat>>,
    entries: DashMap<PathBuf, Vec<String>>,
    digests: DashMap<PathBuf, Option<ContentHash>>,
}

impl CachedFs {
    pub fn new(inner: Arc<dyn FileSystem>) -> Self {
        Self {
            inner,
            stats: DashMap::new(),
            entries: DashMap::new(),
            digests: DashMap::new(),
        }
    }

    /// Number of memoized digests.
    pub fn digest_count(&self) -> usize {
        self.digests.len()
    }
}

impl FileSystem for CachedFs {
    fn stat(&self, path: &Path) -> Option<Stat> {
        if let Some(hit) = self.stats.get(path) {
            return *hit;
        }
        let stat = self.inner.stat(path);
        self.stats.insert(path.to_path_buf(), stat);
        stat
    }

    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        self.inner.read(path)
    }

    fn canonicalize(&self, path: &Path) -> PathBuf {
        self.inner.canonicalize(path)
    }

    fn entries(&self, dir: &Path) -> Vec<String> {
        if let Some(hit) = self.entries.get(dir) {
            return hit.clone();
        }
        let entries = self.inner.entries(dir);
        self.entries.insert(dir.to_path_buf(), entries.clone());
        entries
    }

    fn file_digest(&self, path: &Path) -> Option<ContentHash> {
        if let Some(hit) = self.digests.get(path) {
            return *hit;
        }
        let stat = self.stat(path)?;
        let digest = if stat.is_dir() {
            Some(crate::digest::digest(&self.entries(path)))
        } else {
            self.read(path).ok().map(|bytes| ContentHash::of_bytes(&bytes))
        };
        self.digests.insert(path.to_path_buf(), digest);
        digest
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::DiskFs;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_snapshot_ignores_later_writes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.js");
        fs::write(&path, "one").unwrap();

        let cached = CachedFs::new(Arc::new(DiskFs::new()));
        let first = cached.file_digest(&path).unwrap();

        fs::write(&path, "two").unwrap();
        assert_eq!(cached.file_digest(&path), Some(first));
        assert_eq!(cached.digest_count(), 1);

        // A fresh snapshot sees the change
        let fresh = CachedFs::new(Arc::new(DiskFs::new()));
        assert_ne!(fresh.file_digest(&path), Some(first));
    }

    #[test]
    fn test_missing_paths_are_memoized() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("late.js");

        let cached = CachedFs::new(Arc::new(DiskFs::new()));
        assert!(cached.stat(&path).is_none());

        fs::write(&path, "x").unwrap();
        assert!(cached.stat(&path).is_none());
    }
}
