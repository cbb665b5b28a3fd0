//! Filesystem collaborator.
//!
//! The pipeline never touches `std::fs` directly: everything goes through a
//! [`FileSystem`] so callers can swap in a snapshotting or in-memory view.
//!
//! - [`DiskFs`]: plain passthrough to the OS
//! - [`CachedFs`]: memoizes stat/entries/digest lookups for one snapshot

mod cached;
mod disk;

pub use cached::CachedFs;
pub use disk::DiskFs;

use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use rustc_hash::FxHashSet;

use crate::digest::{ContentHash, digest};

/// File kind reported by [`FileSystem::stat`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    File,
    Directory,
}

/// Result of a successful stat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stat {
    pub kind: FileKind,
    pub mtime: Option<SystemTime>,
    pub len: u64,
}

impl Stat {
    #[inline]
    pub fn is_file(&self) -> bool {
        self.kind == FileKind::File
    }

    #[inline]
    pub fn is_dir(&self) -> bool {
        self.kind == FileKind::Directory
    }
}

/// Read-only filesystem view used by the resolver and loader.
///
/// All paths are absolute.
pub trait FileSystem: Send + Sync {
    /// Stat a path, `None` when it does not exist.
    fn stat(&self, path: &Path) -> Option<Stat>;

    /// Read a file's bytes.
    fn read(&self, path: &Path) -> io::Result<Vec<u8>>;

    /// Sorted entry names of a directory, skipping hidden and backup files.
    ///
    /// A missing or unreadable directory has no entries.
    fn entries(&self, dir: &Path) -> Vec<String>;

    /// Path with symlinks resolved, or `path` itself when that fails.
    fn canonicalize(&self, path: &Path) -> PathBuf {
        path.to_path_buf()
    }

    #[inline]
    fn is_directory(&self, path: &Path) -> bool {
        self.stat(path).is_some_and(|s| s.is_dir())
    }

    #[inline]
    fn is_file(&self, path: &Path) -> bool {
        self.stat(path).is_some_and(|s| s.is_file())
    }

    /// Digest a path for dependency tracking.
    ///
    /// Files digest their bytes; directories digest their entry listing so
    /// that adding or removing a file changes the digest. Missing paths
    /// have no digest.
    fn file_digest(&self, path: &Path) -> Option<ContentHash> {
        let stat = self.stat(path)?;
        if stat.is_dir() {
            Some(digest(&self.entries(path)))
        } else {
            self.read(path).ok().map(|bytes| ContentHash::of_bytes(&bytes))
        }
    }

    /// Sorted recursive listing of files (not directories) under `dir`.
    ///
    /// A directory reached twice through symlinks is listed once.
    fn tree(&self, dir: &Path) -> Vec<PathBuf> {
        let mut visited = FxHashSet::default();
        let mut files = Vec::new();
        collect_tree(self, dir, &mut visited, &mut files);
        files
    }
}

fn collect_tree<F: FileSystem + ?Sized>(
    fs: &F,
    dir: &Path,
    visited: &mut FxHashSet<PathBuf>,
    files: &mut Vec<PathBuf>,
) {
    if !visited.insert(fs.canonicalize(dir)) {
        return;
    }
    for name in fs.entries(dir) {
        let path = dir.join(&name);
        match fs.stat(&path) {
            Some(stat) if stat.is_dir() => collect_tree(fs, &path, visited, files),
            Some(_) => files.push(path),
            None => {}
        }
    }
}

/// Hidden files and editor backups are never assets.
pub(crate) fn is_listable(name: &str) -> bool {
    !name.starts_with('.') && !name.ends_with('~')
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_is_listable() {
        assert!(is_listable("app.js"));
        assert!(!is_listable(".DS_Store"));
        assert!(!is_listable("app.js~"));
    }

    #[test]
    fn test_directory_digest_tracks_entries() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.js"), "a").unwrap();

        let fs = DiskFs::new();
        let before = fs.file_digest(dir.path()).unwrap();

        fs::write(dir.path().join("b.js"), "b").unwrap();
        let after = fs.file_digest(dir.path()).unwrap();
        assert_ne!(before, after);
    }

    #[test]
    fn test_file_digest_missing() {
        let fs = DiskFs::new();
        assert!(fs.file_digest(Path::new("/nonexistent/kiln/file.js")).is_none());
    }

    #[test]
    fn test_tree_is_sorted_and_recursive() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("lib/nested")).unwrap();
        fs::write(dir.path().join("z.js"), "").unwrap();
        fs::write(dir.path().join("lib/b.js"), "").unwrap();
        fs::write(dir.path().join("lib/nested/c.js"), "").unwrap();
        fs::write(dir.path().join("a.js"), "").unwrap();

        let tree = DiskFs::new().tree(dir.path());
        let rel: Vec<_> = tree
            .iter()
            .map(|p| p.strip_prefix(dir.path()).unwrap().to_path_buf())
            .collect();
        assert_eq!(
            rel,
            vec![
                PathBuf::from("a.js"),
                PathBuf::from("lib/b.js"),
                PathBuf::from("lib/nested/c.js"),
                PathBuf::from("z.js"),
            ]
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_tree_stops_at_symlink_loops() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("lib")).unwrap();
        fs::write(dir.path().join("lib/a.js"), "").unwrap();
        std::os::unix::fs::symlink(dir.path(), dir.path().join("lib/up")).unwrap();

        let tree = DiskFs::new().tree(dir.path());
        assert_eq!(tree, vec![dir.path().join("lib/a.js")]);
    }
}
