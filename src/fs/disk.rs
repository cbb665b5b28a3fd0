//! Passthrough filesystem backed by `std::fs`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use super::{FileKind, FileSystem, Stat, is_listable};

/// The real filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiskFs;

impl DiskFs {
    pub const fn new() -> Self {
        Self
    }
}

impl FileSystem for DiskFs {
    fn stat(&self, path: &Path) -> Option<Stat> {
        let meta = fs::metadata(path).ok()?;
        let kind = if meta.is_dir() {
            FileKind::Directory
        } else {
            FileKind::File
        };
        Some(Stat {
            kind,
            mtime: meta.modified().ok(),
            len: meta.len(),
        })
    }

    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        fs::read(path)
    }

    fn canonicalize(&self, path: &Path) -> PathBuf {
        fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
    }

    fn entries(&self, dir: &Path) -> Vec<String> {
        let Ok(read_dir) = fs::read_dir(dir) else {
            return Vec::new();
        };
        let mut names: Vec<String> = read_dir
            .filter_map(Result::ok)
            .filter_map(|e| e.file_name().into_string().ok())
            .filter(|name| is_listable(name))
            .collect();
        names.sort();
        names
    }
}
