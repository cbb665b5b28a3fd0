//! On-disk store.
//!
//! Each entry is one file at `<root>/<key[..2]>/<key>.json`. Writes go to a
//! temporary sibling first and are renamed into place, so readers never see
//! a torn file.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use super::CacheStore;

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let shard = key.get(..2).unwrap_or("__");
        self.root.join(shard).join(format!("{key}.json"))
    }

    fn write(&self, path: &Path, value: &str) -> io::Result<()> {
        let dir = path.parent().unwrap_or(&self.root);
        fs::create_dir_all(dir)?;

        let unique = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        let temp = dir.join(format!(".tmp-{}-{unique}", std::process::id()));
        fs::write(&temp, value)?;
        fs::rename(&temp, path).inspect_err(|_| {
            fs::remove_file(&temp).ok();
        })
    }
}

impl CacheStore for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        fs::read_to_string(self.path_for(key)).ok()
    }

    fn set(&self, key: &str, value: String) {
        let path = self.path_for(key);
        if let Err(err) = self.write(&path, &value) {
            debug!("cache"; "failed to write {}: {}", path.display(), err);
        }
    }
}
