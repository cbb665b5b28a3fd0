//! Path helpers shared by the resolver, loader and settings.

use std::path::{Component, Path, PathBuf};

/// Absolute form of `path`: canonical when it exists, else joined onto cwd.
pub fn normalize_path(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| {
        if path.is_absolute() {
            clean_path(path)
        } else {
            std::env::current_dir().map_or_else(|_| path.to_path_buf(), |cwd| clean_path(&cwd.join(path)))
        }
    })
}

/// Lexically remove `.` and `..` components without touching the disk.
pub fn clean_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Load-path relative logical path of `path`, `/`-separated.
///
/// `None` when `path` is not under `base`.
pub fn split_subpath(base: &Path, path: &Path) -> Option<String> {
    let rest = path.strip_prefix(base).ok()?;
    let parts: Vec<_> = rest
        .components()
        .map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect::<Option<_>>()?;
    Some(parts.join("/"))
}

/// Whether `logical` names a path relative to the requesting file.
pub fn is_relative_request(logical: &str) -> bool {
    logical.starts_with("./") || logical.starts_with("../")
}
