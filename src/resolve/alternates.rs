//! Alternate candidates from package descriptors.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::fs::FileSystem;
use crate::path::clean_path;
use crate::uri::file_digest_uri;

/// Extra candidate files and the dependencies consulted to find them.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Alternates {
    pub paths: Vec<PathBuf>,
    pub dependencies: BTreeSet<String>,
}

/// Supplies candidates for a logical name beyond plain file matches.
pub trait AlternateSource: Send + Sync {
    fn alternates(&self, fs: &dyn FileSystem, load_path: &Path, logical_name: &str) -> Alternates;
}

/// `package.json` in a same-named directory contributes `main` and `style`.
///
/// A missing `main` falls back to `index.js`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PackageJsonAlternates;

const PACKAGE_FILE: &str = "package.json";

#[derive(Debug, Default, Deserialize)]
struct Package {
    main: Option<serde_json::Value>,
    style: Option<serde_json::Value>,
}

impl AlternateSource for PackageJsonAlternates {
    fn alternates(&self, fs: &dyn FileSystem, load_path: &Path, logical_name: &str) -> Alternates {
        let mut found = Alternates::default();
        let dir = load_path.join(logical_name);
        if !fs.is_directory(&dir) {
            return found;
        }

        let manifest = dir.join(PACKAGE_FILE);
        if !fs.is_file(&manifest) {
            return found;
        }
        found.dependencies.insert(file_digest_uri(&manifest));

        let package: Package = match fs
            .read(&manifest)
            .map_err(anyhow::Error::from)
            .and_then(|bytes| Ok(serde_json::from_slice::<Package>(&bytes)?))
        {
            Ok(package) => package,
            Err(err) => {
                debug!("resolve"; "ignoring {}: {}", manifest.display(), err);
                return found;
            }
        };

        let main = match &package.main {
            Some(serde_json::Value::String(main)) => Some(main.as_str()),
            None | Some(serde_json::Value::Null) => Some("index.js"),
            Some(_) => None,
        };
        let style = match &package.style {
            Some(serde_json::Value::String(style)) => Some(style.as_str()),
            _ => None,
        };

        for entry in [main, style].into_iter().flatten() {
            let path = clean_path(&dir.join(entry));
            if fs.is_file(&path) {
                found.paths.push(path);
            }
        }
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::DiskFs;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_main_and_style() {
        let dir = TempDir::new().unwrap();
        let pkg = dir.path().join("widget");
        fs::create_dir_all(pkg.join("dist")).unwrap();
        fs::write(
            pkg.join("package.json"),
            r#"{"main": "dist/widget.js", "style": "./dist/widget.css"}"#,
        )
        .unwrap();
        fs::write(pkg.join("dist/widget.js"), "").unwrap();
        fs::write(pkg.join("dist/widget.css"), "").unwrap();

        let found = PackageJsonAlternates.alternates(&DiskFs::new(), dir.path(), "widget");
        assert_eq!(
            found.paths,
            vec![pkg.join("dist/widget.js"), pkg.join("dist/widget.css")]
        );
        assert_eq!(found.dependencies.len(), 1);
    }

    #[test]
    fn test_main_defaults_to_index() {
        let dir = TempDir::new().unwrap();
        let pkg = dir.path().join("widget");
        fs::create_dir_all(&pkg).unwrap();
        fs::write(pkg.join("package.json"), "{}").unwrap();
        fs::write(pkg.join("index.js"), "").unwrap();

        let found = PackageJsonAlternates.alternates(&DiskFs::new(), dir.path(), "widget");
        assert_eq!(found.paths, vec![pkg.join("index.js")]);
    }

    #[test]
    fn test_broken_manifest_still_tracked() {
        let dir = TempDir::new().unwrap();
        let pkg = dir.path().join("widget");
        fs::create_dir_all(&pkg).unwrap();
        fs::write(pkg.join("package.json"), "{ nope").unwrap();

        let found = PackageJsonAlternates.alternates(&DiskFs::new(), dir.path(), "widget");
        assert!(found.paths.is_empty());
        assert_eq!(found.dependencies.len(), 1);
    }
}
