//! `kiln.toml` settings.
//!
//! ```toml
//! version = "3"
//! verbose = false
//! paths = ["app/assets/javascripts", "~/shared/assets"]
//!
//! [cache]
//! dir = "tmp/cache/assets"   # omit for an in-memory cache
//! memory_size = 1000
//! history_depth = 3
//!
//! [export]
//! concurrent = true
//! workers = 4
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use super::DEFAULT_HISTORY_DEPTH;
use crate::error::Error;
use crate::path::normalize_path;

/// Default settings file name.
pub const SETTINGS_FILE: &str = "kiln.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Directory of the settings file (internal use only)
    #[serde(skip)]
    pub root: PathBuf,

    pub version: String,
    /// Print `debug!` output
    pub verbose: bool,
    pub paths: Vec<PathBuf>,
    pub cache: CacheSettings,
    pub export: ExportSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            root: PathBuf::new(),
            version: "1".into(),
            verbose: false,
            paths: Vec::new(),
            cache: CacheSettings::default(),
            export: ExportSettings::default(),
        }
    }
}

/// `[cache]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// On-disk store location; in-memory when absent
    pub dir: Option<PathBuf>,
    /// Entry bound for the in-memory store
    pub memory_size: usize,
    /// Dependency sets remembered per asset
    pub history_depth: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            dir: None,
            memory_size: crate::cache::DEFAULT_MEMORY_SIZE,
            history_depth: DEFAULT_HISTORY_DEPTH,
        }
    }
}

/// `[export]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportSettings {
    /// Export assets in parallel
    pub concurrent: bool,
    /// Worker count, rayon's default when absent
    pub workers: Option<usize>,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            concurrent: true,
            workers: None,
        }
    }
}

impl Settings {
    /// Load settings from a file, resolving paths against its directory.
    pub fn load(path: &Path) -> Result<Self> {
        let content =
            fs::read_to_string(path).map_err(|err| Error::Io(path.to_path_buf(), err))?;
        let (mut settings, unknown) = Self::parse_lenient(&content)
            .with_context(|| format!("invalid settings in {}", path.display()))?;
        if !unknown.is_empty() {
            log!("warning"; "{}: ignoring unknown keys {}", path.display(), unknown.join(", "));
        }

        let root = path.parent().map(normalize_path).unwrap_or_default();
        settings.anchor_paths(&root);
        Ok(settings)
    }

    /// Parse TOML content without touching the filesystem.
    pub fn parse(content: &str) -> Result<Self> {
        Self::parse_lenient(content).map(|(settings, _)| settings)
    }

    /// Deserialize, returning the dotted paths of keys nothing consumed.
    fn parse_lenient(content: &str) -> Result<(Self, Vec<String>)> {
        let mut unknown = Vec::new();
        let settings = serde_ignored::deserialize(toml::Deserializer::new(content), |key| {
            unknown.push(key.to_string());
        })?;
        Ok((settings, unknown))
    }

    /// Make load paths and the cache dir absolute with `~` expanded.
    fn anchor_paths(&mut self, root: &Path) {
        self.root = root.to_path_buf();
        for path in &mut self.paths {
            *path = anchor(path, root);
        }
        if let Some(dir) = &mut self.cache.dir {
            *dir = anchor(dir, root);
        }
    }
}

fn anchor(path: &Path, root: &Path) -> PathBuf {
    let expanded = PathBuf::from(shellexpand::tilde(&path.to_string_lossy()).into_owned());
    if expanded.is_relative() {
        normalize_path(&root.join(expanded))
    } else {
        normalize_path(&expanded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_defaults() {
        let settings = Settings::parse("").unwrap();
        assert_eq!(settings.version, "1");
        assert!(settings.paths.is_empty());
        assert_eq!(settings.cache.history_depth, 3);
        assert!(settings.cache.dir.is_none());
        assert!(settings.export.concurrent);
    }

    #[test]
    fn test_parse_sections() {
        let settings = Settings::parse(
            r#"
            version = "7"
            paths = ["assets", "vendor/assets"]

            [cache]
            memory_size = 50
            history_depth = 5

            [export]
            concurrent = false
            workers = 2
            "#,
        )
        .unwrap();
        assert_eq!(settings.version, "7");
        assert_eq!(settings.paths.len(), 2);
        assert_eq!(settings.cache.memory_size, 50);
        assert_eq!(settings.cache.history_depth, 5);
        assert!(!settings.export.concurrent);
        assert_eq!(settings.export.workers, Some(2));
    }

    #[test]
    fn test_unknown_fields_are_collected() {
        let (_, ignored) = Settings::parse_lenient(
            r#"
            version = "1"
            colour = "blue"
            [cache]
            size = 3
            "#,
        )
        .unwrap();
        assert_eq!(ignored, vec!["colour".to_string(), "cache.size".to_string()]);
    }

    #[test]
    fn test_load_resolves_relative_paths() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("assets")).unwrap();
        let file = dir.path().join(SETTINGS_FILE);
        std::fs::write(&file, "paths = [\"assets\"]\n[cache]\ndir = \"tmp/cache\"\n").unwrap();

        let settings = Settings::load(&file).unwrap();
        let root = normalize_path(dir.path());
        assert_eq!(settings.root, root);
        assert_eq!(settings.paths, vec![root.join("assets")]);
        assert!(settings.cache.dir.unwrap().ends_with("tmp/cache"));
    }

    #[test]
    fn test_load_missing_file() {
        let err = Settings::load(Path::new("/nonexistent/kiln.toml")).unwrap_err();
        assert!(err.to_string().contains("kiln.toml"));
    }
}
