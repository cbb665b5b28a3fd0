//! Path resolution.
//!
//! Turns a request (`"app"`, `"app.debug.js"`, `"./lib/util"`, an absolute
//! path or an asset URI) into a concrete file, the content type it will be
//! served as, and the set of filesystem dependencies consulted on the way.
//!
//! For a logical request each load path is searched in order. Within one
//! load path three candidate groups are gathered, in this order:
//!
//! 1. files next to the request sharing its base name (`app.js`, `app.coffee`)
//! 2. alternates from package descriptors (`app/package.json` → `main`)
//! 3. index files in a same-named directory (`app/index.js`)
//!
//! The candidate with the best accept-quality match wins, ties going to the
//! earlier candidate. The accept list is widened with every type that can
//! be transformed into an accepted type, so `app.js` also matches
//! `app.coffee`.

mod alternates;

pub use alternates::{AlternateSource, Alternates, PackageJsonAlternates};

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::fs::FileSystem;
use crate::mime::{ANY, AcceptList, find_best_q_match, match_mime_type, parse_q_values, types};
use crate::path::{clean_path, is_relative_request, split_subpath};
use crate::uri::{AssetUri, file_digest_uri};

/// Optional resolution parameters.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResolveOptions<'a> {
    /// Accept header, e.g. `"application/javascript"` or `"text/css, */*;q=0.5"`
    pub accept: Option<&'a str>,
    /// Pipeline to record in the URI (overrides a `.name` extension)
    pub pipeline: Option<&'a str>,
    /// Directory relative requests are resolved from
    pub base_path: Option<&'a Path>,
}

impl<'a> ResolveOptions<'a> {
    pub fn accept(accept: &'a str) -> Self {
        Self {
            accept: Some(accept),
            ..Self::default()
        }
    }

    pub fn with_pipeline(mut self, pipeline: &'a str) -> Self {
        self.pipeline = Some(pipeline);
        self
    }

    pub fn with_base_path(mut self, base_path: &'a Path) -> Self {
        self.base_path = Some(base_path);
        self
    }
}

/// A successful resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub uri: AssetUri,
    pub filename: PathBuf,
    /// Type the asset will be served as
    pub content_type: String,
    pub pipeline: Option<String>,
    /// Directory path an `index.*` match stands in for
    pub index_alias: Option<PathBuf>,
    /// Dependency URIs of every file and directory consulted
    pub dependencies: BTreeSet<String>,
}

#[derive(Debug, Clone)]
struct Candidate {
    filename: PathBuf,
    /// Type of the file itself
    file_type: String,
    index_alias: Option<PathBuf>,
}

struct Found {
    candidate: Candidate,
    content_type: String,
    pipeline: Option<String>,
}

/// Resolver over one config and filesystem view.
pub struct Resolver<'a> {
    config: &'a Config,
    fs: &'a dyn FileSystem,
}

impl<'a> Resolver<'a> {
    pub fn new(config: &'a Config, fs: &'a dyn FileSystem) -> Self {
        Self { config, fs }
    }

    /// Resolve a request to a file, failing with `FileNotFound`.
    pub fn resolve(&self, path: &str, options: ResolveOptions<'_>) -> Result<Resolution> {
        let mut deps = BTreeSet::new();

        let found = if path.starts_with("file://") {
            self.resolve_uri(path, &mut deps)?
        } else if Path::new(path).is_absolute() {
            self.resolve_absolute(Path::new(path), options.accept, &mut deps)?
        } else if is_relative_request(path) {
            self.resolve_relative(path, options, &mut deps)?
        } else {
            self.resolve_logical(self.config.load_paths(), path, options.accept, &mut deps)
        };

        let Some(found) = found else {
            debug!("resolve"; "{} not found ({} dependencies checked)", path, deps.len());
            return Err(Error::FileNotFound {
                path: path.to_string(),
                accept: options.accept.unwrap_or(ANY).to_string(),
                paths: self.config.load_paths().to_vec(),
            });
        };

        let pipeline = options.pipeline.map(String::from).or(found.pipeline);
        let Candidate {
            filename,
            index_alias,
            ..
        } = found.candidate;
        let uri = AssetUri::new(&filename)
            .with_type(found.content_type.clone())
            .with_pipeline(pipeline.clone())
            .with_index_alias(index_alias.clone());

        Ok(Resolution {
            uri,
            filename,
            content_type: found.content_type,
            pipeline,
            index_alias,
            dependencies: deps,
        })
    }

    /// Type of a file from its extension, octet-stream when unregistered.
    pub fn file_type(&self, path: &Path) -> String {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy())
            .unwrap_or_default();
        self.config
            .mime()
            .match_extension(&name)
            .map_or(types::OCTET_STREAM, |(_, ty)| ty)
            .to_string()
    }

    /// Every file under every load path with its logical path.
    ///
    /// A logical path provided by an earlier load path shadows later ones.
    pub fn logical_paths(&self) -> Vec<(String, PathBuf)> {
        let mut seen = BTreeSet::new();
        let mut paths = Vec::new();
        for load_path in self.config.load_paths() {
            for file in self.fs.tree(load_path) {
                if let Some(logical) = split_subpath(load_path, &file)
                    && seen.insert(logical.clone())
                {
                    paths.push((logical, file));
                }
            }
        }
        paths
    }

    // =========================================================================
    // Request kinds
    // =========================================================================

    fn resolve_uri(&self, uri: &str, deps: &mut BTreeSet<String>) -> Result<Option<Found>> {
        let uri = AssetUri::parse(uri)?;
        if !self.fs.is_file(&uri.path) {
            return Ok(None);
        }
        deps.insert(file_digest_uri(&uri.path));
        let file_type = self.file_type(&uri.path);
        Ok(Some(Found {
            content_type: uri.content_type.clone().unwrap_or_else(|| file_type.clone()),
            pipeline: uri.pipeline.clone(),
            candidate: Candidate {
                filename: uri.path,
                file_type,
                index_alias: uri.index_alias,
            },
        }))
    }

    fn resolve_absolute(
        &self,
        path: &Path,
        accept: Option<&str>,
        deps: &mut BTreeSet<String>,
    ) -> Result<Option<Found>> {
        let filename = clean_path(path);
        if self.config.load_path_for(&filename).is_none() {
            return Err(Error::OutsideLoadPaths { path: filename });
        }
        if !self.fs.is_file(&filename) {
            return Ok(None);
        }

        let file_type = self.file_type(&filename);
        let content_type = match accept {
            None => file_type.clone(),
            Some(accept) => {
                let parsed = parse_q_values(accept);
                match self.resolve_transform_type(&file_type, &parsed) {
                    Some(ty) => ty,
                    None => {
                        return Err(Error::ContentTypeMismatch {
                            path: filename,
                            actual: file_type,
                            expected: accept.to_string(),
                        });
                    }
                }
            }
        };

        deps.insert(file_digest_uri(&filename));
        Ok(Some(Found {
            candidate: Candidate {
                filename,
                file_type,
                index_alias: None,
            },
            content_type,
            pipeline: None,
        }))
    }

    fn resolve_relative(
        &self,
        path: &str,
        options: ResolveOptions<'_>,
        deps: &mut BTreeSet<String>,
    ) -> Result<Option<Found>> {
        let Some(base) = options.base_path else {
            return Ok(None);
        };
        let target = clean_path(&base.join(path));
        let load_path = self
            .config
            .load_path_for(base)
            .ok_or_else(|| Error::OutsideLoadPaths {
                path: base.to_path_buf(),
            })?;
        let logical = split_subpath(load_path, &target)
            .filter(|l| !l.is_empty())
            .ok_or_else(|| Error::OutsideLoadPaths {
                path: target.clone(),
            })?;

        let load_paths = [load_path.to_path_buf()];
        Ok(self.resolve_logical(&load_paths, &logical, options.accept, deps))
    }

    fn resolve_logical(
        &self,
        load_paths: &[PathBuf],
        logical_path: &str,
        accept: Option<&str>,
        deps: &mut BTreeSet<String>,
    ) -> Option<Found> {
        let mime = self.config.mime();

        let (mut name, ext_type) = match mime.match_extension(logical_path) {
            Some((ext, ty)) => (&logical_path[..logical_path.len() - ext.len()], Some(ty)),
            None => (logical_path, None),
        };

        let mut pipeline = None;
        for candidate in self.config.pipeline_names() {
            if let Some(stem) = name.strip_suffix(candidate).and_then(|s| s.strip_suffix('.'))
                && !stem.is_empty()
            {
                name = stem;
                pipeline = Some(candidate.to_string());
                break;
            }
        }

        let parsed = parse_accept(ext_type, accept);
        if parsed.is_empty() {
            return None;
        }
        let expanded = self.config.transformers().expand(&parsed);

        for load_path in load_paths {
            let candidates = self.path_matches(load_path, name, deps);
            let Some(best) = find_best_q_match(&expanded, &candidates, |c| c.file_type.as_str())
            else {
                continue;
            };
            let content_type = self
                .resolve_transform_type(&best.file_type, &parsed)
                .unwrap_or_else(|| best.file_type.clone());
            return Some(Found {
                candidate: best.clone(),
                content_type,
                pipeline,
            });
        }
        None
    }

    // =========================================================================
    // Candidate discovery
    // =========================================================================

    fn path_matches(
        &self,
        load_path: &Path,
        logical_name: &str,
        deps: &mut BTreeSet<String>,
    ) -> Vec<Candidate> {
        let path = load_path.join(logical_name);
        let mut candidates = Vec::new();

        if let (Some(dir), Some(basename)) = (path.parent(), path.file_name()) {
            let basename = basename.to_string_lossy();
            candidates.extend(self.dirname_matches(dir, &basename, deps));
        }

        for source in self.config.alternates() {
            let alternates = source.alternates(self.fs, load_path, logical_name);
            deps.extend(alternates.dependencies);
            candidates.extend(alternates.paths.into_iter().map(|filename| Candidate {
                file_type: self.file_type(&filename),
                filename,
                index_alias: None,
            }));
        }

        if self.fs.is_directory(&path) {
            let index = self.dirname_matches(&path, "index", deps);
            candidates.extend(index.into_iter().map(|mut candidate| {
                let ext = self.extension_of(&candidate.filename, "index");
                candidate.index_alias = Some(PathBuf::from(format!("{}{ext}", path.display())));
                candidate
            }));
        }

        candidates
    }

    /// Files in `dir` named `basename` plus a registered extension (or nothing).
    fn dirname_matches(
        &self,
        dir: &Path,
        basename: &str,
        deps: &mut BTreeSet<String>,
    ) -> Vec<Candidate> {
        deps.insert(file_digest_uri(dir));
        let mime = self.config.mime();

        let mut matches: Vec<(usize, Candidate)> = Vec::new();
        for entry in self.fs.entries(dir) {
            if !entry.starts_with(basename) {
                continue;
            }
            let (rank, file_type) = match mime.match_extension(&entry) {
                Some((ext, ty)) if entry.len() - ext.len() == basename.len() => {
                    (mime.extension_rank(ext), ty.to_string())
                }
                _ if entry == basename => (usize::MAX, types::OCTET_STREAM.to_string()),
                _ => continue,
            };
            let filename = dir.join(&entry);
            if !self.fs.is_file(&filename) {
                continue;
            }
            matches.push((
                rank,
                Candidate {
                    filename,
                    file_type,
                    index_alias: None,
                },
            ));
        }
        matches.sort_by_key(|(rank, _)| *rank);
        matches.into_iter().map(|(_, c)| c).collect()
    }

    /// The extension of `filename` after `basename`, e.g. `.js` for `index.js`.
    fn extension_of(&self, filename: &Path, basename: &str) -> String {
        filename
            .file_name()
            .map(|n| n.to_string_lossy())
            .and_then(|n| n.strip_prefix(basename).map(str::to_string))
            .unwrap_or_default()
    }

    /// The type a file of `file_type` will be served as under `accept`.
    ///
    /// The file's own type is preferred, then each type it transforms into.
    fn resolve_transform_type(&self, file_type: &str, accept: &[(String, f64)]) -> Option<String> {
        let mut candidates = vec![file_type];
        candidates.extend(self.config.transformers().targets(file_type));
        find_best_q_match(accept, &candidates, |c| *c).map(|c| (*c).to_string())
    }
}

/// Accept list for a request whose extension may already imply a type.
fn parse_accept(ext_type: Option<&str>, accept: Option<&str>) -> AcceptList {
    let mut list = AcceptList::new();
    match (ext_type, accept) {
        (Some(ty), None) => list.push((ty.to_string(), 1.0)),
        (Some(ty), Some(accept)) => {
            if parse_q_values(accept)
                .iter()
                .any(|(matcher, _)| match_mime_type(ty, matcher))
            {
                list.push((ty.to_string(), 1.0));
            }
        }
        (None, None) => list.push((ANY.to_string(), 1.0)),
        (None, Some(accept)) => list = parse_q_values(accept),
    }
    list
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::DiskFs;
    use crate::processor::{ProcessorOutput, processor_fn};
    use std::fs;
    use tempfile::TempDir;

    const COFFEE: &str = "text/coffeescript";

    fn config(dir: &Path) -> Config {
        Config::default()
            .with_load_path(dir)
            .with_mime_type(COFFEE, &[".coffee"], true)
            .with_transformer(
                COFFEE,
                types::JAVASCRIPT,
                processor_fn("coffee", |_| Ok(ProcessorOutput::unchanged())),
            )
    }

    fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_accept_expansion_finds_coffee() {
        let dir = TempDir::new().unwrap();
        let source = write(dir.path(), "app.coffee", "alert 1");
        let config = config(dir.path());
        let resolver = Resolver::new(&config, &DiskFs);

        let found = resolver
            .resolve("app", ResolveOptions::accept(types::JAVASCRIPT))
            .unwrap();
        assert_eq!(found.filename, source);
        assert_eq!(found.content_type, types::JAVASCRIPT);
        assert_eq!(found.uri.content_type.as_deref(), Some(types::JAVASCRIPT));
        assert!(found.dependencies.contains(&file_digest_uri(dir.path())));

        // Same via the extension
        let found = resolver.resolve("app.js", ResolveOptions::default()).unwrap();
        assert_eq!(found.filename, source);
    }

    #[test]
    fn test_exact_type_beats_transformable() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "app.coffee", "alert 1");
        let js = write(dir.path(), "app.js", "alert(1)");
        let config = config(dir.path());
        let resolver = Resolver::new(&config, &DiskFs);

        let found = resolver.resolve("app.js", ResolveOptions::default()).unwrap();
        assert_eq!(found.filename, js);
    }

    #[test]
    fn test_no_accept_keeps_source_type() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "app.coffee", "alert 1");
        let config = config(dir.path());
        let resolver = Resolver::new(&config, &DiskFs);

        let found = resolver.resolve("app", ResolveOptions::default()).unwrap();
        assert_eq!(found.content_type, COFFEE);
    }

    #[test]
    fn test_conflicting_accept_is_not_found() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "app.js", "");
        let config = config(dir.path());
        let resolver = Resolver::new(&config, &DiskFs);

        let err = resolver
            .resolve("app.js", ResolveOptions::accept(types::CSS))
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(err.to_string().contains(&dir.path().display().to_string()));
    }

    #[test]
    fn test_load_paths_searched_in_order() {
        let first = TempDir::new().unwrap();
        let second = TempDir::new().unwrap();
        write(second.path(), "lib.js", "second");
        let config = config(first.path()).with_load_path(second.path());
        let resolver = Resolver::new(&config, &DiskFs);

        let found = resolver.resolve("lib.js", ResolveOptions::default()).unwrap();
        assert!(found.filename.starts_with(second.path()));
        // The miss in the first load path is still a dependency
        assert!(found.dependencies.contains(&file_digest_uri(first.path())));

        let winner = write(first.path(), "lib.js", "first");
        let found = resolver.resolve("lib.js", ResolveOptions::default()).unwrap();
        assert_eq!(found.filename, winner);
    }

    #[test]
    fn test_index_alias() {
        let dir = TempDir::new().unwrap();
        let index = write(dir.path(), "widget/index.js", "");
        let config = config(dir.path());
        let resolver = Resolver::new(&config, &DiskFs);

        let found = resolver.resolve("widget.js", ResolveOptions::default()).unwrap();
        assert_eq!(found.filename, index);
        assert_eq!(found.index_alias, Some(dir.path().join("widget.js")));
        assert_eq!(found.uri.index_alias, found.index_alias);
    }

    #[test]
    fn test_same_directory_match_beats_index() {
        let dir = TempDir::new().unwrap();
        let direct = write(dir.path(), "widget.js", "");
        write(dir.path(), "widget/index.js", "");
        let config = config(dir.path());
        let resolver = Resolver::new(&config, &DiskFs);

        let found = resolver.resolve("widget", ResolveOptions::accept(types::JAVASCRIPT)).unwrap();
        assert_eq!(found.filename, direct);
        assert!(found.index_alias.is_none());
    }

    #[test]
    fn test_package_json_alternates() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "widget/package.json", r#"{"main": "lib/w.js", "style": "w.css"}"#);
        let main = write(dir.path(), "widget/lib/w.js", "");
        let style = write(dir.path(), "widget/w.css", "");
        let config = config(dir.path());
        let resolver = Resolver::new(&config, &DiskFs);

        let js = resolver.resolve("widget", ResolveOptions::accept(types::JAVASCRIPT)).unwrap();
        assert_eq!(js.filename, main);
        let css = resolver.resolve("widget", ResolveOptions::accept(types::CSS)).unwrap();
        assert_eq!(css.filename, style);
    }

    #[test]
    fn test_pipeline_extension() {
        let dir = TempDir::new().unwrap();
        let app = write(dir.path(), "app.js", "");
        let config = config(dir.path());
        let resolver = Resolver::new(&config, &DiskFs);

        let found = resolver.resolve("app.debug.js", ResolveOptions::default()).unwrap();
        assert_eq!(found.filename, app);
        assert_eq!(found.pipeline.as_deref(), Some("debug"));

        let found = resolver
            .resolve("app.debug.js", ResolveOptions::default().with_pipeline("self"))
            .unwrap();
        assert_eq!(found.pipeline.as_deref(), Some("self"));
    }

    #[test]
    fn test_relative_requests() {
        let dir = TempDir::new().unwrap();
        let util = write(dir.path(), "shared/util.js", "");
        let base = dir.path().join("app");
        fs::create_dir_all(&base).unwrap();
        let config = config(dir.path());
        let resolver = Resolver::new(&config, &DiskFs);

        let options = ResolveOptions::accept(types::JAVASCRIPT).with_base_path(&base);
        let found = resolver.resolve("../shared/util", options).unwrap();
        assert_eq!(found.filename, util);

        let err = resolver.resolve("../../etc/passwd", options).unwrap_err();
        assert!(matches!(err, Error::OutsideLoadPaths { .. }));
    }

    #[test]
    fn test_absolute_paths() {
        let dir = TempDir::new().unwrap();
        let app = write(dir.path(), "app.coffee", "");
        let config = config(dir.path());
        let resolver = Resolver::new(&config, &DiskFs);

        let path = app.to_string_lossy();
        let found = resolver
            .resolve(&path, ResolveOptions::accept(types::JAVASCRIPT))
            .unwrap();
        assert_eq!(found.content_type, types::JAVASCRIPT);

        let err = resolver.resolve(&path, ResolveOptions::accept(types::CSS)).unwrap_err();
        assert!(matches!(err, Error::ContentTypeMismatch { .. }));

        let err = resolver.resolve("/definitely/elsewhere.js", ResolveOptions::default()).unwrap_err();
        assert!(matches!(err, Error::OutsideLoadPaths { .. }));
    }

    #[test]
    fn test_uri_requests_roundtrip() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "app.js", "");
        let config = config(dir.path());
        let resolver = Resolver::new(&config, &DiskFs);

        let first = resolver.resolve("app.self.js", ResolveOptions::default()).unwrap();
        let again = resolver
            .resolve(&first.uri.to_string(), ResolveOptions::default())
            .unwrap();
        assert_eq!(again.uri, first.uri);
    }

    #[test]
    fn test_unknown_extension_and_logical_paths() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "CNAME", "example.com");
        write(dir.path(), "app.js", "");
        write(dir.path(), "nested/a.css", "");
        let config = config(dir.path());
        let resolver = Resolver::new(&config, &DiskFs);

        let found = resolver.resolve("CNAME", ResolveOptions::default()).unwrap();
        assert_eq!(found.content_type, types::OCTET_STREAM);

        let logical: Vec<String> = resolver.logical_paths().into_iter().map(|(l, _)| l).collect();
        assert_eq!(logical, vec!["CNAME", "app.js", "nested/a.css"]);
    }
}
