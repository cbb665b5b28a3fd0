//! Environments and the asset loader.
//!
//! An [`Environment`] owns the live configuration and the filesystem and
//! cache collaborators. Every lookup goes through a [`CachedEnvironment`]:
//! an immutable snapshot that memoizes stats, digests, processor lists and
//! loaded assets, and assumes nothing on disk changes while it is alive.
//!
//! # Cache layout
//!
//! | Key                                          | Value                  |
//! |----------------------------------------------|------------------------|
//! | `asset-uri:<uri with id>`                    | the [`Asset`]          |
//! | `asset-uri-digest:<uri>:<dependencies hex>`  | URI with id            |
//! | `asset-uri-cache-dependencies:<uri>:<file>`  | [`DependencyHistory`]  |
//!
//! Loading a URI without an id walks its dependency history, most recently
//! hit first. The first remembered set whose current digest leads to a
//! stored asset wins and is promoted. Otherwise the asset is built from
//! source and its dependency set pushed onto the history.

use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwap;
use dashmap::DashMap;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::asset::{Asset, Metadata};
use crate::cache::{
    Cache, CacheStore, DEFAULT_MEMORY_SIZE, DependencyHistory, FileStore, MemoryStore,
};
use crate::config::{Config, Settings};
use crate::digest::{ContentHash, digest, hexdigest};
use crate::error::{Error, Result};
use crate::fs::{CachedFs, DiskFs, FileSystem};
use crate::mime::ANY;
use crate::path::split_subpath;
use crate::processor::ProcessorRef;
use crate::processor::executor::{self, Context};
use crate::resolve::{Resolution, ResolveOptions, Resolver};
use crate::uri::{AssetUri, DependencyUri, file_digest_uri, processors_uri};


// =============================================================================
// Environment
// =============================================================================

/// Live configuration plus collaborators.
pub struct Environment {
    config: ArcSwap<Config>,
    fs: Arc<dyn FileSystem>,
    store: Arc<dyn CacheStore>,
}

impl Environment {
    /// Environment over the real filesystem with an in-memory cache.
    pub fn new(config: Config) -> Self {
        Self {
            config: ArcSwap::from_pointee(config),
            fs: Arc::new(DiskFs::new()),
            store: Arc::new(MemoryStore::new(DEFAULT_MEMORY_SIZE)),
        }
    }

    /// Environment described by loaded settings.
    ///
    /// A configured cache directory selects the file store, otherwise
    /// entries are kept in memory.
    pub fn from_settings(settings: &Settings) -> Self {
        crate::logger::set_verbose(settings.verbose);
        let store: Arc<dyn CacheStore> = match &settings.cache.dir {
            Some(dir) => Arc::new(FileStore::new(dir)),
            None => Arc::new(MemoryStore::new(settings.cache.memory_size)),
        };
        Self::new(Config::from_settings(settings)).with_cache_store(store)
    }

    /// Load `kiln.toml` (or any settings file) and build an environment.
    pub fn load_settings(path: &Path) -> anyhow::Result<Self> {
        let settings = Settings::load(path)?;
        Ok(Self::from_settings(&settings))
    }

    pub fn with_fs(mut self, fs: Arc<dyn FileSystem>) -> Self {
        self.fs = fs;
        self
    }

    pub fn with_cache_store(mut self, store: Arc<dyn CacheStore>) -> Self {
        self.store = store;
        self
    }

    /// Current configuration.
    #[inline]
    pub fn config(&self) -> Arc<Config> {
        self.config.load_full()
    }

    /// Replace the configuration with `f(current)`.
    ///
    /// Snapshots taken before the call keep the old configuration.
    pub fn configure<F>(&self, f: F)
    where
        F: FnOnce(&Config) -> Config,
    {
        let next = f(&self.config.load());
        self.config.store(Arc::new(next));
    }

    /// Snapshot of the current configuration and filesystem.
    pub fn cached(&self) -> CachedEnvironment {
        CachedEnvironment::new(self.config(), Arc::clone(&self.fs), Arc::clone(&self.store))
    }

    pub fn resolve(&self, path: &str, options: ResolveOptions<'_>) -> Result<Resolution> {
        self.cached().resolve(path, options)
    }

    pub fn load(&self, uri: &AssetUri) -> Result<Arc<Asset>> {
        self.cached().load(uri)
    }

    pub fn find_asset(&self, path: &str, options: ResolveOptions<'_>) -> Result<Option<Arc<Asset>>> {
        self.cached().find_asset(path, options)
    }

    pub fn find_all_linked_assets(
        &self,
        path: &str,
        options: ResolveOptions<'_>,
    ) -> Result<Vec<Arc<Asset>>> {
        self.cached().find_all_linked_assets(path, options)
    }

    pub fn logical_paths(&self) -> Vec<(String, PathBuf)> {
        self.cached().logical_paths()
    }
}

// =============================================================================
// Cached environment
// =============================================================================

type ChainKey = (String, String, String);

/// Immutable snapshot used for one batch of lookups.
pub struct CachedEnvironment {
    config: Arc<Config>,
    fs: CachedFs,
    cache: Cache,
    loaded: DashMap<AssetUri, Arc<Asset>>,
    chains: DashMap<ChainKey, Vec<ProcessorRef>>,
}

impl CachedEnvironment {
    pub fn new(config: Arc<Config>, fs: Arc<dyn FileSystem>, store: Arc<dyn CacheStore>) -> Self {
        let cache = Cache::new(store, config.version());
        Self {
            config,
            fs: CachedFs::new(fs),
            cache,
            loaded: DashMap::new(),
            chains: DashMap::new(),
        }
    }

    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[inline]
    pub fn fs(&self) -> &CachedFs {
        &self.fs
    }

    /// Read a file through the snapshot's filesystem.
    pub fn read_file(&self, path: &Path) -> Result<Vec<u8>> {
        self.fs
            .read(path)
            .map_err(|err| Error::Io(path.to_path_buf(), err))
    }

    pub fn resolve(&self, path: &str, options: ResolveOptions<'_>) -> Result<Resolution> {
        Resolver::new(&self.config, &self.fs).resolve(path, options)
    }

    pub fn logical_paths(&self) -> Vec<(String, PathBuf)> {
        Resolver::new(&self.config, &self.fs).logical_paths()
    }

    /// Resolve and load, `None` when nothing matches.
    pub fn find_asset(&self, path: &str, options: ResolveOptions<'_>) -> Result<Option<Arc<Asset>>> {
        match self.resolve(path, options) {
            Ok(resolution) => self.load(&resolution.uri).map(Some),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// The asset at `path` followed by everything it links, transitively.
    ///
    /// Fails with [`Error::DoubleLink`] when two different files would be
    /// exported under the same logical path.
    pub fn find_all_linked_assets(
        &self,
        path: &str,
        options: ResolveOptions<'_>,
    ) -> Result<Vec<Arc<Asset>>> {
        let Some(parent) = self.find_asset(path, options)? else {
            return Ok(Vec::new());
        };

        let mut assets = vec![Arc::clone(&parent)];
        let mut visited: FxHashSet<AssetUri> = FxHashSet::default();
        visited.insert(parent.uri.clone());
        let mut linked_paths: FxHashMap<String, PathBuf> = FxHashMap::default();
        let mut stack: Vec<AssetUri> = parent.links().rev().cloned().collect();

        while let Some(uri) = stack.pop() {
            let asset = self.load(&uri)?;
            if !visited.insert(asset.uri.clone()) {
                continue;
            }
            if let Some(previous) = linked_paths.get(&asset.logical_path)
                && previous != &asset.filename
            {
                return Err(Error::DoubleLink {
                    parent: parent.filename.clone(),
                    logical_path: asset.logical_path.clone(),
                    first: previous.clone(),
                    second: asset.filename.clone(),
                });
            }
            linked_paths.insert(asset.logical_path.clone(), asset.filename.clone());
            stack.extend(asset.links().rev().cloned());
            assets.push(asset);
        }
        Ok(assets)
    }

    /// Processor list for a pipeline, memoized per snapshot.
    pub fn processors_for(
        &self,
        content_type: &str,
        file_type: &str,
        pipeline: &str,
    ) -> Result<Vec<ProcessorRef>> {
        let key = (content_type.to_string(), file_type.to_string(), pipeline.to_string());
        if let Some(hit) = self.chains.get(&key) {
            return Ok(hit.value().clone());
        }
        let processors = self.config.processors_for(content_type, file_type, pipeline)?;
        self.chains.insert(key, processors.clone());
        Ok(processors)
    }

    /// Current digest of a dependency URI.
    pub fn resolve_dependency(&self, uri: &str) -> Result<ContentHash> {
        Ok(match DependencyUri::parse(uri)? {
            DependencyUri::FileDigest(path) => self
                .fs
                .file_digest(&path)
                .unwrap_or_else(|| digest(&Option::<String>::None)),
            DependencyUri::EnvironmentVersion => digest(self.config.version()),
            DependencyUri::EnvironmentPaths => digest(self.config.load_paths()),
            DependencyUri::Processors {
                content_type,
                file_type,
                pipeline,
            } => {
                let keys: Vec<String> = self
                    .processors_for(&content_type, &file_type, &pipeline)?
                    .iter()
                    .map(|p| p.cache_key())
                    .collect();
                digest(&keys)
            }
        })
    }

    fn dependencies_digest<'a, I>(&self, dependencies: I) -> Result<ContentHash>
    where
        I: IntoIterator<Item = &'a String>,
    {
        let digests = dependencies
            .into_iter()
            .map(|uri| self.resolve_dependency(uri))
            .collect::<Result<Vec<_>>>()?;
        Ok(digest(&digests))
    }

    // =========================================================================
    // Loading
    // =========================================================================

    /// Load an asset, from the snapshot memo, the cache, or its source.
    pub fn load(&self, uri: &AssetUri) -> Result<Arc<Asset>> {
        if let Some(hit) = self.loaded.get(uri) {
            return Ok(Arc::clone(&hit));
        }

        let _guard = LoadGuard::enter(uri)?;
        let asset = Arc::new(if uri.id.is_some() {
            self.load_with_id(uri)?
        } else {
            self.load_without_id(uri)?
        });
        self.loaded.insert(uri.clone(), Arc::clone(&asset));
        Ok(asset)
    }

    fn load_with_id(&self, uri: &AssetUri) -> Result<Asset> {
        if let Some(asset) = self.cache.get::<Asset>(&format!("asset-uri:{uri}")) {
            return Ok(asset);
        }

        let asset = self.load_without_id(&uri.without_id())?;
        if asset.uri.id != uri.id {
            log!(
                "warning";
                "{} was requested as {} but rebuilt as {}; cache and config versions may disagree",
                asset.logical_path,
                uri.id.as_deref().unwrap_or_default(),
                asset.id()
            );
        }
        Ok(asset)
    }

    fn load_without_id(&self, uri: &AssetUri) -> Result<Asset> {
        let file_digest = self
            .fs
            .file_digest(&uri.path)
            .ok_or_else(|| self.not_found(uri))?;
        let history_key = format!("asset-uri-cache-dependencies:{uri}:{}", file_digest.to_hex());
        let depth = self.config.history_depth();
        let mut history = self
            .cache
            .get::<DependencyHistory>(&history_key)
            .map_or_else(|| DependencyHistory::new(depth), |h| h.with_depth(depth));

        let mut hit = None;
        for (index, dependencies) in history.iter().enumerate() {
            if let Some(asset) = self.lookup_by_dependencies(uri, dependencies) {
                hit = Some((index, asset));
                break;
            }
        }

        if let Some((index, asset)) = hit {
            debug!("cache"; "hit {} (history entry {})", asset.logical_path, index);
            if history.promote(index) {
                self.cache.set(&history_key, &history);
            }
            return Ok(asset);
        }

        let asset = self.load_from_source(uri)?;
        debug!("cache"; "built {} ({})", asset.logical_path, asset.digest);

        self.cache.set(&format!("asset-uri:{}", asset.uri), &asset);
        self.cache.set(
            &format!("asset-uri-digest:{uri}:{}", asset.dependencies_digest.to_hex()),
            &asset.uri.to_string(),
        );
        history.push(asset.metadata.dependencies.iter().cloned().collect());
        self.cache.set(&history_key, &history);
        Ok(asset)
    }

    /// Stored asset for a remembered dependency set whose digest still matches.
    fn lookup_by_dependencies(&self, uri: &AssetUri, dependencies: &[String]) -> Option<Asset> {
        // A dependency that no longer resolves just means this entry is stale
        let digest = self.dependencies_digest(dependencies).ok()?;
        let stored: String = self
            .cache
            .get(&format!("asset-uri-digest:{uri}:{}", digest.to_hex()))?;
        let stored = AssetUri::parse(&stored).ok()?;
        self.cache.get(&format!("asset-uri:{stored}"))
    }

    fn load_from_source(&self, uri: &AssetUri) -> Result<Asset> {
        let filename = uri.path.as_path();
        let load_path = self
            .config
            .load_path_for(filename)
            .ok_or_else(|| Error::OutsideLoadPaths {
                path: filename.to_path_buf(),
            })?
            .to_path_buf();
        if !self.fs.is_file(filename) {
            return Err(self.not_found(uri));
        }

        let resolver = Resolver::new(&self.config, &self.fs);
        let file_type = resolver.file_type(filename);
        let content_type = uri.content_type.clone().unwrap_or_else(|| file_type.clone());
        let pipeline = uri.pipeline_name();
        let name = self.logical_name(&load_path, uri);

        let chain = self.processors_for(&content_type, &file_type, pipeline)?;
        let mut metadata = Metadata {
            dependencies: self.config.dependencies().clone(),
            ..Metadata::default()
        };
        metadata
            .dependencies
            .insert(processors_uri(&content_type, &file_type, pipeline));

        let source = if chain.is_empty() {
            metadata.dependencies.insert(file_digest_uri(filename));
            self.read_file(filename)?
        } else {
            let ctx = Context {
                env: self,
                uri,
                filename,
                load_path: &load_path,
                name: &name,
                content_type: &content_type,
            };
            let (data, processed) = executor::run(&ctx, &chain, Vec::new(), metadata)?;
            metadata = processed;
            data
        };

        let digest = ContentHash::of_bytes(&source);
        let dependencies_digest = self.dependencies_digest(&metadata.dependencies)?;
        let id = self.content_id(&content_type, digest, &metadata);

        let mut logical_path = name.clone();
        if pipeline != "default" {
            logical_path.push('.');
            logical_path.push_str(pipeline);
        }
        logical_path.push_str(&self.output_extension(&content_type, filename));
        // Map sources are relative to the asset's own directory
        if let Some(map) = &mut metadata.map {
            map.file = logical_path.clone();
        }

        Ok(Asset {
            uri: uri.clone().with_id(id),
            load_path,
            filename: filename.to_path_buf(),
            name,
            logical_path,
            content_type,
            source,
            digest,
            dependencies_digest,
            metadata,
        })
    }

    /// Content-addressed id over the bytes and the bundling metadata.
    fn content_id(&self, content_type: &str, digest: ContentHash, metadata: &Metadata) -> String {
        hexdigest(&(
            (self.config.version(), content_type, digest),
            (
                uri_strings(metadata.required.iter()),
                uri_strings(metadata.stubbed.iter()),
                uri_strings(metadata.links.iter()),
            ),
            &metadata.extra,
        ))
    }

    /// Logical path without extensions; index files use their alias.
    fn logical_name(&self, load_path: &Path, uri: &AssetUri) -> String {
        let path = uri.index_alias.as_deref().unwrap_or(&uri.path);
        let relative = split_subpath(load_path, path).unwrap_or_default();
        match self.config.mime().match_extension(&relative) {
            Some((ext, _)) => relative[..relative.len() - ext.len()].to_string(),
            None => relative,
        }
    }

    fn output_extension(&self, content_type: &str, filename: &Path) -> String {
        let mime = self.config.mime();
        if let Some(ext) = mime.preferred_extension(content_type) {
            return ext.to_string();
        }
        let name = filename
            .file_name()
            .map(|n| n.to_string_lossy())
            .unwrap_or_default();
        match mime.match_extension(&name) {
            Some((ext, _)) => ext.to_string(),
            None => filename
                .extension()
                .map(|ext| format!(".{}", ext.to_string_lossy()))
                .unwrap_or_default(),
        }
    }

    fn not_found(&self, uri: &AssetUri) -> Error {
        Error::FileNotFound {
            path: uri.path.display().to_string(),
            accept: uri.content_type.clone().unwrap_or_else(|| ANY.to_string()),
            paths: self.config.load_paths().to_vec(),
        }
    }
}

fn uri_strings<'a>(uris: impl Iterator<Item = &'a AssetUri>) -> Vec<String> {
    uris.map(ToString::to_string).collect()
}

// =============================================================================
// Circular load detection
// =============================================================================

thread_local! {
    static LOADING: RefCell<Vec<AssetUri>> = const { RefCell::new(Vec::new()) };
}

/// Marks a URI as being loaded on this thread until dropped.
struct LoadGuard;

impl LoadGuard {
    fn enter(uri: &AssetUri) -> Result<Self> {
        LOADING.with_borrow_mut(|stack| {
            if stack.contains(uri) {
                return Err(Error::Circular(uri.to_string()));
            }
            stack.push(uri.clone());
            Ok(Self)
        })
    }
}

impl Drop for LoadGuard {
    fn drop(&mut self) {
        LOADING.with_borrow_mut(|stack| {
            stack.pop();
        });
    }
}
