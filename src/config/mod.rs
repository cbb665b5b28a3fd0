//! Pipeline configuration.
//!
//! [`Config`] is an immutable value: every `with_*` method returns a new
//! config and leaves the receiver untouched. Registries are `Arc`-shared and
//! copied on write, so cloning a config is cheap.
//!
//! # Registries
//!
//! | Registry            | Keyed by            | Used by                       |
//! |---------------------|---------------------|-------------------------------|
//! | load paths          | search order        | resolver                      |
//! | mime types          | content type / ext  | resolver, loader              |
//! | transformers        | `(from, to)`        | resolver (accept expansion)   |
//! | pre/postprocessors  | content type        | `self` pipeline               |
//! | bundle processors   | content type        | `default` pipeline            |
//! | bundle reducers     | mime pattern + key  | bundle assembler              |
//! | pipelines           | name                | loader                        |
//! | alternates          | registration order  | resolver                      |
//! | helpers             | name                | compilers via `call_helper`   |

mod settings;

pub use settings::{CacheSettings, ExportSettings, Settings};

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::bundle::Reducer;
use crate::error::{Error, Result};
use crate::helpers::{self, HelperFn};
use crate::mime::{MimeRegistry, match_mime_type, types};
use crate::processor::chain;
use crate::processor::{
    BundleProcessor, DirectiveProcessor, ProcessorRef, SourceMapProcessor,
};
use crate::resolve::{AlternateSource, PackageJsonAlternates};
use crate::transform::{ProcessorTable, Transformer, TransformerGraph};
use crate::uri::{ENVIRONMENT_PATHS, ENVIRONMENT_VERSION};

/// Builds the processor list for `(content_type, file_type)` in one pipeline.
pub type PipelineFn =
    Arc<dyn Fn(&Config, &str, &str) -> Result<Vec<ProcessorRef>> + Send + Sync>;

/// Default dependency history depth.
pub const DEFAULT_HISTORY_DEPTH: usize = 3;

/// A bundle reducer registered for a mime pattern.
#[derive(Clone)]
struct ReducerEntry {
    pattern: String,
    key: String,
    reducer: Reducer,
}

/// Immutable pipeline configuration.
#[derive(Clone)]
pub struct Config {
    root: PathBuf,
    version: String,
    load_paths: Arc<Vec<PathBuf>>,
    mime: Arc<MimeRegistry>,
    transformers: Arc<TransformerGraph>,
    preprocessors: Arc<ProcessorTable>,
    postprocessors: Arc<ProcessorTable>,
    bundle_processors: Arc<ProcessorTable>,
    reducers: Arc<Vec<ReducerEntry>>,
    pipelines: Arc<FxHashMap<String, PipelineFn>>,
    alternates: Arc<Vec<Arc<dyn AlternateSource>>>,
    helpers: Arc<FxHashMap<String, HelperFn>>,
    dependencies: Arc<BTreeSet<String>>,
    history_depth: usize,
    export: ExportSettings,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("root", &self.root)
            .field("version", &self.version)
            .field("load_paths", &self.load_paths)
            .field("history_depth", &self.history_depth)
            .field("export", &self.export)
            .finish_non_exhaustive()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::empty()
            .with_mime_registry(MimeRegistry::with_defaults())
            .with_pipeline("default", Arc::new(chain::default_processors))
            .with_pipeline("self", Arc::new(chain::self_processors))
            .with_pipeline("source", Arc::new(chain::source_processors))
            .with_pipeline("debug", Arc::new(chain::debug_processors))
            .with_preprocessor(types::JAVASCRIPT, Arc::new(DirectiveProcessor::new()))
            .with_preprocessor(types::CSS, Arc::new(DirectiveProcessor::new()))
            .with_bundle_processor(types::JAVASCRIPT, Arc::new(BundleProcessor))
            .with_bundle_processor(types::CSS, Arc::new(BundleProcessor))
            .with_transformer(types::JAVASCRIPT, types::JS_SOURCEMAP, Arc::new(SourceMapProcessor))
            .with_transformer(types::CSS, types::CSS_SOURCEMAP, Arc::new(SourceMapProcessor))
            .with_bundle_reducer("*/*", "data", Reducer::Concat)
            .with_bundle_reducer(types::JAVASCRIPT, "data", Reducer::ConcatJavaScript)
            .with_bundle_reducer("*/*", "links", Reducer::UnionLinks)
            .with_bundle_reducer(types::JAVASCRIPT, "map", Reducer::ConcatMaps)
            .with_bundle_reducer(types::CSS, "map", Reducer::ConcatMaps)
            .with_alternate_source(Arc::new(PackageJsonAlternates))
            .with_helpers(helpers::builtins())
    }
}

impl Config {
    /// A config with nothing registered.
    pub fn empty() -> Self {
        Self {
            root: PathBuf::new(),
            version: String::new(),
            load_paths: Arc::default(),
            mime: Arc::default(),
            transformers: Arc::default(),
            preprocessors: Arc::default(),
            postprocessors: Arc::default(),
            bundle_processors: Arc::default(),
            reducers: Arc::default(),
            pipelines: Arc::default(),
            alternates: Arc::default(),
            helpers: Arc::default(),
            dependencies: Arc::new(
                [ENVIRONMENT_VERSION, ENVIRONMENT_PATHS]
                    .into_iter()
                    .map(String::from)
                    .collect(),
            ),
            history_depth: DEFAULT_HISTORY_DEPTH,
            export: ExportSettings::default(),
        }
    }

    /// Fold loaded settings into a default config.
    pub fn from_settings(settings: &Settings) -> Self {
        let mut config = Self::default()
            .with_root(&settings.root)
            .with_version(&settings.version)
            .with_history_depth(settings.cache.history_depth)
            .with_export(settings.export.clone());
        for path in &settings.paths {
            config = config.with_load_path(path);
        }
        config
    }

    // =========================================================================
    // Builders
    // =========================================================================

    pub fn with_root(&self, root: impl Into<PathBuf>) -> Self {
        let mut next = self.clone();
        next.root = root.into();
        next
    }

    /// Version string folded into every cache key.
    pub fn with_version(&self, version: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.version = version.into();
        next
    }

    /// Append a load path. Relative paths are taken from the root.
    pub fn with_load_path(&self, path: impl AsRef<Path>) -> Self {
        let path = self.root.join(path);
        let mut next = self.clone();
        let paths = Arc::make_mut(&mut next.load_paths);
        if !paths.contains(&path) {
            paths.push(path);
        }
        next
    }

    pub fn with_mime_registry(&self, registry: MimeRegistry) -> Self {
        let mut next = self.clone();
        next.mime = Arc::new(registry);
        next
    }

    pub fn with_mime_type(&self, content_type: &str, extensions: &[&str], charset: bool) -> Self {
        let mut next = self.clone();
        Arc::make_mut(&mut next.mime).register(content_type, extensions, charset);
        next
    }

    pub fn with_transformer(&self, from: &str, to: &str, processor: ProcessorRef) -> Self {
        let mut next = self.clone();
        let transformer = Transformer {
            from: from.to_string(),
            to: to.to_string(),
            processor,
        };
        Arc::make_mut(&mut next.transformers).register(
            transformer,
            &next.preprocessors,
            &next.postprocessors,
        );
        next
    }

    pub fn with_preprocessor(&self, content_type: &str, processor: ProcessorRef) -> Self {
        let mut next = self.clone();
        Arc::make_mut(&mut next.preprocessors)
            .entry(content_type.to_string())
            .or_default()
            .push(processor);
        next.rebuild_transformers();
        next
    }

    pub fn with_postprocessor(&self, content_type: &str, processor: ProcessorRef) -> Self {
        let mut next = self.clone();
        Arc::make_mut(&mut next.postprocessors)
            .entry(content_type.to_string())
            .or_default()
            .push(processor);
        next.rebuild_transformers();
        next
    }

    /// Remove every pre-processor registered under `name` for a type.
    pub fn without_preprocessor(&self, content_type: &str, name: &str) -> Self {
        let mut next = self.clone();
        if let Some(list) = Arc::make_mut(&mut next.preprocessors).get_mut(content_type) {
            list.retain(|p| p.name() != name);
        }
        next.rebuild_transformers();
        next
    }

    pub fn with_bundle_processor(&self, content_type: &str, processor: ProcessorRef) -> Self {
        let mut next = self.clone();
        Arc::make_mut(&mut next.bundle_processors)
            .entry(content_type.to_string())
            .or_default()
            .push(processor);
        next
    }

    /// Register a metadata reducer for bundles whose type matches `pattern`.
    ///
    /// `pattern` may be exact, `type/*` or `*/*`; the most specific match wins.
    pub fn with_bundle_reducer(&self, pattern: &str, key: &str, reducer: Reducer) -> Self {
        let mut next = self.clone();
        Arc::make_mut(&mut next.reducers).push(ReducerEntry {
            pattern: pattern.to_string(),
            key: key.to_string(),
            reducer,
        });
        next
    }

    pub fn with_pipeline(&self, name: &str, pipeline: PipelineFn) -> Self {
        let mut next = self.clone();
        Arc::make_mut(&mut next.pipelines).insert(name.to_string(), pipeline);
        next
    }

    pub fn with_alternate_source(&self, source: Arc<dyn AlternateSource>) -> Self {
        let mut next = self.clone();
        Arc::make_mut(&mut next.alternates).push(source);
        next
    }

    /// Register (or replace) a named helper.
    pub fn with_helper(&self, name: &str, helper: HelperFn) -> Self {
        self.with_helpers([(name, helper)])
    }

    fn with_helpers<'n>(&self, entries: impl IntoIterator<Item = (&'n str, HelperFn)>) -> Self {
        let mut next = self.clone();
        let table = Arc::make_mut(&mut next.helpers);
        for (name, helper) in entries {
            table.insert(name.to_string(), helper);
        }
        next
    }

    /// Add an environment-wide dependency recorded on every asset.
    pub fn with_dependency(&self, uri: impl Into<String>) -> Self {
        let mut next = self.clone();
        Arc::make_mut(&mut next.dependencies).insert(uri.into());
        next
    }

    pub fn with_history_depth(&self, depth: usize) -> Self {
        let mut next = self.clone();
        next.history_depth = depth.max(1);
        next
    }

    pub fn with_export(&self, export: ExportSettings) -> Self {
        let mut next = self.clone();
        next.export = export;
        next
    }

    pub fn with_export_concurrency(&self, concurrent: bool) -> Self {
        let mut next = self.clone();
        next.export.concurrent = concurrent;
        next
    }

    fn rebuild_transformers(&mut self) {
        let preprocessors = Arc::clone(&self.preprocessors);
        let postprocessors = Arc::clone(&self.postprocessors);
        Arc::make_mut(&mut self.transformers).rebuild(&preprocessors, &postprocessors);
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn load_paths(&self) -> &[PathBuf] {
        &self.load_paths
    }

    /// The first load path containing `path`.
    pub fn load_path_for(&self, path: &Path) -> Option<&Path> {
        self.load_paths
            .iter()
            .find(|lp| path.starts_with(lp))
            .map(PathBuf::as_path)
    }

    pub fn mime(&self) -> &MimeRegistry {
        &self.mime
    }

    pub fn transformers(&self) -> &TransformerGraph {
        &self.transformers
    }

    pub fn preprocessors(&self, content_type: &str) -> &[ProcessorRef] {
        lookup(&self.preprocessors, content_type)
    }

    pub fn postprocessors(&self, content_type: &str) -> &[ProcessorRef] {
        lookup(&self.postprocessors, content_type)
    }

    pub fn bundle_processors(&self, content_type: &str) -> &[ProcessorRef] {
        lookup(&self.bundle_processors, content_type)
    }

    /// Reducers applying to a bundle of `content_type`, one per key.
    ///
    /// Exact patterns beat `type/*`, which beats `*/*`; among equally
    /// specific patterns the later registration wins.
    pub fn bundle_reducers(&self, content_type: &str) -> Vec<(&str, &Reducer)> {
        let mut chosen: Vec<(&str, u8, &Reducer)> = Vec::new();
        for entry in self.reducers.iter() {
            if !match_mime_type(content_type, &entry.pattern) {
                continue;
            }
            let rank = pattern_rank(&entry.pattern);
            match chosen.iter_mut().find(|(key, _, _)| *key == entry.key) {
                Some(slot) if slot.1 <= rank => *slot = (&entry.key, rank, &entry.reducer),
                Some(_) => {}
                None => chosen.push((&entry.key, rank, &entry.reducer)),
            }
        }
        chosen.into_iter().map(|(key, _, r)| (key, r)).collect()
    }

    pub fn pipeline(&self, name: &str) -> Result<&PipelineFn> {
        self.pipelines
            .get(name)
            .ok_or_else(|| Error::UnknownPipeline(name.to_string()))
    }

    /// Names of registered non-default pipelines (usable as `.name` extensions).
    pub fn pipeline_names(&self) -> impl Iterator<Item = &str> {
        self.pipelines
            .keys()
            .map(String::as_str)
            .filter(|name| *name != "default")
    }

    pub fn helper(&self, name: &str) -> Result<&HelperFn> {
        self.helpers
            .get(name)
            .ok_or_else(|| Error::UnknownHelper(name.to_string()))
    }

    pub fn alternates(&self) -> &[Arc<dyn AlternateSource>] {
        &self.alternates
    }

    pub fn dependencies(&self) -> &BTreeSet<String> {
        &self.dependencies
    }

    pub fn history_depth(&self) -> usize {
        self.history_depth
    }

    pub fn export(&self) -> &ExportSettings {
        &self.export
    }

    /// Processor list for a content type, source file type and pipeline.
    pub fn processors_for(
        &self,
        content_type: &str,
        file_type: &str,
        pipeline: &str,
    ) -> Result<Vec<ProcessorRef>> {
        let build = self.pipeline(pipeline)?;
        build(self, content_type, file_type)
    }
}

fn lookup<'a>(table: &'a ProcessorTable, content_type: &str) -> &'a [ProcessorRef] {
    table
        .get(content_type)
        .map(Vec::as_slice)
        .unwrap_or_default()
}

fn pattern_rank(pattern: &str) -> u8 {
    if pattern == crate::mime::ANY {
        0
    } else if pattern.ends_with("/*") {
        1
    } else {
        2
    }
}
