//! Processor contract and built-in processors.
//!
//! A processor is a pure function of its [`ProcessorInput`]: it returns new
//! content (or `None` for "unchanged") plus metadata updates. Anything a
//! processor reads besides its input must be declared as a dependency in
//! the output metadata, otherwise cached results go stale.
//!
//! # Built-ins
//!
//! | Processor                  | Role                                       |
//! |----------------------------|--------------------------------------------|
//! | [`FileReader`]             | terminal reader, charset normalization     |
//! | [`DirectiveProcessor`]     | `//= require` style header directives      |
//! | [`BundleProcessor`]        | concatenates the required closure          |
//! | [`JsMinifier`]             | oxc minification                           |
//! | [`CssMinifier`]            | lightningcss minification                  |
//! | [`SourceMapProcessor`]     | `.js` → `.js.map` transformer              |
//! | [`SourceMapComment`]       | appends `sourceMappingURL` (debug pipeline)|

pub mod chain;
mod directive;
pub mod executor;
mod minify;
mod reader;
mod sourcemap;

pub use crate::bundle::BundleProcessor;
pub use directive::DirectiveProcessor;
pub use executor::CompositeProcessor;
pub use minify::{CssMinifier, JsMinifier};
pub use reader::FileReader;
pub use sourcemap::{SourceMapComment, SourceMapProcessor};

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use crate::asset::{Metadata, OrderedSet};
use crate::environment::CachedEnvironment;
use crate::source_map::SourceMap;
use crate::uri::AssetUri;

/// Shared handle to a processor.
pub type ProcessorRef = Arc<dyn Processor>;

/// A content transformation step.
pub trait Processor: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Cache key folded into the `processors:` dependency digest.
    ///
    /// Change it whenever the processor's output for the same input changes.
    fn cache_key(&self) -> String {
        self.name().to_string()
    }

    fn call(&self, input: &ProcessorInput<'_>) -> anyhow::Result<ProcessorOutput>;
}

impl fmt::Debug for dyn Processor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Processor({})", self.name())
    }
}

/// Everything a processor may look at.
#[derive(Clone, Copy)]
pub struct ProcessorInput<'a> {
    pub env: &'a CachedEnvironment,
    /// URI of the asset being built (no content id yet)
    pub uri: &'a AssetUri,
    pub filename: &'a Path,
    pub load_path: &'a Path,
    /// Logical path without extensions, e.g. `app/main`
    pub name: &'a str,
    /// Target content type
    pub content_type: &'a str,
    /// Content so far (empty before the reader runs)
    pub data: &'a [u8],
    /// Metadata accumulated by earlier processors
    pub metadata: &'a Metadata,
}

impl ProcessorInput<'_> {
    /// Content as UTF-8 text, lossily.
    pub fn text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(self.data)
    }
}

/// What a processor hands back.
///
/// Sets are unioned into the accumulated metadata, `map` is composed onto
/// the current map, everything else replaces.
#[derive(Debug, Default, Clone)]
pub struct ProcessorOutput {
    pub data: Option<Vec<u8>>,
    pub dependencies: BTreeSet<String>,
    pub required: OrderedSet<AssetUri>,
    pub stubbed: BTreeSet<AssetUri>,
    pub links: BTreeSet<AssetUri>,
    pub included: Option<Vec<AssetUri>>,
    pub map: Option<SourceMap>,
    pub charset: Option<String>,
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl ProcessorOutput {
    /// Output that leaves content and metadata untouched.
    pub fn unchanged() -> Self {
        Self::default()
    }

    /// Output replacing the content.
    pub fn data(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: Some(data.into()),
            ..Self::default()
        }
    }

    pub fn with_dependency(mut self, uri: impl Into<String>) -> Self {
        self.dependencies.insert(uri.into());
        self
    }

    pub fn with_map(mut self, map: SourceMap) -> Self {
        self.map = Some(map);
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

// =============================================================================
// Closure adapter
// =============================================================================

/// A processor backed by a closure.
pub struct FnProcessor<F> {
    name: String,
    cache_key: String,
    f: F,
}

impl<F> Processor for FnProcessor<F>
where
    F: Fn(&ProcessorInput<'_>) -> anyhow::Result<ProcessorOutput> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn cache_key(&self) -> String {
        self.cache_key.clone()
    }

    fn call(&self, input: &ProcessorInput<'_>) -> anyhow::Result<ProcessorOutput> {
        (self.f)(input)
    }
}

/// Wrap a closure as a processor.
///
/// ```ignore
/// let upcase = processor_fn("upcase", |input| {
///     Ok(ProcessorOutput::data(input.text().to_uppercase()))
/// });
/// ```
pub fn processor_fn<F>(name: &str, f: F) -> ProcessorRef
where
    F: Fn(&ProcessorInput<'_>) -> anyhow::Result<ProcessorOutput> + Send + Sync + 'static,
{
    versioned_processor_fn(name, "1", f)
}

/// Wrap a closure as a processor with an explicit cache version.
pub fn versioned_processor_fn<F>(name: &str, version: &str, f: F) -> ProcessorRef
where
    F: Fn(&ProcessorInput<'_>) -> anyhow::Result<ProcessorOutput> + Send + Sync + 'static,
{
    Arc::new(FnProcessor {
        name: name.to_string(),
        cache_key: format!("{name}:{version}"),
        f,
    })
}
