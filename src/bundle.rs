//! Bundle assembly.
//!
//! A bundle is the root asset plus everything it transitively requires,
//! in dependency order, minus whatever it stubs. The members are always
//! loaded through the `self` pipeline so that directive edges are visible
//! without recursing into bundling again.
//!
//! Per-key metadata across the members is folded with the [`Reducer`]s
//! registered for the bundle's content type.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use rustc_hash::FxHashSet;
use serde_json::Value;

use crate::asset::Asset;
use crate::environment::CachedEnvironment;
use crate::error::Result;
use crate::processor::{Processor, ProcessorInput, ProcessorOutput};
use crate::source_map::{SourceMap, concat};
use crate::uri::AssetUri;

/// Combining function of a custom reducer.
pub type ReduceFn = Arc<dyn Fn(Value, &Value) -> Value + Send + Sync>;

/// How one metadata key is combined across bundle members.
#[derive(Clone)]
pub enum Reducer {
    /// Byte concatenation of the sources
    Concat,
    /// Concatenation keeping statements terminated
    ConcatJavaScript,
    /// Source map concatenation, offset by the lines emitted so far
    ConcatMaps,
    /// Union of every member's links
    UnionLinks,
    /// Fold over `extra[key]` values
    Custom { initial: Value, combine: ReduceFn },
}

impl Reducer {
    pub fn custom<F>(initial: Value, combine: F) -> Self
    where
        F: Fn(Value, &Value) -> Value + Send + Sync + 'static,
    {
        Self::Custom {
            initial,
            combine: Arc::new(combine),
        }
    }
}

impl fmt::Debug for Reducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Concat => f.write_str("Concat"),
            Self::ConcatJavaScript => f.write_str("ConcatJavaScript"),
            Self::ConcatMaps => f.write_str("ConcatMaps"),
            Self::UnionLinks => f.write_str("UnionLinks"),
            Self::Custom { initial, .. } => write!(f, "Custom({initial})"),
        }
    }
}

/// An assembled bundle.
#[derive(Debug, Clone)]
pub struct Bundle {
    /// Members in concatenation order
    pub assets: Vec<Arc<Asset>>,
    pub data: Vec<u8>,
    pub map: Option<SourceMap>,
    pub links: BTreeSet<AssetUri>,
    /// Dependencies of every member, stubbed ones included
    pub dependencies: BTreeSet<String>,
    /// Results of custom reducers
    pub extra: BTreeMap<String, Value>,
}

impl Bundle {
    pub fn included(&self) -> Vec<AssetUri> {
        self.assets.iter().map(|a| a.uri.clone()).collect()
    }
}

/// Assemble the bundle rooted at `root`.
pub fn assemble(env: &CachedEnvironment, root: &AssetUri) -> Result<Bundle> {
    let processed = root.without_id().with_pipeline(Some("self"));
    let root_asset = env.load(&processed)?;

    let required_of = |uri: &AssetUri| -> Result<Vec<AssetUri>> {
        Ok(env.load(uri)?.metadata.required.iter().cloned().collect())
    };

    let mut required = dfs(vec![processed.clone()], required_of)?;
    let stubbed = dfs(
        root_asset.metadata.stubbed.iter().cloned().collect(),
        required_of,
    )?;
    required.retain(|uri| !stubbed.contains(uri));
    dedup_index_aliases(&mut required);

    crate::debug!(
        "bundle";
        "{}: {} members, {} stubbed",
        root_asset.logical_path,
        required.len(),
        stubbed.len()
    );

    let mut dependencies = BTreeSet::new();
    for uri in required.iter().chain(&stubbed) {
        dependencies.extend(env.load(uri)?.metadata.dependencies.iter().cloned());
    }

    let assets = required
        .iter()
        .map(|uri| env.load(uri))
        .collect::<Result<Vec<_>>>()?;

    let config = env.config();
    let file = match config.mime().preferred_extension(&root_asset.content_type) {
        Some(ext) => format!("{}{ext}", root_asset.name),
        None => root_asset.name.clone(),
    };

    let mut bundle = Bundle {
        assets,
        data: Vec::new(),
        map: None,
        links: BTreeSet::new(),
        dependencies,
        extra: BTreeMap::new(),
    };
    reduce(&mut bundle, &config.bundle_reducers(&root_asset.content_type), &file);
    Ok(bundle)
}

/// Post-order traversal where a node listing itself among its children is
/// emitted at that position instead of after all of them.
fn dfs<F>(initial: Vec<AssetUri>, mut children: F) -> Result<Vec<AssetUri>>
where
    F: FnMut(&AssetUri) -> Result<Vec<AssetUri>>,
{
    let mut nodes = Vec::new();
    let mut emitted = FxHashSet::default();
    let mut seen = FxHashSet::default();
    let mut stack: Vec<AssetUri> = initial.into_iter().rev().collect();

    while let Some(node) = stack.pop() {
        if seen.contains(&node) {
            if emitted.insert(node.clone()) {
                nodes.push(node);
            }
        } else {
            seen.insert(node.clone());
            let next = children(&node)?;
            stack.push(node);
            stack.extend(next.into_iter().rev());
        }
    }
    Ok(nodes)
}

/// Drop plain URIs whose index-aliased form is also present.
fn dedup_index_aliases(required: &mut Vec<AssetUri>) {
    let plain: FxHashSet<AssetUri> = required
        .iter()
        .filter(|uri| uri.index_alias.is_some())
        .map(|uri| uri.clone().with_index_alias(None))
        .collect();
    if !plain.is_empty() {
        required.retain(|uri| !plain.contains(uri));
    }
}

// =============================================================================
// Reduction
// =============================================================================

fn reduce(bundle: &mut Bundle, reducers: &[(&str, &Reducer)], file: &str) {
    // Lines already emitted before each member, for map offsets
    let mut offsets = Vec::with_capacity(bundle.assets.len());

    let data_reducer = reducers
        .iter()
        .find(|(key, _)| *key == "data")
        .map(|(_, r)| *r);
    match data_reducer {
        Some(Reducer::Custom { initial, combine }) => {
            let mut acc = initial.clone();
            for asset in &bundle.assets {
                offsets.push(0);
                acc = combine(acc, &Value::String(asset.to_string_lossy().into_owned()));
            }
            bundle.data = match acc {
                Value::String(s) => s.into_bytes(),
                other => other.to_string().into_bytes(),
            };
        }
        Some(reducer) => {
            let javascript = matches!(reducer, Reducer::ConcatJavaScript);
            let mut data = Vec::new();
            let mut lines = 0;
            for asset in &bundle.assets {
                if javascript && !asset.source.is_empty() && terminate_statement(&mut data) {
                    lines += 1;
                }
                offsets.push(lines);
                data.extend_from_slice(&asset.source);
                lines += newline_count(&asset.source);
            }
            bundle.data = data;
        }
        None => offsets.resize(bundle.assets.len(), 0),
    }

    for (key, reducer) in reducers {
        match reducer {
            Reducer::Concat | Reducer::ConcatJavaScript => {}
            Reducer::ConcatMaps => {
                let mut map = SourceMap::new(file).with_line_count(0);
                for (asset, &offset) in bundle.assets.iter().zip(&offsets) {
                    map.line_count = Some(offset);
                    map = concat(&map, &member_map(asset));
                }
                bundle.map = Some(map);
            }
            Reducer::UnionLinks => {
                for asset in &bundle.assets {
                    bundle.links.extend(asset.links().cloned());
                }
            }
            Reducer::Custom { initial, combine } => {
                if *key == "data" {
                    continue;
                }
                let mut acc = initial.clone();
                for asset in &bundle.assets {
                    if let Some(value) = asset.metadata.extra.get(*key) {
                        acc = combine(acc, value);
                    }
                }
                bundle.extra.insert(key.to_string(), acc);
            }
        }
    }
}

fn newline_count(data: &[u8]) -> u32 {
    u32::try_from(data.iter().filter(|&&b| b == b'\n').count()).unwrap_or(u32::MAX)
}

/// A member's own map, or an identity map over its source file.
fn member_map(asset: &Asset) -> SourceMap {
    match asset.source_map() {
        Some(map) => map.clone(),
        None => identity_map(asset),
    }
}

/// Line-for-line map of an asset onto its own file.
///
/// The source is the file name alone, relative to the directory of the
/// asset's logical path like every other map source.
pub(crate) fn identity_map(asset: &Asset) -> SourceMap {
    let source = asset
        .filename
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| asset.logical_path.clone());
    SourceMap::identity(asset.logical_path.as_str(), source, &asset.source)
}

/// Append `source` to `buf`, terminating the previous statement first.
///
/// When `buf` does not end in `;` (ignoring trailing whitespace), one is
/// inserted before the trailing whitespace. `buf` always ends in a newline
/// before `source` is appended.
pub fn concat_javascript_sources(buf: &mut Vec<u8>, source: &[u8]) {
    if source.is_empty() {
        return;
    }
    terminate_statement(buf);
    buf.extend_from_slice(source);
}

/// Returns whether a newline was appended.
fn terminate_statement(buf: &mut Vec<u8>) -> bool {
    let Some(last) = buf.iter().rposition(|b| !b.is_ascii_whitespace()) else {
        return false;
    };
    if buf[last] != b';' {
        buf.insert(last + 1, b';');
    }
    if buf.last() == Some(&b'\n') {
        return false;
    }
    buf.push(b'\n');
    true
}

// =============================================================================
// Bundle processor
// =============================================================================

/// The `default` pipeline processor for bundled types.
#[derive(Debug, Clone, Copy, Default)]
pub struct BundleProcessor;

impl Processor for BundleProcessor {
    fn name(&self) -> &str {
        "bundle"
    }

    fn cache_key(&self) -> String {
        "bundle:1".into()
    }

    fn call(&self, input: &ProcessorInput<'_>) -> anyhow::Result<ProcessorOutput> {
        let bundle = assemble(input.env, input.uri)?;
        let included = bundle.included();
        let Bundle {
            data,
            map,
            links,
            dependencies,
            extra,
            ..
        } = bundle;
        Ok(ProcessorOutput {
            data: Some(data),
            dependencies,
            links,
            included: Some(included),
            map,
            extra,
            ..ProcessorOutput::default()
        })
    }
}
