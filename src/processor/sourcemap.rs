//! Source map assets and `sourceMappingURL` comments.

use std::path::Path;

use anyhow::bail;

use crate::mime::types;
use crate::resolve::ResolveOptions;
use crate::bundle::identity_map;

use super::{Processor, ProcessorInput, ProcessorOutput};

/// Map type for a generated type, and the reverse.
fn map_type_for(content_type: &str) -> Option<&'static str> {
    match content_type {
        types::JAVASCRIPT => Some(types::JS_SOURCEMAP),
        types::CSS => Some(types::CSS_SOURCEMAP),
        _ => None,
    }
}

fn generated_type_for(map_type: &str) -> Option<&'static str> {
    match map_type {
        types::JS_SOURCEMAP => Some(types::JAVASCRIPT),
        types::CSS_SOURCEMAP => Some(types::CSS),
        _ => None,
    }
}

/// Transformer from a generated type to its source map.
///
/// Loads the generated asset for the same file and emits its map as JSON.
/// Assets built without a map get a line-for-line identity map.
#[derive(Debug, Clone, Copy, Default)]
pub struct SourceMapProcessor;

impl Processor for SourceMapProcessor {
    fn name(&self) -> &str {
        "source-map"
    }

    fn cache_key(&self) -> String {
        "source-map:1".into()
    }

    fn call(&self, input: &ProcessorInput<'_>) -> anyhow::Result<ProcessorOutput> {
        let Some(accept) = generated_type_for(input.content_type) else {
            bail!("no source map format for '{}'", input.content_type);
        };

        let env = input.env;
        let path = input.filename.to_string_lossy();
        let resolution = env.resolve(&path, ResolveOptions::accept(accept))?;
        let asset = env.load(&resolution.uri)?;

        let mut map = match asset.source_map() {
            Some(map) => map.clone(),
            None => identity_map(&asset),
        };
        map.file = asset.logical_path.clone();

        let mut output = ProcessorOutput::data(map.encode());
        output.dependencies = resolution.dependencies;
        output
            .dependencies
            .extend(asset.metadata.dependencies.iter().cloned());
        output.links.insert(asset.uri.clone());
        Ok(output)
    }
}

/// Appends a `sourceMappingURL` comment pointing at the fingerprinted map.
///
/// Runs last in the `debug` pipeline. Both the asset and its map are linked
/// so exporting the debug asset exports the map too.
#[derive(Debug, Clone, Copy, Default)]
pub struct SourceMapComment;

impl Processor for SourceMapComment {
    fn name(&self) -> &str {
        "source-map-comment"
    }

    fn cache_key(&self) -> String {
        "source-map-comment:1".into()
    }

    fn call(&self, input: &ProcessorInput<'_>) -> anyhow::Result<ProcessorOutput> {
        let Some(map_type) = map_type_for(input.content_type) else {
            return Ok(ProcessorOutput::unchanged());
        };

        let env = input.env;
        let path = input.filename.to_string_lossy();
        let asset = env.load(&env.resolve(&path, ResolveOptions::accept(input.content_type))?.uri)?;
        let map = env.load(&env.resolve(&path, ResolveOptions::accept(map_type))?.uri)?;

        // Asset and map share a directory, so the file name is the relative URL
        let digest_path = map.digest_path();
        let url = Path::new(&digest_path)
            .file_name()
            .map_or_else(|| digest_path.clone(), |n| n.to_string_lossy().into_owned());

        let mut data = asset.source.clone();
        if input.content_type == types::CSS {
            data.extend_from_slice(format!("\n/*# sourceMappingURL={url} */\n").as_bytes());
        } else {
            data.extend_from_slice(format!("\n//# sourceMappingURL={url}\n").as_bytes());
        }

        let mut output = ProcessorOutput::data(data);
        output.dependencies = asset.metadata.dependencies.clone();
        output.links.insert(asset.uri.clone());
        output.links.insert(map.uri.clone());
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_pairs() {
        assert_eq!(map_type_for(types::JAVASCRIPT), Some(types::JS_SOURCEMAP));
        assert_eq!(map_type_for(types::CSS), Some(types::CSS_SOURCEMAP));
        assert_eq!(map_type_for(types::HTML), None);
        assert_eq!(generated_type_for(types::CSS_SOURCEMAP), Some(types::CSS));
        assert_eq!(generated_type_for(types::PLAIN), None);
    }
}
