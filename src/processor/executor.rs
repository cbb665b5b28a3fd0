//! Chain execution.
//!
//! Chains are stored in registration order and executed back to front, so
//! the terminal reader (always last in the list) runs first. After each
//! step the output is folded into the running state:
//!
//! - `data` replaces the content when present
//! - set-valued metadata (`dependencies`, `required`, `stubbed`, `links`) is unioned
//! - `map` is composed onto the current map
//! - any other key overwrites, last writer wins

use std::path::Path;

use crate::asset::Metadata;
use crate::environment::CachedEnvironment;
use crate::error::{Error, Result};
use crate::source_map::{SourceMap, compose};
use crate::uri::AssetUri;

use super::{Processor, ProcessorInput, ProcessorOutput, ProcessorRef};

/// The fixed part of a processor input for one asset build.
#[derive(Clone, Copy)]
pub struct Context<'a> {
    pub env: &'a CachedEnvironment,
    pub uri: &'a AssetUri,
    pub filename: &'a Path,
    pub load_path: &'a Path,
    pub name: &'a str,
    pub content_type: &'a str,
}

impl<'a> Context<'a> {
    fn input(&self, data: &'a [u8], metadata: &'a Metadata) -> ProcessorInput<'a> {
        ProcessorInput {
            env: self.env,
            uri: self.uri,
            filename: self.filename,
            load_path: self.load_path,
            name: self.name,
            content_type: self.content_type,
            data,
            metadata,
        }
    }
}

/// Run `chain` back to front over `data`, starting from `metadata`.
pub fn run(
    ctx: &Context<'_>,
    chain: &[ProcessorRef],
    mut data: Vec<u8>,
    mut metadata: Metadata,
) -> Result<(Vec<u8>, Metadata)> {
    for processor in chain.iter().rev() {
        let output = {
            let input = ctx.input(&data, &metadata);
            processor.call(&input).map_err(|err| {
                crate::debug!(
                    "processor";
                    "{} failed on {}",
                    processor.name(),
                    ctx.filename.display()
                );
                into_error(err)
            })?
        };
        metadata.apply(&output);
        if let Some(next) = output.data {
            data = next;
        }
    }
    Ok((data, metadata))
}

/// Recover a crate error that travelled through a processor as `anyhow`.
pub(crate) fn into_error(err: anyhow::Error) -> Error {
    match err.downcast::<Error>() {
        Ok(err) => err,
        Err(err) => Error::Processor(err),
    }
}

fn compose_maps(current: Option<&SourceMap>, next: &SourceMap) -> SourceMap {
    match current {
        Some(current) => compose(current, next),
        None => next.clone(),
    }
}

impl Metadata {
    /// Fold a processor's metadata updates into this metadata.
    pub(crate) fn apply(&mut self, output: &ProcessorOutput) {
        self.dependencies.extend(output.dependencies.iter().cloned());
        self.required.extend(output.required.iter().cloned());
        self.stubbed.extend(output.stubbed.iter().cloned());
        self.links.extend(output.links.iter().cloned());
        if let Some(included) = &output.included {
            self.included = included.clone();
        }
        if let Some(map) = &output.map {
            self.map = Some(compose_maps(self.map.as_ref(), map));
        }
        if let Some(charset) = &output.charset {
            self.charset = Some(charset.clone());
        }
        for (key, value) in &output.extra {
            self.extra.insert(key.clone(), value.clone());
        }
    }
}

impl ProcessorOutput {
    /// Merge a later step's output into this one, as if both ran as one step.
    fn absorb(&mut self, later: ProcessorOutput) {
        if later.data.is_some() {
            self.data = later.data;
        }
        self.dependencies.extend(later.dependencies);
        self.required.extend(later.required);
        self.stubbed.extend(later.stubbed);
        self.links.extend(later.links);
        if later.included.is_some() {
            self.included = later.included;
        }
        if let Some(map) = later.map {
            self.map = Some(compose_maps(self.map.as_ref(), &map));
        }
        if later.charset.is_some() {
            self.charset = later.charset;
        }
        self.extra.extend(later.extra);
    }
}

// =============================================================================
// Composite processor
// =============================================================================

/// Several processors run in sequence, exposed as one.
///
/// Used for multi-hop transformer chains. `processors` is in execution order.
pub struct CompositeProcessor {
    name: String,
    processors: Vec<ProcessorRef>,
}

impl CompositeProcessor {
    pub fn new(name: impl Into<String>, processors: Vec<ProcessorRef>) -> Self {
        Self {
            name: name.into(),
            processors,
        }
    }

    pub fn len(&self) -> usize {
        self.processors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }

    pub fn processors(&self) -> &[ProcessorRef] {
        &self.processors
    }
}

impl Processor for CompositeProcessor {
    fn name(&self) -> &str {
        &self.name
    }

    fn cache_key(&self) -> String {
        let keys: Vec<String> = self.processors.iter().map(|p| p.cache_key()).collect();
        format!("{}[{}]", self.name, keys.join(","))
    }

    fn call(&self, input: &ProcessorInput<'_>) -> anyhow::Result<ProcessorOutput> {
        let mut metadata = input.metadata.clone();
        let mut combined = ProcessorOutput::unchanged();
        for processor in &self.processors {
            let output = {
                let data = combined.data.as_deref().unwrap_or(input.data);
                let step = ProcessorInput {
                    data,
                    metadata: &metadata,
                    ..*input
                };
                processor.call(&step)?
            };
            metadata.apply(&output);
            combined.absorb(output);
        }
        Ok(combined)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source_map::{Mapping, Position};

    fn mapping(gen_line: u32, gen_col: u32, orig_line: u32, orig_col: u32) -> Mapping {
        Mapping {
            generated: Position::new(gen_line, gen_col),
            original: Position::new(orig_line, orig_col),
            source: 0,
            name: None,
        }
    }

    #[test]
    fn test_apply_unions_sets_and_overwrites_scalars() {
        let mut metadata = Metadata::default();
        metadata.dependencies.insert("environment-version".into());
        metadata.extra.insert("flavor".into(), serde_json::json!("a"));

        let output = ProcessorOutput::unchanged()
            .with_dependency("file-digest:///srv/a.js")
            .with_extra("flavor", serde_json::json!("b"));
        metadata.apply(&output);

        assert_eq!(metadata.dependencies.len(), 2);
        assert_eq!(metadata.extra["flavor"], serde_json::json!("b"));
    }

    #[test]
    fn test_apply_composes_maps() {
        let mut metadata = Metadata::default();
        let first = SourceMap::from_mappings(
            "a.js",
            vec![mapping(1, 0, 7, 0)],
            vec!["a.src".into()],
            vec![],
        );
        metadata.apply(&ProcessorOutput::unchanged().with_map(first));

        let second = SourceMap::from_mappings(
            "a.js",
            vec![mapping(3, 0, 1, 0)],
            vec!["a.js".into()],
            vec![],
        );
        metadata.apply(&ProcessorOutput::unchanged().with_map(second));

        let map = metadata.map.unwrap();
        assert_eq!(map.mappings.len(), 1);
        assert_eq!(map.mappings[0].generated, Position::new(3, 0));
        assert_eq!(map.mappings[0].original, Position::new(7, 0));
    }

    #[test]
    fn test_absorb_keeps_latest_data() {
        let mut combined = ProcessorOutput::data("one");
        combined.absorb(ProcessorOutput::unchanged().with_dependency("environment-paths"));
        assert_eq!(combined.data.as_deref(), Some(&b"one"[..]));

        combined.absorb(ProcessorOutput::data("two"));
        assert_eq!(combined.data.as_deref(), Some(&b"two"[..]));
        assert!(combined.dependencies.contains("environment-paths"));
    }

    #[test]
    fn test_into_error_unwraps_crate_errors() {
        let err = anyhow::Error::new(Error::InvalidUri("x".into()));
        assert!(matches!(into_error(err), Error::InvalidUri(_)));

        let err = anyhow::anyhow!("boom");
        assert!(matches!(into_error(err), Error::Processor(_)));
    }
}
