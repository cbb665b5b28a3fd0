//! Built-in pipelines.
//!
//! A pipeline maps `(content_type, file_type)` to a processor list in
//! registration order (executed back to front):
//!
//! | Pipeline  | List                                                      |
//! |-----------|-----------------------------------------------------------|
//! | `self`    | post(type), transformer, pre(file_type), reader           |
//! | `default` | bundle processors of the type, else `self`                |
//! | `source`  | nothing: raw bytes                                        |
//! | `debug`   | source map comment, then `default`                        |

use std::sync::Arc;

use crate::config::Config;
use crate::error::Result;
use crate::mime::types;

use super::{FileReader, ProcessorRef, SourceMapComment};

pub fn self_processors(config: &Config, content_type: &str, file_type: &str) -> Result<Vec<ProcessorRef>> {
    let mut processors: Vec<ProcessorRef> = config.postprocessors(content_type).to_vec();
    if content_type != file_type {
        let transformation = config.transformers().chain(file_type, content_type)?;
        processors.push(Arc::clone(&transformation.processor));
    }
    processors.extend(config.preprocessors(file_type).iter().cloned());

    if !processors.is_empty() || config.mime().is_charset(content_type) {
        processors.push(Arc::new(FileReader));
    }
    Ok(processors)
}

pub fn default_processors(config: &Config, content_type: &str, file_type: &str) -> Result<Vec<ProcessorRef>> {
    let bundled = config.bundle_processors(content_type);
    if bundled.is_empty() {
        self_processors(config, content_type, file_type)
    } else {
        Ok(bundled.to_vec())
    }
}

pub fn source_processors(_config: &Config, _content_type: &str, _file_type: &str) -> Result<Vec<ProcessorRef>> {
    Ok(Vec::new())
}

pub fn debug_processors(config: &Config, content_type: &str, file_type: &str) -> Result<Vec<ProcessorRef>> {
    let mut processors: Vec<ProcessorRef> = Vec::new();
    if matches!(content_type, types::JAVASCRIPT | types::CSS) {
        processors.push(Arc::new(SourceMapComment));
    }
    processors.extend(default_processors(config, content_type, file_type)?);
    Ok(processors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::processor::{ProcessorOutput, processor_fn};

    const COFFEE: &str = "text/coffeescript";

    fn names(list: &[ProcessorRef]) -> Vec<String> {
        list.iter().map(|p| p.name().to_string()).collect()
    }

    fn config() -> Config {
        Config::default()
            .with_mime_type(COFFEE, &[".coffee"], true)
            .with_transformer(
                COFFEE,
                types::JAVASCRIPT,
                processor_fn("coffee", |_| Ok(ProcessorOutput::unchanged())),
            )
            .with_postprocessor(
                types::JAVASCRIPT,
                processor_fn("uglify", |_| Ok(ProcessorOutput::unchanged())),
            )
    }

    #[test]
    fn test_self_chain_order() {
        let config = config();
        let list = self_processors(&config, types::JAVASCRIPT, COFFEE).unwrap();
        let transformer = format!("{COFFEE}→{}", types::JAVASCRIPT);
        assert_eq!(
            names(&list),
            vec!["uglify", transformer.as_str(), "file-reader"]
        );

        let list = self_processors(&config, types::JAVASCRIPT, types::JAVASCRIPT).unwrap();
        assert_eq!(names(&list), vec!["uglify", "directives", "file-reader"]);
    }

    #[test]
    fn test_binary_self_chain_is_empty() {
        let config = config();
        let list = self_processors(&config, types::PNG, types::PNG).unwrap();
        assert!(list.is_empty());
    }

    #[test]
    fn test_missing_transformer() {
        let config = config();
        let err = self_processors(&config, types::CSS, COFFEE).unwrap_err();
        assert!(matches!(err, Error::Conversion { .. }));
    }

    #[test]
    fn test_default_prefers_bundle_processors() {
        let config = config();
        let list = default_processors(&config, types::JAVASCRIPT, COFFEE).unwrap();
        assert_eq!(names(&list), vec!["bundle"]);

        let list = default_processors(&config, types::PLAIN, types::PLAIN).unwrap();
        assert_eq!(names(&list), vec!["file-reader"]);
    }

    #[test]
    fn test_debug_appends_comment_last() {
        let config = config();
        let list = debug_processors(&config, types::CSS, types::CSS).unwrap();
        assert_eq!(names(&list), vec!["source-map-comment", "bundle"]);
    }
}
