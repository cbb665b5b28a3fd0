//! Minifier processors.
//!
//! Uses oxc for JavaScript and lightningcss for CSS. Neither is registered
//! by default; add them as post-processors:
//!
//! ```ignore
//! let config = Config::default()
//!     .with_postprocessor(types::JAVASCRIPT, Arc::new(JsMinifier))
//!     .with_postprocessor(types::CSS, Arc::new(CssMinifier));
//! ```

use std::path::{Path, PathBuf};

use anyhow::anyhow;
use lightningcss::stylesheet::{ParserOptions, PrinterOptions, StyleSheet};
use oxc::allocator::Allocator;
use oxc::codegen::{Codegen, CodegenOptions, CommentOptions};
use oxc::mangler::MangleOptions;
use oxc::minifier::{CompressOptions, Minifier, MinifierOptions};
use oxc::parser::Parser;
use oxc::span::SourceType;

use super::{Processor, ProcessorInput, ProcessorOutput};
use crate::source_map::{SourceMap, count_lines};

/// Minified code and the map from it back to the input.
#[derive(Debug, Clone)]
pub struct Minified {
    pub code: String,
    pub map: SourceMap,
}

impl Minified {
    fn into_output(self) -> ProcessorOutput {
        ProcessorOutput::data(self.code).with_map(self.map)
    }
}

/// JavaScript minifier (compress + mangle, comments dropped).
#[derive(Debug, Clone, Copy, Default)]
pub struct JsMinifier;

impl Processor for JsMinifier {
    fn name(&self) -> &str {
        "oxc-minify"
    }

    fn cache_key(&self) -> String {
        "oxc-minify:2".into()
    }

    fn call(&self, input: &ProcessorInput<'_>) -> anyhow::Result<ProcessorOutput> {
        Ok(minify_js(&input.text(), input.filename)?.into_output())
    }
}

/// CSS minifier.
#[derive(Debug, Clone, Copy, Default)]
pub struct CssMinifier;

impl Processor for CssMinifier {
    fn name(&self) -> &str {
        "lightningcss-minify"
    }

    fn cache_key(&self) -> String {
        "lightningcss-minify:2".into()
    }

    fn call(&self, input: &ProcessorInput<'_>) -> anyhow::Result<ProcessorOutput> {
        Ok(minify_css(&input.text(), input.filename)?.into_output())
    }
}

/// Map sources name the input by file name, relative to the output.
fn source_name(filename: &Path) -> String {
    filename
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn decode_map(json: &str, name: &str, code: &str) -> anyhow::Result<SourceMap> {
    let mut map = SourceMap::decode(json).map_err(|err| anyhow!("{name}: bad minifier map: {err}"))?;
    map.file = name.to_string();
    Ok(map.with_line_count(count_lines(code.as_bytes())))
}

/// Minify JavaScript source code.
pub fn minify_js(source: &str, filename: &Path) -> anyhow::Result<Minified> {
    let allocator = Allocator::default();
    let source_type = SourceType::from_path(filename).unwrap_or_else(|_| SourceType::mjs());
    let ret = Parser::new(&allocator, source, source_type).parse();
    if let Some(first) = ret.errors.first() {
        return Err(anyhow!("{}: {}", filename.display(), first));
    }
    let mut program = ret.program;
    let options = MinifierOptions {
        mangle: Some(MangleOptions::default()),
        compress: Some(CompressOptions::smallest()),
    };
    let ret = Minifier::new(options).minify(&allocator, &mut program);

    let name = source_name(filename);
    let generated = Codegen::new()
        .with_options(CodegenOptions {
            minify: true,
            comments: CommentOptions::disabled(),
            source_map_path: Some(PathBuf::from(&name)),
            ..CodegenOptions::default()
        })
        .with_scoping(ret.scoping)
        .build(&program);

    let map = match &generated.map {
        Some(map) => decode_map(&map.to_json_string(), &name, &generated.code)?,
        None => SourceMap::new(name),
    };
    Ok(Minified {
        code: generated.code,
        map,
    })
}

/// Minify CSS source code.
pub fn minify_css(source: &str, filename: &Path) -> anyhow::Result<Minified> {
    let name = source_name(filename);
    let stylesheet = StyleSheet::parse(
        source,
        ParserOptions {
            filename: name.clone(),
            ..ParserOptions::default()
        },
    )
    .map_err(|err| anyhow!("{}: {}", filename.display(), err))?;

    let mut printed_map = parcel_sourcemap::SourceMap::new("/");
    printed_map.add_source(&name);
    let result = stylesheet
        .to_css(PrinterOptions {
            minify: true,
            source_map: Some(&mut printed_map),
            ..PrinterOptions::default()
        })
        .map_err(|err| anyhow!("{}: {}", filename.display(), err))?;

    let json = printed_map
        .to_json(None)
        .map_err(|err| anyhow!("{}: {}", filename.display(), err))?;
    let map = decode_map(&json, &name, &result.code)?;
    Ok(Minified {
        code: result.code,
        map,
    })
}
