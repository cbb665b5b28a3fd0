//! Source maps: decoding, encoding and composition across stages.
//!
//! In memory a [`SourceMap`] holds decoded absolute [`Mapping`]s; on the
//! wire (cache entries, `.map` assets) it is the standard version 3 JSON
//! object with a VLQ `mappings` string.

mod algebra;
pub mod vlq;

pub use algebra::{bsearch_mappings, compose, concat};
pub use vlq::VlqError;

use serde::{Deserialize, Serialize};

/// A position in a text file. Lines are 1-based, columns 0-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Position {
    pub line: u32,
    pub column: u32,
}

impl Position {
    #[inline]
    pub const fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

/// One generated → original correspondence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mapping {
    pub generated: Position,
    pub original: Position,
    /// Index into [`SourceMap::sources`]
    pub source: u32,
    /// Index into [`SourceMap::names`]
    pub name: Option<u32>,
}

/// A decoded source map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawSourceMap", into = "RawSourceMap")]
pub struct SourceMap {
    pub version: u32,
    pub file: String,
    /// Sorted by generated position
    pub mappings: Vec<Mapping>,
    pub sources: Vec<String>,
    pub names: Vec<String>,
    /// Number of lines in the generated file, when known
    pub line_count: Option<u32>,
}

impl SourceMap {
    pub fn new(file: impl Into<String>) -> Self {
        Self {
            version: 3,
            file: file.into(),
            mappings: Vec::new(),
            sources: Vec::new(),
            names: Vec::new(),
            line_count: None,
        }
    }

    /// Line-for-line identity map of `text` onto `source`.
    pub fn identity(file: impl Into<String>, source: impl Into<String>, text: &[u8]) -> Self {
        let lines = count_lines(text);
        let mappings = (1..=lines)
            .map(|line| Mapping {
                generated: Position::new(line, 0),
                original: Position::new(line, 0),
                source: 0,
                name: None,
            })
            .collect();
        Self {
            mappings,
            sources: vec![source.into()],
            line_count: Some(lines),
            ..Self::new(file)
        }
    }

    /// Build from mappings, sorting them by generated position.
    pub fn from_mappings(
        file: impl Into<String>,
        mut mappings: Vec<Mapping>,
        sources: Vec<String>,
        names: Vec<String>,
    ) -> Self {
        mappings.sort_by_key(|m| m.generated);
        Self {
            mappings,
            sources,
            names,
            ..Self::new(file)
        }
    }

    pub fn with_line_count(mut self, lines: u32) -> Self {
        self.line_count = Some(lines);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    /// Generated line count: the recorded count, else the last mapped line.
    pub fn line_count(&self) -> u32 {
        self.line_count
            .unwrap_or_else(|| self.mappings.iter().map(|m| m.generated.line).max().unwrap_or(0))
    }

    /// Parse from JSON.
    pub fn decode(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Serialize to JSON.
    pub fn encode(&self) -> String {
        // Serializing plain strings and integers cannot fail
        serde_json::to_string(self).unwrap_or_default()
    }

    /// The encoded VLQ `mappings` string.
    pub fn mappings_string(&self) -> String {
        vlq::encode_mappings(&self.mappings)
    }

    /// Name of the source file for a mapping.
    pub fn source_of(&self, mapping: &Mapping) -> Option<&str> {
        self.sources.get(mapping.source as usize).map(String::as_str)
    }
}

/// Number of lines a text occupies once it ends with a newline.
pub fn count_lines(text: &[u8]) -> u32 {
    if text.is_empty() {
        return 0;
    }
    let newlines = text.iter().filter(|&&b| b == b'\n').count();
    let trailing = usize::from(!text.ends_with(b"\n"));
    u32::try_from(newlines + trailing).unwrap_or(u32::MAX)
}

/// Wire representation.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawSourceMap {
    version: u32,
    #[serde(default)]
    file: String,
    mappings: String,
    #[serde(default)]
    sources: Vec<String>,
    #[serde(default)]
    names: Vec<String>,
    #[serde(rename = "x_kiln_linecount", default, skip_serializing_if = "Option::is_none")]
    line_count: Option<u32>,
}

impl TryFrom<RawSourceMap> for SourceMap {
    type Error = VlqError;

    fn try_from(raw: RawSourceMap) -> Result<Self, Self::Error> {
        Ok(Self {
            version: raw.version,
            file: raw.file,
            mappings: vlq::decode_mappings(&raw.mappings)?,
            sources: raw.sources,
            names: raw.names,
            line_count: raw.line_count,
        })
    }
}

impl From<SourceMap> for RawSourceMap {
    fn from(map: SourceMap) -> Self {
        Self {
            version: map.version,
            mappings: vlq::encode_mappings(&map.mappings),
            file: map.file,
            sources: map.sources,
            names: map.names,
            line_count: map.line_count,
        }
    }
}
