//! Header directive processor.
//!
//! Directives live in the comment block at the very top of a file:
//!
//! ```text
//! //= require jquery
//! //= require_tree ./components
//!
//! /*
//!  *= require_self
//!  *= stub legacy
//!  */
//!
//! #= require helpers
//! ```
//!
//! | Directive              | Effect                                         |
//! |------------------------|------------------------------------------------|
//! | `require PATH`         | bundle PATH before this file                   |
//! | `require_self`         | place this file's own content here             |
//! | `require_directory D`  | require every matching file directly in D      |
//! | `require_tree D`       | require every matching file under D            |
//! | `link PATH`            | export PATH alongside this asset               |
//! | `link_directory D [T]` | link every file directly in D (of type T)      |
//! | `link_tree D [T]`      | link every file under D (of type T)            |
//! | `depend_on PATH`       | rebuild when PATH changes                      |
//! | `depend_on_asset PATH` | rebuild when PATH or its dependencies change   |
//! | `stub PATH`            | drop PATH and its requirements from the bundle |
//!
//! Directive lines are blanked out of the output so line numbers stay put.
//! Header lines naming anything else are ordinary comments and stay as they are.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use rustc_hash::FxHashSet;

use crate::asset::OrderedSet;
use crate::error::Error;
use crate::fs::FileSystem;
use crate::path::clean_path;
use crate::resolve::ResolveOptions;
use crate::uri::{AssetUri, file_digest_uri};

use super::{Processor, ProcessorInput, ProcessorOutput};

/// Leading run of blank lines and comments.
static HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\A(?:\s*(?:(?://[^\n]*(?:\n|\z))+|(?:#[^\n]*(?:\n|\z))+|(?s:/\*.*?\*/)))+").unwrap()
});

/// One directive line, e.g. ` *= require foo */`.
static DIRECTIVE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\W*=\s*(\w+.*?)(?:\*/)?\s*$").unwrap());

const KNOWN: &[&str] = &[
    "require",
    "require_self",
    "require_directory",
    "require_tree",
    "link",
    "link_directory",
    "link_tree",
    "depend_on",
    "depend_on_asset",
    "stub",
];

/// Parses header directives into bundle metadata.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectiveProcessor;

impl DirectiveProcessor {
    pub fn new() -> Self {
        Self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Directive {
    line: usize,
    name: String,
    args: Vec<String>,
}

impl Processor for DirectiveProcessor {
    fn name(&self) -> &str {
        "directives"
    }

    fn cache_key(&self) -> String {
        "directives:1".into()
    }

    fn call(&self, input: &ProcessorInput<'_>) -> anyhow::Result<ProcessorOutput> {
        let text = input.text();
        let (data, directives) = extract_directives(&text);

        let mut state = DirectiveState::new(input);
        for directive in &directives {
            state.run(directive)?;
        }

        let mut output = ProcessorOutput::data(data);
        output.required = state.required;
        output.stubbed = state.stubbed;
        output.links = state.links;
        output.dependencies = state.dependencies;
        Ok(output)
    }
}

/// Split the header off `source`, returning the cleaned source and its directives.
fn extract_directives(source: &str) -> (String, Vec<Directive>) {
    let header_len = HEADER.find(source).map_or(0, |m| m.end());
    let (header, body) = source.split_at(header_len);

    let mut cleaned = String::with_capacity(source.len());
    let mut directives = Vec::new();
    for (index, line) in header.split_inclusive('\n').enumerate() {
        let content = line.trim_end_matches(['\n', '\r']);
        match parse_directive(content) {
            Some((name, args)) => {
                directives.push(Directive {
                    line: index + 1,
                    name,
                    args,
                });
                if line.ends_with('\n') {
                    cleaned.push('\n');
                }
            }
            None => cleaned.push_str(line),
        }
    }
    cleaned.push_str(body);
    (cleaned, directives)
}

fn parse_directive(line: &str) -> Option<(String, Vec<String>)> {
    let captures = DIRECTIVE.captures(line)?;
    let mut words = shell_split(captures.get(1)?.as_str()).into_iter();
    let name = words.next().filter(|name| KNOWN.contains(&name.as_str()))?;
    Some((name, words.collect()))
}

/// Whitespace split honouring single and double quotes.
fn shell_split(s: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut quote = None;
    let mut in_word = false;
    for c in s.chars() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => current.push(c),
            None if c == '"' || c == '\'' => {
                quote = Some(c);
                in_word = true;
            }
            None if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            None => {
                current.push(c);
                in_word = true;
            }
        }
    }
    if in_word {
        words.push(current);
    }
    words
}

// =============================================================================
// Directive execution
// =============================================================================

struct DirectiveState<'a, 'b> {
    input: &'a ProcessorInput<'b>,
    base: PathBuf,
    required: OrderedSet<AssetUri>,
    stubbed: BTreeSet<AssetUri>,
    links: BTreeSet<AssetUri>,
    dependencies: BTreeSet<String>,
}

impl<'a, 'b> DirectiveState<'a, 'b> {
    fn new(input: &'a ProcessorInput<'b>) -> Self {
        Self {
            input,
            base: input.filename.parent().map(Path::to_path_buf).unwrap_or_default(),
            required: input.metadata.required.clone(),
            stubbed: BTreeSet::new(),
            links: BTreeSet::new(),
            dependencies: BTreeSet::new(),
        }
    }

    fn run(&mut self, directive: &Directive) -> anyhow::Result<()> {
        let args: Vec<&str> = directive.args.iter().map(String::as_str).collect();
        match (directive.name.as_str(), args.as_slice()) {
            ("require", [path]) => {
                let uri = self.resolve_self(path)?;
                self.required.insert(uri);
            }
            ("require_self", []) => {
                let uri = self.input.uri.clone();
                if !self.required.insert(uri) {
                    return Err(self.error(directive, "require_self can only be called once per file"));
                }
            }
            ("require_directory", [dir]) => {
                let dir = self.directory(directive, dir)?;
                self.dependencies.insert(file_digest_uri(&dir));
                for file in self.files_in(&dir) {
                    self.require_file(&file);
                }
            }
            ("require_tree", [dir]) => {
                let dir = self.directory(directive, dir)?;
                for file in self.walk(&dir, &mut FxHashSet::default()) {
                    self.require_file(&file);
                }
            }
            ("link", [path]) => {
                let resolution = self.input.env.resolve(path, self.options(None))?;
                self.dependencies.extend(resolution.dependencies);
                self.links.insert(resolution.uri);
            }
            ("link_directory", [dir, accept @ ..]) | ("link_tree", [dir, accept @ ..]) if accept.len() <= 1 => {
                let dir = self.directory(directive, dir)?;
                let files = if directive.name == "link_tree" {
                    self.walk(&dir, &mut FxHashSet::default())
                } else {
                    self.dependencies.insert(file_digest_uri(&dir));
                    self.files_in(&dir)
                };
                for file in files {
                    self.link_file(&file, accept.first().copied());
                }
            }
            ("depend_on", [path]) => {
                let resolution = self.input.env.resolve(path, self.options(None))?;
                self.dependencies.extend(resolution.dependencies);
            }
            ("depend_on_asset", [path]) => {
                let resolution = self.input.env.resolve(path, self.options(None))?;
                let asset = self.input.env.load(&resolution.uri)?;
                self.dependencies.extend(resolution.dependencies);
                self.dependencies.extend(asset.metadata.dependencies.iter().cloned());
            }
            ("stub", [path]) => {
                let uri = self.resolve_self(path)?;
                self.stubbed.insert(uri);
            }
            (name, _) => {
                return Err(self.error(
                    directive,
                    &format!("wrong number of arguments for `{name}`"),
                ));
            }
        }
        Ok(())
    }

    fn options<'s>(&'s self, accept: Option<&'s str>) -> ResolveOptions<'s> {
        ResolveOptions {
            accept,
            pipeline: None,
            base_path: Some(&self.base),
        }
    }

    /// Resolve a required path to its `self` pipeline URI.
    fn resolve_self(&mut self, path: &str) -> anyhow::Result<AssetUri> {
        let options = self
            .options(Some(self.input.content_type))
            .with_pipeline("self");
        let resolution = self.input.env.resolve(path, options)?;
        self.dependencies.extend(resolution.dependencies);
        Ok(resolution.uri)
    }

    fn require_file(&mut self, file: &Path) {
        if file == self.input.filename {
            return;
        }
        let path = file.to_string_lossy();
        let options = self
            .options(Some(self.input.content_type))
            .with_pipeline("self");
        if let Ok(resolution) = self.input.env.resolve(&path, options) {
            self.dependencies.extend(resolution.dependencies);
            self.required.insert(resolution.uri);
        }
    }

    fn link_file(&mut self, file: &Path, accept: Option<&str>) {
        let path = file.to_string_lossy();
        if let Ok(resolution) = self.input.env.resolve(&path, self.options(accept)) {
            self.dependencies.extend(resolution.dependencies);
            self.links.insert(resolution.uri);
        }
    }

    /// Directory argument resolved against the current file.
    fn directory(&self, directive: &Directive, arg: &str) -> anyhow::Result<PathBuf> {
        let dir = clean_path(&self.base.join(arg));
        if !self.input.env.fs().is_directory(&dir) {
            return Err(self.error(directive, &format!("`{arg}` is not a directory")));
        }
        if self.input.env.config().load_path_for(&dir).is_none() {
            return Err(Error::OutsideLoadPaths { path: dir }.into());
        }
        Ok(dir)
    }

    fn files_in(&self, dir: &Path) -> Vec<PathBuf> {
        let fs = self.input.env.fs();
        fs.entries(dir)
            .into_iter()
            .map(|name| dir.join(name))
            .filter(|path| fs.is_file(path))
            .collect()
    }

    /// Files under `dir`, recording every directory visited as a dependency.
    /// Directories already in `visited` (by canonical path) are skipped.
    fn walk(&mut self, dir: &Path, visited: &mut FxHashSet<PathBuf>) -> Vec<PathBuf> {
        let env = self.input.env;
        let fs = env.fs();
        if !visited.insert(fs.canonicalize(dir)) {
            return Vec::new();
        }
        self.dependencies.insert(file_digest_uri(dir));
        let mut files = Vec::new();
        for name in fs.entries(dir) {
            let path = dir.join(name);
            if fs.is_directory(&path) {
                files.extend(self.walk(&path, visited));
            } else if fs.is_file(&path) {
                files.push(path);
            }
        }
        files
    }

    fn error(&self, directive: &Directive, message: &str) -> anyhow::Error {
        Error::Directive {
            path: self.input.filename.to_path_buf(),
            line: directive.line,
            message: message.to_string(),
        }
        .into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(directives: &[Directive]) -> Vec<(String, Vec<String>)> {
        directives
            .iter()
            .map(|d| (d.name.clone(), d.args.clone()))
            .collect()
    }

    #[test]
    fn test_line_comment_header() {
        let source = "//= require jquery\n//= require_tree ./lib\n// plain comment\n\nvar a = 1;\n//= require late\n";
        let (data, directives) = extract_directives(source);

        assert_eq!(
            names(&directives),
            vec![
                ("require".to_string(), vec!["jquery".to_string()]),
                ("require_tree".to_string(), vec!["./lib".to_string()]),
            ]
        );
        assert_eq!(directives[1].line, 2);
        // Directive lines are blanked, everything else kept
        assert_eq!(data, "\n\n// plain comment\n\nvar a = 1;\n//= require late\n");
    }

    #[test]
    fn test_block_comment_header() {
        let source = "/*\n *= require_self\n *= require reset\n */\nbody { color: red; }\n";
        let (data, directives) = extract_directives(source);
        assert_eq!(
            names(&directives),
            vec![
                ("require_self".to_string(), vec![]),
                ("require".to_string(), vec!["reset".to_string()]),
            ]
        );
        assert_eq!(data, "/*\n\n\n */\nbody { color: red; }\n");
    }

    #[test]
    fn test_hash_comments_and_single_line_block() {
        let (_, directives) = extract_directives("#= require helpers\nalert 'hi'\n");
        assert_eq!(directives.len(), 1);

        let (data, directives) = extract_directives("/*= link logo.png */\nbody{}");
        assert_eq!(names(&directives)[0], ("link".to_string(), vec!["logo.png".to_string()]));
        assert_eq!(data, "\nbody{}");
    }

    #[test]
    fn test_no_header() {
        let (data, directives) = extract_directives("var a = '//= require nope';\n");
        assert!(directives.is_empty());
        assert_eq!(data, "var a = '//= require nope';\n");
    }

    #[test]
    fn test_unknown_names_are_comments() {
        let source = "//= frobnicate things\n//= require a\n";
        let (data, directives) = extract_directives(source);
        assert_eq!(names(&directives), vec![("require".to_string(), vec!["a".to_string()])]);
        assert_eq!(data, "//= frobnicate things\n\n");
    }

    #[test]
    fn test_shell_split() {
        assert_eq!(shell_split("a  b"), vec!["a", "b"]);
        assert_eq!(shell_split("\"my file\" 'x y' z"), vec!["my file", "x y", "z"]);
        assert_eq!(shell_split("''"), vec![""]);
        assert!(shell_split("   ").is_empty());
    }
}
