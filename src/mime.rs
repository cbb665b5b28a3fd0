//! MIME type registry and HTTP accept utilities.
//!
//! The registry maps file extensions to content types. Extensions may
//! contain dots (`.js.map`); lookups always prefer the longest registered
//! suffix of a file name.

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

/// Common MIME type constants.
pub mod types {
    pub const JAVASCRIPT: &str = "application/javascript";
    pub const CSS: &str = "text/css";
    pub const HTML: &str = "text/html";
    pub const PLAIN: &str = "text/plain";
    pub const JSON: &str = "application/json";
    pub const XML: &str = "application/xml";
    pub const JS_SOURCEMAP: &str = "application/js-sourcemap+json";
    pub const CSS_SOURCEMAP: &str = "application/css-sourcemap+json";
    pub const OCTET_STREAM: &str = "application/octet-stream";

    pub const PNG: &str = "image/png";
    pub const JPEG: &str = "image/jpeg";
    pub const GIF: &str = "image/gif";
    pub const WEBP: &str = "image/webp";
    pub const SVG: &str = "image/svg+xml";
    pub const ICO: &str = "image/x-icon";

    pub const WOFF: &str = "font/woff";
    pub const WOFF2: &str = "font/woff2";
    pub const TTF: &str = "font/ttf";
    pub const OTF: &str = "font/otf";
}

/// Wildcard accept entry.
pub const ANY: &str = "*/*";

/// Quality-weighted accept list, highest preference first after sorting.
pub type AcceptList = SmallVec<[(String, f64); 4]>;

// ============================================================================
// Registry
// ============================================================================

/// A registered content type.
#[derive(Debug, Clone, PartialEq)]
pub struct MimeType {
    pub content_type: String,
    /// Extensions including the leading dot
    pub extensions: Vec<String>,
    /// Whether the type is text that should be charset-decoded on read
    pub charset: bool,
}

/// Extension ↔ content type lookup table.
#[derive(Debug, Clone, Default)]
pub struct MimeRegistry {
    types: FxHashMap<String, MimeType>,
    /// Extension → content type, in registration order
    extensions: Vec<(String, String)>,
}

impl MimeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in web types.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for (ty, exts, charset) in [
            (types::JAVASCRIPT, &[".js", ".mjs"][..], true),
            (types::CSS, &[".css"][..], true),
            (types::HTML, &[".html", ".htm"][..], true),
            (types::PLAIN, &[".txt", ".text"][..], true),
            (types::JSON, &[".json"][..], true),
            (types::XML, &[".xml"][..], true),
            (types::JS_SOURCEMAP, &[".js.map"][..], true),
            (types::CSS_SOURCEMAP, &[".css.map"][..], true),
            (types::SVG, &[".svg"][..], true),
            (types::PNG, &[".png"][..], false),
            (types::JPEG, &[".jpg", ".jpeg"][..], false),
            (types::GIF, &[".gif"][..], false),
            (types::WEBP, &[".webp"][..], false),
            (types::ICO, &[".ico"][..], false),
            (types::WOFF, &[".woff"][..], false),
            (types::WOFF2, &[".woff2"][..], false),
            (types::TTF, &[".ttf"][..], false),
            (types::OTF, &[".otf"][..], false),
        ] {
            registry.register(ty, exts, charset);
        }
        registry
    }

    /// Register a content type with its extensions.
    ///
    /// Re-registering an extension moves it to the new type.
    pub fn register(&mut self, content_type: &str, extensions: &[&str], charset: bool) {
        let extensions: Vec<String> = extensions.iter().map(|e| normalize_ext(e)).collect();
        for ext in &extensions {
            self.extensions.retain(|(e, _)| e != ext);
            self.extensions.push((ext.clone(), content_type.to_string()));
        }
        let entry = self
            .types
            .entry(content_type.to_string())
            .or_insert_with(|| MimeType {
                content_type: content_type.to_string(),
                extensions: Vec::new(),
                charset,
            });
        entry.charset = charset;
        for ext in extensions {
            if !entry.extensions.contains(&ext) {
                entry.extensions.push(ext);
            }
        }
    }

    pub fn get(&self, content_type: &str) -> Option<&MimeType> {
        self.types.get(content_type)
    }

    /// Whether content of this type should be charset-decoded.
    pub fn is_charset(&self, content_type: &str) -> bool {
        self.types.get(content_type).is_some_and(|t| t.charset)
    }

    pub fn type_for_extension(&self, ext: &str) -> Option<&str> {
        let ext = normalize_ext(ext);
        self.extensions
            .iter()
            .find(|(e, _)| *e == ext)
            .map(|(_, ty)| ty.as_str())
    }

    /// Preferred (first registered) extension for a type.
    pub fn preferred_extension(&self, content_type: &str) -> Option<&str> {
        self.types
            .get(content_type)
            .and_then(|t| t.extensions.first())
            .map(String::as_str)
    }

    /// Longest registered extension suffix of a file name.
    ///
    /// Returns `(extension, content_type)`; the extension must leave a
    /// non-empty stem.
    pub fn match_extension(&self, file_name: &str) -> Option<(&str, &str)> {
        self.extensions
            .iter()
            .filter(|(ext, _)| file_name.len() > ext.len() && file_name.ends_with(ext.as_str()))
            .max_by_key(|(ext, _)| ext.len())
            .map(|(ext, ty)| (ext.as_str(), ty.as_str()))
    }

    /// Registration index of an extension (for stable candidate ordering).
    pub fn extension_rank(&self, ext: &str) -> usize {
        self.extensions
            .iter()
            .position(|(e, _)| e == ext)
            .unwrap_or(usize::MAX)
    }

    /// All registered extensions in registration order.
    pub fn extensions(&self) -> impl Iterator<Item = (&str, &str)> {
        self.extensions.iter().map(|(e, t)| (e.as_str(), t.as_str()))
    }
}

fn normalize_ext(ext: &str) -> String {
    if ext.starts_with('.') {
        ext.to_ascii_lowercase()
    } else {
        format!(".{}", ext.to_ascii_lowercase())
    }
}

// ============================================================================
// Accept handling
// ============================================================================

/// Parse an accept header style string into `(type, quality)` pairs.
///
/// `"text/css, */*;q=0.5"` → `[("text/css", 1.0), ("*/*", 0.5)]`.
/// Malformed quality values default to 1.0; entries with zero quality
/// are dropped.
pub fn parse_q_values(accept: &str) -> AcceptList {
    accept
        .split(',')
        .filter_map(|part| {
            let mut pieces = part.split(';');
            let ty = pieces.next()?.trim();
            if ty.is_empty() {
                return None;
            }
            let q = pieces
                .filter_map(|p| p.trim().strip_prefix("q="))
                .find_map(|q| q.trim().parse::<f64>().ok())
                .unwrap_or(1.0);
            (q > 0.0).then(|| (ty.to_string(), q))
        })
        .collect()
}

/// Check whether `value` satisfies `matcher` (`*/*` and `type/*` wildcards).
pub fn match_mime_type(value: &str, matcher: &str) -> bool {
    if matcher == ANY || value == matcher {
        return true;
    }
    match matcher.strip_suffix("/*") {
        Some(major) => value.split('/').next() == Some(major),
        None => false,
    }
}

/// Choose the best candidate for a quality-weighted accept list.
///
/// Accept entries are tried from highest to lowest quality (stable, so
/// equal qualities keep their list order); within one entry candidates
/// are tried in the given order. The first match wins.
pub fn find_best_q_match<'a, T>(
    accepts: &[(String, f64)],
    candidates: &'a [T],
    type_of: impl Fn(&T) -> &str,
) -> Option<&'a T> {
    let mut ordered: Vec<&(String, f64)> = accepts.iter().filter(|(_, q)| *q > 0.0).collect();
    ordered.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    ordered.iter().find_map(|(matcher, _)| {
        candidates
            .iter()
            .find(|c| match_mime_type(type_of(c), matcher))
    })
}
