//! Loaded assets and their metadata.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::digest::ContentHash;
use crate::source_map::SourceMap;
use crate::uri::AssetUri;

// =============================================================================
// OrderedSet
// =============================================================================

/// Insertion-ordered set.
///
/// Required lists are short, so membership is a linear scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderedSet<T> {
    items: Vec<T>,
}

impl<T> Default for OrderedSet<T> {
    fn default() -> Self {
        Self { items: Vec::new() }
    }
}

impl<T: PartialEq> OrderedSet<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append unless already present. Returns whether it was added.
    pub fn insert(&mut self, item: T) -> bool {
        if self.items.contains(&item) {
            return false;
        }
        self.items.push(item);
        true
    }

    pub fn contains(&self, item: &T) -> bool {
        self.items.contains(item)
    }

    pub fn remove(&mut self, item: &T) -> bool {
        let before = self.items.len();
        self.items.retain(|i| i != item);
        self.items.len() != before
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn as_slice(&self) -> &[T] {
        &self.items
    }
}

impl<T: PartialEq> Extend<T> for OrderedSet<T> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        for item in iter {
            self.insert(item);
        }
    }
}

impl<T: PartialEq> FromIterator<T> for OrderedSet<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut set = Self::new();
        set.extend(iter);
        set
    }
}

impl<T> IntoIterator for OrderedSet<T> {
    type Item = T;
    type IntoIter = std::vec::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

impl<'a, T> IntoIterator for &'a OrderedSet<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

// =============================================================================
// Metadata
// =============================================================================

/// Metadata accumulated while building an asset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Metadata {
    /// Dependency URIs whose digests decide cache freshness
    pub dependencies: BTreeSet<String>,
    /// Assets to concatenate before (or around) this one, in order
    pub required: OrderedSet<AssetUri>,
    /// Assets excluded from the bundle along with their requirements
    pub stubbed: BTreeSet<AssetUri>,
    /// Assets that must be exported alongside this one
    pub links: BTreeSet<AssetUri>,
    /// Bundle members, in concatenation order
    pub included: Vec<AssetUri>,
    pub map: Option<SourceMap>,
    pub charset: Option<String>,
    /// Processor-specific values
    pub extra: BTreeMap<String, serde_json::Value>,
}

// =============================================================================
// Asset
// =============================================================================

/// A fully processed asset.
///
/// Assets are immutable and serialized whole into the cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    /// URI including the content id
    pub uri: AssetUri,
    pub load_path: PathBuf,
    pub filename: PathBuf,
    /// Logical path without extensions
    pub name: String,
    /// Logical path with the output extension, e.g. `app/main.js`
    pub logical_path: String,
    pub content_type: String,
    pub source: Vec<u8>,
    pub digest: ContentHash,
    /// Digest of all resolved dependencies when the asset was built
    pub dependencies_digest: ContentHash,
    pub metadata: Metadata,
}

impl Asset {
    /// Content id.
    pub fn id(&self) -> &str {
        self.uri.id.as_deref().unwrap_or_default()
    }

    pub fn length(&self) -> usize {
        self.source.len()
    }

    pub fn hexdigest(&self) -> String {
        self.digest.to_hex()
    }

    pub fn to_string_lossy(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.source)
    }

    pub fn charset(&self) -> Option<&str> {
        self.metadata.charset.as_deref()
    }

    pub fn filename(&self) -> &Path {
        &self.filename
    }

    /// Fingerprinted output path, e.g. `app/main-<hexdigest>.js`.
    pub fn digest_path(&self) -> String {
        let hex = self.hexdigest();
        match split_extension(&self.logical_path) {
            Some((stem, ext)) => format!("{stem}-{hex}{ext}"),
            None => format!("{}-{hex}", self.logical_path),
        }
    }

    pub fn links(&self) -> impl DoubleEndedIterator<Item = &AssetUri> {
        self.metadata.links.iter()
    }

    pub fn source_map(&self) -> Option<&SourceMap> {
        self.metadata.map.as_ref()
    }
}

/// Split `dir/name.ext` into (`dir/name`, `.ext`) on the last dot of the file name.
fn split_extension(logical_path: &str) -> Option<(&str, &str)> {
    let file_start = logical_path.rfind('/').map_or(0, |i| i + 1);
    let dot = logical_path[file_start..].rfind('.')?;
    if dot == 0 {
        return None;
    }
    Some(logical_path.split_at(file_start + dot))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn asset(logical_path: &str, source: &str) -> Asset {
        let uri = AssetUri::new("/srv/assets/app.js")
            .with_type("application/javascript")
            .with_id("abc");
        Asset {
            uri,
            load_path: PathBuf::from("/srv/assets"),
            filename: PathBuf::from("/srv/assets/app.js"),
            name: "app".into(),
            logical_path: logical_path.into(),
            content_type: "application/javascript".into(),
            source: source.as_bytes().to_vec(),
            digest: ContentHash::of_bytes(source.as_bytes()),
            dependencies_digest: ContentHash::of_bytes(b""),
            metadata: Metadata::default(),
        }
    }

    #[test]
    fn test_ordered_set_keeps_first_position() {
        let mut set = OrderedSet::new();
        assert!(set.insert("b"));
        assert!(set.insert("a"));
        assert!(!set.insert("b"));
        assert_eq!(set.as_slice(), &["b", "a"]);

        assert!(set.remove(&"b"));
        assert_eq!(set.as_slice(), &["a"]);
    }

    #[test]
    fn test_digest_path() {
        let a = asset("app/main.js", "var a;");
        let hex = a.hexdigest();
        assert_eq!(a.digest_path(), format!("app/main-{hex}.js"));

        let a = asset("CNAME", "example.com");
        assert_eq!(a.digest_path(), format!("CNAME-{}", a.hexdigest()));

        let a = asset("v1.2/.htaccess", "");
        assert_eq!(a.digest_path(), format!("v1.2/.htaccess-{}", a.hexdigest()));
    }

    #[test]
    fn test_links_walk_both_ways() {
        let mut a = asset("app.js", "");
        a.metadata.links.insert(AssetUri::new("/srv/assets/a.png"));
        a.metadata.links.insert(AssetUri::new("/srv/assets/b.png"));

        let forward: Vec<_> = a.links().map(|uri| uri.path.clone()).collect();
        let mut backward: Vec<_> = a.links().rev().map(|uri| uri.path.clone()).collect();
        backward.reverse();
        assert_eq!(forward, backward);
        assert_eq!(forward[0], PathBuf::from("/srv/assets/a.png"));
    }

    #[test]
    fn test_asset_serde_roundtrip() {
        let mut a = asset("app.js", "var a;");
        a.metadata.dependencies.insert("environment-version".into());
        a.metadata.required.insert(AssetUri::new("/srv/assets/lib.js"));

        let json = serde_json::to_string(&a).unwrap();
        let back: Asset = serde_json::from_str(&json).unwrap();
        assert_eq!(back, a);
        assert_eq!(back.id(), "abc");
    }
}
