//! Content digests for cache keys and change detection.
//!
//! Every cache key in the pipeline is a blake3 digest of some nested value:
//! a file's bytes, a list of dependency digests, a processor's cache key.
//! [`Digestible`] feeds such values into a hasher with a type tag per
//! node so structurally different values never share a digest.

mod value;

pub use value::Digestible;

/// A 256-bit content hash (blake3 output).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    /// Create a new ContentHash from raw bytes.
    #[inline]
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    #[inline]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Hash a byte buffer directly.
    pub fn of_bytes(bytes: &[u8]) -> Self {
        Self(*blake3::hash(bytes).as_bytes())
    }

    /// Convert to hex string.
    pub fn to_hex(self) -> String {
        hex::encode(self.0)
    }

    /// Create from hex string.
    pub fn from_hex(s: &str) -> Option<Self> {
        let bytes = hex::decode(s).ok()?;
        let arr: [u8; 32] = bytes.try_into().ok()?;
        Some(Self(arr))
    }
}

impl std::fmt::Display for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // First 16 hex chars are plenty for log lines
        write!(f, "{}", &self.to_hex()[..16])
    }
}

impl serde::Serialize for ContentHash {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> serde::Deserialize<'de> for ContentHash {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).ok_or_else(|| serde::de::Error::custom("invalid content hash"))
    }
}

/// Digest any nested value.
pub fn digest<T: Digestible + ?Sized>(value: &T) -> ContentHash {
    let mut hasher = blake3::Hasher::new();
    value.feed(&mut hasher);
    ContentHash::new(*hasher.finalize().as_bytes())
}

/// Digest any nested value, returning lowercase hex.
pub fn hexdigest<T: Digestible + ?Sized>(value: &T) -> String {
    digest(value).to_hex()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeMap, BTreeSet};

    #[test]
    fn test_content_hash_display() {
        let hash = ContentHash::new([0xab; 32]);
        assert_eq!(format!("{}", hash), "abababababababab");
    }

    #[test]
    fn test_content_hash_hex_roundtrip() {
        let original = ContentHash::new([0x12; 32]);
        let recovered = ContentHash::from_hex(&original.to_hex()).unwrap();
        assert_eq!(original, recovered);
        assert!(ContentHash::from_hex("abcd").is_none());
        assert!(ContentHash::from_hex("not hex").is_none());
    }

    #[test]
    fn test_content_hash_serde() {
        let hash = ContentHash::of_bytes(b"body {}");
        let json = serde_json::to_string(&hash).unwrap();
        assert_eq!(json, format!("\"{}\"", hash.to_hex()));
        let back: ContentHash = serde_json::from_str(&json).unwrap();
        assert_eq!(back, hash);
    }

    #[test]
    fn test_digest_is_deterministic() {
        let a = digest(&vec!["file-digest:///a.js", "environment-version"]);
        let b = digest(&vec!["file-digest:///a.js", "environment-version"]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_digest_distinguishes_types() {
        assert_ne!(digest("1"), digest(&1u64));
        assert_ne!(digest("true"), digest(&true));
        assert_ne!(digest(&Vec::<String>::new()), digest(""));
        assert_ne!(digest(b"abc".as_slice()), digest("abc"));
    }

    #[test]
    fn test_digest_sequence_boundaries() {
        // ["ab", "c"] and ["a", "bc"] must not collide
        assert_ne!(digest(&vec!["ab", "c"]), digest(&vec!["a", "bc"]));
    }

    #[test]
    fn test_digest_map_and_set_are_order_independent() {
        let mut m1 = BTreeMap::new();
        m1.insert("b".to_string(), 2u64);
        m1.insert("a".to_string(), 1u64);
        let mut m2 = BTreeMap::new();
        m2.insert("a".to_string(), 1u64);
        m2.insert("b".to_string(), 2u64);
        assert_eq!(digest(&m1), digest(&m2));

        let s1: BTreeSet<&str> = ["x", "y"].into_iter().collect();
        let s2: BTreeSet<&str> = ["y", "x"].into_iter().collect();
        assert_eq!(digest(&s1), digest(&s2));
    }

    #[test]
    fn test_hexdigest_length() {
        assert_eq!(hexdigest("application.js").len(), 64);
    }
}
