//! Structural hashing of nested values.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use super::ContentHash;

// One tag byte per node kind
const TAG_NULL: u8 = 0;
const TAG_BOOL: u8 = 1;
const TAG_INT: u8 = 2;
const TAG_STR: u8 = 3;
const TAG_SEQ: u8 = 4;
const TAG_MAP: u8 = 5;
const TAG_SET: u8 = 6;
const TAG_HASH: u8 = 7;
const TAG_FLOAT: u8 = 8;

/// A value that can be folded into a cache-key digest.
pub trait Digestible {
    fn feed(&self, hasher: &mut blake3::Hasher);
}

fn feed_len(hasher: &mut blake3::Hasher, tag: u8, len: usize) {
    hasher.update(&[tag]);
    hasher.update(&(len as u64).to_le_bytes());
}

impl Digestible for str {
    fn feed(&self, hasher: &mut blake3::Hasher) {
        feed_len(hasher, TAG_STR, self.len());
        hasher.update(self.as_bytes());
    }
}

impl Digestible for String {
    fn feed(&self, hasher: &mut blake3::Hasher) {
        self.as_str().feed(hasher);
    }
}

impl Digestible for Path {
    fn feed(&self, hasher: &mut blake3::Hasher) {
        self.to_string_lossy().as_ref().feed(hasher);
    }
}

impl Digestible for PathBuf {
    fn feed(&self, hasher: &mut blake3::Hasher) {
        self.as_path().feed(hasher);
    }
}

impl Digestible for bool {
    fn feed(&self, hasher: &mut blake3::Hasher) {
        hasher.update(&[TAG_BOOL, u8::from(*self)]);
    }
}

macro_rules! impl_digestible_int {
    ($($ty:ty),*) => {$(
        impl Digestible for $ty {
            fn feed(&self, hasher: &mut blake3::Hasher) {
                hasher.update(&[TAG_INT]);
                hasher.update(&(*self as i128).to_le_bytes());
            }
        }
    )*};
}

impl_digestible_int!(u8, u32, u64, usize, i32, i64);

impl Digestible for ContentHash {
    fn feed(&self, hasher: &mut blake3::Hasher) {
        hasher.update(&[TAG_HASH]);
        hasher.update(self.as_bytes());
    }
}

impl<T: Digestible + ?Sized> Digestible for &T {
    fn feed(&self, hasher: &mut blake3::Hasher) {
        (**self).feed(hasher);
    }
}

impl<T: Digestible> Digestible for Option<T> {
    fn feed(&self, hasher: &mut blake3::Hasher) {
        match self {
            Some(value) => value.feed(hasher),
            None => {
                hasher.update(&[TAG_NULL]);
            }
        }
    }
}

impl<T: Digestible> Digestible for [T] {
    fn feed(&self, hasher: &mut blake3::Hasher) {
        feed_len(hasher, TAG_SEQ, self.len());
        for item in self {
            item.feed(hasher);
        }
    }
}

impl<T: Digestible> Digestible for Vec<T> {
    fn feed(&self, hasher: &mut blake3::Hasher) {
        self.as_slice().feed(hasher);
    }
}

impl<K: Digestible, V: Digestible> Digestible for BTreeMap<K, V> {
    fn feed(&self, hasher: &mut blake3::Hasher) {
        feed_len(hasher, TAG_MAP, self.len());
        for (key, value) in self {
            key.feed(hasher);
            value.feed(hasher);
        }
    }
}

impl<T: Digestible> Digestible for BTreeSet<T> {
    fn feed(&self, hasher: &mut blake3::Hasher) {
        feed_len(hasher, TAG_SET, self.len());
        for item in self {
            item.feed(hasher);
        }
    }
}

impl<A: Digestible, B: Digestible> Digestible for (A, B) {
    fn feed(&self, hasher: &mut blake3::Hasher) {
        feed_len(hasher, TAG_SEQ, 2);
        self.0.feed(hasher);
        self.1.feed(hasher);
    }
}

impl<A: Digestible, B: Digestible, C: Digestible> Digestible for (A, B, C) {
    fn feed(&self, hasher: &mut blake3::Hasher) {
        feed_len(hasher, TAG_SEQ, 3);
        self.0.feed(hasher);
        self.1.feed(hasher);
        self.2.feed(hasher);
    }
}

impl Digestible for serde_json::Value {
    fn feed(&self, hasher: &mut blake3::Hasher) {
        use serde_json::Value;
        match self {
            Value::Null => {
                hasher.update(&[TAG_NULL]);
            }
            Value::Bool(b) => b.feed(hasher),
            Value::Number(n) => match n.as_i64() {
                Some(i) => i.feed(hasher),
                None => {
                    hasher.update(&[TAG_FLOAT]);
                    hasher.update(n.to_string().as_bytes());
                }
            },
            Value::String(s) => s.feed(hasher),
            Value::Array(items) => items.feed(hasher),
            Value::Object(map) => {
                // Sort keys: insertion order must not affect the digest
                let sorted: BTreeMap<&String, &Value> = map.iter().collect();
                sorted.feed(hasher);
            }
        }
    }
}
