//! Remembered dependency sets of one asset.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// Bounded list of dependency sets, most recently hit first.
///
/// A hit moves its entry to the front; pushing past the depth drops the
/// entry at the back, which is always the least recently hit one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyHistory {
    entries: VecDeque<Vec<String>>,
    #[serde(skip)]
    depth: usize,
}

impl DependencyHistory {
    pub fn new(depth: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            depth: depth.max(1),
        }
    }

    /// Re-bound a history read back from the cache.
    pub fn with_depth(mut self, depth: usize) -> Self {
        self.depth = depth.max(1);
        self.entries.truncate(self.depth);
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = &Vec<String>> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Move the entry at `index` to the front. Returns whether anything moved.
    pub fn promote(&mut self, index: usize) -> bool {
        if index == 0 {
            return false;
        }
        match self.entries.remove(index) {
            Some(entry) => {
                self.entries.push_front(entry);
                true
            }
            None => false,
        }
    }

    /// Record a freshly computed dependency set at the front.
    pub fn push(&mut self, dependencies: Vec<String>) {
        if let Some(pos) = self.entries.iter().position(|e| *e == dependencies) {
            self.promote(pos);
            return;
        }
        self.entries.push_front(dependencies);
        self.entries.truncate(self.depth);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(name: &str) -> Vec<String> {
        vec![format!("file-digest:///srv/{name}")]
    }

    fn fronts(history: &DependencyHistory) -> Vec<String> {
        history.iter().map(|e| e[0].clone()).collect()
    }

    #[test]
    fn test_push_is_most_recent_first() {
        let mut history = DependencyHistory::new(3);
        history.push(set("a"));
        history.push(set("b"));
        assert_eq!(fronts(&history), vec![set("b")[0].clone(), set("a")[0].clone()]);
    }

    #[test]
    fn test_fourth_set_evicts_least_recently_hit() {
        let mut history = DependencyHistory::new(3);
        history.push(set("a"));
        history.push(set("b"));
        history.push(set("c"));
        // [c, b, a]; hitting `a` makes `b` the oldest
        assert!(history.promote(2));
        history.push(set("d"));

        assert_eq!(history.len(), 3);
        let kept = fronts(&history);
        assert_eq!(kept[0], set("d")[0]);
        assert_eq!(kept[1], set("a")[0]);
        assert_eq!(kept[2], set("c")[0]);
        assert!(!kept.contains(&set("b")[0]));
    }

    #[test]
    fn test_repeat_push_promotes_instead_of_duplicating() {
        let mut history = DependencyHistory::new(3);
        history.push(set("a"));
        history.push(set("b"));
        history.push(set("a"));
        assert_eq!(history.len(), 2);
        assert_eq!(fronts(&history)[0], set("a")[0]);
    }

    #[test]
    fn test_depth_survives_cache_roundtrip() {
        let mut history = DependencyHistory::new(2);
        history.push(set("a"));
        history.push(set("b"));
        let json = serde_json::to_string(&history).unwrap();
        let back: DependencyHistory = serde_json::from_str(&json).unwrap();
        let mut back = back.with_depth(2);
        back.push(set("c"));
        assert_eq!(back.len(), 2);
    }
}
