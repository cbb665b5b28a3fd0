//! Transformer graph.
//!
//! Transformers are directed edges `from → to` between content types. On
//! every registration the graph is rebuilt into two lookup tables:
//!
//! - **forward**: `(from, to)` → one composed processor covering the whole
//!   path, wrapped with the post-processors of each intermediate source
//!   type and the pre-processors of each intermediate target type
//! - **inverted**: `to` → every type that can reach it, with its hop count
//!
//! Paths are enumerated by walking incoming edges backwards from every edge
//! and never revisit a type, so cycles terminate. When several paths
//! connect the same pair the one with fewer hops wins, ties going to the
//! first discovered.
//!
//! ```text
//! coffee ──▶ js ──▶ minjs
//!
//! forward[coffee][minjs] = [post(coffee), coffee→js, pre(js), post(js), js→minjs, pre(minjs)]
//! inverted[minjs]        = [(js, 1), (coffee, 2)]
//! ```

use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::error::{Error, Result};
use crate::mime::AcceptList;
use crate::processor::{CompositeProcessor, ProcessorRef};

/// Quality factor applied per hop when expanding accept lists.
pub const HOP_QUALITY: f64 = 0.8;

/// A registered `from → to` edge.
#[derive(Clone)]
pub struct Transformer {
    pub from: String,
    pub to: String,
    pub processor: ProcessorRef,
}

/// A discovered path between two types, ready to run.
#[derive(Clone)]
pub struct Transformation {
    /// Types along the path, `from` first
    pub path: Vec<String>,
    pub processor: ProcessorRef,
}

impl Transformation {
    pub fn hops(&self) -> usize {
        self.path.len().saturating_sub(1)
    }
}

/// Lookup for processors attached to a content type.
pub type ProcessorTable = FxHashMap<String, Vec<ProcessorRef>>;

#[derive(Clone, Default)]
pub struct TransformerGraph {
    edges: Vec<Transformer>,
    forward: FxHashMap<String, FxHashMap<String, Transformation>>,
    inverted: FxHashMap<String, Vec<(String, usize)>>,
}

impl TransformerGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registered edges in registration order.
    pub fn edges(&self) -> &[Transformer] {
        &self.edges
    }

    /// Add an edge and rebuild the lookup tables.
    pub fn register(
        &mut self,
        transformer: Transformer,
        preprocessors: &ProcessorTable,
        postprocessors: &ProcessorTable,
    ) {
        self.edges.push(transformer);
        self.rebuild(preprocessors, postprocessors);
    }

    /// Recompute both tables from the registered edges.
    ///
    /// Needed whenever pre- or post-processors change too, since composed
    /// chains embed them.
    pub fn rebuild(&mut self, preprocessors: &ProcessorTable, postprocessors: &ProcessorTable) {
        self.forward.clear();
        self.inverted.clear();

        for last in 0..self.edges.len() {
            for path in self.paths_ending_with(last) {
                self.insert_path(&path, preprocessors, postprocessors);
            }
        }
    }

    /// All simple edge paths (forward order) whose final edge is `last`.
    fn paths_ending_with(&self, last: usize) -> Vec<Vec<usize>> {
        let edges = &self.edges;
        if edges[last].from == edges[last].to {
            return Vec::new();
        }

        let mut found = Vec::new();
        // Paths are built backwards: the final edge first
        let mut stack: Vec<Vec<usize>> = vec![vec![last]];
        while let Some(path) = stack.pop() {
            let head = &edges[path[path.len() - 1]].from;

            let visited: FxHashSet<&str> = path
                .iter()
                .map(|&i| edges[i].from.as_str())
                .chain(std::iter::once(edges[last].to.as_str()))
                .collect();

            // Reverse push keeps registration order when popping
            for (index, edge) in edges.iter().enumerate().rev() {
                if edge.to == *head && !visited.contains(edge.from.as_str()) {
                    let mut longer = path.clone();
                    longer.push(index);
                    stack.push(longer);
                }
            }

            found.push(path.into_iter().rev().collect());
        }
        found
    }

    fn insert_path(
        &mut self,
        path: &[usize],
        preprocessors: &ProcessorTable,
        postprocessors: &ProcessorTable,
    ) {
        let from = self.edges[path[0]].from.clone();
        let to = self.edges[path[path.len() - 1]].to.clone();
        let hops = path.len();

        if let Some(existing) = self.forward.get(&from).and_then(|t| t.get(&to))
            && existing.hops() <= hops
        {
            return;
        }

        let mut types = vec![from.clone()];
        let mut steps: Vec<ProcessorRef> = Vec::new();
        for &index in path {
            let edge = &self.edges[index];
            steps.extend(lookup(postprocessors, &edge.from).iter().cloned());
            steps.push(edge.processor.clone());
            steps.extend(lookup(preprocessors, &edge.to).iter().cloned());
            types.push(edge.to.clone());
        }

        let processor: ProcessorRef = if steps.len() == 1 {
            steps.remove(0)
        } else {
            Arc::new(CompositeProcessor::new(format!("{from}→{to}"), steps))
        };

        let sources = self.inverted.entry(to.clone()).or_default();
        match sources.iter_mut().find(|(ty, _)| *ty == from) {
            Some(entry) => entry.1 = hops,
            None => sources.push((from.clone(), hops)),
        }

        self.forward.entry(from).or_default().insert(
            to,
            Transformation {
                path: types,
                processor,
            },
        );
    }

    /// The composed transformation from `from` to `to`.
    pub fn chain(&self, from: &str, to: &str) -> Result<&Transformation> {
        self.forward
            .get(from)
            .and_then(|targets| targets.get(to))
            .ok_or_else(|| Error::Conversion {
                from: from.to_string(),
                to: to.to_string(),
            })
    }

    /// Types reachable from `from`, in discovery order.
    pub fn targets(&self, from: &str) -> Vec<&str> {
        let mut targets: Vec<(&str, usize)> = self
            .forward
            .get(from)
            .map(|t| t.iter().map(|(to, tr)| (to.as_str(), tr.hops())).collect())
            .unwrap_or_default();
        targets.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(b.0)));
        targets.into_iter().map(|(to, _)| to).collect()
    }

    /// Types that can be transformed into `to`, with hop counts.
    pub fn sources(&self, to: &str) -> &[(String, usize)] {
        self.inverted.get(to).map(Vec::as_slice).unwrap_or_default()
    }

    /// Widen an accept list with every type that transforms into an accepted one.
    ///
    /// Each source is added at `q * 0.8^hops`, after all original entries.
    pub fn expand(&self, accepts: &[(String, f64)]) -> AcceptList {
        let mut expanded: AcceptList = accepts.iter().cloned().collect();
        for (ty, q) in accepts {
            for (source, hops) in self.sources(ty) {
                let exponent = i32::try_from(*hops).unwrap_or(i32::MAX);
                expanded.push((source.clone(), q * HOP_QUALITY.powi(exponent)));
            }
        }
        expanded
    }
}

fn lookup<'a>(table: &'a ProcessorTable, ty: &str) -> &'a [ProcessorRef] {
    table.get(ty).map(Vec::as_slice).unwrap_or_default()
}
