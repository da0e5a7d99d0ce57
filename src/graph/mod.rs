pub mod edge;

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use petgraph::Direction;
use petgraph::stable_graph::{NodeIndex, StableGraph};

use edge::EdgeKind;

/// Directed import graph of one program: an edge `a -> b` means `a` imports `b`.
#[derive(Debug, Default)]
pub struct ModuleGraph {
    pub graph: StableGraph<PathBuf, EdgeKind>,
    /// Maps file paths to their node indices for O(1) lookup.
    pub file_index: HashMap<PathBuf, NodeIndex>,
}

impl ModuleGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a file node, or return the existing one.
    pub fn add_file(&mut self, path: &Path) -> NodeIndex {
        if let Some(&existing) = self.file_index.get(path) {
            return existing;
        }
        let idx = self.graph.add_node(path.to_path_buf());
        self.file_index.insert(path.to_path_buf(), idx);
        idx
    }

    pub fn add_import(&mut self, from: &Path, to: &Path, kind: EdgeKind) {
        let from = self.add_file(from);
        let to = self.add_file(to);
        self.graph.add_edge(from, to, kind);
    }

    pub fn file_count(&self) -> usize {
        self.file_index.len()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.file_index.contains_key(path)
    }

    /// Files imported by `path`, in insertion order, without duplicates.
    pub fn imports_of(&self, path: &Path) -> Vec<PathBuf> {
        self.neighbors(path, Direction::Outgoing)
    }

    /// Files that import `path` directly.
    pub fn importers_of(&self, path: &Path) -> Vec<PathBuf> {
        self.neighbors(path, Direction::Incoming)
    }

    fn neighbors(&self, path: &Path, direction: Direction) -> Vec<PathBuf> {
        let Some(&idx) = self.file_index.get(path) else {
            return Vec::new();
        };
        let mut seen = HashSet::new();
        let mut out: Vec<PathBuf> = self
            .graph
            .neighbors_directed(idx, direction)
            .filter(|n| seen.insert(*n))
            .map(|n| self.graph[n].clone())
            .collect();
        // petgraph yields the most recent edge first.
        out.reverse();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(s: &str) -> PathBuf {
        PathBuf::from(s)
    }

    fn import(specifier: &str) -> EdgeKind {
        EdgeKind::Imports {
            specifier: specifier.into(),
        }
    }

    #[test]
    fn test_add_file_is_idempotent() {
        let mut graph = ModuleGraph::new();
        let a = graph.add_file(&p("/p/a.ts"));
        assert_eq!(graph.add_file(&p("/p/a.ts")), a);
        assert_eq!(graph.file_count(), 1);
    }

    #[test]
    fn test_importers_and_imports() {
        let mut graph = ModuleGraph::new();
        graph.add_import(&p("/p/a.ts"), &p("/p/b.ts"), import("./b"));
        graph.add_import(&p("/p/a.ts"), &p("/p/c.ts"), import("./c"));
        graph.add_import(&p("/p/c.ts"), &p("/p/b.ts"), import("./b"));

        assert_eq!(graph.imports_of(&p("/p/a.ts")), vec![p("/p/b.ts"), p("/p/c.ts")]);
        let mut importers = graph.importers_of(&p("/p/b.ts"));
        importers.sort();
        assert_eq!(importers, vec![p("/p/a.ts"), p("/p/c.ts")]);
        assert!(graph.importers_of(&p("/p/missing.ts")).is_empty());
    }
}
