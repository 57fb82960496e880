// src/resolver/graph.rs

//! Dependency graph and install ordering
//!
//! Edges point from a package to what it needs. Cycles are allowed: the
//! ordering walk marks a node on entry, so a back edge simply stops there.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use tracing::debug;

/// Whether an edge is needed at run time or only to build
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepKind {
    Runtime,
    Build,
}

/// A dependency edge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyEdge {
    pub from: String,
    pub to: String,
    pub kind: DepKind,
}

/// Dependency graph for resolution and ordering
#[derive(Debug, Default)]
pub struct DependencyGraph {
    /// Outgoing edges in declaration order
    edges: BTreeMap<String, Vec<DependencyEdge>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an edge; a duplicate `from -> to` keeps the runtime kind if either is runtime
    pub fn add_edge(&mut self, from: &str, to: &str, kind: DepKind) {
        let edges = self.edges.entry(from.to_string()).or_default();
        if let Some(existing) = edges.iter_mut().find(|e| e.to == to) {
            if kind == DepKind::Runtime {
                existing.kind = DepKind::Runtime;
            }
            return;
        }
        edges.push(DependencyEdge {
            from: from.to_string(),
            to: to.to_string(),
            kind,
        });
    }

    pub fn dependencies(&self, name: &str) -> &[DependencyEdge] {
        self.edges.get(name).map(Vec::as_slice).unwrap_or_default()
    }

    /// Everything reachable from `roots` through runtime edges only, roots included
    pub fn runtime_closure<'a>(&self, roots: impl IntoIterator<Item = &'a str>) -> BTreeSet<String> {
        let mut seen = BTreeSet::new();
        let mut stack: Vec<String> = roots.into_iter().map(str::to_string).collect();

        while let Some(name) = stack.pop() {
            if !seen.insert(name.clone()) {
                continue;
            }
            for edge in self.dependencies(&name) {
                if edge.kind == DepKind::Runtime && !seen.contains(&edge.to) {
                    stack.push(edge.to.clone());
                }
            }
        }
        seen
    }

    /// Depth-first post-order from `roots`: dependencies before dependents
    ///
    /// Only names for which `include` holds appear in the result, but the
    /// walk passes through every node so ordering constraints carry over.
    pub fn install_order<'a>(
        &self,
        roots: impl IntoIterator<Item = &'a str>,
        include: impl Fn(&str) -> bool,
    ) -> Vec<String> {
        let mut visited = HashSet::new();
        let mut on_path = HashSet::new();
        let mut order = Vec::new();

        for root in roots {
            self.visit(root, &mut visited, &mut on_path, &mut order);
        }

        order.retain(|name| include(name));
        order
    }

    fn visit(
        &self,
        name: &str,
        visited: &mut HashSet<String>,
        on_path: &mut HashSet<String>,
        order: &mut Vec<String>,
    ) {
        if !visited.insert(name.to_string()) {
            if on_path.contains(name) {
                debug!("Dependency cycle through {}", name);
            }
            return;
        }
        on_path.insert(name.to_string());

        for edge in self.dependencies(name) {
            self.visit(&edge.to, visited, on_path, order);
        }

        on_path.remove(name);
        order.push(name.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_install_order_chain() {
        let mut graph = DependencyGraph::new();
        graph.add_edge("a", "b", DepKind::Runtime);
        graph.add_edge("b", "c", DepKind::Runtime);

        assert_eq!(graph.install_order(["a"], |_| true), vec!["c", "b", "a"]);
    }

    #[test]
    fn test_install_order_tolerates_cycles() {
        let mut graph = DependencyGraph::new();
        graph.add_edge("a", "b", DepKind::Runtime);
        graph.add_edge("b", "a", DepKind::Runtime);

        assert_eq!(graph.install_order(["a"], |_| true), vec!["b", "a"]);
    }

    #[test]
    fn test_install_order_filter_and_shared_deps() {
        let mut graph = DependencyGraph::new();
        graph.add_edge("xterm", "libx11", DepKind::Runtime);
        graph.add_edge("xterm", "glibc", DepKind::Runtime);
        graph.add_edge("xclock", "libx11", DepKind::Runtime);

        let order = graph.install_order(["xterm", "xclock"], |n| n != "glibc");
        assert_eq!(order, vec!["libx11", "xterm", "xclock"]);
    }

    #[test]
    fn test_runtime_closure_skips_build_edges() {
        let mut graph = DependencyGraph::new();
        graph.add_edge("app", "lib", DepKind::Runtime);
        graph.add_edge("app", "cmake", DepKind::Build);
        graph.add_edge("cmake", "libuv", DepKind::Runtime);

        let closure = graph.runtime_closure(["app"]);
        assert_eq!(
            closure.into_iter().collect::<Vec<_>>(),
            vec!["app", "lib"]
        );
    }

    #[test]
    fn test_duplicate_edge_promotes_to_runtime() {
        let mut graph = DependencyGraph::new();
        graph.add_edge("app", "python", DepKind::Build);
        graph.add_edge("app", "python", DepKind::Runtime);
        assert_eq!(graph.dependencies("app").len(), 1);
        assert_eq!(graph.dependencies("app")[0].kind, DepKind::Runtime);
    }
}
