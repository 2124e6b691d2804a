// src/resolver/graph.rs

//! Dependency graph data structures
//!
//! The DAG is an arena of nodes addressed by index; edges store the incoming
//! version spec so conflicts can name their offenders. Nodes are uniquely
//! keyed by `(name, provider)`: one version per package per ecosystem.
//! Diamonds are shared sub-dependencies, which the arena representation
//! handles without ownership gymnastics.

use crate::error::{Error, Result};
use crate::profile::OptionSet;
use crate::recipe::Provider;
use crate::version::VersionSpec;
use semver::Version;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

pub type NodeIndex = usize;

/// Where a resolved package comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Location {
    /// The root package itself
    Local,
    /// Installed on the build host
    System,
    /// Present in the user recipe cache
    Cache,
    /// Must be downloaded from the registry
    Network,
    /// Supplied by the alien ecosystem
    Alien,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Location::Local => "local",
            Location::System => "system",
            Location::Cache => "cache",
            Location::Network => "network",
            Location::Alien => "alien",
        };
        f.write_str(s)
    }
}

/// An incoming constraint: who wants it and what they accept
#[derive(Debug, Clone)]
pub struct IncomingSpec {
    /// Name of the depending package; `None` marks the resolve root
    pub from: Option<String>,
    pub spec: VersionSpec,
}

/// A resolved package instance
#[derive(Debug, Clone)]
pub struct DepNode {
    pub name: String,
    pub provider: Provider,
    pub version: Version,
    /// Pinned recipe revision; system packages have none
    pub revision: Option<String>,
    pub location: Location,
    pub options: OptionSet,
    pub incoming: Vec<IncomingSpec>,
    /// Outgoing edges, in declaration order
    pub deps: Vec<NodeIndex>,
}

impl DepNode {
    pub fn key(&self) -> (String, Provider) {
        (self.name.clone(), self.provider)
    }

    pub fn specs_display(&self) -> Vec<String> {
        self.incoming.iter().map(|i| i.spec.to_string()).collect()
    }
}

/// Arena-backed dependency DAG
#[derive(Debug, Default)]
pub struct DepGraph {
    nodes: Vec<DepNode>,
    by_key: HashMap<(String, Provider), NodeIndex>,
    root: Option<NodeIndex>,
}

impl DepGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn add_node(&mut self, node: DepNode) -> Result<NodeIndex> {
        let key = node.key();
        if self.by_key.contains_key(&key) {
            return Err(Error::Config(format!(
                "duplicate node {}/{} in dependency graph",
                key.0, key.1
            )));
        }
        let idx = self.nodes.len();
        self.by_key.insert(key, idx);
        self.nodes.push(node);
        Ok(idx)
    }

    pub fn set_root(&mut self, idx: NodeIndex) {
        self.root = Some(idx);
    }

    pub fn root(&self) -> Option<NodeIndex> {
        self.root
    }

    pub fn node(&self, idx: NodeIndex) -> &DepNode {
        &self.nodes[idx]
    }

    pub fn node_mut(&mut self, idx: NodeIndex) -> &mut DepNode {
        &mut self.nodes[idx]
    }

    pub fn find(&self, name: &str, provider: Provider) -> Option<NodeIndex> {
        self.by_key.get(&(name.to_string(), provider)).copied()
    }

    pub fn add_edge(&mut self, from: NodeIndex, to: NodeIndex) {
        if !self.nodes[from].deps.contains(&to) {
            self.nodes[from].deps.push(to);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeIndex, &DepNode)> {
        self.nodes.iter().enumerate()
    }

    /// Indices in topological order: every node's dependencies precede it.
    ///
    /// Cycle detection runs as part of the sort; a cycle yields
    /// [`Error::CyclicGraph`] naming the packages on it.
    pub fn topological_order(&self) -> Result<Vec<NodeIndex>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            White,
            Grey,
            Black,
        }

        fn visit(
            graph: &DepGraph,
            idx: NodeIndex,
            marks: &mut [Mark],
            stack: &mut Vec<NodeIndex>,
            order: &mut Vec<NodeIndex>,
        ) -> Result<()> {
            match marks[idx] {
                Mark::Black => return Ok(()),
                Mark::Grey => {
                    let start = stack
                        .iter()
                        .position(|&n| n == idx)
                        .unwrap_or(0);
                    let mut cycle: Vec<String> = stack[start..]
                        .iter()
                        .map(|&n| graph.node(n).name.clone())
                        .collect();
                    cycle.push(graph.node(idx).name.clone());
                    return Err(Error::CyclicGraph { cycle });
                }
                Mark::White => {}
            }
            marks[idx] = Mark::Grey;
            stack.push(idx);
            for &dep in &graph.node(idx).deps {
                visit(graph, dep, marks, stack, order)?;
            }
            stack.pop();
            marks[idx] = Mark::Black;
            order.push(idx);
            Ok(())
        }

        let mut marks = vec![Mark::White; self.nodes.len()];
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack = Vec::new();
        // start at the root so the order is stable, then sweep stragglers
        if let Some(root) = self.root {
            visit(self, root, &mut marks, &mut stack, &mut order)?;
        }
        for idx in 0..self.nodes.len() {
            visit(self, idx, &mut marks, &mut stack, &mut order)?;
        }
        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(name: &str, version: &str) -> DepNode {
        DepNode {
            name: name.to_string(),
            provider: Provider::Native,
            version: Version::parse(version).unwrap(),
            revision: None,
            location: Location::Cache,
            options: OptionSet::new(),
            incoming: vec![],
            deps: vec![],
        }
    }

    #[test]
    fn test_unique_key() {
        let mut graph = DepGraph::new();
        graph.add_node(node("zlib", "1.3.0")).unwrap();
        assert!(graph.add_node(node("zlib", "1.2.0")).is_err());

        // same name, different provider is a distinct node
        let mut alien = node("zlib", "1.3.0");
        alien.provider = Provider::Alien;
        graph.add_node(alien).unwrap();
        assert_eq!(graph.len(), 2);
    }

    #[test]
    fn test_topological_order_deps_first() {
        let mut graph = DepGraph::new();
        let alpha = graph.add_node(node("alpha", "1.0.0")).unwrap();
        let beta = graph.add_node(node("beta", "1.2.0")).unwrap();
        let gamma = graph.add_node(node("gamma", "2.0.1")).unwrap();
        graph.set_root(alpha);
        graph.add_edge(alpha, beta);
        graph.add_edge(beta, gamma);

        let order = graph.topological_order().unwrap();
        let names: Vec<&str> = order.iter().map(|&i| graph.node(i).name.as_str()).collect();
        assert_eq!(names, vec!["gamma", "beta", "alpha"]);
    }

    #[test]
    fn test_diamond() {
        let mut graph = DepGraph::new();
        let root = graph.add_node(node("root", "1.0.0")).unwrap();
        let left = graph.add_node(node("left", "1.0.0")).unwrap();
        let right = graph.add_node(node("right", "1.0.0")).unwrap();
        let shared = graph.add_node(node("shared", "1.0.0")).unwrap();
        graph.set_root(root);
        graph.add_edge(root, left);
        graph.add_edge(root, right);
        graph.add_edge(left, shared);
        graph.add_edge(right, shared);

        let order = graph.topological_order().unwrap();
        let pos = |name: &str| {
            order
                .iter()
                .position(|&i| graph.node(i).name == name)
                .unwrap()
        };
        assert!(pos("shared") < pos("left"));
        assert!(pos("shared") < pos("right"));
        assert_eq!(pos("root"), 3);
    }

    #[test]
    fn test_cycle_detected() {
        let mut graph = DepGraph::new();
        let a = graph.add_node(node("a", "1.0.0")).unwrap();
        let b = graph.add_node(node("b", "1.0.0")).unwrap();
        graph.set_root(a);
        graph.add_edge(a, b);
        graph.add_edge(b, a);

        match graph.topological_order() {
            Err(Error::CyclicGraph { cycle }) => {
                assert!(cycle.contains(&"a".to_string()));
                assert!(cycle.contains(&"b".to_string()));
            }
            other => panic!("expected cycle error, got {other:?}"),
        }
    }
}
