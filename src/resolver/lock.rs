// src/resolver/lock.rs

//! Lock file serialization (`dop.lock`)
//!
//! The lock is the resolver's output made durable: the node list in
//! topological order, each with its pinned version, revision, provider,
//! location, the incoming specs that led to the pick, and its options.
//! A lock older than the recipe, or one whose root edges no longer match
//! the recipe's direct dependencies, is stale.

use crate::error::{Error, Result};
use crate::profile::OptionSet;
use crate::recipe::{DepSpec, Provider};
use crate::resolver::graph::{DepGraph, Location};
use semver::Version;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub const LOCK_SCHEMA: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockNode {
    pub name: String,
    pub version: Version,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
    pub provider: Provider,
    pub location: Location,
    pub specs: Vec<String>,
    #[serde(default, skip_serializing_if = "OptionSet::is_empty")]
    pub options: OptionSet,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockFile {
    pub schema: u32,
    pub nodes: Vec<LockNode>,
}

impl LockFile {
    /// Snapshot a resolved graph, nodes in topological order.
    pub fn from_graph(graph: &DepGraph) -> Result<LockFile> {
        let order = graph.topological_order()?;
        let nodes = order
            .into_iter()
            .map(|idx| {
                let node = graph.node(idx);
                LockNode {
                    name: node.name.clone(),
                    version: node.version.clone(),
                    revision: node.revision.clone(),
                    provider: node.provider,
                    location: node.location,
                    specs: node.specs_display(),
                    options: node.options.clone(),
                }
            })
            .collect();
        Ok(LockFile {
            schema: LOCK_SCHEMA,
            nodes,
        })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let text = serde_json::to_string_pretty(self)?;
        fs::write(path, text + "\n")
            .map_err(Error::io_context(format!("writing {}", path.display())))?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<LockFile> {
        let text = fs::read_to_string(path)
            .map_err(Error::io_context(format!("reading {}", path.display())))?;
        let lock: LockFile = serde_json::from_str(&text)
            .map_err(|e| Error::LockStale(format!("{}: {e}", path.display())))?;
        if lock.schema != LOCK_SCHEMA {
            return Err(Error::LockStale(format!(
                "unsupported lock schema {}",
                lock.schema
            )));
        }
        Ok(lock)
    }

    pub fn find(&self, name: &str, provider: Provider) -> Option<&LockNode> {
        self.nodes
            .iter()
            .find(|n| n.name == name && n.provider == provider)
    }

    /// Check the lock still matches the recipe's direct dependencies: every
    /// declared dep has a node whose version satisfies the declared spec.
    pub fn validate(&self, direct_deps: &[DepSpec]) -> Result<()> {
        for dep in direct_deps {
            let node = self.find(&dep.name, dep.provider).ok_or_else(|| {
                Error::LockStale(format!("dependency {} is not in the lock", dep.name))
            })?;
            if !dep.spec.matches(&node.version) {
                return Err(Error::LockStale(format!(
                    "{}@{} no longer satisfies {}",
                    node.name, node.version, dep.spec
                )));
            }
        }
        Ok(())
    }

    /// Pinned revision for a node, used to keep resolution reproducible.
    pub fn pinned_revision(&self, name: &str, provider: Provider, version: &Version) -> Option<String> {
        self.find(name, provider)
            .filter(|n| &n.version == version)
            .and_then(|n| n.revision.clone())
    }
}
