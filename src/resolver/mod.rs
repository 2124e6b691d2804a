// src/resolver/mod.rs

//! Dependency resolution
//!
//! Builds the DAG of dependency nodes for a root recipe. Per package the
//! resolver intersects every incoming version spec, picks a version under
//! the configured heuristics, pins a revision for native packages, and
//! propagates namespaced options. The result serializes to `dop.lock`.
//!
//! Version choices are made with the constraints known at the time; when a
//! later edge invalidates an earlier pick, the pass restarts with the
//! accumulated constraint set. Constraints only ever grow, so the loop
//! converges (and is belt-and-braces bounded).

pub mod graph;
pub mod lock;

pub use graph::{DepGraph, DepNode, Location, NodeIndex};
pub use lock::LockFile;

use crate::error::{Error, Result};
use crate::profile::{OptionSet, Profile};
use crate::recipe::{DepSpec, Provider, Recipe};
use crate::services::DepServices;
use crate::version::VersionSpec;
use graph::IncomingSpec;
use semver::Version;
use std::collections::{HashMap, VecDeque};
use tracing::{debug, info};

const MAX_PASSES: usize = 64;

/// Policy for choosing among candidate package sources and versions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Heuristics {
    /// System installation first, then cache, then network
    #[default]
    PreferSystem,
    /// Cache first, then system, then network
    PreferCache,
    /// Whatever is on local disk wins; never consult the system
    PreferLocal,
    /// Highest satisfying version regardless of where it lives
    PickHighest,
}

/// Whether system packages may satisfy dependencies at all
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SystemPolicy {
    #[default]
    Allow,
    Disallow,
}

/// Everything the resolver needs besides the recipe
pub struct ResolveConfig {
    pub profile: Profile,
    pub options: OptionSet,
    pub heuristics: Heuristics,
    pub system: SystemPolicy,
}

struct Constraint {
    from: String,
    spec: VersionSpec,
    options: OptionSet,
}

type Key = (String, Provider);

/// Resolve the dependency DAG of `root`.
///
/// `pinned` supplies revisions from an existing lock so re-resolution stays
/// reproducible.
pub fn resolve(
    root: &Recipe,
    cfg: &ResolveConfig,
    services: &DepServices,
    pinned: Option<&LockFile>,
) -> Result<DepGraph> {
    let mut resolver = Resolver {
        cfg,
        services,
        pinned,
        constraints: HashMap::new(),
        deps_cache: HashMap::new(),
    };
    for pass in 0..MAX_PASSES {
        match resolver.build_pass(root)? {
            Pass::Done(graph) => {
                info!(
                    "resolved {} package(s) in {} pass(es)",
                    graph.len(),
                    pass + 1
                );
                return Ok(graph);
            }
            Pass::Restart => {
                debug!("resolution pass {} invalidated a pick, restarting", pass + 1);
            }
        }
    }
    Err(Error::Config(
        "dependency resolution did not converge".to_string(),
    ))
}

enum Pass {
    Done(DepGraph),
    Restart,
}

struct Resolver<'a> {
    cfg: &'a ResolveConfig,
    services: &'a DepServices,
    pinned: Option<&'a LockFile>,
    /// All constraints ever seen for a package, kept across passes
    constraints: HashMap<Key, Vec<Constraint>>,
    /// Declared dependencies per chosen (package, version)
    deps_cache: HashMap<(String, Provider, Version), Vec<DepSpec>>,
}

impl Resolver<'_> {
    fn build_pass(&mut self, root: &Recipe) -> Result<Pass> {
        let mut graph = DepGraph::new();
        let root_idx = graph.add_node(DepNode {
            name: root.name.clone(),
            provider: Provider::Native,
            version: root.version.clone(),
            revision: root.revision.clone(),
            location: Location::Local,
            options: self.cfg.options.for_root(),
            incoming: vec![],
            deps: vec![],
        })?;
        graph.set_root(root_idx);

        let mut queue: VecDeque<(NodeIndex, DepSpec)> = VecDeque::new();
        for dep in root.dependencies(&self.cfg.profile)? {
            queue.push_back((root_idx, dep));
        }

        while let Some((parent, dep)) = queue.pop_front() {
            let key: Key = (dep.name.clone(), dep.provider);
            let from = graph.node(parent).name.clone();

            let known = self.constraints.entry(key.clone()).or_default();
            if !known.iter().any(|c| c.from == from && c.spec == dep.spec) {
                known.push(Constraint {
                    from: from.clone(),
                    spec: dep.spec.clone(),
                    options: dep.options.clone(),
                });
            }

            if let Some(idx) = graph.find(&dep.name, dep.provider) {
                graph.add_edge(parent, idx);
                let node = graph.node_mut(idx);
                if !node
                    .incoming
                    .iter()
                    .any(|i| i.from.as_deref() == Some(from.as_str()) && i.spec == dep.spec)
                {
                    node.incoming.push(IncomingSpec {
                        from: Some(from.clone()),
                        spec: dep.spec.clone(),
                    });
                }
                if !dep.spec.matches(&node.version) {
                    // the earlier pick no longer satisfies everyone
                    return Ok(Pass::Restart);
                }
                continue;
            }

            let (version, location) = self.pick(&key)?;
            let revision = self.pin_revision(&key, &version, location)?;
            let options = self.node_options(&key)?;

            let idx = graph.add_node(DepNode {
                name: dep.name.clone(),
                provider: dep.provider,
                version: version.clone(),
                revision,
                location,
                options,
                incoming: vec![IncomingSpec {
                    from: Some(from),
                    spec: dep.spec.clone(),
                }],
                deps: vec![],
            })?;
            graph.add_edge(parent, idx);

            // system packages carry their own dependencies; everything else
            // is expanded from its recipe
            if location != Location::System {
                let revision = graph.node(idx).revision.clone();
                for sub in self.dependencies_of(&key, &version, revision.as_deref())? {
                    queue.push_back((idx, sub));
                }
            }
        }

        // final consistency sweep: every node must satisfy every constraint
        for (_, node) in graph.iter() {
            if let Some(known) = self.constraints.get(&node.key()) {
                if !known.iter().all(|c| c.spec.matches(&node.version)) {
                    return Ok(Pass::Restart);
                }
            }
        }

        Ok(Pass::Done(graph))
    }

    /// Pick a version and location under the configured heuristics.
    fn pick(&self, key: &Key) -> Result<(Version, Location)> {
        let (name, provider) = key;
        let specs: Vec<&VersionSpec> = self.constraints[key].iter().map(|c| &c.spec).collect();
        let service = self.services.provider(*provider)?;

        let matching = |mut versions: Vec<Version>| -> Vec<Version> {
            versions.retain(|v| specs.iter().all(|s| s.matches(v)));
            versions.sort();
            versions
        };

        if *provider == Provider::Alien {
            let candidates = matching(service.available_versions(name)?);
            return match candidates.last() {
                Some(v) => Ok((v.clone(), Location::Alien)),
                None => Err(self.unsatisfiable(key)),
            };
        }

        let system = match self.cfg.system {
            SystemPolicy::Disallow => None,
            SystemPolicy::Allow => service
                .system_version(name)?
                .filter(|v| specs.iter().all(|s| s.matches(v))),
        };
        let cached = matching(service.cached_versions(name)?);
        let network = matching(service.available_versions(name)?);

        let from_cache = |c: &[Version]| c.last().map(|v| (v.clone(), Location::Cache));
        let from_network = |n: &[Version]| n.last().map(|v| (v.clone(), Location::Network));
        let from_system = |s: &Option<Version>| s.clone().map(|v| (v, Location::System));

        let choice = match self.cfg.heuristics {
            Heuristics::PreferSystem => from_system(&system)
                .or_else(|| from_cache(&cached))
                .or_else(|| from_network(&network)),
            Heuristics::PreferCache => from_cache(&cached)
                .or_else(|| from_system(&system))
                .or_else(|| from_network(&network)),
            Heuristics::PreferLocal => from_cache(&cached).or_else(|| from_network(&network)),
            Heuristics::PickHighest => {
                let mut best: Option<(Version, Location)> = None;
                let mut consider = |candidate: Option<(Version, Location)>| {
                    if let Some((v, loc)) = candidate {
                        match &best {
                            // cache beats network beats system at equal version,
                            // by the order considered below
                            Some((bv, _)) if *bv >= v => {}
                            _ => best = Some((v, loc)),
                        }
                    }
                };
                consider(from_cache(&cached));
                consider(from_network(&network));
                consider(from_system(&system));
                best
            }
        };

        choice.ok_or_else(|| self.unsatisfiable(key))
    }

    fn unsatisfiable(&self, key: &Key) -> Error {
        let known = &self.constraints[key];
        Error::UnsatisfiableConstraint {
            name: key.0.clone(),
            specs: known.iter().map(|c| c.spec.to_string()).collect(),
            offenders: known.iter().map(|c| c.from.clone()).collect(),
        }
    }

    /// Native packages pin the latest-created revision for the chosen
    /// version, or whatever an existing lock pinned before.
    fn pin_revision(&self, key: &Key, version: &Version, location: Location) -> Result<Option<String>> {
        if key.1 != Provider::Native || location == Location::System {
            return Ok(None);
        }
        if let Some(lock) = self.pinned {
            if let Some(rev) = lock.pinned_revision(&key.0, key.1, version) {
                return Ok(Some(rev));
            }
        }
        self.services.provider(key.1)?.latest_revision(&key.0, version)
    }

    /// Options attached to a node: every depending edge's namespaced options
    /// merged, then the user's own `pkg/opt` settings on top. Disagreement
    /// between edges is a conflict.
    fn node_options(&self, key: &Key) -> Result<OptionSet> {
        let known = &self.constraints[key];
        let mut merged = OptionSet::new();
        for c in known {
            let conflicts = merged.conflicts(&c.options);
            if !conflicts.is_empty() {
                return Err(Error::InvalidOption(format!(
                    "conflicting options for {}: {} (set by {})",
                    key.0,
                    conflicts.join(", "),
                    known
                        .iter()
                        .map(|c| c.from.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                )));
            }
            merged.merge(&c.options);
        }
        merged.merge(&self.cfg.options.for_dependency(&key.0));
        Ok(merged)
    }

    fn dependencies_of(
        &mut self,
        key: &Key,
        version: &Version,
        revision: Option<&str>,
    ) -> Result<Vec<DepSpec>> {
        let cache_key = (key.0.clone(), key.1, version.clone());
        if let Some(deps) = self.deps_cache.get(&cache_key) {
            return Ok(deps.clone());
        }
        let service = self.services.provider(key.1)?;
        let dir = service.pack_recipe(&key.0, version, revision)?;
        let recipe = Recipe::load(&dir)?;
        let deps = recipe.dependencies(&self.cfg.profile)?;
        self.deps_cache.insert(cache_key, deps.clone());
        Ok(deps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::{BuildType, HostInfo, OptionValue, Os};
    use crate::recipe_dir::{RecipeDir, RECIPE_FILE};
    use crate::services::{DepProvider, NativeProvider, RecipeCache};
    use std::fs;
    use std::path::Path;

    fn profile() -> Profile {
        Profile::new(
            "default",
            HostInfo {
                os: Os::Linux,
                arch: "x86_64".to_string(),
            },
            BuildType::Debug,
            vec![],
        )
    }

    fn config(heuristics: Heuristics) -> ResolveConfig {
        ResolveConfig {
            profile: profile(),
            options: OptionSet::new(),
            heuristics,
            system: SystemPolicy::Disallow,
        }
    }

    /// Seed a cache entry with a recipe script.
    fn seed(cache_root: &Path, name: &str, version: &str, deps: &str) {
        let dir = cache_root.join(name).join(version).join("0000000000000000");
        fs::create_dir_all(&dir).unwrap();
        let body = if deps.is_empty() {
            format!("let name = \"{name}\";\nlet version = \"{version}\";\nfn build(d, c, i) {{}}\n")
        } else {
            format!(
                "let name = \"{name}\";\nlet version = \"{version}\";\nlet dependencies = #{{ {deps} }};\nfn build(d, c, i) {{}}\n"
            )
        };
        fs::write(dir.join(RECIPE_FILE), body).unwrap();
    }

    fn offline_services(cache_root: &Path) -> DepServices {
        let native = NativeProvider::new(
            None,
            RecipeCache::new(cache_root.to_path_buf()),
            true,
            true,
        );
        DepServices::new(Box::new(native), None)
    }

    fn root_recipe(dir: &Path, body: &str) -> Recipe {
        fs::write(dir.join(RECIPE_FILE), body).unwrap();
        let mut recipe = Recipe::load(&RecipeDir::new(dir).unwrap()).unwrap();
        recipe.revision = Some("1122334455667788".to_string());
        recipe
    }

    #[test]
    fn test_no_dependencies() {
        let root_dir = tempfile::tempdir().unwrap();
        let recipe = root_recipe(
            root_dir.path(),
            "let name = \"alpha\";\nlet version = \"0.1.0\";\nfn build(d, c, i) {}\n",
        );
        let cache = tempfile::tempdir().unwrap();
        let services = offline_services(cache.path());
        let graph = resolve(&recipe, &config(Heuristics::default()), &services, None).unwrap();
        assert_eq!(graph.len(), 1);
        assert_eq!(graph.node(graph.root().unwrap()).name, "alpha");
    }

    #[test]
    fn test_two_level_pick_highest() {
        let cache = tempfile::tempdir().unwrap();
        seed(cache.path(), "beta", "1.2.0", "gamma: \"~>2.0.0\"");
        seed(cache.path(), "gamma", "2.0.0", "");
        seed(cache.path(), "gamma", "2.0.1", "");
        seed(cache.path(), "gamma", "2.1.0", "");

        let root_dir = tempfile::tempdir().unwrap();
        let recipe = root_recipe(
            root_dir.path(),
            "let name = \"alpha\";\nlet version = \"1.0.0\";\nlet dependencies = #{ beta: \">=1.0.0\" };\nfn build(d, c, i) {}\n",
        );
        let services = offline_services(cache.path());
        let graph = resolve(&recipe, &config(Heuristics::PickHighest), &services, None).unwrap();

        let order = graph.topological_order().unwrap();
        let names: Vec<String> = order
            .iter()
            .map(|&i| format!("{}@{}", graph.node(i).name, graph.node(i).version))
            .collect();
        assert_eq!(
            names,
            vec!["gamma@2.0.1", "beta@1.2.0", "alpha@1.0.0"]
        );
    }

    #[test]
    fn test_diamond_intersection() {
        let cache = tempfile::tempdir().unwrap();
        seed(cache.path(), "left", "1.0.0", "shared: \">=1.0.0\"");
        seed(cache.path(), "right", "1.0.0", "shared: \"~>1.2.0\"");
        seed(cache.path(), "shared", "1.2.3", "");
        seed(cache.path(), "shared", "1.3.0", "");

        let root_dir = tempfile::tempdir().unwrap();
        let recipe = root_recipe(
            root_dir.path(),
            "let name = \"top\";\nlet version = \"1.0.0\";\nlet dependencies = #{ left: \"*\", right: \"*\" };\nfn build(d, c, i) {}\n",
        );
        let services = offline_services(cache.path());
        let graph = resolve(&recipe, &config(Heuristics::PickHighest), &services, None).unwrap();

        let idx = graph.find("shared", Provider::Native).unwrap();
        // ~>1.2.0 excludes 1.3.0
        assert_eq!(graph.node(idx).version, Version::parse("1.2.3").unwrap());
        assert_eq!(graph.node(idx).incoming.len(), 2);
    }

    #[test]
    fn test_unsatisfiable_reports_offenders() {
        let cache = tempfile::tempdir().unwrap();
        seed(cache.path(), "left", "1.0.0", "shared: \"==1.0.0\"");
        seed(cache.path(), "right", "1.0.0", "shared: \"==2.0.0\"");
        seed(cache.path(), "shared", "1.0.0", "");
        seed(cache.path(), "shared", "2.0.0", "");

        let root_dir = tempfile::tempdir().unwrap();
        let recipe = root_recipe(
            root_dir.path(),
            "let name = \"top\";\nlet version = \"1.0.0\";\nlet dependencies = #{ left: \"*\", right: \"*\" };\nfn build(d, c, i) {}\n",
        );
        let services = offline_services(cache.path());
        let err = resolve(&recipe, &config(Heuristics::PickHighest), &services, None).unwrap_err();
        match err {
            Error::UnsatisfiableConstraint { name, specs, offenders } => {
                assert_eq!(name, "shared");
                assert_eq!(specs.len(), 2);
                assert!(offenders.contains(&"left".to_string()));
                assert!(offenders.contains(&"right".to_string()));
            }
            other => panic!("expected unsatisfiable, got {other}"),
        }
    }

    #[test]
    fn test_later_constraint_restarts_pick() {
        // first encounters shared via left ("*", would pick 2.0.0), then
        // right demands ==1.0.0; a restart must settle on 1.0.0
        let cache = tempfile::tempdir().unwrap();
        seed(cache.path(), "left", "1.0.0", "shared: \"*\"");
        seed(cache.path(), "right", "1.0.0", "shared: \"==1.0.0\"");
        seed(cache.path(), "shared", "1.0.0", "");
        seed(cache.path(), "shared", "2.0.0", "");

        let root_dir = tempfile::tempdir().unwrap();
        let recipe = root_recipe(
            root_dir.path(),
            "let name = \"top\";\nlet version = \"1.0.0\";\nlet dependencies = #{ left: \"*\", right: \"*\" };\nfn build(d, c, i) {}\n",
        );
        let services = offline_services(cache.path());
        let graph = resolve(&recipe, &config(Heuristics::PickHighest), &services, None).unwrap();
        let idx = graph.find("shared", Provider::Native).unwrap();
        assert_eq!(graph.node(idx).version, Version::new(1, 0, 0));
    }

    #[test]
    fn test_resolve_idempotent() {
        let cache = tempfile::tempdir().unwrap();
        seed(cache.path(), "beta", "1.2.0", "");

        let root_dir = tempfile::tempdir().unwrap();
        let recipe = root_recipe(
            root_dir.path(),
            "let name = \"alpha\";\nlet version = \"1.0.0\";\nlet dependencies = #{ beta: \">=1.0.0\" };\nfn build(d, c, i) {}\n",
        );
        let services = offline_services(cache.path());
        let cfg = config(Heuristics::default());
        let a = LockFile::from_graph(&resolve(&recipe, &cfg, &services, None).unwrap()).unwrap();
        let b = LockFile::from_graph(&resolve(&recipe, &cfg, &services, None).unwrap()).unwrap();
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }

    #[test]
    fn test_option_propagation() {
        let cache = tempfile::tempdir().unwrap();
        seed(cache.path(), "zlib", "1.3.0", "");

        let root_dir = tempfile::tempdir().unwrap();
        let recipe = root_recipe(
            root_dir.path(),
            "let name = \"top\";\nlet version = \"1.0.0\";\nlet dependencies = #{ zlib: \"*\" };\nfn build(d, c, i) {}\n",
        );
        let services = offline_services(cache.path());
        let mut cfg = config(Heuristics::PickHighest);
        cfg.options.set("zlib/shared", OptionValue::Bool(true));
        cfg.options.set("toplevel", OptionValue::Int(1));

        let graph = resolve(&recipe, &cfg, &services, None).unwrap();
        let zlib = graph.find("zlib", Provider::Native).unwrap();
        assert_eq!(
            graph.node(zlib).options.get("shared"),
            Some(&OptionValue::Bool(true))
        );
        let root = graph.root().unwrap();
        assert_eq!(graph.node(root).options.get("toplevel"), Some(&OptionValue::Int(1)));
        assert!(graph.node(root).options.get("zlib/shared").is_none());
    }

    #[test]
    fn test_system_tier_preferred() {
        struct SystemZlib(NativeProvider);

        impl DepProvider for SystemZlib {
            fn available_versions(&self, name: &str) -> Result<Vec<Version>> {
                self.0.available_versions(name)
            }
            fn cached_versions(&self, name: &str) -> Result<Vec<Version>> {
                self.0.cached_versions(name)
            }
            fn system_version(&self, name: &str) -> Result<Option<Version>> {
                Ok((name == "zlib").then(|| Version::new(1, 3, 0)))
            }
            fn latest_revision(&self, name: &str, version: &Version) -> Result<Option<String>> {
                self.0.latest_revision(name, version)
            }
            fn pack_recipe(
                &self,
                name: &str,
                version: &Version,
                revision: Option<&str>,
            ) -> Result<RecipeDir> {
                self.0.pack_recipe(name, version, revision)
            }
        }

        let cache = tempfile::tempdir().unwrap();
        seed(cache.path(), "zlib", "1.2.0", "");

        let root_dir = tempfile::tempdir().unwrap();
        let recipe = root_recipe(
            root_dir.path(),
            "let name = \"top\";\nlet version = \"1.0.0\";\nlet dependencies = #{ zlib: \">=1.0.0\" };\nfn build(d, c, i) {}\n",
        );
        let native = NativeProvider::new(None, RecipeCache::new(cache.path().to_path_buf()), true, true);
        let services = DepServices::new(Box::new(SystemZlib(native)), None);

        let mut cfg = config(Heuristics::PreferSystem);
        cfg.system = SystemPolicy::Allow;
        let graph = resolve(&recipe, &cfg, &services, None).unwrap();
        let zlib = graph.find("zlib", Provider::Native).unwrap();
        assert_eq!(graph.node(zlib).location, Location::System);
        assert_eq!(graph.node(zlib).version, Version::new(1, 3, 0));
        assert!(graph.node(zlib).revision.is_none());

        // same cache, cache-first heuristic picks the cached 1.2.0
        let cfg2 = ResolveConfig {
            system: SystemPolicy::Allow,
            ..config(Heuristics::PreferCache)
        };
        let native2 = NativeProvider::new(None, RecipeCache::new(cache.path().to_path_buf()), true, true);
        let services2 = DepServices::new(Box::new(SystemZlib(native2)), None);
        let graph2 = resolve(&recipe, &cfg2, &services2, None).unwrap();
        let zlib2 = graph2.find("zlib", Provider::Native).unwrap();
        assert_eq!(graph2.node(zlib2).location, Location::Cache);
        assert_eq!(graph2.node(zlib2).version, Version::new(1, 2, 0));
    }
}
