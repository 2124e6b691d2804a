// src/build/mod.rs

//! Build and stage orchestration
//!
//! Walks the resolved DAG in topological order and, per node: acquires the
//! per-build file lock, skips when the build state is fresh, ensures
//! sources, composes the build directories and configuration, invokes the
//! recipe's build, and records the build state. Staging copies install
//! trees into the destination, or rebuilds into it for recipes that cannot
//! stage.
//!
//! Nodes build strictly in order; there is no parallelism within one
//! invocation. Concurrent invocations on the same package coordinate
//! through the build locks.

use crate::error::{Error, Result};
use crate::ident::BuildId;
use crate::profile::{BuildConfig, Profile};
use crate::recipe::{BuildDirs, DepInfo, Recipe, StageDecl};
use crate::recipe_dir::{BuildState, BuildStatus, RecipeDir, SourceState, SourceStatus};
use crate::resolver::{DepGraph, Location, NodeIndex};
use crate::services::DepServices;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Inputs of one orchestrated build
pub struct BuildInput<'a> {
    pub root_dir: &'a RecipeDir,
    pub root_recipe: &'a Recipe,
    pub graph: &'a DepGraph,
    pub profile: &'a Profile,
    pub services: &'a DepServices,
    pub force: bool,
    /// Destination tree when staging; `None` for plain builds
    pub stage_dest: Option<PathBuf>,
}

/// What happened, for CLI reporting
#[derive(Debug, Default)]
pub struct BuildReport {
    pub built: Vec<String>,
    pub up_to_date: Vec<String>,
}

/// Hook for end-to-end tests: write the root build id to the named file.
const E2E_BUILDID_ENV: &str = "DOP_E2ETEST_BUILDID";

pub fn build_all(input: &BuildInput<'_>) -> Result<BuildReport> {
    let order = input.graph.topological_order()?;
    let mut report = BuildReport::default();
    let mut install_dirs: HashMap<NodeIndex, PathBuf> = HashMap::new();

    for idx in order {
        let node = input.graph.node(idx);
        if node.location == Location::System {
            debug!("{} satisfied by system installation", node.name);
            continue;
        }
        let is_root = Some(idx) == input.graph.root();
        if is_root && input.root_recipe.is_light() {
            // nothing to build for an aggregation recipe
            continue;
        }

        let mut dep_holder: Option<(RecipeDir, Recipe)> = None;
        if !is_root {
            let dir = input
                .services
                .provider(node.provider)?
                .pack_recipe(&node.name, &node.version, node.revision.as_deref())?;
            let mut loaded = Recipe::load(&dir)?;
            loaded.revision = node.revision.clone();
            dep_holder = Some((dir, loaded));
        }
        let (dir_ref, recipe_ref): (&RecipeDir, &Recipe) = match &dep_holder {
            Some((dir, recipe)) => (dir, recipe),
            None => (input.root_dir, input.root_recipe),
        };

        // dependencies visible to this node's build
        let mut dep_infos: BTreeMap<String, DepInfo> = BTreeMap::new();
        for &child in &node.deps {
            if let Some(install) = install_dirs.get(&child) {
                dep_infos.insert(
                    input.graph.node(child).name.clone(),
                    DepInfo {
                        install_dir: install.clone(),
                    },
                );
            }
        }

        let config = BuildConfig::new(input.profile.subset(&recipe_ref.tools)?, node.options.clone());
        // recipes that refuse staging build straight into the destination,
        // which makes the destination part of the build identity
        let direct_dest = input
            .stage_dest
            .as_deref()
            .filter(|_| !recipe_ref.can_stage());
        let build_id = BuildId::new(
            &node.name,
            &node.version,
            node.revision.as_deref().unwrap_or(""),
            &config,
            direct_dest,
        );

        if is_root {
            if let Ok(path) = std::env::var(E2E_BUILDID_ENV) {
                fs::write(&path, build_id.unique_id())?;
            }
        }

        let _lock = dir_ref.acquire_build_lock(&build_id)?;

        if !input.force {
            if let BuildStatus::Ready(install) = dir_ref.check_build_ready(&build_id)? {
                info!("{}: Already up-to-date", node.name);
                report.up_to_date.push(node.name.clone());
                install_dirs.insert(idx, install);
                continue;
            }
        }

        let src = match dir_ref.check_source_ready(recipe_ref.in_tree_src().as_deref())? {
            SourceStatus::Ready(src) => src,
            SourceStatus::NotReady(reason) => {
                debug!("{}: fetching sources ({reason})", node.name);
                let src = recipe_ref.source()?;
                dir_ref.write_source_state(&SourceState {
                    source_dir: src.clone(),
                })?;
                src
            }
        };

        let paths = dir_ref.build_paths(&build_id);
        let install_dir = match direct_dest {
            Some(dest) => dest.to_path_buf(),
            None => paths.install_dir.clone(),
        };
        fs::create_dir_all(&paths.build_dir)?;
        fs::create_dir_all(&install_dir)?;

        let dirs = BuildDirs {
            root: dir_ref.root().to_path_buf(),
            src,
            build: paths.build_dir.clone(),
            install: install_dir.clone(),
        };

        info!("building {}@{}", node.name, node.version);
        recipe_ref.build(&dirs, &config, &dep_infos)?;
        dir_ref.write_build_state(
            &build_id,
            &BuildState {
                build_time: Utc::now(),
            },
        )?;
        report.built.push(node.name.clone());
        install_dirs.insert(idx, install_dir);
    }

    if let Some(dest) = &input.stage_dest {
        stage_all(input, &install_dirs, dest)?;
    }

    Ok(report)
}

/// Stage every built node's install tree into `dest`, in topological order.
fn stage_all(
    input: &BuildInput<'_>,
    install_dirs: &HashMap<NodeIndex, PathBuf>,
    dest: &Path,
) -> Result<()> {
    fs::create_dir_all(dest)?;
    let order = input.graph.topological_order()?;
    for idx in order {
        let node = input.graph.node(idx);
        let Some(install) = install_dirs.get(&idx) else {
            continue;
        };
        let is_root = Some(idx) == input.graph.root();

        let recipe_storage;
        let recipe_ref: &Recipe = if is_root {
            input.root_recipe
        } else {
            let dir = input
                .services
                .provider(node.provider)?
                .pack_recipe(&node.name, &node.version, node.revision.as_deref())?;
            recipe_storage = Recipe::load(&dir)?;
            &recipe_storage
        };

        match recipe_ref.stage_decl() {
            StageDecl::Disabled => {
                // already built straight into dest
            }
            StageDecl::Function => {
                info!("staging {} via recipe", node.name);
                recipe_ref.call_stage(install, dest)?;
            }
            StageDecl::Default => {
                info!("staging {}", node.name);
                copy_tree(install, dest)?;
            }
        }
        recipe_ref.post_stage()?;
    }
    Ok(())
}

/// Recursive copy preserving relative layout and mtimes.
pub fn copy_tree(src: &Path, dst: &Path) -> Result<()> {
    for entry in walkdir::WalkDir::new(src) {
        let entry = entry.map_err(|e| Error::Config(format!("walking {}: {e}", src.display())))?;
        let rel = entry.path().strip_prefix(src).expect("walkdir stays under src");
        let target = dst.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target)
                .map_err(Error::io_context(format!("staging {}", entry.path().display())))?;
            let meta = entry.metadata().map_err(|e| Error::Config(e.to_string()))?;
            let mtime = filetime::FileTime::from_last_modification_time(&meta);
            filetime::set_file_mtime(&target, mtime)?;
        }
    }
    Ok(())
}
