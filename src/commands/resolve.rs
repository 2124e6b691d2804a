// src/commands/resolve.rs

//! `dop resolve` - compute and write dop.lock

use super::{active_profile, effective_options, load_recipe, make_services, open_recipe_dir};
use crate::error::Result;
use crate::profile::BuildType;
use crate::recipe_dir::RecipeDir;
use crate::resolver::{resolve, Heuristics, LockFile, ResolveConfig, SystemPolicy};
use std::fs;
use tracing::debug;

pub struct ResolveArgs {
    pub force: bool,
    pub heuristics: Heuristics,
    pub no_network: bool,
    pub no_system: bool,
    pub options: Vec<String>,
    pub build_type: Option<String>,
    pub os: Option<String>,
    pub arch: Option<String>,
}

pub fn run(args: ResolveArgs) -> Result<()> {
    let dir = open_recipe_dir()?;
    let _lock = dir.acquire_lock()?;

    let recipe = load_recipe(&dir)?;
    if !recipe.has_dependencies() {
        println!("No dependency - nothing to do");
        return Ok(());
    }

    let mut profile = active_profile(&dir, None)?;
    if let Some(bt) = &args.build_type {
        profile.build_type = bt.parse::<BuildType>()?;
    }
    if let Some(os) = &args.os {
        profile.host.os = os.parse()?;
    }
    if let Some(arch) = &args.arch {
        profile.host.arch = arch.clone();
    }
    let options = effective_options(&dir, &args.options)?;

    let cfg = ResolveConfig {
        profile,
        options,
        heuristics: args.heuristics,
        system: if args.no_system {
            SystemPolicy::Disallow
        } else {
            SystemPolicy::Allow
        },
    };

    let lock_path = dir.dep_lock_file();
    if !args.force {
        if let Some(existing) = fresh_lock(&dir)? {
            if existing
                .validate(&recipe.dependencies(&cfg.profile)?)
                .is_ok()
            {
                println!("dop.lock is up-to-date ({} package(s))", existing.nodes.len());
                return Ok(());
            }
            debug!("existing lock no longer matches the recipe");
        }
    }

    let pinned = LockFile::load(&lock_path).ok();
    let services = make_services(args.no_network, args.no_system)?;
    let graph = resolve(&recipe, &cfg, &services, pinned.as_ref())?;

    let lock = LockFile::from_graph(&graph)?;
    lock.save(&lock_path)?;
    println!("Resolved {} package(s) into {}", lock.nodes.len(), lock_path.display());
    Ok(())
}

/// The existing lock, when it is newer than the recipe.
pub fn fresh_lock(dir: &RecipeDir) -> Result<Option<LockFile>> {
    let path = dir.dep_lock_file();
    if !path.is_file() {
        return Ok(None);
    }
    let lock_time = fs::metadata(&path)?.modified()?;
    if lock_time <= dir.recipe_last_modified()? {
        return Ok(None);
    }
    Ok(LockFile::load(&path).ok())
}
