// src/commands/build.rs

//! `dop build` - build the package for the current configuration

use super::{active_profile, effective_options, load_recipe, make_services, open_recipe_dir};
use crate::build::{build_all, BuildInput};
use crate::error::Result;
use crate::resolver::{resolve, Heuristics, LockFile, ResolveConfig, SystemPolicy};

pub fn run(force: bool, no_network: bool, profile_name: Option<String>) -> Result<()> {
    let dir = open_recipe_dir()?;
    let _lock = dir.acquire_lock()?;

    let recipe = load_recipe(&dir)?;
    let profile = active_profile(&dir, profile_name.as_deref())?;
    let options = effective_options(&dir, &[])?;
    let services = make_services(no_network, false)?;

    let cfg = ResolveConfig {
        profile: profile.clone(),
        options,
        heuristics: Heuristics::default(),
        system: SystemPolicy::Allow,
    };
    let pinned = LockFile::load(&dir.dep_lock_file()).ok();
    let graph = resolve(&recipe, &cfg, &services, pinned.as_ref())?;

    let report = build_all(&BuildInput {
        root_dir: &dir,
        root_recipe: &recipe,
        graph: &graph,
        profile: &profile,
        services: &services,
        force,
        stage_dest: None,
    })?;

    if report.built.is_empty() {
        println!("Already up-to-date");
    } else {
        println!("Built {}", report.built.join(", "));
    }
    Ok(())
}
