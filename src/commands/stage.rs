// src/commands/stage.rs

//! `dop stage` - build dependencies and self, installing into DEST

use super::{active_profile, effective_options, load_recipe, make_services, open_recipe_dir};
use crate::build::{build_all, BuildInput};
use crate::error::Result;
use crate::resolver::{resolve, Heuristics, LockFile, ResolveConfig, SystemPolicy};
use std::path::PathBuf;

pub fn run(dest: PathBuf, profile_name: Option<String>, options: Vec<String>) -> Result<()> {
    let dir = open_recipe_dir()?;
    let _lock = dir.acquire_lock()?;

    let recipe = load_recipe(&dir)?;
    let profile = active_profile(&dir, profile_name.as_deref())?;
    let options = effective_options(&dir, &options)?;
    let services = make_services(false, false)?;

    let cfg = ResolveConfig {
        profile: profile.clone(),
        options,
        heuristics: Heuristics::default(),
        system: SystemPolicy::Allow,
    };
    let pinned = LockFile::load(&dir.dep_lock_file()).ok();
    let graph = resolve(&recipe, &cfg, &services, pinned.as_ref())?;

    let dest = if dest.is_absolute() {
        dest
    } else {
        std::env::current_dir()?.join(dest)
    };

    build_all(&BuildInput {
        root_dir: &dir,
        root_recipe: &recipe,
        graph: &graph,
        profile: &profile,
        services: &services,
        force: false,
        stage_dest: Some(dest.clone()),
    })?;

    println!("Staged {} into {}", recipe.name, dest.display());
    Ok(())
}
