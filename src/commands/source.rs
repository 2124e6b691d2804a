// src/commands/source.rs

//! `dop source` - ensure the source directory is present

use super::{load_recipe, open_recipe_dir};
use crate::error::Result;
use crate::recipe_dir::{SourceState, SourceStatus};
use tracing::info;

pub fn run(force: bool) -> Result<()> {
    let dir = open_recipe_dir()?;
    let _lock = dir.acquire_lock()?;
    let recipe = load_recipe(&dir)?;

    if !force {
        if let SourceStatus::Ready(path) = dir.check_source_ready(recipe.in_tree_src().as_deref())? {
            println!("{}", path.display());
            return Ok(());
        }
    }

    info!("fetching sources for {}", recipe.name);
    let src = recipe.source()?;
    dir.write_source_state(&SourceState {
        source_dir: src.clone(),
    })?;
    println!("{}", src.display());
    Ok(())
}
