// src/commands/revision.rs

//! `dop revision` - print the recipe content revision

use super::{load_recipe, open_recipe_dir};
use crate::error::Result;

pub fn run() -> Result<()> {
    let dir = open_recipe_dir()?;
    let recipe = load_recipe(&dir)?;
    println!("{}", recipe.revision.expect("load_recipe assigns the revision"));
    Ok(())
}
