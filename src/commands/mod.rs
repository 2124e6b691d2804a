// src/commands/mod.rs

//! Command implementations
//!
//! One module per subcommand, plus the shared plumbing: opening the recipe
//! directory, loading the recipe with its revision assigned, activating a
//! profile and assembling the dependency services.

pub mod build;
pub mod login;
pub mod options;
pub mod profile;
pub mod publish;
pub mod resolve;
pub mod revision;
pub mod search;
pub mod source;
pub mod stage;

use crate::error::{Error, Result};
use crate::ident::recipe_revision;
use crate::profile::{BuildType, OptionSet, Profile};
use crate::recipe::Recipe;
use crate::recipe_dir::RecipeDir;
use crate::services::{
    AlienProvider, Credentials, DepServices, NativeProvider, RecipeCache, RegistryClient,
};
use std::path::PathBuf;
use tracing::debug;

/// Tool ids probed when discovering a fresh profile
pub const KNOWN_TOOL_IDS: &[&str] = &["cc", "c++", "dc"];

/// Registry this client talks to: `DOP_REGISTRY` or the public default.
pub fn registry_url() -> String {
    std::env::var("DOP_REGISTRY").unwrap_or_else(|_| RegistryClient::DEFAULT_REGISTRY.to_string())
}

pub fn registry_client() -> Result<RegistryClient> {
    let url = registry_url();
    let credentials = Credentials::load()?;
    let token = credentials.token_for(&url).map(String::from);
    RegistryClient::new(&url, token)
}

/// Open the recipe directory at the process working directory.
pub fn open_recipe_dir() -> Result<RecipeDir> {
    let dir = RecipeDir::new(std::env::current_dir()?)?;
    if !dir.has_recipe() {
        return Err(Error::NotFound(format!(
            "recipe file in {}",
            dir.root().display()
        )));
    }
    Ok(dir)
}

/// Load the recipe and assign its content revision.
pub fn load_recipe(dir: &RecipeDir) -> Result<Recipe> {
    let mut recipe = Recipe::load(dir)?;
    let files = recipe.include_files()?;
    recipe.revision = Some(recipe_revision(dir.root(), &files)?);
    Ok(recipe)
}

/// Path of a named profile in the user config area.
pub fn named_profile_path(name: &str) -> Result<PathBuf> {
    let config = dirs::config_dir()
        .ok_or_else(|| Error::Config("cannot locate config directory".to_string()))?;
    Ok(config.join("dop").join("profiles").join(format!("{name}.ini")))
}

/// Profile used by a command: the named one, the recipe dir's active one,
/// or a freshly discovered default (which becomes the active one).
pub fn active_profile(dir: &RecipeDir, named: Option<&str>) -> Result<Profile> {
    if let Some(name) = named {
        let path = named_profile_path(name)?;
        if path.is_file() {
            return Profile::load(&path);
        }
        return Err(Error::NotFound(format!("profile `{name}`")));
    }
    let path = dir.profile_file();
    if path.is_file() {
        return Profile::load(&path);
    }
    debug!("no active profile, discovering a default");
    let profile = discover_default("default")?;
    profile.save(&path, false)?;
    Ok(profile)
}

/// Discover whatever known tools this host has.
pub fn discover_default(basename: &str) -> Result<Profile> {
    let mut tools = Vec::new();
    for id in KNOWN_TOOL_IDS {
        if let Ok(tool) = crate::profile::Tool::discover(id) {
            tools.push(tool);
        }
    }
    Ok(Profile::new(
        basename,
        crate::profile::HostInfo::current(),
        BuildType::default(),
        tools,
    ))
}

/// Stored options overlaid with `-o key=value` arguments; the merge is
/// persisted so later commands see the same configuration.
pub fn effective_options(dir: &RecipeDir, cli_values: &[String]) -> Result<OptionSet> {
    if cli_values.is_empty() {
        return Ok(dir.read_option_file()?.unwrap_or_default());
    }
    let mut overlay = OptionSet::new();
    for value in cli_values {
        overlay.set_from_arg(value)?;
    }
    dir.merge_option_file(&overlay)
}

/// Assemble the dependency services for the build pipeline.
pub fn make_services(no_network: bool, no_system: bool) -> Result<DepServices> {
    let cache = RecipeCache::default_location()?;
    let registry = if no_network {
        None
    } else {
        Some(registry_client()?)
    };
    let native = NativeProvider::new(registry, cache, no_network, no_system);
    let alien = AlienProvider::default_location().ok();
    Ok(DepServices::new(
        Box::new(native),
        alien.map(|a| Box::new(a) as Box<dyn crate::services::DepProvider>),
    ))
}
