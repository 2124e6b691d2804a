// src/commands/publish.rs

//! `dop publish` - archive the recipe, verify it builds, upload
//!
//! The integrity build replays the archive exactly as a consumer would see
//! it: extract into a scratch tree, load the recipe from there, check the
//! recomputed revision, and build. Only then is the archive announced to
//! the registry and uploaded under the short-lived bearer.

use super::{
    active_profile, load_recipe, make_services, named_profile_path, open_recipe_dir,
    registry_client,
};
use crate::archive;
use crate::build::{build_all, BuildInput};
use crate::error::{Error, Result};
use crate::ident::recipe_revision;
use crate::profile::{OptionSet, Profile};
use crate::recipe::Recipe;
use crate::recipe_dir::RecipeDir;
use crate::resolver::{resolve, Heuristics, ResolveConfig, SystemPolicy};
use crate::services::registry::PublishRequest;
use std::fs;
use std::path::Path;
use std::process::Command;
use tracing::info;

pub fn run(check_profile: Option<String>, skip_cvs_clean: bool, options: Vec<String>) -> Result<()> {
    let dir = open_recipe_dir()?;
    let _lock = dir.acquire_lock()?;
    let recipe = load_recipe(&dir)?;
    let revision = recipe.revision.clone().expect("load_recipe assigns the revision");

    if !skip_cvs_clean {
        check_cvs_clean(dir.root())?;
    }

    // archive exactly the files that define the revision
    let mut files = recipe.include_files()?;
    files.sort();
    files.dedup();
    let staging = tempfile::tempdir().map_err(Error::io_context("creating archive staging dir"))?;
    for rel in &files {
        let src = dir.root().join(rel);
        let dst = staging.path().join(rel);
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(&src, &dst)
            .map_err(Error::io_context(format!("collecting {}", src.display())))?;
    }
    let archive_name = format!("{}-{}-{}.tar.xz", recipe.name, recipe.version, revision);
    let work = tempfile::tempdir().map_err(Error::io_context("creating archive work dir"))?;
    let archive_path = work.path().join(&archive_name);
    let sha256 = archive::create(staging.path(), &archive_path)?;
    info!("created {archive_name} ({sha256})");

    let profile = match &check_profile {
        Some(name) => Profile::load(&named_profile_path(name)?)?,
        None => active_profile(&dir, None)?,
    };
    let mut opt_set = OptionSet::new();
    for value in &options {
        opt_set.set_from_arg(value)?;
    }
    integrity_build(&archive_path, &revision, &profile, &opt_set)?;

    let client = registry_client()?;
    let response = client.publish(&PublishRequest {
        name: recipe.name.clone(),
        version: recipe.version.to_string(),
        revision: revision.clone(),
        description: recipe.description.clone(),
    })?;
    client.upload_archive(&response.upload_bearer, &archive_path)?;
    println!(
        "Published {}/{} revision {revision} to {}",
        recipe.name,
        recipe.version,
        client.base()
    );
    Ok(())
}

/// Refuse to publish from a dirty git working tree.
fn check_cvs_clean(root: &Path) -> Result<()> {
    if !root.join(".git").exists() {
        return Ok(());
    }
    let output = Command::new("git")
        .arg("-C")
        .arg(root)
        .args(["status", "--porcelain"])
        .output()
        .map_err(Error::io_context("running git status"))?;
    if !output.status.success() {
        return Ok(());
    }
    if !output.stdout.is_empty() {
        return Err(Error::Config(
            "working tree has uncommitted changes (use --skip-cvs-clean to override)".to_string(),
        ));
    }
    Ok(())
}

/// Extract the archive into a scratch tree and build it there.
fn integrity_build(
    archive_path: &Path,
    expected_revision: &str,
    profile: &Profile,
    options: &OptionSet,
) -> Result<()> {
    let scratch = tempfile::tempdir().map_err(Error::io_context("creating integrity build dir"))?;
    archive::extract(archive_path, scratch.path())?;

    let dir = RecipeDir::new(scratch.path())?;
    let mut recipe = Recipe::load(&dir)?;
    let files = recipe.include_files()?;
    let revision = recipe_revision(dir.root(), &files)?;
    if revision != expected_revision {
        return Err(Error::Integrity(format!(
            "archived recipe hashes to {revision}, expected {expected_revision}"
        )));
    }
    recipe.revision = Some(revision);

    if recipe.is_light() {
        return Ok(());
    }

    info!("running integrity build of {}", recipe.name);
    let services = make_services(false, false)?;
    let cfg = ResolveConfig {
        profile: profile.clone(),
        options: options.clone(),
        heuristics: Heuristics::default(),
        system: SystemPolicy::Allow,
    };
    let graph = resolve(&recipe, &cfg, &services, None)?;
    build_all(&BuildInput {
        root_dir: &dir,
        root_recipe: &recipe,
        graph: &graph,
        profile,
        services: &services,
        force: true,
        stage_dest: None,
    })
    .map_err(|e| Error::Integrity(format!("integrity build failed: {e}")))?;
    Ok(())
}
