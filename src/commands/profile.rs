// src/commands/profile.rs

//! `dop profile` - read or write the active build profile

use super::{discover_default, named_profile_path, open_recipe_dir, KNOWN_TOOL_IDS};
use crate::error::{Error, Result};
use crate::profile::{BuildType, Profile, Tool};
use std::path::{Path, PathBuf};

pub struct ProfileArgs {
    pub name: Option<String>,
    pub discover: bool,
    pub add_missing: bool,
    pub debug: bool,
    pub release: bool,
    pub set: Vec<String>,
    pub export: Option<PathBuf>,
    pub describe: bool,
}

pub fn run(args: ProfileArgs) -> Result<()> {
    let dir = open_recipe_dir()?;
    let active_path = dir.profile_file();

    let mut profile = load_or_init(&active_path, args.name.as_deref(), args.discover)?;
    let mut modified = args.discover || !active_path.is_file();

    if args.add_missing {
        let recipe = super::load_recipe(&dir)?;
        for id in &recipe.tools {
            if !profile.has_tool(id) {
                let tool = Tool::discover(id)?;
                println!("Adding {}: {} {}", tool.id, tool.name, tool.version);
                profile.tools.push(tool);
                modified = true;
            }
        }
        profile.tools.sort_by(|a, b| a.id.cmp(&b.id));
    }

    for entry in &args.set {
        let tool = match entry.split_once('=') {
            Some((id, exe)) => Tool::from_path(id, Path::new(exe))?,
            None => Tool::discover(entry)?,
        };
        profile.tools.retain(|t| t.id != tool.id);
        println!("Setting {}: {} {}", tool.id, tool.name, tool.version);
        profile.tools.push(tool);
        profile.tools.sort_by(|a, b| a.id.cmp(&b.id));
        modified = true;
    }

    if args.debug && profile.build_type != BuildType::Debug {
        profile.build_type = BuildType::Debug;
        modified = true;
    }
    if args.release && profile.build_type != BuildType::Release {
        profile.build_type = BuildType::Release;
        modified = true;
    }

    if modified {
        profile.save(&active_path, true)?;
    }

    if let Some(export) = &args.export {
        let dest = if export.extension().is_some() {
            export.clone()
        } else {
            named_profile_path(&export.to_string_lossy())?
        };
        profile.save(&dest, true)?;
        println!("Profile exported to {}", dest.display());
    }

    if args.describe {
        print!("{}", profile.to_ini());
        println!("# digest: {}", profile.digest_hash());
    } else {
        println!("{}", profile.name());
    }
    Ok(())
}

fn load_or_init(active_path: &Path, name: Option<&str>, discover: bool) -> Result<Profile> {
    if let Some(name) = name {
        let named = named_profile_path(name)?;
        if named.is_file() && !discover {
            return Profile::load(&named);
        }
        if discover {
            return discover_all(name);
        }
        return Err(Error::NotFound(format!("profile `{name}`")));
    }
    if discover {
        return discover_all("default");
    }
    if active_path.is_file() {
        return Profile::load(active_path);
    }
    discover_default("default")
}

fn discover_all(basename: &str) -> Result<Profile> {
    let profile = discover_default(basename)?;
    if profile.tools.is_empty() {
        return Err(Error::NotFound(format!(
            "any of the known tools ({})",
            KNOWN_TOOL_IDS.join(", ")
        )));
    }
    for tool in &profile.tools {
        println!("Found {}: {} {} ({})", tool.id, tool.name, tool.version, tool.path.display());
    }
    Ok(profile)
}
