// src/recipe/value.rs

//! Marshaling between script values and typed host values
//!
//! Recipe scripts see tables (rhai maps) and arrays; the host works with
//! `Profile`, `BuildConfig`, `BuildDirs` and `OptionSet`. All coercions at
//! the boundary live here so the rest of the engine never touches `Dynamic`
//! shapes directly.

use crate::error::{Error, Result};
use crate::profile::{BuildConfig, BuildType, HostInfo, OptionSet, OptionValue, Profile, Tool};
use crate::recipe::{BuildDirs, DepInfo, DepSpec, Provider};
use crate::version::VersionSpec;
use rhai::{Dynamic, Map};
use std::collections::BTreeMap;
use std::path::PathBuf;

pub fn option_value_to_dynamic(v: &OptionValue) -> Dynamic {
    match v {
        OptionValue::Bool(b) => Dynamic::from(*b),
        OptionValue::Int(i) => Dynamic::from(*i),
        OptionValue::Str(s) => Dynamic::from(s.clone()),
    }
}

pub fn dynamic_to_option_value(d: &Dynamic) -> Result<OptionValue> {
    if let Ok(b) = d.as_bool() {
        return Ok(OptionValue::Bool(b));
    }
    if let Ok(i) = d.as_int() {
        return Ok(OptionValue::Int(i));
    }
    if d.is_string() {
        return Ok(OptionValue::Str(d.clone().into_string().expect("checked string")));
    }
    Err(Error::InvalidRecipe(format!(
        "option values must be bool, int or string, got {}",
        d.type_name()
    )))
}

pub fn option_set_to_map(set: &OptionSet) -> Map {
    let mut map = Map::new();
    for (k, v) in &set.0 {
        map.insert(k.as_str().into(), option_value_to_dynamic(v));
    }
    map
}

pub fn map_to_option_set(map: &Map) -> Result<OptionSet> {
    let mut set = OptionSet::new();
    for (k, v) in map {
        set.set(k.as_str(), dynamic_to_option_value(v)?);
    }
    Ok(set)
}

pub fn profile_to_map(profile: &Profile) -> Map {
    let mut map = Map::new();
    map.insert("basename".into(), Dynamic::from(profile.basename.clone()));
    map.insert("name".into(), Dynamic::from(profile.name()));
    map.insert("os".into(), Dynamic::from(profile.host.os.to_string()));
    map.insert("arch".into(), Dynamic::from(profile.host.arch.clone()));
    map.insert("build_type".into(), Dynamic::from(profile.build_type.to_string()));
    let mut tools = Map::new();
    for tool in &profile.tools {
        let mut t = Map::new();
        t.insert("name".into(), Dynamic::from(tool.name.clone()));
        t.insert("version".into(), Dynamic::from(tool.version.clone()));
        t.insert("path".into(), Dynamic::from(tool.path.display().to_string()));
        tools.insert(tool.id.as_str().into(), Dynamic::from_map(t));
    }
    map.insert("tools".into(), Dynamic::from_map(tools));
    map
}

/// Rebuild a `Profile` from the table shape produced by [`profile_to_map`].
/// Used by the `profile_environment` host function, which receives the
/// profile back from the script.
pub fn map_to_profile(map: &Map) -> Result<Profile> {
    let basename = get_str(map, "basename")?;
    let os = get_str(map, "os")?.parse()?;
    let arch = get_str(map, "arch")?;
    let build_type: BuildType = get_str(map, "build_type")?.parse()?;
    let mut tools = Vec::new();
    if let Some(tools_dyn) = map.get("tools") {
        let tools_map = tools_dyn
            .read_lock::<Map>()
            .ok_or_else(|| Error::InvalidRecipe("profile.tools must be a table".to_string()))?;
        for (id, tool_dyn) in tools_map.iter() {
            let t = tool_dyn
                .read_lock::<Map>()
                .ok_or_else(|| Error::InvalidRecipe(format!("profile tool `{id}` must be a table")))?;
            tools.push(Tool {
                id: id.to_string(),
                name: get_str(&t, "name")?,
                version: get_str(&t, "version")?,
                path: PathBuf::from(get_str(&t, "path")?),
            });
        }
    }
    Ok(Profile::new(&basename, HostInfo { os, arch }, build_type, tools))
}

pub fn build_dirs_to_map(dirs: &BuildDirs) -> Map {
    let mut map = Map::new();
    map.insert("root".into(), Dynamic::from(dirs.root.display().to_string()));
    map.insert("src".into(), Dynamic::from(dirs.src.display().to_string()));
    map.insert("build".into(), Dynamic::from(dirs.build.display().to_string()));
    map.insert("install".into(), Dynamic::from(dirs.install.display().to_string()));
    map
}

pub fn config_to_map(config: &BuildConfig) -> Map {
    let mut map = Map::new();
    map.insert("profile".into(), Dynamic::from_map(profile_to_map(&config.profile)));
    map.insert("options".into(), Dynamic::from_map(option_set_to_map(&config.options)));
    map
}

pub fn dep_infos_to_map(infos: &BTreeMap<String, DepInfo>) -> Map {
    let mut map = Map::new();
    for (name, info) in infos {
        let mut entry = Map::new();
        entry.insert(
            "install_dir".into(),
            Dynamic::from(info.install_dir.display().to_string()),
        );
        map.insert(name.as_str().into(), Dynamic::from_map(entry));
    }
    map
}

/// Parse a `dependencies` table.
///
/// Accepted value shapes per entry:
///
/// ```rhai
/// dependencies = #{
///     zlib: ">=1.2.0",
///     vibe: #{ version: "~>0.9.6", provider: "alien" },
///     curl: #{ version: "*", options: #{ tls: "rustls" } },
/// };
/// ```
pub fn parse_dep_specs(map: &Map) -> Result<Vec<DepSpec>> {
    let mut out = Vec::with_capacity(map.len());
    for (name, value) in map {
        let name = name.to_string();
        if value.is_string() {
            let spec = VersionSpec::parse(&value.clone().into_string().expect("checked string"))?;
            out.push(DepSpec {
                name,
                spec,
                provider: Provider::Native,
                options: OptionSet::new(),
            });
            continue;
        }
        let table = value.read_lock::<Map>().ok_or_else(|| {
            Error::InvalidRecipe(format!(
                "dependency `{name}` must be a version string or a table"
            ))
        })?;
        let spec = match table.get("version") {
            Some(v) if v.is_string() => {
                VersionSpec::parse(&v.clone().into_string().expect("checked string"))?
            }
            Some(_) => {
                return Err(Error::InvalidRecipe(format!(
                    "dependency `{name}`: version must be a string"
                )))
            }
            None => VersionSpec::Any,
        };
        let provider = match table.get("provider") {
            None => Provider::Native,
            Some(p) => {
                let s = p
                    .clone()
                    .into_string()
                    .map_err(|_| Error::InvalidRecipe(format!("dependency `{name}`: bad provider")))?;
                s.parse()?
            }
        };
        let options = match table.get("options") {
            None => OptionSet::new(),
            Some(o) => {
                let m = o.read_lock::<Map>().ok_or_else(|| {
                    Error::InvalidRecipe(format!("dependency `{name}`: options must be a table"))
                })?;
                map_to_option_set(&m)?
            }
        };
        out.push(DepSpec {
            name,
            spec,
            provider,
            options,
        });
    }
    Ok(out)
}

fn get_str(map: &Map, key: &str) -> Result<String> {
    map.get(key)
        .and_then(|d| d.clone().into_string().ok())
        .ok_or_else(|| Error::InvalidRecipe(format!("missing or non-string field `{key}`")))
}
