// src/alien/plan.rs

//! Build-plan generation for alien packages
//!
//! Emits a ninja file compiling every declared source unit into an object
//! with `-MD`-style dependency capture, a single link (archive) rule
//! producing a static library, and a pkg-config file describing the
//! installed result. The compiler comes from the active profile: `dc` when
//! the package has D sources, `cc` otherwise.

use super::AlienMeta;
use crate::error::{Error, Result};
use crate::profile::Profile;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

/// Inputs the generator needs besides the metadata
pub struct PlanInput<'a> {
    pub meta: &'a AlienMeta,
    pub profile: &'a Profile,
    /// Package source root (where alien.json lives)
    pub src_dir: &'a Path,
    /// Out-of-tree build directory the ninja file runs in
    pub build_dir: &'a Path,
    /// Install prefix the library and pkg-config file land in
    pub install_dir: &'a Path,
    /// Install dirs of already-built dependencies, for import paths
    pub dep_install_dirs: &'a [PathBuf],
}

/// A generated plan: the ninja file content and the pkg-config file content
pub struct BuildPlan {
    pub ninja: String,
    pub pkg_config: String,
    /// Relative path of the library inside the install prefix
    pub lib_path: PathBuf,
}

pub fn generate(input: &PlanInput<'_>) -> Result<BuildPlan> {
    let meta = input.meta;
    let units = meta.source_units(input.src_dir)?;
    let d_sources = units.iter().any(|u| u.extension().is_some_and(|e| e == "d"));

    let tool_id = if d_sources { "dc" } else { "cc" };
    let tool = input.profile.tool(tool_id).ok_or_else(|| {
        Error::Config(format!(
            "alien package {} needs tool `{tool_id}` which the profile lacks",
            meta.name
        ))
    })?;

    let mut flags = String::new();
    for dir in &meta.import_paths {
        write!(flags, " -I{}", input.src_dir.join(dir).display()).unwrap();
    }
    for dep in input.dep_install_dirs {
        write!(flags, " -I{}", dep.join("include").display()).unwrap();
    }
    for ident in &meta.versions {
        if d_sources {
            write!(flags, " -version={ident}").unwrap();
        } else {
            write!(flags, " -D{ident}").unwrap();
        }
    }

    let mut ninja = String::new();
    writeln!(ninja, "# generated by dop for alien package {}", meta.name).unwrap();
    writeln!(ninja, "ninja_required_version = 1.5").unwrap();
    writeln!(ninja, "builddir = .").unwrap();
    writeln!(ninja).unwrap();
    writeln!(ninja, "compiler = {}", tool.path.display()).unwrap();
    writeln!(ninja, "flags ={flags}").unwrap();
    writeln!(ninja).unwrap();
    if d_sources {
        writeln!(ninja, "rule compile").unwrap();
        writeln!(ninja, "  command = $compiler $flags -c $in -of$out -makedeps=$out.d").unwrap();
    } else {
        writeln!(ninja, "rule compile").unwrap();
        writeln!(ninja, "  command = $compiler $flags -c $in -o $out -MD -MF $out.d").unwrap();
    }
    writeln!(ninja, "  depfile = $out.d").unwrap();
    writeln!(ninja, "  deps = gcc").unwrap();
    writeln!(ninja, "  description = compile $in").unwrap();
    writeln!(ninja).unwrap();
    writeln!(ninja, "rule archive").unwrap();
    writeln!(ninja, "  command = ar rcs $out $in").unwrap();
    writeln!(ninja, "  description = archive $out").unwrap();
    writeln!(ninja).unwrap();

    let mut objects = Vec::with_capacity(units.len());
    for unit in &units {
        let obj = object_name(unit);
        let src = input.src_dir.join(unit);
        writeln!(ninja, "build {obj}: compile {}", ninja_escape(&src.display().to_string())).unwrap();
        objects.push(obj);
    }
    writeln!(ninja).unwrap();
    let target = meta.lib_target();
    writeln!(ninja, "build {target}: archive {}", objects.join(" ")).unwrap();
    writeln!(ninja, "default {target}").unwrap();

    let pkg_config = generate_pkg_config(meta, input.install_dir)?;

    Ok(BuildPlan {
        ninja,
        pkg_config,
        lib_path: PathBuf::from("lib").join(&target),
    })
}

/// Flatten a source path into a unique object file name:
/// `source/sub/alpha.d` becomes `source_sub_alpha.o`.
fn object_name(unit: &Path) -> String {
    let stem = unit.with_extension("");
    let flat = stem
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("_");
    format!("{flat}.o")
}

fn ninja_escape(s: &str) -> String {
    s.replace(' ', "$ ").replace(':', "$:")
}

/// pkg-config file for the installed library.
///
/// Include paths are canonicalized under `${includedir}/<pkg>`; the library
/// is referenced via `${libdir}`. Dependency submodules become `Requires:`
/// entries so consumers pull their flags transitively.
pub fn generate_pkg_config(meta: &AlienMeta, prefix: &Path) -> Result<String> {
    let pkg = meta.name.replace([':', '/'], "_");
    let target = meta.lib_target();
    let stem = target
        .strip_prefix("lib")
        .and_then(|t| t.strip_suffix(".a"))
        .unwrap_or(&pkg);

    let mut out = String::new();
    writeln!(out, "prefix={}", prefix.display()).unwrap();
    writeln!(out, "includedir=${{prefix}}/include").unwrap();
    writeln!(out, "libdir=${{prefix}}/lib").unwrap();
    writeln!(out).unwrap();
    writeln!(out, "Name: {}", meta.name).unwrap();
    if meta.description.is_empty() {
        writeln!(out, "Description: {} (alien package)", meta.name).unwrap();
    } else {
        writeln!(out, "Description: {}", meta.description).unwrap();
    }
    writeln!(out, "Version: {}", meta.version).unwrap();
    if !meta.sub_modules.is_empty() {
        let reqs: Vec<String> = meta
            .sub_modules
            .iter()
            .map(|m| m.replace([':', '/'], "_"))
            .collect();
        writeln!(out, "Requires: {}", reqs.join(" ")).unwrap();
    }
    let mut libs = format!("-L${{libdir}} -l{stem}");
    for flag in &meta.lflags {
        libs.push(' ');
        libs.push_str(flag);
    }
    writeln!(out, "Libs: {libs}").unwrap();
    writeln!(out, "Cflags: -I${{includedir}}/{pkg}").unwrap();
    Ok(out)
}
