// src/profile/mod.rs

//! Build profiles: host description, toolchain and build type
//!
//! A profile is the part of the build configuration that comes from the
//! machine rather than the recipe: operating system, architecture, the
//! external tools (compilers) with their resolved paths and versions, and
//! debug/release. Profiles have a canonical text form; the digest of that
//! form feeds the build id, so two profiles are equivalent exactly when
//! their digests match.

mod options;

pub use options::{OptionSet, OptionValue};

use crate::error::{Error, Result};
use sha1::{Digest, Sha1};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::str::FromStr;

/// Operating system classification used by recipes
///
/// `Posix` covers unixes that are neither Linux nor macOS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Os {
    Linux,
    Osx,
    Posix,
    Windows,
}

impl Os {
    pub fn current() -> Self {
        if cfg!(target_os = "linux") {
            Os::Linux
        } else if cfg!(target_os = "macos") {
            Os::Osx
        } else if cfg!(target_os = "windows") {
            Os::Windows
        } else {
            Os::Posix
        }
    }

    pub fn is_posix(&self) -> bool {
        !matches!(self, Os::Windows)
    }
}

impl fmt::Display for Os {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Os::Linux => "Linux",
            Os::Osx => "OSX",
            Os::Posix => "Posix",
            Os::Windows => "Windows",
        };
        f.write_str(s)
    }
}

impl FromStr for Os {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Linux" => Ok(Os::Linux),
            "OSX" => Ok(Os::Osx),
            "Posix" => Ok(Os::Posix),
            "Windows" => Ok(Os::Windows),
            other => Err(Error::Config(format!("unknown OS `{other}`"))),
        }
    }
}

/// Host description: OS and CPU architecture
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostInfo {
    pub os: Os,
    pub arch: String,
}

impl HostInfo {
    pub fn current() -> Self {
        Self {
            os: Os::current(),
            arch: std::env::consts::ARCH.to_string(),
        }
    }
}

/// Debug or release
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BuildType {
    #[default]
    Debug,
    Release,
}

impl fmt::Display for BuildType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildType::Debug => f.write_str("debug"),
            BuildType::Release => f.write_str("release"),
        }
    }
}

impl FromStr for BuildType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "debug" => Ok(BuildType::Debug),
            "release" => Ok(BuildType::Release),
            other => Err(Error::Config(format!("unknown build type `{other}`"))),
        }
    }
}

/// An external build actor: compiler, linker driver, meta-build tool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tool {
    /// Short id a recipe asks for: `cc`, `c++`, `dc`
    pub id: String,
    /// Human name reported by the tool, e.g. `gcc`
    pub name: String,
    pub version: String,
    pub path: PathBuf,
}

impl Tool {
    /// Probe `PATH` for a tool matching `id` and capture its version.
    ///
    /// Known ids map to a list of candidate executables, tried in order.
    pub fn discover(id: &str) -> Result<Tool> {
        let candidates: &[&str] = match id {
            "cc" => &["gcc", "clang", "cc"],
            "c++" => &["g++", "clang++", "c++"],
            "dc" => &["ldc2", "dmd", "gdc"],
            other => return Err(Error::Config(format!("unknown tool id `{other}`"))),
        };
        for exe in candidates {
            let Ok(path) = which::which(exe) else {
                continue;
            };
            let version = probe_version(&path).unwrap_or_else(|_| "unknown".to_string());
            return Ok(Tool {
                id: id.to_string(),
                name: exe.to_string(),
                version,
                path,
            });
        }
        Err(Error::NotFound(format!("tool for id `{id}`")))
    }

    /// Build a tool entry from an explicit executable path.
    pub fn from_path(id: &str, exe: &Path) -> Result<Tool> {
        let path = which::which(exe)
            .map_err(|_| Error::NotFound(format!("executable {}", exe.display())))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| id.to_string());
        let version = probe_version(&path).unwrap_or_else(|_| "unknown".to_string());
        Ok(Tool {
            id: id.to_string(),
            name,
            version,
            path,
        })
    }

    /// Environment variable this tool is exported as (`CC`, `CXX`, `DC`).
    pub fn env_var(&self) -> Option<&'static str> {
        match self.id.as_str() {
            "cc" => Some("CC"),
            "c++" => Some("CXX"),
            "dc" => Some("DC"),
            _ => None,
        }
    }
}

/// First line of `<exe> --version`, trimmed to the version-looking token.
fn probe_version(path: &Path) -> Result<String> {
    let out = Command::new(path)
        .arg("--version")
        .output()
        .map_err(Error::io_context(format!("running {} --version", path.display())))?;
    let text = String::from_utf8_lossy(&out.stdout);
    let first = text.lines().next().unwrap_or("").trim();
    // keep the first token that looks like a dotted version
    let version = first
        .split_whitespace()
        .find(|tok| tok.chars().next().is_some_and(|c| c.is_ascii_digit()) && tok.contains('.'))
        .unwrap_or(first);
    Ok(version.trim_start_matches('v').to_string())
}

/// Host + toolchain + build-type description
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    /// User-chosen base name, e.g. `default`
    pub basename: String,
    pub host: HostInfo,
    pub build_type: BuildType,
    /// Sorted by tool id
    pub tools: Vec<Tool>,
}

impl Profile {
    pub fn new(basename: &str, host: HostInfo, build_type: BuildType, mut tools: Vec<Tool>) -> Self {
        tools.sort_by(|a, b| a.id.cmp(&b.id));
        Self {
            basename: basename.to_string(),
            host,
            build_type,
            tools,
        }
    }

    /// Full profile name: `basename-os-arch-buildtype`, lowercase.
    pub fn name(&self) -> String {
        format!(
            "{}-{}-{}-{}",
            self.basename,
            self.host.os.to_string().to_lowercase(),
            self.host.arch,
            self.build_type
        )
    }

    /// Discover a default profile for the given tool ids on this host.
    pub fn discover(basename: &str, tool_ids: &[&str], build_type: BuildType) -> Result<Profile> {
        let mut tools = Vec::new();
        for id in tool_ids {
            tools.push(Tool::discover(id)?);
        }
        Ok(Profile::new(basename, HostInfo::current(), build_type, tools))
    }

    pub fn tool(&self, id: &str) -> Option<&Tool> {
        self.tools.iter().find(|t| t.id == id)
    }

    pub fn has_tool(&self, id: &str) -> bool {
        self.tool(id).is_some()
    }

    /// Restrict to the tools a recipe actually declares.
    ///
    /// Unknown ids are an error so a recipe cannot silently build with a
    /// profile that lacks its compiler.
    pub fn subset(&self, tool_ids: &[String]) -> Result<Profile> {
        let mut tools = Vec::new();
        for id in tool_ids {
            let tool = self
                .tool(id)
                .ok_or_else(|| Error::Config(format!("profile {} has no tool `{id}`", self.name())))?;
            tools.push(tool.clone());
        }
        Ok(Profile::new(&self.basename, self.host.clone(), self.build_type, tools))
    }

    /// Write well-known toolchain variables into `env`.
    ///
    /// Per-tool: `CC`/`CXX`/`DC` plus `<VAR>_FLAGS` derived from the build
    /// type. Tool directories are prepended to `PATH`.
    pub fn collect_environment(&self, env: &mut HashMap<String, String>) {
        let mut path_dirs: Vec<PathBuf> = Vec::new();
        for tool in &self.tools {
            if let Some(var) = tool.env_var() {
                env.insert(var.to_string(), tool.path.display().to_string());
                let flags = match (tool.id.as_str(), self.build_type) {
                    ("dc", BuildType::Debug) => "-g -debug",
                    ("dc", BuildType::Release) => "-O -release",
                    (_, BuildType::Debug) => "-g",
                    (_, BuildType::Release) => "-O2 -DNDEBUG",
                };
                env.insert(format!("{var}_FLAGS"), flags.to_string());
            }
            if let Some(dir) = tool.path.parent() {
                if !path_dirs.contains(&dir.to_path_buf()) {
                    path_dirs.push(dir.to_path_buf());
                }
            }
        }
        if !path_dirs.is_empty() {
            let current = env
                .get("PATH")
                .cloned()
                .or_else(|| std::env::var("PATH").ok())
                .unwrap_or_default();
            let mut joined: Vec<String> = path_dirs.iter().map(|p| p.display().to_string()).collect();
            if !current.is_empty() {
                joined.push(current);
            }
            env.insert("PATH".to_string(), joined.join(":"));
        }
        env.insert("DOP_BUILD_TYPE".to_string(), self.build_type.to_string());
    }

    /// Canonical textual form. Stable section and key order; the digest is
    /// computed over exactly these bytes.
    pub fn to_ini(&self) -> String {
        let mut out = String::new();
        out.push_str("[profile]\n");
        out.push_str(&format!("basename = {}\n", self.basename));
        out.push_str(&format!("buildtype = {}\n", self.build_type));
        out.push_str("\n[host]\n");
        out.push_str(&format!("os = {}\n", self.host.os));
        out.push_str(&format!("arch = {}\n", self.host.arch));
        for tool in &self.tools {
            out.push_str(&format!("\n[tool.{}]\n", tool.id));
            out.push_str(&format!("name = {}\n", tool.name));
            out.push_str(&format!("version = {}\n", tool.version));
            out.push_str(&format!("path = {}\n", tool.path.display()));
        }
        out
    }

    /// SHA-1 of the canonical text form, lowercase hex.
    pub fn digest_hash(&self) -> String {
        let mut hasher = Sha1::new();
        hasher.update(self.to_ini().as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn load(path: &Path) -> Result<Profile> {
        let text = fs::read_to_string(path)
            .map_err(Error::io_context(format!("reading profile {}", path.display())))?;
        Profile::parse(&text).map_err(|e| Error::InvalidProfile {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    pub fn save(&self, path: &Path, replace_if_exists: bool) -> Result<()> {
        if path.exists() && !replace_if_exists {
            return Err(Error::Config(format!(
                "profile file {} already exists",
                path.display()
            )));
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.to_ini())
            .map_err(Error::io_context(format!("writing profile {}", path.display())))?;
        Ok(())
    }

    fn parse(text: &str) -> Result<Profile> {
        let mut basename = None;
        let mut build_type = None;
        let mut os = None;
        let mut arch = None;
        let mut tools: Vec<Tool> = Vec::new();
        let mut section = String::new();

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
                section = name.to_string();
                if let Some(id) = section.strip_prefix("tool.") {
                    tools.push(Tool {
                        id: id.to_string(),
                        name: String::new(),
                        version: String::new(),
                        path: PathBuf::new(),
                    });
                }
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                return Err(Error::Config(format!("malformed profile line `{line}`")));
            };
            let (key, value) = (key.trim(), value.trim());
            match (section.as_str(), key) {
                ("profile", "basename") => basename = Some(value.to_string()),
                ("profile", "buildtype") => build_type = Some(value.parse()?),
                ("host", "os") => os = Some(value.parse()?),
                ("host", "arch") => arch = Some(value.to_string()),
                (s, k) if s.starts_with("tool.") => {
                    let tool = tools.last_mut().expect("section opened above");
                    match k {
                        "name" => tool.name = value.to_string(),
                        "version" => tool.version = value.to_string(),
                        "path" => tool.path = PathBuf::from(value),
                        other => {
                            return Err(Error::Config(format!("unknown tool key `{other}`")));
                        }
                    }
                }
                (s, k) => {
                    return Err(Error::Config(format!("unknown profile key `{s}.{k}`")));
                }
            }
        }

        let basename = basename.ok_or_else(|| Error::Config("missing profile.basename".into()))?;
        let build_type = build_type.ok_or_else(|| Error::Config("missing profile.buildtype".into()))?;
        let os = os.ok_or_else(|| Error::Config("missing host.os".into()))?;
        let arch = arch.ok_or_else(|| Error::Config("missing host.arch".into()))?;
        Ok(Profile::new(&basename, HostInfo { os, arch }, build_type, tools))
    }
}

/// Profile + options: everything a build is keyed on besides the recipe.
#[derive(Debug, Clone)]
pub struct BuildConfig {
    pub profile: Profile,
    pub options: OptionSet,
}

impl BuildConfig {
    pub fn new(profile: Profile, options: OptionSet) -> Self {
        Self { profile, options }
    }

    /// SHA-1 over the profile digest and the canonical JSON of the options.
    pub fn digest_hash(&self) -> String {
        let mut hasher = Sha1::new();
        hasher.update(self.profile.digest_hash().as_bytes());
        hasher.update(self.options.to_canonical_json().as_bytes());
        hex::encode(hasher.finalize())
    }
}
