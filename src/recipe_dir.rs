// src/recipe_dir.rs

//! Recipe directory layout and per-package state
//!
//! Every package lives in a directory holding `dopamine.rhai` and a hidden
//! `.dop/` state subdirectory:
//!
//! ```text
//! <root>/
//!   dopamine.rhai          recipe script
//!   dop.lock               resolved dependency lock
//!   .dop/
//!     profile.ini          active profile
//!     options.json         option file
//!     lock                 recipe-wide exclusive lock
//!     state.json           source state (where sources were fetched)
//!     <hash>/              install tree for one build id
//!     <hash>-build/        build tree
//!     <hash>.lock          per-build exclusive lock
//!     <hash>-state.json    build state
//! ```
//!
//! All returned paths are absolute.

use crate::error::{Error, Result};
use crate::ident::BuildId;
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::info;

pub const RECIPE_FILE: &str = "dopamine.rhai";
pub const DEP_LOCK_FILE: &str = "dop.lock";
const DOP_DIR: &str = ".dop";

/// Absolute-rooted handle on a package directory
#[derive(Debug, Clone)]
pub struct RecipeDir {
    root: PathBuf,
}

/// Paths for one build id under `.dop/`
#[derive(Debug, Clone)]
pub struct BuildPaths {
    pub install_dir: PathBuf,
    pub build_dir: PathBuf,
    pub lock_file: PathBuf,
    pub state_file: PathBuf,
}

/// Source state persisted in `.dop/state.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceState {
    /// Directory containing the unpacked sources, absolute
    pub source_dir: PathBuf,
}

/// Build state persisted in `.dop/<hash>-state.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildState {
    pub build_time: DateTime<Utc>,
}

/// Outcome of the source up-to-date check
#[derive(Debug)]
pub enum SourceStatus {
    Ready(PathBuf),
    NotReady(String),
}

/// Outcome of the build up-to-date check
#[derive(Debug)]
pub enum BuildStatus {
    Ready(PathBuf),
    NotReady(String),
}

impl RecipeDir {
    /// Open a recipe directory, making the root absolute.
    pub fn new(root: impl AsRef<Path>) -> Result<RecipeDir> {
        let root = root.as_ref();
        let root = if root.is_absolute() {
            root.to_path_buf()
        } else {
            std::env::current_dir()?.join(root)
        };
        Ok(RecipeDir { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn recipe_file(&self) -> PathBuf {
        self.root.join(RECIPE_FILE)
    }

    pub fn has_recipe(&self) -> bool {
        self.recipe_file().is_file()
    }

    pub fn dop_dir(&self) -> PathBuf {
        self.root.join(DOP_DIR)
    }

    pub fn profile_file(&self) -> PathBuf {
        self.dop_dir().join("profile.ini")
    }

    pub fn options_file(&self) -> PathBuf {
        self.dop_dir().join("options.json")
    }

    pub fn lock_file(&self) -> PathBuf {
        self.dop_dir().join("lock")
    }

    pub fn state_file(&self) -> PathBuf {
        self.dop_dir().join("state.json")
    }

    pub fn dep_lock_file(&self) -> PathBuf {
        self.root.join(DEP_LOCK_FILE)
    }

    pub fn build_paths(&self, id: &BuildId) -> BuildPaths {
        let prefix = id.dir_prefix();
        let dop = self.dop_dir();
        BuildPaths {
            install_dir: dop.join(&prefix),
            build_dir: dop.join(format!("{prefix}-build")),
            lock_file: dop.join(format!("{prefix}.lock")),
            state_file: dop.join(format!("{prefix}-state.json")),
        }
    }

    pub fn ensure_dop_dir(&self) -> Result<()> {
        fs::create_dir_all(self.dop_dir())
            .map_err(Error::io_context(format!("creating {}", self.dop_dir().display())))?;
        Ok(())
    }

    /// mtime of the recipe script.
    pub fn recipe_last_modified(&self) -> Result<SystemTime> {
        let meta = fs::metadata(self.recipe_file())
            .map_err(Error::io_context(format!("{} missing", self.recipe_file().display())))?;
        Ok(meta.modified()?)
    }

    /// Exclusive recipe-wide lock, held for the duration of heavy commands.
    pub fn acquire_lock(&self) -> Result<DirLock> {
        self.ensure_dop_dir()?;
        DirLock::acquire(self.lock_file())
    }

    /// Exclusive per-build lock.
    pub fn acquire_build_lock(&self, id: &BuildId) -> Result<DirLock> {
        self.ensure_dop_dir()?;
        DirLock::acquire(self.build_paths(id).lock_file)
    }

    pub fn read_source_state(&self) -> Option<SourceState> {
        let text = fs::read_to_string(self.state_file()).ok()?;
        serde_json::from_str(&text).ok()
    }

    pub fn write_source_state(&self, state: &SourceState) -> Result<()> {
        self.ensure_dop_dir()?;
        let text = serde_json::to_string_pretty(state)?;
        fs::write(self.state_file(), text)?;
        Ok(())
    }

    /// Source readiness: in-tree sources are always ready; fetched sources
    /// are ready when the state file is newer than the recipe and the
    /// recorded directory still exists.
    pub fn check_source_ready(&self, in_tree: Option<&Path>) -> Result<SourceStatus> {
        if let Some(rel) = in_tree {
            return Ok(SourceStatus::Ready(self.root.join(rel)));
        }
        let Some(state) = self.read_source_state() else {
            return Ok(SourceStatus::NotReady("no source state recorded".to_string()));
        };
        if !state.source_dir.is_dir() {
            return Ok(SourceStatus::NotReady(format!(
                "source dir {} disappeared",
                state.source_dir.display()
            )));
        }
        let state_time = fs::metadata(self.state_file())?.modified()?;
        if state_time <= self.recipe_last_modified()? {
            return Ok(SourceStatus::NotReady("recipe is newer than fetched sources".to_string()));
        }
        Ok(SourceStatus::Ready(state.source_dir))
    }

    pub fn read_build_state(&self, id: &BuildId) -> Option<BuildState> {
        let text = fs::read_to_string(self.build_paths(id).state_file).ok()?;
        serde_json::from_str(&text).ok()
    }

    pub fn write_build_state(&self, id: &BuildId, state: &BuildState) -> Result<()> {
        self.ensure_dop_dir()?;
        let text = serde_json::to_string_pretty(state)?;
        fs::write(self.build_paths(id).state_file, text)?;
        Ok(())
    }

    /// Build readiness: install dir present, state file present, and both
    /// the state file timestamp and the recorded build time strictly newer
    /// than the recipe.
    pub fn check_build_ready(&self, id: &BuildId) -> Result<BuildStatus> {
        let paths = self.build_paths(id);
        if !paths.install_dir.is_dir() {
            return Ok(BuildStatus::NotReady("never built".to_string()));
        }
        let Some(state) = self.read_build_state(id) else {
            return Ok(BuildStatus::NotReady("no build state recorded".to_string()));
        };
        let recipe_time = self.recipe_last_modified()?;
        let state_time = fs::metadata(&paths.state_file)?.modified()?;
        if state_time <= recipe_time {
            return Ok(BuildStatus::NotReady("recipe changed since last build".to_string()));
        }
        let recipe_dt: DateTime<Utc> = recipe_time.into();
        if state.build_time <= recipe_dt {
            return Ok(BuildStatus::NotReady("recipe changed since last build".to_string()));
        }
        Ok(BuildStatus::Ready(paths.install_dir))
    }

    /// Read the option file, merge `opts` over it and write the result back.
    /// Returns the merged set.
    pub fn merge_option_file(&self, opts: &crate::profile::OptionSet) -> Result<crate::profile::OptionSet> {
        let mut merged = self.read_option_file()?.unwrap_or_default();
        merged.merge(opts);
        self.write_option_file(&merged)?;
        Ok(merged)
    }

    pub fn read_option_file(&self) -> Result<Option<crate::profile::OptionSet>> {
        let path = self.options_file();
        if !path.is_file() {
            return Ok(None);
        }
        let text = fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&text)?))
    }

    pub fn write_option_file(&self, opts: &crate::profile::OptionSet) -> Result<()> {
        self.ensure_dop_dir()?;
        let text = serde_json::to_string_pretty(opts)?;
        fs::write(self.options_file(), text)?;
        Ok(())
    }
}

/// RAII exclusive file lock
///
/// Tries a non-blocking acquire first; if contended, logs and blocks.
/// Released on drop.
pub struct DirLock {
    file: File,
    path: PathBuf,
}

impl DirLock {
    pub fn acquire(path: PathBuf) -> Result<DirLock> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = File::create(&path)
            .map_err(Error::io_context(format!("creating lock file {}", path.display())))?;
        match file.try_lock_exclusive() {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                info!("Waiting for lock {}", path.display());
                file.lock_exclusive()
                    .map_err(Error::io_context(format!("locking {}", path.display())))?;
            }
            Err(e) => {
                return Err(Error::IoContext {
                    context: format!("locking {}", path.display()),
                    source: e,
                });
            }
        }
        Ok(DirLock { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for DirLock {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
    }
}
