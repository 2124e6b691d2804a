// src/services/alien.rs

//! Alien ecosystem provider
//!
//! Wraps a local checkout of the foreign ecosystem's package store, laid out
//! as `<root>/<name>/<version>/alien.json`. Alien packages carry no recipe
//! revisions and know nothing about system installations; every version the
//! store holds is immediately buildable through the adapter.

use super::DepProvider;
use crate::error::{Error, Result};
use crate::recipe_dir::RecipeDir;
use semver::Version;
use std::fs;
use std::path::PathBuf;

pub struct AlienProvider {
    root: PathBuf,
}

impl AlienProvider {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Store location: `DOP_ALIEN_PATH` or `~/.dopcache/alien`.
    pub fn default_location() -> Result<AlienProvider> {
        if let Ok(path) = std::env::var("DOP_ALIEN_PATH") {
            return Ok(AlienProvider::new(PathBuf::from(path)));
        }
        let home = dirs::home_dir()
            .ok_or_else(|| Error::Config("cannot locate home directory".to_string()))?;
        Ok(AlienProvider::new(home.join(".dopcache").join("alien")))
    }
}

impl DepProvider for AlienProvider {
    fn available_versions(&self, name: &str) -> Result<Vec<Version>> {
        let dir = self.root.join(name);
        let mut out = Vec::new();
        let Ok(entries) = fs::read_dir(&dir) else {
            return Ok(out);
        };
        for entry in entries.filter_map(|e| e.ok()) {
            if !entry.path().join(crate::alien::ALIEN_METADATA_FILE).is_file() {
                continue;
            }
            if let Ok(v) = Version::parse(&entry.file_name().to_string_lossy()) {
                out.push(v);
            }
        }
        Ok(out)
    }

    fn cached_versions(&self, name: &str) -> Result<Vec<Version>> {
        self.available_versions(name)
    }

    fn system_version(&self, _name: &str) -> Result<Option<Version>> {
        Ok(None)
    }

    fn latest_revision(&self, _name: &str, _version: &Version) -> Result<Option<String>> {
        Ok(None)
    }

    fn pack_recipe(&self, name: &str, version: &Version, _revision: Option<&str>) -> Result<RecipeDir> {
        let dir = self.root.join(name).join(version.to_string());
        if !dir.join(crate::alien::ALIEN_METADATA_FILE).is_file() {
            return Err(Error::NotFound(format!("alien package {name}@{version}")));
        }
        RecipeDir::new(dir)
    }
}
