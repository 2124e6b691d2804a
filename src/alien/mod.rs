// src/alien/mod.rs

//! Alien package ecosystem support
//!
//! "Alien" packages come from a foreign ecosystem that knows nothing about
//! dopamine recipes. Their metadata file (`alien.json`) declares sources,
//! include dirs, version identifiers and linker flags instead of a build
//! script. The [`plan`] module translates that metadata into a ninja build
//! plan plus a pkg-config file, which is how alien packages get built.

pub mod plan;

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const ALIEN_METADATA_FILE: &str = "alien.json";

/// Parsed `alien.json` metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlienMeta {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub license: String,
    /// Dependency name to version spec, alien-side
    #[serde(default)]
    pub dependencies: BTreeMap<String, String>,
    /// Directories scanned for source units, relative to the package root
    #[serde(default)]
    pub source_paths: Vec<String>,
    /// Explicit source files, relative to the package root. When present,
    /// `source_paths` is not scanned.
    #[serde(default)]
    pub source_files: Vec<String>,
    /// Import/include directories, relative to the package root
    #[serde(default)]
    pub import_paths: Vec<String>,
    /// Version identifiers passed to the compiler
    #[serde(default)]
    pub versions: Vec<String>,
    /// Extra linker flags exported through pkg-config
    #[serde(default)]
    pub lflags: Vec<String>,
    /// Submodules of dependencies this package requires, exported as
    /// pkg-config `Requires:` entries
    #[serde(default)]
    pub sub_modules: Vec<String>,
}

impl AlienMeta {
    pub fn load(dir: &Path) -> Result<AlienMeta> {
        let path = dir.join(ALIEN_METADATA_FILE);
        let text = fs::read_to_string(&path)
            .map_err(Error::io_context(format!("reading {}", path.display())))?;
        let meta: AlienMeta = serde_json::from_str(&text)
            .map_err(|e| Error::InvalidRecipe(format!("{}: {e}", path.display())))?;
        if meta.name.is_empty() {
            return Err(Error::InvalidRecipe(format!("{}: empty package name", path.display())));
        }
        Ok(meta)
    }

    /// Source units, in stable order. Scans `source_paths` for known source
    /// extensions unless explicit files were declared.
    pub fn source_units(&self, root: &Path) -> Result<Vec<PathBuf>> {
        if !self.source_files.is_empty() {
            return Ok(self.source_files.iter().map(PathBuf::from).collect());
        }
        let mut units = Vec::new();
        for dir in &self.source_paths {
            let full = root.join(dir);
            if !full.is_dir() {
                continue;
            }
            for entry in walkdir::WalkDir::new(&full).into_iter().filter_map(|e| e.ok()) {
                if !entry.file_type().is_file() {
                    continue;
                }
                let ext = entry.path().extension().and_then(|e| e.to_str());
                if matches!(ext, Some("d" | "c" | "cc" | "cpp")) {
                    let rel = entry
                        .path()
                        .strip_prefix(root)
                        .expect("walkdir stays under root")
                        .to_path_buf();
                    units.push(rel);
                }
            }
        }
        units.sort();
        if units.is_empty() {
            return Err(Error::InvalidRecipe(format!(
                "alien package {} declares no source units",
                self.name
            )));
        }
        Ok(units)
    }

    /// Static library file name for this package.
    pub fn lib_target(&self) -> String {
        format!("lib{}.a", self.name.replace([':', '/'], "_"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_minimal() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(ALIEN_METADATA_FILE),
            r#"{"name": "evcore", "version": "0.9.20", "sourcePaths": ["source"]}"#,
        )
        .unwrap();
        let meta = AlienMeta::load(dir.path()).unwrap();
        assert_eq!(meta.name, "evcore");
        assert_eq!(meta.version, "0.9.20");
        assert!(meta.dependencies.is_empty());
    }

    #[test]
    fn test_source_units_scanned_and_sorted() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("source/sub")).unwrap();
        fs::write(dir.path().join("source/zeta.d"), "").unwrap();
        fs::write(dir.path().join("source/sub/alpha.d"), "").unwrap();
        fs::write(dir.path().join("source/readme.txt"), "").unwrap();
        fs::write(
            dir.path().join(ALIEN_METADATA_FILE),
            r#"{"name": "evcore", "version": "0.9.20", "sourcePaths": ["source"]}"#,
        )
        .unwrap();
        let meta = AlienMeta::load(dir.path()).unwrap();
        let units = meta.source_units(dir.path()).unwrap();
        assert_eq!(
            units,
            vec![PathBuf::from("source/sub/alpha.d"), PathBuf::from("source/zeta.d")]
        );
    }

    #[test]
    fn test_explicit_files_win() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(ALIEN_METADATA_FILE),
            r#"{"name": "evcore", "version": "1.0.0", "sourceFiles": ["gen/api.d"], "sourcePaths": ["source"]}"#,
        )
        .unwrap();
        let meta = AlienMeta::load(dir.path()).unwrap();
        assert_eq!(meta.source_units(dir.path()).unwrap(), vec![PathBuf::from("gen/api.d")]);
    }

    #[test]
    fn test_lib_target_sanitized() {
        let meta = AlienMeta {
            name: "vibe:core".to_string(),
            version: "1.0.0".to_string(),
            description: String::new(),
            license: String::new(),
            dependencies: BTreeMap::new(),
            source_paths: vec![],
            source_files: vec![],
            import_paths: vec![],
            versions: vec![],
            lflags: vec![],
            sub_modules: vec![],
        };
        assert_eq!(meta.lib_target(), "libvibe_core.a");
    }
}
