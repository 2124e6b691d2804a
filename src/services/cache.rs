// src/services/cache.rs

//! User recipe cache
//!
//! Downloaded recipe archives are extracted under
//! `~/.dopcache/<name>/<version>/<revision>/`. The cache is shared between
//! processes; writers extract into a temp sibling and rename into place so
//! readers never observe a half-extracted recipe.

use crate::error::{Error, Result};
use semver::Version;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

pub struct RecipeCache {
    root: PathBuf,
}

impl RecipeCache {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Default cache location: `~/.dopcache`.
    pub fn default_location() -> Result<RecipeCache> {
        let home = dirs::home_dir().ok_or_else(|| Error::Config("cannot locate home directory".to_string()))?;
        Ok(RecipeCache::new(home.join(".dopcache")))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn entry_path(&self, name: &str, version: &Version, revision: &str) -> PathBuf {
        self.root.join(name).join(version.to_string()).join(revision)
    }

    /// Cached versions of a package, unsorted.
    pub fn versions(&self, name: &str) -> Result<Vec<Version>> {
        let dir = self.root.join(name);
        let mut out = Vec::new();
        let Ok(entries) = fs::read_dir(&dir) else {
            return Ok(out);
        };
        for entry in entries.filter_map(|e| e.ok()) {
            if !entry.path().is_dir() {
                continue;
            }
            if let Ok(v) = Version::parse(&entry.file_name().to_string_lossy()) {
                out.push(v);
            }
        }
        Ok(out)
    }

    /// Revisions of a cached version, most recently created first.
    pub fn revisions(&self, name: &str, version: &Version) -> Result<Vec<String>> {
        let dir = self.root.join(name).join(version.to_string());
        let mut out: Vec<(SystemTime, String)> = Vec::new();
        let Ok(entries) = fs::read_dir(&dir) else {
            return Ok(vec![]);
        };
        for entry in entries.filter_map(|e| e.ok()) {
            if !entry.path().is_dir() {
                continue;
            }
            let created = entry
                .metadata()
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            out.push((created, entry.file_name().to_string_lossy().into_owned()));
        }
        out.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(out.into_iter().map(|(_, rev)| rev).collect())
    }

    pub fn latest_revision(&self, name: &str, version: &Version) -> Result<Option<String>> {
        Ok(self.revisions(name, version)?.into_iter().next())
    }

    /// Path of a cached recipe, when present.
    pub fn recipe_dir(&self, name: &str, version: &Version, revision: &str) -> Option<PathBuf> {
        let path = self.entry_path(name, version, revision);
        path.is_dir().then_some(path)
    }

    /// Extract a verified recipe archive into the cache.
    pub fn store_archive(
        &self,
        name: &str,
        version: &Version,
        revision: &str,
        archive: &Path,
    ) -> Result<PathBuf> {
        let dest = self.entry_path(name, version, revision);
        if dest.is_dir() {
            return Ok(dest);
        }
        let parent = dest.parent().expect("entry path has a parent");
        fs::create_dir_all(parent)?;
        let staging = tempfile::tempdir_in(parent)
            .map_err(Error::io_context("creating cache staging dir"))?;
        crate::archive::extract(archive, staging.path())?;
        match fs::rename(staging.into_path(), &dest) {
            Ok(()) => Ok(dest),
            // lost the race against another process, its copy is as good
            Err(_) if dest.is_dir() => Ok(dest),
            Err(e) => Err(Error::IoContext {
                context: format!("moving recipe into cache at {}", dest.display()),
                source: e,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;
    use std::time::Duration;

    #[test]
    fn test_empty_cache() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = RecipeCache::new(tmp.path().to_path_buf());
        assert!(cache.versions("zlib").unwrap().is_empty());
        assert!(cache.latest_revision("zlib", &Version::new(1, 0, 0)).unwrap().is_none());
    }

    #[test]
    fn test_versions_and_revisions() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = RecipeCache::new(tmp.path().to_path_buf());
        let v1 = Version::new(1, 2, 0);
        fs::create_dir_all(cache.entry_path("zlib", &v1, "aaaa000000000000")).unwrap();
        sleep(Duration::from_millis(20));
        fs::create_dir_all(cache.entry_path("zlib", &v1, "bbbb000000000000")).unwrap();
        fs::create_dir_all(cache.entry_path("zlib", &Version::new(1, 3, 0), "cccc000000000000")).unwrap();

        let mut versions = cache.versions("zlib").unwrap();
        versions.sort();
        assert_eq!(versions, vec![v1.clone(), Version::new(1, 3, 0)]);

        // latest-created revision first
        assert_eq!(
            cache.latest_revision("zlib", &v1).unwrap().as_deref(),
            Some("bbbb000000000000")
        );
    }

    #[test]
    fn test_store_archive() {
        let content = tempfile::tempdir().unwrap();
        fs::write(content.path().join("dopamine.rhai"), "let name = \"zlib\";").unwrap();
        let work = tempfile::tempdir().unwrap();
        let archive = work.path().join("zlib-1.3.0-aaaa000000000000.tar.xz");
        crate::archive::create(content.path(), &archive).unwrap();

        let tmp = tempfile::tempdir().unwrap();
        let cache = RecipeCache::new(tmp.path().to_path_buf());
        let v = Version::new(1, 3, 0);
        let dir = cache.store_archive("zlib", &v, "aaaa000000000000", &archive).unwrap();
        assert!(dir.join("dopamine.rhai").is_file());
        assert_eq!(cache.recipe_dir("zlib", &v, "aaaa000000000000"), Some(dir));
    }
}
