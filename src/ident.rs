// src/ident.rs

//! Deterministic build identities
//!
//! Two hashes key everything the client persists:
//!
//! - the **recipe revision**: first 8 bytes of SHA-1 over the recipe's own
//!   files, identifying the recipe content independent of any build;
//! - the **build id**: SHA-1 over recipe identity, build configuration and
//!   optional stage destination, whose 20-hex-char prefix names the on-disk
//!   build and install directories.

use crate::error::{Error, Result};
use crate::profile::BuildConfig;
use sha1::{Digest, Sha1};
use std::fmt;
use std::fs::File;
use std::io::{copy, BufReader};
use std::path::{Path, PathBuf};

/// Number of hex chars of the build id used as directory prefix
pub const BUILD_ID_PREFIX_LEN: usize = 20;

/// Identity of one build: recipe x config x optional stage destination
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BuildId {
    digest: [u8; 20],
}

impl BuildId {
    pub fn new(
        name: &str,
        version: &semver::Version,
        revision: &str,
        config: &BuildConfig,
        stage_dest: Option<&Path>,
    ) -> BuildId {
        let mut hasher = Sha1::new();
        hasher.update(name.as_bytes());
        hasher.update(version.to_string().as_bytes());
        hasher.update(revision.as_bytes());
        hasher.update(config.digest_hash().as_bytes());
        if let Some(dest) = stage_dest {
            hasher.update(dest.to_string_lossy().as_bytes());
        }
        BuildId {
            digest: hasher.finalize().into(),
        }
    }

    /// Full 40-char hex form.
    pub fn unique_id(&self) -> String {
        hex::encode(self.digest)
    }

    /// First 10 bytes as hex, the on-disk directory prefix.
    pub fn dir_prefix(&self) -> String {
        hex::encode(&self.digest[..BUILD_ID_PREFIX_LEN / 2])
    }
}

impl fmt::Display for BuildId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.dir_prefix())
    }
}

/// Compute the recipe revision from the recipe script and its `include()`
/// files.
///
/// Paths are normalized relative to `root`, sorted lexicographically and
/// deduplicated before hashing so the result does not depend on the order a
/// recipe lists its files. The revision is the first 8 bytes of SHA-1 over
/// the concatenated file contents, lowercase hex.
pub fn recipe_revision(root: &Path, files: &[PathBuf]) -> Result<String> {
    let mut rel: Vec<PathBuf> = Vec::with_capacity(files.len());
    for f in files {
        let p = if f.is_absolute() {
            f.strip_prefix(root)
                .map_err(|_| {
                    Error::InvalidRecipe(format!(
                        "recipe file {} escapes recipe root {}",
                        f.display(),
                        root.display()
                    ))
                })?
                .to_path_buf()
        } else {
            f.clone()
        };
        rel.push(p);
    }
    rel.sort();
    rel.dedup();

    let mut hasher = Sha1::new();
    for p in &rel {
        let full = root.join(p);
        let file = File::open(&full)
            .map_err(Error::io_context(format!("reading recipe file {}", full.display())))?;
        let mut reader = BufReader::new(file);
        copy(&mut reader, &mut DigestSink(&mut hasher))?;
    }
    let digest = hasher.finalize();
    Ok(hex::encode(&digest[..8]))
}

struct DigestSink<'a>(&'a mut Sha1);

impl std::io::Write for DigestSink<'_> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::{BuildType, HostInfo, OptionSet, Os, Profile, Tool};
    use std::fs;

    fn config() -> BuildConfig {
        let profile = Profile::new(
            "default",
            HostInfo {
                os: Os::Linux,
                arch: "x86_64".to_string(),
            },
            BuildType::Debug,
            vec![Tool {
                id: "cc".to_string(),
                name: "gcc".to_string(),
                version: "13.2.0".to_string(),
                path: "/usr/bin/gcc".into(),
            }],
        );
        BuildConfig::new(profile, OptionSet::new())
    }

    #[test]
    fn test_build_id_deterministic() {
        let v = semver::Version::parse("1.0.0").unwrap();
        let a = BuildId::new("alpha", &v, "0011223344556677", &config(), None);
        let b = BuildId::new("alpha", &v, "0011223344556677", &config(), None);
        assert_eq!(a, b);
        assert_eq!(a.unique_id(), b.unique_id());
        assert_eq!(a.dir_prefix().len(), BUILD_ID_PREFIX_LEN);
    }

    #[test]
    fn test_build_id_varies_with_inputs() {
        let v = semver::Version::parse("1.0.0").unwrap();
        let base = BuildId::new("alpha", &v, "0011223344556677", &config(), None);
        let other_name = BuildId::new("beta", &v, "0011223344556677", &config(), None);
        let staged = BuildId::new(
            "alpha",
            &v,
            "0011223344556677",
            &config(),
            Some(Path::new("/tmp/out")),
        );
        assert_ne!(base, other_name);
        assert_ne!(base, staged);
    }

    #[test]
    fn test_revision_stable_under_permutation() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("dopamine.rhai"), "let name = \"x\";").unwrap();
        fs::write(dir.path().join("extra.txt"), "extra").unwrap();

        let fwd = vec![PathBuf::from("dopamine.rhai"), PathBuf::from("extra.txt")];
        let rev = vec![PathBuf::from("extra.txt"), PathBuf::from("dopamine.rhai")];
        let dup = vec![
            PathBuf::from("extra.txt"),
            PathBuf::from("dopamine.rhai"),
            PathBuf::from("extra.txt"),
        ];

        let a = recipe_revision(dir.path(), &fwd).unwrap();
        let b = recipe_revision(dir.path(), &rev).unwrap();
        let c = recipe_revision(dir.path(), &dup).unwrap();
        assert_eq!(a, b);
        assert_eq!(a, c);
        assert_eq!(a.len(), 16);
    }

    #[test]
    fn test_revision_changes_with_content() {
        let dir = tempfile::tempdir().unwrap();
        let recipe = dir.path().join("dopamine.rhai");
        fs::write(&recipe, "let name = \"x\";").unwrap();
        let files = vec![PathBuf::from("dopamine.rhai")];
        let before = recipe_revision(dir.path(), &files).unwrap();
        fs::write(&recipe, "let name = \"y\";").unwrap();
        let after = recipe_revision(dir.path(), &files).unwrap();
        assert_ne!(before, after);
    }

    #[test]
    fn test_revision_rejects_escaping_path() {
        let dir = tempfile::tempdir().unwrap();
        let outside = vec![PathBuf::from("/etc/passwd")];
        assert!(recipe_revision(dir.path(), &outside).is_err());
    }
}
