// src/services/mod.rs

//! Sources of package recipes
//!
//! The resolver is agnostic of where recipes come from; it talks to a
//! [`DepProvider`] per ecosystem through the [`DepServices`] facade. The
//! native provider combines the remote registry, the user recipe cache and
//! the system package probe; the alien provider wraps a local checkout of
//! the foreign ecosystem.

mod alien;
mod cache;
pub mod registry;
mod system;

pub use alien::AlienProvider;
pub use cache::RecipeCache;
pub use registry::{Credentials, RegistryClient};
pub use system::system_version;

use crate::error::{Error, Result};
use crate::recipe::Provider;
use crate::recipe_dir::RecipeDir;
use semver::Version;
use tracing::debug;

/// One ecosystem's view of available packages
pub trait DepProvider {
    /// Every version the provider knows about, unsorted.
    fn available_versions(&self, name: &str) -> Result<Vec<Version>>;

    /// Versions whose recipes are already on local disk.
    fn cached_versions(&self, name: &str) -> Result<Vec<Version>>;

    /// Version of a system-installed package, when the provider supports
    /// system packages at all.
    fn system_version(&self, name: &str) -> Result<Option<Version>>;

    /// Latest-created revision of a version, when revisions apply.
    fn latest_revision(&self, name: &str, version: &Version) -> Result<Option<String>>;

    /// Materialize the recipe directory for a package, fetching if needed.
    fn pack_recipe(&self, name: &str, version: &Version, revision: Option<&str>)
        -> Result<RecipeDir>;
}

/// Facade over the per-ecosystem providers
pub struct DepServices {
    native: Box<dyn DepProvider>,
    alien: Option<Box<dyn DepProvider>>,
}

impl DepServices {
    pub fn new(native: Box<dyn DepProvider>, alien: Option<Box<dyn DepProvider>>) -> Self {
        Self { native, alien }
    }

    pub fn provider(&self, provider: Provider) -> Result<&dyn DepProvider> {
        match provider {
            Provider::Native => Ok(self.native.as_ref()),
            Provider::Alien => self
                .alien
                .as_deref()
                .ok_or_else(|| Error::Config("alien provider is not enabled".to_string())),
        }
    }
}

/// Native provider: registry + user cache + system probe
pub struct NativeProvider {
    registry: Option<RegistryClient>,
    cache: RecipeCache,
    /// `--no-network`: never touch the registry
    offline: bool,
    /// `--no-system`: never report system packages
    no_system: bool,
}

impl NativeProvider {
    pub fn new(
        registry: Option<RegistryClient>,
        cache: RecipeCache,
        offline: bool,
        no_system: bool,
    ) -> Self {
        Self {
            registry,
            cache,
            offline,
            no_system,
        }
    }
}

impl DepProvider for NativeProvider {
    fn available_versions(&self, name: &str) -> Result<Vec<Version>> {
        if self.offline {
            return self.cache.versions(name);
        }
        match &self.registry {
            Some(client) => client.versions(name),
            None => self.cache.versions(name),
        }
    }

    fn cached_versions(&self, name: &str) -> Result<Vec<Version>> {
        self.cache.versions(name)
    }

    fn system_version(&self, name: &str) -> Result<Option<Version>> {
        if self.no_system {
            return Ok(None);
        }
        system_version(name)
    }

    fn latest_revision(&self, name: &str, version: &Version) -> Result<Option<String>> {
        if !self.offline {
            if let Some(client) = &self.registry {
                let recipe = client.recipe(name, version, None)?;
                return Ok(Some(recipe.revision));
            }
        }
        self.cache.latest_revision(name, version)
    }

    fn pack_recipe(&self, name: &str, version: &Version, revision: Option<&str>) -> Result<RecipeDir> {
        // the exact revision on disk wins; otherwise go out to the registry
        if let Some(rev) = revision {
            if let Some(dir) = self.cache.recipe_dir(name, version, rev) {
                debug!("using cached recipe {name}@{version}/{rev}");
                return RecipeDir::new(dir);
            }
        } else if self.offline || self.registry.is_none() {
            if let Some(rev) = self.cache.latest_revision(name, version)? {
                let dir = self
                    .cache
                    .recipe_dir(name, version, &rev)
                    .expect("latest_revision returned an existing entry");
                return RecipeDir::new(dir);
            }
        }

        let client = self.registry.as_ref().ok_or_else(|| {
            Error::NotFound(format!("recipe {name}@{version} (no registry configured)"))
        })?;
        if self.offline {
            return Err(Error::NotFound(format!(
                "recipe {name}@{version} not in cache and network is disabled"
            )));
        }
        let resource = client.recipe(name, version, revision)?;
        if let Some(dir) = self.cache.recipe_dir(name, version, &resource.revision) {
            return RecipeDir::new(dir);
        }
        let archive = tempfile::Builder::new()
            .suffix(".tar.xz")
            .tempfile()
            .map_err(Error::io_context("creating download scratch file"))?;
        client.fetch_archive(&resource, archive.path())?;
        let dir = self
            .cache
            .store_archive(name, version, &resource.revision, archive.path())?;
        RecipeDir::new(dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_lookup() {
        let cache_dir = tempfile::tempdir().unwrap();
        let native = NativeProvider::new(
            None,
            RecipeCache::new(cache_dir.path().to_path_buf()),
            false,
            false,
        );
        let services = DepServices::new(Box::new(native), None);
        assert!(services.provider(Provider::Native).is_ok());
        assert!(services.provider(Provider::Alien).is_err());
    }
}
