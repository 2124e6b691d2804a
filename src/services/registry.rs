// src/services/registry.rs

//! Registry HTTP client and stored credentials
//!
//! The client is blocking; the build pipeline has no concurrency to exploit
//! and the call sites read much simpler this way. Payload types here are
//! shared with the server module so the two sides cannot drift.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use semver::Version;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

/// Recipe resource as served by the registry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecipeResource {
    pub name: String,
    pub version: String,
    pub revision: String,
    pub archive_name: String,
    /// SHA-256 of the archive, lowercase hex
    pub sha256: String,
    pub created: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
}

/// One revision row inside a search entry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRevision {
    pub version: String,
    pub revision: String,
    pub created: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchEntry {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub last_version: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub revisions: Vec<SearchRevision>,
}

/// Search flags, mirrored by the `/v1/packages` query string
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SearchQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    pub regex: bool,
    pub case_sensitive: bool,
    pub name_only: bool,
    pub extended: bool,
    pub latest_only: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishRequest {
    pub name: String,
    pub version: String,
    pub revision: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishResponse {
    /// Short-lived bearer for the archive upload
    pub upload_bearer: String,
    pub archive_name: String,
}

/// Stored registry credentials, `~/.config/dop/config.toml`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(default)]
    pub registries: BTreeMap<String, String>,
}

impl Credentials {
    fn file() -> Result<PathBuf> {
        let config = dirs::config_dir()
            .ok_or_else(|| Error::Config("cannot locate config directory".to_string()))?;
        Ok(config.join("dop").join("config.toml"))
    }

    pub fn load() -> Result<Credentials> {
        let path = Self::file()?;
        if !path.is_file() {
            return Ok(Credentials::default());
        }
        let text = fs::read_to_string(&path)
            .map_err(Error::io_context(format!("reading {}", path.display())))?;
        toml::from_str(&text).map_err(|e| Error::Config(format!("{}: {e}", path.display())))
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::file()?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let text = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        fs::write(&path, text)
            .map_err(Error::io_context(format!("writing {}", path.display())))?;
        Ok(())
    }

    pub fn token_for(&self, registry: &str) -> Option<&str> {
        self.registries.get(registry).map(String::as_str)
    }

    pub fn set_token(&mut self, registry: &str, token: &str) {
        self.registries.insert(registry.to_string(), token.to_string());
    }
}

/// Blocking registry client
pub struct RegistryClient {
    base: Url,
    token: Option<String>,
    http: reqwest::blocking::Client,
}

impl RegistryClient {
    pub const DEFAULT_REGISTRY: &'static str = "https://registry.dopamine.build";

    pub fn new(base: &str, token: Option<String>) -> Result<RegistryClient> {
        let base = Url::parse(base).map_err(|e| Error::Config(format!("bad registry url `{base}`: {e}")))?;
        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(RegistryClient { base, token, http })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    fn server_down(&self, e: reqwest::Error) -> Error {
        if e.is_connect() || e.is_timeout() {
            Error::ServerDown {
                host: self.base.host_str().unwrap_or("registry").to_string(),
                reason: e.to_string(),
            }
        } else {
            Error::Http(e)
        }
    }

    fn check_status(&self, response: reqwest::blocking::Response, what: &str) -> Result<reqwest::blocking::Response> {
        match response.status().as_u16() {
            200..=299 => Ok(response),
            401 | 403 => Err(Error::Auth(
                response.text().unwrap_or_else(|_| "access denied".to_string()),
            )),
            404 => Err(Error::NotFound(what.to_string())),
            status => Err(Error::Network(format!(
                "{what}: registry answered {status}: {}",
                response.text().unwrap_or_default()
            ))),
        }
    }

    fn url(&self, path: &str) -> Url {
        let mut url = self.base.clone();
        url.set_path(&format!("{}{}", self.base.path().trim_end_matches('/'), path));
        url
    }

    fn get(&self, url: Url) -> Result<reqwest::blocking::Response> {
        let mut req = self.http.get(url);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        req.send().map_err(|e| self.server_down(e))
    }

    /// Published versions of a package.
    pub fn versions(&self, name: &str) -> Result<Vec<Version>> {
        let url = self.url(&format!("/v1/packages/{name}/versions"));
        let response = self.get(url)?;
        let response = self.check_status(response, &format!("package {name}"))?;
        let raw: Vec<String> = response.json()?;
        let mut out = Vec::with_capacity(raw.len());
        for v in raw {
            out.push(Version::parse(&v).map_err(|_| Error::InvalidVersion(v.clone()))?);
        }
        Ok(out)
    }

    /// Recipe resource for a version; latest-created revision unless pinned.
    pub fn recipe(&self, name: &str, version: &Version, revision: Option<&str>) -> Result<RecipeResource> {
        let mut url = self.url(&format!("/v1/packages/{name}/recipes/{version}"));
        if let Some(rev) = revision {
            url.query_pairs_mut().append_pair("revision", rev);
        }
        let what = format!("recipe {name}@{version}");
        let response = self.get(url)?;
        let response = self.check_status(response, &what)?;
        Ok(response.json()?)
    }

    /// Download an archive into `dest`, verifying its SHA-256 on the fly.
    pub fn fetch_archive(&self, resource: &RecipeResource, dest: &Path) -> Result<()> {
        let url = self.url(&format!("/archive/{}", resource.archive_name));
        info!("downloading {}", resource.archive_name);
        let response = self.get(url)?;
        let mut response = self.check_status(response, &resource.archive_name)?;

        let total = response.content_length();
        let progress = match total {
            Some(len) => indicatif::ProgressBar::new(len),
            None => indicatif::ProgressBar::new_spinner(),
        };

        let file = fs::File::create(dest)
            .map_err(Error::io_context(format!("creating {}", dest.display())))?;
        let mut writer = crate::archive::DigestWriter::new(std::io::BufWriter::new(file));
        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = std::io::Read::read(&mut response, &mut buf)?;
            if n == 0 {
                break;
            }
            writer.write_all(&buf[..n])?;
            progress.inc(n as u64);
        }
        progress.finish_and_clear();
        let (mut inner, digest) = writer.finish();
        inner.flush()?;

        let got = hex::encode(digest);
        if !got.eq_ignore_ascii_case(&resource.sha256) {
            fs::remove_file(dest).ok();
            return Err(Error::Integrity(format!(
                "archive {} SHA-256 mismatch: expected {}, got {got}",
                resource.archive_name, resource.sha256
            )));
        }
        debug!("archive {} verified", resource.archive_name);
        Ok(())
    }

    /// Catalog search.
    pub fn search(&self, query: &SearchQuery) -> Result<Vec<SearchEntry>> {
        let mut url = self.url("/v1/packages");
        {
            let mut pairs = url.query_pairs_mut();
            if let Some(pattern) = &query.pattern {
                pairs.append_pair("pattern", pattern);
            }
            if query.regex {
                pairs.append_pair("regex", "true");
            }
            if query.case_sensitive {
                pairs.append_pair("caseSensitive", "true");
            }
            if query.name_only {
                pairs.append_pair("nameOnly", "true");
            }
            if query.extended {
                pairs.append_pair("extended", "true");
            }
            if query.latest_only {
                pairs.append_pair("latestOnly", "true");
            }
            if let Some(limit) = query.limit {
                pairs.append_pair("limit", &limit.to_string());
            }
        }
        let response = self.get(url)?;
        let response = self.check_status(response, "package search")?;
        Ok(response.json()?)
    }

    /// Announce a recipe publication, obtaining the upload bearer.
    pub fn publish(&self, request: &PublishRequest) -> Result<PublishResponse> {
        let url = self.url("/v1/packages");
        let token = self
            .token
            .as_ref()
            .ok_or_else(|| Error::Auth("publishing requires a registry token".to_string()))?;
        let response = self
            .http
            .post(url)
            .bearer_auth(token)
            .json(request)
            .send()
            .map_err(|e| self.server_down(e))?;
        let response = self.check_status(response, &format!("publish {}", request.name))?;
        Ok(response.json()?)
    }

    /// Upload the archive bytes under the short-lived bearer.
    pub fn upload_archive(&self, bearer: &str, archive: &Path) -> Result<()> {
        let sha256_hex = crate::archive::sha256_file(archive)?;
        let sha256_bytes = hex::decode(&sha256_hex).expect("own hex output");
        let digest_header = format!(
            "sha-256={}",
            base64::Engine::encode(&base64::engine::general_purpose::STANDARD, sha256_bytes)
        );
        let bytes = fs::read(archive)
            .map_err(Error::io_context(format!("reading {}", archive.display())))?;

        let url = self.url("/archive");
        let response = self
            .http
            .post(url)
            .bearer_auth(bearer)
            .header("X-Digest", digest_header)
            .header(reqwest::header::CONTENT_LENGTH, bytes.len())
            .body(bytes)
            .send()
            .map_err(|e| self.server_down(e))?;
        self.check_status(response, "archive upload")?;
        Ok(())
    }
}
