// src/server/mod.rs

//! dopamine registry server
//!
//! Serves the HTTP API the `dop` client talks to: authentication (OAuth
//! code exchange, refresh-token rotation, long-lived CLI tokens), archive
//! upload/download with content digests and range support, and the package
//! search catalog.
//!
//! Per-request concurrency is cooperative on the tokio runtime; the only
//! shared mutable state is the database handle. Per-upload state lives in
//! the database row identified by the upload bearer's subject.

pub mod auth;
pub mod db;
pub mod handlers;
pub mod routes;
pub mod storage;

use crate::error::{Error, Result};
use db::Db;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use storage::Storage;
use tracing::info;

/// Seconds an upload bearer stays valid
pub const UPLOAD_WINDOW_SECS: i64 = 180;

/// Environment-driven server configuration, immutable after startup
#[derive(Debug, Clone)]
pub struct Config {
    pub hostname: String,
    pub port: u16,
    pub jwt_secret: String,
    /// Serve the API under `/api` and allow this origin when set
    pub frontend_origin: Option<String>,
    /// SQLite database location
    pub db_connstring: PathBuf,
    /// Accepted for deployment parity; pooling internals are the driver's
    pub db_pool_max_size: u32,
    pub github_client_id: Option<String>,
    pub github_client_secret: Option<String>,
    pub google_client_id: Option<String>,
    pub google_client_secret: Option<String>,
    /// Blob directory; `None` stores blobs in the database
    pub storage_dir: Option<PathBuf>,
    pub https_cert: Option<PathBuf>,
    pub https_key: Option<PathBuf>,
}

impl Config {
    pub fn from_env() -> Result<Config> {
        let jwt_secret = std::env::var("DOP_REGISTRY_JWTSECRET")
            .map_err(|_| Error::Config("DOP_REGISTRY_JWTSECRET is required".to_string()))?;
        let port = std::env::var("DOP_REGISTRY_PORT")
            .or_else(|_| std::env::var("PORT"))
            .unwrap_or_else(|_| "3500".to_string())
            .parse()
            .map_err(|_| Error::Config("bad registry port".to_string()))?;
        Ok(Config {
            hostname: std::env::var("DOP_REGISTRY_HOSTNAME").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port,
            jwt_secret,
            frontend_origin: std::env::var("DOP_FRONTEND_ORIGIN").ok(),
            db_connstring: std::env::var("DOP_DB_CONNSTRING")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("dop-registry.db")),
            db_pool_max_size: std::env::var("DOP_DB_POOLMAXSIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(8),
            github_client_id: std::env::var("DOP_GITHUB_CLIENTID").ok(),
            github_client_secret: std::env::var("DOP_GITHUB_CLIENTSECRET").ok(),
            google_client_id: std::env::var("DOP_GOOGLE_CLIENTID").ok(),
            google_client_secret: std::env::var("DOP_GOOGLE_CLIENTSECRET").ok(),
            storage_dir: std::env::var("DOP_REGISTRY_STORAGEDIR").ok().map(PathBuf::from),
            https_cert: std::env::var("DOP_HTTPS_CERT").ok().map(PathBuf::from),
            https_key: std::env::var("DOP_HTTPS_KEY").ok().map(PathBuf::from),
        })
    }
}

/// Shared server state
pub struct AppState {
    pub config: Config,
    pub db: Db,
    pub storage: Storage,
}

impl AppState {
    pub fn new(config: Config) -> Result<AppState> {
        let db = Db::open(&config.db_connstring)?;
        let storage = match &config.storage_dir {
            Some(dir) => Storage::filesystem(dir.clone())?,
            None => Storage::database(),
        };
        Ok(AppState {
            config,
            db,
            storage,
        })
    }
}

/// Run the registry until the process is signalled.
pub async fn run(config: Config) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.hostname, config.port)
        .parse()
        .map_err(|e| Error::Config(format!("bad bind address: {e}")))?;

    let state = Arc::new(AppState::new(config)?);
    // archives from interrupted uploads are unusable after a restart
    let dropped = state.db.delete_provisional_archives()?;
    if dropped > 0 {
        info!("dropped {dropped} provisional archive(s) from a previous run");
    }

    let app = routes::create_router(state.clone());
    info!("dop-registry listening on {addr}");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(Error::io_context(format!("binding {addr}")))?;
    axum::serve(listener, app)
        .await
        .map_err(Error::io_context("serving"))?;
    Ok(())
}
