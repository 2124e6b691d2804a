// src/error.rs

//! Central error type for the dopamine client and server
//!
//! Errors are grouped by kind rather than by module: recipe script failures,
//! I/O, network, auth, resolver failures and integrity violations each map to
//! one variant so the CLI can attach the right remedy hint.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// A recipe script raised or a host function called from a script failed.
    /// `location` carries the top script frame when the interpreter knows it.
    #[error("recipe error: {message}{}", location.as_ref().map(|l| format!(" ({l})")).unwrap_or_default())]
    Recipe {
        message: String,
        location: Option<String>,
    },

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("{context}: {source}")]
    IoContext {
        context: String,
        #[source]
        source: io::Error,
    },

    /// Subprocess exited with a non-zero status and the caller did not
    /// allow failure.
    #[error("command `{command}` failed with status {status}\n{output}")]
    Subprocess {
        command: String,
        status: i32,
        output: String,
    },

    #[error("server {host} unreachable: {reason}")]
    ServerDown { host: String, reason: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("{0} not found")]
    NotFound(String),

    /// No version of `name` satisfies every incoming constraint.
    #[error("cannot satisfy constraints on {name}: {}", specs.join(", "))]
    UnsatisfiableConstraint {
        name: String,
        specs: Vec<String>,
        offenders: Vec<String>,
    },

    #[error("lock file is stale: {0}")]
    LockStale(String),

    #[error("dependency cycle: {}", cycle.join(" -> "))]
    CyclicGraph { cycle: Vec<String> },

    #[error("integrity check failed: {0}")]
    Integrity(String),

    #[error("invalid version: {0}")]
    InvalidVersion(String),

    #[error("invalid version spec: {0}")]
    InvalidVersionSpec(String),

    #[error("invalid profile file {path}: {reason}")]
    InvalidProfile { path: PathBuf, reason: String },

    #[error("invalid recipe: {0}")]
    InvalidRecipe(String),

    #[error("invalid option value: {0}")]
    InvalidOption(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

impl Error {
    /// Whether this error is worth retrying with `--no-network`.
    pub fn is_network(&self) -> bool {
        matches!(self, Error::ServerDown { .. } | Error::Network(_) | Error::Http(_))
    }

    pub fn io_context(context: impl Into<String>) -> impl FnOnce(io::Error) -> Error {
        let context = context.into();
        move |source| Error::IoContext { context, source }
    }

    /// An actionable remedy for the CLI `NOK` line, when one exists.
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Error::ServerDown { .. } | Error::Network(_) => Some("dop resolve --no-network"),
            Error::Auth(_) => Some("dop login --registry <url> <token>"),
            Error::LockStale(_) => Some("dop resolve --force"),
            _ => None,
        }
    }
}
