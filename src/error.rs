// src/error.rs

//! Crate-wide error type
//!
//! Fatal conditions carry enough context (package name, attempt number, last
//! solver diagnostic) to reproduce the failure. `ArchiveExists` is the one
//! benign variant: the convergence loop treats it as "already converted".

use std::path::PathBuf;
use thiserror::Error;

/// Result alias used across the library
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The solver keeps failing but reported nothing we have not already fetched
    #[error(
        "unresolvable dependencies after attempt {attempt}: no new missing packages (missing: {}){}",
        .missing.join(", "),
        .diagnostic.as_deref().map(|d| format!("\nlast solver diagnostic:\n{d}")).unwrap_or_default()
    )]
    Unresolvable {
        attempt: usize,
        missing: Vec<String>,
        diagnostic: Option<String>,
    },

    /// The loop ran out of solver attempts
    #[error("exceeded maximum of {attempts} resolution attempts (missing: {})", .missing.join(", "))]
    AttemptsExhausted { attempts: usize, missing: Vec<String> },

    /// No installable binary artifact exists for the target
    #[error("no compatible wheel for '{package}': {reason}")]
    NoCompatibleArtifact { package: String, reason: String },

    /// An archive with the same stem is already published
    #[error("archive already exists: {0}")]
    ArchiveExists(PathBuf),

    #[error("package not found in any source index: {0}")]
    PackageNotFound(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("solver error: {0}")]
    Solver(String),

    #[error("metadata error: {0}")]
    Metadata(String),

    #[error("build error: {0}")]
    Build(String),

    #[error("index error: {0}")]
    Index(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<zip::result::ZipError> for Error {
    fn from(err: zip::result::ZipError) -> Self {
        Error::Build(format!("zip archive error: {err}"))
    }
}

impl From<walkdir::Error> for Error {
    fn from(err: walkdir::Error) -> Self {
        Error::Io(err.into())
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Network(err.to_string())
    }
}

impl Error {
    /// Whether the convergence loop may continue past this error
    pub fn is_benign(&self) -> bool {
        matches!(self, Error::ArchiveExists(_))
    }
}
