//! Domain-specific errors for environment operations.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EnvError {
    #[error("Network error for {url}: {message}")]
    Network { url: String, message: String },

    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("Unpack failed: {0}")]
    Unpack(String),

    #[error("Directory conflict: {0}")]
    DirectoryConflict(String),

    #[error(
        "Directory locked: {}: close any application using it and retry",
        path.display()
    )]
    DirectoryLocked { path: PathBuf, source: io::Error },

    #[error("Repository sync failed: {0}")]
    Sync(String),

    #[error("No installable package for environment {0}")]
    NoPackage(String),

    /// Cooperative cancellation. Treated as a successful-cancellation path
    /// by the orchestrator, not reported as a failure.
    #[error("Operation cancelled")]
    Aborted,

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl EnvError {
    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted)
    }

    pub(crate) fn network(url: impl Into<String>, message: impl ToString) -> Self {
        Self::Network {
            url: url.into(),
            message: message.to_string(),
        }
    }
}
