//! Error taxonomy for the snapshot pipeline.
//!
//! Per-file problems during a tree copy are not represented here: they are
//! collected as [`SkippedFile`](crate::executor::tree::SkippedFile) records.
//! Everything in this enum is fatal for the current run.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VaultError {
    #[error("Safety violation: {message} (source: {source_path}, destination: {destination})")]
    SafetyViolation {
        message: String,
        source_path: PathBuf,
        destination: PathBuf,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to commit {}: {source}", path.display())]
    Commit {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to build archive {}: {source}", path.display())]
    Archive {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{tool} exited with status {code:?}: {stderr}")]
    ExternalTool {
        tool: String,
        code: Option<i32>,
        stdout: String,
        stderr: String,
    },

    #[error("Required tool not available: {0}")]
    ToolMissing(String),

    #[error("Backup cancelled")]
    Cancelled,

    #[error("Hook '{name}' failed: {message}")]
    Hook { name: String, message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl VaultError {
    pub(crate) fn commit(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        VaultError::Commit {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn archive(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        VaultError::Archive {
            path: path.into(),
            source,
        }
    }
}

impl From<walkdir::Error> for VaultError {
    fn from(err: walkdir::Error) -> Self {
        VaultError::Io(err.into())
    }
}

pub type Result<T> = std::result::Result<T, VaultError>;
