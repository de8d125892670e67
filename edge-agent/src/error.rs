//! Application-wide error types.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Application-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("IO error while {op} {path}: {source}")]
    IoPath {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Duplicate name: {0}")]
    DuplicateName(String),

    #[error("Timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Unavailable: {0}")]
    Unavailable(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn io_path(op: &'static str, path: &Path, source: std::io::Error) -> Self {
        Self::IoPath {
            op,
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    /// Short, stable label for this failure.
    ///
    /// Used as the failure kind recorded in a worker's exception history, so
    /// it must not contain per-occurrence detail.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Io(_) | Error::IoPath { .. } => "io",
            Error::Serialization(_) => "serialization",
            Error::Configuration(_) => "configuration",
            Error::Validation(_) => "validation",
            Error::DuplicateName(_) => "duplicate_name",
            Error::Timeout(_) => "timeout",
            Error::Unavailable(_) => "unavailable",
            Error::Other(_) => "other",
        }
    }
}
