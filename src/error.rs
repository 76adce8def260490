//! Error type shared by every layer of the store.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VariantStoreError {
    /// Storage or bundled resources could not be set up. Fatal for the store instance.
    #[error("unable to provision resources at {path}: {message}")]
    ResourceProvisioning { path: PathBuf, message: String },

    /// A file could not be read or one of its rows is malformed.
    #[error("ingestion of {path} failed at line {line}: {message}")]
    Ingestion {
        path: PathBuf,
        line: u64,
        message: String,
    },

    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// A record cannot be written to, or rebuilt from, a backend document.
    #[error("mapping error: {0}")]
    Mapping(String),

    #[error("unsupported input format: {0}")]
    UnsupportedFormat(PathBuf),

    #[error("variant iterator is exhausted")]
    EndOfSequence,

    #[error("ingestion of individual {0} was cancelled")]
    Cancelled(String),

    #[error("individual {0} is already stored")]
    AlreadyStored(String),

    #[error("variant store is stopped")]
    Stopped,

    #[error("error in expression: {0}")]
    Expression(String),

    #[error("worker dropped task for {0} before completing it")]
    TaskAbandoned(String),

    #[error("worker panicked while processing {id}: {message}")]
    WorkerPanicked { id: String, message: String },

    /// The id cannot name an individual, e.g. it contains a path separator.
    #[error("invalid individual id '{0}'")]
    InvalidIndividual(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, VariantStoreError>;

impl VariantStoreError {
    pub fn ingestion(path: impl Into<PathBuf>, line: u64, message: impl Into<String>) -> Self {
        Self::Ingestion {
            path: path.into(),
            line,
            message: message.into(),
        }
    }

    pub fn provisioning(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::ResourceProvisioning {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn mapping(message: impl Into<String>) -> Self {
        Self::Mapping(message.into())
    }
}

impl From<rusqlite::Error> for VariantStoreError {
    fn from(e: rusqlite::Error) -> Self {
        Self::BackendUnavailable(e.to_string())
    }
}

impl From<mlua::Error> for VariantStoreError {
    fn from(e: mlua::Error) -> Self {
        Self::Expression(e.to_string())
    }
}
