//! Error types for file-storage

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Invalid file hash: {0:?}")]
    InvalidHash(String),

    #[error("Link object is empty")]
    EmptyObject,

    #[error("Invalid link object: {0:?}")]
    InvalidLinkObject(String),

    #[error("File rejected: {reason}")]
    Rejected { reason: String, detail: String },

    #[error("The file is not linked to the object: {file} -> {object}")]
    NotLinked { file: String, object: String },

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Unknown bucket: {0}")]
    UnknownBucket(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to persist {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Remote command failed on {addr}: {message}")]
    Remote { addr: String, message: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse classification for boundary layers mapping errors onto
/// their own protocol responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input; nothing was mutated.
    Validation,
    /// The file exists but is not associated with the requested object.
    NotLinked,
    /// The requested bucket or file is absent.
    NotFound,
    /// Catalog, filesystem or replication failure.
    Storage,
    /// Invalid initialization parameters.
    Config,
}

impl StorageError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StorageError::InvalidHash(_)
            | StorageError::EmptyObject
            | StorageError::InvalidLinkObject(_)
            | StorageError::Rejected { .. } => ErrorKind::Validation,
            StorageError::NotLinked { .. } => ErrorKind::NotLinked,
            StorageError::NotFound(_) | StorageError::UnknownBucket(_) => ErrorKind::NotFound,
            StorageError::Config(_) => ErrorKind::Config,
            StorageError::Database(_)
            | StorageError::Io(_)
            | StorageError::Persist { .. }
            | StorageError::Remote { .. }
            | StorageError::Json(_)
            | StorageError::Internal(_) => ErrorKind::Storage,
        }
    }

    pub fn is_not_linked(&self) -> bool {
        matches!(self, StorageError::NotLinked { .. })
    }

    pub(crate) fn rejected(reason: impl Into<String>, detail: impl Into<String>) -> Self {
        StorageError::Rejected {
            reason: reason.into(),
            detail: detail.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;
