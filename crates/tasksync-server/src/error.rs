//! Error types for the sync server.

use tasksync_core::{DecodeError, EncodeError};
use thiserror::Error;

/// Failure of a document store backend.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Stored snapshot is corrupt: {0}")]
    Corrupt(String),

    #[error("Storage task failed: {0}")]
    Join(String),
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(e: tokio::task::JoinError) -> Self {
        StoreError::Join(e.to_string())
    }
}

/// Failure of the access gate or record source.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    #[error("Access denied")]
    AccessDenied,

    #[error("Collection not found: {0}")]
    NotFound(String),

    #[error("Record source failed: {0}")]
    Unavailable(String),
}

/// Error returned by the sync protocol handler.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Access denied")]
    AccessDenied,

    #[error("Document not found: {0}")]
    NotFound(String),

    #[error("Malformed payload: {0}")]
    Decode(#[from] DecodeError),

    #[error("Persistence failed: {0}")]
    Persistence(#[from] StoreError),

    #[error("Record source failed: {0}")]
    Source(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<CatalogError> for SyncError {
    fn from(e: CatalogError) -> Self {
        match e {
            CatalogError::AccessDenied => SyncError::AccessDenied,
            CatalogError::NotFound(id) => SyncError::NotFound(id),
            CatalogError::Unavailable(msg) => SyncError::Source(msg),
        }
    }
}

impl From<EncodeError> for SyncError {
    fn from(e: EncodeError) -> Self {
        SyncError::Internal(e.to_string())
    }
}

/// Result type for handler operations.
pub type Result<T> = std::result::Result<T, SyncError>;
