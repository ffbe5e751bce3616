//! Error types for the sync agent.

use tasksync_core::{DecodeError, EncodeError, TransportError};
use thiserror::Error;

/// Error returned by sync agent operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// The local replica has not been loaded yet.
    #[error("Document is not loaded yet")]
    NotReady,

    #[error("Agent has been disposed")]
    Disposed,

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Invalid payload from server: {0}")]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Encode(#[from] EncodeError),
}

/// Result type for agent operations.
pub type Result<T> = std::result::Result<T, ClientError>;
