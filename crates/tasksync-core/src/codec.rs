//! Binary codec shared by updates, snapshots and state vectors.
//!
//! Payloads are bincode (standard config, serde mode). Decoding is bounded
//! and rejects trailing bytes, so a payload either decodes completely or not
//! at all.

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use crate::clock::Stamp;

/// Upper bound on a single decoded payload.
pub const MAX_PAYLOAD_BYTES: usize = 64 * 1024 * 1024;

/// Errors produced while decoding or validating a payload.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Malformed payload: {0}")]
    Malformed(String),

    #[error("Trailing bytes after payload: consumed {consumed} of {total}")]
    TrailingBytes { consumed: usize, total: usize },

    #[error("Unsupported format version: {0}")]
    UnsupportedVersion(u8),

    #[error("Invalid base64: {0}")]
    InvalidBase64(String),

    #[error("Operation {0} is not covered by the payload state vector")]
    StampOutsideVector(Stamp),

    #[error("Operation references unknown record: {0}")]
    UnknownRecord(String),

    #[error("Record {record} is inserted after unknown record {origin}")]
    UnknownOrigin { record: String, origin: String },

    #[error("Record {record} does not causally follow its origin {origin}")]
    OriginNotBefore { record: String, origin: String },

    #[error("Record id {0} is claimed by two different inserts")]
    DuplicateRecord(String),

    #[error("Clock value {0} is out of range")]
    ClockOutOfRange(u64),

    #[error("Update depends on operations this replica has not incorporated")]
    MissingDependencies,
}

/// Error produced while encoding a payload.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Failed to encode payload: {0}")]
pub struct EncodeError(pub String);

/// Serialize `value` into the wire format.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, EncodeError> {
    bincode::serde::encode_to_vec(value, bincode::config::standard())
        .map_err(|e| EncodeError(e.to_string()))
}

/// Deserialize a complete payload, rejecting trailing garbage.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, DecodeError> {
    let config = bincode::config::standard().with_limit::<MAX_PAYLOAD_BYTES>();
    let (value, consumed) = bincode::serde::decode_from_slice(bytes, config)
        .map_err(|e| DecodeError::Malformed(e.to_string()))?;
    if consumed != bytes.len() {
        return Err(DecodeError::TrailingBytes {
            consumed,
            total: bytes.len(),
        });
    }
    Ok(value)
}
