//! Sync protocol messages and the transport seam.
//!
//! Binary payloads travel as Base64 (standard alphabet) inside JSON bodies
//! with camelCase keys. The binary forms ([`FullState`], [`SyncReply`]) are
//! what the server handler and the client agent work with.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::codec::DecodeError;

pub fn encode_base64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

pub fn decode_base64(text: &str) -> Result<Vec<u8>, DecodeError> {
    STANDARD
        .decode(text)
        .map_err(|e| DecodeError::InvalidBase64(e.to_string()))
}

/// Complete document state as returned to a joining replica.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FullState {
    pub state: Vec<u8>,
    pub state_vector: Vec<u8>,
}

/// Server answer to one sync round.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncReply {
    /// Operations the caller is missing; `None` when it is already current.
    pub update: Option<Vec<u8>>,
    pub state_vector: Vec<u8>,
}

/// `GET .../full-state` response body.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FullStateResponse {
    pub state: String,
    pub state_vector: String,
}

/// `POST .../sync` request body.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRequest {
    pub state_vector: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update: Option<String>,
}

/// `POST .../sync` response body.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResponse {
    pub update: Option<String>,
    pub state_vector: String,
}

/// Error body returned for every non-2xx response.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

impl From<&FullState> for FullStateResponse {
    fn from(full: &FullState) -> Self {
        Self {
            state: encode_base64(&full.state),
            state_vector: encode_base64(&full.state_vector),
        }
    }
}

impl TryFrom<FullStateResponse> for FullState {
    type Error = DecodeError;

    fn try_from(body: FullStateResponse) -> Result<Self, Self::Error> {
        Ok(Self {
            state: decode_base64(&body.state)?,
            state_vector: decode_base64(&body.state_vector)?,
        })
    }
}

impl From<&SyncReply> for SyncResponse {
    fn from(reply: &SyncReply) -> Self {
        Self {
            update: reply.update.as_deref().map(encode_base64),
            state_vector: encode_base64(&reply.state_vector),
        }
    }
}

impl TryFrom<SyncResponse> for SyncReply {
    type Error = DecodeError;

    fn try_from(body: SyncResponse) -> Result<Self, Self::Error> {
        Ok(Self {
            update: body.update.as_deref().map(decode_base64).transpose()?,
            state_vector: decode_base64(&body.state_vector)?,
        })
    }
}

impl SyncRequest {
    pub fn new(state_vector: &[u8], update: Option<&[u8]>) -> Self {
        Self {
            state_vector: encode_base64(state_vector),
            update: update.map(encode_base64),
        }
    }

    /// Decode into `(state_vector, update)` bytes.
    pub fn into_parts(self) -> Result<(Vec<u8>, Option<Vec<u8>>), DecodeError> {
        let vector = decode_base64(&self.state_vector)?;
        let update = self.update.as_deref().map(decode_base64).transpose()?;
        Ok((vector, update))
    }
}

/// Failures seen by a replica talking to the server.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Access denied")]
    AccessDenied,

    #[error("Document not found")]
    NotFound,

    /// The server refused the payload as malformed.
    #[error("Rejected by server: {0}")]
    Rejected(String),

    #[error("Server error: {0}")]
    Server(String),

    #[error("Network error: {0}")]
    Network(String),
}

impl TransportError {
    /// Whether retrying the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TransportError::Server(_) | TransportError::Network(_))
    }
}

/// Client-side view of the two sync endpoints.
#[async_trait]
pub trait SyncTransport: Send + Sync {
    async fn fetch_full_state(&self, document_id: &str) -> Result<FullState, TransportError>;

    async fn sync(
        &self,
        document_id: &str,
        state_vector: Vec<u8>,
        update: Option<Vec<u8>>,
    ) -> Result<SyncReply, TransportError>;
}
