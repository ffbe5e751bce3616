//! In-process transport: lets a client agent talk to a [`SyncHandler`]
//! directly, without HTTP.

use async_trait::async_trait;
use std::sync::Arc;
use tasksync_core::{FullState, SyncReply, SyncTransport, TransportError};

use crate::error::SyncError;
use crate::handler::SyncHandler;

/// A [`SyncTransport`] bound to one principal and one in-process handler.
#[derive(Clone)]
pub struct LocalTransport {
    handler: Arc<SyncHandler>,
    principal: String,
}

impl LocalTransport {
    pub fn new(handler: Arc<SyncHandler>, principal: impl Into<String>) -> Self {
        Self {
            handler,
            principal: principal.into(),
        }
    }

    pub fn principal(&self) -> &str {
        &self.principal
    }
}

impl From<SyncError> for TransportError {
    fn from(e: SyncError) -> Self {
        match e {
            SyncError::AccessDenied => TransportError::AccessDenied,
            SyncError::NotFound(_) => TransportError::NotFound,
            SyncError::Decode(e) => TransportError::Rejected(e.to_string()),
            other => TransportError::Server(other.to_string()),
        }
    }
}

#[async_trait]
impl SyncTransport for LocalTransport {
    async fn fetch_full_state(&self, document_id: &str) -> Result<FullState, TransportError> {
        Ok(self
            .handler
            .fetch_full_state(document_id, &self.principal)
            .await?)
    }

    async fn sync(
        &self,
        document_id: &str,
        state_vector: Vec<u8>,
        update: Option<Vec<u8>>,
    ) -> Result<SyncReply, TransportError> {
        Ok(self
            .handler
            .sync(document_id, &self.principal, &state_vector, update.as_deref())
            .await?)
    }
}
