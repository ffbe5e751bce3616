//! Sync protocol handler.
//!
//! Two operations back the HTTP boundary:
//! - `fetch_full_state`: complete state for a replica joining a document
//! - `sync`: merge the caller's pending update, persist, and answer with
//!   whatever the caller is missing
//!
//! A merge is applied to a copy of the live document and only committed to
//! the cache after the snapshot is durably stored, so a failed write leaves
//! both the cache and the store at the previous state.

use std::sync::Arc;
use tasksync_core::{FullState, StateVector, SyncReply};
use tracing::{debug, warn};

use crate::cache::DocumentCache;
use crate::catalog::AccessGate;
use crate::error::Result;
use crate::store::{StoredSnapshot, UpdateLogEntry};

/// Serves full-state and delta-sync requests for task documents.
pub struct SyncHandler {
    gate: Arc<dyn AccessGate>,
    cache: Arc<DocumentCache>,
    log_updates: bool,
}

impl SyncHandler {
    pub fn new(gate: Arc<dyn AccessGate>, cache: Arc<DocumentCache>) -> Self {
        Self {
            gate,
            cache,
            log_updates: true,
        }
    }

    /// Enable or disable the update audit log.
    pub fn with_update_log(mut self, enabled: bool) -> Self {
        self.log_updates = enabled;
        self
    }

    pub fn cache(&self) -> &Arc<DocumentCache> {
        &self.cache
    }

    /// Full encoded state and state vector of a document.
    pub async fn fetch_full_state(&self, document_id: &str, principal: &str) -> Result<FullState> {
        self.gate.authorize(principal, document_id).await?;

        let doc = self.cache.get_or_load(document_id).await?;
        Ok(FullState {
            state: doc.encode_full_state()?,
            state_vector: doc.encode_state_vector()?,
        })
    }

    /// One sync round.
    ///
    /// `client_vector` is what the caller has incorporated; `client_update`
    /// holds the caller's operations the server may not have. The reply's
    /// update is `None` when the caller already has everything.
    pub async fn sync(
        &self,
        document_id: &str,
        principal: &str,
        client_vector: &[u8],
        client_update: Option<&[u8]>,
    ) -> Result<SyncReply> {
        self.gate.authorize(principal, document_id).await?;
        let client_vector = StateVector::decode(client_vector)?;

        let mut doc = self.cache.get_or_load(document_id).await?;

        if let Some(update) = client_update {
            let mut next = doc.clone();
            let summary = next.apply_update(update)?;

            if next.state_vector() != doc.state_vector() {
                let snapshot =
                    StoredSnapshot::new(next.encode_full_state()?, next.encode_state_vector()?);
                self.cache.store().put(document_id, snapshot).await?;
                *doc = next;
            }
            debug!(
                document_id,
                principal,
                inserted = summary.inserted,
                fields = summary.fields_changed,
                deleted = summary.deleted,
                "merged client update"
            );

            if self.log_updates {
                let entry = UpdateLogEntry::new(document_id, principal, update.to_vec());
                if let Err(e) = self.cache.store().append_log(entry).await {
                    warn!(document_id, error = %e, "failed to append update log");
                }
            }
        }

        let update = if client_vector.dominates(doc.state_vector()) {
            None
        } else {
            Some(doc.encode_update_since(&client_vector)?)
        };
        debug!(document_id, principal, sent = update.is_some(), "sync complete");

        Ok(SyncReply {
            update,
            state_vector: doc.encode_state_vector()?,
        })
    }
}
