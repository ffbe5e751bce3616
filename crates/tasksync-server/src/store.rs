//! Durable snapshots of task documents.
//!
//! A store keeps one [`StoredSnapshot`] per document id plus an append-only
//! audit log of the updates clients sent. The log is never read back to
//! rebuild state; the snapshot alone is authoritative.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;

use crate::error::StoreError;

/// Persisted state of one document.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredSnapshot {
    pub full_state: Vec<u8>,
    pub state_vector: Vec<u8>,
    pub updated_at: DateTime<Utc>,
}

impl StoredSnapshot {
    pub fn new(full_state: Vec<u8>, state_vector: Vec<u8>) -> Self {
        Self {
            full_state,
            state_vector,
            updated_at: Utc::now(),
        }
    }
}

/// One client update as received, kept for auditing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UpdateLogEntry {
    pub document_id: String,
    pub author_id: String,
    pub update: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

impl UpdateLogEntry {
    pub fn new(document_id: impl Into<String>, author_id: impl Into<String>, update: Vec<u8>) -> Self {
        Self {
            document_id: document_id.into(),
            author_id: author_id.into(),
            update,
            created_at: Utc::now(),
        }
    }
}

/// Storage backend for document snapshots.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Latest snapshot, or `None` if the document was never stored.
    async fn get(&self, document_id: &str) -> Result<Option<StoredSnapshot>, StoreError>;

    /// Insert or overwrite the snapshot. This is a blind write: the caller
    /// must hold the newest state for the document.
    async fn put(&self, document_id: &str, snapshot: StoredSnapshot) -> Result<(), StoreError>;

    /// Store `snapshot` only if no snapshot exists yet. Returns the snapshot
    /// already stored when another writer got there first.
    async fn insert_if_absent(
        &self,
        document_id: &str,
        snapshot: StoredSnapshot,
    ) -> Result<Option<StoredSnapshot>, StoreError>;

    async fn append_log(&self, entry: UpdateLogEntry) -> Result<(), StoreError>;

    /// Logged updates for a document, oldest first.
    async fn log_entries(&self, document_id: &str) -> Result<Vec<UpdateLogEntry>, StoreError>;
}

/// In-memory store, used by tests, the demo and the stress run.
#[derive(Default)]
pub struct MemoryStore {
    snapshots: RwLock<HashMap<String, StoredSnapshot>>,
    log: RwLock<Vec<UpdateLogEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.snapshots.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.read().is_empty()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, document_id: &str) -> Result<Option<StoredSnapshot>, StoreError> {
        Ok(self.snapshots.read().get(document_id).cloned())
    }

    async fn put(&self, document_id: &str, snapshot: StoredSnapshot) -> Result<(), StoreError> {
        self.snapshots
            .write()
            .insert(document_id.to_string(), snapshot);
        Ok(())
    }

    async fn insert_if_absent(
        &self,
        document_id: &str,
        snapshot: StoredSnapshot,
    ) -> Result<Option<StoredSnapshot>, StoreError> {
        let mut snapshots = self.snapshots.write();
        if let Some(existing) = snapshots.get(document_id) {
            return Ok(Some(existing.clone()));
        }
        snapshots.insert(document_id.to_string(), snapshot);
        Ok(None)
    }

    async fn append_log(&self, entry: UpdateLogEntry) -> Result<(), StoreError> {
        self.log.write().push(entry);
        Ok(())
    }

    async fn log_entries(&self, document_id: &str) -> Result<Vec<UpdateLogEntry>, StoreError> {
        Ok(self
            .log
            .read()
            .iter()
            .filter(|e| e.document_id == document_id)
            .cloned()
            .collect())
    }
}
