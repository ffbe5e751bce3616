//! Registry of live documents.
//!
//! Each document id maps to one slot guarded by an async mutex. Holding the
//! slot's lock is the per-document critical section: loading, seeding,
//! merging and persisting for one id never interleave, while different ids
//! proceed in parallel. No lock ever spans two documents.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use tasksync_core::{ReplicaId, TaskDocument};
use tokio::sync::{Mutex as AsyncMutex, OwnedMappedMutexGuard, OwnedMutexGuard};
use tracing::{debug, info};

use crate::catalog::RecordSource;
use crate::error::{Result, StoreError, SyncError};
use crate::store::{DocumentStore, StoredSnapshot};

type Slot = Arc<AsyncMutex<Option<TaskDocument>>>;

/// Exclusive access to one live document.
///
/// Dropping the lease ends the critical section.
pub struct DocumentLease {
    guard: OwnedMappedMutexGuard<Option<TaskDocument>, TaskDocument>,
}

impl Deref for DocumentLease {
    type Target = TaskDocument;

    fn deref(&self) -> &TaskDocument {
        &self.guard
    }
}

impl DerefMut for DocumentLease {
    fn deref_mut(&mut self) -> &mut TaskDocument {
        &mut self.guard
    }
}

/// Loads documents from the store (or seeds them) and keeps them in memory.
///
/// A cache assumes it is the only live writer for its store: after the first
/// load it never rereads a snapshot, and every commit overwrites the stored
/// one. Several caches may race to seed a document, since seeding goes
/// through [`DocumentStore::insert_if_absent`], but they must not edit the
/// same documents concurrently.
pub struct DocumentCache {
    replica_id: ReplicaId,
    store: Arc<dyn DocumentStore>,
    source: Arc<dyn RecordSource>,
    slots: Mutex<HashMap<String, Slot>>,
}

impl DocumentCache {
    pub fn new(store: Arc<dyn DocumentStore>, source: Arc<dyn RecordSource>) -> Self {
        Self::with_replica_id(format!("server-{}", ulid::Ulid::new()), store, source)
    }

    pub fn with_replica_id(
        replica_id: impl Into<ReplicaId>,
        store: Arc<dyn DocumentStore>,
        source: Arc<dyn RecordSource>,
    ) -> Self {
        Self {
            replica_id: replica_id.into(),
            store,
            source,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Replica id used for documents this server seeds.
    pub fn replica_id(&self) -> &str {
        &self.replica_id
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    fn slot(&self, document_id: &str) -> Slot {
        Arc::clone(
            self.slots
                .lock()
                .entry(document_id.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(None))),
        )
    }

    /// Lease the live document, loading or seeding it first if needed.
    ///
    /// Concurrent callers for the same id wait for the one load in flight
    /// and then reuse its result.
    pub async fn get_or_load(&self, document_id: &str) -> Result<DocumentLease> {
        let mut guard = self.slot(document_id).lock_owned().await;
        if guard.is_none() {
            *guard = Some(self.load_or_seed(document_id).await?);
        }
        OwnedMutexGuard::try_map(guard, Option::as_mut)
            .map(|guard| DocumentLease { guard })
            .map_err(|_| SyncError::Internal(format!("document {} vanished during load", document_id)))
    }

    async fn load_or_seed(&self, document_id: &str) -> Result<TaskDocument> {
        if let Some(snapshot) = self.store.get(document_id).await? {
            info!(document_id, "loaded document from store");
            return self.restore(document_id, &snapshot);
        }

        let records = self.source.records_for(document_id).await?;
        let seed = TaskDocument::seeded(self.replica_id.clone(), document_id, records);
        let snapshot = StoredSnapshot::new(seed.encode_full_state()?, seed.encode_state_vector()?);

        match self.store.insert_if_absent(document_id, snapshot).await? {
            None => {
                info!(document_id, records = seed.len(), "seeded document");
                Ok(seed)
            }
            Some(existing) => {
                debug!(document_id, "lost seeding race, adopting stored snapshot");
                self.restore(document_id, &existing)
            }
        }
    }

    fn restore(&self, document_id: &str, snapshot: &StoredSnapshot) -> Result<TaskDocument> {
        TaskDocument::from_state(self.replica_id.clone(), &snapshot.full_state).map_err(|e| {
            SyncError::Persistence(StoreError::Corrupt(format!("{}: {}", document_id, e)))
        })
    }

    /// Drop the in-memory copy of a document. Waits for the current lease
    /// holder, so the next access reloads what that holder persisted.
    pub async fn evict(&self, document_id: &str) -> bool {
        let Some(slot) = self.slots.lock().get(document_id).cloned() else {
            return false;
        };

        let mut doc = slot.lock().await;
        let was_loaded = doc.take().is_some();

        // Only forget the slot when nobody else is waiting on it; waiters
        // will find it empty and reload.
        let mut slots = self.slots.lock();
        if Arc::strong_count(&slot) == 2
            && slots.get(document_id).is_some_and(|s| Arc::ptr_eq(s, &slot))
        {
            slots.remove(document_id);
        }
        drop(slots);
        drop(doc);

        if was_loaded {
            info!(document_id, "evicted document");
        }
        was_loaded
    }

    /// Evict every document.
    pub async fn evict_all(&self) -> usize {
        let ids: Vec<String> = self.slots.lock().keys().cloned().collect();
        let mut evicted = 0;
        for id in ids {
            if self.evict(&id).await {
                evicted += 1;
            }
        }
        evicted
    }

    /// Number of documents with a cache slot.
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }

    pub fn is_cached(&self, document_id: &str) -> bool {
        self.slots.lock().contains_key(document_id)
    }
}
