//! Client sync agent.
//!
//! The agent owns a local replica of one task list. Edits apply to the local
//! replica immediately and never wait on the network; a background loop
//! periodically exchanges deltas with the server.
//!
//! ```text
//! Uninitialized -> Loading -> Ready | Error
//! Ready <-> Syncing
//! any -> Disposed
//! ```

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tasksync_core::{
    NewRecord, Record, RecordId, RecordPatch, StateVector, SyncTransport, TaskDocument,
    TransportError,
};
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::AgentConfig;
use crate::error::{ClientError, Result};

/// Lifecycle state of an agent.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AgentState {
    Uninitialized,
    Loading,
    Ready,
    Syncing,
    /// Activation failed; the loop retries loading on every tick.
    Error,
    Disposed,
}

/// Snapshot of an agent's sync status.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AgentStatus {
    pub state: AgentState,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    /// Local operations the server has not acknowledged yet.
    pub has_pending_changes: bool,
}

/// Events published on the agent's broadcast channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AgentEvent {
    StateChanged(AgentState),
    /// A server reply changed the local replica.
    RemoteChanges {
        inserted: usize,
        updated: usize,
        deleted: usize,
    },
    Synced,
    SyncFailed(String),
}

/// Result of one [`SyncAgent::sync_now`] call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncOutcome {
    Synced {
        /// Local operations were pushed.
        pushed: bool,
        /// The server sent operations back.
        pulled: bool,
    },
    /// Another sync was already in flight.
    Skipped,
}

struct Inner<T: ?Sized> {
    config: AgentConfig,
    replica_id: String,
    transport: Arc<T>,
    doc: RwLock<Option<TaskDocument>>,
    /// Server vector from the last successful exchange; the base for the
    /// next pushed update.
    server_vector: Mutex<StateVector>,
    state: RwLock<AgentState>,
    last_synced_at: RwLock<Option<DateTime<Utc>>>,
    last_error: RwLock<Option<String>>,
    in_flight: AtomicBool,
    events: broadcast::Sender<AgentEvent>,
    cancel: CancellationToken,
    loop_started: AtomicBool,
}

/// Clears the in-flight flag when a sync attempt ends, however it ends.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Keeps a local task list in sync with the server.
///
/// Cloning the agent yields another handle to the same replica.
pub struct SyncAgent<T: SyncTransport + ?Sized + 'static> {
    inner: Arc<Inner<T>>,
}

impl<T: SyncTransport + ?Sized + 'static> Clone for SyncAgent<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: SyncTransport + ?Sized + 'static> SyncAgent<T> {
    /// Create an agent. Nothing is loaded until [`activate`](Self::activate).
    pub fn new(transport: Arc<T>, config: AgentConfig) -> Self {
        let replica_id = config
            .replica_id
            .clone()
            .unwrap_or_else(|| format!("client-{}", ulid::Ulid::new()));
        let (events, _) = broadcast::channel(config.event_capacity.max(1));

        Self {
            inner: Arc::new(Inner {
                config,
                replica_id,
                transport,
                doc: RwLock::new(None),
                server_vector: Mutex::new(StateVector::new()),
                state: RwLock::new(AgentState::Uninitialized),
                last_synced_at: RwLock::new(None),
                last_error: RwLock::new(None),
                in_flight: AtomicBool::new(false),
                events,
                cancel: CancellationToken::new(),
                loop_started: AtomicBool::new(false),
            }),
        }
    }

    pub fn replica_id(&self) -> &str {
        &self.inner.replica_id
    }

    pub fn document_id(&self) -> &str {
        &self.inner.config.document_id
    }

    pub fn state(&self) -> AgentState {
        *self.inner.state.read()
    }

    pub fn status(&self) -> AgentStatus {
        AgentStatus {
            state: self.state(),
            last_synced_at: *self.inner.last_synced_at.read(),
            last_error: self.inner.last_error.read().clone(),
            has_pending_changes: self.inner.has_pending_changes(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.inner.events.subscribe()
    }

    /// Load the document from the server and, if configured, start the
    /// background loop. A failed load leaves the agent in
    /// [`AgentState::Error`]; the loop keeps retrying.
    pub async fn activate(&self) -> Result<()> {
        let result = self.inner.load().await;
        if self.inner.config.auto_sync {
            self.start();
        }
        result
    }

    /// Start the periodic sync loop. Calling it again has no effect.
    pub fn start(&self) {
        if self.inner.loop_started.swap(true, Ordering::AcqRel) {
            return;
        }
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move { inner.run().await });
    }

    /// Stop the background loop. Local state stays readable; edits and syncs
    /// fail with [`ClientError::Disposed`].
    pub fn dispose(&self) {
        self.inner.cancel.cancel();
        self.inner.set_state(AgentState::Disposed);
        info!(document_id = %self.document_id(), "sync agent disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    /// Run one sync attempt now (with retries).
    pub async fn sync_now(&self) -> Result<SyncOutcome> {
        self.inner.sync_once().await
    }

    // ------------------------------------------------------------------
    // Local edits
    // ------------------------------------------------------------------

    /// Current tasks in display order; empty until loaded.
    pub fn tasks(&self) -> Vec<Record> {
        self.inner
            .doc
            .read()
            .as_ref()
            .map(TaskDocument::list_records)
            .unwrap_or_default()
    }

    pub fn task(&self, id: &RecordId) -> Option<Record> {
        self.inner.doc.read().as_ref().and_then(|d| d.get_record(id))
    }

    /// Append a task.
    pub fn add_task(&self, content: impl Into<String>) -> Result<RecordId> {
        self.with_doc(|doc| doc.push_record(content))
    }

    /// Insert a fully specified task at `position`. Returns `None` if its id
    /// is already taken.
    pub fn insert_task(&self, record: NewRecord, position: usize) -> Result<Option<RecordId>> {
        self.with_doc(|doc| doc.insert_with(record, position))
    }

    pub fn update_task(&self, id: &RecordId, patch: &RecordPatch) -> Result<bool> {
        self.with_doc(|doc| doc.update_record(id, patch))
    }

    pub fn delete_task(&self, id: &RecordId) -> Result<bool> {
        self.with_doc(|doc| doc.delete_record(id))
    }

    /// Flip a task's `completed` flag.
    pub fn toggle_task(&self, id: &RecordId) -> Result<bool> {
        self.with_doc(|doc| match doc.get_record(id) {
            Some(record) => doc.update_record(id, &RecordPatch::new().completed(!record.completed)),
            None => false,
        })
    }

    fn with_doc<R>(&self, f: impl FnOnce(&mut TaskDocument) -> R) -> Result<R> {
        if self.is_disposed() {
            return Err(ClientError::Disposed);
        }
        let mut doc = self.inner.doc.write();
        let doc = doc.as_mut().ok_or(ClientError::NotReady)?;
        Ok(f(doc))
    }
}

impl<T: SyncTransport + ?Sized + 'static> Inner<T> {
    fn set_state(&self, state: AgentState) {
        let mut current = self.state.write();
        if *current == state || *current == AgentState::Disposed {
            return;
        }
        *current = state;
        drop(current);
        let _ = self.events.send(AgentEvent::StateChanged(state));
    }

    fn is_loaded(&self) -> bool {
        self.doc.read().is_some()
    }

    fn has_pending_changes(&self) -> bool {
        let server_vector = self.server_vector.lock().clone();
        self.doc
            .read()
            .as_ref()
            .is_some_and(|doc| doc.has_changes_since(&server_vector))
    }

    fn record_error(&self, error: &ClientError) {
        *self.last_error.write() = Some(error.to_string());
        let _ = self.events.send(AgentEvent::SyncFailed(error.to_string()));
    }

    async fn load(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(ClientError::Disposed);
        }
        self.set_state(AgentState::Loading);

        let result = self.fetch().await;
        match &result {
            Ok(()) => {
                *self.last_error.write() = None;
                *self.last_synced_at.write() = Some(Utc::now());
                self.set_state(AgentState::Ready);
                info!(document_id = %self.config.document_id, replica = %self.replica_id, "document loaded");
            }
            Err(e) => {
                warn!(document_id = %self.config.document_id, error = %e, "failed to load document");
                self.record_error(e);
                self.set_state(AgentState::Error);
            }
        }
        result
    }

    async fn fetch(&self) -> Result<()> {
        let full = self.with_retry(|| self.transport.fetch_full_state(&self.config.document_id)).await?;
        let doc = TaskDocument::from_state(self.replica_id.clone(), &full.state)?;
        let vector = StateVector::decode(&full.state_vector)?;

        *self.server_vector.lock() = vector;
        *self.doc.write() = Some(doc);
        Ok(())
    }

    /// Call `op` until it succeeds, fails permanently, or attempts run out.
    async fn with_retry<R, F, Fut>(&self, mut op: F) -> Result<R>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = std::result::Result<R, TransportError>>,
    {
        let policy = &self.config.retry;
        let mut retry = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && retry + 1 < policy.max_attempts => {
                    let delay = policy.delay_for(retry);
                    warn!(
                        document_id = %self.config.document_id,
                        error = %e,
                        retry = retry + 1,
                        delay_ms = delay.as_millis() as u64,
                        "sync request failed, retrying"
                    );
                    tokio::select! {
                        _ = self.cancel.cancelled() => return Err(ClientError::Disposed),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    retry += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn sync_once(&self) -> Result<SyncOutcome> {
        if self.cancel.is_cancelled() {
            return Err(ClientError::Disposed);
        }
        if self.in_flight.swap(true, Ordering::AcqRel) {
            debug!(document_id = %self.config.document_id, "sync already in flight, skipping");
            return Ok(SyncOutcome::Skipped);
        }
        let _in_flight = InFlight(&self.in_flight);

        if !self.is_loaded() {
            return Err(ClientError::NotReady);
        }

        self.set_state(AgentState::Syncing);
        let result = self.exchange().await;
        match &result {
            Ok(_) => {
                *self.last_error.write() = None;
                *self.last_synced_at.write() = Some(Utc::now());
                let _ = self.events.send(AgentEvent::Synced);
            }
            Err(ClientError::Disposed) => {}
            Err(e) => {
                warn!(document_id = %self.config.document_id, error = %e, "sync failed");
                self.record_error(e);
            }
        }
        self.set_state(AgentState::Ready);
        result
    }

    /// One push/pull exchange with the server.
    async fn exchange(&self) -> Result<SyncOutcome> {
        let base = self.server_vector.lock().clone();
        let (vector, update) = {
            let doc = self.doc.read();
            let doc = doc.as_ref().ok_or(ClientError::NotReady)?;
            let update = if doc.has_changes_since(&base) {
                Some(doc.encode_update_since(&base)?)
            } else {
                None
            };
            (doc.encode_state_vector()?, update)
        };
        let pushed = update.is_some();

        let reply = self
            .with_retry(|| {
                self.transport
                    .sync(&self.config.document_id, vector.clone(), update.clone())
            })
            .await;
        let reply = match reply {
            Ok(reply) => reply,
            Err(ClientError::Transport(TransportError::Rejected(msg))) => {
                // The server could not use our delta (e.g. it lost state);
                // push everything on the next attempt.
                *self.server_vector.lock() = StateVector::new();
                return Err(TransportError::Rejected(msg).into());
            }
            Err(e) => return Err(e),
        };

        let server_vector = StateVector::decode(&reply.state_vector)?;
        let pulled = reply.update.is_some();
        if let Some(delta) = &reply.update {
            let summary = {
                let mut doc = self.doc.write();
                let doc = doc.as_mut().ok_or(ClientError::NotReady)?;
                doc.apply_update(delta)?
            };
            if summary.changed() {
                let _ = self.events.send(AgentEvent::RemoteChanges {
                    inserted: summary.inserted,
                    updated: summary.fields_changed,
                    deleted: summary.deleted,
                });
            }
        }
        *self.server_vector.lock() = server_vector;

        debug!(document_id = %self.config.document_id, pushed, pulled, "sync exchange complete");
        Ok(SyncOutcome::Synced { pushed, pulled })
    }

    async fn tick(&self) {
        let result = if self.is_loaded() {
            self.sync_once().await.map(|_| ())
        } else {
            self.load().await
        };
        if let Err(e) = result {
            debug!(document_id = %self.config.document_id, error = %e, "tick did not complete");
        }
    }

    async fn run(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.config.sync_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately; activation already synced.
        interval.tick().await;

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = interval.tick() => self.tick().await,
            }
        }
        debug!(document_id = %self.config.document_id, "sync loop stopped");
    }
}
