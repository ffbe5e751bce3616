//! End-to-end agent tests against an in-process server.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tasksync_client::{
    AgentConfigBuilder, AgentEvent, AgentState, ClientError, RetryPolicy, SyncAgent, SyncOutcome,
};
use tasksync_core::{FullState, RecordPatch, SyncReply, SyncTransport, TransportError};
use tasksync_server::{
    DocumentCache, LocalTransport, MemoryCatalog, MemoryStore, PlainRecord, SyncHandler,
};

fn server() -> Arc<SyncHandler> {
    let store = Arc::new(MemoryStore::new());
    let catalog = Arc::new(MemoryCatalog::new());
    catalog.add_collection(
        "list-1",
        "alice",
        vec![PlainRecord::new("Buy milk"), PlainRecord::new("Call Bob")],
    );
    catalog.share("list-1", "bob");
    let cache = Arc::new(DocumentCache::new(store, catalog.clone()));
    Arc::new(SyncHandler::new(catalog, cache))
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        max_attempts: 4,
    }
}

fn manual_agent<T: SyncTransport + 'static>(transport: Arc<T>) -> SyncAgent<T> {
    SyncAgent::new(
        transport,
        AgentConfigBuilder::new("list-1")
            .auto_sync(false)
            .retry(fast_retry())
            .build(),
    )
}

fn contents<T: SyncTransport + 'static>(agent: &SyncAgent<T>) -> Vec<String> {
    agent.tasks().into_iter().map(|t| t.content).collect()
}

/// Fails the first `failures` sync calls with a network error, optionally
/// delaying every call.
struct FlakyTransport {
    inner: LocalTransport,
    failures: AtomicUsize,
    delay: Duration,
    sync_calls: AtomicUsize,
}

impl FlakyTransport {
    fn new(inner: LocalTransport, failures: usize, delay: Duration) -> Self {
        Self {
            inner,
            failures: AtomicUsize::new(failures),
            delay,
            sync_calls: AtomicUsize::new(0),
        }
    }

    fn take_failure(&self) -> bool {
        self.failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl SyncTransport for FlakyTransport {
    async fn fetch_full_state(&self, document_id: &str) -> Result<FullState, TransportError> {
        if self.take_failure() {
            return Err(TransportError::Network("connection reset".into()));
        }
        self.inner.fetch_full_state(document_id).await
    }

    async fn sync(
        &self,
        document_id: &str,
        state_vector: Vec<u8>,
        update: Option<Vec<u8>>,
    ) -> Result<SyncReply, TransportError> {
        self.sync_calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        if self.take_failure() {
            return Err(TransportError::Network("connection reset".into()));
        }
        self.inner.sync(document_id, state_vector, update).await
    }
}

#[tokio::test]
async fn test_shared_list_scenario() {
    let server = server();
    let alice = manual_agent(Arc::new(LocalTransport::new(server.clone(), "alice")));
    let bob = manual_agent(Arc::new(LocalTransport::new(server.clone(), "bob")));

    alice.activate().await.unwrap();
    bob.activate().await.unwrap();
    assert_eq!(contents(&alice), vec!["Buy milk", "Call Bob"]);

    alice.add_task("Pay rent").unwrap();
    assert_eq!(
        alice.sync_now().await.unwrap(),
        SyncOutcome::Synced { pushed: true, pulled: false }
    );
    assert!(!alice.status().has_pending_changes);

    assert_eq!(
        bob.sync_now().await.unwrap(),
        SyncOutcome::Synced { pushed: false, pulled: true }
    );
    assert_eq!(contents(&bob), vec!["Buy milk", "Call Bob", "Pay rent"]);
}

#[tokio::test]
async fn test_concurrent_edits_converge() {
    let server = server();
    let alice = manual_agent(Arc::new(LocalTransport::new(server.clone(), "alice")));
    let bob = manual_agent(Arc::new(LocalTransport::new(server.clone(), "bob")));
    alice.activate().await.unwrap();
    bob.activate().await.unwrap();

    let milk = alice.tasks()[0].id.clone();
    alice.toggle_task(&milk).unwrap();
    bob.update_task(&milk, &RecordPatch::new().content("Buy oat milk")).unwrap();
    bob.add_task("Book dentist").unwrap();

    alice.sync_now().await.unwrap();
    bob.sync_now().await.unwrap();
    alice.sync_now().await.unwrap();

    assert_eq!(alice.tasks(), bob.tasks());
    let milk = alice.task(&milk).unwrap();
    assert!(milk.completed);
    assert_eq!(milk.content, "Buy oat milk");
}

#[tokio::test]
async fn test_non_member_gets_no_state() {
    let server = server();
    let mallory = manual_agent(Arc::new(LocalTransport::new(server, "mallory")));

    let err = mallory.activate().await.unwrap_err();
    assert_eq!(err, ClientError::Transport(TransportError::AccessDenied));
    assert_eq!(mallory.state(), AgentState::Error);
    assert!(mallory.tasks().is_empty());
}

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let server = server();
    let transport = Arc::new(FlakyTransport::new(
        LocalTransport::new(server, "alice"),
        0,
        Duration::ZERO,
    ));
    let agent = manual_agent(transport.clone());
    agent.activate().await.unwrap();

    agent.add_task("Pay rent").unwrap();
    transport.failures.store(2, Ordering::SeqCst);
    let outcome = agent.sync_now().await.unwrap();

    assert_eq!(outcome, SyncOutcome::Synced { pushed: true, pulled: false });
    assert_eq!(transport.sync_calls.load(Ordering::SeqCst), 3);
    assert!(agent.status().last_error.is_none());
}

#[tokio::test]
async fn test_exhausted_retries_keep_local_edits() {
    let server = server();
    let transport = Arc::new(FlakyTransport::new(
        LocalTransport::new(server, "alice"),
        0,
        Duration::ZERO,
    ));
    let agent = manual_agent(transport.clone());
    agent.activate().await.unwrap();
    let mut events = agent.subscribe();

    agent.add_task("Pay rent").unwrap();
    transport.failures.store(100, Ordering::SeqCst);
    assert!(agent.sync_now().await.is_err());

    assert_eq!(contents(&agent), vec!["Buy milk", "Call Bob", "Pay rent"]);
    let status = agent.status();
    assert_eq!(status.state, AgentState::Ready);
    assert!(status.last_error.is_some());
    assert!(status.has_pending_changes);

    let mut saw_failure = false;
    while let Ok(event) = events.try_recv() {
        saw_failure |= matches!(event, AgentEvent::SyncFailed(_));
    }
    assert!(saw_failure);

    // Once the network recovers the edit goes through.
    transport.failures.store(0, Ordering::SeqCst);
    agent.sync_now().await.unwrap();
    assert!(!agent.status().has_pending_changes);
}

#[tokio::test]
async fn test_overlapping_sync_is_skipped() {
    let server = server();
    let transport = Arc::new(FlakyTransport::new(
        LocalTransport::new(server, "alice"),
        0,
        Duration::from_millis(100),
    ));
    let agent = manual_agent(transport.clone());
    agent.activate().await.unwrap();

    let (first, second) = tokio::join!(agent.sync_now(), async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        agent.sync_now().await
    });

    assert!(matches!(first.unwrap(), SyncOutcome::Synced { .. }));
    assert_eq!(second.unwrap(), SyncOutcome::Skipped);
    assert_eq!(transport.sync_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_background_loop_propagates_edits() {
    let server = server();
    let config = |principal: &str| {
        AgentConfigBuilder::new("list-1")
            .sync_interval(Duration::from_millis(20))
            .retry(fast_retry())
            .replica_id(format!("{}-device", principal))
            .build()
    };
    let alice = SyncAgent::new(Arc::new(LocalTransport::new(server.clone(), "alice")), config("alice"));
    let bob = SyncAgent::new(Arc::new(LocalTransport::new(server.clone(), "bob")), config("bob"));
    alice.activate().await.unwrap();
    bob.activate().await.unwrap();

    alice.add_task("Pay rent").unwrap();

    let seen = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if bob.tasks().iter().any(|t| t.content == "Pay rent") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(seen.is_ok());
    assert!(bob.status().last_synced_at.is_some());

    alice.dispose();
    bob.dispose();
    assert!(alice.is_disposed());
}

#[tokio::test]
async fn test_failed_activation_recovers_on_tick() {
    let server = server();
    let transport = Arc::new(FlakyTransport::new(
        LocalTransport::new(server, "alice"),
        1,
        Duration::ZERO,
    ));
    let agent = SyncAgent::new(
        transport,
        AgentConfigBuilder::new("list-1")
            .sync_interval(Duration::from_millis(20))
            .retry(RetryPolicy::none())
            .build(),
    );

    assert!(agent.activate().await.is_err());
    assert_eq!(agent.state(), AgentState::Error);

    let ready = tokio::time::timeout(Duration::from_secs(5), async {
        while agent.tasks().is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(ready.is_ok());
    assert_eq!(contents(&agent), vec!["Buy milk", "Call Bob"]);
    agent.dispose();
}
