//! Two collaborators on one shared list, entirely in process.

use anyhow::Context;
use std::sync::Arc;
use tasksync_client::{AgentConfigBuilder, SyncAgent};
use tasksync_core::{NewRecord, Record, RecordPatch, SyncTransport};
use tasksync_server::{
    DocumentCache, LocalTransport, MemoryCatalog, MemoryStore, PlainRecord, SyncHandler,
};

const LIST: &str = "list-1";

fn print_list(who: &str, tasks: &[Record]) {
    println!("  {}:", who);
    for task in tasks {
        let mark = if task.completed { "x" } else { " " };
        println!("    [{}] {}", mark, task.content);
    }
}

fn agent<T: SyncTransport + 'static>(transport: T, device: &str) -> SyncAgent<T> {
    SyncAgent::new(
        Arc::new(transport),
        AgentConfigBuilder::new(LIST)
            .auto_sync(false)
            .replica_id(device)
            .build(),
    )
}

pub async fn run() -> anyhow::Result<()> {
    println!("\n=== Shared list demo ===\n");

    let catalog = Arc::new(MemoryCatalog::new());
    catalog.add_collection(
        LIST,
        "alice",
        vec![PlainRecord::new("Buy milk"), PlainRecord::new("Call Bob")],
    );
    catalog.share(LIST, "bob");
    let cache = Arc::new(DocumentCache::new(Arc::new(MemoryStore::new()), catalog.clone()));
    let server = Arc::new(SyncHandler::new(catalog, cache));

    let alice = agent(LocalTransport::new(server.clone(), "alice"), "alice-phone");
    let bob = agent(LocalTransport::new(server.clone(), "bob"), "bob-laptop");
    alice.activate().await?;
    bob.activate().await?;

    println!("Both devices loaded the list:");
    print_list("alice", &alice.tasks());

    println!("\nOffline edits on both sides:");
    let milk = alice
        .tasks()
        .first()
        .map(|t| t.id.clone())
        .context("seeded list is empty")?;
    alice.toggle_task(&milk)?;
    alice.add_task("Pay rent")?;
    bob.update_task(&milk, &RecordPatch::new().content("Buy oat milk"))?;
    bob.insert_task(NewRecord::new("Book dentist"), 0)?;
    print_list("alice", &alice.tasks());
    print_list("bob", &bob.tasks());

    println!("\nSyncing alice, bob, alice:");
    for (who, outcome) in [
        ("alice", alice.sync_now().await?),
        ("bob", bob.sync_now().await?),
        ("alice", alice.sync_now().await?),
    ] {
        println!("  {} -> {:?}", who, outcome);
    }

    print_list("alice", &alice.tasks());
    print_list("bob", &bob.tasks());
    anyhow::ensure!(alice.tasks() == bob.tasks(), "replicas diverged");
    println!("\n✓ Converged on {} tasks", alice.tasks().len());
    Ok(())
}
