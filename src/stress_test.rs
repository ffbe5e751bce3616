use anyhow::{ensure, Context};
use async_stream::stream;
use futures::stream::Stream;
use futures::stream::StreamExt;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tasksync_client::{AgentConfigBuilder, ClientError, RetryPolicy, SyncAgent};
use tasksync_core::{NewRecord, RecordPatch};
use tasksync_server::{
    DocumentCache, LocalTransport, MemoryCatalog, MemoryStore, PlainRecord, SyncHandler,
};

const STRESS_LIST: &str = "stress-list";

type Agent = SyncAgent<LocalTransport>;

/// Statistics collected during stress testing
#[derive(Clone, Debug)]
pub struct StressTestStats {
    pub num_clients: usize,
    pub operations_per_client: usize,
    pub total_syncs: usize,
    pub total_time: Duration,
    pub avg_sync_time: Duration,
    pub ops_per_second: f64,
    pub final_tasks: usize,
}

impl StressTestStats {
    pub fn print(&self) {
        println!("\n╔════════════════════════════════════════════════════════════╗");
        println!("║              Stress Test Statistics                         ║");
        println!("╠════════════════════════════════════════════════════════════╣");
        println!("║  Number of Clients:         {:>38} ║", self.num_clients);
        println!("║  Operations per Client:     {:>38} ║", self.operations_per_client);
        println!("║  Total Sync Operations:     {:>38} ║", self.total_syncs);
        println!("║  Tasks After Convergence:   {:>38} ║", self.final_tasks);
        println!("║  Total Time:                {:>39}s ║", format!("{:.3}", self.total_time.as_secs_f64()));
        println!("║  Average Sync Time:         {:>36}µs ║", format!("{:.2}", self.avg_sync_time.as_micros()));
        println!("║  Operations/Second:         {:>38.0} ║", self.ops_per_second);
        println!("╚════════════════════════════════════════════════════════════╝");
    }
}

/// One in-process server with a single shared list and `num_clients` members.
fn shared_server(num_clients: usize) -> Arc<SyncHandler> {
    let store = Arc::new(MemoryStore::new());
    let catalog = Arc::new(MemoryCatalog::new());
    catalog.add_collection(
        STRESS_LIST,
        "client-0",
        vec![PlainRecord::new("seed task")],
    );
    for idx in 1..num_clients {
        catalog.share(STRESS_LIST, format!("client-{}", idx));
    }
    let cache = Arc::new(DocumentCache::new(store, catalog.clone()));
    Arc::new(SyncHandler::new(catalog, cache).with_update_log(false))
}

fn client(server: &Arc<SyncHandler>, idx: usize) -> Arc<Agent> {
    let config = AgentConfigBuilder::new(STRESS_LIST)
        .auto_sync(false)
        .retry(RetryPolicy::none())
        .replica_id(format!("stress-{}", idx))
        .build();
    let transport = LocalTransport::new(server.clone(), format!("client-{}", idx));
    Arc::new(SyncAgent::new(Arc::new(transport), config))
}

/// Generator that yields client indices for the sync schedule
fn client_sync_generator(num_clients: usize, num_syncs: usize) -> impl Stream<Item = usize> {
    stream! {
        let mut rng = StdRng::from_entropy();
        for _ in 0..num_syncs {
            yield rng.gen_range(0..num_clients);
        }
    }
}

/// One random edit: mostly inserts, otherwise a toggle, rename, reorder or delete.
fn random_edit(agent: &Agent, rng: &mut StdRng, idx: usize, i: usize) -> Result<(), ClientError> {
    let tasks = agent.tasks();
    if tasks.is_empty() || rng.gen_bool(0.4) {
        let position = rng.gen_range(0..=tasks.len());
        let record = NewRecord::new(format!("task_{}_{}", idx, i));
        agent.insert_task(record, position)?;
        return Ok(());
    }

    let target = &tasks[rng.gen_range(0..tasks.len())].id;
    match rng.gen_range(0..4) {
        0 => agent.toggle_task(target)?,
        1 => agent.update_task(target, &RecordPatch::new().content(format!("edit_{}_{}", idx, i)))?,
        2 => agent.update_task(target, &RecordPatch::new().order(rng.gen_range(-50..50)))?,
        _ => agent.delete_task(target)?,
    };
    Ok(())
}

async fn timed_sync(agent: &Agent, sync_times: &mut Vec<Duration>) -> Result<(), ClientError> {
    let sync_start = Instant::now();
    agent.sync_now().await?;
    sync_times.push(sync_start.elapsed());
    Ok(())
}

/// Concurrent clients editing one shared list through an in-process server.
///
/// Phase 1 runs every client's edits in parallel with occasional syncs,
/// phase 2 replays a random sync schedule, and phase 3 settles all clients
/// and checks that they hold identical lists.
pub async fn stress_test_shared_list(
    num_clients: usize,
    ops_per_client: usize,
    num_syncs: usize,
) -> anyhow::Result<StressTestStats> {
    ensure!(num_clients > 0, "at least one client is required");

    println!("\n╔════════════════════════════════════════════════════════════╗");
    println!("║        Shared List Stress Test (Async)                     ║");
    println!("║  Clients: {} | Ops/Client: {} | Syncs: {} ║",
             num_clients, ops_per_client, num_syncs);
    println!("╚════════════════════════════════════════════════════════════╝");

    let start = Instant::now();

    let server = shared_server(num_clients);
    let mut clients: Vec<Arc<Agent>> = Vec::with_capacity(num_clients);
    for idx in 0..num_clients {
        let agent = client(&server, idx);
        agent
            .activate()
            .await
            .with_context(|| format!("activating client {}", idx))?;
        clients.push(agent);
    }

    println!("\n[Phase 1/3] Editing concurrently...");

    let mut handles = vec![];
    for (idx, agent) in clients.iter().enumerate() {
        let agent = Arc::clone(agent);
        let handle = tokio::spawn(async move {
            let mut rng = StdRng::from_entropy();
            let mut sync_times = vec![];
            for i in 0..ops_per_client {
                random_edit(&agent, &mut rng, idx, i)?;

                if rng.gen_bool(0.05) {
                    timed_sync(&agent, &mut sync_times).await?;
                }
                if i % 100 == 0 {
                    tokio::task::yield_now().await;
                }
            }
            Ok::<_, ClientError>(sync_times)
        });
        handles.push(handle);
    }

    let mut sync_times = vec![];
    for handle in handles {
        sync_times.extend(handle.await??);
    }

    println!("[Phase 1/3] ✓ Completed");
    println!("[Phase 2/3] Replaying random sync schedule...");

    let mut sync_gen = Box::pin(client_sync_generator(num_clients, num_syncs));
    let mut scheduled = 0;
    while let Some(idx) = sync_gen.next().await {
        timed_sync(&clients[idx], &mut sync_times).await?;
        scheduled += 1;
        if scheduled % 100 == 0 {
            println!("  Syncs completed: {}/{}", scheduled, num_syncs);
        }
    }

    println!("[Phase 2/3] ✓ Completed");
    println!("[Phase 3/3] Settling and checking convergence...");

    // First round pushes everything, second round pulls it back out.
    for _ in 0..2 {
        for agent in &clients {
            timed_sync(agent, &mut sync_times).await?;
        }
    }

    let expected = clients[0].tasks();
    for (idx, agent) in clients.iter().enumerate().skip(1) {
        ensure!(
            agent.tasks() == expected,
            "client {} diverged from client 0",
            idx
        );
    }
    let server_tasks = server
        .cache()
        .get_or_load(STRESS_LIST)
        .await?
        .list_records();
    ensure!(server_tasks == expected, "server diverged from clients");

    let total_time = start.elapsed();

    let avg_sync_time = if !sync_times.is_empty() {
        sync_times.iter().sum::<Duration>() / sync_times.len() as u32
    } else {
        Duration::ZERO
    };

    let total_syncs = sync_times.len();
    let total_operations = (num_clients * ops_per_client) + total_syncs;
    let ops_per_second = total_operations as f64 / total_time.as_secs_f64();

    println!("[Phase 3/3] ✓ Completed");

    Ok(StressTestStats {
        num_clients,
        operations_per_client: ops_per_client,
        total_syncs,
        total_time,
        avg_sync_time,
        ops_per_second,
        final_tasks: expected.len(),
    })
}

/// Repeat the shared list test at growing client counts
pub async fn stress_test_scaling(max_clients: usize, step_size: usize) -> anyhow::Result<()> {
    ensure!(step_size > 0, "step size must be positive");

    println!("\n╔════════════════════════════════════════════════════════════╗");
    println!("║      Scaling Analysis - Sync Performance vs Clients       ║");
    println!("╚════════════════════════════════════════════════════════════╝");

    let mut current_clients = step_size;
    while current_clients <= max_clients {
        let stats = stress_test_shared_list(current_clients, 50, current_clients * 20).await?;
        stats.print();
        current_clients += step_size;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_small_run_converges() {
        let stats = stress_test_shared_list(3, 40, 30).await.unwrap();
        assert_eq!(stats.num_clients, 3);
        assert!(stats.total_syncs >= 30 + 6);
    }
}
