use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use stress_test::{stress_test_scaling, stress_test_shared_list};
use tasksync_server::{
    serve, DocumentCache, HeaderAuthenticator, MemoryCatalog, ServerConfigBuilder, SqliteStore,
    SyncHandler,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod demo;
pub mod stress_test;

#[derive(Parser)]
#[command(name = "tasksync")]
#[command(about = "Offline-first collaborative task lists")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the sync server over HTTP
    Serve {
        #[arg(long, default_value = "127.0.0.1:8080")]
        addr: SocketAddr,
        /// SQLite database holding snapshots and the update log
        #[arg(long, default_value = "tasksync.db")]
        db: PathBuf,
        /// JSON file with collections, members and their plain records
        #[arg(long)]
        catalog: PathBuf,
        /// Skip appending accepted updates to the audit log
        #[arg(long)]
        no_update_log: bool,
    },
    /// Two in-process collaborators edit offline, sync and converge
    Demo,
    /// Concurrent clients hammering one shared list
    Stress {
        #[arg(long, default_value_t = 8)]
        clients: usize,
        #[arg(long, default_value_t = 200)]
        ops: usize,
        #[arg(long, default_value_t = 500)]
        syncs: usize,
        /// Repeat at 2, 4, ... up to `clients`
        #[arg(long)]
        scaling: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match Cli::parse().command {
        Commands::Serve {
            addr,
            db,
            catalog,
            no_update_log,
        } => {
            let store = Arc::new(SqliteStore::open(&db)?);
            let catalog = Arc::new(MemoryCatalog::load(&catalog)?);
            info!(collections = catalog.len(), db = %db.display(), "catalog loaded");

            let config = ServerConfigBuilder::new()
                .bind_addr(addr)
                .log_updates(!no_update_log)
                .build();
            let cache = Arc::new(DocumentCache::new(store, catalog.clone()));
            let handler =
                Arc::new(SyncHandler::new(catalog, cache).with_update_log(config.log_updates));
            let auth = Arc::new(HeaderAuthenticator::new(config.principal_header.clone()));
            serve(handler, auth, config).await?;
        }
        Commands::Demo => demo::run().await?,
        Commands::Stress {
            clients,
            ops,
            syncs,
            scaling,
        } => {
            if scaling {
                stress_test_scaling(clients, 2).await?;
            } else {
                stress_test_shared_list(clients, ops, syncs).await?.print();
            }
            println!("\n✓ Stress test completed successfully!");
        }
    }
    Ok(())
}
