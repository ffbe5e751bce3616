//! # tasksync-server
//!
//! Server side of tasksync: keeps task documents in memory, persists every
//! accepted change, and answers full-state and delta-sync requests.
//!
//! - [`store`] / [`sqlite`] - durable snapshots and the update audit log
//! - [`catalog`] - access control and the plain records used for seeding
//! - [`cache`] - per-document critical sections over live documents
//! - [`handler`] - the sync protocol itself
//! - [`http`] - axum routes for the protocol
//! - [`local`] - an in-process transport for clients in the same process

pub mod cache;
pub mod catalog;
pub mod config;
pub mod error;
pub mod handler;
pub mod http;
pub mod local;
#[cfg(feature = "sqlite")]
pub mod sqlite;
pub mod store;

pub use cache::{DocumentCache, DocumentLease};
pub use catalog::{AccessGate, CollectionEntry, MemoryCatalog, PlainRecord, RecordSource};
pub use config::{ServerConfig, ServerConfigBuilder};
pub use error::{CatalogError, Result, StoreError, SyncError};
pub use handler::SyncHandler;
pub use http::{router, serve, Authenticator, HeaderAuthenticator};
pub use local::LocalTransport;
#[cfg(feature = "sqlite")]
pub use sqlite::{SqliteConfig, SqliteStore};
pub use store::{DocumentStore, MemoryStore, StoredSnapshot, UpdateLogEntry};
