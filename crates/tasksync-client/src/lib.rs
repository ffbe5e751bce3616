//! # tasksync-client
//!
//! Offline-first client for tasksync task lists.
//!
//! A [`SyncAgent`] keeps a local replica of one list. Edits are applied
//! locally and immediately; a background loop exchanges deltas with the
//! server through any [`SyncTransport`](tasksync_core::SyncTransport), for
//! example [`HttpTransport`].
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tasksync_client::{AgentConfigBuilder, HttpTransport, SyncAgent};
//!
//! let transport = Arc::new(HttpTransport::new("http://127.0.0.1:8080", "alice")?);
//! let agent = SyncAgent::new(transport, AgentConfigBuilder::new("list-1").build());
//! agent.activate().await?;
//! agent.add_task("Pay rent")?;
//! ```

pub mod agent;
pub mod config;
pub mod error;
pub mod http;

pub use agent::{AgentEvent, AgentState, AgentStatus, SyncAgent, SyncOutcome};
pub use config::{AgentConfig, AgentConfigBuilder, RetryPolicy};
pub use error::{ClientError, Result};
pub use http::HttpTransport;
