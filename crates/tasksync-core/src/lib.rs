//! # tasksync-core
//!
//! Replicated task-list document and its binary delta codec.
//!
//! This crate provides:
//! - [`TaskDocument`]: an ordered list of records that replicas edit
//!   independently and merge without coordination
//! - [`StateVector`]: the per-replica frontier used to compute deltas
//! - the update wire format and its validation
//! - sync protocol DTOs and the [`SyncTransport`] seam shared by server and
//!   client
//!
//! ## Example
//!
//! ```rust
//! use tasksync_core::{RecordPatch, TaskDocument};
//!
//! let mut alice = TaskDocument::new("alice");
//! let milk = alice.push_record("Buy milk");
//!
//! let mut bob = TaskDocument::from_state("bob", &alice.encode_full_state().unwrap()).unwrap();
//! bob.update_record(&milk, &RecordPatch::new().completed(true));
//!
//! let delta = bob.encode_update_since(alice.state_vector()).unwrap();
//! alice.apply_update(&delta).unwrap();
//! assert!(alice.get_record(&milk).unwrap().completed);
//! ```

pub mod clock;
pub mod codec;
pub mod document;
pub mod lwwreg;
pub mod protocol;
pub mod record;
pub mod state_vector;
pub mod update;

pub use clock::{ReplicaId, Stamp, MAX_CLOCK};
pub use codec::{DecodeError, EncodeError};
pub use document::{ApplySummary, TaskDocument};
pub use lwwreg::LwwRegister;
pub use protocol::{
    FullState, FullStateResponse, SyncReply, SyncRequest, SyncResponse, SyncTransport,
    TransportError,
};
pub use record::{FieldPatch, MetaValue, NewRecord, Record, RecordId, RecordPatch};
pub use state_vector::StateVector;
pub use update::Update;
