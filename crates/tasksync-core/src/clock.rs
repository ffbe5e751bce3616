//! Logical clocks and operation stamps.
//!
//! Every operation a replica produces is tagged with a [`Stamp`]:
//! - `seq`: contiguous per-replica sequence number, the unit tracked by
//!   state vectors
//! - `lamport`: Lamport time, one more than the highest time the replica
//!   had seen when it produced the operation
//!
//! Stamps are totally ordered by `(lamport, replica, seq)`. That order is the
//! last-writer-wins rule for every field and for sibling placement.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Largest Lamport time or sequence number a replica accepts from a peer.
///
/// Local operations only ever add one to a merged clock, so keeping merged
/// values at or below this bound leaves local increments far from overflow.
pub const MAX_CLOCK: u64 = u64::MAX / 2;

/// Identifier of one replica (a client device or a server process).
pub type ReplicaId = String;

/// Unique, totally ordered tag of a single operation.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Stamp {
    /// Lamport time of the operation.
    pub lamport: u64,
    /// Replica that produced the operation.
    pub replica: ReplicaId,
    /// Position of the operation in that replica's sequence (starts at 1).
    pub seq: u64,
}

impl Stamp {
    pub fn new(lamport: u64, replica: impl Into<ReplicaId>, seq: u64) -> Self {
        Self {
            lamport,
            replica: replica.into(),
            seq,
        }
    }

    /// The stamp that every real operation beats.
    pub fn zero() -> Self {
        Self {
            lamport: 0,
            replica: ReplicaId::new(),
            seq: 0,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.seq == 0
    }
}

impl Default for Stamp {
    fn default() -> Self {
        Self::zero()
    }
}

impl std::fmt::Display for Stamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}@{}", self.replica, self.seq, self.lamport)
    }
}

/// Wall-clock time in unix milliseconds.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
