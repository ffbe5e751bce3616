//! Update payloads exchanged between replicas.
//!
//! An [`Update`] is a state-based delta: every piece of document state the
//! receiver is not known to have, expressed as stamped operations, plus the
//! sender's state vector and highest Lamport time. A full state is simply
//! the update computed against the empty vector.
//!
//! Operations inside an update are sorted by stamp, so two replicas holding
//! equal state always produce byte-identical payloads.

use crate::clock::Stamp;
use crate::codec::{self, DecodeError, EncodeError};
use crate::record::{FieldPatch, MetaValue, RecordId};
use crate::state_vector::StateVector;
use serde::{Deserialize, Serialize};

/// Current update format version.
pub const FORMAT_VERSION: u8 = 1;

/// Creates a record and fixes its position after `origin`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsertOp {
    pub id: RecordId,
    /// Record this one was inserted after; `None` means the list head.
    pub origin: Option<RecordId>,
    pub stamp: Stamp,
    pub created_at: u64,
}

/// Writes one field of a record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetOp {
    pub record: RecordId,
    pub stamp: Stamp,
    pub patch: FieldPatch,
}

/// Tombstones a record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteOp {
    pub record: RecordId,
    pub stamp: Stamp,
}

/// Writes one metadata entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaOp {
    pub key: String,
    pub stamp: Stamp,
    pub value: MetaValue,
}

/// A binary delta between two document states.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Update {
    pub version: u8,
    /// Vector the delta was computed against; the receiver must already
    /// cover it. Empty for a full state.
    pub base: StateVector,
    /// Everything the sender had incorporated when it produced the update.
    pub vector: StateVector,
    /// Highest Lamport time the sender had seen.
    pub lamport: u64,
    pub inserts: Vec<InsertOp>,
    pub sets: Vec<SetOp>,
    pub deletes: Vec<DeleteOp>,
    pub meta: Vec<MetaOp>,
}

impl Update {
    pub fn new(vector: StateVector, lamport: u64) -> Self {
        Self {
            version: FORMAT_VERSION,
            base: StateVector::new(),
            vector,
            lamport,
            inserts: Vec::new(),
            sets: Vec::new(),
            deletes: Vec::new(),
            meta: Vec::new(),
        }
    }

    /// True if the update carries no operations (it may still advance a
    /// receiver's vector).
    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty()
            && self.sets.is_empty()
            && self.deletes.is_empty()
            && self.meta.is_empty()
    }

    /// Stamps of every operation in the update.
    pub fn stamps(&self) -> impl Iterator<Item = &Stamp> {
        self.inserts
            .iter()
            .map(|op| &op.stamp)
            .chain(self.sets.iter().map(|op| &op.stamp))
            .chain(self.deletes.iter().map(|op| &op.stamp))
            .chain(self.meta.iter().map(|op| &op.stamp))
    }

    /// Put operations into canonical order.
    pub(crate) fn canonicalize(&mut self) {
        self.inserts
            .sort_by(|a, b| a.stamp.cmp(&b.stamp).then_with(|| a.id.cmp(&b.id)));
        self.sets
            .sort_by(|a, b| a.stamp.cmp(&b.stamp).then_with(|| a.record.cmp(&b.record)));
        self.deletes
            .sort_by(|a, b| a.stamp.cmp(&b.stamp).then_with(|| a.record.cmp(&b.record)));
        self.meta
            .sort_by(|a, b| a.stamp.cmp(&b.stamp).then_with(|| a.key.cmp(&b.key)));
    }

    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        codec::encode(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let update: Update = codec::decode(bytes)?;
        if update.version != FORMAT_VERSION {
            return Err(DecodeError::UnsupportedVersion(update.version));
        }
        Ok(update)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_update() {
        let update = Update::new(StateVector::new(), 0);
        assert!(update.is_empty());
    }

    #[test]
    fn test_canonical_order_is_by_stamp() {
        let mut update = Update::new(StateVector::new(), 3);
        update.sets.push(SetOp {
            record: RecordId::from("b"),
            stamp: Stamp::new(3, "r1", 3),
            patch: FieldPatch::Completed(true),
        });
        update.sets.push(SetOp {
            record: RecordId::from("a"),
            stamp: Stamp::new(2, "r1", 2),
            patch: FieldPatch::Content("x".to_string()),
        });
        update.canonicalize();
        assert_eq!(update.sets[0].record, RecordId::from("a"));
    }

    #[test]
    fn test_rejects_unknown_version() {
        let mut update = Update::new(StateVector::new(), 0);
        update.version = 9;
        let bytes = update.encode().unwrap();
        assert_eq!(
            Update::decode(&bytes),
            Err(DecodeError::UnsupportedVersion(9))
        );
    }
}
