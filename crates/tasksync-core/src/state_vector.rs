//! State vector for compact causal context representation.
//!
//! A state vector summarizes which operations a replica has incorporated by
//! tracking the highest sequence number seen from each replica. Sync uses it
//! to compute the minimal delta another replica is missing.

use crate::clock::Stamp;
use crate::codec::{self, DecodeError, EncodeError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A state vector tracking the frontier of seen operations per replica.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateVector {
    /// Map from replica ID to highest seen sequence number.
    entries: BTreeMap<String, u64>,
}

impl StateVector {
    /// Create an empty state vector.
    pub fn new() -> Self {
        StateVector {
            entries: BTreeMap::new(),
        }
    }

    /// Create a state vector from entries.
    pub fn from_entries(entries: impl IntoIterator<Item = (String, u64)>) -> Self {
        let mut vector = StateVector::new();
        for (replica_id, seq) in entries {
            vector.observe(replica_id, seq);
        }
        vector
    }

    /// Get the sequence number for a replica.
    pub fn get(&self, replica_id: &str) -> u64 {
        self.entries.get(replica_id).copied().unwrap_or(0)
    }

    /// Raise the entry for a replica to at least `seq`.
    pub fn observe(&mut self, replica_id: impl Into<String>, seq: u64) {
        if seq == 0 {
            return;
        }
        let entry = self.entries.entry(replica_id.into()).or_insert(0);
        *entry = (*entry).max(seq);
    }

    /// Increment the sequence number for a replica, returning the new value.
    pub fn increment(&mut self, replica_id: impl Into<String>) -> u64 {
        let entry = self.entries.entry(replica_id.into()).or_insert(0);
        *entry += 1;
        *entry
    }

    /// True if the operation tagged `stamp` is already incorporated.
    pub fn covers(&self, stamp: &Stamp) -> bool {
        self.get(&stamp.replica) >= stamp.seq
    }

    /// Returns true if for all replicas, self[r] >= other[r].
    pub fn dominates(&self, other: &StateVector) -> bool {
        other
            .entries
            .iter()
            .all(|(replica_id, &seq)| self.get(replica_id) >= seq)
    }

    /// Merge with another state vector (component-wise max).
    pub fn merge(&mut self, other: &StateVector) {
        for (replica_id, &seq) in &other.entries {
            self.observe(replica_id.clone(), seq);
        }
    }

    /// Iterate over all entries.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &u64)> {
        self.entries.iter()
    }

    /// Get the number of replicas tracked.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        codec::encode(self)
    }

    /// Decode a vector; an empty payload is the empty vector.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.is_empty() {
            return Ok(StateVector::new());
        }
        let vector: StateVector = codec::decode(bytes)?;
        if vector.entries.values().any(|&seq| seq == 0) {
            return Err(DecodeError::Malformed(
                "state vector contains a zero entry".to_string(),
            ));
        }
        Ok(vector)
    }
}
