//! Last-Write-Wins (LWW) Register
//!
//! The register always retains the value written by the highest [`Stamp`].
//! Stamps order by Lamport time first and replica id second, so concurrent
//! writes to the same field resolve identically on every replica, whatever
//! order they arrive in.

use crate::clock::Stamp;
use serde::{Deserialize, Serialize};

/// A Last-Write-Wins register holding one record field or metadata entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LwwRegister<T> {
    value: T,
    stamp: Stamp,
}

impl<T: Clone + PartialEq> LwwRegister<T> {
    /// Create a register that already holds `value` written at `stamp`.
    pub fn new(value: T, stamp: Stamp) -> Self {
        Self { value, stamp }
    }

    /// Write `value` if `stamp` beats the current one.
    ///
    /// Returns true when the register changed.
    pub fn set(&mut self, value: T, stamp: Stamp) -> bool {
        if stamp > self.stamp {
            self.value = value;
            self.stamp = stamp;
            true
        } else {
            false
        }
    }

    pub fn get(&self) -> &T {
        &self.value
    }

    /// Stamp of the write currently held.
    pub fn stamp(&self) -> &Stamp {
        &self.stamp
    }

    /// True until the first real write lands.
    pub fn is_unset(&self) -> bool {
        self.stamp.is_zero()
    }
}

/// An unset register: the default value under the zero stamp, which every
/// real write beats.
impl<T: Clone + PartialEq + Default> Default for LwwRegister<T> {
    fn default() -> Self {
        Self {
            value: T::default(),
            stamp: Stamp::zero(),
        }
    }
}
