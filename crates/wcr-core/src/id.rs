//! Container identifiers.

use crate::error::{CodecError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Length in bytes of an encoded container id.
pub const KEY_LEN: usize = 8;

/// A cluster-unique container identifier.
///
/// Ids are assigned once and never reused. Ordering is numeric, and the
/// big-endian key encoding keeps that order under byte-wise comparison.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContainerId(u64);

impl ContainerId {
    /// Create an id from its numeric value.
    pub const fn new(id: u64) -> Self {
        ContainerId(id)
    }

    /// Get the numeric value.
    pub const fn get(&self) -> u64 {
        self.0
    }

    /// Encode as a fixed-width registry key.
    pub fn to_key(&self) -> [u8; KEY_LEN] {
        self.0.to_be_bytes()
    }

    /// Decode a registry key.
    pub fn from_key(bytes: &[u8]) -> Result<Self> {
        let raw: [u8; KEY_LEN] = bytes.try_into().map_err(|_| CodecError::InvalidKeyLength {
            expected: KEY_LEN,
            found: bytes.len(),
        })?;
        Ok(ContainerId(u64::from_be_bytes(raw)))
    }
}

impl From<u64> for ContainerId {
    fn from(id: u64) -> Self {
        ContainerId(id)
    }
}

impl From<ContainerId> for u64 {
    fn from(id: ContainerId) -> Self {
        id.0
    }
}

impl FromStr for ContainerId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        s.trim_start_matches('#').parse::<u64>().map(ContainerId)
    }
}

impl fmt::Debug for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContainerId({})", self.0)
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}
