//! Container creation records.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;

/// State of a container at the moment the node witnessed its creation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CreationState {
    /// Registration written, physical structure not yet materialized.
    PendingCreate,
    /// Physical structure fully materialized.
    Created,
    /// Being rebuilt from other replicas.
    Recovering,
}

impl fmt::Display for CreationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CreationState::PendingCreate => "PENDING_CREATE",
            CreationState::Created => "CREATED",
            CreationState::Recovering => "RECOVERING",
        };
        f.write_str(s)
    }
}

/// Replication scheme the container was created under.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReplicationHint {
    Standalone,
    Ratis { factor: u8 },
    ErasureCoded { data: u8, parity: u8 },
}

impl ReplicationHint {
    /// Whether replicas of this container carry a replica index.
    pub fn is_erasure_coded(&self) -> bool {
        matches!(self, ReplicationHint::ErasureCoded { .. })
    }
}

impl fmt::Display for ReplicationHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplicationHint::Standalone => write!(f, "STANDALONE"),
            ReplicationHint::Ratis { factor } => write!(f, "RATIS/{}", factor),
            ReplicationHint::ErasureCoded { data, parity } => write!(f, "EC/{}-{}", data, parity),
        }
    }
}

/// What the node recorded when it began creating a container.
///
/// Records are never mutated in place; a state change writes a whole new
/// record (see [`ContainerCreateInfo::with_state`]).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContainerCreateInfo {
    pub state: CreationState,
    pub replication: ReplicationHint,
    /// Position of this replica in an erasure-coded group.
    pub replica_index: Option<u8>,
    /// Milliseconds since the Unix epoch.
    pub created_at: u64,
}

impl ContainerCreateInfo {
    /// Create a record stamped with the current wall-clock time.
    pub fn new(state: CreationState, replication: ReplicationHint) -> Self {
        ContainerCreateInfo {
            state,
            replication,
            replica_index: None,
            created_at: now_millis(),
        }
    }

    /// Shorthand for a record written before the container is materialized.
    pub fn pending(replication: ReplicationHint) -> Self {
        Self::new(CreationState::PendingCreate, replication)
    }

    pub fn with_replica_index(mut self, index: u8) -> Self {
        self.replica_index = Some(index);
        self
    }

    pub fn with_created_at(mut self, created_at: u64) -> Self {
        self.created_at = created_at;
        self
    }

    /// A copy of this record in a new state, keeping everything else.
    pub fn with_state(mut self, state: CreationState) -> Self {
        self.state = state;
        self
    }
}

/// Current time in milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}
