//! Error types for the registry layer.

use thiserror::Error;
use wcr_core::{CodecError, ContainerId};
use wcr_kv::EngineError;

use crate::directory::DirectoryError;

/// Errors that can occur in registry, reconciliation and lifecycle operations.
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Corrupt record (key {key:02x?}): {source}")]
    CorruptRecord {
        key: Vec<u8>,
        #[source]
        source: CodecError,
    },

    #[error("Container {id} failed integrity check: {reason}")]
    Integrity { id: ContainerId, reason: String },

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Directory(#[from] DirectoryError),

    #[error("Container {0} is already registered")]
    AlreadyRegistered(ContainerId),

    #[error("Container {0} is not registered")]
    NotRegistered(ContainerId),

    #[error("Container {0} still has a physical structure on the volume")]
    StillMaterialized(ContainerId),

    #[error("Reconciliation failed: {0}")]
    ReconciliationFailed(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl RegistryError {
    /// Wrap a decode failure together with the raw key it was read under.
    pub fn corrupt(key: &[u8], source: CodecError) -> Self {
        RegistryError::CorruptRecord {
            key: key.to_vec(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, RegistryError>;
