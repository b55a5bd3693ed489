//! Error types for the storage engine layer.

use thiserror::Error;

/// Errors reported by a [`KvEngine`](crate::KvEngine).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("Store unavailable at {path}: {reason}")]
    Unavailable { path: String, reason: String },

    #[error("Engine is closed")]
    Closed,

    #[error("Storage error: {0}")]
    Storage(String),
}

impl From<redb::Error> for EngineError {
    fn from(err: redb::Error) -> Self {
        EngineError::Storage(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
