//! Error types for record encoding.

use thiserror::Error;

/// Errors raised when registry bytes do not match the expected record layout.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Invalid key length: expected {expected} bytes, found {found}")]
    InvalidKeyLength { expected: usize, found: usize },

    #[error("Empty record value")]
    EmptyValue,

    #[error("Unsupported record version: {0}")]
    UnsupportedVersion(u8),

    #[error("Malformed record body (version {version}): {reason}")]
    MalformedBody { version: u8, reason: String },
}

pub type Result<T> = std::result::Result<T, CodecError>;
