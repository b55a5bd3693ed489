//! # wcr-core
//!
//! Core types for the Cairn witnessed container registry.
//!
//! This crate provides:
//! - `ContainerId`: the registry key, ordered numerically
//! - `ContainerCreateInfo`: what a node recorded when it began creating a container
//! - `RecordCodec`: versioned byte encoding of registry records
//!
//! ## Example
//!
//! ```rust
//! use wcr_core::{ContainerCreateInfo, ContainerId, CreationState, RecordCodec, ReplicationHint};
//!
//! let id = ContainerId::new(42);
//! let info = ContainerCreateInfo::new(CreationState::PendingCreate, ReplicationHint::Ratis { factor: 3 })
//!     .with_created_at(1_700_000_000_000);
//!
//! let record = RecordCodec::encode(id, &info);
//! let (decoded_id, decoded_info) = RecordCodec::decode(&record.key, &record.value).unwrap();
//!
//! assert_eq!(decoded_id, id);
//! assert_eq!(decoded_info, info);
//! ```

pub mod codec;
pub mod error;
pub mod id;
pub mod info;

pub use codec::{EncodedRecord, RecordCodec, CURRENT_RECORD_VERSION, KEY_LEN};
pub use error::{CodecError, Result};
pub use id::ContainerId;
pub use info::{ContainerCreateInfo, CreationState, ReplicationHint};
