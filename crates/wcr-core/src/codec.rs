//! Versioned byte encoding of registry records.
//!
//! A record is stored as a fixed-width key and a tagged value:
//!
//! ```text
//! key   = container id, 8 bytes big-endian
//! value = [version tag: u8] ++ JSON body for that version
//! ```
//!
//! Every encoder writes [`CURRENT_RECORD_VERSION`]. Older layouts are still
//! decoded so that a store written by an earlier release keeps working; any
//! other tag is rejected.

use crate::error::{CodecError, Result};
use crate::id::ContainerId;
use crate::info::{ContainerCreateInfo, CreationState, ReplicationHint};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

pub use crate::id::KEY_LEN;

/// Version tag written by [`RecordCodec::encode`].
pub const CURRENT_RECORD_VERSION: u8 = 2;

/// First layout: no replica index.
#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct RecordV1 {
    state: CreationState,
    replication: ReplicationHint,
    created_at: u64,
}

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct RecordV2 {
    state: CreationState,
    replication: ReplicationHint,
    replica_index: Option<u8>,
    created_at: u64,
}

/// Every value layout the codec understands.
enum StoredRecord {
    V1(RecordV1),
    V2(RecordV2),
}

impl StoredRecord {
    fn parse(bytes: &[u8]) -> Result<Self> {
        let (&tag, body) = bytes.split_first().ok_or(CodecError::EmptyValue)?;
        match tag {
            1 => Ok(StoredRecord::V1(parse_body(tag, body)?)),
            2 => Ok(StoredRecord::V2(parse_body(tag, body)?)),
            other => Err(CodecError::UnsupportedVersion(other)),
        }
    }

    fn into_info(self) -> ContainerCreateInfo {
        match self {
            StoredRecord::V1(r) => ContainerCreateInfo {
                state: r.state,
                replication: r.replication,
                replica_index: None,
                created_at: r.created_at,
            },
            StoredRecord::V2(r) => ContainerCreateInfo {
                state: r.state,
                replication: r.replication,
                replica_index: r.replica_index,
                created_at: r.created_at,
            },
        }
    }
}

fn parse_body<T: DeserializeOwned>(version: u8, body: &[u8]) -> Result<T> {
    serde_json::from_slice(body).map_err(|e| CodecError::MalformedBody {
        version,
        reason: e.to_string(),
    })
}

/// A record ready to hand to the storage engine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncodedRecord {
    pub key: [u8; KEY_LEN],
    pub value: Vec<u8>,
}

/// Encoder/decoder for `ContainerId -> ContainerCreateInfo` records.
pub struct RecordCodec;

impl RecordCodec {
    /// Encode an id and its create info.
    pub fn encode(id: ContainerId, info: &ContainerCreateInfo) -> EncodedRecord {
        EncodedRecord {
            key: Self::encode_key(id),
            value: Self::encode_value(info),
        }
    }

    /// Decode a key/value pair read back from the engine.
    pub fn decode(key: &[u8], value: &[u8]) -> Result<(ContainerId, ContainerCreateInfo)> {
        Ok((Self::decode_key(key)?, Self::decode_value(value)?))
    }

    pub fn encode_key(id: ContainerId) -> [u8; KEY_LEN] {
        id.to_key()
    }

    pub fn decode_key(key: &[u8]) -> Result<ContainerId> {
        ContainerId::from_key(key)
    }

    /// Encode a value in the current layout.
    pub fn encode_value(info: &ContainerCreateInfo) -> Vec<u8> {
        let body = RecordV2 {
            state: info.state,
            replication: info.replication,
            replica_index: info.replica_index,
            created_at: info.created_at,
        };
        let mut value = vec![CURRENT_RECORD_VERSION];
        // Plain structs and enums with string keys always serialize.
        serde_json::to_writer(&mut value, &body).expect("record body serializes to JSON");
        value
    }

    pub fn decode_value(value: &[u8]) -> Result<ContainerCreateInfo> {
        StoredRecord::parse(value).map(StoredRecord::into_info)
    }

    /// Encode a value in the first layout. Kept for compatibility tests.
    #[doc(hidden)]
    pub fn encode_value_v1(info: &ContainerCreateInfo) -> Vec<u8> {
        let body = RecordV1 {
            state: info.state,
            replication: info.replication,
            created_at: info.created_at,
        };
        let mut value = vec![1];
        serde_json::to_writer(&mut value, &body).expect("record body serializes to JSON");
        value
    }
}
