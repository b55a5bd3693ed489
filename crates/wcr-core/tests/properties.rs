//! Property-based tests for the record codec
//!
//! These tests verify:
//!  - Round trip: decode(encode(id, info)) == (id, info)
//!  - Key order: byte order of encoded keys equals numeric id order
//!  - Corruption is always surfaced, never coerced

use proptest::prelude::*;
use wcr_core::{
    CodecError, ContainerCreateInfo, ContainerId, CreationState, RecordCodec, ReplicationHint,
};

fn state_strategy() -> impl Strategy<Value = CreationState> {
    prop_oneof![
        Just(CreationState::PendingCreate),
        Just(CreationState::Created),
        Just(CreationState::Recovering),
    ]
}

fn replication_strategy() -> impl Strategy<Value = ReplicationHint> {
    prop_oneof![
        Just(ReplicationHint::Standalone),
        (1u8..=5).prop_map(|factor| ReplicationHint::Ratis { factor }),
        (1u8..=12, 1u8..=4).prop_map(|(data, parity)| ReplicationHint::ErasureCoded { data, parity }),
    ]
}

fn info_strategy() -> impl Strategy<Value = ContainerCreateInfo> {
    (
        state_strategy(),
        replication_strategy(),
        proptest::option::of(any::<u8>()),
        any::<u64>(),
    )
        .prop_map(|(state, replication, replica_index, created_at)| ContainerCreateInfo {
            state,
            replication,
            replica_index,
            created_at,
        })
}

proptest! {
    #[test]
    fn record_roundtrip(id in any::<u64>(), info in info_strategy()) {
        let id = ContainerId::new(id);
        let record = RecordCodec::encode(id, &info);
        prop_assert_eq!(RecordCodec::decode(&record.key, &record.value), Ok((id, info)));
    }

    #[test]
    fn key_order_is_numeric(a in any::<u64>(), b in any::<u64>()) {
        let ka = RecordCodec::encode_key(ContainerId::new(a));
        let kb = RecordCodec::encode_key(ContainerId::new(b));
        prop_assert_eq!(a.cmp(&b), ka.cmp(&kb));
    }

    #[test]
    fn unknown_version_tags_are_rejected(
        tag in prop_oneof![Just(0u8), 3u8..=255],
        info in info_strategy(),
    ) {
        let mut value = RecordCodec::encode_value(&info);
        value[0] = tag;
        prop_assert_eq!(RecordCodec::decode_value(&value), Err(CodecError::UnsupportedVersion(tag)));
    }

    #[test]
    fn wrong_key_width_is_rejected(key in prop::collection::vec(any::<u8>(), 0..16)) {
        prop_assume!(key.len() != 8);
        let is_invalid_length = matches!(
            RecordCodec::decode_key(&key),
            Err(CodecError::InvalidKeyLength { .. })
        );
        prop_assert!(is_invalid_length);
    }
}
