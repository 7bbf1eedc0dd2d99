//! Property-based tests for record encoding.
//!
//! Records produced by `PacketEncoder` are decoded with the same reader the
//! fake collector uses, checking that tags, times and payloads survive intact.

use std::collections::{BTreeMap, HashSet};

use base64::{Engine, engine::general_purpose::STANDARD};
use fluent_forward::{
    EventTime, PacketEncoder, TimeResolution, Timestamp, WireTime, generate_chunk_id,
    test_utils::collector::read_record,
};
use proptest::prelude::*;

fn encoder(prefix: Option<&str>, require_ack: bool) -> PacketEncoder {
    PacketEncoder::new(prefix.map(str::to_owned), TimeResolution::Seconds, require_ack)
}

proptest! {
    #[test]
    fn event_times_survive_encoding(seconds in any::<u32>(), nanoseconds in 0u32..1_000_000_000) {
        let time = EventTime::new(seconds, nanoseconds);
        let packet = encoder(Some("app"), false)
            .encode(Some("t"), &BTreeMap::from([("k", 1)]), Some(time.into()))
            .expect("encode record");

        let decoded = read_record(&mut packet.bytes.as_slice()).expect("decode record");
        prop_assert_eq!(decoded.time, WireTime::Event(time));
    }

    #[test]
    fn tags_join_prefix_and_label(
        prefix in "[a-z][a-z0-9_]{0,8}",
        label in "[a-z][a-z0-9_.]{0,12}",
    ) {
        let packet = encoder(Some(&prefix), false)
            .encode(Some(&label), &Vec::<u8>::new(), Some(Timestamp::Epoch(0)))
            .expect("encode record");
        let decoded = read_record(&mut packet.bytes.as_slice()).expect("decode record");
        prop_assert_eq!(decoded.tag, format!("{prefix}.{label}"));
    }

    #[test]
    fn payload_maps_are_carried_verbatim(
        fields in proptest::collection::btree_map("[a-z]{1,6}", any::<i64>(), 0..8),
        epoch in any::<i64>(),
        require_ack in any::<bool>(),
    ) {
        let packet = encoder(Some("app"), require_ack)
            .encode(None, &fields, Some(Timestamp::Epoch(epoch)))
            .expect("encode record");
        let decoded = read_record(&mut packet.bytes.as_slice()).expect("decode record");

        prop_assert_eq!(decoded.time, WireTime::Integer(epoch));
        prop_assert_eq!(decoded.chunk.is_some(), require_ack);
        prop_assert_eq!(decoded.chunk, packet.options.chunk);
        let expected = serde_json::to_value(&fields).expect("fields to json");
        prop_assert_eq!(decoded.record, expected);
    }
}

#[test]
fn chunk_ids_are_unique_sixteen_byte_values() {
    let ids: HashSet<String> = (0..256).map(|_| generate_chunk_id()).collect();
    assert_eq!(ids.len(), 256);
    for id in &ids {
        let raw = STANDARD.decode(id).expect("chunk id is base64");
        assert_eq!(raw.len(), 16);
    }
}
