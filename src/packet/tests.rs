//! Tests for tag/time resolution and record assembly.

use std::collections::BTreeMap;

use chrono::TimeZone;
use rstest::{fixture, rstest};
use serde::Serialize;
use serde_json::{Value, json};

use super::*;

#[fixture]
fn encoder() -> PacketEncoder {
    PacketEncoder::new(Some("app".into()), TimeResolution::Seconds, false)
}

#[fixture]
fn acking_encoder() -> PacketEncoder {
    PacketEncoder::new(Some("app".into()), TimeResolution::Seconds, true)
}

fn fixed_date() -> DateTime<Utc> {
    Utc.timestamp_millis_opt(1_700_000_000_987)
        .single()
        .expect("valid date")
}

#[rstest]
#[case(Some("app"), Some("web"), Ok("app.web"))]
#[case(Some("app"), None, Ok("app"))]
#[case(None, Some("web"), Ok("web"))]
#[case(Some(""), Some("web"), Ok("web"))]
#[case(None, None, Err(()))]
#[case(None, Some(""), Err(()))]
fn resolves_tags(
    #[case] prefix: Option<&str>,
    #[case] label: Option<&str>,
    #[case] expected: Result<&str, ()>,
) {
    let encoder = PacketEncoder::new(prefix.map(str::to_owned), TimeResolution::Seconds, false);
    match (encoder.resolve_tag(label), expected) {
        (Ok(tag), Ok(want)) => assert_eq!(tag, want),
        (Err(ForwardError::MissingTag), Err(())) => {}
        (got, want) => panic!("got {got:?}, wanted {want:?}"),
    }
}

#[rstest]
fn passes_integer_and_event_times_through(encoder: PacketEncoder) {
    assert_eq!(
        encoder.resolve_time(Some(Timestamp::Epoch(42))),
        WireTime::Integer(42)
    );
    let time = EventTime::new(1_700_000_000, 1);
    assert_eq!(
        encoder.resolve_time(Some(time.into())),
        WireTime::Event(time)
    );
}

#[rstest]
#[case(TimeResolution::Seconds, 1_700_000_000)]
#[case(TimeResolution::Milliseconds, 1_700_000_000_987)]
fn truncates_dates_to_resolution(#[case] resolution: TimeResolution, #[case] expected: i64) {
    let encoder = PacketEncoder::new(Some("app".into()), resolution, false);
    assert_eq!(
        encoder.resolve_time(Some(fixed_date().into())),
        WireTime::Integer(expected)
    );
}

#[rstest]
fn defaults_to_current_time(encoder: PacketEncoder) {
    let before = Utc::now().timestamp();
    let WireTime::Integer(now) = encoder.resolve_time(None) else {
        panic!("default time must be an integer");
    };
    assert!(now >= before && now <= Utc::now().timestamp());
}

#[rstest]
fn encodes_three_element_record(encoder: PacketEncoder) {
    let packet = encoder
        .encode(Some("web"), &json!({"status": 200}), Some(Timestamp::Epoch(7)))
        .expect("encode record");
    assert_eq!(packet.tag, "app.web");
    assert!(packet.options.chunk.is_none());

    let (tag, time, data): (String, i64, Value) =
        rmp_serde::from_slice(&packet.bytes).expect("decode record");
    assert_eq!(tag, "app.web");
    assert_eq!(time, 7);
    assert_eq!(data, json!({"status": 200}));
}

#[rstest]
fn appends_chunk_option_when_acking(acking_encoder: PacketEncoder) {
    let packet = acking_encoder
        .encode(None, &json!({"k": "v"}), Some(Timestamp::Epoch(1)))
        .expect("encode record");
    let chunk = packet.options.chunk.clone().expect("chunk generated");

    let (_, _, _, options): (String, i64, Value, BTreeMap<String, String>) =
        rmp_serde::from_slice(&packet.bytes).expect("decode record");
    assert_eq!(options.get("chunk"), Some(&chunk));
}

#[rstest]
fn carries_event_time_extension(encoder: PacketEncoder) {
    let time = EventTime::new(1_700_000_000, 123_456_789);
    let packet = encoder
        .encode(Some("web"), &json!({}), Some(time.into()))
        .expect("encode record");
    let (_, decoded, _): (String, EventTime, Value) =
        rmp_serde::from_slice(&packet.bytes).expect("decode record");
    assert_eq!(decoded, time);
}

#[rstest]
fn structs_encode_as_maps(encoder: PacketEncoder) {
    #[derive(Serialize)]
    struct Access {
        path: &'static str,
        bytes: u32,
    }

    let packet = encoder
        .encode(None, &Access { path: "/", bytes: 12 }, Some(Timestamp::Epoch(0)))
        .expect("encode struct payload");
    let (_, _, data): (String, i64, Value) =
        rmp_serde::from_slice(&packet.bytes).expect("decode record");
    assert_eq!(data, json!({"path": "/", "bytes": 12}));
}

#[rstest]
#[case(json!("text"), "string")]
#[case(json!(12), "integer")]
#[case(json!(1.5), "float")]
#[case(json!(true), "boolean")]
#[case(json!(null), "null")]
fn rejects_primitive_payloads(encoder: PacketEncoder, #[case] data: Value, #[case] kind: &str) {
    let err = encoder
        .encode(Some("web"), &data, None)
        .expect_err("primitive payload must be rejected");
    assert!(matches!(err, ForwardError::DataType { found } if found == kind));
}

#[rstest]
fn accepts_array_payloads(encoder: PacketEncoder) {
    assert!(encoder.encode(Some("web"), &json!([1, 2]), None).is_ok());
}

#[rstest]
fn missing_tag_keeps_callback_for_dispatch() {
    let encoder = PacketEncoder::default();
    let result = encoder.make_packet_item(None, &json!({}), None, Some(Box::new(|_| {})));
    let Err((err, callback)) = result else {
        panic!("record without a tag must be rejected");
    };
    assert!(matches!(err, ForwardError::MissingTag));
    assert!(callback.is_some());
}

#[rstest]
fn chunk_ids_are_unique_base64() {
    let first = generate_chunk_id();
    let second = generate_chunk_id();
    assert_ne!(first, second);
    let raw = BASE64_STANDARD.decode(&first).expect("valid base64");
    assert_eq!(raw.len(), CHUNK_ID_LEN);
}
