//! Benchmarks for record encoding.

use std::collections::BTreeMap;

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use fluent_forward::{EventTime, PacketEncoder, TimeResolution, Timestamp, generate_chunk_id};
use serde::Serialize;

#[derive(Serialize)]
struct Access<'a> {
    method: &'a str,
    path: &'a str,
    status: u16,
    bytes: u64,
    elapsed_ms: f64,
}

fn sample() -> Access<'static> {
    Access {
        method: "GET",
        path: "/api/v1/items?page=3",
        status: 200,
        bytes: 18_432,
        elapsed_ms: 12.5,
    }
}

fn packet_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("packet");
    let plain = PacketEncoder::new(Some("app".into()), TimeResolution::Seconds, false);
    let acked = PacketEncoder::new(Some("app".into()), TimeResolution::Seconds, true);
    let event = sample();
    let time = Timestamp::Event(EventTime::new(1_700_000_000, 123_456_789));

    group.bench_function("encode_struct_epoch", |b| {
        b.iter(|| {
            plain
                .encode(Some("access"), black_box(&event), Some(Timestamp::Epoch(1_700_000_000)))
                .map(|p| p.bytes.len())
        });
    });

    group.bench_function("encode_struct_event_time", |b| {
        b.iter(|| {
            plain
                .encode(Some("access"), black_box(&event), Some(time))
                .map(|p| p.bytes.len())
        });
    });

    group.bench_function("encode_struct_with_chunk", |b| {
        b.iter(|| {
            acked
                .encode(Some("access"), black_box(&event), None)
                .map(|p| p.bytes.len())
        });
    });

    let wide: BTreeMap<String, String> = (0..64)
        .map(|i| (format!("field_{i}"), "x".repeat(32)))
        .collect();
    group.bench_function("encode_wide_map", |b| {
        b.iter(|| {
            plain
                .encode(Some("wide"), black_box(&wide), None)
                .map(|p| p.bytes.len())
        });
    });

    group.bench_function("generate_chunk_id", |b| b.iter(generate_chunk_id));
    group.finish();
}

criterion_group!(benches, packet_benchmarks);
criterion_main!(benches);
