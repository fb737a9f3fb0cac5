//! Codec benchmarks for deskrelay-protocol.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use deskrelay_protocol::{codec, DeviceInfo, DeviceMetadata, Event, MessageRecord};

fn bench_decode_chat(c: &mut Criterion) {
    let frame = format!(
        r#"{{"type":"chat_message","message":"{}"}}"#,
        "x".repeat(64)
    );

    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Bytes(frame.len() as u64));
    group.bench_function("chat_64B", |b| b.iter(|| codec::decode(black_box(&frame))));
    group.finish();
}

fn bench_encode_incoming(c: &mut Criterion) {
    let event = Event::incoming(MessageRecord::from_admin("IT", "alice@host1", "x".repeat(64)));

    let mut group = c.benchmark_group("encode");
    group.bench_function("incoming_64B", |b| b.iter(|| codec::encode(black_box(&event))));
    group.finish();
}

fn bench_encode_roster(c: &mut Criterion) {
    let clients = (0..100)
        .map(|i| {
            DeviceInfo::online(
                format!("user{i}@host{i}"),
                DeviceMetadata {
                    hostname: format!("host{i}"),
                    username: format!("user{i}"),
                    platform: "linux".into(),
                },
            )
        })
        .collect();
    let event = Event::client_list(clients);

    c.bench_function("encode_roster_100", |b| {
        b.iter(|| codec::encode(black_box(&event)).unwrap())
    });
}

criterion_group!(
    benches,
    bench_decode_chat,
    bench_encode_incoming,
    bench_encode_roster
);
criterion_main!(benches);
