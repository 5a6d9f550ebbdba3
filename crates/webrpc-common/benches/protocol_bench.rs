// Criterion benchmarks for the webrpc-common protocol layer
//
// Run benchmarks with:
//   cargo bench -p webrpc-common

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use serde_json::json;
use uuid::Uuid;
use webrpc_common::{
    ErrorRegistry, Message, ParsedRef, RefDescriptor, RequestMessage, ResponseMessage, WireError,
};

fn bench_message_framing(c: &mut Criterion) {
    let mut group = c.benchmark_group("message_framing");

    let small = Message::Request(RequestMessage::new(
        RefDescriptor::well_known("org.webrpc.session").to_value(),
        "getLocalService",
        vec![json!("calc")],
    ));
    let data: Vec<String> = (0..100).map(|i| format!("item_{}", i)).collect();
    let large = Message::Request(RequestMessage::new(
        RefDescriptor::well_known("org.webrpc.session").to_value(),
        "bulk",
        vec![json!({ "data": data })],
    ));

    group.bench_function("encode_small", |b| {
        b.iter(|| black_box(&small).to_frame());
    });

    group.bench_function("encode_large", |b| {
        b.iter(|| black_box(&large).to_frame());
    });

    let small_frame = small.to_frame().unwrap();
    let large_frame = large.to_frame().unwrap();

    group.bench_function("decode_small", |b| {
        b.iter(|| Message::from_frame(black_box(&small_frame)));
    });

    group.bench_function("decode_large", |b| {
        b.iter(|| Message::from_frame(black_box(&large_frame)));
    });

    group.finish();
}

fn bench_descriptor_detection(c: &mut Criterion) {
    let mut group = c.benchmark_group("descriptor_detection");

    let descriptor = RefDescriptor::local("object-1", Uuid::new_v4()).to_value();
    let plain = json!({"name": "object-1", "value": 42});

    group.bench_function("detect_descriptor", |b| {
        b.iter(|| match RefDescriptor::from_value(black_box(&descriptor)) {
            Some(ParsedRef::Ref(parsed)) => parsed,
            _ => unreachable!(),
        });
    });

    group.bench_function("reject_plain_object", |b| {
        b.iter(|| RefDescriptor::from_value(black_box(&plain)));
    });

    group.finish();
}

fn bench_response_framing(c: &mut Criterion) {
    let mut group = c.benchmark_group("response_framing");

    let success = Message::Response(ResponseMessage::success(Uuid::new_v4(), json!(5)));
    let failure = Message::Response(ResponseMessage::error(
        Uuid::new_v4(),
        WireError::type_error("bad argument").to_value(true),
    ));

    group.bench_function("encode_success", |b| {
        b.iter(|| black_box(&success).to_frame());
    });

    group.bench_function("encode_error", |b| {
        b.iter(|| black_box(&failure).to_frame());
    });

    group.finish();
}

fn bench_error_translation(c: &mut Criterion) {
    let mut group = c.benchmark_group("error_translation");

    let registry = ErrorRegistry::new();
    let masked = WireError::type_error("bad argument")
        .with_stack("TypeError: bad argument\n    at service (service.rs:10)");

    group.bench_function("serialize_masked", |b| {
        b.iter(|| black_box(&masked).to_value(true));
    });

    let wire_value = masked.to_value(true);
    group.bench_function("deserialize_standard_kind", |b| {
        b.iter(|| registry.deserialize(black_box(&wire_value)));
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_message_framing,
    bench_descriptor_detection,
    bench_response_framing,
    bench_error_translation,
);
criterion_main!(benches);
