//! Performance benchmarks for the TLV8 and access-code codecs.
//!
//! Run benchmarks with:
//! ```sh
//! cargo bench --bench tlv8_bench
//! ```

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use lockbridge_protocol::access_code::{
    AccessCodeOperation, AccessCodeRecord, AccessCodeRequest, AccessCodeResponse,
};
use lockbridge_protocol::tlv8;
use std::hint::black_box;

/// Build a list response with `count` passcodes.
fn list_response(count: usize) -> AccessCodeResponse {
    let records = (0..count)
        .map(|slot| Some(AccessCodeRecord::new(slot as u8, format!("{:06}", slot * 7))))
        .collect();
    AccessCodeResponse::new(AccessCodeOperation::List, records)
}

/// Benchmark encoding list responses of growing size.
fn bench_encode_list(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode_list");

    for count in [1usize, 10, 100, 250] {
        let response = list_response(count);
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &response, |b, r| {
            b.iter(|| black_box(r.encode()));
        });
    }

    group.finish();
}

/// Benchmark decoding list responses of growing size.
fn bench_decode_list(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode_list");

    for count in [1usize, 10, 100, 250] {
        let bytes = list_response(count).encode();
        group.throughput(Throughput::Bytes(bytes.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &bytes, |b, bytes| {
            b.iter(|| black_box(AccessCodeResponse::decode(black_box(bytes)).unwrap()));
        });
    }

    group.finish();
}

/// Benchmark decoding a base64 add command, the hot path of the control point.
fn bench_decode_command(c: &mut Criterion) {
    let encoded = AccessCodeRequest::add("246810").to_base64();

    c.bench_function("decode_add_command", |b| {
        b.iter(|| black_box(AccessCodeRequest::from_base64(black_box(&encoded)).unwrap()));
    });
}

/// Benchmark fragmenting and joining a long value.
fn bench_fragmented_value(c: &mut Criterion) {
    let value = vec![0xA5u8; 4096];
    let bytes = tlv8::Tlv8Writer::new().put(0x02, &value).finish();

    c.bench_function("decode_fragmented_4k", |b| {
        b.iter(|| black_box(tlv8::decode(black_box(&bytes)).unwrap()));
    });
}

criterion_group!(
    benches,
    bench_encode_list,
    bench_decode_list,
    bench_decode_command,
    bench_fragmented_value
);
criterion_main!(benches);
