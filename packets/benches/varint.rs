use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use packets::varint::{decode_varint, decode_varlong, encode_varint, encode_varlong};
use std::hint::black_box;

fn criterion_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("varint");

    for value in [0i32, 127, 128, 16384, 2097151, i32::MAX] {
        group.bench_function(BenchmarkId::new("encode_varint", value), |b| {
            let mut out = Vec::with_capacity(5);
            b.iter(|| {
                out.clear();
                encode_varint(black_box(value), &mut out);
            })
        });

        let mut encoded = Vec::new();
        encode_varint(value, &mut encoded);
        group.bench_function(BenchmarkId::new("decode_varint", value), |b| {
            b.iter(|| decode_varint(black_box(&encoded)).unwrap())
        });
    }

    for value in [0i64, 127, 128, 16384, i64::MAX] {
        group.bench_function(BenchmarkId::new("encode_varlong", value), |b| {
            let mut out = Vec::with_capacity(10);
            b.iter(|| {
                out.clear();
                encode_varlong(black_box(value), &mut out);
            })
        });

        let mut encoded = Vec::new();
        encode_varlong(value, &mut encoded);
        group.bench_function(BenchmarkId::new("decode_varlong", value), |b| {
            b.iter(|| decode_varlong(black_box(&encoded)).unwrap())
        });
    }
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
