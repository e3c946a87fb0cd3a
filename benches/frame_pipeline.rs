use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use packets::catalog::Mode;
use quarry::connection::FramePipeline;
use std::hint::black_box;

fn round_trip(pipeline: &mut FramePipeline, mode: Mode, body: &[u8]) {
    let frame = pipeline.encode_frame(mode, body);
    pipeline.feed(&frame);
    let decoded = pipeline.try_read_frame(mode).unwrap().unwrap();
    black_box(decoded);
}

fn criterion_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_pipeline");

    for size in [32usize, 512, 8192] {
        let body = vec![0x42u8; size];

        group.bench_function(BenchmarkId::new("uncompressed", size), |b| {
            let mut pipeline = FramePipeline::new(21, 32);
            b.iter(|| round_trip(&mut pipeline, Mode::Play, &body))
        });

        group.bench_function(BenchmarkId::new("compressed", size), |b| {
            let mut pipeline = FramePipeline::new(21, 32);
            pipeline.set_compression(Some(64));
            b.iter(|| round_trip(&mut pipeline, Mode::Play, &body))
        });
    }
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
