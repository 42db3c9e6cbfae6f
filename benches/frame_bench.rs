// Benchmark for frame codec and chart rendering
// Run with: cargo bench

use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;
use tmeter::chart;
use tmeter::result_set::ResultSetBuilder;
use tmeter_shared::protocol::{self, ControllerToHost};
use tmeter_shared::{FrameAccumulator, SampleRecord, SweepRequest};

fn sample_stream(count: u16) -> Vec<u8> {
    let mut bytes = Vec::new();
    for index in 0..count {
        let record = ControllerToHost::Sample(SampleRecord {
            index,
            stimulus: -(index as f32) * 0.01,
            response: 8.0 - index as f32 * 0.008,
        });
        bytes.extend(protocol::encode_message(&record).unwrap());
    }
    bytes
}

fn bench_frame_decode(c: &mut Criterion) {
    let bytes = sample_stream(1000);
    c.bench_function("decode 1000 sample frames", |b| {
        b.iter(|| {
            let mut acc = FrameAccumulator::new();
            let mut count = 0;
            for &byte in black_box(&bytes) {
                if let Some(Ok(payload)) = acc.push(byte) {
                    let _: ControllerToHost = protocol::decode_message(&payload).unwrap();
                    count += 1;
                }
            }
            assert_eq!(count, 1000);
        });
    });
}

fn bench_frame_encode(c: &mut Criterion) {
    c.bench_function("encode 1000 sample frames", |b| {
        b.iter(|| black_box(sample_stream(1000)));
    });
}

fn bench_chart_svg(c: &mut Criterion) {
    let request = SweepRequest { start: 0.0, stop: -3.0, steps: 301, settle_us: 0 };
    let mut builder = ResultSetBuilder::new(request);
    for index in 0..request.steps {
        let vg = request.stimulus_at(index);
        let id = if vg > -2.0 { 8.0 * (1.0 + vg / 2.0).powi(2) } else { 0.0 };
        builder.push(SampleRecord { index, stimulus: vg, response: id }).unwrap();
    }
    let results = builder.finish(request.steps).unwrap();
    c.bench_function("render chart svg (301 samples)", |b| {
        b.iter(|| chart::render_svg(black_box(&results), None, 800, 600).unwrap());
    });
}

criterion_group!(benches, bench_frame_decode, bench_frame_encode, bench_chart_svg);
criterion_main!(benches);
