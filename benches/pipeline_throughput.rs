//! Benchmarks for the pipeline hot paths: channel throughput and the
//! host-side smoothing filter.
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use mediflow_rs::data::{DataObject, DynamicData, ImageDescriptor};
use mediflow_rs::device::DeviceManager;
use mediflow_rs::pipeline::{NodeHandle, StreamingMode};
use mediflow_rs::types::DataType;
use std::sync::Arc;

fn make_frame(size: u32) -> Arc<DataObject> {
    let device = DeviceManager::instance().host_device();
    let descriptor = ImageDescriptor::two_d(size, size, 1, DataType::Float);
    let mut bytes = vec![0u8; descriptor.len_bytes()];
    for i in 0..descriptor.num_elements() {
        DataType::Float.write(&mut bytes, i, (i % 255) as f64);
    }
    DataObject::image_with_data(descriptor, &device, bytes).expect("bench image")
}

fn bench_channel_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("channel_throughput");
    let frame = make_frame(8);

    for &count in &[16usize, 256] {
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(
            BenchmarkId::new("lossless_publish_drain", count),
            &count,
            |b, &count| {
                b.iter(|| {
                    let data = DynamicData::new(StreamingMode::ProcessAllFrames, count, count);
                    let consumer = data.register_consumer().unwrap();
                    for _ in 0..count {
                        data.add_frame(frame.clone()).unwrap();
                    }
                    for _ in 0..count {
                        black_box(data.next_frame(consumer).unwrap());
                    }
                });
            },
        );
    }
    group.finish();
}

fn bench_host_smoothing(c: &mut Criterion) {
    use mediflow_rs::algorithms::GaussianSmoothing;

    let mut group = c.benchmark_group("host_smoothing");
    let host = DeviceManager::instance().host_device();

    for &size in &[16u32, 64] {
        group.throughput(Throughput::Elements((size as u64) * (size as u64)));
        group.bench_with_input(BenchmarkId::new("gaussian_5x5", size), &size, |b, &size| {
            b.iter(|| {
                let filter = GaussianSmoothing::new();
                {
                    let mut guard = filter.lock().unwrap();
                    guard.set_device(host.clone());
                    guard.set_mask_size(5).unwrap();
                }
                filter.set_input_data(0, make_frame(size)).unwrap();
                let port = filter.output_port(0).unwrap();
                filter.update(0, StreamingMode::ProcessAllFrames).unwrap();
                black_box(port.next_frame().unwrap());
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_channel_throughput, bench_host_smoothing);
criterion_main!(benches);
