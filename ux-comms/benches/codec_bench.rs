//! Benchmarks for framing and frame extraction
//!
//! Compares CRC throughput, encoding, and receive-side scanning with and
//! without leading noise.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use ux_comms::buffer::ReceiveBuffer;
use ux_comms::codec::{self, crc16};

const SIZES: [usize; 4] = [16, 512, 8_192, 65_535];

fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 256) as u8).collect()
}

fn bench_crc16(c: &mut Criterion) {
    let mut group = c.benchmark_group("crc16");
    for size in SIZES {
        let data = payload(size);
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_function(BenchmarkId::from_parameter(size), |b| {
            b.iter(|| black_box(crc16(black_box(&data))))
        });
    }
    group.finish();
}

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode");
    for size in SIZES {
        let data = payload(size);
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_function(BenchmarkId::from_parameter(size), |b| {
            b.iter(|| black_box(codec::encode(black_box(&data)).unwrap()))
        });
    }
    group.finish();
}

fn bench_extract(c: &mut Criterion) {
    let mut group = c.benchmark_group("extract");

    // 64 back-to-back frames, as after a burst of reads
    let mut burst = Vec::new();
    for i in 0..64 {
        burst.extend(codec::encode(&payload(100 + i)).unwrap());
    }
    group.throughput(Throughput::Bytes(burst.len() as u64));
    group.bench_function(BenchmarkId::new("clean", "64_frames"), |b| {
        b.iter(|| {
            let mut rx = ReceiveBuffer::new(burst.len(), 4_096, burst.len() * 2);
            rx.append(&burst).unwrap();
            let mut count = 0;
            while let Some(frame) = rx.take_frame() {
                count += frame.len();
            }
            black_box(count)
        })
    });

    // Same frames behind a block of line noise
    let mut noisy = vec![0x55u8; 4_096];
    noisy.extend_from_slice(&burst);
    group.bench_function(BenchmarkId::new("noisy", "64_frames"), |b| {
        b.iter(|| {
            let mut rx = ReceiveBuffer::new(noisy.len(), 4_096, noisy.len() * 2);
            rx.append(&noisy).unwrap();
            let mut count = 0;
            while let Some(frame) = rx.take_frame() {
                count += frame.len();
            }
            black_box(count)
        })
    });

    group.finish();
}

criterion_group!(benches, bench_crc16, bench_encode, bench_extract);
criterion_main!(benches);
