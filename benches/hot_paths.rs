//! Hot path benchmarks for the ingestion loop.
//!
//! Run with: `cargo bench --bench hot_paths`
//! Compare baselines: `cargo bench --bench hot_paths -- --baseline main`
//!
//! Every byte from the bridge goes through `BatchSet::write_byte`, and every
//! flush pays for one snapshot plus one copy per tap.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use port_listener::tap::{TapError, TapRegistry};
use port_listener::{BatchSet, BatchSnapshot};
use std::time::Duration;

/// Benchmark BatchSet::write_byte across one full batch set
fn bench_write_byte(c: &mut Criterion) {
    let mut group = c.benchmark_group("write_byte");

    for batch_size in [16, 256, 1024] {
        let batches = 10;
        group.throughput(Throughput::Bytes((batch_size * batches) as u64));

        group.bench_function(format!("batch_size_{}", batch_size), |b| {
            let mut set = BatchSet::new(batch_size, batches);
            b.iter(|| {
                let mut byte = 0u8;
                while !set.write_byte(black_box(byte)) {
                    byte = byte.wrapping_add(1);
                }
                set.snapshot_and_clear()
            })
        });
    }

    group.finish();
}

/// Benchmark snapshot_and_clear on a full set
fn bench_snapshot_and_clear(c: &mut Criterion) {
    let mut group = c.benchmark_group("snapshot_and_clear");

    for (batch_size, batches) in [(16, 10), (1024, 10), (1024, 64)] {
        group.throughput(Throughput::Bytes((batch_size * batches) as u64));

        group.bench_function(format!("{}x{}", batches, batch_size), |b| {
            let mut set = BatchSet::new(batch_size, batches);
            b.iter(|| {
                for _ in 0..batch_size * batches {
                    set.write_byte(0x5A);
                }
                black_box(set.snapshot_and_clear())
            })
        });
    }

    group.finish();
}

/// Benchmark fan-out to several taps
fn bench_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("fan_out");
    let snapshot = BatchSnapshot::from_batches(vec![vec![0x5A; 1024]; 10]);

    for taps in [1, 4, 16] {
        group.throughput(Throughput::Elements(taps as u64));

        let registry = TapRegistry::new("bench", Duration::from_secs(10));
        for i in 0..taps {
            registry
                .add_tap(
                    Box::new(|batches: BatchSnapshot, _: &str| -> Result<(), TapError> {
                        black_box(batches);
                        Ok(())
                    }),
                    &format!("tap{}", i),
                )
                .unwrap();
        }

        group.bench_function(format!("taps_{}", taps), |b| {
            b.iter(|| registry.fan_out(black_box(&snapshot)).unwrap())
        });
    }

    group.finish();
}

criterion_group!(benches, bench_write_byte, bench_snapshot_and_clear, bench_fan_out);

criterion_main!(benches);
