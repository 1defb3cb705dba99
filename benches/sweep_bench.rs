//! Criterion benchmarks for the traversal hot paths.
//!
//! The sweep iterator runs once per acquired point, and the data store's
//! point write sits on the same per-point path, so both should stay cheap
//! next to instrument settling times.
//!
//! Run with: cargo bench --bench sweep_bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use labscan::data::DataStore;
use labscan::experiment::SweepIter;

/// Full traversal of dense grids, plain and raster order.
fn sweep_traversal(c: &mut Criterion) {
    let mut group = c.benchmark_group("sweep_traversal");

    let grids: Vec<(&str, Vec<usize>)> = vec![
        ("1d_10k", vec![10_000]),
        ("2d_100x100", vec![100, 100]),
        ("3d_20x20x25", vec![20, 20, 25]),
    ];

    for (name, dims) in grids {
        let points: usize = dims.iter().product();
        group.throughput(Throughput::Elements(points as u64));

        group.bench_with_input(BenchmarkId::new("plain", name), &dims, |b, dims| {
            let raster = vec![false; dims.len()];
            b.iter(|| {
                let mut last = 0usize;
                for (indices, _deltas) in SweepIter::new(dims, &raster, false) {
                    last = black_box(indices[0]);
                }
                last
            });
        });

        group.bench_with_input(BenchmarkId::new("raster", name), &dims, |b, dims| {
            let mut raster = vec![false; dims.len()];
            raster[0] = true;
            b.iter(|| {
                let mut last = 0usize;
                for (indices, _deltas) in SweepIter::new(dims, &raster, false) {
                    last = black_box(indices[0]);
                }
                last
            });
        });
    }

    group.finish();
}

/// Per-point scalar writes into the live data mirror.
fn store_point_writes(c: &mut Criterion) {
    let mut group = c.benchmark_group("store_write");

    let store = DataStore::new();
    store.create("signal", &[100, 100]);

    group.throughput(Throughput::Elements(1));
    group.bench_function("scalar_point", |b| {
        let mut k = 0usize;
        b.iter(|| {
            let idx = [k / 100 % 100, k % 100];
            store
                .write_scalar("signal", black_box(&idx), black_box(k as f64))
                .unwrap();
            k = k.wrapping_add(1);
        });
    });

    group.finish();
}

criterion_group!(benches, sweep_traversal, store_point_writes);
criterion_main!(benches);
