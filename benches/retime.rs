//! Criterion benchmarks for the reconstruction hot paths.
//!
//! Key metrics:
//! - Collection construction (dedup + sort) throughput
//! - Retiming of a gap-free collection
//! - Segmenting, retiming and merging a collection with holes
//!
//! Run with: cargo bench --bench retime

use buoy_daq::data::retime::{RetimeConfig, Retimer};
use buoy_daq::{Collection, Package};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

const N: usize = 1024;
const FS: f64 = 52.0;
const T0: f64 = 1_654_012_280.0;

/// `count` packages, with a 60 s hole every `hole_every` packages when non-zero.
fn synthetic(count: usize, hole_every: usize) -> Vec<Package> {
    let period = N as f64 / FS;
    let mut t = T0;
    (0..count)
        .map(|i| {
            if hole_every > 0 && i > 0 && i % hole_every == 0 {
                t += 60.0;
            }
            let start = t;
            t += period;
            Package::builder("dev:bench", (start * 1000.0).round() as i64, FS)
                .storage_id(Some(i as u32))
                .channel("x", vec![0.0; N])
                .channel("y", vec![0.0; N])
                .channel("z", (0..N).map(|k| ((i * N + k) % 97) as f32).collect())
                .build()
                .unwrap()
        })
        .collect()
}

fn collection_new(c: &mut Criterion) {
    let mut group = c.benchmark_group("collection_new");

    for count in [10, 100, 1000] {
        // reversed and doubled so dedup and sort both have work
        let mut input = synthetic(count, 0);
        input.reverse();
        let doubled: Vec<Package> = input.iter().chain(input.iter()).cloned().collect();

        group.throughput(Throughput::Elements(doubled.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &doubled, |b, input| {
            b.iter(|| black_box(Collection::new(input.clone()).unwrap()));
        });
    }

    group.finish();
}

fn retime_gap_free(c: &mut Criterion) {
    let mut group = c.benchmark_group("retime");
    let retimer = Retimer::new(RetimeConfig::default());

    for count in [10, 100, 500] {
        let collection = Collection::new(synthetic(count, 0)).unwrap();
        group.throughput(Throughput::Elements((count * N) as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &collection, |b, c| {
            b.iter(|| black_box(retimer.retime(c).unwrap()));
        });
    }

    group.finish();
}

fn retime_segments(c: &mut Criterion) {
    let mut group = c.benchmark_group("retime_segments");
    let retimer = Retimer::new(RetimeConfig::default());

    for hole_every in [5, 50] {
        let collection = Collection::new(synthetic(500, hole_every)).unwrap();
        group.throughput(Throughput::Elements((500 * N) as u64));
        group.bench_with_input(
            BenchmarkId::new("hole_every", hole_every),
            &collection,
            |b, c| {
                b.iter(|| black_box(retimer.retime_segments(c).unwrap()));
            },
        );
    }

    group.finish();
}

criterion_group!(benches, collection_new, retime_gap_free, retime_segments);
criterion_main!(benches);
