//! Benchmarks for the hot paths of the query core: interval index queries
//! and the streaming mergers.

use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::hint::black_box;
use strata_rs::ftgs::FtgsSource;
use strata_rs::merge::{SortedMerger, TopTerms, UnsortedChain};
use strata_rs::test_support::{rec, VecFtgsSource};
use strata_rs::{FtgsRecord, IntervalIndex};

fn build_index(intervals: usize) -> IntervalIndex<i64, u32> {
    let mut rng = StdRng::seed_from_u64(17);
    let index = IntervalIndex::new();
    for value in 0..intervals as u32 {
        let start = rng.random_range(0..1_000_000i64);
        let end = start + rng.random_range(0..5_000i64);
        index.insert(start, end, value);
    }
    index
}

fn bench_interval_index(c: &mut Criterion) {
    let mut group = c.benchmark_group("interval_index_query");
    for &intervals in &[1_000usize, 10_000, 100_000] {
        let index = build_index(intervals);
        group.throughput(Throughput::Elements(1));
        group.bench_with_input(
            BenchmarkId::new("overlap_query", intervals),
            &index,
            |b, index| {
                let mut rng = StdRng::seed_from_u64(99);
                b.iter(|| {
                    let start = rng.random_range(0..1_000_000i64);
                    black_box(index.query(start, start + 10_000));
                });
            },
        );
    }
    group.finish();
}

fn split_streams(terms: usize, splits: usize) -> Vec<Box<dyn FtgsSource>> {
    let mut buckets: Vec<Vec<FtgsRecord>> = vec![Vec::new(); splits];
    for term in 0..terms as i64 {
        buckets[(term as usize) % splits].push(rec("metric", term, &[1.0, 2.0]));
    }
    buckets
        .into_iter()
        .map(|records| Box::new(VecFtgsSource::new(2, records)) as Box<dyn FtgsSource>)
        .collect()
}

fn drive(mut source: Box<dyn FtgsSource>) -> usize {
    let mut buf = [0.0f64; 2];
    let mut count = 0;
    while source.next_term().expect("merge failed") {
        source.group_stats(&mut buf);
        count += 1;
    }
    count
}

fn bench_sorted_merge(c: &mut Criterion) {
    let mut group = c.benchmark_group("sorted_merge");
    for &splits in &[2usize, 8, 16] {
        group.throughput(Throughput::Elements(50_000));
        group.bench_with_input(BenchmarkId::new("50k_terms", splits), &splits, |b, &splits| {
            b.iter_batched(
                || split_streams(50_000, splits),
                |streams| {
                    let merger = SortedMerger::new(streams).expect("merger");
                    black_box(drive(Box::new(merger)))
                },
                BatchSize::LargeInput,
            );
        });
    }
    group.finish();
}

fn bench_top_terms(c: &mut Criterion) {
    let mut group = c.benchmark_group("top_terms");
    group.throughput(Throughput::Elements(50_000));
    group.bench_function("top_100_of_50k", |b| {
        b.iter_batched(
            || {
                let chain = UnsortedChain::new(split_streams(50_000, 4)).expect("chain");
                Box::new(chain) as Box<dyn FtgsSource>
            },
            |chain| {
                let top = TopTerms::build(chain, 100, 0).expect("top terms");
                black_box(drive(Box::new(top)))
            },
            BatchSize::LargeInput,
        );
    });
    group.finish();
}

criterion_group!(
    core_benches,
    bench_interval_index,
    bench_sorted_merge,
    bench_top_terms
);
criterion_main!(core_benches);
