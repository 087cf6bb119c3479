//! Interval index properties under randomized workloads and concurrency.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use strata_rs::IntervalIndex;

/// Reference implementation: linear scan over every inserted interval.
fn naive_query(intervals: &[(i64, i64, u32)], q_start: i64, q_end: i64) -> Vec<u32> {
    let mut hits: Vec<u32> = intervals
        .iter()
        .filter(|(start, end, _)| *start <= q_end && *end >= q_start)
        .map(|(_, _, value)| *value)
        .collect();
    hits.sort_unstable();
    hits.dedup();
    hits
}

#[test]
fn randomized_queries_match_linear_scan() {
    let mut rng = StdRng::seed_from_u64(42);
    let index = IntervalIndex::new();
    let mut inserted = Vec::new();

    for value in 0..2_000u32 {
        let start = rng.random_range(0..10_000i64);
        let end = start + rng.random_range(0..500i64);
        index.insert(start, end, value);
        inserted.push((start, end, value));
    }

    for _ in 0..200 {
        let q_start = rng.random_range(0..10_500i64);
        let q_end = q_start + rng.random_range(0..800i64);
        let mut hits: Vec<u32> = index.query(q_start, q_end).into_iter().collect();
        hits.sort_unstable();
        assert_eq!(
            hits,
            naive_query(&inserted, q_start, q_end),
            "query ({q_start}, {q_end}) diverged from the linear scan"
        );
    }
}

#[test]
fn duplicate_intervals_share_one_node() {
    let index = IntervalIndex::new();

    // 500 inserts over only 50 distinct (start, end) pairs.
    for value in 0..500u32 {
        let start = i64::from(value % 50);
        let end = start + 10;
        index.insert(start, end, value);
    }

    assert_eq!(index.len(), 50);
    assert_eq!(index.all_values().len(), 500);
}

#[test]
fn all_values_accumulates_across_intervals() {
    let index = IntervalIndex::new();
    index.insert(0, 5, "a");
    index.insert(10, 15, "b");
    index.insert(0, 5, "c");

    let values = index.all_values();
    assert_eq!(values.len(), 3);
    assert!(values.contains("a") && values.contains("b") && values.contains("c"));
}

#[test]
fn readers_share_the_lock_while_writers_mutate() {
    let index = Arc::new(IntervalIndex::new());
    for i in 0..100i64 {
        index.insert(i * 10, i * 10 + 9, i);
    }

    std::thread::scope(|scope| {
        for writer_id in 0..2i64 {
            let writer = Arc::clone(&index);
            scope.spawn(move || {
                for i in 0..200 {
                    let base = 2_000 + writer_id * 10_000 + i * 10;
                    writer.insert(base, base + 5, writer_id * 1_000 + i);
                }
            });
        }
        for _ in 0..6 {
            let reader = Arc::clone(&index);
            scope.spawn(move || {
                for _ in 0..500 {
                    // The pre-seeded range is immutable during the run; its
                    // answer must hold no matter what writers are doing.
                    let hits = reader.query(0, 99);
                    assert!(hits.len() >= 10);
                }
            });
        }
    });

    assert_eq!(index.len(), 100 + 400);
}
