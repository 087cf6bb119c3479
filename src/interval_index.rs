//! # Interval Index
//!
//! A concurrent interval index mapping `[start, end]` key ranges to sets of
//! associated values, used to resolve which shards a time-range query
//! touches. The tree is a treap: ordered by `(start, end)`, balanced by a
//! uniformly random priority drawn at node creation, with a cached `max_end`
//! per subtree so overlap queries can prune whole branches.
//!
//! One exclusive-writer/many-reader lock guards the tree. Query results are
//! snapshots cloned under the read lock; callers never alias live node
//! state, so a concurrent insert can never mutate a set a reader is holding.

use parking_lot::RwLock;
use rand::Rng;
use rustc_hash::FxHashSet;
use std::cmp::Ordering;
use std::hash::Hash;

/// Concurrent treap-backed interval index.
///
/// Intervals are closed on both ends: `[start, end]` overlaps `[qs, qe]`
/// iff `start <= qe && end >= qs`. `start <= end` is a caller contract and
/// is not enforced here.
pub struct IntervalIndex<K, V> {
    inner: RwLock<Tree<K, V>>,
}

struct Tree<K, V> {
    nodes: Vec<Node<K, V>>,
    root: Option<usize>,
    all_values: FxHashSet<V>,
}

struct Node<K, V> {
    start: K,
    end: K,
    /// Maximum `end` over this node and both subtrees.
    max_end: K,
    priority: u64,
    values: FxHashSet<V>,
    left: Option<usize>,
    right: Option<usize>,
}

impl<K, V> IntervalIndex<K, V>
where
    K: Ord + Copy,
    V: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Tree {
                nodes: Vec::new(),
                root: None,
                all_values: FxHashSet::default(),
            }),
        }
    }

    /// Add `value` to the interval `[start, end]`.
    ///
    /// Exactly one node exists per distinct `(start, end)` pair; inserting
    /// under an existing pair merges into that node's value set.
    pub fn insert(&self, start: K, end: K, value: V) {
        let mut tree = self.inner.write();
        tree.all_values.insert(value.clone());
        let root = tree.root;
        let new_root = tree.insert_at(root, start, end, value);
        tree.root = Some(new_root);
    }

    /// All values whose interval overlaps `[q_start, q_end]`.
    pub fn query(&self, q_start: K, q_end: K) -> FxHashSet<V> {
        let tree = self.inner.read();
        let mut out = FxHashSet::default();
        tree.collect_overlapping(q_start, q_end, &mut out);
        out
    }

    /// Every value ever inserted, across all intervals.
    pub fn all_values(&self) -> FxHashSet<V> {
        self.inner.read().all_values.clone()
    }

    /// Number of distinct `(start, end)` interval nodes.
    pub fn len(&self) -> usize {
        self.inner.read().nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K, V> Default for IntervalIndex<K, V>
where
    K: Ord + Copy,
    V: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> Tree<K, V>
where
    K: Ord + Copy,
    V: Eq + Hash + Clone,
{
    /// Insert below `at`, returning the (possibly rotated) subtree root.
    fn insert_at(&mut self, at: Option<usize>, start: K, end: K, value: V) -> usize {
        let Some(idx) = at else {
            let node_idx = self.nodes.len();
            let mut values = FxHashSet::default();
            values.insert(value);
            self.nodes.push(Node {
                start,
                end,
                max_end: end,
                priority: rand::rng().random(),
                values,
                left: None,
                right: None,
            });
            return node_idx;
        };

        match (start, end).cmp(&(self.nodes[idx].start, self.nodes[idx].end)) {
            Ordering::Equal => {
                self.nodes[idx].values.insert(value);
                idx
            }
            Ordering::Less => {
                let child = self.insert_at(self.nodes[idx].left, start, end, value);
                self.nodes[idx].left = Some(child);
                if self.nodes[child].priority > self.nodes[idx].priority {
                    self.rotate_right(idx, child)
                } else {
                    self.refresh_max_end(idx);
                    idx
                }
            }
            Ordering::Greater => {
                let child = self.insert_at(self.nodes[idx].right, start, end, value);
                self.nodes[idx].right = Some(child);
                if self.nodes[child].priority > self.nodes[idx].priority {
                    self.rotate_left(idx, child)
                } else {
                    self.refresh_max_end(idx);
                    idx
                }
            }
        }
    }

    /// Promote the left child `l` of `idx`; both get their `max_end`
    /// recomputed bottom-up.
    fn rotate_right(&mut self, idx: usize, l: usize) -> usize {
        self.nodes[idx].left = self.nodes[l].right;
        self.nodes[l].right = Some(idx);
        self.refresh_max_end(idx);
        self.refresh_max_end(l);
        l
    }

    /// Promote the right child `r` of `idx`.
    fn rotate_left(&mut self, idx: usize, r: usize) -> usize {
        self.nodes[idx].right = self.nodes[r].left;
        self.nodes[r].left = Some(idx);
        self.refresh_max_end(idx);
        self.refresh_max_end(r);
        r
    }

    fn refresh_max_end(&mut self, idx: usize) {
        let mut max_end = self.nodes[idx].end;
        if let Some(left) = self.nodes[idx].left {
            max_end = max_end.max(self.nodes[left].max_end);
        }
        if let Some(right) = self.nodes[idx].right {
            max_end = max_end.max(self.nodes[right].max_end);
        }
        self.nodes[idx].max_end = max_end;
    }

    fn collect_overlapping(&self, q_start: K, q_end: K, out: &mut FxHashSet<V>) {
        let Some(root) = self.root else {
            return;
        };
        let mut stack = vec![root];
        while let Some(idx) = stack.pop() {
            let node = &self.nodes[idx];
            // Nothing in this subtree can reach q_start.
            if node.max_end < q_start {
                continue;
            }
            if node.start <= q_end && node.end >= q_start {
                out.extend(node.values.iter().cloned());
            }
            if let Some(left) = node.left {
                stack.push(left);
            }
            if let Some(right) = node.right {
                // Ordering by start: the right subtree starts at or after
                // this node, so it is only reachable while start <= q_end.
                if node.start <= q_end {
                    stack.push(right);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn as_sorted(set: FxHashSet<&'static str>) -> Vec<&'static str> {
        let mut values: Vec<_> = set.into_iter().collect();
        values.sort_unstable();
        values
    }

    #[test]
    fn query_returns_only_overlapping_values() {
        let index = IntervalIndex::new();
        index.insert(1, 3, "x");
        index.insert(5, 8, "y");
        index.insert(10, 12, "z");

        assert_eq!(as_sorted(index.query(4, 6)), vec!["y"]);
        assert_eq!(as_sorted(index.query(0, 20)), vec!["x", "y", "z"]);
        assert!(index.query(13, 14).is_empty());
        assert_eq!(as_sorted(index.query(3, 5)), vec!["x", "y"]);
    }

    #[test]
    fn endpoints_are_inclusive() {
        let index = IntervalIndex::new();
        index.insert(5, 8, "y");
        assert_eq!(as_sorted(index.query(8, 9)), vec!["y"]);
        assert_eq!(as_sorted(index.query(0, 5)), vec!["y"]);
    }

    #[test]
    fn duplicate_interval_merges_value_set() {
        let index = IntervalIndex::new();
        index.insert(1, 3, "a");
        index.insert(1, 3, "b");

        assert_eq!(index.len(), 1);
        assert_eq!(as_sorted(index.query(2, 2)), vec!["a", "b"]);
        assert_eq!(index.all_values().len(), 2);
    }

    #[test]
    fn same_start_different_end_are_distinct_nodes() {
        let index = IntervalIndex::new();
        index.insert(1, 3, "a");
        index.insert(1, 7, "b");

        assert_eq!(index.len(), 2);
        assert_eq!(as_sorted(index.query(5, 6)), vec!["b"]);
    }

    #[test]
    fn insertion_order_does_not_change_query_results() {
        let intervals = [
            (1, 3, "a"),
            (2, 9, "b"),
            (5, 8, "c"),
            (7, 7, "d"),
            (10, 12, "e"),
            (0, 15, "f"),
        ];
        let queries = [(0, 0), (2, 4), (6, 8), (9, 11), (14, 20), (0, 20)];

        let forward = IntervalIndex::new();
        for (start, end, value) in intervals {
            forward.insert(start, end, value);
        }
        let reverse = IntervalIndex::new();
        for &(start, end, value) in intervals.iter().rev() {
            reverse.insert(start, end, value);
        }

        for (qs, qe) in queries {
            assert_eq!(
                as_sorted(forward.query(qs, qe)),
                as_sorted(reverse.query(qs, qe)),
                "query ({qs}, {qe}) diverged between insertion orders"
            );
        }
    }

    #[test]
    fn query_results_are_snapshots() {
        let index = IntervalIndex::new();
        index.insert(1, 5, "a");
        let snapshot = index.query(2, 3);
        index.insert(1, 5, "b");

        assert_eq!(snapshot.len(), 1);
        assert_eq!(index.query(2, 3).len(), 2);
    }

    #[test]
    fn concurrent_readers_and_writer() {
        use std::sync::Arc;

        let index = Arc::new(IntervalIndex::new());
        std::thread::scope(|scope| {
            let writer = Arc::clone(&index);
            scope.spawn(move || {
                for i in 0..500i64 {
                    writer.insert(i, i + 10, i);
                }
            });
            for _ in 0..4 {
                let reader = Arc::clone(&index);
                scope.spawn(move || {
                    for _ in 0..200 {
                        let hits = reader.query(100, 120);
                        for value in hits {
                            assert!((90..=120).contains(&value));
                        }
                    }
                });
            }
        });
        assert_eq!(index.len(), 500);
    }
}
