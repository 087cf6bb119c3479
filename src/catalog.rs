//! # Shard Catalog
//!
//! Tracks which time-partitioned shards exist per dataset and resolves a
//! queried time range to the set of shards it touches, via one
//! [`IntervalIndex`] per dataset. Shard discovery and removal are driven by
//! an external collaborator watching storage; the catalog only keeps the
//! registry consistent. Persistence of the catalog itself is out of scope.

use crate::interval_index::IntervalIndex;
use crate::model::{ShardId, ShardInfo};
use hashbrown::HashMap;
use parking_lot::RwLock;
use rustc_hash::FxHashSet;
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Default)]
struct DatasetShards {
    by_id: HashMap<ShardId, ShardInfo>,
    index: IntervalIndex<i64, ShardId>,
}

impl DatasetShards {
    fn rebuild_index(&mut self) {
        let index = IntervalIndex::new();
        for shard in self.by_id.values() {
            index.insert(shard.start, shard.end, shard.id);
        }
        self.index = index;
    }
}

/// Registry of shards across datasets, shared between discovery writers and
/// query readers.
#[derive(Default)]
pub struct ShardCatalog {
    datasets: RwLock<HashMap<String, DatasetShards>>,
}

impl ShardCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a discovered shard. An already-known shard is replaced only by
    /// a strictly newer version; returns whether the entry was stored.
    pub fn register(&self, dataset: &str, shard: ShardInfo) -> bool {
        let mut datasets = self.datasets.write();
        let entry = datasets.entry_ref(dataset).or_default();
        if let Some(existing) = entry.by_id.get(&shard.id) {
            if existing.version >= shard.version {
                return false;
            }
        }
        debug!(dataset, shard = %shard.id, version = shard.version, "tracking shard");
        let replaced = entry.by_id.insert(shard.id, shard.clone()).is_some();
        if replaced {
            // The replacement may cover a different range; rebuild rather
            // than leave the stale interval behind.
            entry.rebuild_index();
        } else {
            entry.index.insert(shard.start, shard.end, shard.id);
        }
        true
    }

    /// All shards of `dataset` overlapping `[start, end]`, sorted by id.
    pub fn resolve(&self, dataset: &str, start: i64, end: i64) -> Vec<ShardInfo> {
        let datasets = self.datasets.read();
        let Some(entry) = datasets.get(dataset) else {
            return Vec::new();
        };
        let mut shards: Vec<ShardInfo> = entry
            .index
            .query(start, end)
            .into_iter()
            .filter_map(|id| entry.by_id.get(&id).cloned())
            .collect();
        shards.sort_by_key(|shard| shard.id);
        shards
    }

    /// Shard metadata for a given (dataset, id), if tracked.
    pub fn get(&self, dataset: &str, id: ShardId) -> Option<ShardInfo> {
        self.datasets
            .read()
            .get(dataset)
            .and_then(|entry| entry.by_id.get(&id).cloned())
    }

    /// Drop every shard of `dataset` not named in `keep` (gone from disk);
    /// returns how many entries were removed.
    pub fn prune(&self, dataset: &str, keep: &FxHashSet<ShardId>) -> usize {
        let mut datasets = self.datasets.write();
        let Some(entry) = datasets.get_mut(dataset) else {
            return 0;
        };
        let before = entry.by_id.len();
        entry.by_id.retain(|id, _| keep.contains(id));
        let removed = before - entry.by_id.len();
        if removed > 0 {
            debug!(dataset, removed, "pruned shards no longer on disk");
            entry.rebuild_index();
        }
        removed
    }

    /// Dataset name to number of tracked shards, sorted by dataset.
    pub fn shard_counts(&self) -> BTreeMap<String, usize> {
        self.datasets
            .read()
            .iter()
            .map(|(dataset, entry)| (dataset.clone(), entry.by_id.len()))
            .collect()
    }
}
