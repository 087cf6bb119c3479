//! In-memory FTGS and group-stat sources plus a fake transport, shared by
//! unit tests, integration tests, and benches.

use crate::coordinator::{split_for_term, FtgsRequest, RemoteCall};
use crate::error::Result;
use crate::ftgs::FtgsSource;
use crate::model::{FtgsRecord, NodeAddr, TermValue};
use crate::stats::GroupStatsSource;
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shorthand for building one FTGS record.
pub fn rec(field: &str, term: impl Into<TermValue>, stats: &[f64]) -> FtgsRecord {
    FtgsRecord::new(field, term, stats.to_vec())
}

/// Pull an FTGS source to completion, closing it after.
pub fn drain(source: &mut dyn FtgsSource) -> Result<Vec<FtgsRecord>> {
    let mut out = Vec::new();
    let mut buf = vec![0.0; source.num_stats()];
    while source.next_term()? {
        source.group_stats(&mut buf);
        out.push(FtgsRecord {
            field: source.field().to_string(),
            term: source.term().clone(),
            stats: buf.clone(),
        });
    }
    source.close();
    Ok(out)
}

/// FTGS source over a fixed record list, with an observable close flag.
pub struct VecFtgsSource {
    records: Vec<FtgsRecord>,
    pos: usize,
    num_stats: usize,
    closed: Arc<AtomicBool>,
}

impl VecFtgsSource {
    pub fn new(num_stats: usize, records: Vec<FtgsRecord>) -> Self {
        Self::with_close_flag(num_stats, records, Arc::new(AtomicBool::new(false)))
    }

    pub fn with_close_flag(
        num_stats: usize,
        records: Vec<FtgsRecord>,
        closed: Arc<AtomicBool>,
    ) -> Self {
        Self {
            records,
            pos: 0,
            num_stats,
            closed,
        }
    }

    fn current(&self) -> Option<&FtgsRecord> {
        if self.pos == 0 {
            None
        } else {
            self.records.get(self.pos - 1)
        }
    }
}

impl FtgsSource for VecFtgsSource {
    fn num_stats(&self) -> usize {
        self.num_stats
    }

    fn next_term(&mut self) -> Result<bool> {
        if self.closed.load(Ordering::SeqCst) || self.pos >= self.records.len() {
            return Ok(false);
        }
        self.pos += 1;
        Ok(true)
    }

    fn field(&self) -> &str {
        self.current().map_or("", |record| record.field.as_str())
    }

    fn term(&self) -> &TermValue {
        const NO_TERM: &TermValue = &TermValue::Int(0);
        self.current().map_or(NO_TERM, |record| &record.term)
    }

    fn group_stats(&self, out: &mut [f64]) {
        if let Some(record) = self.current() {
            out.copy_from_slice(&record.stats);
        }
    }

    fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

impl Drop for VecFtgsSource {
    fn drop(&mut self) {
        self.close();
    }
}

/// Group-stat source over a fixed value list, with an observable close flag.
pub struct VecGroupStatsSource {
    values: Vec<i64>,
    pos: usize,
    closed: Arc<AtomicBool>,
}

impl VecGroupStatsSource {
    pub fn new(values: Vec<i64>) -> Self {
        Self::with_close_flag(values, Arc::new(AtomicBool::new(false)))
    }

    pub fn with_close_flag(values: Vec<i64>, closed: Arc<AtomicBool>) -> Self {
        Self {
            values,
            pos: 0,
            closed,
        }
    }
}

impl GroupStatsSource for VecGroupStatsSource {
    fn group_count(&self) -> usize {
        self.values.len()
    }

    fn has_next(&self) -> bool {
        !self.closed.load(Ordering::SeqCst) && self.pos < self.values.len()
    }

    fn next(&mut self) -> Result<i64> {
        let value = self.values.get(self.pos).copied().unwrap_or(0);
        self.pos += 1;
        Ok(value)
    }

    fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

impl Drop for VecGroupStatsSource {
    fn drop(&mut self) {
        self.close();
    }
}

enum FakeData {
    /// One logical dataset; each split serves the terms `split_for_term`
    /// routes to it, disjoint exactly the way real workers produce them.
    Sharded(Vec<FtgsRecord>),
    /// Verbatim per-node streams; lets tests model sessions over distinct
    /// datasets whose streams share terms.
    PerNode(FxHashMap<NodeAddr, Vec<FtgsRecord>>),
}

/// Fake transport serving canned data.
///
/// Group-stat responses are configured per node. Every stream handed out
/// carries a close flag the tests can inspect, and any node can be made to
/// fail.
pub struct FakeTransport {
    num_stats: usize,
    data: FakeData,
    distinct: FxHashMap<NodeAddr, Vec<i64>>,
    fail_nodes: FxHashSet<NodeAddr>,
    opened: Mutex<Vec<Arc<AtomicBool>>>,
}

impl FakeTransport {
    /// Split-routed transport over one logical dataset.
    pub fn sharded(num_stats: usize, records: Vec<FtgsRecord>) -> Self {
        Self {
            num_stats,
            data: FakeData::Sharded(records),
            distinct: FxHashMap::default(),
            fail_nodes: FxHashSet::default(),
            opened: Mutex::new(Vec::new()),
        }
    }

    /// Transport answering each node with its own fixed stream.
    pub fn per_node(
        num_stats: usize,
        streams: impl IntoIterator<Item = (NodeAddr, Vec<FtgsRecord>)>,
    ) -> Self {
        Self {
            num_stats,
            data: FakeData::PerNode(streams.into_iter().collect()),
            distinct: FxHashMap::default(),
            fail_nodes: FxHashSet::default(),
            opened: Mutex::new(Vec::new()),
        }
    }

    /// Canned group-stat response for one node.
    pub fn set_distinct(&mut self, node: NodeAddr, values: Vec<i64>) {
        self.distinct.insert(node, values);
    }

    /// Make every call to `node` fail.
    pub fn fail_node(&mut self, node: NodeAddr) {
        self.fail_nodes.insert(node);
    }

    /// Close flags of every stream handed out so far, in open order.
    pub fn open_flags(&self) -> Vec<Arc<AtomicBool>> {
        self.opened.lock().clone()
    }

    fn register_flag(&self) -> Arc<AtomicBool> {
        let flag = Arc::new(AtomicBool::new(false));
        self.opened.lock().push(Arc::clone(&flag));
        flag
    }

    /// Round-trip the descriptor through serialization, as a real wire
    /// transport would.
    fn reserialize(request: &FtgsRequest) -> anyhow::Result<FtgsRequest> {
        let encoded = serde_json::to_string(request)?;
        Ok(serde_json::from_str(&encoded)?)
    }
}

impl RemoteCall for FakeTransport {
    fn ftgs_split(
        &self,
        node: &NodeAddr,
        request: &FtgsRequest,
    ) -> anyhow::Result<Box<dyn FtgsSource>> {
        if self.fail_nodes.contains(node) {
            anyhow::bail!("injected failure for {node}");
        }
        let request = Self::reserialize(request)?;
        let mut records: Vec<FtgsRecord> = match &self.data {
            FakeData::Sharded(records) => records
                .iter()
                .filter(|record| {
                    split_for_term(request.is_int_field, &record.term, request.num_splits)
                        == request.split_index
                })
                .cloned()
                .collect(),
            FakeData::PerNode(streams) => streams.get(node).cloned().unwrap_or_default(),
        };
        if request.params.sorted() {
            records.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
        }
        let flag = self.register_flag();
        Ok(Box::new(VecFtgsSource::with_close_flag(
            self.num_stats,
            records,
            flag,
        )))
    }

    fn distinct_split(
        &self,
        node: &NodeAddr,
        request: &FtgsRequest,
    ) -> anyhow::Result<Box<dyn GroupStatsSource>> {
        if self.fail_nodes.contains(node) {
            anyhow::bail!("injected failure for {node}");
        }
        let _ = Self::reserialize(request)?;
        let values = self.distinct.get(node).cloned().unwrap_or_default();
        let flag = self.register_flag();
        Ok(Box::new(VecGroupStatsSource::with_close_flag(values, flag)))
    }
}
