//! # Merge Network
//!
//! The streaming combinators that turn per-node and per-split FTGS streams
//! into one correctly ordered, correctly summed output:
//!
//! - [`DisjointMerger`] for streams whose `(field, term)` spaces never
//!   overlap (per-split streams routed by term hash) — pure selection, the
//!   winning stream's stats pass through verbatim;
//! - [`SortedMerger`] for sorted streams that may share terms — the minimum
//!   `(field, term)` wins each round and every stream positioned on it is
//!   summed elementwise and advanced;
//! - [`UnsortedChain`] for source-by-source concatenation with no
//!   cross-source guarantees;
//! - the [`TermLimited`] and [`TopTerms`] post-filters.
//!
//! All combinators are pull-driven and single-threaded; they own their
//! inputs and close every one of them on `close` or drop.

use crate::error::{QueryError, Result};
use crate::ftgs::FtgsSource;
use crate::model::{FtgsRecord, TermValue};
use std::cmp::{Ordering, Reverse};
use std::collections::{BTreeMap, BinaryHeap};

fn close_all(sources: &mut [Box<dyn FtgsSource>]) {
    for source in sources {
        source.close();
    }
}

/// Inputs must agree on stat-vector width; closes them and fails otherwise.
fn validate_uniform_stats(sources: &mut Vec<Box<dyn FtgsSource>>) -> Result<usize> {
    let Some(first) = sources.first() else {
        return Err(QueryError::InvalidConfiguration(
            "at least one input stream is required".to_string(),
        ));
    };
    let num_stats = first.num_stats();
    if sources.iter().any(|s| s.num_stats() != num_stats) {
        close_all(sources);
        return Err(QueryError::InvalidConfiguration(
            "input streams disagree on stat-vector width".to_string(),
        ));
    }
    Ok(num_stats)
}

/// K-way merge of streams with disjoint `(field, term)` spaces.
///
/// Disjointness is an external contract (every worker routes a term to the
/// same single split), so ties cannot occur and each pull reduces to
/// selecting the globally next head. Stat vectors are passed through
/// unchanged from the owning stream.
pub struct DisjointMerger {
    sources: Vec<Box<dyn FtgsSource>>,
    /// Indices of sources that still have a current record.
    heads: Vec<usize>,
    current: Option<usize>,
    num_stats: usize,
    primed: bool,
    closed: bool,
}

impl DisjointMerger {
    pub fn new(mut sources: Vec<Box<dyn FtgsSource>>) -> Result<Self> {
        let num_stats = validate_uniform_stats(&mut sources)?;
        Ok(Self {
            sources,
            heads: Vec::new(),
            current: None,
            num_stats,
            primed: false,
            closed: false,
        })
    }
}

impl FtgsSource for DisjointMerger {
    fn num_stats(&self) -> usize {
        self.num_stats
    }

    fn next_term(&mut self) -> Result<bool> {
        if self.closed {
            return Ok(false);
        }
        if !self.primed {
            self.primed = true;
            for idx in 0..self.sources.len() {
                if self.sources[idx].next_term()? {
                    self.heads.push(idx);
                }
            }
        } else if let Some(current) = self.current.take() {
            if !self.sources[current].next_term()? {
                self.heads.retain(|&head| head != current);
            }
        }

        let mut winner: Option<usize> = None;
        for &head in &self.heads {
            let key = (self.sources[head].field(), self.sources[head].term());
            let better = match winner {
                None => true,
                Some(best) => key < (self.sources[best].field(), self.sources[best].term()),
            };
            if better {
                winner = Some(head);
            }
        }
        self.current = winner;
        Ok(self.current.is_some())
    }

    fn field(&self) -> &str {
        self.current.map_or("", |idx| self.sources[idx].field())
    }

    fn term(&self) -> &TermValue {
        const NO_TERM: &TermValue = &TermValue::Int(0);
        self.current.map_or(NO_TERM, |idx| self.sources[idx].term())
    }

    fn group_stats(&self, out: &mut [f64]) {
        if let Some(idx) = self.current {
            self.sources[idx].group_stats(out);
        }
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.heads.clear();
            self.current = None;
            close_all(&mut self.sources);
        }
    }
}

impl Drop for DisjointMerger {
    fn drop(&mut self) {
        self.close();
    }
}

/// K-way merge of sorted streams that may share terms.
///
/// Every pull selects the smallest `(field, term)` across all heads, sums
/// the stat vectors of every stream positioned on it (slot `i` from each
/// source adds to slot `i` of the result), and advances all of them. The
/// output is strictly increasing with each pair appearing exactly once.
#[derive(Debug)]
pub struct SortedMerger {
    sources: Vec<Box<dyn FtgsSource>>,
    heads: Vec<usize>,
    /// Sources consumed for the current output record; advanced next pull.
    winners: Vec<usize>,
    field: String,
    term: TermValue,
    stats: Vec<f64>,
    scratch: Vec<f64>,
    num_stats: usize,
    primed: bool,
    closed: bool,
}

impl SortedMerger {
    pub fn new(mut sources: Vec<Box<dyn FtgsSource>>) -> Result<Self> {
        let num_stats = validate_uniform_stats(&mut sources)?;
        Ok(Self {
            sources,
            heads: Vec::new(),
            winners: Vec::new(),
            field: String::new(),
            term: TermValue::Int(0),
            stats: vec![0.0; num_stats],
            scratch: vec![0.0; num_stats],
            num_stats,
            primed: false,
            closed: false,
        })
    }
}

impl FtgsSource for SortedMerger {
    fn num_stats(&self) -> usize {
        self.num_stats
    }

    fn next_term(&mut self) -> Result<bool> {
        if self.closed {
            return Ok(false);
        }
        if !self.primed {
            self.primed = true;
            for idx in 0..self.sources.len() {
                if self.sources[idx].next_term()? {
                    self.heads.push(idx);
                }
            }
        } else {
            let winners = std::mem::take(&mut self.winners);
            for winner in winners {
                if !self.sources[winner].next_term()? {
                    self.heads.retain(|&head| head != winner);
                }
            }
        }
        if self.heads.is_empty() {
            return Ok(false);
        }

        let mut min = self.heads[0];
        for &head in &self.heads[1..] {
            if (self.sources[head].field(), self.sources[head].term())
                < (self.sources[min].field(), self.sources[min].term())
            {
                min = head;
            }
        }
        self.field.clear();
        self.field.push_str(self.sources[min].field());
        self.term = self.sources[min].term().clone();

        self.winners.clear();
        for &head in &self.heads {
            if self.sources[head].field() == self.field && *self.sources[head].term() == self.term {
                self.winners.push(head);
            }
        }

        self.stats.fill(0.0);
        for idx in 0..self.winners.len() {
            let winner = self.winners[idx];
            self.sources[winner].group_stats(&mut self.scratch);
            for (acc, value) in self.stats.iter_mut().zip(&self.scratch) {
                *acc += *value;
            }
        }
        Ok(true)
    }

    fn field(&self) -> &str {
        &self.field
    }

    fn term(&self) -> &TermValue {
        &self.term
    }

    fn group_stats(&self, out: &mut [f64]) {
        out.copy_from_slice(&self.stats);
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.heads.clear();
            self.winners.clear();
            close_all(&mut self.sources);
        }
    }
}

impl Drop for SortedMerger {
    fn drop(&mut self) {
        self.close();
    }
}

/// Source-by-source concatenation. No cross-source ordering and no
/// deduplication; used when the caller needs neither.
pub struct UnsortedChain {
    sources: Vec<Box<dyn FtgsSource>>,
    pos: usize,
    num_stats: usize,
    closed: bool,
}

impl UnsortedChain {
    pub fn new(mut sources: Vec<Box<dyn FtgsSource>>) -> Result<Self> {
        let num_stats = validate_uniform_stats(&mut sources)?;
        Ok(Self {
            sources,
            pos: 0,
            num_stats,
            closed: false,
        })
    }
}

impl FtgsSource for UnsortedChain {
    fn num_stats(&self) -> usize {
        self.num_stats
    }

    fn next_term(&mut self) -> Result<bool> {
        if self.closed {
            return Ok(false);
        }
        while self.pos < self.sources.len() {
            if self.sources[self.pos].next_term()? {
                return Ok(true);
            }
            self.pos += 1;
        }
        Ok(false)
    }

    fn field(&self) -> &str {
        if self.pos < self.sources.len() {
            self.sources[self.pos].field()
        } else {
            ""
        }
    }

    fn term(&self) -> &TermValue {
        const NO_TERM: &TermValue = &TermValue::Int(0);
        if self.pos < self.sources.len() {
            self.sources[self.pos].term()
        } else {
            NO_TERM
        }
    }

    fn group_stats(&self, out: &mut [f64]) {
        if self.pos < self.sources.len() {
            self.sources[self.pos].group_stats(out);
        }
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            close_all(&mut self.sources);
        }
    }
}

impl Drop for UnsortedChain {
    fn drop(&mut self) {
        self.close();
    }
}

/// Passes the first `limit` records of each field, drops the rest.
pub struct TermLimited {
    inner: Box<dyn FtgsSource>,
    limit: u64,
    current_field: String,
    emitted_in_field: u64,
    closed: bool,
}

impl TermLimited {
    pub fn new(inner: Box<dyn FtgsSource>, limit: u64) -> Self {
        Self {
            inner,
            limit,
            current_field: String::new(),
            emitted_in_field: 0,
            closed: false,
        }
    }
}

impl FtgsSource for TermLimited {
    fn num_stats(&self) -> usize {
        self.inner.num_stats()
    }

    fn next_term(&mut self) -> Result<bool> {
        if self.closed {
            return Ok(false);
        }
        loop {
            if !self.inner.next_term()? {
                return Ok(false);
            }
            if self.inner.field() != self.current_field {
                self.current_field.clear();
                self.current_field.push_str(self.inner.field());
                self.emitted_in_field = 0;
            }
            self.emitted_in_field += 1;
            if self.emitted_in_field <= self.limit {
                return Ok(true);
            }
        }
    }

    fn field(&self) -> &str {
        self.inner.field()
    }

    fn term(&self) -> &TermValue {
        self.inner.term()
    }

    fn group_stats(&self, out: &mut [f64]) {
        self.inner.group_stats(out);
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.inner.close();
        }
    }
}

impl Drop for TermLimited {
    fn drop(&mut self) {
        self.close();
    }
}

struct TopEntry {
    key: f64,
    term: TermValue,
    stats: Vec<f64>,
}

impl PartialEq for TopEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for TopEntry {}

impl PartialOrd for TopEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TopEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Stat first; term as the fixed secondary key for determinism.
        self.key
            .total_cmp(&other.key)
            .then_with(|| self.term.cmp(&other.term))
    }
}

/// Retains, per field, only the `limit` records with the greatest value of
/// stat slot `sort_stat`, via a bounded min-heap per field so the full term
/// set is never materialized. Emits fields in ascending order and terms per
/// field in descending `(stat, term)` order.
#[derive(Debug)]
pub struct TopTerms {
    records: Vec<FtgsRecord>,
    /// Number of records emitted so far; the current record is `pos - 1`.
    pos: usize,
    num_stats: usize,
    closed: bool,
}

impl TopTerms {
    /// Drains `inner` to completion (closing it), keeping the per-field
    /// winners. Cost is O(total_terms * log(limit)).
    pub fn build(
        mut inner: Box<dyn FtgsSource>,
        limit: u64,
        sort_stat: usize,
    ) -> Result<Self> {
        let num_stats = inner.num_stats();
        if sort_stat >= num_stats {
            inner.close();
            return Err(QueryError::InvalidConfiguration(format!(
                "sort stat {sort_stat} out of range for {num_stats} stats"
            )));
        }

        let mut fields: BTreeMap<String, BinaryHeap<Reverse<TopEntry>>> = BTreeMap::new();
        let mut buf = vec![0.0; num_stats];
        loop {
            match inner.next_term() {
                Ok(true) => {}
                Ok(false) => break,
                Err(err) => {
                    inner.close();
                    return Err(err);
                }
            }
            inner.group_stats(&mut buf);
            let entry = TopEntry {
                key: buf[sort_stat],
                term: inner.term().clone(),
                stats: buf.clone(),
            };
            let heap = fields.entry(inner.field().to_string()).or_default();
            if (heap.len() as u64) < limit {
                heap.push(Reverse(entry));
            } else if let Some(Reverse(smallest)) = heap.peek() {
                if entry > *smallest {
                    heap.pop();
                    heap.push(Reverse(entry));
                }
            }
        }
        inner.close();

        let mut records = Vec::new();
        for (field, heap) in fields {
            let mut entries: Vec<TopEntry> =
                heap.into_iter().map(|Reverse(entry)| entry).collect();
            entries.sort_by(|a, b| b.cmp(a));
            for entry in entries {
                records.push(FtgsRecord {
                    field: field.clone(),
                    term: entry.term,
                    stats: entry.stats,
                });
            }
        }
        Ok(Self {
            records,
            pos: 0,
            num_stats,
            closed: false,
        })
    }

    fn current(&self) -> Option<&FtgsRecord> {
        if self.pos == 0 {
            None
        } else {
            self.records.get(self.pos - 1)
        }
    }
}

impl FtgsSource for TopTerms {
    fn num_stats(&self) -> usize {
        self.num_stats
    }

    fn next_term(&mut self) -> Result<bool> {
        if self.closed || self.pos >= self.records.len() {
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
        self.closed = true;
        self.records.clear();
    }
}
