//! # Data Model
//!
//! Core identifiers and record types shared across the query core: shard and
//! node identities, field terms, and the FTGS (field, term, group-stats)
//! record that the merge network streams.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Compact identifier for a shard within a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ShardId(pub u32);

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S{}", self.0)
    }
}

/// Address of a remote worker node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeAddr {
    pub host: String,
    pub port: u16,
}

impl NodeAddr {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for NodeAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// A distinct value occurring in a column.
///
/// A field holds terms of exactly one kind; the derived ordering (int terms
/// numerically, string terms bytewise) is what the sorted merge relies on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TermValue {
    Int(i64),
    Str(Vec<u8>),
}

impl From<i64> for TermValue {
    fn from(value: i64) -> Self {
        TermValue::Int(value)
    }
}

impl From<&str> for TermValue {
    fn from(value: &str) -> Self {
        TermValue::Str(value.as_bytes().to_vec())
    }
}

impl fmt::Display for TermValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TermValue::Int(value) => write!(f, "{value}"),
            TermValue::Str(bytes) => write!(f, "{}", String::from_utf8_lossy(bytes)),
        }
    }
}

/// One streamed merge-network record: a `(field, term)` pair and its stat
/// vector. Slot `i` of `stats` denotes the same semantic group/stat slot in
/// every stream of a query; that identity is established upstream and
/// trusted here.
#[derive(Debug, Clone, PartialEq)]
pub struct FtgsRecord {
    pub field: String,
    pub term: TermValue,
    pub stats: Vec<f64>,
}

impl FtgsRecord {
    pub fn new(field: impl Into<String>, term: impl Into<TermValue>, stats: Vec<f64>) -> Self {
        Self {
            field: field.into(),
            term: term.into(),
            stats,
        }
    }

    /// Sort key used wherever records are ordered: field first, then term.
    pub fn sort_key(&self) -> (&str, &TermValue) {
        (self.field.as_str(), &self.term)
    }
}

/// Metadata for one time-partitioned shard as tracked by the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardInfo {
    pub id: ShardId,
    /// Inclusive start of the covered time range (epoch seconds).
    pub start: i64,
    /// Inclusive end of the covered time range (epoch seconds).
    pub end: i64,
    /// Monotonic build version; newer versions replace older ones.
    pub version: u64,
    pub num_docs: u64,
}

impl ShardInfo {
    pub fn new(id: ShardId, start: i64, end: i64, version: u64, num_docs: u64) -> Self {
        Self {
            id,
            start,
            end,
            version,
            num_docs,
        }
    }
}
