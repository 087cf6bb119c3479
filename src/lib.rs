//! # Strata
//!
//! Query-execution core for a distributed, time-sharded analytics engine.
//!
//! For every `(field, term)` in a requested column and every group in a
//! partition of rows, this crate answers "what is the aggregated statistic?"
//! across data spread over many nodes and many time-partitioned shards. It
//! provides a concurrent interval index for resolving which shards a time
//! range touches, a streaming merge network over per-node FTGS result
//! streams, group-stat stream decoding and combining, and a fan-out/gather
//! coordinator with all-or-nothing failure semantics.
//!
//! Shard storage, wire formats, and session lifecycle live in external
//! collaborators; they plug in through the [`coordinator::RemoteCall`],
//! [`ftgs::FtgsSource`], and [`stats::GroupStatsSource`] capabilities.

pub mod catalog;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod ftgs;
pub mod interval_index;
pub mod merge;
pub mod model;
pub mod stats;
pub mod test_support;

// Re-export main types for convenience
pub use catalog::ShardCatalog;
pub use config::{EngineConfig, FanoutConfig, QueryDefaults};
pub use coordinator::{Coordinator, FtgsRequest, RemoteCall, RemoteSession, SessionField};
pub use error::{QueryError, Result};
pub use ftgs::{FtgsParams, FtgsSource};
pub use interval_index::IntervalIndex;
pub use model::{FtgsRecord, NodeAddr, ShardId, ShardInfo, TermValue};
pub use stats::{GroupStatsCombiner, GroupStatsSource, GroupStatsStreamReader};
