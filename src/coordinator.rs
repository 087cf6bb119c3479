//! # Fan-Out/Gather Coordinator
//!
//! Issues one parallel remote call per distinct node referenced by the
//! participating sessions, collects the opened result streams, and hands
//! them to the merge network. Failure of any single call closes every
//! stream already opened by the other calls and propagates the first
//! failure; a partial aggregate is never returned.
//!
//! The coordinator is the only point of true parallelism in this core: one
//! worker thread per remote call, joined at a barrier. Once the merged
//! stream is handed back, everything downstream is pull-driven and
//! sequential.

use crate::config::EngineConfig;
use crate::error::{QueryError, Result};
use crate::ftgs::{FtgsParams, FtgsSource};
use crate::merge::{DisjointMerger, SortedMerger, UnsortedChain};
use crate::model::{NodeAddr, TermValue};
use crate::stats::{GroupStatsCombiner, GroupStatsSource};
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tracing::{debug, warn};

/// Handle to one open remote session: an id and the nodes its shards live
/// on. Session lifecycle (open/auth/close) is owned by an external client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteSession {
    pub session_id: String,
    pub nodes: Vec<NodeAddr>,
}

impl RemoteSession {
    pub fn new(session_id: impl Into<String>, nodes: Vec<NodeAddr>) -> Self {
        Self {
            session_id: session_id.into(),
            nodes,
        }
    }
}

/// One participant of a multi-session aggregate: a session and the field to
/// stream from it.
#[derive(Debug, Clone)]
pub struct SessionField {
    pub session: Arc<RemoteSession>,
    pub field: String,
}

impl SessionField {
    pub fn new(session: Arc<RemoteSession>, field: impl Into<String>) -> Self {
        Self {
            session,
            field: field.into(),
        }
    }
}

/// Per-session slice of a request descriptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub field: String,
    pub nodes: Vec<NodeAddr>,
}

/// Opaque-to-transport request descriptor sent to every node of a fan-out.
/// All fields except `split_index` are identical across the M requests of
/// one aggregate call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FtgsRequest {
    pub session_infos: Vec<SessionInfo>,
    /// Aggregate expressions to evaluate per term, one stat slot each.
    pub selects: Vec<String>,
    /// Filter expressions restricting which terms are streamed.
    pub filters: Vec<String>,
    pub is_int_field: bool,
    pub params: FtgsParams,
    pub split_index: usize,
    pub num_splits: usize,
    /// Advisory timeout for the transport; a timeout surfaces as a failed
    /// remote call.
    pub timeout_secs: u64,
}

/// The remote-call capability. Implementations own wire format, connection
/// lifecycle, and timeouts; a failed call of any kind surfaces here as an
/// error and aborts the whole aggregate operation.
pub trait RemoteCall: Send + Sync {
    fn ftgs_split(
        &self,
        node: &NodeAddr,
        request: &FtgsRequest,
    ) -> anyhow::Result<Box<dyn FtgsSource>>;

    fn distinct_split(
        &self,
        node: &NodeAddr,
        request: &FtgsRequest,
    ) -> anyhow::Result<Box<dyn GroupStatsSource>>;
}

/// Deterministic term-to-split routing. Every worker computes this for the
/// same logical query, which is what makes per-split streams disjoint.
pub fn split_for_term(is_int_field: bool, term: &TermValue, num_splits: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    is_int_field.hash(&mut hasher);
    term.hash(&mut hasher);
    (hasher.finish() as usize) % num_splits.max(1)
}

/// Fan-out/gather coordinator over an abstract transport.
pub struct Coordinator {
    transport: Arc<dyn RemoteCall>,
    config: EngineConfig,
}

impl Coordinator {
    pub fn new(transport: Arc<dyn RemoteCall>) -> Self {
        Self::with_config(transport, EngineConfig::default())
    }

    pub fn with_config(transport: Arc<dyn RemoteCall>, config: EngineConfig) -> Self {
        Self { transport, config }
    }

    /// Merged FTGS stream over several sessions that may share terms.
    ///
    /// One split per distinct node across all participating sessions; the
    /// per-split streams are interleaved with the overlapping-term merger
    /// (sorted or unsorted per `params`) and then post-filtered.
    pub fn multi_ftgs(
        &self,
        participants: &[SessionField],
        selects: Vec<String>,
        filters: Vec<String>,
        is_int_field: bool,
        params: FtgsParams,
    ) -> Result<Box<dyn FtgsSource>> {
        let nodes = collect_nodes(participants)?;
        let session_infos = session_infos(participants);

        // Per-split ordering is wasted work when top-K re-sorts anyway.
        let split_params = if params.is_top_terms() {
            params.unsorted_copy()
        } else {
            params.clone()
        };
        let base = FtgsRequest {
            session_infos,
            selects,
            filters,
            is_int_field,
            params: split_params,
            split_index: 0,
            num_splits: nodes.len(),
            timeout_secs: self.config.fanout.request_timeout_secs,
        };

        debug!(splits = nodes.len(), "issuing multi-session ftgs fan-out");
        let mut streams = self.open_ftgs_splits(&nodes, &base)?;

        let merged: Box<dyn FtgsSource> = if streams.len() == 1 {
            let Some(single) = streams.pop() else {
                return Err(QueryError::InvalidConfiguration(
                    "fan-out yielded no streams".to_string(),
                ));
            };
            single
        } else if base.params.sorted() {
            Box::new(SortedMerger::new(streams)?)
        } else {
            Box::new(UnsortedChain::new(streams)?)
        };
        params.wrap(merged)
    }

    /// Merged FTGS stream for one session's field.
    ///
    /// Each node serves one hash-split of the term space, so the per-split
    /// streams are disjoint by construction and the cheaper selection merge
    /// applies.
    pub fn session_ftgs(
        &self,
        session: &Arc<RemoteSession>,
        field: impl Into<String>,
        is_int_field: bool,
        params: FtgsParams,
    ) -> Result<Box<dyn FtgsSource>> {
        let participant = SessionField::new(Arc::clone(session), field);
        let nodes = collect_nodes(std::slice::from_ref(&participant))?;
        let base = FtgsRequest {
            session_infos: session_infos(std::slice::from_ref(&participant)),
            selects: Vec::new(),
            filters: Vec::new(),
            is_int_field,
            params: if params.is_top_terms() {
                params.unsorted_copy()
            } else {
                params.clone()
            },
            split_index: 0,
            num_splits: nodes.len(),
            timeout_secs: self.config.fanout.request_timeout_secs,
        };

        debug!(splits = nodes.len(), "issuing session ftgs fan-out");
        let mut streams = self.open_ftgs_splits(&nodes, &base)?;

        let merged: Box<dyn FtgsSource> = if streams.len() == 1 {
            let Some(single) = streams.pop() else {
                return Err(QueryError::InvalidConfiguration(
                    "fan-out yielded no streams".to_string(),
                ));
            };
            single
        } else if base.params.sorted() {
            Box::new(DisjointMerger::new(streams)?)
        } else {
            Box::new(UnsortedChain::new(streams)?)
        };
        params.wrap(merged)
    }

    /// Distinct-count style aggregate: one group-stat stream per node,
    /// combined elementwise.
    pub fn aggregate_distinct(
        &self,
        participants: &[SessionField],
        filters: Vec<String>,
        is_int_field: bool,
    ) -> Result<Box<dyn GroupStatsSource>> {
        let nodes = collect_nodes(participants)?;
        let base = FtgsRequest {
            session_infos: session_infos(participants),
            selects: Vec::new(),
            filters,
            is_int_field,
            params: FtgsParams::unlimited(false),
            split_index: 0,
            num_splits: nodes.len(),
            timeout_secs: self.config.fanout.request_timeout_secs,
        };

        debug!(splits = nodes.len(), "issuing distinct fan-out");
        let mut streams = self.open_distinct_splits(&nodes, &base)?;

        if streams.len() == 1 {
            let Some(single) = streams.pop() else {
                return Err(QueryError::InvalidConfiguration(
                    "fan-out yielded no streams".to_string(),
                ));
            };
            return Ok(single);
        }
        Ok(Box::new(GroupStatsCombiner::new(streams)?))
    }

    /// Issue one `ftgs_split` call per node, all-or-nothing.
    fn open_ftgs_splits(
        &self,
        nodes: &[NodeAddr],
        base: &FtgsRequest,
    ) -> Result<Vec<Box<dyn FtgsSource>>> {
        let mut slots: Vec<Option<Box<dyn FtgsSource>>> = (0..nodes.len()).map(|_| None).collect();
        let mut first_err: Option<QueryError> = None;

        for wave in split_indices(nodes.len(), self.config.fanout.max_parallel_requests) {
            let mut handles = Vec::with_capacity(wave.len());
            for idx in wave {
                let transport = Arc::clone(&self.transport);
                let node = nodes[idx].clone();
                let mut request = base.clone();
                request.split_index = idx;
                let worker_node = node.clone();
                handles.push((
                    idx,
                    node,
                    std::thread::spawn(move || transport.ftgs_split(&worker_node, &request)),
                ));
            }
            for (idx, node, handle) in handles {
                match handle.join() {
                    Ok(Ok(stream)) => slots[idx] = Some(stream),
                    Ok(Err(err)) => {
                        warn!(node = %node, "ftgs split failed: {err:#}");
                        if first_err.is_none() {
                            first_err = Some(QueryError::RemoteCall {
                                node,
                                message: format!("{err:#}"),
                            });
                        }
                    }
                    Err(_) => {
                        if first_err.is_none() {
                            first_err = Some(QueryError::RemoteCall {
                                node,
                                message: "fan-out worker panicked".to_string(),
                            });
                        }
                    }
                }
            }
            if first_err.is_some() {
                break;
            }
        }

        if let Some(err) = first_err {
            for slot in &mut slots {
                if let Some(stream) = slot {
                    stream.close();
                }
            }
            return Err(err);
        }
        Ok(slots.into_iter().flatten().collect())
    }

    /// Issue one `distinct_split` call per node, all-or-nothing.
    fn open_distinct_splits(
        &self,
        nodes: &[NodeAddr],
        base: &FtgsRequest,
    ) -> Result<Vec<Box<dyn GroupStatsSource>>> {
        let mut slots: Vec<Option<Box<dyn GroupStatsSource>>> =
            (0..nodes.len()).map(|_| None).collect();
        let mut first_err: Option<QueryError> = None;

        for wave in split_indices(nodes.len(), self.config.fanout.max_parallel_requests) {
            let mut handles = Vec::with_capacity(wave.len());
            for idx in wave {
                let transport = Arc::clone(&self.transport);
                let node = nodes[idx].clone();
                let mut request = base.clone();
                request.split_index = idx;
                let worker_node = node.clone();
                handles.push((
                    idx,
                    node,
                    std::thread::spawn(move || transport.distinct_split(&worker_node, &request)),
                ));
            }
            for (idx, node, handle) in handles {
                match handle.join() {
                    Ok(Ok(stream)) => slots[idx] = Some(stream),
                    Ok(Err(err)) => {
                        warn!(node = %node, "distinct split failed: {err:#}");
                        if first_err.is_none() {
                            first_err = Some(QueryError::RemoteCall {
                                node,
                                message: format!("{err:#}"),
                            });
                        }
                    }
                    Err(_) => {
                        if first_err.is_none() {
                            first_err = Some(QueryError::RemoteCall {
                                node,
                                message: "fan-out worker panicked".to_string(),
                            });
                        }
                    }
                }
            }
            if first_err.is_some() {
                break;
            }
        }

        if let Some(err) = first_err {
            for slot in &mut slots {
                if let Some(stream) = slot {
                    stream.close();
                }
            }
            return Err(err);
        }
        Ok(slots.into_iter().flatten().collect())
    }
}

/// Union of all distinct node addresses across the participants, in stable
/// first-seen order; the position in the result is the node's split index.
fn collect_nodes(participants: &[SessionField]) -> Result<Vec<NodeAddr>> {
    if participants.is_empty() {
        return Err(QueryError::InvalidConfiguration(
            "at least one session/field participant is required".to_string(),
        ));
    }
    let mut seen = FxHashSet::default();
    let mut nodes = Vec::new();
    for participant in participants {
        for node in &participant.session.nodes {
            if seen.insert(node.clone()) {
                nodes.push(node.clone());
            }
        }
    }
    if nodes.is_empty() {
        return Err(QueryError::InvalidConfiguration(
            "participants reference no remote nodes".to_string(),
        ));
    }
    Ok(nodes)
}

fn session_infos(participants: &[SessionField]) -> Vec<SessionInfo> {
    participants
        .iter()
        .map(|participant| SessionInfo {
            session_id: participant.session.session_id.clone(),
            field: participant.field.clone(),
            nodes: participant.session.nodes.clone(),
        })
        .collect()
}

/// Waves of split indices: one wave per `limit` nodes, or a single wave of
/// all of them when the limit is zero (one thread per node).
fn split_indices(total: usize, limit: usize) -> Vec<Vec<usize>> {
    let wave_size = if limit == 0 { total.max(1) } else { limit };
    (0..total)
        .collect::<Vec<_>>()
        .chunks(wave_size)
        .map(|chunk| chunk.to_vec())
        .collect()
}
