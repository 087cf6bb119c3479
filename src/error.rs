//! Error types for the query-execution core.
//!
//! Every failure in an aggregate operation surfaces as exactly one terminal
//! error; nothing is retried or swallowed internally. Whether a failure is
//! transient is unknowable at this layer, so retry policy belongs to callers.

use crate::model::NodeAddr;
use std::fmt;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, QueryError>;

/// Terminal error for a query-core operation.
#[derive(Debug)]
pub enum QueryError {
    /// One of the parallel fan-out calls failed (network error, remote
    /// out-of-memory, worker panic). The whole aggregate operation aborts.
    RemoteCall { node: NodeAddr, message: String },
    /// Short or corrupt read while decoding a remote result stream. The
    /// stream is invalid from this point on.
    StreamDecode(String),
    /// Combiner inputs disagree on group count; detected before any element
    /// is combined.
    GroupCountMismatch { expected: usize, actual: usize },
    /// Rejected at construction time, before any remote work is issued.
    InvalidConfiguration(String),
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryError::RemoteCall { node, message } => {
                write!(f, "remote call to {node} failed: {message}")
            }
            QueryError::StreamDecode(message) => {
                write!(f, "stream decode failed: {message}")
            }
            QueryError::GroupCountMismatch { expected, actual } => {
                write!(
                    f,
                    "group count mismatch: expected {expected} groups, got {actual}"
                )
            }
            QueryError::InvalidConfiguration(message) => {
                write!(f, "invalid configuration: {message}")
            }
        }
    }
}

impl std::error::Error for QueryError {}
