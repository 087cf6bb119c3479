//! # FTGS sources
//!
//! The capability interface the merge network consumes: a pull-driven
//! stream of `(field, term)` records with an attached stat vector, plus the
//! per-query parameters (`FtgsParams`) that select ordering and post-filter
//! behavior. Producers are opaque here; a source may be a local computation
//! or a decoder over a remote byte stream.

use crate::error::{QueryError, Result};
use crate::merge::{TermLimited, TopTerms};
use crate::model::TermValue;
use serde::{Deserialize, Serialize};

/// Pull-driven stream of FTGS records for one source.
///
/// `field`, `term`, and `group_stats` are only meaningful after `next_term`
/// has returned `true` and before it returns `false`. Within one source a
/// `(field, term)` pair never repeats; a sorted source is strictly
/// increasing by `(field, term)`.
pub trait FtgsSource: Send {
    /// Length of the stat vector attached to every record.
    fn num_stats(&self) -> usize;

    /// Advance to the next record. `Ok(false)` once the source is drained.
    fn next_term(&mut self) -> Result<bool>;

    fn field(&self) -> &str;

    fn term(&self) -> &TermValue;

    /// Copy the current record's stat vector into `out`, which must hold
    /// exactly `num_stats` slots.
    fn group_stats(&self, out: &mut [f64]);

    /// Release underlying resources. Idempotent; also invoked from `Drop`
    /// by every implementation in this crate, so abandoning a stream
    /// mid-iteration still propagates the close downstream.
    fn close(&mut self);
}

impl std::fmt::Debug for dyn FtgsSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FtgsSource")
            .field("field", &self.field())
            .field("num_stats", &self.num_stats())
            .finish()
    }
}

/// Parameters of one FTGS aggregate query: ordering preference, term limit,
/// and the optional ranking stat.
///
/// Filter selection is purely: `sort_stat >= 0 && term_limit > 0` means
/// top-K by stat; `sort_stat < 0 && term_limit > 0` means plain term limit;
/// `term_limit == 0` means no filter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FtgsParams {
    term_limit: i64,
    sort_stat: i32,
    sorted: bool,
}

impl FtgsParams {
    /// Rejects a negative term limit before any remote work is issued.
    pub fn new(term_limit: i64, sort_stat: i32, sorted: bool) -> Result<Self> {
        if term_limit < 0 {
            return Err(QueryError::InvalidConfiguration(format!(
                "term limit must be non-negative, got {term_limit}"
            )));
        }
        Ok(Self {
            term_limit,
            sort_stat,
            sorted,
        })
    }

    /// No term limit, no ranking stat.
    pub fn unlimited(sorted: bool) -> Self {
        Self {
            term_limit: 0,
            sort_stat: -1,
            sorted,
        }
    }

    pub fn term_limit(&self) -> i64 {
        self.term_limit
    }

    pub fn sort_stat(&self) -> i32 {
        self.sort_stat
    }

    pub fn sorted(&self) -> bool {
        self.sorted
    }

    pub fn is_top_terms(&self) -> bool {
        self.sort_stat >= 0 && self.term_limit > 0
    }

    pub fn is_term_limit(&self) -> bool {
        self.sort_stat < 0 && self.term_limit > 0
    }

    pub fn sorted_copy(&self) -> Self {
        Self {
            sorted: true,
            ..self.clone()
        }
    }

    pub fn unsorted_copy(&self) -> Self {
        Self {
            sorted: false,
            ..self.clone()
        }
    }

    pub fn unlimited_copy(&self) -> Self {
        Self {
            term_limit: 0,
            sort_stat: -1,
            sorted: self.sorted,
        }
    }

    /// Apply the selected post-filter to a merged stream.
    pub fn wrap(&self, source: Box<dyn FtgsSource>) -> Result<Box<dyn FtgsSource>> {
        if self.term_limit > 0 {
            if self.sort_stat >= 0 {
                let top = TopTerms::build(source, self.term_limit as u64, self.sort_stat as usize)?;
                Ok(Box::new(top))
            } else {
                Ok(Box::new(TermLimited::new(source, self.term_limit as u64)))
            }
        } else {
            Ok(source)
        }
    }
}
