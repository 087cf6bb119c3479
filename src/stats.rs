//! # Group-Stat Streams
//!
//! Decoding of per-group aggregate sequences from remote byte streams and
//! the elementwise combiner over several such sequences. Group index `i`
//! denotes the same semantic partition across every source being combined;
//! that identity is established upstream and only length equality is
//! verified here.

use crate::error::{QueryError, Result};
use std::io::Read;
use tracing::warn;

/// Forward-only sequence of one scalar per group.
///
/// `next` is only valid while `has_next` is true. `close` is idempotent and
/// also runs on drop.
pub trait GroupStatsSource: Send {
    /// Number of groups; fixed at stream-open time.
    fn group_count(&self) -> usize;

    fn has_next(&self) -> bool;

    fn next(&mut self) -> Result<i64>;

    fn close(&mut self);
}

impl std::fmt::Debug for dyn GroupStatsSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupStatsSource")
            .field("group_count", &self.group_count())
            .finish()
    }
}

/// Decodes exactly `count` big-endian `i64` values from a byte transport.
///
/// When built with `exhaust`, `close` first drains any remaining elements:
/// a blocking peer stalls writing into a full buffer unless the remainder
/// is read, so releasing the transport without draining can deadlock the
/// producer. A short or corrupt read invalidates the stream for good.
pub struct GroupStatsStreamReader<R: Read + Send> {
    stream: Option<R>,
    count: usize,
    index: usize,
    exhaust: bool,
}

impl<R: Read + Send> GroupStatsStreamReader<R> {
    pub fn new(stream: R, count: usize, exhaust: bool) -> Self {
        Self {
            stream: Some(stream),
            count,
            index: 0,
            exhaust,
        }
    }

    /// Drain-if-required, then release the transport.
    fn release(&mut self) {
        if self.exhaust {
            while self.has_next() {
                if let Err(err) = self.next() {
                    warn!("drain of group-stat stream failed: {err}");
                    break;
                }
            }
        }
        self.stream = None;
    }
}

impl<R: Read + Send> GroupStatsSource for GroupStatsStreamReader<R> {
    fn group_count(&self) -> usize {
        self.count
    }

    fn has_next(&self) -> bool {
        self.stream.is_some() && self.index < self.count
    }

    fn next(&mut self) -> Result<i64> {
        let Some(stream) = self.stream.as_mut() else {
            return Err(QueryError::StreamDecode(
                "group-stat stream already released".to_string(),
            ));
        };
        if self.index >= self.count {
            return Err(QueryError::StreamDecode(format!(
                "read past the declared group count {}",
                self.count
            )));
        }
        let mut buf = [0u8; 8];
        match stream.read_exact(&mut buf) {
            Ok(()) => {
                self.index += 1;
                Ok(i64::from_be_bytes(buf))
            }
            Err(err) => {
                self.stream = None;
                Err(QueryError::StreamDecode(format!(
                    "short read at group {} of {}: {err}",
                    self.index, self.count
                )))
            }
        }
    }

    fn close(&mut self) {
        self.release();
    }
}

impl<R: Read + Send> Drop for GroupStatsStreamReader<R> {
    fn drop(&mut self) {
        self.release();
    }
}

/// Elementwise sum over K group-stat sources sharing one group space.
///
/// Group counts are checked at construction, before any element is
/// combined; on mismatch every source is closed and the combiner is never
/// built.
#[derive(Debug)]
pub struct GroupStatsCombiner {
    sources: Vec<Box<dyn GroupStatsSource>>,
    count: usize,
    closed: bool,
}

impl GroupStatsCombiner {
    pub fn new(mut sources: Vec<Box<dyn GroupStatsSource>>) -> Result<Self> {
        let Some(first) = sources.first() else {
            return Err(QueryError::InvalidConfiguration(
                "at least one group-stat source is required".to_string(),
            ));
        };
        let expected = first.group_count();
        if let Some(bad) = sources.iter().find(|s| s.group_count() != expected) {
            let actual = bad.group_count();
            for source in &mut sources {
                source.close();
            }
            return Err(QueryError::GroupCountMismatch { expected, actual });
        }
        Ok(Self {
            sources,
            count: expected,
            closed: false,
        })
    }
}

impl GroupStatsSource for GroupStatsCombiner {
    fn group_count(&self) -> usize {
        self.count
    }

    fn has_next(&self) -> bool {
        !self.closed && self.sources.iter().all(|s| s.has_next())
    }

    fn next(&mut self) -> Result<i64> {
        let mut sum = 0i64;
        for source in &mut self.sources {
            sum += source.next()?;
        }
        Ok(sum)
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            for source in &mut self.sources {
                source.close();
            }
        }
    }
}

impl Drop for GroupStatsCombiner {
    fn drop(&mut self) {
        self.close();
    }
}

/// Pull a source to completion into an owned vector, closing it after.
pub fn materialize(mut source: Box<dyn GroupStatsSource>) -> Result<Vec<i64>> {
    let mut out = Vec::with_capacity(source.group_count());
    while source.has_next() {
        out.push(source.next()?);
    }
    source.close();
    Ok(out)
}
