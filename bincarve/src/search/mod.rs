//! Literal byte-sequence search.
//!
//! Two surfaces share one semantics: given a pattern and a half-open range
//! `[low, high)` of candidate start positions, produce the ascending
//! sequence of non-overlapping occurrences — after a hit at `p` the scan
//! resumes at `p + pattern.len()`, after a miss it advances by 1. A
//! candidate only counts when its full window fits below `high`.
//! Enumeration is lazy; `max_count` (when given, at least 1) truncates the
//! sequence after that many hits.
//!
//! [`memory`] scans a contiguous buffer; [`stream`] scans any [`ByteSource`]
//! with two pooled buffers of constant size, so ranges far larger than
//! available memory stay cheap.
//!
//! [`ByteSource`]: crate::source::ByteSource

pub mod memory;
pub mod stream;

pub use memory::{find_first_in, find_in, find_last_in, MemoryMatches};
pub use stream::{find_all, find_first, find_last, StreamMatches};

use crate::errors::{CarveError, CarveResult};

/// Rejects `max_count == 0`; partial work never starts on a capacity error.
pub(crate) fn validate_max_count(max_count: Option<usize>) -> CarveResult<()> {
    if max_count == Some(0) {
        return Err(CarveError::InvalidCapacity(0));
    }
    Ok(())
}
