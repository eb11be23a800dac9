//! Double-buffered literal search over an arbitrary [`ByteSource`].
//!
//! Two pooled buffers of `max(pattern_len, chunk_len)` bytes slide over the
//! stream as one virtual ring: the cursor walks the older buffer and
//! comparisons wrap transparently into the newer one; when the older buffer
//! is fully consumed it is refilled with the next chunk and becomes the
//! newest. Memory stays at two buffers regardless of stream length or scan
//! range. Buffers return to the pool and the stream position is restored on
//! every exit path.

use std::io::SeekFrom;
use std::ops::Range;

use tracing::trace;

use crate::errors::CarveResult;
use crate::pool::{self, PooledBuf};
use crate::source::{fill, ByteSource};

use super::validate_max_count;

/// Lazy, ascending, non-overlapping occurrences of a pattern in a stream.
///
/// Yields `CarveResult<u64>`: an `Err` item reports an I/O failure
/// mid-scan, after which the iterator is exhausted.
pub struct StreamMatches<'a> {
    source: &'a mut dyn ByteSource,
    pattern: &'a [u8],
    bufs: [PooledBuf; 2],
    buf_len: usize,
    base: [u64; 2],
    valid: [usize; 2],
    /// Index of the older buffer (the one the next refill overwrites).
    older: usize,
    /// Absolute position of the search cursor.
    pos: u64,
    high: u64,
    remaining: Option<usize>,
    saved_pos: u64,
    done: bool,
}

impl<'a> StreamMatches<'a> {
    /// Starts a scan over `range` with the given chunk length. The two
    /// working buffers are sized `max(pattern.len(), chunk_len)`.
    pub fn new(
        source: &'a mut dyn ByteSource,
        pattern: &'a [u8],
        range: Range<u64>,
        chunk_len: usize,
        max_count: Option<usize>,
    ) -> CarveResult<Self> {
        validate_max_count(max_count)?;
        let buf_len = chunk_len.max(pattern.len()).max(1);
        let saved_pos = source.stream_position()?;
        let low = range.start;
        let high = range.end;

        let mut matches = Self {
            source,
            pattern,
            bufs: [pool::acquire(buf_len), pool::acquire(buf_len)],
            buf_len,
            base: [low, low],
            valid: [0, 0],
            older: 1,
            pos: low,
            high,
            remaining: max_count,
            saved_pos,
            done: pattern.is_empty() || low >= high,
        };
        if !matches.done {
            // Prime both halves of the ring. A short first read just means
            // the stream ends inside the first chunk.
            matches.refill()?;
            matches.refill()?;
        }
        Ok(matches)
    }

    fn newer(&self) -> usize {
        1 - self.older
    }

    /// One past the last loaded absolute offset.
    fn window_end(&self) -> u64 {
        self.base[self.newer()] + self.valid[self.newer()] as u64
    }

    /// Refills the older buffer with the next chunk and promotes it to
    /// newest. Returns the number of bytes read; 0 means exhaustion.
    fn refill(&mut self) -> CarveResult<usize> {
        let start = self.window_end();
        let want = self
            .buf_len
            .min(self.high.saturating_sub(start).min(usize::MAX as u64) as usize);
        if want == 0 {
            return Ok(0);
        }
        let older = self.older;
        self.source.seek(SeekFrom::Start(start))?;
        let read = fill(self.source, &mut self.bufs[older][..want])?;
        trace!(
            "refilled buffer {} at offset {} with {} bytes",
            older,
            start,
            read
        );
        self.base[older] = start;
        self.valid[older] = read;
        self.older = 1 - older;
        Ok(read)
    }

    /// Byte at absolute offset `abs`, wherever it lives in the ring.
    fn byte_at(&self, abs: u64) -> u8 {
        let newer = self.newer();
        let i = if abs >= self.base[newer] {
            newer
        } else {
            self.older
        };
        self.bufs[i][(abs - self.base[i]) as usize]
    }

    /// Compares the pattern-length window at `abs`, wrapping across the
    /// buffer boundary when the window straddles it.
    fn matches_at(&self, abs: u64) -> bool {
        self.pattern
            .iter()
            .enumerate()
            .all(|(j, &b)| self.byte_at(abs + j as u64) == b)
    }
}

impl Iterator for StreamMatches<'_> {
    type Item = CarveResult<u64>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let window = self.pattern.len() as u64;
        loop {
            if self.remaining == Some(0) {
                self.done = true;
                return None;
            }
            // Next full window would exceed the requested upper bound.
            if self.pos + window > self.high {
                self.done = true;
                return None;
            }
            while self.pos + window > self.window_end() {
                match self.refill() {
                    Ok(0) => {
                        self.done = true;
                        return None;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        self.done = true;
                        return Some(Err(e));
                    }
                }
            }
            if self.matches_at(self.pos) {
                let hit = self.pos;
                self.pos += window;
                if let Some(n) = self.remaining.as_mut() {
                    *n -= 1;
                }
                return Some(Ok(hit));
            }
            self.pos += 1;
        }
    }
}

impl Drop for StreamMatches<'_> {
    fn drop(&mut self) {
        // Pooled buffers return themselves; the stream goes back to where
        // the caller left it.
        let _ = self.source.seek(SeekFrom::Start(self.saved_pos));
    }
}

const DEFAULT_CHUNK_LEN: usize = pool::DEFAULT_BUFFER_LEN;

/// All occurrence start positions in `range`, ascending.
pub fn find_all(
    source: &mut dyn ByteSource,
    pattern: &[u8],
    range: Range<u64>,
    max_count: Option<usize>,
) -> CarveResult<Vec<u64>> {
    StreamMatches::new(source, pattern, range, DEFAULT_CHUNK_LEN, max_count)?.collect()
}

/// The first occurrence at or after `range.start`, if any.
pub fn find_first(
    source: &mut dyn ByteSource,
    pattern: &[u8],
    range: Range<u64>,
) -> CarveResult<Option<u64>> {
    StreamMatches::new(source, pattern, range, DEFAULT_CHUNK_LEN, None)?
        .next()
        .transpose()
}

/// The last occurrence of the non-overlapping sequence, if any.
pub fn find_last(
    source: &mut dyn ByteSource,
    pattern: &[u8],
    range: Range<u64>,
) -> CarveResult<Option<u64>> {
    let mut last = None;
    for hit in StreamMatches::new(source, pattern, range, DEFAULT_CHUNK_LEN, None)? {
        last = Some(hit?);
    }
    Ok(last)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::CarveError;
    use crate::source::MemorySource;
    use std::io::Seek;

    fn scan(bytes: &[u8], pattern: &[u8], chunk_len: usize) -> Vec<u64> {
        let mut source = MemorySource::from_vec(bytes.to_vec());
        StreamMatches::new(&mut source, pattern, 0..bytes.len() as u64, chunk_len, None)
            .unwrap()
            .collect::<CarveResult<Vec<u64>>>()
            .unwrap()
    }

    #[test]
    fn test_non_overlapping_advancement() {
        assert_eq!(scan(b"aaaa", b"aa", 64), vec![0, 2]);
        assert_eq!(scan(b"aaaa", b"aaa", 64), vec![0]);
    }

    #[test]
    fn test_pattern_straddling_buffer_boundary() {
        // chunk_len 4 with an 3-byte pattern crossing offsets 3..6 forces a
        // window that straddles the two buffers (buffer size below twice
        // the pattern length).
        let bytes = b"...XYZ..";
        assert_eq!(scan(bytes, b"XYZ", 4), vec![3]);

        // Straddles at several alignments of a longer stream.
        let mut data = vec![b'.'; 64];
        for start in [2usize, 5, 10, 13] {
            data[start..start + 3].copy_from_slice(b"SIG");
        }
        assert_eq!(scan(&data, b"SIG", 4), vec![2, 5, 10, 13]);
        assert_eq!(
            crate::search::memory::find_in(&data, b"SIG", 0..64, None).unwrap(),
            vec![2, 5, 10, 13]
        );
    }

    #[test]
    fn test_chunk_smaller_than_pattern_is_widened() {
        let bytes = b"....LONGPATTERN....LONGPATTERN";
        assert_eq!(scan(bytes, b"LONGPATTERN", 2), vec![4, 19]);
    }

    #[test]
    fn test_range_bounds() {
        let bytes = b"XX..XX..XX";
        let mut source = MemorySource::from_vec(bytes.to_vec());
        assert_eq!(
            find_all(&mut source, b"XX", 1..10, None).unwrap(),
            vec![4, 8]
        );
        // A window ending past `high` is not a hit.
        assert_eq!(find_all(&mut source, b"XX", 0..9, None).unwrap(), vec![0, 4]);
    }

    #[test]
    fn test_max_count_and_first_last() {
        let bytes = b"ab.ab.ab.ab";
        let mut source = MemorySource::from_vec(bytes.to_vec());

        let capped = find_all(&mut source, b"ab", 0..11, Some(2)).unwrap();
        assert_eq!(capped, vec![0, 3]);

        assert_eq!(find_first(&mut source, b"ab", 0..11).unwrap(), Some(0));
        assert_eq!(find_last(&mut source, b"ab", 0..11).unwrap(), Some(9));

        let err = find_all(&mut source, b"ab", 0..11, Some(0)).unwrap_err();
        assert!(matches!(err, CarveError::InvalidCapacity(0)));
    }

    #[test]
    fn test_stream_position_restored() {
        let mut source = MemorySource::from_vec(b"..ab..ab..".to_vec());
        source.seek(SeekFrom::Start(5)).unwrap();
        {
            let mut matches =
                StreamMatches::new(&mut source, b"ab", 0..10, 4, None).unwrap();
            assert_eq!(matches.next().unwrap().unwrap(), 2);
            // Dropped mid-scan without exhausting.
        }
        assert_eq!(source.stream_position().unwrap(), 5);
    }

    #[test]
    fn test_scan_past_end_of_stream() {
        // The requested range extends far beyond the data; exhaustion (a
        // zero-byte read) ends the scan cleanly.
        let mut source = MemorySource::from_vec(b"..ab".to_vec());
        assert_eq!(
            find_all(&mut source, b"ab", 0..1_000_000, None).unwrap(),
            vec![2]
        );
    }
}
