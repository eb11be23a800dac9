//! In-memory literal search over a contiguous byte region.

use memchr::memmem;
use std::ops::Range;

use crate::errors::CarveResult;

use super::validate_max_count;

/// Lazy, ascending, non-overlapping occurrences of a pattern in a buffer.
pub struct MemoryMatches<'h, 'p> {
    iter: memmem::FindIter<'h, 'p>,
    low: usize,
    remaining: Option<usize>,
}

impl<'h, 'p> MemoryMatches<'h, 'p> {
    pub fn new(
        haystack: &'h [u8],
        pattern: &'p [u8],
        range: Range<usize>,
        max_count: Option<usize>,
    ) -> CarveResult<Self> {
        validate_max_count(max_count)?;
        let low = range.start.min(haystack.len());
        let high = range.end.min(haystack.len());
        // A window that cannot hold one full pattern yields the empty
        // sequence. An empty pattern matches nowhere, which memmem does not
        // agree with (it matches an empty needle everywhere), so it is cut
        // off at the counter instead.
        let window = if low >= high || high - low < pattern.len() {
            &haystack[0..0]
        } else {
            &haystack[low..high]
        };
        let remaining = if pattern.is_empty() {
            Some(0)
        } else {
            max_count
        };
        Ok(Self {
            iter: memmem::find_iter(window, pattern),
            low,
            remaining,
        })
    }
}

impl Iterator for MemoryMatches<'_, '_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        if self.remaining == Some(0) {
            return None;
        }
        let pos = self.iter.next()?;
        if let Some(n) = self.remaining.as_mut() {
            *n -= 1;
        }
        Some(self.low + pos)
    }
}

/// All occurrence start positions, ascending.
pub fn find_in(
    haystack: &[u8],
    pattern: &[u8],
    range: Range<usize>,
    max_count: Option<usize>,
) -> CarveResult<Vec<usize>> {
    Ok(MemoryMatches::new(haystack, pattern, range, max_count)?.collect())
}

/// The first occurrence at or after `range.start`, if any.
pub fn find_first_in(haystack: &[u8], pattern: &[u8], range: Range<usize>) -> Option<usize> {
    MemoryMatches::new(haystack, pattern, range, None)
        .ok()?
        .next()
}

/// The last occurrence of the non-overlapping sequence, if any.
pub fn find_last_in(haystack: &[u8], pattern: &[u8], range: Range<usize>) -> Option<usize> {
    MemoryMatches::new(haystack, pattern, range, None)
        .ok()?
        .last()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::CarveError;

    #[test]
    fn test_non_overlapping_advancement() {
        assert_eq!(find_in(b"aaaa", b"aa", 0..4, None).unwrap(), vec![0, 2]);
        assert_eq!(find_in(b"aaaa", b"aaa", 0..4, None).unwrap(), vec![0]);
    }

    #[test]
    fn test_range_clamps_candidates() {
        let hay = b"XX..XX..XX";
        assert_eq!(find_in(hay, b"XX", 0..10, None).unwrap(), vec![0, 4, 8]);
        // Starts before `low` are excluded.
        assert_eq!(find_in(hay, b"XX", 1..10, None).unwrap(), vec![4, 8]);
        // A window whose end would cross `high` does not count.
        assert_eq!(find_in(hay, b"XX", 0..9, None).unwrap(), vec![0, 4]);
    }

    #[test]
    fn test_max_count_takes_prefix() {
        let hay = b"ababababab";
        let unbounded = find_in(hay, b"ab", 0..10, None).unwrap();
        let capped = find_in(hay, b"ab", 0..10, Some(3)).unwrap();
        assert_eq!(capped.len(), 3);
        assert_eq!(capped[..], unbounded[..3]);
    }

    #[test]
    fn test_zero_max_count_rejected() {
        let err = find_in(b"abc", b"a", 0..3, Some(0)).unwrap_err();
        assert!(matches!(err, CarveError::InvalidCapacity(0)));
    }

    #[test]
    fn test_first_and_last() {
        let hay = b"..ab..ab..ab..";
        assert_eq!(find_first_in(hay, b"ab", 0..hay.len()), Some(2));
        assert_eq!(find_last_in(hay, b"ab", 0..hay.len()), Some(10));
        assert_eq!(find_first_in(hay, b"zz", 0..hay.len()), None);
    }

    #[test]
    fn test_degenerate_inputs() {
        assert!(find_in(b"", b"ab", 0..0, None).unwrap().is_empty());
        // memmem would match an empty needle at position 0 even of an
        // empty haystack; the empty pattern must stay matchless.
        assert!(find_in(b"abc", b"", 0..3, None).unwrap().is_empty());
        assert!(find_in(b"", b"", 0..0, None).unwrap().is_empty());
        assert_eq!(find_first_in(b"abc", b"", 0..3), None);
        // Range past the end of the buffer is clamped, not an error.
        assert!(find_in(b"abc", b"ab", 5..9, None).unwrap().is_empty());
        // Pattern longer than the window.
        assert!(find_in(b"abc", b"abcd", 0..3, None).unwrap().is_empty());
    }
}
