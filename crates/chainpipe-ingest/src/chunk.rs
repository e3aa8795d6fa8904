//! Block range arithmetic for chunked ingestion

/// A half-open block range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRange {
    pub start: u64,
    pub end: u64,
}

impl BlockRange {
    pub fn new(start: u64, end: u64) -> Self {
        debug_assert!(start <= end, "inverted block range {start}..{end}");
        Self { start, end }
    }

    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Split into contiguous sub-ranges of at most `max_size` blocks.
    pub fn chunks(self, max_size: u64) -> impl Iterator<Item = BlockRange> {
        assert!(max_size > 0, "max_size must be positive");
        let mut cursor = self.start;
        std::iter::from_fn(move || {
            if cursor >= self.end {
                return None;
            }
            let hi = self.end.min(cursor.saturating_add(max_size));
            let chunk = BlockRange::new(cursor, hi);
            cursor = hi;
            Some(chunk)
        })
    }
}

impl std::fmt::Display for BlockRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}
