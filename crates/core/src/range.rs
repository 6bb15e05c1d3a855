//! Byte ranges into a file's content, with line/column for text

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// A position in text content: byte offset plus 0-based line and byte column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TextPosition {
    pub offset: u64,
    pub line: u32,
    pub column: u32,
}

/// Start/end location of a chunk within a file
///
/// Invariant: `start <= end`. Zero-length ranges are valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Range {
    Text { start: TextPosition, end: TextPosition },
    Binary { start: u64, end: u64 },
}

impl Range {
    pub fn binary(start: u64, end: u64) -> Option<Self> {
        (start <= end).then_some(Range::Binary { start, end })
    }

    /// Build a text range, resolving line/column through `lines`
    pub fn text(start: u64, end: u64, lines: &LineIndex) -> Option<Self> {
        (start <= end).then(|| Range::Text {
            start: lines.position(start),
            end: lines.position(end),
        })
    }

    pub fn start(&self) -> u64 {
        match self {
            Range::Text { start, .. } => start.offset,
            Range::Binary { start, .. } => *start,
        }
    }

    pub fn end(&self) -> u64 {
        match self {
            Range::Text { end, .. } => end.offset,
            Range::Binary { end, .. } => *end,
        }
    }

    pub fn len(&self) -> u64 {
        self.end() - self.start()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_text(&self) -> bool {
        matches!(self, Range::Text { .. })
    }

    /// Same byte span, ignoring line/column
    pub fn same_span(&self, other: &Range) -> bool {
        self.start() == other.start() && self.end() == other.end()
    }

    pub fn contains(&self, other: &Range) -> bool {
        self.start() <= other.start() && other.end() <= self.end()
    }

    /// Contained and not the very same span
    pub fn strictly_contains(&self, other: &Range) -> bool {
        self.contains(other) && !self.same_span(other)
    }

    pub fn contains_offset(&self, offset: u64) -> bool {
        if self.is_empty() {
            offset == self.start()
        } else {
            self.start() <= offset && offset < self.end()
        }
    }

    /// Whether two ranges share any byte, or an empty range sits strictly inside the other
    pub fn overlaps(&self, other: &Range) -> bool {
        self.start() < other.end() && other.start() < self.end()
    }

    /// Canonical pre-order: start ascending, enclosing (longer) ranges first
    pub fn canonical_cmp(&self, other: &Range) -> Ordering {
        self.start()
            .cmp(&other.start())
            .then_with(|| other.end().cmp(&self.end()))
    }
}

impl std::fmt::Display for Range {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Range::Text { start, end } => write!(
                f,
                "{}:{}-{}:{}",
                start.line + 1,
                start.column + 1,
                end.line + 1,
                end.column + 1
            ),
            Range::Binary { start, end } => write!(f, "@{}..{}", start, end),
        }
    }
}

/// Offsets of line starts in a text, for offset -> line/column resolution
#[derive(Debug, Clone)]
pub struct LineIndex {
    line_starts: Vec<u64>,
}

impl LineIndex {
    pub fn new(content: &[u8]) -> Self {
        let mut line_starts = vec![0u64];
        line_starts.extend(
            content
                .iter()
                .enumerate()
                .filter(|(_, &b)| b == b'\n')
                .map(|(i, _)| i as u64 + 1),
        );
        Self { line_starts }
    }

    pub fn position(&self, offset: u64) -> TextPosition {
        let line = match self.line_starts.binary_search(&offset) {
            Ok(line) => line,
            Err(next) => next - 1,
        };
        TextPosition {
            offset,
            line: line as u32,
            column: (offset - self.line_starts[line]) as u32,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_index_positions() {
        let lines = LineIndex::new(b"ab\ncd\n\nef");
        assert_eq!(lines.position(0), TextPosition { offset: 0, line: 0, column: 0 });
        assert_eq!(lines.position(1), TextPosition { offset: 1, line: 0, column: 1 });
        assert_eq!(lines.position(3), TextPosition { offset: 3, line: 1, column: 0 });
        assert_eq!(lines.position(6), TextPosition { offset: 6, line: 2, column: 0 });
        assert_eq!(lines.position(9), TextPosition { offset: 9, line: 3, column: 2 });
    }

    #[test]
    fn test_inverted_range_rejected() {
        assert!(Range::binary(5, 4).is_none());
        assert!(Range::text(5, 4, &LineIndex::new(b"0123456")).is_none());
    }

    #[test]
    fn test_zero_length_range_is_valid() {
        let range = Range::binary(0, 0).unwrap();
        assert!(range.is_empty());
        assert!(range.contains_offset(0));
    }

    #[test]
    fn test_containment_and_overlap() {
        let outer = Range::binary(0, 10).unwrap();
        let inner = Range::binary(2, 5).unwrap();
        let sibling = Range::binary(5, 8).unwrap();
        let straddle = Range::binary(8, 12).unwrap();

        assert!(outer.strictly_contains(&inner));
        assert!(!outer.strictly_contains(&outer));
        assert!(!inner.overlaps(&sibling));
        assert!(outer.overlaps(&straddle));
        assert!(!outer.contains(&straddle));
    }

    #[test]
    fn test_empty_range_inside_other_overlaps() {
        let wide = Range::binary(0, 10).unwrap();
        assert!(Range::binary(4, 4).unwrap().overlaps(&wide));
        assert!(!Range::binary(10, 10).unwrap().overlaps(&wide));
    }

    #[test]
    fn test_canonical_order_puts_parents_first() {
        let parent = Range::binary(0, 10).unwrap();
        let child = Range::binary(0, 4).unwrap();
        assert_eq!(parent.canonical_cmp(&child), Ordering::Less);
    }

    #[test]
    fn test_display() {
        let lines = LineIndex::new(b"one\ntwo\n");
        assert_eq!(Range::text(4, 7, &lines).unwrap().to_string(), "2:1-2:4");
        assert_eq!(Range::binary(3, 9).unwrap().to_string(), "@3..9");
    }
}
