use std::fmt;

use serde::{Deserialize, Serialize};

/// A source position reported by the foreign parser.
///
/// `line` is 1-based; a value of 0 means the parser did not report one.
/// `start`/`end` are byte offsets into the original source text (end
/// exclusive) and are only used for rendering diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Position {
    #[serde(default)]
    pub line: u32,
    #[serde(default)]
    pub start: u32,
    #[serde(default)]
    pub end: u32,
}

impl Position {
    pub fn new(line: u32, start: u32, end: u32) -> Self {
        debug_assert!(start <= end, "position start ({start}) must be <= end ({end})");
        Self { line, start, end }
    }

    /// A position that only knows its line.
    pub fn line(line: u32) -> Self {
        Self {
            line,
            start: 0,
            end: 0,
        }
    }

    /// Whether the byte range is usable for a source snippet.
    pub fn has_range(&self) -> bool {
        self.end > self.start
    }

    /// Fill in a missing line number from the byte offset.
    pub fn with_line_from(self, index: &LineIndex) -> Self {
        if self.line != 0 {
            return self;
        }
        let (line, _) = index.line_col(self.start);
        Self { line, ..self }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.line == 0 {
            write!(f, "?")
        } else {
            write!(f, "{}", self.line)
        }
    }
}

/// Pre-computed index of line start positions for on-demand line/column lookup.
///
/// Constructed once per source file, then used to convert byte offsets to
/// human-readable (line, column) pairs via binary search.
#[derive(Debug, Clone)]
pub struct LineIndex {
    /// Byte offset of the start of each line. The first entry is always 0.
    line_starts: Vec<u32>,
    /// Total source length in bytes.
    len: u32,
}

impl LineIndex {
    /// Build a line index by scanning the source text for newline characters.
    pub fn new(source: &str) -> Self {
        let mut line_starts = vec![0u32];
        for (i, byte) in source.bytes().enumerate() {
            if byte == b'\n' {
                line_starts.push((i + 1) as u32);
            }
        }
        Self {
            line_starts,
            len: source.len() as u32,
        }
    }

    /// Convert a byte offset to a 1-based (line, column) pair.
    pub fn line_col(&self, offset: u32) -> (u32, u32) {
        // partition_point returns the index of the first line_start > offset,
        // so the line index is one less than that.
        let line_idx = self.line_starts.partition_point(|&start| start <= offset);
        let line_idx = line_idx.saturating_sub(1);
        let line = (line_idx as u32) + 1;
        let col = offset - self.line_starts[line_idx] + 1;
        (line, col)
    }

    /// Byte range of a 1-based line, excluding its newline.
    pub fn line_range(&self, line: u32) -> Option<std::ops::Range<u32>> {
        let idx = (line as usize).checked_sub(1)?;
        let start = *self.line_starts.get(idx)?;
        let end = match self.line_starts.get(idx + 1) {
            Some(next) => next.saturating_sub(1),
            None => self.len,
        };
        Some(start..end.max(start))
    }

    /// Return the number of lines in the source.
    pub fn line_count(&self) -> usize {
        self.line_starts.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_index_multiple_lines() {
        let src = "def a\n  1\nend";
        let idx = LineIndex::new(src);
        assert_eq!(idx.line_col(0), (1, 1));
        assert_eq!(idx.line_col(6), (2, 1));
        assert_eq!(idx.line_col(8), (2, 3));
        assert_eq!(idx.line_col(10), (3, 1));
        assert_eq!(idx.line_count(), 3);
    }

    #[test]
    fn missing_line_is_filled_from_offset() {
        let idx = LineIndex::new("a = 1\nb = a\n");
        let pos = Position::new(0, 6, 11).with_line_from(&idx);
        assert_eq!(pos.line, 2);

        let known = Position::new(7, 6, 11).with_line_from(&idx);
        assert_eq!(known.line, 7);
    }

    #[test]
    fn line_range_excludes_newline() {
        let idx = LineIndex::new("ab\ncde\nf");
        assert_eq!(idx.line_range(1), Some(0..2));
        assert_eq!(idx.line_range(2), Some(3..6));
        assert_eq!(idx.line_range(3), Some(7..8));
        assert_eq!(idx.line_range(0), None);
        assert_eq!(idx.line_range(4), None);
    }

    #[test]
    fn display_unknown_line() {
        assert_eq!(Position::default().to_string(), "?");
        assert_eq!(Position::line(12).to_string(), "12");
    }
}
