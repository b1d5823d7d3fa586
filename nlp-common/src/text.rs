//! Character offset helpers
//!
//! Entity offsets are expressed in characters (Unicode scalar values), the
//! way callers count them. Rust strings are indexed by byte, so every stage
//! that slices the decision text goes through a [`CharIndex`].

/// Collapse form-feed and carriage-return into line feeds.
///
/// Applied to the decision text before tagging. Each replaced character is
/// one byte and one char, so offsets are unchanged by the normalization.
pub fn normalize_control_characters(text: &str) -> String {
    text.replace(['\u{c}', '\r'], "\n")
}

/// Bidirectional char ⇄ byte offset table for one text.
#[derive(Debug, Clone)]
pub struct CharIndex<'a> {
    text: &'a str,
    /// Byte offset of each char, plus a trailing `text.len()` sentinel
    boundaries: Vec<usize>,
}

impl<'a> CharIndex<'a> {
    pub fn new(text: &'a str) -> Self {
        let mut boundaries: Vec<usize> = text.char_indices().map(|(b, _)| b).collect();
        boundaries.push(text.len());
        Self { text, boundaries }
    }

    pub fn text(&self) -> &'a str {
        self.text
    }

    /// Number of chars in the text
    pub fn char_len(&self) -> usize {
        self.boundaries.len() - 1
    }

    /// Byte offset of the given char offset (`char_len()` maps to `text.len()`)
    pub fn byte_offset(&self, char_offset: usize) -> Option<usize> {
        self.boundaries.get(char_offset).copied()
    }

    /// Char offset of the given byte offset, if it falls on a char boundary
    pub fn char_offset(&self, byte_offset: usize) -> Option<usize> {
        self.boundaries.binary_search(&byte_offset).ok()
    }

    /// Slice by char offsets
    pub fn slice(&self, start: usize, end: usize) -> Option<&'a str> {
        if start > end {
            return None;
        }
        let from = self.byte_offset(start)?;
        let to = self.byte_offset(end)?;
        self.text.get(from..to)
    }

    /// Convert a byte range (e.g. a regex match) into a char range
    pub fn char_range(&self, byte_start: usize, byte_end: usize) -> Option<(usize, usize)> {
        Some((self.char_offset(byte_start)?, self.char_offset(byte_end)?))
    }
}
