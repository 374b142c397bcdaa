//
// utf16.rs
//
// Conversion between LSP UTF-16 positions and 1-based byte positions
//

use tower_lsp::lsp_types::{Position as LspPosition, Range};

use crate::position::{cursor_from_editor, Cursor, Span};

/// Convert a UTF-16 column offset (from LSP Position.character) to a byte
/// offset within the given line. Tree-sitter Points expect byte offsets, not
/// UTF-16 code units.
pub fn utf16_column_to_byte_offset(line: &str, utf16_col: u32) -> usize {
    let mut utf16_count = 0;
    for (byte_idx, ch) in line.char_indices() {
        if utf16_count >= utf16_col as usize {
            return byte_idx;
        }
        utf16_count += ch.len_utf16();
    }
    line.len()
}

/// Convert a byte offset within a line back to a UTF-16 column.
/// Offsets past the end of the line clamp to the line's UTF-16 length.
pub fn byte_offset_to_utf16_column(line: &str, byte_offset: usize) -> u32 {
    let mut utf16_count = 0;
    for (byte_idx, ch) in line.char_indices() {
        if byte_idx >= byte_offset {
            break;
        }
        utf16_count += ch.len_utf16();
    }
    utf16_count as u32
}

/// Line table over a document's text for converting between editor
/// coordinates and spans.
pub struct LineIndex<'a> {
    lines: Vec<&'a str>,
}

impl<'a> LineIndex<'a> {
    pub fn new(text: &'a str) -> Self {
        Self {
            lines: text.lines().collect(),
        }
    }

    fn line(&self, line: usize) -> &'a str {
        self.lines.get(line).copied().unwrap_or("")
    }

    /// Cursor for an LSP position (0-based line, UTF-16 column).
    pub fn cursor(&self, position: LspPosition) -> Cursor {
        let line = self.line(position.line as usize);
        let byte = utf16_column_to_byte_offset(line, position.character);
        cursor_from_editor(position.line, byte as u32)
    }

    pub fn lsp_position(&self, position: crate::position::Position) -> LspPosition {
        let line_idx = position.line.saturating_sub(1);
        let byte = position.column.saturating_sub(1) as usize;
        let character = byte_offset_to_utf16_column(self.line(line_idx as usize), byte);
        LspPosition::new(line_idx, character)
    }

    pub fn range(&self, span: Span) -> Range {
        Range::new(self.lsp_position(span.start), self.lsp_position(span.end))
    }
}
