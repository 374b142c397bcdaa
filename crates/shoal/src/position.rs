//
// position.rs
//
// Tree-space positions and spans (1-based line and byte column)
//

use tree_sitter::Node;

/// A position in tree-space: 1-based line, 1-based byte column.
///
/// Ordering is lexicographic (line first, then column), which is the
/// "textually before" relation used by scope resolution.
///
/// # Examples
///
/// ```
/// use shoal::position::Position;
///
/// let a = Position::new(2, 9);
/// let b = Position::new(3, 1);
/// assert!(a < b);
/// assert!(Position::new(3, 1) <= b);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Position {
    pub line: u32,
    pub column: u32,
}

impl Position {
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }

    /// Convert a 0-based (row, byte column) pair, as used by tree-sitter,
    /// into tree-space.
    pub fn from_point(point: tree_sitter::Point) -> Self {
        Self {
            line: point.row as u32 + 1,
            column: point.column as u32 + 1,
        }
    }

    /// The 0-based tree-sitter point for this position.
    pub fn to_point(self) -> tree_sitter::Point {
        tree_sitter::Point::new(
            self.line.saturating_sub(1) as usize,
            self.column.saturating_sub(1) as usize,
        )
    }
}

/// A cursor is a tree-space position derived from a 0-based editor position.
pub type Cursor = Position;

/// Build a cursor from a 0-based editor line and 0-based byte column.
pub fn cursor_from_editor(line: u32, byte_column: u32) -> Cursor {
    Position::new(line + 1, byte_column + 1)
}

/// A start/end pair. The end is the position just past the last byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Span {
    pub start: Position,
    pub end: Position,
}

impl Span {
    pub fn new(start: Position, end: Position) -> Self {
        Self { start, end }
    }

    pub fn of_node(node: Node) -> Self {
        Self {
            start: Position::from_point(node.start_position()),
            end: Position::from_point(node.end_position()),
        }
    }

    /// Whether `cursor` falls inside this span. Both ends are inclusive, so a
    /// cursor sitting just after the last character still counts.
    pub fn contains(&self, cursor: Cursor) -> bool {
        let (start, end) = (self.start, self.end);

        if cursor.line < start.line || cursor.line > end.line {
            return false;
        }

        if start.line == end.line {
            return cursor.column >= start.column && cursor.column <= end.column;
        }

        if cursor.line == start.line {
            cursor.column >= start.column
        } else if cursor.line == end.line {
            cursor.column <= end.column
        } else {
            true
        }
    }
}
