//! Per-table change cursors.
//!
//! The remote store assigns every write a monotonically increasing cursor.
//! A sync pass asks for changes after the last cursor it has applied for a
//! table; this module tracks that position. Cursors only move forward.

use std::collections::BTreeMap;
use sync_types::Cursor;

/// Last applied remote cursor for each table.
#[derive(Debug, Clone, Default)]
pub struct TableCursors {
    positions: BTreeMap<String, Cursor>,
}

impl TableCursors {
    /// Create an empty tracker. Unknown tables start at [`Cursor::zero`].
    pub fn new() -> Self {
        Self::default()
    }

    /// The last applied cursor for `table`.
    pub fn get(&self, table: &str) -> Cursor {
        self.positions
            .get(table)
            .copied()
            .unwrap_or_else(Cursor::zero)
    }

    /// Move `table` forward to `cursor`.
    ///
    /// Returns `false` (and changes nothing) if `cursor` is not ahead of the
    /// current position.
    pub fn advance(&mut self, table: &str, cursor: Cursor) -> bool {
        if cursor <= self.get(table) {
            return false;
        }
        self.positions.insert(table.to_string(), cursor);
        true
    }

    /// Forget the position for `table` so the next pass starts over.
    pub fn reset(&mut self, table: &str) {
        self.positions.remove(table);
    }

    /// Tables with a recorded position.
    pub fn tables(&self) -> impl Iterator<Item = &str> {
        self.positions.keys().map(String::as_str)
    }
}
