//! Pattern grid
//!
//! A pattern is a rows × channels grid of note events. Row count is
//! per-pattern (2..=256); the channel count is fixed by the song.

use super::note::NoteEvent;

/// Default row count when a format does not specify one
pub const DEFAULT_ROWS: usize = 64;
/// Maximum rows per pattern
pub const MAX_ROWS: usize = 256;

/// One pattern: a dense 2-D grid of cells
#[derive(Debug, Clone)]
pub struct Pattern {
    rows: usize,
    channels: usize,
    cells: Vec<NoteEvent>,
}

impl Pattern {
    /// Allocate an empty pattern
    pub fn new(rows: usize, channels: usize) -> Self {
        let rows = rows.clamp(2, MAX_ROWS);
        Self {
            rows,
            channels,
            cells: vec![NoteEvent::default(); rows * channels],
        }
    }

    /// Number of rows
    #[inline]
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Number of channels per row
    #[inline]
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Cell at (row, channel); `None` when out of bounds
    #[inline]
    pub fn cell(&self, row: usize, channel: usize) -> Option<&NoteEvent> {
        if row >= self.rows || channel >= self.channels {
            return None;
        }
        self.cells.get(row * self.channels + channel)
    }

    /// Mutable cell access for loaders
    #[inline]
    pub fn cell_mut(&mut self, row: usize, channel: usize) -> Option<&mut NoteEvent> {
        if row >= self.rows || channel >= self.channels {
            return None;
        }
        self.cells.get_mut(row * self.channels + channel)
    }

    /// All cells of one row
    #[inline]
    pub fn row(&self, row: usize) -> &[NoteEvent] {
        let start = row.min(self.rows.saturating_sub(1)) * self.channels;
        &self.cells[start..start + self.channels]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::song::note::EffectCmd;

    #[test]
    fn test_pattern_indexing() {
        let mut p = Pattern::new(64, 4);
        assert_eq!(p.rows(), 64);
        p.cell_mut(3, 2).unwrap().note = 49;
        assert_eq!(p.cell(3, 2).unwrap().note, 49);
        assert_eq!(p.cell(3, 1).unwrap().note, 0);
        assert!(p.cell(64, 0).is_none());
        assert!(p.cell(0, 4).is_none());
    }

    #[test]
    fn test_row_slice() {
        let mut p = Pattern::new(16, 3);
        p.cell_mut(5, 0).unwrap().effect = EffectCmd::Speed;
        let row = p.row(5);
        assert_eq!(row.len(), 3);
        assert_eq!(row[0].effect, EffectCmd::Speed);
    }

    #[test]
    fn test_row_count_clamped() {
        let p = Pattern::new(1000, 2);
        assert_eq!(p.rows(), MAX_ROWS);
        let p = Pattern::new(0, 2);
        assert_eq!(p.rows(), 2);
    }
}
