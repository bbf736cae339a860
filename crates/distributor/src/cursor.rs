//! In-memory scan cursor for the event tracker (no disk persistence).
//!
//! Process restarts start from the configured start block again, so consumers
//! see duplicates across restarts.

use std::ops::RangeInclusive;

/// Cursor: next block to scan. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    next_block: u64,
}

impl Cursor {
    /// Cursor whose first window begins at `from_block` (inclusive).
    pub fn starting_at(from_block: u64) -> Self {
        Self {
            next_block: from_block,
        }
    }

    pub fn next_block(&self) -> u64 {
        self.next_block
    }

    /// Last fully scanned block. Saturates at zero before anything is scanned
    /// from genesis.
    pub fn last_scanned_block(&self) -> u64 {
        self.next_block.saturating_sub(1)
    }

    /// Blocks still to scan up to `tip`, if any.
    pub fn pending(&self, tip: u64) -> Option<RangeInclusive<u64>> {
        (tip >= self.next_block).then(|| self.next_block..=tip)
    }

    /// Mark everything up to and including `block` as scanned.
    pub fn advance_to(&mut self, block: u64) {
        self.next_block = self.next_block.max(block.saturating_add(1));
    }
}
