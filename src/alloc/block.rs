//! Byte range descriptor inside a chunk or a store file

use serde::{Deserialize, Serialize};
use std::fmt;

/// A `(position, size)` byte range
///
/// Free-block managers grow and shrink blocks in place while fitting
/// requests and coalescing neighbours.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Block {
    /// Byte offset from the start of the region
    pub position: usize,
    /// Length in bytes
    pub size: usize,
}

impl Block {
    /// Create a new block
    pub fn new(position: usize, size: usize) -> Self {
        Self { position, size }
    }

    /// First byte past the block
    pub fn end(&self) -> usize {
        self.position + self.size
    }

    /// True when `other` starts exactly where this block ends
    pub fn is_adjacent_to(&self, other: &Block) -> bool {
        self.end() == other.position
    }

    pub fn overlaps(&self, other: &Block) -> bool {
        self.position < other.end() && other.position < self.end()
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.position, self.end())
    }
}
