//! # Chunk Iteration Module
//!
//! An iterator over the non-void cells of a chunk.
//!
//! The iterator walks the occupancy bit vector and skips void cells without
//! touching the cell storage, which makes scanning mostly-empty chunks cheap.

use bitvec::slice::IterOnes;
use bitvec::order::Lsb0;
use cgmath::Point3;

use crate::voxels::block::Cell;
use crate::voxels::coord_at;

use super::Chunk;

/// An iterator over all non-void cells in a chunk, yielding world coordinates.
pub struct ChunkCellIterator<'a> {
    /// Reference to the chunk being iterated over
    chunk_ref: &'a Chunk,
    /// Indices of the set occupancy bits
    ones: IterOnes<'a, usize, Lsb0>,
}

impl<'a> ChunkCellIterator<'a> {
    /// Creates a new `ChunkCellIterator` for the given chunk.
    pub fn new(chunk_ref: &'a Chunk) -> Self {
        ChunkCellIterator {
            chunk_ref,
            ones: chunk_ref.occupancy.iter_ones(),
        }
    }
}

impl Iterator for ChunkCellIterator<'_> {
    type Item = (Point3<i32>, Cell);

    fn next(&mut self) -> Option<Self::Item> {
        let index = self.ones.next()?;
        Some((
            coord_at(self.chunk_ref.position, index),
            self.chunk_ref.cell_at(index),
        ))
    }
}

impl Chunk {
    /// Iterates the non-void cells of this chunk.
    pub fn occupied_cells(&self) -> ChunkCellIterator<'_> {
        ChunkCellIterator::new(self)
    }
}
