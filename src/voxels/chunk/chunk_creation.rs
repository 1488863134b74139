//! # Chunk Creation Module
//!
//! A builder that populates a chunk one cell at a time, in storage order
//! (`x` fastest, then `y`, then `z`), keeping the occupancy bit vector and the
//! non-void counter consistent with the cells pushed.

use bitvec::vec::BitVec;
use cgmath::Point3;

use crate::voxels::block::Cell;

use super::{Chunk, CHUNK_SIZE};

/// A builder for creating and populating chunks.
pub struct ChunkCreationIterator {
    /// The chunk position of the chunk being created
    position: Point3<i32>,
    /// Cells pushed so far
    cells: Vec<Cell>,
    /// One bit per pushed cell, set for non-void cells
    occupancy: BitVec,
    /// Number of non-void cells pushed so far
    non_void: u32,
}

impl ChunkCreationIterator {
    /// Creates a new `ChunkCreationIterator` for building a chunk at the given position.
    pub fn new(position: Point3<i32>) -> Self {
        ChunkCreationIterator {
            position,
            cells: Vec::with_capacity(CHUNK_SIZE as usize),
            occupancy: BitVec::with_capacity(CHUNK_SIZE as usize),
            non_void: 0,
        }
    }

    /// Finalizes the chunk creation and returns the constructed `Chunk`.
    ///
    /// Cells that were never pushed are filled with `Cell::VOID`.
    pub fn return_chunk(mut self) -> Chunk {
        while self.cells.len() < CHUNK_SIZE as usize {
            self.push_cell(Cell::VOID);
        }
        Chunk {
            position: self.position,
            cells: self.cells,
            occupancy: self.occupancy,
            non_void: self.non_void,
        }
    }

    /// Adds a cell at the current position and advances the position.
    ///
    /// Cells pushed past the end of the chunk are ignored.
    pub fn push_cell(&mut self, cell: Cell) {
        if self.cells.len() >= CHUNK_SIZE as usize {
            return;
        }
        let occupied = !cell.is_void();
        self.occupancy.push(occupied);
        if occupied {
            self.non_void += 1;
        }
        self.cells.push(cell);
    }
}
