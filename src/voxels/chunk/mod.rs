//! # Chunk Module
//!
//! This module provides the `Chunk` struct for storing a 16x16x16 block of
//! cells, plus the generators used to seed demo and test worlds.
//!
//! ## Storage
//!
//! Cellular automata rewrite cells in place every tick, so chunks store cells
//! densely (`Vec<Cell>`, four bytes per cell) for O(1) reads and writes. Next
//! to the cells, a bit vector (1 bit per cell) records which cells are
//! non-void. It is kept in sync on every write and serves two purposes:
//! - O(1) occupancy checks
//! - fast iteration over the occupied cells of a mostly-empty chunk
//!   (see `chunk_iteration`), which is how tracked cells are found when a
//!   chunk loads
//!
//! Chunks are only allocated once something non-void is written into them;
//! the store answers reads of unallocated chunks with `Cell::VOID`.

use bitvec::prelude::BitVec;
use cgmath::Point3;
use chunk_creation::ChunkCreationIterator;
use noise::NoiseFn;
use noise::Perlin;

use super::block::{BlockId, Cell};
use super::local_index;

mod chunk_creation;
pub mod chunk_iteration;

/// The dimension (width, height, depth) of a chunk in cells.
pub const CHUNK_DIMENSION: i32 = 16;
/// The number of cells in a single 2D plane of a chunk (CHUNK_DIMENSION²).
pub const CHUNK_PLANE_SIZE: i32 = CHUNK_DIMENSION * CHUNK_DIMENSION;
/// The total number of cells in a chunk (CHUNK_DIMENSION³).
pub const CHUNK_SIZE: i32 = CHUNK_PLANE_SIZE * CHUNK_DIMENSION;

/// A 16x16x16 collection of cells.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    /// The position of this chunk in chunk coordinates (not cell coordinates).
    pub position: Point3<i32>,

    /// Dense cell storage, indexed `x + 16*y + 256*z`.
    cells: Vec<Cell>,

    /// One bit per cell, set when the cell is non-void.
    occupancy: BitVec,

    /// Number of set bits in `occupancy`.
    non_void: u32,
}

/// Threshold above which Perlin noise is considered solid for terrain generation.
pub const PERLIN_POSITIVE_THRESHOLD: f64 = 0.2;
/// Threshold below which Perlin noise is considered empty for terrain generation.
pub const PERLIN_NEGATIVE_THRESHOLD: f64 = -0.2;
/// Scaling factor applied to world coordinates when sampling Perlin noise.
pub const PERLIN_SCALE_FACTOR: f64 = 0.05;

impl Chunk {
    /// Creates a new, completely empty chunk (all cells void).
    ///
    /// # Arguments
    /// * `position` - The chunk coordinates of the new chunk
    pub fn empty(position: Point3<i32>) -> Self {
        let mut cci = ChunkCreationIterator::new(position);
        for _ in 0..CHUNK_SIZE {
            cci.push_cell(Cell::VOID);
        }
        cci.return_chunk()
    }

    /// Creates a chunk filled with a single block type.
    ///
    /// # Arguments
    /// * `position` - The chunk coordinates of the new chunk
    /// * `block` - Block type of every cell
    pub fn solid(position: Point3<i32>, block: BlockId) -> Self {
        let mut cci = ChunkCreationIterator::new(position);
        for _ in 0..CHUNK_SIZE {
            cci.push_cell(Cell::new(block));
        }
        cci.return_chunk()
    }

    /// Creates a chunk where each cell is `block` with probability `density`.
    ///
    /// The same `seed` always produces the same chunk.
    ///
    /// # Arguments
    /// * `position` - The chunk coordinates of the new chunk
    /// * `block` - Block type of the occupied cells
    /// * `density` - Fraction of cells to occupy, `0.0..=1.0`
    /// * `seed` - Random seed
    pub fn random(position: Point3<i32>, block: BlockId, density: f64, seed: u64) -> Self {
        let mut rng = fastrand::Rng::with_seed(seed);
        let mut cci = ChunkCreationIterator::new(position);

        for _ in 0..CHUNK_SIZE {
            if rng.f64() < density {
                cci.push_cell(Cell::new(block));
            } else {
                cci.push_cell(Cell::VOID);
            }
        }

        cci.return_chunk()
    }

    /// Generates a chunk using Perlin noise for natural-looking terrain.
    ///
    /// The terrain is generated by sampling 3D Perlin noise and applying thresholds
    /// to determine which cells are occupied. The result resembles natural terrain
    /// with caves and overhangs.
    ///
    /// # Arguments
    /// * `position` - The chunk coordinates where the chunk will be placed
    /// * `block` - Block type of the occupied cells
    /// * `seed` - Noise seed
    pub fn perlin(position: Point3<i32>, block: BlockId, seed: u32) -> Self {
        let perlin = Perlin::new(seed);
        let mut cci = ChunkCreationIterator::new(position);

        for k in 0..CHUNK_DIMENSION {
            for j in 0..CHUNK_DIMENSION {
                for i in 0..CHUNK_DIMENSION {
                    let cposition = Point3::<i32>::new(
                        i + CHUNK_DIMENSION * position.x,
                        j + CHUNK_DIMENSION * position.y,
                        k + CHUNK_DIMENSION * position.z,
                    );
                    let perlin_sample =
                        perlin.get(Self::to_perlin_pos(cposition, PERLIN_SCALE_FACTOR));
                    if !(PERLIN_NEGATIVE_THRESHOLD..=PERLIN_POSITIVE_THRESHOLD)
                        .contains(&perlin_sample)
                    {
                        cci.push_cell(Cell::new(block));
                    } else {
                        cci.push_cell(Cell::VOID);
                    }
                }
            }
        }

        cci.return_chunk()
    }

    /// Converts a world cell position to Perlin sampling space.
    fn to_perlin_pos(pos: Point3<i32>, scale_factor: f64) -> [f64; 3] {
        [
            (pos.x as f64 * scale_factor),
            (pos.y as f64 * scale_factor),
            (pos.z as f64 * scale_factor),
        ]
    }

    /// Reads the cell at the given world coordinate.
    ///
    /// The coordinate is reduced into the chunk, so callers must make sure
    /// it actually belongs to this chunk.
    pub fn cell(&self, coord: Point3<i32>) -> Cell {
        self.cells[local_index(coord)]
    }

    /// Reads the cell at a local index.
    ///
    /// # Panics
    /// Panics if `index >= CHUNK_SIZE`.
    pub fn cell_at(&self, index: usize) -> Cell {
        self.cells[index]
    }

    /// Writes the cell at the given world coordinate, keeping the occupancy bits in sync.
    ///
    /// # Returns
    /// The previous cell value.
    pub fn set_cell(&mut self, coord: Point3<i32>, cell: Cell) -> Cell {
        let index = local_index(coord);
        let previous = std::mem::replace(&mut self.cells[index], cell);
        match (previous.is_void(), cell.is_void()) {
            (true, false) => {
                self.occupancy.set(index, true);
                self.non_void += 1;
            }
            (false, true) => {
                self.occupancy.set(index, false);
                self.non_void -= 1;
            }
            _ => {}
        }
        previous
    }

    /// Returns `true` if the cell at a local index is non-void.
    pub fn is_occupied(&self, index: usize) -> bool {
        self.occupancy[index]
    }

    /// Number of non-void cells.
    pub fn non_void_count(&self) -> u32 {
        self.non_void
    }

    /// Returns `true` when every cell is void.
    pub fn is_empty(&self) -> bool {
        self.non_void == 0
    }
}
