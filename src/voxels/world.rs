//! # World Module
//!
//! The voxel accessor contract the simulation consumes, and `VoxelStore`,
//! the sparse chunked implementation bundled with the crate.
//!
//! ## Key Concepts
//!
//! - **Lazy allocation**: a chunk materializes on its first non-void write.
//!   Reads of unallocated chunks return `Cell::VOID` without allocating, so
//!   rule footprints probing empty space never grow memory.
//! - **Availability**: the host may mark chunks unavailable (unloaded). Reads
//!   from them return `Cell::VOID`; writes are refused.
//! - **Bounds**: optional vertical limits. Out-of-bounds reads return
//!   `Cell::VOID`, which lets rules match against the edge of the world.

use std::collections::{HashMap, HashSet};

use cgmath::Point3;

use crate::error::StoreError;
use crate::voxels::block::Cell;
use crate::voxels::chunk::Chunk;
use crate::voxels::{chunk_of, shifted, ChunkPos, Coord, Offset};

/// Read/write access to voxel state, as provided by the host world.
///
/// Evaluators only ever call the read methods, through a shared reference.
/// `set_cell` is called exclusively by the diff applier while committing.
pub trait VoxelAccess {
    /// Reads a cell. Unloaded, unallocated and out-of-bounds cells read as `Cell::VOID`.
    fn cell(&self, coord: Coord) -> Cell;

    /// Writes a cell.
    fn set_cell(&mut self, coord: Coord, cell: Cell) -> Result<(), StoreError>;

    /// Returns `true` if the chunk is loaded and may be evaluated and written.
    fn is_loaded(&self, chunk: ChunkPos) -> bool;

    /// Returns `true` if the coordinate is inside the world bounds.
    fn contains(&self, _coord: Coord) -> bool {
        true
    }

    /// Positions of all chunks holding data, used to find tracked cells.
    fn chunk_positions(&self) -> Vec<ChunkPos>;

    /// Reads the cells at `coord + offset` for every offset, in order.
    ///
    /// Neighbors past the edge of `i32` space read as `Cell::VOID`.
    fn neighbors(&self, coord: Coord, offsets: &[Offset]) -> Vec<Cell> {
        offsets
            .iter()
            .map(|offset| shifted(coord, *offset).map_or(Cell::VOID, |at| self.cell(at)))
            .collect()
    }

    /// Non-void cells of a chunk with their coordinates.
    ///
    /// The default scans every cell through [`VoxelAccess::cell`].
    fn occupied_cells(&self, chunk: ChunkPos) -> Vec<(Coord, Cell)> {
        (0..crate::voxels::chunk::CHUNK_SIZE as usize)
            .map(|index| crate::voxels::coord_at(chunk, index))
            .map(|coord| (coord, self.cell(coord)))
            .filter(|(_, cell)| !cell.is_void())
            .collect()
    }
}

/// Vertical extent of the world. `None` means unbounded on that side.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorldBounds {
    /// Lowest valid `y`, inclusive.
    pub min_y: Option<i32>,
    /// Highest valid `y`, exclusive.
    pub max_y: Option<i32>,
}

impl WorldBounds {
    /// Returns `true` if `y` lies within the bounds.
    pub fn contains_y(&self, y: i32) -> bool {
        self.min_y.map_or(true, |min| y >= min) && self.max_y.map_or(true, |max| y < max)
    }
}

/// Sparse chunked voxel storage.
///
/// # Examples
///
/// ```
/// use cgmath::Point3;
/// use voxel_automata::voxels::block::Cell;
/// use voxel_automata::voxels::world::{VoxelAccess, VoxelStore};
///
/// let mut store = VoxelStore::new();
/// assert_eq!(store.cell(Point3::new(0, 5, 0)), Cell::VOID);
/// assert_eq!(store.allocated_chunks(), 0);
///
/// store.set_cell(Point3::new(0, 5, 0), Cell::new(2)).unwrap();
/// assert_eq!(store.cell(Point3::new(0, 5, 0)), Cell::new(2));
/// assert_eq!(store.allocated_chunks(), 1);
/// ```
#[derive(Debug, Default)]
pub struct VoxelStore {
    /// A mapping from chunk coordinates to chunk data.
    chunks: HashMap<Point3<i32>, Chunk>,
    /// Chunks the host reported as unloaded.
    unavailable: HashSet<Point3<i32>>,
    /// Vertical world limits.
    bounds: WorldBounds,
}

impl VoxelStore {
    /// Creates a new, empty, unbounded world.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new, empty world with the given bounds.
    pub fn with_bounds(bounds: WorldBounds) -> Self {
        VoxelStore {
            bounds,
            ..Self::default()
        }
    }

    /// The world bounds.
    pub fn bounds(&self) -> WorldBounds {
        self.bounds
    }

    /// Number of allocated chunks.
    pub fn allocated_chunks(&self) -> usize {
        self.chunks.len()
    }

    /// Retrieves the chunk at the specified chunk coordinates, if allocated.
    pub fn chunk(&self, pos: ChunkPos) -> Option<&Chunk> {
        self.chunks.get(&pos)
    }

    /// Inserts a generated chunk, replacing any existing data at its position.
    ///
    /// The chunk becomes available if it had been unloaded.
    pub fn insert_chunk(&mut self, chunk: Chunk) {
        self.unavailable.remove(&chunk.position);
        self.chunks.insert(chunk.position, chunk);
    }

    /// Evicts a chunk and marks its region unavailable.
    ///
    /// # Returns
    /// The evicted chunk data, if the chunk was allocated.
    pub fn unload_chunk(&mut self, pos: ChunkPos) -> Option<Chunk> {
        self.unavailable.insert(pos);
        let evicted = self.chunks.remove(&pos);
        log::debug!("Unloaded chunk {:?} (allocated: {})", pos, evicted.is_some());
        evicted
    }

    /// Marks a chunk region available again, optionally restoring its data.
    pub fn load_chunk(&mut self, pos: ChunkPos, data: Option<Chunk>) {
        self.unavailable.remove(&pos);
        if let Some(mut chunk) = data {
            chunk.position = pos;
            self.chunks.insert(pos, chunk);
        }
    }

    fn readable(&self, coord: Coord) -> Option<&Chunk> {
        if !self.bounds.contains_y(coord.y) {
            return None;
        }
        let pos = chunk_of(coord);
        if self.unavailable.contains(&pos) {
            return None;
        }
        self.chunks.get(&pos)
    }

    fn readable_chunk(&self, pos: ChunkPos) -> Option<&Chunk> {
        if self.unavailable.contains(&pos) {
            return None;
        }
        self.chunks.get(&pos)
    }
}

impl VoxelAccess for VoxelStore {
    fn cell(&self, coord: Coord) -> Cell {
        self.readable(coord)
            .map_or(Cell::VOID, |chunk| chunk.cell(coord))
    }

    fn set_cell(&mut self, coord: Coord, cell: Cell) -> Result<(), StoreError> {
        if !self.bounds.contains_y(coord.y) {
            return Err(StoreError::OutOfBounds(coord));
        }
        let pos = chunk_of(coord);
        if self.unavailable.contains(&pos) {
            return Err(StoreError::RegionUnavailable(pos));
        }
        match self.chunks.get_mut(&pos) {
            Some(chunk) => {
                chunk.set_cell(coord, cell);
                if chunk.is_empty() {
                    self.chunks.remove(&pos);
                }
            }
            None if cell.is_void() => {}
            None => {
                let mut chunk = Chunk::empty(pos);
                chunk.set_cell(coord, cell);
                self.chunks.insert(pos, chunk);
            }
        }
        Ok(())
    }

    fn is_loaded(&self, chunk: ChunkPos) -> bool {
        !self.unavailable.contains(&chunk)
    }

    fn contains(&self, coord: Coord) -> bool {
        self.bounds.contains_y(coord.y)
    }

    fn chunk_positions(&self) -> Vec<ChunkPos> {
        self.chunks.keys().copied().collect()
    }

    fn occupied_cells(&self, chunk: ChunkPos) -> Vec<(Coord, Cell)> {
        match self.readable_chunk(chunk) {
            Some(chunk) => chunk.occupied_cells().collect(),
            None => Vec::new(),
        }
    }
}
