//! # Dirty Set Module
//!
//! The per-tick working set of cells that need evaluation.
//!
//! ## Architecture
//!
//! Dirtiness is tracked per chunk with one bit per cell (a `BitVec` of
//! `CHUNK_SIZE` bits) plus a per-chunk counter, so marking and testing a cell
//! is O(1) and chunks with no dirty cells are dropped from the map entirely.
//! Draining yields cells in a reproducible order: chunks sorted by
//! coordinate, cells in storage order within a chunk.

use std::collections::HashMap;

use bitvec::prelude::{bitvec, BitVec};

use crate::voxels::chunk::CHUNK_SIZE;
use crate::voxels::{chunk_of, coord_at, coord_key, local_index, ChunkPos, Coord};

/// Dirty bits of a single chunk.
#[derive(Debug, Clone)]
struct DirtyChunk {
    bits: BitVec,
    count: usize,
}

impl DirtyChunk {
    fn new() -> Self {
        DirtyChunk {
            bits: bitvec![0; CHUNK_SIZE as usize],
            count: 0,
        }
    }
}

/// An inclusive axis-aligned box of cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    /// Lowest corner, inclusive.
    pub min: Coord,
    /// Highest corner, inclusive.
    pub max: Coord,
}

impl Region {
    /// Creates a region spanning two corners in any order.
    pub fn new(a: Coord, b: Coord) -> Self {
        Region {
            min: Coord::new(a.x.min(b.x), a.y.min(b.y), a.z.min(b.z)),
            max: Coord::new(a.x.max(b.x), a.y.max(b.y), a.z.max(b.z)),
        }
    }

    /// A region covering every representable coordinate.
    pub fn everything() -> Self {
        Region {
            min: Coord::new(i32::MIN, i32::MIN, i32::MIN),
            max: Coord::new(i32::MAX, i32::MAX, i32::MAX),
        }
    }

    /// Returns `true` if the cell lies inside the region.
    pub fn contains(&self, coord: Coord) -> bool {
        (self.min.x..=self.max.x).contains(&coord.x)
            && (self.min.y..=self.max.y).contains(&coord.y)
            && (self.min.z..=self.max.z).contains(&coord.z)
    }
}

/// The set of cells awaiting evaluation.
#[derive(Debug, Clone, Default)]
pub struct DirtySet {
    chunks: HashMap<ChunkPos, DirtyChunk>,
    len: usize,
}

impl DirtySet {
    /// Creates an empty dirty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of dirty cells.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` when no cell is dirty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of chunks holding at least one dirty cell.
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Marks a cell dirty.
    ///
    /// # Returns
    /// `true` if the cell was not already dirty.
    pub fn mark(&mut self, coord: Coord) -> bool {
        let chunk = self
            .chunks
            .entry(chunk_of(coord))
            .or_insert_with(DirtyChunk::new);
        let index = local_index(coord);
        if chunk.bits[index] {
            return false;
        }
        chunk.bits.set(index, true);
        chunk.count += 1;
        self.len += 1;
        true
    }

    /// Clears a cell's dirty bit.
    ///
    /// # Returns
    /// `true` if the cell was dirty.
    pub fn unmark(&mut self, coord: Coord) -> bool {
        let pos = chunk_of(coord);
        let Some(chunk) = self.chunks.get_mut(&pos) else {
            return false;
        };
        let index = local_index(coord);
        if !chunk.bits[index] {
            return false;
        }
        chunk.bits.set(index, false);
        chunk.count -= 1;
        self.len -= 1;
        if chunk.count == 0 {
            self.chunks.remove(&pos);
        }
        true
    }

    /// Returns `true` if the cell is dirty.
    pub fn contains(&self, coord: Coord) -> bool {
        self.chunks
            .get(&chunk_of(coord))
            .is_some_and(|chunk| chunk.bits[local_index(coord)])
    }

    /// Drops every dirty cell of a chunk.
    ///
    /// # Returns
    /// The number of cells that were dirty.
    pub fn remove_chunk(&mut self, pos: ChunkPos) -> usize {
        match self.chunks.remove(&pos) {
            Some(chunk) => {
                self.len -= chunk.count;
                chunk.count
            }
            None => 0,
        }
    }

    /// Dirty chunk positions in sorted order.
    pub fn chunk_positions(&self) -> Vec<ChunkPos> {
        let mut positions: Vec<ChunkPos> = self.chunks.keys().copied().collect();
        positions.sort_by_key(coord_key);
        positions
    }

    /// Dirty cells of one chunk in storage order.
    pub fn cells_in_chunk(&self, pos: ChunkPos) -> Vec<Coord> {
        self.chunks
            .get(&pos)
            .map(|chunk| {
                chunk
                    .bits
                    .iter_ones()
                    .map(|index| coord_at(pos, index))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// All dirty cells in reproducible order.
    pub fn cells(&self) -> Vec<Coord> {
        self.chunk_positions()
            .into_iter()
            .flat_map(|pos| self.cells_in_chunk(pos))
            .collect()
    }

    /// Removes every dirty cell, leaving the set empty.
    pub fn clear(&mut self) {
        self.chunks.clear();
        self.len = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cgmath::Point3;

    #[test]
    fn mark_and_unmark_keep_counts() {
        let mut dirty = DirtySet::new();
        assert!(dirty.mark(Point3::new(0, 0, 0)));
        assert!(!dirty.mark(Point3::new(0, 0, 0)));
        assert!(dirty.mark(Point3::new(-1, 0, 0)));
        assert_eq!(dirty.len(), 2);
        assert_eq!(dirty.chunk_count(), 2);

        assert!(dirty.unmark(Point3::new(-1, 0, 0)));
        assert!(!dirty.unmark(Point3::new(-1, 0, 0)));
        assert_eq!(dirty.len(), 1);
        assert_eq!(dirty.chunk_count(), 1);
        assert!(dirty.contains(Point3::new(0, 0, 0)));
        assert!(!dirty.contains(Point3::new(-1, 0, 0)));
    }

    #[test]
    fn cells_are_sorted_by_chunk_then_storage_order() {
        let mut dirty = DirtySet::new();
        dirty.mark(Point3::new(17, 0, 0));
        dirty.mark(Point3::new(1, 1, 0));
        dirty.mark(Point3::new(0, 0, 1));
        dirty.mark(Point3::new(-3, 0, 0));
        assert_eq!(
            dirty.cells(),
            vec![
                Point3::new(-3, 0, 0),
                Point3::new(1, 1, 0),
                Point3::new(0, 0, 1),
                Point3::new(17, 0, 0),
            ]
        );
    }

    #[test]
    fn remove_chunk_drops_its_cells() {
        let mut dirty = DirtySet::new();
        dirty.mark(Point3::new(1, 2, 3));
        dirty.mark(Point3::new(4, 5, 6));
        dirty.mark(Point3::new(40, 5, 6));
        assert_eq!(dirty.remove_chunk(Point3::new(0, 0, 0)), 2);
        assert_eq!(dirty.len(), 1);
        assert_eq!(dirty.remove_chunk(Point3::new(0, 0, 0)), 0);
    }

    #[test]
    fn region_contains_is_inclusive() {
        let region = Region::new(Point3::new(2, 0, 2), Point3::new(-2, 4, -2));
        assert!(region.contains(Point3::new(-2, 4, 2)));
        assert!(!region.contains(Point3::new(0, 5, 0)));
        assert!(Region::everything().contains(Point3::new(i32::MIN, 0, i32::MAX)));
    }
}
