//! # Diff Applier
//!
//! Commits a tick's write buffer into the store and computes the next dirty set.
//!
//! A commit is all-or-nothing: every target is validated before the first
//! write, and if the accessor still rejects a write part-way through, the
//! cells already written are restored to their previous values before the
//! error is returned.

use log::error;

use crate::error::StoreError;
use crate::evaluation::{WorkChunk, WriteBuffer};
use crate::voxels::dirty_set::DirtySet;
use crate::voxels::block::Cell;
use crate::voxels::world::VoxelAccess;
use crate::voxels::{chunk_of, shifted, Coord, Offset};

/// Applies write buffers and propagates dirtiness.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiffApplier;

impl DiffApplier {
    /// Writes every pending cell into the store.
    ///
    /// # Returns
    /// The written coordinates in coordinate order, or the `StoreError` that
    /// aborted the commit. On error the store holds the previous generation.
    pub fn commit<S: VoxelAccess + ?Sized>(
        &self,
        store: &mut S,
        writes: &WriteBuffer,
    ) -> Result<Vec<Coord>, StoreError> {
        let entries = writes.sorted();
        for (coord, _) in &entries {
            if !store.contains(*coord) {
                return Err(StoreError::OutOfBounds(*coord));
            }
            let chunk = chunk_of(*coord);
            if !store.is_loaded(chunk) {
                return Err(StoreError::RegionUnavailable(chunk));
            }
        }

        let mut applied: Vec<(Coord, Cell)> = Vec::with_capacity(entries.len());
        for (coord, cell) in entries {
            let previous = store.cell(coord);
            if let Err(err) = store.set_cell(coord, cell) {
                for (coord, previous) in applied.into_iter().rev() {
                    if let Err(restore) = store.set_cell(coord, previous) {
                        error!("Could not restore {coord:?} after aborted commit: {restore}");
                    }
                }
                return Err(err);
            }
            applied.push((coord, previous));
        }
        Ok(applied.into_iter().map(|(coord, _)| coord).collect())
    }

    /// Computes the next dirty set in place.
    ///
    /// Evaluated cells are removed; cells left pending (outside the region or
    /// in unavailable chunks) stay. Every changed cell then marks itself and
    /// every cell whose footprint reaches it, found through `reverse` offsets.
    ///
    /// # Arguments
    /// * `dirty` - Dirty set of the tick that was just committed
    /// * `store` - Store after the commit, for world bounds
    /// * `work` - Cells evaluated this tick
    /// * `changed` - Cells written this tick
    /// * `reverse` - Negated offsets of the union footprint
    pub fn propagate<S: VoxelAccess + ?Sized>(
        &self,
        dirty: &mut DirtySet,
        store: &S,
        work: &[WorkChunk],
        changed: &[Coord],
        reverse: &[Offset],
    ) {
        for chunk in work {
            for &coord in &chunk.cells {
                dirty.unmark(coord);
            }
        }
        for &coord in changed {
            mark_readers(dirty, store, coord, reverse);
        }
    }
}

/// Marks a cell and every cell whose footprint reaches it.
pub(crate) fn mark_readers<S: VoxelAccess + ?Sized>(
    dirty: &mut DirtySet,
    store: &S,
    coord: Coord,
    reverse: &[Offset],
) -> usize {
    let mut marked = 0;
    for offset in reverse {
        let Some(reader) = shifted(coord, *offset) else {
            continue;
        };
        if store.contains(reader) && dirty.mark(reader) {
            marked += 1;
        }
    }
    marked
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voxels::world::{VoxelStore, WorldBounds};
    use cgmath::{Point3, Vector3};

    /// Store that refuses writes to one cell.
    struct FlakyStore {
        inner: VoxelStore,
        refuse: Coord,
    }

    impl VoxelAccess for FlakyStore {
        fn cell(&self, coord: Coord) -> Cell {
            self.inner.cell(coord)
        }

        fn set_cell(&mut self, coord: Coord, cell: Cell) -> Result<(), StoreError> {
            if coord == self.refuse {
                return Err(StoreError::RegionUnavailable(chunk_of(coord)));
            }
            self.inner.set_cell(coord, cell)
        }

        fn is_loaded(&self, chunk: Point3<i32>) -> bool {
            self.inner.is_loaded(chunk)
        }

        fn chunk_positions(&self) -> Vec<Point3<i32>> {
            self.inner.chunk_positions()
        }
    }

    #[test]
    fn failed_write_rolls_back_the_whole_commit() {
        let mut store = FlakyStore {
            inner: VoxelStore::new(),
            refuse: Point3::new(2, 0, 0),
        };
        let mut writes = WriteBuffer::new();
        for x in 0..3 {
            writes.insert(Point3::new(x, 0, 0), Cell::new(2)).unwrap();
        }
        let err = DiffApplier.commit(&mut store, &writes).unwrap_err();
        assert_eq!(err, StoreError::RegionUnavailable(Point3::new(0, 0, 0)));
        for x in 0..3 {
            assert_eq!(store.cell(Point3::new(x, 0, 0)), Cell::VOID);
        }
    }

    #[test]
    fn commit_validates_before_writing() {
        let mut store = VoxelStore::with_bounds(WorldBounds {
            min_y: Some(0),
            max_y: Some(10),
        });
        let mut writes = WriteBuffer::new();
        writes.insert(Point3::new(0, 1, 0), Cell::new(2)).unwrap();
        writes.insert(Point3::new(0, 10, 0), Cell::new(2)).unwrap();
        assert_eq!(
            DiffApplier.commit(&mut store, &writes),
            Err(StoreError::OutOfBounds(Point3::new(0, 10, 0)))
        );
        assert_eq!(store.cell(Point3::new(0, 1, 0)), Cell::VOID);
    }

    #[test]
    fn propagation_marks_readers_and_prunes_evaluated_cells() {
        let store = VoxelStore::with_bounds(WorldBounds {
            min_y: Some(0),
            max_y: None,
        });
        let mut dirty = DirtySet::new();
        let evaluated = Point3::new(5, 5, 5);
        let pending = Point3::new(40, 5, 5);
        dirty.mark(evaluated);
        dirty.mark(pending);
        let work = [WorkChunk {
            position: chunk_of(evaluated),
            cells: vec![evaluated],
        }];
        let reverse = [Vector3::new(0, 0, 0), Vector3::new(0, 1, 0), Vector3::new(0, -1, 0)];

        DiffApplier.propagate(&mut dirty, &store, &work, &[Point3::new(0, 0, 0)], &reverse);

        assert!(!dirty.contains(evaluated));
        assert!(dirty.contains(pending));
        assert!(dirty.contains(Point3::new(0, 0, 0)));
        assert!(dirty.contains(Point3::new(0, 1, 0)));
        // Below the world floor.
        assert!(!dirty.contains(Point3::new(0, -1, 0)));
        assert_eq!(dirty.len(), 3);
    }
}
