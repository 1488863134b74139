//! # Sequential Evaluator
//!
//! Walks the selected dirty cells one at a time on the calling thread,
//! fetches each plan's footprint through [`VoxelAccess::neighbors`] and runs
//! the plan's instruction streams. Cells are visited chunk by chunk in the
//! order the scheduler selected them, which keeps runs reproducible.

use log::trace;

use crate::error::EvalError;
use crate::evaluation::{resolve_chain, Pass, RuleBook, WorkChunk};
use crate::voxels::world::VoxelAccess;

/// Single-threaded evaluator over the store accessor.
#[derive(Debug, Clone, Copy, Default)]
pub struct SequentialEvaluator;

impl SequentialEvaluator {
    /// Evaluates every selected cell against the loaded plans.
    ///
    /// # Arguments
    /// * `store` - Snapshot of the current generation, read only
    /// * `book` - Loaded plans
    /// * `work` - Selected dirty cells, grouped by chunk
    ///
    /// # Returns
    /// A pass holding the next state of every cell that changes, or the first
    /// `EvalError` encountered.
    pub fn evaluate<S: VoxelAccess + ?Sized>(
        &self,
        store: &S,
        book: &RuleBook,
        work: &[WorkChunk],
    ) -> Result<Pass, EvalError> {
        let mut pass = Pass::default();
        for chunk in work {
            trace!("Evaluating {} cells of chunk {:?}", chunk.cells.len(), chunk.position);
            for &coord in &chunk.cells {
                let current = store.cell(coord);
                let (outcome, tested) = resolve_chain(book.chain(current.block), |plan| {
                    let footprint = store.neighbors(coord, plan.footprint().offsets());
                    plan.program().evaluate(&footprint)
                })?;
                pass.stats.processed_cells += 1;
                pass.stats.rules_tested += tested;
                if let Some(outcome) = outcome.filter(|o| o.changed()) {
                    pass.writes.insert(coord, outcome.next)?;
                    pass.stats.modified_cells += 1;
                }
            }
        }
        Ok(pass)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::compiler::Compiler;
    use crate::rules::samples;
    use crate::voxels::block::block_registry::BlockRegistry;
    use crate::voxels::block::Cell;
    use crate::voxels::chunk_of;
    use crate::voxels::world::VoxelStore;
    use cgmath::Point3;
    use std::sync::Arc;

    #[test]
    fn sand_and_void_swap_through_two_rules() {
        let registry = BlockRegistry::new();
        let sand = registry.id("sand").unwrap();
        let mut book = RuleBook::new();
        book.insert(Arc::new(Compiler::new(&registry, 4).compile(&samples::gravity()).unwrap()));

        let mut store = VoxelStore::new();
        store.set_cell(Point3::new(0, 5, 0), Cell::new(sand)).unwrap();
        let cells = vec![Point3::new(0, 5, 0), Point3::new(0, 4, 0), Point3::new(0, 6, 0)];
        let work = [WorkChunk {
            position: chunk_of(cells[0]),
            cells,
        }];

        let pass = SequentialEvaluator.evaluate(&store, &book, &work).unwrap();
        assert_eq!(pass.writes.get(Point3::new(0, 5, 0)), Some(Cell::VOID));
        assert_eq!(pass.writes.get(Point3::new(0, 4, 0)), Some(Cell::new(sand)));
        assert_eq!(pass.writes.get(Point3::new(0, 6, 0)), None);
        assert_eq!(pass.stats.processed_cells, 3);
        assert_eq!(pass.stats.modified_cells, 2);
        // The store itself is untouched until commit.
        assert_eq!(store.cell(Point3::new(0, 5, 0)), Cell::new(sand));
    }

    #[test]
    fn cells_without_a_plan_are_processed_but_never_written() {
        let registry = BlockRegistry::new();
        let stone = registry.id("stone").unwrap();
        let mut book = RuleBook::new();
        book.insert(Arc::new(Compiler::new(&registry, 4).compile(&samples::gravity()).unwrap()));
        let mut store = VoxelStore::new();
        store.set_cell(Point3::new(0, 1, 0), Cell::new(stone)).unwrap();
        let work = [WorkChunk {
            position: Point3::new(0, 0, 0),
            cells: vec![Point3::new(0, 1, 0)],
        }];
        let pass = SequentialEvaluator.evaluate(&store, &book, &work).unwrap();
        assert!(pass.writes.is_empty());
        assert_eq!(pass.stats.processed_cells, 1);
        assert_eq!(pass.stats.rules_tested, 0);
    }
}
