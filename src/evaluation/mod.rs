//! # Evaluation Module
//!
//! Everything that turns a frozen snapshot plus compiled plans into a buffer
//! of next-generation writes.
//!
//! ## Architecture
//!
//! * [`RuleBook`] - the loaded plans in load order, indexed by block type
//! * [`WriteBuffer`] - write-once map of pending cell states for one tick
//! * [`sequential`] - evaluates cells one by one through the store accessor
//! * [`parallel`] - packs halo windows and dispatches them to a [`device::ComputeDevice`]
//!
//! Both evaluators read the store through a shared reference only and resolve
//! every cell with [`resolve_chain`], so they agree on how several rule-sets
//! covering the same block type combine: plans are consulted in load order and
//! the first plan with a matching rule decides the cell.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::EvalError;
use crate::rules::compiler::{CompiledPlan, Footprint};
use crate::rules::program::CellOutcome;
use crate::voxels::block::{BlockId, Cell};
use crate::voxels::{coord_key, ChunkPos, Coord, Offset};

pub mod device;
pub mod parallel;
pub mod sequential;

/// Pending next-generation states, keyed by coordinate.
///
/// Every coordinate may be written at most once per tick. Evaluators never
/// read from it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBuffer {
    writes: HashMap<Coord, Cell>,
}

impl WriteBuffer {
    /// Creates an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the next state of a cell.
    ///
    /// # Returns
    /// `EvalError::DuplicateWrite` if the coordinate already has a pending write.
    pub fn insert(&mut self, coord: Coord, cell: Cell) -> Result<(), EvalError> {
        if self.writes.insert(coord, cell).is_some() {
            return Err(EvalError::DuplicateWrite(coord));
        }
        Ok(())
    }

    /// Pending state of a cell, if any.
    pub fn get(&self, coord: Coord) -> Option<Cell> {
        self.writes.get(&coord).copied()
    }

    /// Number of pending writes.
    pub fn len(&self) -> usize {
        self.writes.len()
    }

    /// Returns `true` if nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    /// Pending writes ordered by coordinate.
    pub fn sorted(&self) -> Vec<(Coord, Cell)> {
        let mut entries: Vec<(Coord, Cell)> =
            self.writes.iter().map(|(coord, cell)| (*coord, *cell)).collect();
        entries.sort_unstable_by_key(|(coord, _)| coord_key(coord));
        entries
    }
}

/// The dirty cells of one chunk selected for evaluation this tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkChunk {
    /// Chunk position.
    pub position: ChunkPos,
    /// Dirty cells inside the chunk and the tick's region.
    pub cells: Vec<Coord>,
}

/// Counters of one evaluation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassStats {
    /// Cells evaluated.
    pub processed_cells: usize,
    /// Cells whose next state differs from the current one.
    pub modified_cells: usize,
    /// Rule guards evaluated on the CPU, or work items dispatched to a device.
    pub rules_tested: usize,
}

/// Output of an evaluator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pass {
    /// Next states of changed cells.
    pub writes: WriteBuffer,
    /// Pass counters.
    pub stats: PassStats,
}

/// Loaded compiled plans.
#[derive(Debug, Clone)]
pub struct RuleBook {
    plans: Vec<Arc<CompiledPlan>>,
    by_block: HashMap<BlockId, Vec<usize>>,
    union: Footprint,
}

impl Default for RuleBook {
    fn default() -> Self {
        RuleBook {
            plans: Vec::new(),
            by_block: HashMap::new(),
            union: Footprint::new(std::iter::empty()),
        }
    }
}

impl RuleBook {
    /// Creates an empty rule book.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a plan. A plan with the same name is replaced in place, keeping its
    /// position in load order.
    ///
    /// # Returns
    /// The replaced plan, if any.
    pub fn insert(&mut self, plan: Arc<CompiledPlan>) -> Option<Arc<CompiledPlan>> {
        let replaced = match self.plans.iter().position(|p| p.name() == plan.name()) {
            Some(index) => Some(std::mem::replace(&mut self.plans[index], plan)),
            None => {
                self.plans.push(plan);
                None
            }
        };
        self.reindex();
        replaced
    }

    /// Removes a plan by name.
    pub fn remove(&mut self, name: &str) -> Option<Arc<CompiledPlan>> {
        let index = self.plans.iter().position(|p| p.name() == name)?;
        let removed = self.plans.remove(index);
        self.reindex();
        Some(removed)
    }

    /// Plan by name.
    pub fn get(&self, name: &str) -> Option<&Arc<CompiledPlan>> {
        self.plans.iter().find(|p| p.name() == name)
    }

    /// All plans in load order.
    pub fn plans(&self) -> &[Arc<CompiledPlan>] {
        &self.plans
    }

    /// Number of loaded plans.
    pub fn len(&self) -> usize {
        self.plans.len()
    }

    /// Returns `true` if no plan is loaded.
    pub fn is_empty(&self) -> bool {
        self.plans.is_empty()
    }

    /// Plans covering a block type, in load order.
    pub fn chain(&self, block: BlockId) -> impl Iterator<Item = &Arc<CompiledPlan>> + '_ {
        self.by_block
            .get(&block)
            .map(Vec::as_slice)
            .unwrap_or(&[])
            .iter()
            .map(move |&index| &self.plans[index])
    }

    /// Indices into [`RuleBook::plans`] of the plans covering a block type.
    pub fn chain_indices(&self, block: BlockId) -> &[usize] {
        self.by_block.get(&block).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Returns `true` if some plan evaluates cells of this block type.
    pub fn tracks(&self, block: BlockId) -> bool {
        self.by_block.contains_key(&block)
    }

    /// Union of every loaded plan's footprint.
    pub fn union_footprint(&self) -> &Footprint {
        &self.union
    }

    /// Offsets `-o` for every offset `o` of the union footprint: the cells whose
    /// evaluation may read a given cell are at `cell + reverse`.
    pub fn reverse_offsets(&self) -> Vec<Offset> {
        self.union.offsets().iter().map(|o| -*o).collect()
    }

    fn reindex(&mut self) {
        self.by_block.clear();
        for (index, plan) in self.plans.iter().enumerate() {
            for &block in plan.scope() {
                self.by_block.entry(block).or_default().push(index);
            }
        }
        self.union = Footprint::new(
            self.plans
                .iter()
                .flat_map(|plan| plan.footprint().offsets().iter().copied()),
        );
    }
}

/// Resolves one cell against its chain of plans.
///
/// `evaluate` is called for each plan in order until one reports a match.
///
/// # Returns
/// The deciding outcome (or `None` when no plan matched) and the number of
/// rule guards evaluated.
pub fn resolve_chain<'p, I, F>(chain: I, mut evaluate: F) -> Result<(Option<CellOutcome>, usize), EvalError>
where
    I: IntoIterator<Item = &'p Arc<CompiledPlan>>,
    F: FnMut(&'p Arc<CompiledPlan>) -> Result<CellOutcome, EvalError>,
{
    let mut rules_tested = 0;
    for plan in chain {
        let outcome = evaluate(plan)?;
        rules_tested += usize::from(outcome.rules_tested);
        if outcome.matched {
            return Ok((Some(outcome), rules_tested));
        }
    }
    Ok((None, rules_tested))
}
