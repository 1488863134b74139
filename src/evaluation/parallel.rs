//! # Parallel Evaluator
//!
//! Packs the selected dirty cells into halo windows and evaluates them on a
//! [`ComputeDevice`].
//!
//! ## Packing
//!
//! For every loaded plan, the cells whose block type the plan covers are
//! gathered chunk by chunk. Each chunk holding such cells contributes one
//! window of edge `16 + 2r` (the plan's footprint radius), read from the
//! snapshot through [`VoxelAccess::cell`], so halo cells from neighboring,
//! unallocated or out-of-bounds chunks read exactly what the sequential
//! evaluator would see. Each cell becomes one work item whose centre is its
//! index in the concatenated windows.
//!
//! ## Combining
//!
//! Devices evaluate every plan of a cell's chain independently. Results are
//! then walked in load order and the first plan that matched decides the cell,
//! which is the sequential evaluator's rule too.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use log::debug;

use crate::error::DispatchError;
use crate::evaluation::device::{Batch, ComputeDevice};
use crate::evaluation::{Pass, RuleBook, WorkChunk};
use crate::rules::compiler::CompiledPlan;
use crate::rules::kernel::WindowLayout;
use crate::rules::program::{FLAG_CHANGED, FLAG_MATCHED};
use crate::voxels::block::Cell;
use crate::voxels::world::VoxelAccess;
use crate::voxels::{coord_at, shifted, ChunkPos, Coord, Offset};

/// Evaluator dispatching packed batches to a compute device.
pub struct ParallelEvaluator {
    device: Box<dyn ComputeDevice>,
    min_cells: usize,
    timeout: Duration,
}

impl ParallelEvaluator {
    /// Creates an evaluator.
    ///
    /// # Arguments
    /// * `device` - Device the batches are dispatched to
    /// * `min_cells` - Smallest number of dirty cells worth a dispatch
    /// * `timeout` - Deadline for each dispatch
    pub fn new(device: Box<dyn ComputeDevice>, min_cells: usize, timeout: Duration) -> Self {
        ParallelEvaluator {
            device,
            min_cells,
            timeout,
        }
    }

    /// Name of the underlying device.
    pub fn device_name(&self) -> &str {
        self.device.name()
    }

    /// Returns `true` if a pass over `cells` cells should be dispatched rather
    /// than evaluated sequentially.
    pub fn accepts(&self, cells: usize) -> bool {
        cells > 0 && cells >= self.min_cells
    }

    /// Evaluates every selected cell on the device.
    ///
    /// # Returns
    /// A pass equal to what [`crate::evaluation::sequential::SequentialEvaluator`]
    /// produces for the same snapshot, or the first `DispatchError`.
    pub fn evaluate<S: VoxelAccess + ?Sized>(
        &mut self,
        store: &S,
        book: &RuleBook,
        work: &[WorkChunk],
    ) -> Result<Pass, DispatchError> {
        // Current block of every selected cell, read once.
        let cells: Vec<(Coord, Cell)> = work
            .iter()
            .flat_map(|chunk| chunk.cells.iter().map(|&coord| (coord, store.cell(coord))))
            .collect();

        // (flags, next) per cell index, per plan index.
        let mut results: Vec<HashMap<usize, (u32, u32)>> = vec![HashMap::new(); book.len()];
        let mut dispatched = 0;

        for (plan_index, plan) in book.plans().iter().enumerate() {
            let packed = pack(store, plan, work, &cells);
            if packed.items.is_empty() {
                continue;
            }
            let words = self.device.dispatch(plan, &packed.batch, self.timeout)?;
            let expected = packed.items.len() * 2;
            if words.len() != expected {
                return Err(DispatchError::MalformedResult {
                    expected,
                    actual: words.len(),
                });
            }
            for (item, &cell_index) in packed.items.iter().enumerate() {
                results[plan_index].insert(cell_index, (words[item * 2], words[item * 2 + 1]));
            }
            dispatched += packed.items.len();
            debug!(
                "Dispatched {} cells of '{}' in {} windows",
                packed.items.len(),
                plan.name(),
                packed.windows
            );
        }

        let mut pass = Pass::default();
        pass.stats.rules_tested = dispatched;
        for (cell_index, &(coord, current)) in cells.iter().enumerate() {
            pass.stats.processed_cells += 1;
            let decided = book
                .chain_indices(current.block)
                .iter()
                .filter_map(|&plan_index| results[plan_index].get(&cell_index))
                .find(|(flags, _)| flags & FLAG_MATCHED != 0);
            let Some(&(flags, next)) = decided else {
                continue;
            };
            if flags & FLAG_CHANGED != 0 {
                let next = Cell::unpack(next);
                if next != current {
                    pass.writes
                        .insert(coord, next)
                        .map_err(|err| DispatchError::Device(err.to_string()))?;
                    pass.stats.modified_cells += 1;
                }
            }
        }
        Ok(pass)
    }
}

/// One plan's batch and the cell each work item stands for.
struct Packed {
    batch: Batch,
    items: Vec<usize>,
    windows: usize,
}

/// Packs the windows of every chunk holding cells covered by `plan`.
fn pack<S: VoxelAccess + ?Sized>(
    store: &S,
    plan: &Arc<CompiledPlan>,
    work: &[WorkChunk],
    cells: &[(Coord, Cell)],
) -> Packed {
    let layout = plan.kernel().window();
    let mut windows: Vec<u32> = Vec::new();
    let mut centres: Vec<u32> = Vec::new();
    let mut items: Vec<usize> = Vec::new();
    let mut window_count = 0;

    let mut cell_index = 0;
    for chunk in work {
        let range = cell_index..cell_index + chunk.cells.len();
        cell_index = range.end;
        let covered: Vec<usize> = range
            .filter(|&index| plan.applies_to(cells[index].1.block))
            .collect();
        if covered.is_empty() {
            continue;
        }

        let base = windows.len();
        pack_window(store, chunk.position, layout, &mut windows);
        window_count += 1;

        let origin = chunk_origin(chunk.position);
        for index in covered {
            let local = cells[index].0 - origin;
            let centre = base + layout.index(local.x + layout.radius, local.y + layout.radius, local.z + layout.radius);
            centres.push(centre as u32);
            items.push(index);
        }
    }

    Packed {
        batch: Batch {
            cells: windows.into(),
            centres: centres.into(),
        },
        items,
        windows: window_count,
    }
}

/// Lowest cell of a chunk. Any chunk that holds a cell has a representable origin.
fn chunk_origin(chunk: ChunkPos) -> Coord {
    coord_at(chunk, 0)
}

/// Appends the window of one chunk, halo included, in window index order.
fn pack_window<S: VoxelAccess + ?Sized>(
    store: &S,
    chunk: ChunkPos,
    layout: WindowLayout,
    out: &mut Vec<u32>,
) {
    let origin = chunk_origin(chunk);
    out.reserve(layout.volume());
    for z in 0..layout.edge {
        for y in 0..layout.edge {
            for x in 0..layout.edge {
                let local = Offset::new(x - layout.radius, y - layout.radius, z - layout.radius);
                let cell = shifted(origin, local).map_or(Cell::VOID, |coord| store.cell(coord));
                out.push(cell.pack());
            }
        }
    }
}
