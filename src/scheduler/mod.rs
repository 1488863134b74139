//! # Scheduler Module
//!
//! Drives simulation ticks over a host-provided voxel accessor.
//!
//! ## Tick State Machine
//!
//! ```text
//! Idle -> SnapshotTaken -> Evaluating -> Committing -> Idle
//! ```
//!
//! * **SnapshotTaken**: the dirty cells inside the requested region and in
//!   loaded chunks are selected. The store is not written again until commit,
//!   so evaluators read exactly one generation.
//! * **Evaluating**: the parallel evaluator runs when a device is configured
//!   and enough cells are dirty; otherwise, or when the dispatch fails, the
//!   sequential evaluator runs. Partial results of a failed dispatch are
//!   dropped.
//! * **Committing**: the [`DiffApplier`] writes the buffer as a whole and
//!   propagates dirtiness through the union footprint.
//!
//! `step_tick` takes `&mut self`, so only one tick is ever in flight and a
//! new snapshot cannot begin before the previous commit finished.
//!
//! ## Key Concepts
//!
//! - **Generation**: incremented once per completed tick, empty ticks included.
//! - **Tracked cells**: non-void cells whose block type some rule-set covers.
//!   They are marked dirty when a rule-set is loaded or their chunk is loaded.
//! - **Pending cells**: dirty cells outside the requested region or in
//!   unavailable chunks. They stay dirty for a later tick.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, trace, warn};
use web_time::Instant;

use crate::config::SimulationConfig;
use crate::error::{CompileError, ConfigError, DispatchError, StoreError, TickError};
use crate::evaluation::device::{self, ComputeDevice};
use crate::evaluation::parallel::ParallelEvaluator;
use crate::evaluation::sequential::SequentialEvaluator;
use crate::evaluation::{Pass, RuleBook, WorkChunk};
use crate::rules::compiler::{CompiledPlan, Compiler};
use crate::rules::RuleSetDef;
use crate::voxels::block::block_registry::BlockRegistry;
use crate::voxels::block::Cell;
use crate::voxels::dirty_set::{DirtySet, Region};
use crate::voxels::world::VoxelAccess;
use crate::voxels::{coord_key, ChunkPos, Coord};

pub mod diff_applier;

use diff_applier::{mark_readers, DiffApplier};

/// Phase of the tick state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickPhase {
    /// Between ticks.
    Idle,
    /// Work selected from the current generation.
    SnapshotTaken,
    /// An evaluator is running.
    Evaluating,
    /// The write buffer is being committed.
    Committing,
}

/// Which evaluator produced a tick's writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backend {
    /// Nothing was dirty in the region.
    Idle,
    /// The sequential evaluator.
    Sequential,
    /// The parallel evaluator on the named device.
    Parallel(String),
}

/// A tick that could not cover part of its region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickFailure {
    /// A chunk holding dirty cells was unavailable; its cells stay dirty.
    RegionUnavailable {
        /// Position of the unavailable chunk.
        chunk: ChunkPos,
    },
}

/// Counters of one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Metrics {
    /// Chunks holding evaluated cells.
    pub processed_chunks: usize,
    /// Cells evaluated.
    pub processed_cells: usize,
    /// Cells written.
    pub modified_cells: usize,
    /// Rule guards evaluated, or work items dispatched on a device.
    pub rules_tested: usize,
    /// Dispatches that failed and were redone sequentially.
    pub fallbacks: usize,
    /// Wall time of the tick.
    pub elapsed: Duration,
}

/// Outcome of a completed tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickResult {
    /// Generation reached by this tick.
    pub generation: u64,
    /// Cells whose state changed, in coordinate order.
    pub changed_cells: Vec<Coord>,
    /// Parts of the region that could not be evaluated.
    pub failures: Vec<TickFailure>,
    /// Evaluator that produced the writes.
    pub backend: Backend,
    /// Tick counters.
    pub metrics: Metrics,
}

/// A rule-driven simulation over a voxel accessor.
///
/// # Examples
///
/// ```
/// use cgmath::Point3;
/// use voxel_automata::config::{DeviceKind, SimulationConfig};
/// use voxel_automata::rules::samples;
/// use voxel_automata::scheduler::Simulation;
/// use voxel_automata::voxels::block::Cell;
/// use voxel_automata::voxels::world::{VoxelAccess, VoxelStore};
///
/// let config = SimulationConfig { device: DeviceKind::Sequential, ..Default::default() };
/// let mut sim = Simulation::new(VoxelStore::new(), config);
/// sim.load_rule_set(&samples::gravity()).unwrap();
///
/// let sand = sim.registry().id("sand").unwrap();
/// sim.place(Point3::new(0, 1, 0), Cell::new(sand)).unwrap();
/// let tick = sim.step().unwrap();
///
/// assert_eq!(tick.changed_cells, vec![Point3::new(0, 0, 0), Point3::new(0, 1, 0)]);
/// assert_eq!(sim.store().cell(Point3::new(0, 0, 0)), Cell::new(sand));
/// ```
pub struct Simulation<S: VoxelAccess> {
    store: S,
    registry: BlockRegistry,
    config: SimulationConfig,
    book: RuleBook,
    dirty: DirtySet,
    generation: u64,
    phase: TickPhase,
    parallel: Option<ParallelEvaluator>,
}

impl<S: VoxelAccess> Simulation<S> {
    /// Creates a simulation, opening the device the configuration selects.
    pub fn new(store: S, config: SimulationConfig) -> Self {
        let device = device::open(&config);
        Self::build(store, config, device)
    }

    /// Creates a simulation dispatching to a caller-provided device.
    pub fn with_device(store: S, config: SimulationConfig, device: Box<dyn ComputeDevice>) -> Self {
        Self::build(store, config, Some(device))
    }

    fn build(store: S, config: SimulationConfig, device: Option<Box<dyn ComputeDevice>>) -> Self {
        let parallel = device.map(|device| {
            ParallelEvaluator::new(device, config.parallel_min_cells, config.dispatch_timeout())
        });
        Simulation {
            store,
            registry: BlockRegistry::new(),
            config,
            book: RuleBook::new(),
            dirty: DirtySet::new(),
            generation: 0,
            phase: TickPhase::Idle,
            parallel,
        }
    }

    /// Compiles and loads a rule-set, replacing one with the same name.
    ///
    /// Tracked cells of every loaded chunk covered by the rule-set become dirty.
    ///
    /// # Returns
    /// The compiled plan, or the `CompileError` that rejected the definition.
    /// A rejected rule-set leaves the loaded ones untouched.
    pub fn load_rule_set(&mut self, def: &RuleSetDef) -> Result<Arc<CompiledPlan>, CompileError> {
        let plan = Arc::new(Compiler::new(&self.registry, self.config.max_footprint_radius).compile(def)?);
        if self.book.insert(Arc::clone(&plan)).is_some() {
            info!("Replaced rule-set '{}'", plan.name());
        } else {
            info!("Loaded rule-set '{}'", plan.name());
        }

        let mut seeded = 0;
        for chunk in self.store.chunk_positions() {
            seeded += self.seed_chunk(chunk, |cell| plan.applies_to(cell.block));
        }
        debug!("Rule-set '{}' seeded {seeded} dirty cells", plan.name());
        Ok(plan)
    }

    /// Parses a JSON rule-set or array of rule-sets and loads each in order.
    ///
    /// # Returns
    /// The compiled plans. Parsing fails before anything is loaded; a compile
    /// error stops at the failing rule-set, earlier ones stay loaded.
    pub fn load_rule_sets_json(&mut self, text: &str) -> Result<Vec<Arc<CompiledPlan>>, ConfigError> {
        let defs = RuleSetDef::many_from_json(text)?;
        defs.iter()
            .map(|def| {
                self.load_rule_set(def).map_err(|err| ConfigError::Invalid {
                    field: "rules",
                    reason: err.to_string(),
                })
            })
            .collect()
    }

    /// Unloads a rule-set by name.
    pub fn unload_rule_set(&mut self, name: &str) -> Option<Arc<CompiledPlan>> {
        let removed = self.book.remove(name);
        if removed.is_some() {
            info!("Unloaded rule-set '{name}'");
        }
        removed
    }

    /// Marks a cell changed by the host: it and every cell whose footprint
    /// reaches it are evaluated next tick.
    pub fn mark_dirty(&mut self, coord: Coord) {
        let reverse = self.book.reverse_offsets();
        mark_readers(&mut self.dirty, &self.store, coord, &reverse);
    }

    /// Writes a cell on behalf of the host and marks it dirty.
    pub fn place(&mut self, coord: Coord, cell: Cell) -> Result<(), StoreError> {
        self.store.set_cell(coord, cell)?;
        self.mark_dirty(coord);
        Ok(())
    }

    /// Host notification that a chunk became available. Its tracked cells
    /// become dirty.
    pub fn on_chunk_loaded(&mut self, chunk: ChunkPos) -> usize {
        let book = &self.book;
        let tracked = |cell: Cell| book.tracks(cell.block);
        let cells: Vec<Coord> = self
            .store
            .occupied_cells(chunk)
            .into_iter()
            .filter(|(_, cell)| tracked(*cell))
            .map(|(coord, _)| coord)
            .collect();
        let reverse = self.book.reverse_offsets();
        let seeded = cells
            .into_iter()
            .map(|coord| mark_readers(&mut self.dirty, &self.store, coord, &reverse))
            .sum();
        debug!("Chunk {chunk:?} loaded, {seeded} cells marked dirty");
        seeded
    }

    /// Host notification that a chunk went away. Its dirty cells are dropped.
    pub fn on_chunk_unloaded(&mut self, chunk: ChunkPos) -> usize {
        let dropped = self.dirty.remove_chunk(chunk);
        debug!("Chunk {chunk:?} unloaded, {dropped} dirty cells dropped");
        dropped
    }

    fn seed_chunk(&mut self, chunk: ChunkPos, covered: impl Fn(Cell) -> bool) -> usize {
        if !self.store.is_loaded(chunk) {
            return 0;
        }
        let reverse = self.book.reverse_offsets();
        let mut seeded = 0;
        for (coord, cell) in self.store.occupied_cells(chunk) {
            if covered(cell) {
                seeded += mark_readers(&mut self.dirty, &self.store, coord, &reverse);
            }
        }
        seeded
    }

    /// Advances the whole world by one generation.
    pub fn step(&mut self) -> Result<TickResult, TickError> {
        self.step_tick(&Region::everything())
    }

    /// Advances the dirty cells inside `region` by one generation.
    ///
    /// A chunk that becomes unavailable between selection and commit is not
    /// an error: the tick is reported with a `TickFailure::RegionUnavailable`,
    /// no changes, and the generation and dirty set left as they were.
    ///
    /// # Returns
    /// The tick result, or a `TickError` when no evaluator could produce a
    /// write buffer or the store refused the buffer for another reason. After
    /// an error the store and the dirty set hold the previous generation.
    pub fn step_tick(&mut self, region: &Region) -> Result<TickResult, TickError> {
        let started = Instant::now();

        self.enter(TickPhase::SnapshotTaken);
        let (work, failures) = self.select(region);
        let cell_count: usize = work.iter().map(|chunk| chunk.cells.len()).sum();

        self.enter(TickPhase::Evaluating);
        let mut fallbacks = 0;
        let (pass, backend) = match self.evaluate(&work, cell_count, &mut fallbacks) {
            Ok(evaluated) => evaluated,
            Err(err) => {
                error!("Tick {} failed: {err}", self.generation + 1);
                self.enter(TickPhase::Idle);
                return Err(err);
            }
        };

        self.enter(TickPhase::Committing);
        let changed_cells = match DiffApplier.commit(&mut self.store, &pass.writes) {
            Ok(changed) => changed,
            Err(StoreError::RegionUnavailable(chunk)) => {
                warn!(
                    "Chunk {chunk:?} became unavailable during tick {}, generation kept",
                    self.generation + 1
                );
                self.enter(TickPhase::Idle);
                let mut failures = failures;
                failures.push(TickFailure::RegionUnavailable { chunk });
                return Ok(TickResult {
                    generation: self.generation,
                    changed_cells: Vec::new(),
                    failures,
                    backend,
                    metrics: Metrics {
                        processed_chunks: work.len(),
                        processed_cells: pass.stats.processed_cells,
                        modified_cells: 0,
                        rules_tested: pass.stats.rules_tested,
                        fallbacks,
                        elapsed: started.elapsed(),
                    },
                });
            }
            Err(err) => {
                error!("Commit of tick {} aborted: {err}", self.generation + 1);
                self.enter(TickPhase::Idle);
                return Err(TickError::CommitAborted(err));
            }
        };
        let reverse = self.book.reverse_offsets();
        DiffApplier.propagate(&mut self.dirty, &self.store, &work, &changed_cells, &reverse);

        self.generation += 1;
        self.enter(TickPhase::Idle);

        let metrics = Metrics {
            processed_chunks: work.len(),
            processed_cells: pass.stats.processed_cells,
            modified_cells: changed_cells.len(),
            rules_tested: pass.stats.rules_tested,
            fallbacks,
            elapsed: started.elapsed(),
        };
        debug!(
            "Tick {} ({backend:?}): {} cells in {} chunks, {} changed, {} dirty next, {:?}",
            self.generation,
            metrics.processed_cells,
            metrics.processed_chunks,
            metrics.modified_cells,
            self.dirty.len(),
            metrics.elapsed
        );

        Ok(TickResult {
            generation: self.generation,
            changed_cells,
            failures,
            backend,
            metrics,
        })
    }

    fn enter(&mut self, phase: TickPhase) {
        trace!("Tick phase {:?} -> {:?}", self.phase, phase);
        self.phase = phase;
    }

    /// Splits the dirty set into evaluable work and unavailable chunks.
    fn select(&self, region: &Region) -> (Vec<WorkChunk>, Vec<TickFailure>) {
        let mut work = Vec::new();
        let mut failures = Vec::new();
        for position in self.dirty.chunk_positions() {
            let cells: Vec<Coord> = self
                .dirty
                .cells_in_chunk(position)
                .into_iter()
                .filter(|coord| region.contains(*coord))
                .collect();
            if cells.is_empty() {
                continue;
            }
            if !self.store.is_loaded(position) {
                warn!("Chunk {position:?} unavailable, {} dirty cells deferred", cells.len());
                failures.push(TickFailure::RegionUnavailable { chunk: position });
                continue;
            }
            work.push(WorkChunk { position, cells });
        }
        (work, failures)
    }

    fn evaluate(
        &mut self,
        work: &[WorkChunk],
        cell_count: usize,
        fallbacks: &mut usize,
    ) -> Result<(Pass, Backend), TickError> {
        if cell_count == 0 {
            return Ok((Pass::default(), Backend::Idle));
        }

        let mut dispatch_error: Option<DispatchError> = None;
        if let Some(parallel) = self.parallel.as_mut().filter(|p| p.accepts(cell_count)) {
            match parallel.evaluate(&self.store, &self.book, work) {
                Ok(pass) => return Ok((pass, Backend::Parallel(parallel.device_name().to_owned()))),
                Err(err) => {
                    warn!(
                        "Parallel evaluation on {} failed, retrying sequentially: {err}",
                        parallel.device_name()
                    );
                    *fallbacks += 1;
                    dispatch_error = Some(err);
                }
            }
        }

        SequentialEvaluator
            .evaluate(&self.store, &self.book, work)
            .map(|pass| (pass, Backend::Sequential))
            .map_err(|sequential| TickError::NoWorkingEvaluator {
                parallel: dispatch_error,
                sequential,
            })
    }

    /// The voxel accessor.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Mutable access to the voxel accessor. Changes made through it are not
    /// marked dirty; call [`Simulation::mark_dirty`] for them.
    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// Block name table used when compiling rule-sets.
    pub fn registry(&self) -> &BlockRegistry {
        &self.registry
    }

    /// Mutable block name table, for registering custom block types.
    pub fn registry_mut(&mut self) -> &mut BlockRegistry {
        &mut self.registry
    }

    /// Loaded plans.
    pub fn rule_book(&self) -> &RuleBook {
        &self.book
    }

    /// Cells awaiting evaluation.
    pub fn dirty(&self) -> &DirtySet {
        &self.dirty
    }

    /// Dirty cells in coordinate order.
    pub fn dirty_cells(&self) -> Vec<Coord> {
        let mut cells = self.dirty.cells();
        cells.sort_by_key(coord_key);
        cells
    }

    /// Number of completed ticks.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Current tick phase, `Idle` between ticks.
    pub fn phase(&self) -> TickPhase {
        self.phase
    }

    /// The configuration.
    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Name of the parallel device, if one is attached.
    pub fn device_name(&self) -> Option<&str> {
        self.parallel.as_ref().map(ParallelEvaluator::device_name)
    }
}
