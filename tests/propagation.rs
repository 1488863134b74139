//! Dirty-set propagation, footprint soundness and commit atomicity.

mod common;

use std::cell::RefCell;
use std::sync::Arc;
use std::time::Duration;

use cgmath::{Point3, Vector3};
use serde_json::json;
use voxel_automata::error::{CompileError, StoreError, TickError};
use voxel_automata::evaluation::device::lanes::LaneDevice;
use voxel_automata::evaluation::parallel::ParallelEvaluator;
use voxel_automata::evaluation::sequential::SequentialEvaluator;
use voxel_automata::evaluation::{RuleBook, WorkChunk};
use voxel_automata::rules::compiler::Compiler;
use voxel_automata::rules::{samples, RuleSetDef};
use voxel_automata::scheduler::{Simulation, TickFailure, TickPhase};
use voxel_automata::voxels::block::block_registry::BlockRegistry;
use voxel_automata::voxels::block::Cell;
use voxel_automata::voxels::world::{VoxelAccess, VoxelStore};
use voxel_automata::voxels::chunk::CHUNK_SIZE;
use voxel_automata::voxels::{chunk_of, coord_at, ChunkPos, Coord};

use common::{cell, mixed_world, sequential_config, snapshot};

#[test]
fn only_readers_of_changed_cells_stay_dirty() {
    let mut sim = Simulation::new(VoxelStore::new(), sequential_config());
    sim.load_rule_set(&samples::game_of_life()).unwrap();
    // A lone cell that dies, and a 2x2 still life that never changes.
    sim.place(Point3::new(0, 0, 0), cell("white")).unwrap();
    for (x, z) in [(20, 20), (21, 20), (20, 21), (21, 21)] {
        sim.place(Point3::new(x, 0, z), cell("white")).unwrap();
    }
    assert_eq!(sim.dirty().len(), 9 + 16);

    let tick = sim.step().unwrap();
    assert_eq!(tick.changed_cells, vec![Point3::new(0, 0, 0)]);

    let mut expected = Vec::new();
    for x in -1..=1 {
        for z in -1..=1 {
            expected.push(Point3::new(x, 0, z));
        }
    }
    expected.sort_by_key(voxel_automata::voxels::coord_key);
    assert_eq!(sim.dirty_cells(), expected);

    let tick = sim.step().unwrap();
    assert!(tick.changed_cells.is_empty());
    assert!(sim.dirty().is_empty());
}

#[test]
fn ticks_without_dirty_cells_change_nothing() {
    let mut sim = Simulation::new(mixed_world(), sequential_config());
    let before = snapshot(sim.store());
    let tick = sim.step().unwrap();
    assert!(tick.changed_cells.is_empty());
    assert_eq!(tick.metrics.processed_cells, 0);
    assert!(sim.dirty().is_empty());
    assert_eq!(snapshot(sim.store()), before);
}

#[test]
fn host_edits_wake_neighbors() {
    let mut sim = Simulation::new(VoxelStore::new(), sequential_config());
    sim.load_rule_set(&samples::gravity()).unwrap();
    let sand = common::block("sand");
    sim.store_mut()
        .set_cell(Point3::new(0, 5, 0), Cell::new(sand))
        .unwrap();
    // Writes behind the simulation's back are invisible until marked.
    assert!(sim.dirty().is_empty());
    sim.mark_dirty(Point3::new(0, 5, 0));
    assert_eq!(
        sim.dirty_cells(),
        vec![Point3::new(0, 4, 0), Point3::new(0, 5, 0), Point3::new(0, 6, 0)]
    );
    let tick = sim.step().unwrap();
    assert_eq!(tick.changed_cells, vec![Point3::new(0, 4, 0), Point3::new(0, 5, 0)]);
}

/// Store that remembers every read.
struct RecordingStore {
    inner: VoxelStore,
    reads: RefCell<Vec<Coord>>,
}

impl VoxelAccess for RecordingStore {
    fn cell(&self, coord: Coord) -> Cell {
        self.reads.borrow_mut().push(coord);
        self.inner.cell(coord)
    }

    fn set_cell(&mut self, coord: Coord, cell: Cell) -> Result<(), StoreError> {
        self.inner.set_cell(coord, cell)
    }

    fn is_loaded(&self, chunk: ChunkPos) -> bool {
        self.inner.is_loaded(chunk)
    }

    fn chunk_positions(&self) -> Vec<ChunkPos> {
        self.inner.chunk_positions()
    }
}

#[test]
fn sequential_reads_stay_inside_the_footprint() {
    let registry = BlockRegistry::new();
    let compiler = Compiler::new(&registry, 4);
    let store = RecordingStore {
        inner: mixed_world(),
        reads: RefCell::new(Vec::new()),
    };
    let mut sampled: Vec<Coord> = snapshot(&store.inner).into_iter().map(|(coord, _)| coord).collect();
    sampled.extend([Point3::new(0, 1, 0), Point3::new(9, 1, 9), Point3::new(-3, 0, 2)]);
    store.reads.borrow_mut().clear();

    for def in samples::all() {
        let plan = Arc::new(compiler.compile(&def).unwrap());
        let mut book = RuleBook::new();
        book.insert(Arc::clone(&plan));

        for &coord in sampled.iter().step_by(7) {
            let work = [WorkChunk {
                position: chunk_of(coord),
                cells: vec![coord],
            }];
            SequentialEvaluator.evaluate(&store, &book, &work).unwrap();
            for read in store.reads.borrow_mut().drain(..) {
                let offset: Vector3<i32> = read - coord;
                assert!(
                    plan.footprint().contains(offset),
                    "'{}' read {offset:?} from {coord:?}",
                    plan.name()
                );
            }
        }
    }
}

#[test]
fn device_reads_stay_inside_the_chunk_halo() {
    let registry = BlockRegistry::new();
    let compiler = Compiler::new(&registry, 4);
    let store = RecordingStore {
        inner: mixed_world(),
        reads: RefCell::new(Vec::new()),
    };
    let mut evaluator = ParallelEvaluator::new(
        Box::new(LaneDevice::new(2).unwrap()),
        0,
        Duration::from_secs(10),
    );

    for def in samples::all() {
        let plan = Arc::new(compiler.compile(&def).unwrap());
        let mut book = RuleBook::new();
        book.insert(Arc::clone(&plan));
        let radius = plan.footprint().radius();

        for position in store.inner.chunk_positions() {
            let cells: Vec<Coord> = store
                .inner
                .occupied_cells(position)
                .into_iter()
                .map(|(coord, _)| coord)
                .collect();
            let work = [WorkChunk { position, cells }];
            store.reads.borrow_mut().clear();
            evaluator.evaluate(&store, &book, &work).unwrap();

            let low = coord_at(position, 0);
            let high = coord_at(position, CHUNK_SIZE as usize - 1);
            for read in store.reads.borrow().iter() {
                let inside = (low.x - radius..=high.x + radius).contains(&read.x)
                    && (low.y - radius..=high.y + radius).contains(&read.y)
                    && (low.z - radius..=high.z + radius).contains(&read.z);
                assert!(inside, "'{}' read {read:?} for chunk {position:?}", plan.name());
            }
        }
    }
}

#[test]
fn kernel_deltas_cover_exactly_the_footprint() {
    let registry = BlockRegistry::new();
    let compiler = Compiler::new(&registry, 4);
    for def in samples::all() {
        let plan = compiler.compile(&def).unwrap();
        let layout = plan.kernel().window();
        assert_eq!(layout.radius, plan.footprint().radius());
        let expected: Vec<i32> = plan
            .footprint()
            .offsets()
            .iter()
            .map(|o| layout.delta(o.x, o.y, o.z))
            .collect();
        assert_eq!(plan.kernel().deltas(), expected.as_slice());
    }
}

#[test]
fn compiling_twice_yields_identical_plans() {
    let registry = BlockRegistry::new();
    let compiler = Compiler::new(&registry, 4);
    for def in samples::all() {
        let first = compiler.compile(&def).unwrap();
        let second = compiler.compile(&def).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.fingerprint(), second.fingerprint());
        assert_eq!(first.kernel().source(), second.kernel().source());
    }
}

#[test]
fn reads_beyond_the_radius_are_rejected_at_load() {
    let def: RuleSetDef = serde_json::from_value(json!({
        "name": "far_sight",
        "scope": ["sand"],
        "rules": [ {
            "when": { "gt": [
                { "count": { "around": [[3, 0, 0]], "when": { "is": { "at": [2, 0, 0], "block": "sand" } } } },
                { "literal": 0 }
            ] },
            "then": [ "clear" ]
        } ]
    }))
    .unwrap();

    let mut sim = Simulation::new(VoxelStore::new(), sequential_config());
    let err = sim.load_rule_set(&def).unwrap_err();
    assert_eq!(
        err,
        CompileError::UnboundedFootprint {
            rule_set: "far_sight".into(),
            offset: [5, 0, 0],
            limit: 4,
        }
    );
    assert!(sim.rule_book().is_empty());
}

/// Store that refuses writes to one cell with a fixed error.
struct RefusingStore {
    inner: VoxelStore,
    refuse: Option<(Coord, StoreError)>,
}

impl VoxelAccess for RefusingStore {
    fn cell(&self, coord: Coord) -> Cell {
        self.inner.cell(coord)
    }

    fn set_cell(&mut self, coord: Coord, cell: Cell) -> Result<(), StoreError> {
        match &self.refuse {
            Some((refused, err)) if *refused == coord => Err(err.clone()),
            _ => self.inner.set_cell(coord, cell),
        }
    }

    fn is_loaded(&self, chunk: ChunkPos) -> bool {
        self.inner.is_loaded(chunk)
    }

    fn chunk_positions(&self) -> Vec<ChunkPos> {
        self.inner.chunk_positions()
    }
}

fn refusing_sand_drop(err: StoreError) -> Simulation<RefusingStore> {
    let mut inner = VoxelStore::new();
    inner.set_cell(Point3::new(0, 3, 0), cell("sand")).unwrap();
    let store = RefusingStore {
        inner,
        refuse: Some((Point3::new(0, 3, 0), err)),
    };
    let mut sim = Simulation::new(store, sequential_config());
    sim.load_rule_set(&samples::gravity()).unwrap();
    sim
}

#[test]
fn chunk_lost_during_commit_keeps_the_generation() {
    let lost = Point3::new(0, 0, 0);
    let mut sim = refusing_sand_drop(StoreError::RegionUnavailable(lost));
    let dirty_before = sim.dirty_cells();

    let tick = sim.step().unwrap();
    assert_eq!(tick.failures, vec![TickFailure::RegionUnavailable { chunk: lost }]);
    assert!(tick.changed_cells.is_empty());
    assert_eq!(tick.generation, 0);
    assert_eq!(tick.metrics.modified_cells, 0);
    // The first write of the buffer was rolled back.
    assert_eq!(sim.store().cell(Point3::new(0, 2, 0)), Cell::VOID);
    assert_eq!(sim.store().cell(Point3::new(0, 3, 0)), cell("sand"));
    assert_eq!(sim.generation(), 0);
    assert_eq!(sim.phase(), TickPhase::Idle);
    assert_eq!(sim.dirty_cells(), dirty_before);

    // Once the chunk is back the same cells are retried.
    sim.store_mut().refuse = None;
    let tick = sim.step().unwrap();
    assert!(tick.failures.is_empty());
    assert_eq!(tick.generation, 1);
    assert_eq!(tick.changed_cells, vec![Point3::new(0, 2, 0), Point3::new(0, 3, 0)]);
}

#[test]
fn refused_write_aborts_the_whole_tick() {
    let refused = Point3::new(0, 3, 0);
    let mut sim = refusing_sand_drop(StoreError::OutOfBounds(refused));
    let dirty_before = sim.dirty_cells();

    let err = sim.step().unwrap_err();
    assert_eq!(err, TickError::CommitAborted(StoreError::OutOfBounds(refused)));
    assert_eq!(sim.store().cell(Point3::new(0, 2, 0)), Cell::VOID);
    assert_eq!(sim.store().cell(Point3::new(0, 3, 0)), cell("sand"));
    assert_eq!(sim.generation(), 0);
    assert_eq!(sim.phase(), TickPhase::Idle);
    assert_eq!(sim.dirty_cells(), dirty_before);
}
