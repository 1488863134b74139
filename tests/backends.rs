//! Backend equivalence and dispatch fallback.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cgmath::Point3;
use voxel_automata::error::DispatchError;
use voxel_automata::evaluation::device::gpu::GpuDevice;
use voxel_automata::evaluation::device::lanes::LaneDevice;
use voxel_automata::evaluation::device::{Batch, ComputeDevice};
use voxel_automata::rules::compiler::CompiledPlan;
use voxel_automata::rules::samples;
use voxel_automata::scheduler::{Backend, Simulation};
use voxel_automata::voxels::block::Cell;
use voxel_automata::voxels::world::{VoxelAccess, VoxelStore};

use common::{cell, edge_of_space, mixed_world, parallel_config, sequential_config, snapshot};

const TICKS: usize = 12;

fn with_samples(mut sim: Simulation<VoxelStore>) -> Simulation<VoxelStore> {
    for def in samples::all() {
        sim.load_rule_set(&def).unwrap();
    }
    sim
}

/// Runs both simulations in lockstep and compares every tick.
fn assert_lockstep(reference: &mut Simulation<VoxelStore>, candidate: &mut Simulation<VoxelStore>) {
    assert_eq!(reference.dirty_cells(), candidate.dirty_cells());
    for _ in 0..TICKS {
        let expected = reference.step().unwrap();
        let actual = candidate.step().unwrap();
        assert_eq!(actual.changed_cells, expected.changed_cells, "tick {}", expected.generation);
        assert_eq!(snapshot(candidate.store()), snapshot(reference.store()));
        assert_eq!(candidate.dirty_cells(), reference.dirty_cells());
    }
}

#[test]
fn lanes_match_sequential_tick_for_tick() {
    let mut sequential = with_samples(Simulation::new(mixed_world(), sequential_config()));
    let mut lanes = with_samples(Simulation::with_device(
        mixed_world(),
        parallel_config(),
        Box::new(LaneDevice::new(3).unwrap()),
    ));
    assert_eq!(lanes.device_name(), Some("cpu-lanes-3"));

    let first = lanes.step().unwrap();
    assert_eq!(first.backend, Backend::Parallel("cpu-lanes-3".into()));
    assert!(!first.changed_cells.is_empty());
    let reference = sequential.step().unwrap();
    assert_eq!(first.changed_cells, reference.changed_cells);

    assert_lockstep(&mut sequential, &mut lanes);
}

#[test]
fn lanes_match_sequential_at_the_edge_of_coordinate_space() {
    let mut sequential = Simulation::new(VoxelStore::new(), sequential_config());
    edge_of_space(&mut sequential);
    let mut lanes = Simulation::with_device(
        VoxelStore::new(),
        parallel_config(),
        Box::new(LaneDevice::new(2).unwrap()),
    );
    edge_of_space(&mut lanes);

    let first = lanes.step().unwrap();
    assert_eq!(first.backend, Backend::Parallel("cpu-lanes-2".into()));
    assert_eq!(first.changed_cells, sequential.step().unwrap().changed_cells);
    assert_eq!(snapshot(lanes.store()), snapshot(sequential.store()));
    assert_eq!(lanes.store().cell(Point3::new(i32::MIN, 0, 0)), Cell::VOID);
    assert_lockstep(&mut sequential, &mut lanes);
}

#[test]
fn gpu_matches_sequential_when_an_adapter_exists() {
    let device = match GpuDevice::new(4) {
        Ok(device) => device,
        Err(err) => {
            eprintln!("skipping, no GPU adapter: {err}");
            return;
        }
    };
    let mut sequential = with_samples(Simulation::new(mixed_world(), sequential_config()));
    let mut gpu = with_samples(Simulation::with_device(
        mixed_world(),
        parallel_config(),
        Box::new(device),
    ));
    assert_lockstep(&mut sequential, &mut gpu);
}

/// Device that fails every dispatch with a fixed error.
struct FailingDevice {
    error: DispatchError,
    calls: Arc<AtomicUsize>,
}

impl ComputeDevice for FailingDevice {
    fn name(&self) -> &str {
        "failing"
    }

    fn dispatch(
        &mut self,
        _plan: &Arc<CompiledPlan>,
        _batch: &Batch,
        _timeout: Duration,
    ) -> Result<Vec<u32>, DispatchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(self.error.clone())
    }
}

/// Device returning one word per item instead of two.
struct TruncatingDevice;

impl ComputeDevice for TruncatingDevice {
    fn name(&self) -> &str {
        "truncating"
    }

    fn dispatch(
        &mut self,
        _plan: &Arc<CompiledPlan>,
        batch: &Batch,
        _timeout: Duration,
    ) -> Result<Vec<u32>, DispatchError> {
        Ok(vec![0; batch.len()])
    }
}

fn sand_drop(device: Box<dyn ComputeDevice>) -> Simulation<VoxelStore> {
    let mut sim = Simulation::with_device(VoxelStore::new(), parallel_config(), device);
    sim.load_rule_set(&samples::gravity()).unwrap();
    sim.place(Point3::new(0, 3, 0), cell("sand")).unwrap();
    sim
}

#[test]
fn timed_out_dispatch_falls_back_to_sequential() {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut sim = sand_drop(Box::new(FailingDevice {
        error: DispatchError::Timeout(2000),
        calls: Arc::clone(&calls),
    }));

    let tick = sim.step().unwrap();
    assert_eq!(tick.backend, Backend::Sequential);
    assert_eq!(tick.metrics.fallbacks, 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(tick.changed_cells, vec![Point3::new(0, 2, 0), Point3::new(0, 3, 0)]);
    assert_eq!(sim.generation(), 1);
}

#[test]
fn device_errors_fall_back_every_tick() {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut sim = sand_drop(Box::new(FailingDevice {
        error: DispatchError::Device("lost".into()),
        calls: Arc::clone(&calls),
    }));
    for _ in 0..3 {
        let tick = sim.step().unwrap();
        assert_eq!(tick.metrics.fallbacks, 1);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(
        snapshot(sim.store()),
        vec![(Point3::new(0, 0, 0), cell("sand"))]
    );
}

#[test]
fn malformed_results_are_discarded() {
    let mut sim = sand_drop(Box::new(TruncatingDevice));
    let tick = sim.step().unwrap();
    assert_eq!(tick.backend, Backend::Sequential);
    assert_eq!(tick.metrics.fallbacks, 1);
    assert_eq!(tick.changed_cells.len(), 2);
}

#[test]
fn small_ticks_stay_sequential() {
    let config = voxel_automata::config::SimulationConfig {
        parallel_min_cells: 1000,
        ..parallel_config()
    };
    let calls = Arc::new(AtomicUsize::new(0));
    let mut sim = Simulation::with_device(
        VoxelStore::new(),
        config,
        Box::new(FailingDevice {
            error: DispatchError::Unavailable("never asked".into()),
            calls: Arc::clone(&calls),
        }),
    );
    sim.load_rule_set(&samples::gravity()).unwrap();
    sim.place(Point3::new(0, 3, 0), cell("sand")).unwrap();
    let tick = sim.step().unwrap();
    assert_eq!(tick.backend, Backend::Sequential);
    assert_eq!(tick.metrics.fallbacks, 0);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}
