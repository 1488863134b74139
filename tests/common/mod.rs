//! Helpers shared by the integration suites.

#![allow(dead_code)]

use cgmath::Point3;
use voxel_automata::rules::samples;
use voxel_automata::scheduler::Simulation;
use voxel_automata::config::{DeviceKind, SimulationConfig};
use voxel_automata::voxels::block::block_registry::BlockRegistry;
use voxel_automata::voxels::block::{BlockId, Cell};
use voxel_automata::voxels::chunk::Chunk;
use voxel_automata::voxels::world::{VoxelAccess, VoxelStore};
use voxel_automata::voxels::{coord_key, Coord};

pub fn sequential_config() -> SimulationConfig {
    SimulationConfig {
        device: DeviceKind::Sequential,
        ..Default::default()
    }
}

/// Dispatches every non-empty tick to the device.
pub fn parallel_config() -> SimulationConfig {
    SimulationConfig {
        device: DeviceKind::Lanes,
        lanes: 3,
        parallel_min_cells: 1,
        ..Default::default()
    }
}

/// Loads life with a blinker against the `+x` edge of coordinate space and a
/// lone cell on the `-x` edge that wrapped reads would count as a neighbor.
pub fn edge_of_space(sim: &mut Simulation<VoxelStore>) {
    sim.load_rule_set(&samples::game_of_life()).unwrap();
    for z in -1..=1 {
        sim.place(Point3::new(i32::MAX, 0, z), cell("white")).unwrap();
    }
    sim.place(Point3::new(i32::MIN, 0, 0), cell("white")).unwrap();
}

pub fn block(name: &str) -> BlockId {
    BlockRegistry::new()
        .id(name)
        .unwrap_or_else(|| panic!("no built-in block '{name}'"))
}

pub fn cell(name: &str) -> Cell {
    Cell::new(block(name))
}

/// Every non-void cell of the store, in coordinate order.
pub fn snapshot<S: VoxelAccess>(store: &S) -> Vec<(Coord, Cell)> {
    let mut cells: Vec<(Coord, Cell)> = store
        .chunk_positions()
        .into_iter()
        .flat_map(|chunk| store.occupied_cells(chunk))
        .collect();
    cells.sort_by_key(|(coord, _)| coord_key(coord));
    cells
}

/// A few chunks of mixed material: terrain at the bottom, a life layer,
/// scattered sand and a grass and wood patch with a fire source.
pub fn mixed_world() -> VoxelStore {
    let mut store = VoxelStore::new();
    for x in -1..=0 {
        for z in -1..=0 {
            store.insert_chunk(Chunk::perlin(Point3::new(x, -1, z), block("stone"), 3));
            let seed = ((x + 1) * 2 + (z + 1)) as u64;
            store.insert_chunk(Chunk::random(Point3::new(x, 1, z), block("sand"), 0.1, seed));
        }
    }
    // Life on the y = 0 plane, straddling chunk borders.
    let mut rng = fastrand::Rng::with_seed(11);
    for x in -6..6 {
        for z in -6..6 {
            if rng.bool() {
                store.set_cell(Point3::new(x, 0, z), cell("white")).unwrap();
            }
        }
    }
    for x in 8..12 {
        for z in 8..12 {
            store.set_cell(Point3::new(x, 0, z), cell("grass")).unwrap();
            store.set_cell(Point3::new(x, 3, z), cell("wood")).unwrap();
        }
    }
    store.set_cell(Point3::new(8, 0, 12), cell("dirt")).unwrap();
    store.set_cell(Point3::new(12, 3, 10), cell("fire")).unwrap();
    store
}
