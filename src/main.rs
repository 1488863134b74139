//! # Voxel Automata Demo
//!
//! Seeds a small world with Perlin terrain and scattered sand, loads rule-sets
//! and runs a fixed number of ticks, logging the metrics of each one.
//!
//! ## Usage
//!
//! ```bash
//! RUST_LOG=info cargo run --release -- [config.json] [rules.json] [ticks]
//! ```
//!
//! Without a configuration the defaults are used; without a rules file the
//! bundled sample rule-sets are loaded.

use std::error::Error;
use std::process::ExitCode;

use cgmath::Point3;
use log::{error, info};

use voxel_automata::config::SimulationConfig;
use voxel_automata::rules::samples;
use voxel_automata::scheduler::Simulation;
use voxel_automata::voxels::block::block_registry::BlockRegistry;
use voxel_automata::voxels::chunk::Chunk;
use voxel_automata::voxels::world::VoxelStore;

const DEFAULT_TICKS: u64 = 32;
const WORLD_RADIUS: i32 = 2;
const SEED: u32 = 7;

fn main() -> ExitCode {
    voxel_automata::init_logging();
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<(), Box<dyn Error>> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let config = match args.first() {
        Some(path) => SimulationConfig::from_file(path)?,
        None => SimulationConfig::default(),
    };
    let ticks = match args.get(2) {
        Some(count) => count.parse()?,
        None => DEFAULT_TICKS,
    };

    let store = seed_world(&config)?;
    let mut sim = Simulation::new(store, config);
    info!(
        "Parallel device: {}",
        sim.device_name().unwrap_or("none, sequential only")
    );

    match args.get(1) {
        Some(path) => {
            let text = std::fs::read_to_string(path)?;
            sim.load_rule_sets_json(&text)?;
        }
        None => {
            for def in samples::all() {
                sim.load_rule_set(&def)?;
            }
        }
    }
    info!("{} cells dirty after loading rules", sim.dirty().len());

    let mut changed = 0;
    for _ in 0..ticks {
        let tick = sim.step()?;
        changed += tick.changed_cells.len();
        info!(
            "Tick {}: {:?}, {} cells, {} rules tested, {} changed, {} fallbacks, {:?}",
            tick.generation,
            tick.backend,
            tick.metrics.processed_cells,
            tick.metrics.rules_tested,
            tick.metrics.modified_cells,
            tick.metrics.fallbacks,
            tick.metrics.elapsed
        );
        if sim.dirty().is_empty() {
            info!("World settled after {} ticks", tick.generation);
            break;
        }
    }
    info!("{changed} cell writes in total");
    Ok(())
}

/// Perlin stone terrain in the lower chunk layer with sand scattered above.
fn seed_world(config: &SimulationConfig) -> Result<VoxelStore, Box<dyn Error>> {
    let registry = BlockRegistry::new();
    let stone = registry.id("stone").ok_or("missing built-in block 'stone'")?;
    let sand = registry.id("sand").ok_or("missing built-in block 'sand'")?;

    let mut store = VoxelStore::with_bounds(config.bounds());
    for x in -WORLD_RADIUS..=WORLD_RADIUS {
        for z in -WORLD_RADIUS..=WORLD_RADIUS {
            store.insert_chunk(Chunk::perlin(Point3::new(x, -1, z), stone, SEED));
            let scatter_seed = ((x + WORLD_RADIUS) * 31 + (z + WORLD_RADIUS)) as u64;
            store.insert_chunk(Chunk::random(Point3::new(x, 0, z), sand, 0.05, scatter_seed));
        }
    }
    info!("Seeded {} chunks", store.allocated_chunks());
    Ok(store)
}
