#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![warn(rustdoc::invalid_rust_codeblocks)]

//! # Voxel Automata
//!
//! A cellular-automaton rule engine for voxel worlds built with Rust and WGPU.
//!
//! Rule-sets describe local behavior (sand falls, fire spreads, grass grows)
//! as guarded rules over a cell's neighbors. The engine compiles them once
//! and then advances a world generation by generation, touching only the
//! cells that could have changed.
//!
//! ## Key Modules
//!
//! * `voxels` - Chunked voxel storage, the host accessor trait and the dirty set
//! * `rules` - Rule definitions, the compiler and the compiled program forms
//! * `evaluation` - Sequential and parallel evaluators and the compute devices
//! * `scheduler` - The tick state machine and the diff applier
//! * `config` - Runtime settings loaded from JSON
//! * `error` - Error types of every layer
//!
//! ## Architecture
//!
//! Each tick follows the same path:
//! * The scheduler snapshots the dirty cells of the requested region
//! * An evaluator reads only that snapshot and fills a write buffer
//! * The diff applier commits the buffer as a whole and marks the cells
//!   whose footprint reaches a changed cell dirty for the next tick
//!
//! The parallel evaluator packs chunk windows into flat `u32` buffers and
//! dispatches them to a GPU through `wgpu` or to a pool of CPU lanes. It
//! yields the same writes as the sequential evaluator, which also serves as
//! its fallback when a dispatch fails.
//!
//! ## Usage
//!
//! ```rust
//! use cgmath::Point3;
//! use voxel_automata::config::{DeviceKind, SimulationConfig};
//! use voxel_automata::rules::samples;
//! use voxel_automata::scheduler::Simulation;
//! use voxel_automata::voxels::block::Cell;
//! use voxel_automata::voxels::world::{VoxelAccess, VoxelStore};
//!
//! voxel_automata::init_logging();
//! let config = SimulationConfig { device: DeviceKind::Sequential, ..Default::default() };
//! let mut sim = Simulation::new(VoxelStore::new(), config);
//! sim.load_rule_set(&samples::gravity()).unwrap();
//!
//! let stone = sim.registry().id("stone").unwrap();
//! let sand = sim.registry().id("sand").unwrap();
//! sim.place(Point3::new(0, -1, 0), Cell::new(stone)).unwrap();
//! sim.place(Point3::new(0, 3, 0), Cell::new(sand)).unwrap();
//! while !sim.dirty().is_empty() {
//!     sim.step().unwrap();
//! }
//! assert_eq!(sim.store().cell(Point3::new(0, 0, 0)), Cell::new(sand));
//! ```

use log::info;

pub mod config;
pub mod error;
pub mod evaluation;
pub mod rules;
pub mod scheduler;
pub mod voxels;

/// Initializes `env_logger`, writing to stdout and filtered by `RUST_LOG`.
///
/// Calling it again, or after another logger was installed, has no effect.
pub fn init_logging() {
    let mut log_builder = env_logger::Builder::new();
    let initialized = log_builder
        .target(env_logger::Target::Stdout)
        .parse_env("RUST_LOG")
        .try_init()
        .is_ok();

    if initialized {
        info!("Logger initialized");
    }
}
