//! # Configuration
//!
//! Runtime settings of a simulation, loaded from JSON. Every field has a
//! default, so `{}` is a complete configuration:
//!
//! ```json
//! {
//!   "device": "auto",
//!   "parallel_min_cells": 512,
//!   "dispatch_timeout_ms": 2000,
//!   "max_footprint_radius": 4,
//!   "lanes": 0,
//!   "min_y": -64,
//!   "max_y": 320,
//!   "pipeline_cache_size": 16
//! }
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::rules::compiler::MAX_FOOTPRINT_RADIUS;
use crate::voxels::world::WorldBounds;

/// Which backend the parallel evaluator runs on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    /// No parallel evaluator; every tick runs sequentially.
    Sequential,
    /// CPU worker threads.
    Lanes,
    /// A `wgpu` adapter. Falls back to sequential when none is available.
    Gpu,
    /// A `wgpu` adapter if one is available, CPU lanes otherwise.
    #[default]
    Auto,
}

/// Settings of a [`crate::scheduler::Simulation`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimulationConfig {
    /// Parallel backend.
    pub device: DeviceKind,
    /// Smallest dirty-cell count dispatched to the parallel backend.
    pub parallel_min_cells: usize,
    /// Time after which a device dispatch is abandoned.
    pub dispatch_timeout_ms: u64,
    /// Largest offset component a rule may read, at most 8.
    pub max_footprint_radius: i32,
    /// Worker threads of the lane device, `0` for the available parallelism.
    pub lanes: usize,
    /// Lowest valid `y`, inclusive.
    pub min_y: Option<i32>,
    /// Highest valid `y`, exclusive.
    pub max_y: Option<i32>,
    /// Compiled GPU pipelines kept in the cache.
    pub pipeline_cache_size: usize,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        SimulationConfig {
            device: DeviceKind::Auto,
            parallel_min_cells: 512,
            dispatch_timeout_ms: 2000,
            max_footprint_radius: 4,
            lanes: 0,
            min_y: None,
            max_y: None,
            pipeline_cache_size: 16,
        }
    }
}

impl SimulationConfig {
    /// Parses and validates a configuration from JSON text.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: SimulationConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Checks value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0..=MAX_FOOTPRINT_RADIUS).contains(&self.max_footprint_radius) {
            return Err(ConfigError::Invalid {
                field: "max_footprint_radius",
                reason: format!(
                    "{} is outside 0..={MAX_FOOTPRINT_RADIUS}",
                    self.max_footprint_radius
                ),
            });
        }
        if self.dispatch_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "dispatch_timeout_ms",
                reason: "must be positive".into(),
            });
        }
        if self.pipeline_cache_size == 0 {
            return Err(ConfigError::Invalid {
                field: "pipeline_cache_size",
                reason: "must be positive".into(),
            });
        }
        if let (Some(min_y), Some(max_y)) = (self.min_y, self.max_y) {
            if min_y >= max_y {
                return Err(ConfigError::Invalid {
                    field: "max_y",
                    reason: format!("{max_y} is not above min_y {min_y}"),
                });
            }
        }
        Ok(())
    }

    /// Dispatch deadline.
    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_millis(self.dispatch_timeout_ms)
    }

    /// World bounds for a [`crate::voxels::world::VoxelStore`].
    pub fn bounds(&self) -> WorldBounds {
        WorldBounds {
            min_y: self.min_y,
            max_y: self.max_y,
        }
    }

    /// Number of lane threads to start.
    pub fn lane_count(&self) -> usize {
        if self.lanes > 0 {
            return self.lanes;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }
}
