//! # Compute Devices
//!
//! Executors for the kernel form of a compiled plan.
//!
//! A device receives a [`Batch`]: packed halo windows plus the window index
//! of every cell to evaluate, one work item per centre. It returns two `u32`
//! words per work item, the result flags (bit 0 matched, bit 1 changed) and
//! the packed next state, in work-item order.
//!
//! ## Implementations
//!
//! * [`gpu::GpuDevice`] - runs the generated WGSL through `wgpu`
//! * [`lanes::LaneDevice`] - runs the instruction streams on a pool of worker threads
//!
//! [`open`] picks one according to [`DeviceKind`].

use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};

use crate::config::{DeviceKind, SimulationConfig};
use crate::error::DispatchError;
use crate::rules::compiler::CompiledPlan;

pub mod buffer_state;
pub mod gpu;
pub mod lanes;

/// Input of one dispatch.
#[derive(Debug, Clone)]
pub struct Batch {
    /// Packed cells of every halo window, concatenated.
    pub cells: Arc<[u32]>,
    /// Index into `cells` of each work item's centre.
    pub centres: Arc<[u32]>,
}

impl Batch {
    /// Number of work items.
    pub fn len(&self) -> usize {
        self.centres.len()
    }

    /// Returns `true` if the batch has no work items.
    pub fn is_empty(&self) -> bool {
        self.centres.is_empty()
    }
}

/// A backend able to run compiled kernels over packed batches.
pub trait ComputeDevice: Send {
    /// Human-readable device name, used in logs and tick results.
    fn name(&self) -> &str;

    /// Runs `plan` over every work item of `batch`.
    ///
    /// # Arguments
    /// * `plan` - Compiled plan whose kernel form is executed
    /// * `batch` - Packed windows and centres
    /// * `timeout` - Time after which the dispatch is abandoned
    ///
    /// # Returns
    /// `2 * batch.len()` words, or a `DispatchError`. A timed-out dispatch must
    /// not deliver its results to a later call.
    fn dispatch(
        &mut self,
        plan: &Arc<CompiledPlan>,
        batch: &Batch,
        timeout: Duration,
    ) -> Result<Vec<u32>, DispatchError>;
}

/// Opens the device selected by the configuration.
///
/// # Returns
/// `None` for [`DeviceKind::Sequential`], or when the requested device could
/// not be opened (logged, the simulation then runs sequentially).
pub fn open(config: &SimulationConfig) -> Option<Box<dyn ComputeDevice>> {
    let lanes = || match lanes::LaneDevice::new(config.lane_count()) {
        Ok(device) => Some(Box::new(device) as Box<dyn ComputeDevice>),
        Err(err) => {
            warn!("Could not start compute lanes: {err}");
            None
        }
    };

    let device = match config.device {
        DeviceKind::Sequential => None,
        DeviceKind::Lanes => lanes(),
        DeviceKind::Gpu => match gpu::GpuDevice::new(config.pipeline_cache_size) {
            Ok(device) => Some(Box::new(device) as Box<dyn ComputeDevice>),
            Err(err) => {
                warn!("No GPU device, evaluating sequentially: {err}");
                None
            }
        },
        DeviceKind::Auto => match gpu::GpuDevice::new(config.pipeline_cache_size) {
            Ok(device) => Some(Box::new(device) as Box<dyn ComputeDevice>),
            Err(err) => {
                info!("No GPU device ({err}), using compute lanes");
                lanes()
            }
        },
    };

    if let Some(device) = &device {
        info!("Parallel evaluator device: {}", device.name());
    }
    device
}
