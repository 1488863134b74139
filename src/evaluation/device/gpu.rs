//! # GPU Device
//!
//! Runs the WGSL form of compiled plans through `wgpu` compute pipelines.
//!
//! ## Dispatch Sequence
//!
//! 1. Look the plan's pipeline up in an LRU cache keyed by the plan
//!    fingerprint, compiling the shader module on a miss.
//! 2. Upload the packed windows, centres and item count into named buffers
//!    (grown on demand, see [`BufferState`]).
//! 3. Record one compute pass of `ceil(n / 64)` workgroups, folded into a
//!    second dispatch dimension when it exceeds the per-dimension limit,
//!    then copy the results into a mappable readback buffer.
//! 4. Map the readback buffer and poll the device until the map completes or
//!    the deadline passes.
//!
//! Validation errors are captured with an error scope around each dispatch
//! and reported as `DispatchError::Device`. A timed-out dispatch discards its
//! readback buffer, so a mapping that completes late can never be read by the
//! next dispatch.

use std::borrow::Cow;
use std::num::NonZeroUsize;
use std::sync::mpsc::{channel, TryRecvError};
use std::sync::Arc;
use std::time::Duration;

use bytemuck::{Pod, Zeroable};
use log::{debug, error, info};
use lru::LruCache;
use web_time::Instant;

use crate::error::DispatchError;
use crate::evaluation::device::buffer_state::BufferState;
use crate::evaluation::device::{Batch, ComputeDevice};
use crate::rules::compiler::CompiledPlan;
use crate::rules::kernel::{MAX_WORKGROUPS_PER_DIMENSION, WORKGROUP_SIZE};

const PARAMS_BUFFER: &str = "automata_params";
const CELLS_BUFFER: &str = "automata_cells";
const CENTRES_BUFFER: &str = "automata_centres";
const RESULTS_BUFFER: &str = "automata_results";
const READBACK_BUFFER: &str = "automata_readback";

/// Uniform block of the generated shader.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct KernelParams {
    count: u32,
    _pad: [u32; 3],
}

/// A `wgpu` compute device.
pub struct GpuDevice {
    name: String,
    device: wgpu::Device,
    queue: wgpu::Queue,
    buffers: BufferState,
    bind_group_layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    pipelines: LruCache<u64, wgpu::ComputePipeline>,
}

impl GpuDevice {
    /// Opens the default high-performance adapter without a surface.
    ///
    /// # Arguments
    /// * `pipeline_cache_size` - Number of compiled pipelines kept (at least one)
    ///
    /// # Returns
    /// The device, or `DispatchError::Unavailable` when no adapter or device
    /// can be obtained.
    pub fn new(pipeline_cache_size: usize) -> Result<Self, DispatchError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .map_err(|err| DispatchError::Unavailable(err.to_string()))?;

        let info = adapter.get_info();
        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("automata compute device"),
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::downlevel_defaults(),
            memory_hints: wgpu::MemoryHints::MemoryUsage,
            trace: wgpu::Trace::Off,
        }))
        .map_err(|err| DispatchError::Unavailable(err.to_string()))?;

        device.on_uncaptured_error(Box::new(|err: wgpu::Error| {
            error!("Uncaptured wgpu error: {err}");
        }));

        let storage = |binding: u32, read_only: bool| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };
        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("automata bind group layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                storage(1, true),
                storage(2, true),
                storage(3, false),
            ],
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("automata pipeline layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let capacity = NonZeroUsize::new(pipeline_cache_size.max(1)).unwrap_or(NonZeroUsize::MIN);
        let name = format!("gpu:{} ({:?})", info.name, info.backend);
        info!("Opened compute device {name}");

        Ok(GpuDevice {
            name,
            device,
            queue,
            buffers: BufferState::new(),
            bind_group_layout,
            pipeline_layout,
            pipelines: LruCache::new(capacity),
        })
    }

    /// Buffer registry, for memory analytics.
    pub fn buffers(&self) -> &BufferState {
        &self.buffers
    }

    fn create_pipeline(&self, plan: &CompiledPlan) -> wgpu::ComputePipeline {
        let module = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(plan.name()),
            source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(plan.kernel().source())),
        });
        self.device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(plan.name()),
            layout: Some(&self.pipeline_layout),
            module: &module,
            entry_point: Some("main"),
            compilation_options: Default::default(),
            cache: None,
        })
    }

    fn upload(&mut self, batch: &Batch) -> Result<u64, DispatchError> {
        let items = batch.len() as u64;
        let result_bytes = items * 2 * 4;
        let copy_dst = wgpu::BufferUsages::COPY_DST;
        let storage = wgpu::BufferUsages::STORAGE;

        let params = KernelParams {
            count: batch.len() as u32,
            _pad: [0; 3],
        };
        self.buffers.ensure(
            &self.device,
            PARAMS_BUFFER,
            std::mem::size_of::<KernelParams>() as u64,
            wgpu::BufferUsages::UNIFORM | copy_dst,
        );
        self.buffers
            .write(&self.queue, PARAMS_BUFFER, 0, bytemuck::bytes_of(&params))?;

        let cells: &[u32] = &batch.cells;
        self.buffers
            .ensure(&self.device, CELLS_BUFFER, (cells.len() * 4) as u64, storage | copy_dst);
        self.buffers
            .write(&self.queue, CELLS_BUFFER, 0, bytemuck::cast_slice(cells))?;

        let centres: &[u32] = &batch.centres;
        self.buffers
            .ensure(&self.device, CENTRES_BUFFER, (centres.len() * 4) as u64, storage | copy_dst);
        self.buffers
            .write(&self.queue, CENTRES_BUFFER, 0, bytemuck::cast_slice(centres))?;

        self.buffers.ensure(
            &self.device,
            RESULTS_BUFFER,
            result_bytes,
            storage | wgpu::BufferUsages::COPY_SRC,
        );
        self.buffers.ensure(
            &self.device,
            READBACK_BUFFER,
            result_bytes,
            wgpu::BufferUsages::MAP_READ | copy_dst,
        );
        Ok(result_bytes)
    }

    fn encode(&self, pipeline: &wgpu::ComputePipeline, items: usize, result_bytes: u64) -> Result<(), DispatchError> {
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("automata bind group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: self.buffers.get(PARAMS_BUFFER)?.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: self.buffers.get(CELLS_BUFFER)?.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: self.buffers.get(CENTRES_BUFFER)?.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: self.buffers.get(RESULTS_BUFFER)?.as_entire_binding(),
                },
            ],
        });

        let (x, y) = workgroup_grid(items)?;
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("automata dispatch"),
            });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("automata pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(x, y, 1);
        }
        encoder.copy_buffer_to_buffer(
            self.buffers.get(RESULTS_BUFFER)?,
            0,
            self.buffers.get(READBACK_BUFFER)?,
            0,
            result_bytes,
        );
        self.queue.submit(Some(encoder.finish()));
        Ok(())
    }

    fn read_back(&mut self, result_bytes: u64, timeout: Duration) -> Result<Vec<u32>, DispatchError> {
        let started = Instant::now();
        let deadline = started + timeout;
        let (sender, receiver) = channel();
        self.buffers
            .get(READBACK_BUFFER)?
            .slice(0..result_bytes)
            .map_async(wgpu::MapMode::Read, move |result| {
                let _ = sender.send(result);
            });

        loop {
            let _ = self.device.poll(wgpu::PollType::Poll);
            match receiver.try_recv() {
                Ok(Ok(())) => break,
                Ok(Err(err)) => return Err(DispatchError::Device(err.to_string())),
                Err(TryRecvError::Disconnected) => {
                    return Err(DispatchError::Device("readback mapping was dropped".into()))
                }
                Err(TryRecvError::Empty) => {
                    if Instant::now() >= deadline {
                        self.buffers.discard(READBACK_BUFFER);
                        return Err(DispatchError::Timeout(started.elapsed().as_millis()));
                    }
                    std::thread::yield_now();
                }
            }
        }

        let readback = self.buffers.get(READBACK_BUFFER)?;
        let words = {
            let view = readback.slice(0..result_bytes).get_mapped_range();
            bytemuck::try_cast_slice::<u8, u32>(&view[..])
                .map(<[u32]>::to_vec)
                .map_err(|err| DispatchError::Device(format!("unreadable results: {err:?}")))
        };
        readback.unmap();
        words
    }
}

/// Workgroup counts covering `items` work items.
fn workgroup_grid(items: usize) -> Result<(u32, u32), DispatchError> {
    let groups = items.div_ceil(WORKGROUP_SIZE as usize);
    let x = groups.min(MAX_WORKGROUPS_PER_DIMENSION as usize).max(1);
    let y = groups.div_ceil(x).max(1);
    if y > MAX_WORKGROUPS_PER_DIMENSION as usize {
        return Err(DispatchError::Device(format!(
            "{items} work items exceed a single dispatch"
        )));
    }
    Ok((x as u32, y as u32))
}

impl ComputeDevice for GpuDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn dispatch(
        &mut self,
        plan: &Arc<CompiledPlan>,
        batch: &Batch,
        timeout: Duration,
    ) -> Result<Vec<u32>, DispatchError> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }
        let started = Instant::now();

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let fingerprint = plan.fingerprint();
        if !self.pipelines.contains(&fingerprint) {
            debug!("Compiling pipeline for '{}' ({fingerprint:016x})", plan.name());
            let pipeline = self.create_pipeline(plan);
            self.pipelines.put(fingerprint, pipeline);
        }
        let prepared = self.upload(batch).and_then(|result_bytes| {
            let pipeline = self
                .pipelines
                .peek(&fingerprint)
                .ok_or_else(|| DispatchError::Device("pipeline evicted".into()))?;
            self.encode(pipeline, batch.len(), result_bytes)?;
            Ok(result_bytes)
        });
        // Touch the entry so the plan counts as recently used.
        self.pipelines.promote(&fingerprint);
        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            self.pipelines.pop(&fingerprint);
            return Err(DispatchError::Device(err.to_string()));
        }
        let result_bytes = prepared?;

        let words = self.read_back(result_bytes, timeout)?;
        let expected = batch.len() * 2;
        if words.len() != expected {
            return Err(DispatchError::MalformedResult {
                expected,
                actual: words.len(),
            });
        }
        debug!(
            "GPU evaluated {} cells of '{}' in {:?} ({} of {} buffer bytes in use)",
            batch.len(),
            plan.name(),
            started.elapsed(),
            self.buffers.total_used_memory(),
            self.buffers.total_allocated_memory()
        );
        Ok(words)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workgroup_grid_folds_into_two_dimensions() {
        assert_eq!(workgroup_grid(1).unwrap(), (1, 1));
        assert_eq!(workgroup_grid(64).unwrap(), (1, 1));
        assert_eq!(workgroup_grid(65).unwrap(), (2, 1));
        let many = 64 * (MAX_WORKGROUPS_PER_DIMENSION as usize + 10);
        assert_eq!(workgroup_grid(many).unwrap(), (MAX_WORKGROUPS_PER_DIMENSION, 2));
    }

    #[test]
    fn params_match_uniform_layout() {
        assert_eq!(std::mem::size_of::<KernelParams>(), 16);
    }
}
