//! # Buffer State Module
//!
//! Named GPU buffers for the compute device, with usage analytics.
//!
//! ## Architecture
//!
//! Buffers are referenced by a static name and reused across dispatches.
//! [`BufferState::ensure`] grows a buffer when a dispatch needs more room than
//! it has: the old buffer is dropped and a new one is allocated with the
//! requested size rounded up to the next power of two, so a run of slowly
//! growing batches reallocates only a logarithmic number of times.
//!
//! Every write is bounds-checked against the allocation and counted, so
//! [`BufferState::total_allocated_memory`] and
//! [`BufferState::total_used_memory`] show how much of the reserved GPU
//! memory is actually in use.

use std::collections::HashMap;

use wgpu::{Buffer, BufferUsages, Device, Queue};

use crate::error::DispatchError;

/// Analytics data for a GPU buffer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferAnalytics {
    /// Total memory allocated for the buffer in bytes
    pub allocated_memory: u64,
    /// Highest byte written so far
    pub used_memory: u64,
    /// Number of times the buffer has been written to
    pub times_written: u64,
    /// Number of times the buffer was reallocated to grow
    pub times_grown: u64,
}

/// Registry of the compute device's buffers.
#[derive(Debug, Default)]
pub struct BufferState {
    buffers: HashMap<&'static str, Buffer>,
    analytics: HashMap<&'static str, BufferAnalytics>,
}

impl BufferState {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes sure a buffer of at least `size` bytes with `usage` exists.
    ///
    /// # Arguments
    /// * `device` - Device allocating the buffer
    /// * `buffer_name` - Unique name for the buffer
    /// * `size` - Required size in bytes
    /// * `usage` - Usage flags of the buffer
    ///
    /// # Returns
    /// `true` if a new buffer was allocated.
    pub fn ensure(
        &mut self,
        device: &Device,
        buffer_name: &'static str,
        size: u64,
        usage: BufferUsages,
    ) -> bool {
        let size = size.max(wgpu::COPY_BUFFER_ALIGNMENT);
        if let Some(buffer) = self.buffers.get(buffer_name) {
            if buffer.size() >= size && buffer.usage() == usage {
                return false;
            }
        }

        let allocated = size.next_power_of_two();
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(buffer_name),
            size: allocated,
            usage,
            mapped_at_creation: false,
        });
        if let Some(old) = self.buffers.insert(buffer_name, buffer) {
            old.destroy();
        }

        let analytics = self.analytics.entry(buffer_name).or_default();
        if analytics.allocated_memory > 0 {
            analytics.times_grown += 1;
        }
        analytics.allocated_memory = allocated;
        analytics.used_memory = 0;
        log::debug!("Allocated buffer '{buffer_name}' with {allocated} bytes");
        true
    }

    /// Writes raw bytes into a buffer.
    ///
    /// # Arguments
    /// * `queue` - Queue the write is scheduled on
    /// * `buffer_name` - Name of the buffer to write to
    /// * `offset` - Byte offset in the buffer to start writing
    /// * `data` - Bytes to write
    ///
    /// # Returns
    /// `DispatchError::Device` if the buffer does not exist or the write would
    /// exceed its bounds.
    pub fn write(
        &mut self,
        queue: &Queue,
        buffer_name: &'static str,
        offset: wgpu::BufferAddress,
        data: &[u8],
    ) -> Result<(), DispatchError> {
        let buffer = self.buffers.get(buffer_name).ok_or_else(|| missing(buffer_name))?;
        let analytics = self
            .analytics
            .get_mut(buffer_name)
            .ok_or_else(|| missing(buffer_name))?;

        let end = offset + data.len() as u64;
        if end > analytics.allocated_memory {
            return Err(DispatchError::Device(format!(
                "write of {} bytes at {offset} exceeds buffer '{buffer_name}' ({} bytes)",
                data.len(),
                analytics.allocated_memory
            )));
        }

        queue.write_buffer(buffer, offset, data);
        analytics.used_memory = analytics.used_memory.max(end);
        analytics.times_written += 1;
        Ok(())
    }

    /// Gets a buffer by name.
    pub fn get(&self, buffer_name: &'static str) -> Result<&Buffer, DispatchError> {
        self.buffers.get(buffer_name).ok_or_else(|| missing(buffer_name))
    }

    /// Drops a buffer, for example one left mapped by an abandoned dispatch.
    pub fn discard(&mut self, buffer_name: &'static str) {
        if let Some(buffer) = self.buffers.remove(buffer_name) {
            buffer.destroy();
        }
        self.analytics.remove(buffer_name);
    }

    /// Usage analytics of one buffer.
    pub fn analytics(&self, buffer_name: &'static str) -> Option<BufferAnalytics> {
        self.analytics.get(buffer_name).copied()
    }

    /// Gets the total allocated memory across all buffers, in bytes.
    pub fn total_allocated_memory(&self) -> u64 {
        self.analytics
            .values()
            .fold(0, |acc, analytics| acc + analytics.allocated_memory)
    }

    /// Gets the total used memory across all buffers, in bytes.
    pub fn total_used_memory(&self) -> u64 {
        self.analytics
            .values()
            .fold(0, |acc, analytics| acc + analytics.used_memory)
    }
}

fn missing(buffer_name: &str) -> DispatchError {
    DispatchError::Device(format!("buffer '{buffer_name}' does not exist"))
}
