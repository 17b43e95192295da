//! Grow-on-demand device buffers for per-frame geometry and uniforms.
//!
//! A [`GrowableBuffer`] starts empty and is (re)allocated to exactly the
//! requested size whenever a frame needs more room than the current capacity.
//! Capacity never shrinks, old contents are not migrated (callers re-upload
//! every frame anyway), and a reallocation invalidates any descriptor set
//! that still points at the old `vk::Buffer`.

use std::sync::{Arc, Mutex};

use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme, Allocator};
use gpu_allocator::MemoryLocation;
use tracing::debug;

use crate::error::BackendError;

/// A single GPU buffer that can only grow.
///
/// Memory is allocated `CpuToGpu`, so it is persistently mapped and can be
/// filled with [`GrowableBuffer::write_slice`] without explicit map/unmap
/// calls. The caller (the frame compiler) guarantees the GPU has finished
/// reading the previous frame's contents before the buffer is overwritten or
/// replaced.
pub struct GrowableBuffer {
    device: Arc<ash::Device>,
    allocator: Arc<Mutex<Allocator>>,
    buffer: vk::Buffer,
    allocation: Option<Allocation>,
    capacity: vk::DeviceSize,
    usage: vk::BufferUsageFlags,
    name: &'static str,
}

impl GrowableBuffer {
    /// Creates an empty buffer of the given usage. No device allocation
    /// happens until the first [`GrowableBuffer::ensure_capacity`] call.
    pub fn new(
        device: Arc<ash::Device>,
        allocator: Arc<Mutex<Allocator>>,
        usage: vk::BufferUsageFlags,
        name: &'static str,
    ) -> Self {
        Self {
            device,
            allocator,
            buffer: vk::Buffer::null(),
            allocation: None,
            capacity: 0,
            usage,
            name,
        }
    }

    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    pub fn capacity(&self) -> vk::DeviceSize {
        self.capacity
    }

    /// Grows the buffer to exactly `required` bytes if it is smaller.
    ///
    /// Returns `true` if a reallocation happened, in which case every
    /// descriptor set bound to the old buffer is stale and must be rewritten
    /// before the next draw that references it.
    ///
    /// The replacement is all-or-nothing: the new buffer is fully created and
    /// bound before the old one is released, so on failure the old buffer
    /// (and its capacity) remain valid.
    pub fn ensure_capacity(&mut self, required: vk::DeviceSize) -> Result<bool, BackendError> {
        let Some(new_capacity) = growth_target(self.capacity, required) else {
            return Ok(false);
        };

        let buffer_info = vk::BufferCreateInfo::builder()
            .size(new_capacity)
            .usage(self.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let new_buffer = unsafe { self.device.create_buffer(&buffer_info, None) }
            .map_err(BackendError::from)?;
        let requirements = unsafe { self.device.get_buffer_memory_requirements(new_buffer) };

        let allocation_result = {
            let mut allocator = match self.lock_allocator() {
                Ok(allocator) => allocator,
                Err(e) => {
                    unsafe { self.device.destroy_buffer(new_buffer, None) };
                    return Err(e);
                }
            };
            allocator.allocate(&AllocationCreateDesc {
                name: self.name,
                requirements,
                location: MemoryLocation::CpuToGpu,
                linear: true,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
        };
        let new_allocation = match allocation_result {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { self.device.destroy_buffer(new_buffer, None) };
                return Err(e.into());
            }
        };

        if let Err(e) = unsafe {
            self.device
                .bind_buffer_memory(new_buffer, new_allocation.memory(), new_allocation.offset())
        } {
            self.free_allocation(new_allocation);
            unsafe { self.device.destroy_buffer(new_buffer, None) };
            return Err(e.into());
        }

        debug!(
            buffer = self.name,
            old_capacity = self.capacity,
            new_capacity,
            "growing device buffer"
        );

        self.release_current();
        self.buffer = new_buffer;
        self.allocation = Some(new_allocation);
        self.capacity = new_capacity;
        Ok(true)
    }

    /// Copies `data` into the buffer at `offset_bytes`.
    ///
    /// The write must fit inside the current capacity; the frame compiler
    /// always grows the buffer before copying, so an out-of-bounds write here
    /// is a logic error rather than a recoverable condition.
    pub fn write_slice<T: Copy>(
        &mut self,
        data: &[T],
        offset_bytes: vk::DeviceSize,
    ) -> Result<(), BackendError> {
        let byte_len = std::mem::size_of_val(data) as vk::DeviceSize;
        if byte_len == 0 {
            return Ok(());
        }
        if offset_bytes + byte_len > self.capacity {
            return Err(BackendError::Allocation(format!(
                "write of {} bytes at offset {} exceeds {} buffer capacity {}",
                byte_len, offset_bytes, self.name, self.capacity
            )));
        }

        let allocation = self.allocation.as_ref().ok_or_else(|| {
            BackendError::Allocation(format!("{} buffer has no backing allocation", self.name))
        })?;
        let mapped = allocation.mapped_ptr().ok_or_else(|| {
            BackendError::Allocation(format!("{} buffer memory is not host visible", self.name))
        })?;

        unsafe {
            std::ptr::copy_nonoverlapping(
                data.as_ptr() as *const u8,
                (mapped.as_ptr() as *mut u8).add(offset_bytes as usize),
                byte_len as usize,
            );
        }
        Ok(())
    }

    fn lock_allocator(&self) -> Result<std::sync::MutexGuard<'_, Allocator>, BackendError> {
        self.allocator
            .lock()
            .map_err(|_| BackendError::Allocation("allocator mutex poisoned".to_owned()))
    }

    fn free_allocation(&self, allocation: Allocation) {
        if let Ok(mut allocator) = self.allocator.lock() {
            if let Err(e) = allocator.free(allocation) {
                tracing::warn!(buffer = self.name, error = %e, "failed to free buffer allocation");
            }
        }
    }

    fn release_current(&mut self) {
        if let Some(allocation) = self.allocation.take() {
            self.free_allocation(allocation);
        }
        if self.buffer != vk::Buffer::null() {
            unsafe { self.device.destroy_buffer(self.buffer, None) };
            self.buffer = vk::Buffer::null();
        }
    }
}

impl Drop for GrowableBuffer {
    fn drop(&mut self) {
        self.release_current();
    }
}

/// Pure grow decision: exact-fit sizing, no slack, capacity only moves up.
/// Returns the new capacity to allocate, or `None` when the current one
/// already fits.
fn growth_target(capacity: vk::DeviceSize, required: vk::DeviceSize) -> Option<vk::DeviceSize> {
    (required > capacity).then_some(required)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_buffer_grows_to_exact_frame_requirement() {
        assert_eq!(growth_target(0, 4096), Some(4096));
    }

    #[test]
    fn smaller_frame_reuses_existing_capacity() {
        // 4096 bytes allocated last frame, 2048 needed now: no reallocation,
        // the copy just writes less of the buffer.
        assert_eq!(growth_target(4096, 2048), None);
        assert_eq!(growth_target(4096, 4096), None);
    }

    #[test]
    fn capacity_is_monotonic_across_frames() {
        let mut capacity: vk::DeviceSize = 0;
        for required in [4096, 2048, 8192, 1024] {
            if let Some(next) = growth_target(capacity, required) {
                capacity = next;
            }
            assert!(capacity >= required);
        }
        assert_eq!(capacity, 8192);
    }
}
