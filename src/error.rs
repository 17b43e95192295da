//! Error handling for the Vulkan ImGui backend.
//!
//! All fallible backend operations return [`BackendError`]. A failed frame
//! compile leaves every persistent object (buffers, descriptor arena, font
//! texture) consistent, so the caller may simply drop the partially recorded
//! command buffer and try again next frame.

use ash::vk;
use thiserror::Error;

/// Error type for the Vulkan ImGui backend.
#[derive(Debug, Error)]
pub enum BackendError {
    /// A device buffer or descriptor pool could not grow because the
    /// allocator ran out of device memory. Fatal to the current frame; the
    /// partially recorded command buffer must not be submitted.
    #[error("out of device memory while growing a GPU resource")]
    OutOfDeviceMemory,

    /// A draw command referenced a texture id that was never registered with
    /// the backend (or was unregistered while still in use by the UI).
    #[error("draw command references unknown texture id {0}")]
    InvalidTextureHandle(usize),

    /// Any other raw Vulkan failure.
    #[error("Vulkan call failed: {0}")]
    Vulkan(vk::Result),

    /// A non-OOM failure inside the device memory allocator.
    #[error("device memory allocator error: {0}")]
    Allocation(String),
}

impl From<vk::Result> for BackendError {
    fn from(result: vk::Result) -> Self {
        match result {
            vk::Result::ERROR_OUT_OF_DEVICE_MEMORY | vk::Result::ERROR_OUT_OF_POOL_MEMORY => {
                BackendError::OutOfDeviceMemory
            }
            other => BackendError::Vulkan(other),
        }
    }
}

impl From<gpu_allocator::AllocationError> for BackendError {
    fn from(error: gpu_allocator::AllocationError) -> Self {
        match error {
            gpu_allocator::AllocationError::OutOfMemory => BackendError::OutOfDeviceMemory,
            other => BackendError::Allocation(other.to_string()),
        }
    }
}
