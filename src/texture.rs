//! Texture records and the font atlas upload path.
//!
//! The backend owns exactly one GPU image: the font atlas. Every other
//! texture the UI samples is application-owned and only *registered* here,
//! as a [`TextureSlot`] carrying the handles and the image layout the
//! application keeps it in between UI passes.

use std::sync::{Arc, Mutex};

use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme, Allocator};
use gpu_allocator::MemoryLocation;
use tracing::debug;

use crate::command::{begin_single_time_commands, end_single_time_commands};
use crate::error::BackendError;
use crate::transition::cmd_transition_image_layout;

/// An application texture registered for sampling by UI draw commands.
///
/// All handles are borrowed from the application and must stay valid while
/// the texture is registered. `layout` is the layout the image holds outside
/// UI render passes; the frame compiler transitions it to shader-read-only
/// for the duration of the pass and restores it afterwards.
#[derive(Debug, Clone, Copy)]
pub struct TextureSlot {
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub sampler: vk::Sampler,
    pub layout: vk::ImageLayout,
}

/// The backend-owned font atlas image, permanently shader-read-only.
pub struct FontTexture {
    device: Arc<ash::Device>,
    allocator: Arc<Mutex<Allocator>>,
    image: vk::Image,
    allocation: Option<Allocation>,
    view: vk::ImageView,
    extent: vk::Extent2D,
}

impl FontTexture {
    /// Creates the atlas image and uploads `pixels` (tightly packed RGBA8)
    /// through a staging buffer and a one-shot command buffer. Blocks until
    /// the upload completed, so the previous atlas can be destroyed freely.
    pub fn upload(
        device: Arc<ash::Device>,
        allocator: Arc<Mutex<Allocator>>,
        queue: vk::Queue,
        command_pool: vk::CommandPool,
        pixels: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Self, BackendError> {
        let byte_len = width as vk::DeviceSize * height as vk::DeviceSize * 4;
        if pixels.len() as vk::DeviceSize != byte_len {
            return Err(BackendError::Allocation(format!(
                "font atlas pixel data is {} bytes, expected {} for {}x{} RGBA8",
                pixels.len(),
                byte_len,
                width,
                height
            )));
        }

        let mut staging = StagingBuffer::new(device.clone(), allocator.clone(), byte_len)?;
        staging.write(pixels)?;

        let image_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .format(vk::Format::R8G8B8A8_UNORM)
            .extent(vk::Extent3D {
                width,
                height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let image =
            unsafe { device.create_image(&image_info, None) }.map_err(BackendError::from)?;

        // Partially constructed from here on; Drop cleans up whatever exists
        // if a later step fails.
        let mut font = Self {
            device: device.clone(),
            allocator: allocator.clone(),
            image,
            allocation: None,
            view: vk::ImageView::null(),
            extent: vk::Extent2D { width, height },
        };

        let requirements = unsafe { device.get_image_memory_requirements(image) };
        let allocation = {
            let mut allocator = allocator
                .lock()
                .map_err(|_| BackendError::Allocation("allocator mutex poisoned".to_owned()))?;
            allocator.allocate(&AllocationCreateDesc {
                name: "imgui font atlas",
                requirements,
                location: MemoryLocation::GpuOnly,
                linear: false,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })?
        };
        unsafe {
            let memory = allocation.memory();
            let offset = allocation.offset();
            font.allocation = Some(allocation);
            device.bind_image_memory(image, memory, offset)
        }
        .map_err(BackendError::from)?;

        let command_buffer = begin_single_time_commands(&device, command_pool)?;
        cmd_transition_image_layout(
            &device,
            command_buffer,
            image,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        );

        let copy_region = vk::BufferImageCopy::builder()
            .buffer_offset(0)
            .buffer_row_length(0)
            .buffer_image_height(0)
            .image_subresource(vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: 0,
                base_array_layer: 0,
                layer_count: 1,
            })
            .image_offset(vk::Offset3D { x: 0, y: 0, z: 0 })
            .image_extent(vk::Extent3D {
                width,
                height,
                depth: 1,
            });
        unsafe {
            device.cmd_copy_buffer_to_image(
                command_buffer,
                staging.handle(),
                image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[copy_region.build()],
            );
        }

        cmd_transition_image_layout(
            &device,
            command_buffer,
            image,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        );
        end_single_time_commands(&device, command_pool, command_buffer, queue)?;

        let view_info = vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(vk::Format::R8G8B8A8_UNORM)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });
        font.view =
            unsafe { device.create_image_view(&view_info, None) }.map_err(BackendError::from)?;

        debug!(width, height, "uploaded font atlas texture");
        Ok(font)
    }

    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    pub fn image(&self) -> vk::Image {
        self.image
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }
}

impl Drop for FontTexture {
    fn drop(&mut self) {
        unsafe {
            if self.view != vk::ImageView::null() {
                self.device.destroy_image_view(self.view, None);
            }
            if let Some(allocation) = self.allocation.take() {
                if let Ok(mut allocator) = self.allocator.lock() {
                    if let Err(e) = allocator.free(allocation) {
                        tracing::warn!(error = %e, "failed to free font atlas allocation");
                    }
                }
            }
            self.device.destroy_image(self.image, None);
        }
    }
}

/// Creates the nearest-filtered sampler used for the font atlas.
pub fn create_font_sampler(device: &ash::Device) -> Result<vk::Sampler, BackendError> {
    let sampler_info = vk::SamplerCreateInfo::builder()
        .mag_filter(vk::Filter::NEAREST)
        .min_filter(vk::Filter::NEAREST)
        .mipmap_mode(vk::SamplerMipmapMode::NEAREST)
        .address_mode_u(vk::SamplerAddressMode::CLAMP_TO_EDGE)
        .address_mode_v(vk::SamplerAddressMode::CLAMP_TO_EDGE)
        .address_mode_w(vk::SamplerAddressMode::CLAMP_TO_EDGE)
        .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
        .unnormalized_coordinates(false)
        .compare_enable(false)
        .compare_op(vk::CompareOp::ALWAYS);

    unsafe { device.create_sampler(&sampler_info, None) }.map_err(BackendError::from)
}

/// Host-visible scratch buffer that lives only for one upload.
struct StagingBuffer {
    device: Arc<ash::Device>,
    allocator: Arc<Mutex<Allocator>>,
    buffer: vk::Buffer,
    allocation: Option<Allocation>,
}

impl StagingBuffer {
    fn new(
        device: Arc<ash::Device>,
        allocator: Arc<Mutex<Allocator>>,
        size: vk::DeviceSize,
    ) -> Result<Self, BackendError> {
        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(vk::BufferUsageFlags::TRANSFER_SRC)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer =
            unsafe { device.create_buffer(&buffer_info, None) }.map_err(BackendError::from)?;

        let mut staging = Self {
            device: device.clone(),
            allocator: allocator.clone(),
            buffer,
            allocation: None,
        };

        let requirements = unsafe { device.get_buffer_memory_requirements(buffer) };
        let allocation = {
            let mut allocator = allocator
                .lock()
                .map_err(|_| BackendError::Allocation("allocator mutex poisoned".to_owned()))?;
            allocator.allocate(&AllocationCreateDesc {
                name: "imgui font staging",
                requirements,
                location: MemoryLocation::CpuToGpu,
                linear: true,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })?
        };
        unsafe {
            let memory = allocation.memory();
            let offset = allocation.offset();
            staging.allocation = Some(allocation);
            device.bind_buffer_memory(buffer, memory, offset)
        }
        .map_err(BackendError::from)?;
        Ok(staging)
    }

    fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), BackendError> {
        let allocation = self
            .allocation
            .as_ref()
            .ok_or_else(|| BackendError::Allocation("staging buffer not bound".to_owned()))?;
        let mapped = allocation.mapped_ptr().ok_or_else(|| {
            BackendError::Allocation("staging buffer memory is not host visible".to_owned())
        })?;
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), mapped.as_ptr() as *mut u8, bytes.len());
        }
        Ok(())
    }
}

impl Drop for StagingBuffer {
    fn drop(&mut self) {
        if let Some(allocation) = self.allocation.take() {
            if let Ok(mut allocator) = self.allocator.lock() {
                if let Err(e) = allocator.free(allocation) {
                    tracing::warn!(error = %e, "failed to free staging allocation");
                }
            }
        }
        unsafe { self.device.destroy_buffer(self.buffer, None) };
    }
}
