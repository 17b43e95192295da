//! One-shot command buffer helpers for upload work (font atlas staging copy).

use ash::vk;

use crate::error::BackendError;

pub fn begin_single_time_commands(
    device: &ash::Device,
    command_pool: vk::CommandPool,
) -> Result<vk::CommandBuffer, BackendError> {
    let alloc_info = vk::CommandBufferAllocateInfo::builder()
        .level(vk::CommandBufferLevel::PRIMARY)
        .command_pool(command_pool)
        .command_buffer_count(1);

    let command_buffer = unsafe { device.allocate_command_buffers(&alloc_info) }
        .map_err(BackendError::from)?[0];

    let begin_info =
        vk::CommandBufferBeginInfo::builder().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

    if let Err(e) = unsafe { device.begin_command_buffer(command_buffer, &begin_info) } {
        unsafe { device.free_command_buffers(command_pool, std::slice::from_ref(&command_buffer)) };
        return Err(e.into());
    }
    Ok(command_buffer)
}

pub fn end_single_time_commands(
    device: &ash::Device,
    command_pool: vk::CommandPool,
    command_buffer: vk::CommandBuffer,
    queue: vk::Queue,
) -> Result<(), BackendError> {
    let result = (|| -> Result<(), vk::Result> {
        unsafe {
            device.end_command_buffer(command_buffer)?;
            let submit_info =
                vk::SubmitInfo::builder().command_buffers(std::slice::from_ref(&command_buffer));
            device.queue_submit(queue, &[submit_info.build()], vk::Fence::null())?;
            // Uploads are rare (font rebuilds); a blocking wait keeps the
            // lifetime of the staging buffer trivial.
            device.queue_wait_idle(queue)
        }
    })();
    unsafe { device.free_command_buffers(command_pool, std::slice::from_ref(&command_buffer)) };
    result.map_err(BackendError::from)
}
