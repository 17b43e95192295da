//! The backend object: owns the GUI context and every GPU resource needed to
//! turn a frame's draw data into recorded Vulkan commands.

use std::sync::{Arc, Mutex};

use ash::vk;
use gpu_allocator::vulkan::Allocator;
use imgui::internal::RawWrapper;
use imgui::{DrawCmd, TextureId, Textures};
use tracing::{debug, warn};

use crate::buffer::GrowableBuffer;
use crate::descriptor::DescriptorArena;
use crate::error::BackendError;
use crate::pipeline::UiPipeline;
use crate::texture::{create_font_sampler, FontTexture, TextureSlot};
use crate::transform::TransformUniform;
use crate::transition::{cmd_transition_image_layout, LayoutTracker};

/// Sentinel texture id for the font atlas. Registered ids come from a
/// monotonically increasing counter, so the sentinel can never collide.
const FONT_ATLAS_ID: usize = usize::MAX;

const VERTEX_SIZE: vk::DeviceSize = std::mem::size_of::<imgui::DrawVert>() as vk::DeviceSize;
const INDEX_SIZE: vk::DeviceSize = std::mem::size_of::<imgui::DrawIdx>() as vk::DeviceSize;
const INDEX_TYPE: vk::IndexType = if std::mem::size_of::<imgui::DrawIdx>() == 2 {
    vk::IndexType::UINT16
} else {
    vk::IndexType::UINT32
};

/// Vulkan rendering backend for an `imgui` context it owns.
///
/// The render pass the UI draws into is fixed at construction (pipeline
/// compatibility); command buffers and framebuffers are caller-owned and
/// passed per frame. The backend never submits work itself.
pub struct ImguiBackend {
    context: imgui::Context,
    textures: Textures<TextureSlot>,
    tracker: LayoutTracker,
    // Field order matters: the arena's pools must be destroyed before the
    // pipeline drops the descriptor set layout.
    arena: DescriptorArena,
    pipeline: UiPipeline,
    vertex_buffer: GrowableBuffer,
    index_buffer: GrowableBuffer,
    uniform_buffer: GrowableBuffer,
    font_texture: FontTexture,
    font_sampler: vk::Sampler,
    render_pass: vk::RenderPass,
    graphics_queue: vk::Queue,
    command_pool: vk::CommandPool,
    device: Arc<ash::Device>,
    allocator: Arc<Mutex<Allocator>>,
}

impl ImguiBackend {
    /// Builds the context, uploads the font atlas and compiles the UI
    /// pipeline against `render_pass`.
    ///
    /// `command_pool` must allow transient primary command buffers on
    /// `graphics_queue`; it is only used for font atlas uploads.
    pub fn new(
        device: Arc<ash::Device>,
        allocator: Arc<Mutex<Allocator>>,
        graphics_queue: vk::Queue,
        command_pool: vk::CommandPool,
        render_pass: vk::RenderPass,
    ) -> Result<Self, BackendError> {
        let mut context = imgui::Context::create();
        context.set_renderer_name(Some(String::from(concat!(
            "imgui-vulkan-backend ",
            env!("CARGO_PKG_VERSION")
        ))));
        context
            .io_mut()
            .backend_flags
            .insert(imgui::BackendFlags::RENDERER_HAS_VTX_OFFSET);
        #[cfg(feature = "docking")]
        context
            .io_mut()
            .config_flags
            .insert(imgui::ConfigFlags::DOCKING_ENABLE);

        let pipeline = UiPipeline::new(device.clone(), render_pass)?;
        let arena = DescriptorArena::new(device.clone(), pipeline.set_layout());
        let vertex_buffer = GrowableBuffer::new(
            device.clone(),
            allocator.clone(),
            vk::BufferUsageFlags::VERTEX_BUFFER,
            "imgui vertices",
        );
        let index_buffer = GrowableBuffer::new(
            device.clone(),
            allocator.clone(),
            vk::BufferUsageFlags::INDEX_BUFFER,
            "imgui indices",
        );
        let uniform_buffer = GrowableBuffer::new(
            device.clone(),
            allocator.clone(),
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            "imgui transform",
        );

        let font_sampler = create_font_sampler(&device)?;
        let fonts = context.fonts();
        let atlas = fonts.build_rgba32_texture();
        let font_texture = match FontTexture::upload(
            device.clone(),
            allocator.clone(),
            graphics_queue,
            command_pool,
            atlas.data,
            atlas.width,
            atlas.height,
        ) {
            Ok(texture) => texture,
            Err(e) => {
                unsafe { device.destroy_sampler(font_sampler, None) };
                return Err(e);
            }
        };
        fonts.tex_id = TextureId::new(FONT_ATLAS_ID);

        debug!("initialized imgui vulkan backend");
        Ok(Self {
            context,
            textures: Textures::new(),
            tracker: LayoutTracker::default(),
            arena,
            pipeline,
            vertex_buffer,
            index_buffer,
            uniform_buffer,
            font_texture,
            font_sampler,
            render_pass,
            graphics_queue,
            command_pool,
            device,
            allocator,
        })
    }

    /// Pushes display metrics, frame time and mouse position into the GUI io
    /// and starts a new widget frame.
    ///
    /// `mouse_position` is in framebuffer pixels; it is divided by the
    /// configured hidpi scale before the UI sees it, since the io works in
    /// logical display coordinates.
    pub fn new_frame(
        &mut self,
        delta_seconds: f32,
        mouse_position: [f32; 2],
        display_size: [f32; 2],
    ) -> &mut imgui::Ui {
        let io = self.context.io_mut();
        io.delta_time = delta_seconds.max(f32::EPSILON);
        io.mouse_pos = logical_mouse_pos(mouse_position, io.display_framebuffer_scale);
        io.display_size = display_size;
        self.context.new_frame()
    }

    /// Finalizes the widget frame and records it into `command_buffer`.
    ///
    /// Precondition: the GPU has finished reading the geometry and uniform
    /// buffers written by the previous call (the driver's frame
    /// synchronization guarantees this before it reuses a command buffer).
    ///
    /// On error the command buffer is left partially recorded and must be
    /// reset, not submitted; all persistent backend state stays consistent
    /// for the next frame.
    pub fn cmd_render_frame(
        &mut self,
        command_buffer: vk::CommandBuffer,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
    ) -> Result<(), BackendError> {
        let Self {
            context,
            textures,
            tracker,
            arena,
            pipeline,
            vertex_buffer,
            index_buffer,
            uniform_buffer,
            font_texture,
            font_sampler,
            render_pass,
            device,
            ..
        } = self;

        let draw_data = context.render();

        arena.reset();
        tracker.reset();

        // Pre-pass: force every sampled application texture shader-readable
        // before the render pass begins. Each texture is transitioned once
        // per frame no matter how many batches sample it.
        for draw_list in draw_data.draw_lists() {
            for cmd in draw_list.commands() {
                if let DrawCmd::Elements { cmd_params, .. } = cmd {
                    let id = cmd_params.texture_id;
                    if id.id() == FONT_ATLAS_ID {
                        continue;
                    }
                    let slot = textures
                        .get(id)
                        .ok_or(BackendError::InvalidTextureHandle(id.id()))?;
                    if slot.layout != vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
                        && tracker.note(id, slot.layout)
                    {
                        cmd_transition_image_layout(
                            device,
                            command_buffer,
                            slot.image,
                            slot.layout,
                            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                        );
                    }
                }
            }
        }

        let transform = TransformUniform::new(
            draw_data.display_pos,
            draw_data.display_size,
            draw_data.framebuffer_scale,
        );
        uniform_buffer
            .ensure_capacity(std::mem::size_of::<TransformUniform>() as vk::DeviceSize)?;
        uniform_buffer.write_slice(transform.as_bytes(), 0)?;

        let (vertex_bytes, index_bytes) =
            geometry_byte_totals(draw_data.total_vtx_count, draw_data.total_idx_count);
        vertex_buffer.ensure_capacity(vertex_bytes)?;
        index_buffer.ensure_capacity(index_bytes)?;

        let mut vertex_write: vk::DeviceSize = 0;
        let mut index_write: vk::DeviceSize = 0;
        for draw_list in draw_data.draw_lists() {
            let vertices = draw_list.vtx_buffer();
            let indices = draw_list.idx_buffer();
            vertex_buffer.write_slice(vertices, vertex_write)?;
            index_buffer.write_slice(indices, index_write)?;
            vertex_write += vertices.len() as vk::DeviceSize * VERTEX_SIZE;
            index_write += indices.len() as vk::DeviceSize * INDEX_SIZE;
        }

        let pass_info = vk::RenderPassBeginInfo::builder()
            .render_pass(*render_pass)
            .framebuffer(framebuffer)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            });
        unsafe {
            device.cmd_begin_render_pass(command_buffer, &pass_info, vk::SubpassContents::INLINE)
        };

        let has_geometry = draw_data.total_vtx_count > 0;
        bind_frame_state(
            device,
            command_buffer,
            pipeline,
            vertex_buffer,
            index_buffer,
            extent,
            has_geometry,
        );

        let mut cursor = GeometryCursor::default();
        for draw_list in draw_data.draw_lists() {
            let base =
                cursor.advance(draw_list.vtx_buffer().len(), draw_list.idx_buffer().len());
            for cmd in draw_list.commands() {
                match cmd {
                    DrawCmd::Elements { count, cmd_params } => {
                        let (view, sampler) = if cmd_params.texture_id.id() == FONT_ATLAS_ID {
                            (font_texture.view(), *font_sampler)
                        } else {
                            let slot = textures.get(cmd_params.texture_id).ok_or(
                                BackendError::InvalidTextureHandle(cmd_params.texture_id.id()),
                            )?;
                            (slot.view, slot.sampler)
                        };
                        let set = arena.acquire(uniform_buffer.handle(), view, sampler)?;
                        let scissor = scissor_rect(
                            cmd_params.clip_rect,
                            draw_data.display_pos,
                            draw_data.framebuffer_scale,
                        );
                        unsafe {
                            device.cmd_bind_descriptor_sets(
                                command_buffer,
                                vk::PipelineBindPoint::GRAPHICS,
                                pipeline.layout(),
                                0,
                                &[set],
                                &[],
                            );
                            device.cmd_set_scissor(command_buffer, 0, &[scissor]);
                            device.cmd_draw_indexed(
                                command_buffer,
                                count as u32,
                                1,
                                base.index + cmd_params.idx_offset as u32,
                                base.vertex + cmd_params.vtx_offset as i32,
                                0,
                            );
                        }
                    }
                    DrawCmd::ResetRenderState => {
                        bind_frame_state(
                            device,
                            command_buffer,
                            pipeline,
                            vertex_buffer,
                            index_buffer,
                            extent,
                            has_geometry,
                        );
                    }
                    DrawCmd::RawCallback { callback, raw_cmd } => unsafe {
                        callback(draw_list.raw(), raw_cmd);
                    },
                }
            }
        }

        unsafe { device.cmd_end_render_pass(command_buffer) };

        // Restore pass: return every transitioned texture to the layout it
        // held when the frame started.
        for entry in tracker.entries() {
            let slot = textures
                .get(entry.texture)
                .ok_or(BackendError::InvalidTextureHandle(entry.texture.id()))?;
            cmd_transition_image_layout(
                device,
                command_buffer,
                slot.image,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                entry.prior_layout,
            );
        }
        Ok(())
    }

    /// Re-rasterizes the font atlas and replaces the GPU texture.
    ///
    /// Must be called after changing the font configuration. The upload
    /// blocks on the graphics queue, so the retired atlas image can be
    /// destroyed immediately.
    pub fn rebuild_fonts(&mut self) -> Result<(), BackendError> {
        let Self {
            context,
            device,
            allocator,
            graphics_queue,
            command_pool,
            font_texture,
            ..
        } = self;

        let fonts = context.fonts();
        let atlas = fonts.build_rgba32_texture();
        let rebuilt = FontTexture::upload(
            device.clone(),
            allocator.clone(),
            *graphics_queue,
            *command_pool,
            atlas.data,
            atlas.width,
            atlas.height,
        )?;
        *font_texture = rebuilt;
        fonts.tex_id = TextureId::new(FONT_ATLAS_ID);
        Ok(())
    }

    /// Exposes an application image to UI draw commands.
    ///
    /// The handles stay application-owned and must outlive the registration.
    /// `layout` is the layout the image holds between frames; it is restored
    /// after every render pass that samples the texture.
    pub fn register_texture(
        &mut self,
        image: vk::Image,
        view: vk::ImageView,
        sampler: vk::Sampler,
        layout: vk::ImageLayout,
    ) -> TextureId {
        self.textures.insert(TextureSlot {
            image,
            view,
            sampler,
            layout,
        })
    }

    /// Removes a registered texture. The id must not appear in any frame
    /// rendered afterwards.
    pub fn unregister_texture(&mut self, id: TextureId) -> Option<TextureSlot> {
        self.textures.remove(id)
    }

    pub fn context_mut(&mut self) -> &mut imgui::Context {
        &mut self.context
    }

    pub fn io_mut(&mut self) -> &mut imgui::Io {
        self.context.io_mut()
    }
}

impl Drop for ImguiBackend {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                warn!(error = ?e, "device_wait_idle failed during backend teardown");
            }
            self.device.destroy_sampler(self.font_sampler, None);
        }
        // Remaining GPU objects are torn down by the field destructors.
    }
}

fn bind_frame_state(
    device: &ash::Device,
    command_buffer: vk::CommandBuffer,
    pipeline: &UiPipeline,
    vertex_buffer: &GrowableBuffer,
    index_buffer: &GrowableBuffer,
    extent: vk::Extent2D,
    bind_geometry: bool,
) {
    unsafe {
        device.cmd_bind_pipeline(
            command_buffer,
            vk::PipelineBindPoint::GRAPHICS,
            pipeline.handle(),
        );
        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        device.cmd_set_viewport(command_buffer, 0, &[viewport]);
        if bind_geometry {
            device.cmd_bind_vertex_buffers(command_buffer, 0, &[vertex_buffer.handle()], &[0]);
            device.cmd_bind_index_buffer(command_buffer, index_buffer.handle(), 0, INDEX_TYPE);
        }
    }
}

/// Global element offsets of one draw list within the shared buffers, in the
/// types `cmd_draw_indexed` wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ListBase {
    pub vertex: i32,
    pub index: u32,
}

/// Accumulates per-list element offsets while draw lists are walked in order.
#[derive(Debug, Default)]
pub(crate) struct GeometryCursor {
    vertex: usize,
    index: usize,
}

impl GeometryCursor {
    pub fn advance(&mut self, vtx_count: usize, idx_count: usize) -> ListBase {
        let base = ListBase {
            vertex: self.vertex as i32,
            index: self.index as u32,
        };
        self.vertex += vtx_count;
        self.index += idx_count;
        base
    }
}

pub(crate) fn geometry_byte_totals(
    total_vtx: i32,
    total_idx: i32,
) -> (vk::DeviceSize, vk::DeviceSize) {
    (
        total_vtx.max(0) as vk::DeviceSize * VERTEX_SIZE,
        total_idx.max(0) as vk::DeviceSize * INDEX_SIZE,
    )
}

/// Converts a cursor position from framebuffer pixels into the logical
/// display coordinates the GUI io expects.
pub(crate) fn logical_mouse_pos(position: [f32; 2], framebuffer_scale: [f32; 2]) -> [f32; 2] {
    [
        position[0] / framebuffer_scale[0],
        position[1] / framebuffer_scale[1],
    ]
}

/// Maps a clip rectangle from display space into framebuffer pixels.
///
/// Negative offsets are clamped to zero (Vulkan requires non-negative
/// scissor offsets) and the extent shrinks accordingly. A fully offscreen
/// rectangle degenerates to a zero extent rather than being culled.
pub(crate) fn scissor_rect(
    clip_rect: [f32; 4],
    display_pos: [f32; 2],
    framebuffer_scale: [f32; 2],
) -> vk::Rect2D {
    let min_x = ((clip_rect[0] - display_pos[0]) * framebuffer_scale[0]).max(0.0);
    let min_y = ((clip_rect[1] - display_pos[1]) * framebuffer_scale[1]).max(0.0);
    let max_x = (clip_rect[2] - display_pos[0]) * framebuffer_scale[0];
    let max_y = (clip_rect[3] - display_pos[1]) * framebuffer_scale[1];

    vk::Rect2D {
        offset: vk::Offset2D {
            x: min_x as i32,
            y: min_y as i32,
        },
        extent: vk::Extent2D {
            width: (max_x - min_x).max(0.0) as u32,
            height: (max_y - min_y).max(0.0) as u32,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scissor_maps_display_space_to_pixels() {
        let rect = scissor_rect([110.0, 60.0, 150.0, 100.0], [100.0, 50.0], [1.0, 1.0]);
        assert_eq!(rect.offset, vk::Offset2D { x: 10, y: 10 });
        assert_eq!(
            rect.extent,
            vk::Extent2D {
                width: 40,
                height: 40
            }
        );
    }

    #[test]
    fn scissor_clamps_negative_offsets() {
        // A window dragged partially above-left of the viewport produces a
        // negative clip origin; the visible part must stay intact.
        let rect = scissor_rect([-10.0, -20.0, 50.0, 40.0], [0.0, 0.0], [1.0, 1.0]);
        assert_eq!(rect.offset, vk::Offset2D { x: 0, y: 0 });
        assert_eq!(
            rect.extent,
            vk::Extent2D {
                width: 50,
                height: 40
            }
        );
    }

    #[test]
    fn fully_offscreen_scissor_degenerates_to_zero_extent() {
        let rect = scissor_rect([-50.0, -50.0, -10.0, -10.0], [0.0, 0.0], [1.0, 1.0]);
        assert_eq!(rect.offset, vk::Offset2D { x: 0, y: 0 });
        assert_eq!(
            rect.extent,
            vk::Extent2D {
                width: 0,
                height: 0
            }
        );
    }

    #[test]
    fn scissor_applies_hidpi_scale() {
        let rect = scissor_rect([10.0, 10.0, 30.0, 50.0], [0.0, 0.0], [2.0, 2.0]);
        assert_eq!(rect.offset, vk::Offset2D { x: 20, y: 20 });
        assert_eq!(
            rect.extent,
            vk::Extent2D {
                width: 40,
                height: 80
            }
        );
    }

    #[test]
    fn cursor_accumulates_element_offsets_per_list() {
        let mut cursor = GeometryCursor::default();
        assert_eq!(
            cursor.advance(30, 90),
            ListBase {
                vertex: 0,
                index: 0
            }
        );
        assert_eq!(
            cursor.advance(10, 30),
            ListBase {
                vertex: 30,
                index: 90
            }
        );
        assert_eq!(
            cursor.advance(0, 0),
            ListBase {
                vertex: 40,
                index: 120
            }
        );
    }

    #[test]
    fn mouse_position_is_scaled_to_logical_coordinates() {
        assert_eq!(logical_mouse_pos([200.0, 100.0], [2.0, 2.0]), [100.0, 50.0]);
        assert_eq!(logical_mouse_pos([37.0, 19.0], [1.0, 1.0]), [37.0, 19.0]);
    }

    #[test]
    fn byte_totals_use_vertex_and_index_strides() {
        let (vtx, idx) = geometry_byte_totals(100, 300);
        assert_eq!(vtx, 100 * VERTEX_SIZE);
        assert_eq!(idx, 300 * INDEX_SIZE);
        assert_eq!(VERTEX_SIZE, 20);
        assert_eq!(geometry_byte_totals(-1, -1), (0, 0));
    }
}
