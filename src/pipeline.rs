//! Graphics pipeline for UI draw lists.
//!
//! One pipeline, compiled once against the target render pass. Viewport and
//! scissor are dynamic state since the scissor changes per draw batch.

use std::io::Cursor;
use std::sync::Arc;

use ash::util::read_spv;
use ash::vk;
use tracing::debug;

use crate::error::BackendError;

const VERT_SPV: &[u8] = include_bytes!("../shaders/ui.vert.spv");
const FRAG_SPV: &[u8] = include_bytes!("../shaders/ui.frag.spv");

/// Vertex stride of the UI library's vertex format: two f32 position, two
/// f32 uv, four u8 color.
const VERTEX_STRIDE: u32 = 20;

pub struct UiPipeline {
    device: Arc<ash::Device>,
    set_layout: vk::DescriptorSetLayout,
    layout: vk::PipelineLayout,
    pipeline: vk::Pipeline,
}

impl UiPipeline {
    pub fn new(device: Arc<ash::Device>, render_pass: vk::RenderPass) -> Result<Self, BackendError> {
        let set_layout = create_set_layout(&device)?;

        let layout = {
            let set_layouts = [set_layout];
            let layout_info = vk::PipelineLayoutCreateInfo::builder().set_layouts(&set_layouts);
            match unsafe { device.create_pipeline_layout(&layout_info, None) } {
                Ok(layout) => layout,
                Err(e) => {
                    unsafe { device.destroy_descriptor_set_layout(set_layout, None) };
                    return Err(e.into());
                }
            }
        };

        let pipeline = match create_pipeline(&device, layout, render_pass) {
            Ok(pipeline) => pipeline,
            Err(e) => {
                unsafe {
                    device.destroy_pipeline_layout(layout, None);
                    device.destroy_descriptor_set_layout(set_layout, None);
                }
                return Err(e);
            }
        };

        debug!("created UI graphics pipeline");
        Ok(Self {
            device,
            set_layout,
            layout,
            pipeline,
        })
    }

    pub fn set_layout(&self) -> vk::DescriptorSetLayout {
        self.set_layout
    }

    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout
    }

    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }
}

impl Drop for UiPipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_pipeline(self.pipeline, None);
            self.device.destroy_pipeline_layout(self.layout, None);
            self.device
                .destroy_descriptor_set_layout(self.set_layout, None);
        }
    }
}

/// Binding 0: the frame transform uniform, vertex stage. Binding 1: the
/// sampled texture, fragment stage.
fn create_set_layout(device: &ash::Device) -> Result<vk::DescriptorSetLayout, BackendError> {
    let bindings = [
        vk::DescriptorSetLayoutBinding::builder()
            .binding(0)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
            .descriptor_count(1)
            .stage_flags(vk::ShaderStageFlags::VERTEX)
            .build(),
        vk::DescriptorSetLayoutBinding::builder()
            .binding(1)
            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .descriptor_count(1)
            .stage_flags(vk::ShaderStageFlags::FRAGMENT)
            .build(),
    ];
    let layout_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&bindings);
    unsafe { device.create_descriptor_set_layout(&layout_info, None) }.map_err(BackendError::from)
}

fn create_shader_module(
    device: &ash::Device,
    spirv_bytes: &[u8],
) -> Result<vk::ShaderModule, BackendError> {
    let code = read_spv(&mut Cursor::new(spirv_bytes)).map_err(|e| {
        BackendError::Allocation(format!("embedded shader is not valid SPIR-V: {e}"))
    })?;
    let module_info = vk::ShaderModuleCreateInfo::builder().code(&code);
    unsafe { device.create_shader_module(&module_info, None) }.map_err(BackendError::from)
}

fn create_pipeline(
    device: &ash::Device,
    layout: vk::PipelineLayout,
    render_pass: vk::RenderPass,
) -> Result<vk::Pipeline, BackendError> {
    let vert_module = create_shader_module(device, VERT_SPV)?;
    let frag_module = match create_shader_module(device, FRAG_SPV) {
        Ok(module) => module,
        Err(e) => {
            unsafe { device.destroy_shader_module(vert_module, None) };
            return Err(e);
        }
    };

    let entry_point = std::ffi::CStr::from_bytes_with_nul(b"main\0")
        .map_err(|_| BackendError::Allocation("invalid shader entry point".to_owned()))?;
    let stages = [
        vk::PipelineShaderStageCreateInfo::builder()
            .stage(vk::ShaderStageFlags::VERTEX)
            .module(vert_module)
            .name(entry_point)
            .build(),
        vk::PipelineShaderStageCreateInfo::builder()
            .stage(vk::ShaderStageFlags::FRAGMENT)
            .module(frag_module)
            .name(entry_point)
            .build(),
    ];

    let binding_descriptions = [vk::VertexInputBindingDescription {
        binding: 0,
        stride: VERTEX_STRIDE,
        input_rate: vk::VertexInputRate::VERTEX,
    }];
    let attribute_descriptions = [
        vk::VertexInputAttributeDescription {
            location: 0,
            binding: 0,
            format: vk::Format::R32G32_SFLOAT,
            offset: 0,
        },
        vk::VertexInputAttributeDescription {
            location: 1,
            binding: 0,
            format: vk::Format::R32G32_SFLOAT,
            offset: 8,
        },
        vk::VertexInputAttributeDescription {
            location: 2,
            binding: 0,
            format: vk::Format::R8G8B8A8_UNORM,
            offset: 16,
        },
    ];
    let vertex_input = vk::PipelineVertexInputStateCreateInfo::builder()
        .vertex_binding_descriptions(&binding_descriptions)
        .vertex_attribute_descriptions(&attribute_descriptions);

    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
        .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
        .primitive_restart_enable(false);

    // Actual viewport and scissor are set dynamically per frame.
    let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
        .viewport_count(1)
        .scissor_count(1);

    let rasterization = vk::PipelineRasterizationStateCreateInfo::builder()
        .polygon_mode(vk::PolygonMode::FILL)
        .cull_mode(vk::CullModeFlags::NONE)
        .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
        .line_width(1.0);

    let multisample = vk::PipelineMultisampleStateCreateInfo::builder()
        .rasterization_samples(vk::SampleCountFlags::TYPE_1);

    let blend_attachments = [vk::PipelineColorBlendAttachmentState::builder()
        .blend_enable(true)
        .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
        .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
        .color_blend_op(vk::BlendOp::ADD)
        .src_alpha_blend_factor(vk::BlendFactor::ONE)
        .dst_alpha_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
        .alpha_blend_op(vk::BlendOp::ADD)
        .color_write_mask(vk::ColorComponentFlags::RGBA)
        .build()];
    let color_blend =
        vk::PipelineColorBlendStateCreateInfo::builder().attachments(&blend_attachments);

    let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
    let dynamic_state =
        vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&dynamic_states);

    let pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
        .stages(&stages)
        .vertex_input_state(&vertex_input)
        .input_assembly_state(&input_assembly)
        .viewport_state(&viewport_state)
        .rasterization_state(&rasterization)
        .multisample_state(&multisample)
        .color_blend_state(&color_blend)
        .dynamic_state(&dynamic_state)
        .layout(layout)
        .render_pass(render_pass)
        .subpass(0);

    let result = unsafe {
        device.create_graphics_pipelines(
            vk::PipelineCache::null(),
            std::slice::from_ref(&pipeline_info),
            None,
        )
    };

    unsafe {
        device.destroy_shader_module(vert_module, None);
        device.destroy_shader_module(frag_module, None);
    }

    match result {
        Ok(pipelines) => Ok(pipelines[0]),
        Err((_, e)) => Err(e.into()),
    }
}
