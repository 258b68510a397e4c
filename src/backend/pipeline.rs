// Graphics pipeline creation
//
// The one fixed-function pipeline the bootstrap draws with: two stages, no
// vertex input (positions come from gl_VertexIndex), triangle list, no depth,
// single sample, opaque colour write. Viewport and scissor are dynamic so the
// pipeline does not bake in the window size.

use anyhow::Result;
use ash::vk;
use std::sync::Arc;

use super::{GraphicsContext, RenderError, ShaderModule, ShaderStage};

/// Inputs for building the pipeline. Shaders are only needed while building.
pub struct PipelineDesc<'a> {
    pub fragment: &'a ShaderModule,
    pub vertex: &'a ShaderModule,
    /// Borrowed from the swapchain, which must outlive the pipeline
    pub render_pass: vk::RenderPass,
    pub extent: vk::Extent2D,
}

pub const DYNAMIC_STATES: [vk::DynamicState; 2] =
    [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];

pub struct Pipeline {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    context: Arc<GraphicsContext>,
}

impl Pipeline {
    pub fn new(context: Arc<GraphicsContext>, desc: &PipelineDesc) -> Result<Self> {
        check_stage(desc.vertex, ShaderStage::Vertex)?;
        check_stage(desc.fragment, ShaderStage::Fragment)?;
        let device = &context.device.device;

        // Shader stages
        let shader_stages = [desc.vertex.stage_info(), desc.fragment.stage_info()];

        // Vertex input: nothing bound
        let vertex_input_info = vk::PipelineVertexInputStateCreateInfo::builder();

        // Input assembly
        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .primitive_restart_enable(false);

        // Viewport and scissor (overridden per frame through dynamic state)
        let viewports = [full_viewport(desc.extent)];
        let scissors = [full_scissor(desc.extent)];
        let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
            .viewports(&viewports)
            .scissors(&scissors);

        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&DYNAMIC_STATES);

        // Rasterization
        let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            .cull_mode(vk::CullModeFlags::BACK)
            .front_face(vk::FrontFace::CLOCKWISE)
            .depth_bias_enable(false);

        // Multisampling (disabled)
        let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
            .sample_shading_enable(false)
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        // Color blending (no blending, opaque)
        let color_blend_attachment = vk::PipelineColorBlendAttachmentState::builder()
            .color_write_mask(vk::ColorComponentFlags::RGBA)
            .blend_enable(false)
            .build();

        let color_blend_attachments = [color_blend_attachment];
        let color_blending = vk::PipelineColorBlendStateCreateInfo::builder()
            .logic_op_enable(false)
            .attachments(&color_blend_attachments);

        // Pipeline layout: no descriptors, no push constants
        let layout_info = vk::PipelineLayoutCreateInfo::builder();
        let layout = unsafe { device.create_pipeline_layout(&layout_info, None) }
            .map_err(RenderError::init("pipeline layout"))?;

        let pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input_info)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisampling)
            .color_blend_state(&color_blending)
            .dynamic_state(&dynamic_state)
            .layout(layout)
            .render_pass(desc.render_pass)
            .subpass(0)
            .build();

        let pipelines = unsafe {
            device.create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
        };
        let pipeline = match pipelines {
            Ok(pipelines) => pipelines[0],
            Err((_, result)) => {
                unsafe { device.destroy_pipeline_layout(layout, None) };
                return Err(RenderError::init("graphics pipeline")(result).into());
            }
        };

        log::info!(
            "Created triangle pipeline ({:?} + {:?})",
            desc.vertex.path,
            desc.fragment.path
        );

        Ok(Self {
            pipeline,
            layout,
            context,
        })
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        let device = &self.context.device.device;
        unsafe {
            device.destroy_pipeline(self.pipeline, None);
            device.destroy_pipeline_layout(self.layout, None);
        }
    }
}

fn check_stage(shader: &ShaderModule, expected: ShaderStage) -> Result<(), RenderError> {
    if shader.stage != expected {
        return Err(RenderError::WrongShaderStage {
            path: shader.path.clone(),
            expected,
            found: shader.stage,
        });
    }
    Ok(())
}

/// Viewport covering the whole extent, depth range [0, 1]
pub fn full_viewport(extent: vk::Extent2D) -> vk::Viewport {
    vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: extent.width as f32,
        height: extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    }
}

pub fn full_scissor(extent: vk::Extent2D) -> vk::Rect2D {
    vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent,
    }
}
