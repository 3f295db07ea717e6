// Graphics pipeline creation and management
//
// The graphics pipeline defines how vertices are processed and rasterized.
// Pipelines bake in the viewport extent and the screen render pass, so the
// whole manager is thrown away and rebuilt with the swapchain.

use ash::prelude::VkResult;
use ash::vk;
use std::collections::HashMap;
use std::sync::Arc;

use super::consts::SHADER_ENTRY_POINT;
use super::gpu::{Gpu, PipelineDesc};
use super::shader::{self, ShaderProgram};
use crate::error::{RenderError, Result};

/// What every pipeline of one swapchain generation is built against.
#[derive(Debug, Clone, Copy)]
pub struct PipelineTarget {
    pub render_pass: vk::RenderPass,
    pub extent: vk::Extent2D,
    /// Debug builds draw both faces so winding mistakes stay visible.
    pub debug: bool,
}

/// Builds and caches one pipeline per shader program.
pub struct PipelineManager<G: Gpu> {
    gpu: Arc<G>,
    target: PipelineTarget,
    layout: vk::PipelineLayout,
    pipelines: HashMap<ShaderProgram, vk::Pipeline>,
}

impl<G: Gpu> PipelineManager<G> {
    pub fn new(gpu: Arc<G>, target: PipelineTarget) -> Result<Self> {
        let layout = gpu
            .create_pipeline_layout()
            .map_err(RenderError::creation("pipeline layout"))?;

        log::debug!(
            "Created pipeline manager for {}x{}",
            target.extent.width,
            target.extent.height
        );

        Ok(Self {
            gpu,
            target,
            layout,
            pipelines: HashMap::new(),
        })
    }

    /// Pipeline for `program`, built on first request.
    pub fn pipeline(&mut self, program: ShaderProgram) -> Result<vk::Pipeline> {
        if let Some(&pipeline) = self.pipelines.get(&program) {
            return Ok(pipeline);
        }

        let desc = PipelineDesc {
            program,
            render_pass: self.target.render_pass,
            layout: self.layout,
            extent: self.target.extent,
            cull_back_faces: !self.target.debug,
        };

        let pipeline = self
            .gpu
            .create_graphics_pipeline(&desc)
            .map_err(RenderError::creation("graphics pipeline"))?;

        log::debug!("Built pipeline for shader program '{}'", program.id());
        self.pipelines.insert(program, pipeline);
        Ok(pipeline)
    }

    /// Build every program in `programs` now, so the first draw that
    /// needs one doesn't pay for it mid-frame.
    pub fn preload(&mut self, programs: &[ShaderProgram]) -> Result<()> {
        for &program in programs {
            self.pipeline(program)?;
        }
        Ok(())
    }

    #[inline]
    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout
    }

    #[inline]
    pub fn cached(&self) -> usize {
        self.pipelines.len()
    }
}

impl<G: Gpu> Drop for PipelineManager<G> {
    fn drop(&mut self) {
        for (_, pipeline) in self.pipelines.drain() {
            self.gpu.destroy_pipeline(pipeline);
        }
        self.gpu.destroy_pipeline_layout(self.layout);
        log::info!("Freed pipelines");
    }
}

/// Empty layout for now: vertex data only, no descriptor sets or push constants
pub fn create_pipeline_layout(device: &ash::Device) -> VkResult<vk::PipelineLayout> {
    let layout_info = vk::PipelineLayoutCreateInfo::builder();

    unsafe { device.create_pipeline_layout(&layout_info, None) }
}

/// Create a graphics pipeline for one built-in shader program
pub fn create_graphics_pipeline(
    device: &ash::Device,
    desc: &PipelineDesc,
) -> VkResult<vk::Pipeline> {
    let program = desc.program;

    let vert_shader = shader::create_shader_module(device, program.vertex_code())?;
    let frag_shader = match shader::create_shader_module(device, program.fragment_code()) {
        Ok(module) => module,
        Err(e) => {
            unsafe { device.destroy_shader_module(vert_shader, None) };
            return Err(e);
        }
    };

    let result = build_pipeline(device, desc, vert_shader, frag_shader);

    // Modules are only needed while the pipeline is being built
    unsafe {
        device.destroy_shader_module(frag_shader, None);
        device.destroy_shader_module(vert_shader, None);
    }

    result
}

fn build_pipeline(
    device: &ash::Device,
    desc: &PipelineDesc,
    vert_shader: vk::ShaderModule,
    frag_shader: vk::ShaderModule,
) -> VkResult<vk::Pipeline> {
    let program = desc.program;

    // Shader stages
    let vert_stage = vk::PipelineShaderStageCreateInfo::builder()
        .stage(vk::ShaderStageFlags::VERTEX)
        .module(vert_shader)
        .name(SHADER_ENTRY_POINT)
        .build();

    let frag_stage = vk::PipelineShaderStageCreateInfo::builder()
        .stage(vk::ShaderStageFlags::FRAGMENT)
        .module(frag_shader)
        .name(SHADER_ENTRY_POINT)
        .build();

    let shader_stages = &[vert_stage, frag_stage];

    // Vertex input
    let bindings = program.bindings();
    let attributes = program.attributes();
    let vertex_input_info = vk::PipelineVertexInputStateCreateInfo::builder()
        .vertex_binding_descriptions(&bindings)
        .vertex_attribute_descriptions(&attributes);

    // Input assembly
    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
        .topology(program.topology())
        .primitive_restart_enable(false);

    // Viewport and scissor
    let viewport = vk::Viewport::builder()
        .x(0.0)
        .y(0.0)
        .width(desc.extent.width as f32)
        .height(desc.extent.height as f32)
        .min_depth(0.0)
        .max_depth(1.0)
        .build();

    let scissor = vk::Rect2D::builder()
        .offset(vk::Offset2D { x: 0, y: 0 })
        .extent(desc.extent)
        .build();

    let viewports = &[viewport];
    let scissors = &[scissor];
    let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
        .viewports(viewports)
        .scissors(scissors);

    // Rasterization
    let cull_mode = if desc.cull_back_faces {
        vk::CullModeFlags::BACK
    } else {
        vk::CullModeFlags::NONE
    };

    let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
        .depth_clamp_enable(false)
        .rasterizer_discard_enable(false)
        .polygon_mode(program.polygon_mode())
        .line_width(1.0)
        .cull_mode(cull_mode)
        .front_face(vk::FrontFace::CLOCKWISE)
        .depth_bias_enable(false);

    // Multisampling (disabled)
    let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
        .sample_shading_enable(false)
        .rasterization_samples(vk::SampleCountFlags::TYPE_1)
        .min_sample_shading(1.0);

    // Alpha blending
    let color_blend_attachment = vk::PipelineColorBlendAttachmentState::builder()
        .blend_enable(true)
        .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
        .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
        .color_blend_op(vk::BlendOp::ADD)
        .src_alpha_blend_factor(vk::BlendFactor::ONE)
        .dst_alpha_blend_factor(vk::BlendFactor::ZERO)
        .alpha_blend_op(vk::BlendOp::ADD)
        .color_write_mask(vk::ColorComponentFlags::RGBA)
        .build();

    let color_blend_attachments = &[color_blend_attachment];
    let color_blending = vk::PipelineColorBlendStateCreateInfo::builder()
        .logic_op_enable(false)
        .logic_op(vk::LogicOp::COPY)
        .attachments(color_blend_attachments);

    // Create pipeline
    let pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
        .stages(shader_stages)
        .vertex_input_state(&vertex_input_info)
        .input_assembly_state(&input_assembly)
        .viewport_state(&viewport_state)
        .rasterization_state(&rasterizer)
        .multisample_state(&multisampling)
        .color_blend_state(&color_blending)
        .layout(desc.layout)
        .render_pass(desc.render_pass)
        .subpass(0)
        .build();

    let pipelines = unsafe {
        device
            .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
            .map_err(|(_, e)| e)?
    };

    Ok(pipelines[0])
}
