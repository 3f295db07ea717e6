// Built-in shader programs
//
// The program set is closed: every variant carries its vertex layout,
// topology and SPIR-V, and doubles as the pipeline cache key.

use ash::prelude::VkResult;
use ash::vk;
use glam::{Vec2, Vec3};
use std::io::Cursor;
use std::mem::size_of;

static FLAT_VERT: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/flat.vert.spv"));
static FLAT_FRAG: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/flat.frag.spv"));

const POSITION_SIZE: u32 = size_of::<Vec2>() as u32;
const COLOR_SIZE: u32 = size_of::<Vec3>() as u32;
const FLAT_VERTEX_STRIDE: u32 = POSITION_SIZE + COLOR_SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderProgram {
    /// Filled quad: 4 vertices, 2 triangles.
    Rect,
    /// Line segments, 2 vertices each.
    Line,
}

impl ShaderProgram {
    /// Programs pre-warmed whenever the pipeline manager is (re)built.
    pub const BUILT_IN: [ShaderProgram; 2] = [ShaderProgram::Rect, ShaderProgram::Line];

    pub fn id(self) -> &'static str {
        match self {
            Self::Rect => "rect",
            Self::Line => "line",
        }
    }

    pub fn vertex_code(self) -> &'static [u8] {
        match self {
            Self::Rect | Self::Line => FLAT_VERT,
        }
    }

    pub fn fragment_code(self) -> &'static [u8] {
        match self {
            Self::Rect | Self::Line => FLAT_FRAG,
        }
    }

    pub fn topology(self) -> vk::PrimitiveTopology {
        match self {
            Self::Rect => vk::PrimitiveTopology::TRIANGLE_LIST,
            Self::Line => vk::PrimitiveTopology::LINE_LIST,
        }
    }

    pub fn polygon_mode(self) -> vk::PolygonMode {
        match self {
            Self::Rect => vk::PolygonMode::FILL,
            Self::Line => vk::PolygonMode::LINE,
        }
    }

    /// Interleaved position (vec2) + color (vec3) in binding 0.
    pub fn bindings(self) -> Vec<vk::VertexInputBindingDescription> {
        match self {
            Self::Rect | Self::Line => vec![vk::VertexInputBindingDescription::builder()
                .binding(0)
                .stride(FLAT_VERTEX_STRIDE)
                .input_rate(vk::VertexInputRate::VERTEX)
                .build()],
        }
    }

    pub fn attributes(self) -> Vec<vk::VertexInputAttributeDescription> {
        match self {
            Self::Rect | Self::Line => vec![
                vk::VertexInputAttributeDescription::builder()
                    .binding(0)
                    .location(0)
                    .format(vk::Format::R32G32_SFLOAT)
                    .offset(0)
                    .build(),
                vk::VertexInputAttributeDescription::builder()
                    .binding(0)
                    .location(1)
                    .format(vk::Format::R32G32B32_SFLOAT)
                    .offset(POSITION_SIZE)
                    .build(),
            ],
        }
    }
}

/// Load SPIR-V bytes and create a shader module
pub fn create_shader_module(device: &ash::Device, code: &[u8]) -> VkResult<vk::ShaderModule> {
    if code.is_empty() {
        log::error!("Shader bytecode is empty; was glslc available at build time?");
        return Err(vk::Result::ERROR_INITIALIZATION_FAILED);
    }

    // read_spv copies into u32 words, so the embedded bytes need no alignment
    let words = ash::util::read_spv(&mut Cursor::new(code)).map_err(|e| {
        log::error!("Invalid SPIR-V: {}", e);
        vk::Result::ERROR_INITIALIZATION_FAILED
    })?;

    let create_info = vk::ShaderModuleCreateInfo::builder().code(&words);

    unsafe { device.create_shader_module(&create_info, None) }
}
