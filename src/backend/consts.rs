// Fixed rendering policy
//
// These are not negotiated at runtime. Values the GPU cannot honour are
// either clamped (buffer count) or rejected at startup (surface format).

use ash::vk;
use std::ffi::CStr;
use std::time::Duration;

/// How many presentable images / in-flight frames we want.
///  Min: 2 (double buffering)
///  Max: 3 (triple buffering)
/// Clamped into the surface's [min, max] image count.
pub const OPTIMAL_BUFFER_COUNT: u32 = 3;

/// Surface format we render into. Startup fails if unsupported.
pub const SURFACE_FORMAT: vk::Format = vk::Format::B8G8R8A8_SRGB;
pub const SURFACE_COLOR_SPACE: vk::ColorSpaceKHR = vk::ColorSpaceKHR::SRGB_NONLINEAR;

/// How long the CPU waits on a frame fence or for the next image.
/// Three buffered frames never legitimately take this long to retire,
/// so expiry is treated as a hung GPU.
pub const FRAME_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(3);

/// Entry point in every shader module. Do not change from "main".
pub const SHADER_ENTRY_POINT: &CStr = c"main";

pub const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";
