// Backend module - Vulkan abstraction layer
//
// Design: Thin wrapper around ash, every native call behind the `Gpu` trait
// Ownership: each wrapper holds an `Arc<G>` and frees its handles on drop

pub mod command;
pub mod consts;
pub mod device;
pub mod frame;
pub mod gpu;
pub mod pipeline;
pub mod render_pass;
pub mod shader;
pub mod swapchain;
pub mod sync;

#[cfg(test)]
pub(crate) mod testing;

pub use device::VulkanDevice;
pub use frame::{FrameManager, FrameState, FrameStatus};
pub use gpu::Gpu;
pub use shader::ShaderProgram;
pub use swapchain::Swapchain;
