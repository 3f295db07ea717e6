//! vk2d - a small Vulkan 2D rendering backend.
//!
//! The interesting part is the frame lifecycle: [`backend::FrameManager`]
//! rotates in-flight slots over a swapchain, and [`renderer::Renderer`]
//! owns every surface-dependent GPU object and rebuilds them when the
//! window changes underneath it.

pub mod backend;
pub mod config;
pub mod error;
pub mod renderer;
pub mod window;

pub use error::{RenderError, Result};
pub use renderer::{FrameContext, RebuildOutcome, Renderer, RendererSettings};
