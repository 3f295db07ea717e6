// Swapchain - Window presentation
//
// Owns the chain of presentable images, their views, format and extent.
// Recreated wholesale whenever the surface configuration changes.

use ash::vk;
use std::sync::Arc;
use std::time::Duration;

use super::gpu::Gpu;
use crate::error::{RenderError, Result};

/// Outcome of an acquire or present call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentStatus {
    Ok,
    OutOfDate,
    Suboptimal,
    TimedOut,
    Error(vk::Result),
}

impl PresentStatus {
    /// The surface no longer matches the swapchain and it must be rebuilt.
    #[inline]
    pub fn is_invalidated(self) -> bool {
        matches!(self, Self::OutOfDate | Self::Suboptimal)
    }

    fn from_acquire(result: vk::Result) -> Self {
        match result {
            vk::Result::ERROR_OUT_OF_DATE_KHR => Self::OutOfDate,
            vk::Result::SUBOPTIMAL_KHR => Self::Suboptimal,
            vk::Result::TIMEOUT | vk::Result::NOT_READY => Self::TimedOut,
            e => Self::Error(e),
        }
    }
}

/// What the caller wants from a new swapchain.
#[derive(Debug, Clone, Copy)]
pub struct SwapchainRequest {
    pub desired_image_count: u32,
    pub format: vk::Format,
    pub color_space: vk::ColorSpaceKHR,
    pub width: u32,
    pub height: u32,
    pub vsync: bool,
}

pub struct Swapchain<G: Gpu> {
    gpu: Arc<G>,
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    format: vk::Format,
    extent: vk::Extent2D,
    present_mode: vk::PresentModeKHR,
}

impl<G: Gpu> Swapchain<G> {
    pub fn new(gpu: Arc<G>, request: &SwapchainRequest) -> Result<Self> {
        log::info!("Creating swapchain: {}x{}", request.width, request.height);

        let support = gpu
            .surface_support()
            .map_err(RenderError::creation("surface capability query"))?;
        let caps = support.capabilities;

        // The format is a startup contract: no silent fallback
        let surface_format = support
            .formats
            .iter()
            .find(|f| f.format == request.format && f.color_space == request.color_space)
            .ok_or(RenderError::UnsupportedSurfaceFormat {
                format: request.format,
                color_space: request.color_space,
            })?;

        let present_mode = choose_present_mode(&support.present_modes, request.vsync);
        log::info!("Present mode: {:?}", present_mode);

        let extent = choose_extent(&caps, request.width, request.height);
        let image_count = clamp_image_count(&caps, request.desired_image_count);

        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(gpu.surface())
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .build();

        let swapchain = gpu
            .create_swapchain(&create_info)
            .map_err(RenderError::creation("swapchain"))?;

        // From here on, Drop cleans up whatever has been created
        let mut chain = Self {
            gpu,
            swapchain,
            images: Vec::new(),
            image_views: Vec::new(),
            format: surface_format.format,
            extent,
            present_mode,
        };

        chain.images = chain
            .gpu
            .swapchain_images(swapchain)
            .map_err(RenderError::creation("swapchain images"))?;

        for i in 0..chain.images.len() {
            let view = chain
                .gpu
                .create_image_view(chain.images[i], chain.format)
                .map_err(RenderError::creation("swapchain image view"))?;
            chain.image_views.push(view);
        }

        log::info!("Created swapchain with {} images", chain.images.len());
        Ok(chain)
    }

    /// Acquire next image for rendering, signaling `semaphore` when it is ready.
    pub fn acquire_next_image(
        &self,
        timeout: Duration,
        semaphore: vk::Semaphore,
    ) -> (u32, PresentStatus) {
        match self
            .gpu
            .acquire_next_image(self.swapchain, timeout_ns(timeout), semaphore)
        {
            Ok((index, false)) => (index, PresentStatus::Ok),
            Ok((index, true)) => (index, PresentStatus::Suboptimal),
            Err(e) => (0, PresentStatus::from_acquire(e)),
        }
    }

    /// Present rendered image to screen once `wait` is signaled.
    pub fn present(&self, image_index: u32, wait: vk::Semaphore) -> PresentStatus {
        match self.gpu.queue_present(self.swapchain, image_index, wait) {
            Ok(false) => PresentStatus::Ok,
            Ok(true) => PresentStatus::Suboptimal,
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => PresentStatus::OutOfDate,
            Err(e) => PresentStatus::Error(e),
        }
    }

    #[inline]
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    #[inline]
    pub fn image_views(&self) -> &[vk::ImageView] {
        &self.image_views
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        self.format
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    #[inline]
    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }
}

impl<G: Gpu> Drop for Swapchain<G> {
    fn drop(&mut self) {
        for &view in &self.image_views {
            self.gpu.destroy_image_view(view);
        }
        self.gpu.destroy_swapchain(self.swapchain);
        log::info!("Freed swapchain");
    }
}

/// clamp(desired, gpuMin, gpuMax); a max of 0 means "no limit".
pub fn clamp_image_count(caps: &vk::SurfaceCapabilitiesKHR, desired: u32) -> u32 {
    let max = if caps.max_image_count == 0 {
        u32::MAX
    } else {
        caps.max_image_count
    };
    desired.clamp(caps.min_image_count, max.max(caps.min_image_count))
}

/// FIFO blocks on vblank and is always available. Without vsync prefer
/// MAILBOX (no tearing), then IMMEDIATE (lowest latency).
fn choose_present_mode(modes: &[vk::PresentModeKHR], vsync: bool) -> vk::PresentModeKHR {
    if vsync {
        return vk::PresentModeKHR::FIFO;
    }

    [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::IMMEDIATE]
        .into_iter()
        .find(|mode| modes.contains(mode))
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, width: u32, height: u32) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        return caps.current_extent;
    }

    vk::Extent2D {
        width: width.clamp(caps.min_image_extent.width, caps.max_image_extent.width),
        height: height.clamp(caps.min_image_extent.height, caps.max_image_extent.height),
    }
}

pub(crate) fn timeout_ns(timeout: Duration) -> u64 {
    u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX)
}
