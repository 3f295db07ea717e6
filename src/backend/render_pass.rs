// Render passes and framebuffers
//
// Render passes are created lazily per target configuration and cached
// until the next swapchain rebuild. Framebuffers bind the screen pass to
// each swapchain image view.

use ash::prelude::VkResult;
use ash::vk;
use std::collections::HashMap;
use std::sync::Arc;

use super::gpu::{ColorAttachment, Gpu};
use crate::error::{RenderError, Result};

/// Render target configurations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RenderTarget {
    /// Clear the swapchain image, draw, hand it to the presentation engine.
    Screen,
}

impl RenderTarget {
    pub fn attachment(self, format: vk::Format) -> ColorAttachment {
        match self {
            Self::Screen => ColorAttachment {
                format,
                load_op: vk::AttachmentLoadOp::CLEAR,
                store_op: vk::AttachmentStoreOp::STORE,
                initial_layout: vk::ImageLayout::UNDEFINED,
                final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
            },
        }
    }
}

pub struct RenderPassCache<G: Gpu> {
    gpu: Arc<G>,
    format: vk::Format,
    passes: HashMap<RenderTarget, vk::RenderPass>,
}

impl<G: Gpu> RenderPassCache<G> {
    /// Empty cache for attachments of `format` (the swapchain format).
    pub fn new(gpu: Arc<G>, format: vk::Format) -> Self {
        Self {
            gpu,
            format,
            passes: HashMap::new(),
        }
    }

    /// Render pass for `target`, created on first request.
    pub fn get(&mut self, target: RenderTarget) -> Result<vk::RenderPass> {
        if let Some(&pass) = self.passes.get(&target) {
            return Ok(pass);
        }

        let pass = self
            .gpu
            .create_render_pass(&target.attachment(self.format))
            .map_err(RenderError::creation("render pass"))?;

        log::debug!("Created render pass for {:?}", target);
        self.passes.insert(target, pass);
        Ok(pass)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.passes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }
}

impl<G: Gpu> Drop for RenderPassCache<G> {
    fn drop(&mut self) {
        for (_, pass) in self.passes.drain() {
            self.gpu.destroy_render_pass(pass);
        }
        log::info!("Freed all render passes");
    }
}

/// One framebuffer per swapchain image.
pub struct Framebuffers<G: Gpu> {
    gpu: Arc<G>,
    framebuffers: Vec<vk::Framebuffer>,
}

impl<G: Gpu> Framebuffers<G> {
    pub fn new(
        gpu: Arc<G>,
        render_pass: vk::RenderPass,
        image_views: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> Result<Self> {
        let mut set = Self {
            gpu,
            framebuffers: Vec::with_capacity(image_views.len()),
        };

        for &view in image_views {
            let framebuffer = set
                .gpu
                .create_framebuffer(render_pass, view, extent)
                .map_err(RenderError::creation("framebuffer"))?;
            set.framebuffers.push(framebuffer);
        }

        Ok(set)
    }

    /// Framebuffer wrapping swapchain image `image_index`.
    #[inline]
    pub fn get(&self, image_index: u32) -> vk::Framebuffer {
        self.framebuffers[image_index as usize]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.framebuffers.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.framebuffers.is_empty()
    }
}

impl<G: Gpu> Drop for Framebuffers<G> {
    fn drop(&mut self) {
        for &framebuffer in &self.framebuffers {
            self.gpu.destroy_framebuffer(framebuffer);
        }
        log::info!("Freed framebuffers");
    }
}

/// Create a single-subpass render pass with one color attachment
pub fn create_color_render_pass(
    device: &ash::Device,
    attachment: &ColorAttachment,
) -> VkResult<vk::RenderPass> {
    let color_attachment = vk::AttachmentDescription::builder()
        .format(attachment.format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(attachment.load_op)
        .store_op(attachment.store_op)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(attachment.initial_layout)
        .final_layout(attachment.final_layout)
        .build();

    let color_attachment_ref = vk::AttachmentReference::builder()
        .attachment(0)
        .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
        .build();

    let color_attachments = &[color_attachment_ref];
    let subpass = vk::SubpassDescription::builder()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(color_attachments)
        .build();

    // Wait for the presentation engine to release the image before writing it
    let dependency = vk::SubpassDependency::builder()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .src_access_mask(vk::AccessFlags::empty())
        .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
        .build();

    let attachments = &[color_attachment];
    let subpasses = &[subpass];
    let dependencies = &[dependency];

    let render_pass_info = vk::RenderPassCreateInfo::builder()
        .attachments(attachments)
        .subpasses(subpasses)
        .dependencies(dependencies);

    unsafe { device.create_render_pass(&render_pass_info, None) }
}

/// Create a framebuffer over a single color view
pub fn create_framebuffer(
    device: &ash::Device,
    render_pass: vk::RenderPass,
    view: vk::ImageView,
    extent: vk::Extent2D,
) -> VkResult<vk::Framebuffer> {
    let attachments = &[view];
    let framebuffer_info = vk::FramebufferCreateInfo::builder()
        .render_pass(render_pass)
        .attachments(attachments)
        .width(extent.width)
        .height(extent.height)
        .layers(1);

    unsafe { device.create_framebuffer(&framebuffer_info, None) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::testing::{FakeGpu, Kind};

    #[test]
    fn test_render_pass_is_created_lazily_once() {
        let gpu = Arc::new(FakeGpu::new());
        let mut cache = RenderPassCache::new(gpu.clone(), vk::Format::B8G8R8A8_SRGB);
        assert!(cache.is_empty());
        assert_eq!(gpu.live(Kind::RenderPass), 0);

        let first = cache.get(RenderTarget::Screen).unwrap();
        let second = cache.get(RenderTarget::Screen).unwrap();
        assert_eq!(first, second);
        assert_eq!(gpu.live(Kind::RenderPass), 1);

        drop(cache);
        assert_eq!(gpu.live(Kind::RenderPass), 0);
    }

    #[test]
    fn test_screen_target_ends_presentable() {
        let attachment = RenderTarget::Screen.attachment(vk::Format::B8G8R8A8_SRGB);
        assert_eq!(attachment.load_op, vk::AttachmentLoadOp::CLEAR);
        assert_eq!(attachment.final_layout, vk::ImageLayout::PRESENT_SRC_KHR);
    }

    #[test]
    fn test_framebuffer_per_view() {
        let gpu = Arc::new(FakeGpu::new());
        let mut cache = RenderPassCache::new(gpu.clone(), vk::Format::B8G8R8A8_SRGB);
        let pass = cache.get(RenderTarget::Screen).unwrap();
        let views: Vec<_> = (0..3)
            .map(|_| gpu.create_image_view(vk::Image::null(), vk::Format::B8G8R8A8_SRGB).unwrap())
            .collect();

        let framebuffers =
            Framebuffers::new(gpu.clone(), pass, &views, vk::Extent2D { width: 8, height: 8 })
                .unwrap();
        assert_eq!(framebuffers.len(), 3);
        assert_ne!(framebuffers.get(0), framebuffers.get(1));

        drop(framebuffers);
        assert_eq!(gpu.live(Kind::Framebuffer), 0);

        for view in views {
            gpu.destroy_image_view(view);
        }
    }
}
