// Native call boundary
//
// Everything the frame lifecycle needs from Vulkan goes through `Gpu`.
// `VulkanDevice` implements it on top of ash; tests implement it with an
// in-memory model of fences, semaphores and swapchain images.

use ash::prelude::VkResult;
use ash::vk;

use super::shader::ShaderProgram;

/// Surface capabilities, formats and present modes in one query.
#[derive(Debug, Clone)]
pub struct SurfaceSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

/// How the single color attachment of a render pass is used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColorAttachment {
    pub format: vk::Format,
    pub load_op: vk::AttachmentLoadOp,
    pub store_op: vk::AttachmentStoreOp,
    pub initial_layout: vk::ImageLayout,
    pub final_layout: vk::ImageLayout,
}

#[derive(Debug, Clone, Copy)]
pub struct RenderPassBegin {
    pub render_pass: vk::RenderPass,
    pub framebuffer: vk::Framebuffer,
    pub extent: vk::Extent2D,
    pub clear_color: [f32; 4],
}

/// One queue submission.
///
/// `command_buffer` may be absent: an empty submission still waits on
/// `wait` and signals `fence`, which is how a slot is released when its
/// real work never made it to the queue.
#[derive(Debug, Clone, Copy)]
pub struct Submission {
    pub command_buffer: Option<vk::CommandBuffer>,
    pub wait: vk::Semaphore,
    pub signal: Option<vk::Semaphore>,
    pub fence: vk::Fence,
}

/// Everything needed to build one graphics pipeline.
#[derive(Debug, Clone, Copy)]
pub struct PipelineDesc {
    pub program: ShaderProgram,
    pub render_pass: vk::RenderPass,
    pub layout: vk::PipelineLayout,
    pub extent: vk::Extent2D,
    pub cull_back_faces: bool,
}

pub trait Gpu {
    // -- device ------------------------------------------------------------

    /// Block until the device has retired all submitted work.
    fn wait_idle(&self) -> VkResult<()>;

    // -- synchronization ---------------------------------------------------

    fn create_semaphore(&self) -> VkResult<vk::Semaphore>;
    fn destroy_semaphore(&self, semaphore: vk::Semaphore);
    fn create_fence(&self, signaled: bool) -> VkResult<vk::Fence>;
    fn destroy_fence(&self, fence: vk::Fence);
    /// Returns `Err(vk::Result::TIMEOUT)` when `timeout_ns` expires first.
    fn wait_for_fence(&self, fence: vk::Fence, timeout_ns: u64) -> VkResult<()>;
    fn reset_fence(&self, fence: vk::Fence) -> VkResult<()>;

    // -- commands ----------------------------------------------------------

    fn create_command_pool(&self) -> VkResult<vk::CommandPool>;
    /// Also frees every command buffer allocated from `pool`.
    fn destroy_command_pool(&self, pool: vk::CommandPool);
    fn allocate_command_buffers(
        &self,
        pool: vk::CommandPool,
        count: u32,
    ) -> VkResult<Vec<vk::CommandBuffer>>;
    /// Resets and begins a one-time-submit recording.
    fn begin_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VkResult<()>;
    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VkResult<()>;
    fn cmd_begin_render_pass(&self, command_buffer: vk::CommandBuffer, begin: &RenderPassBegin);
    fn cmd_end_render_pass(&self, command_buffer: vk::CommandBuffer);
    fn queue_submit(&self, submission: &Submission) -> VkResult<()>;

    // -- surface & swapchain -----------------------------------------------

    fn surface(&self) -> vk::SurfaceKHR;
    fn surface_support(&self) -> VkResult<SurfaceSupport>;
    fn create_swapchain(&self, info: &vk::SwapchainCreateInfoKHR) -> VkResult<vk::SwapchainKHR>;
    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR);
    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> VkResult<Vec<vk::Image>>;
    /// `Ok((index, suboptimal))`, ash semantics.
    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        timeout_ns: u64,
        signal: vk::Semaphore,
    ) -> VkResult<(u32, bool)>;
    /// `Ok(suboptimal)`, ash semantics.
    fn queue_present(
        &self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> VkResult<bool>;
    fn create_image_view(&self, image: vk::Image, format: vk::Format) -> VkResult<vk::ImageView>;
    fn destroy_image_view(&self, view: vk::ImageView);

    // -- render targets & pipelines ----------------------------------------

    fn create_render_pass(&self, attachment: &ColorAttachment) -> VkResult<vk::RenderPass>;
    fn destroy_render_pass(&self, render_pass: vk::RenderPass);
    fn create_framebuffer(
        &self,
        render_pass: vk::RenderPass,
        view: vk::ImageView,
        extent: vk::Extent2D,
    ) -> VkResult<vk::Framebuffer>;
    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer);
    fn create_pipeline_layout(&self) -> VkResult<vk::PipelineLayout>;
    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout);
    fn create_graphics_pipeline(&self, desc: &PipelineDesc) -> VkResult<vk::Pipeline>;
    fn destroy_pipeline(&self, pipeline: vk::Pipeline);
}
