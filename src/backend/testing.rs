// In-memory Gpu and window for unit tests
//
// Models just enough of the driver to check the frame lifecycle: fence and
// semaphore state, which swapchain images are held by the application,
// which command buffers are in flight, and every live handle by kind.
// Misuse that a real driver would turn into undefined behaviour is recorded
// as a violation string so tests can assert on it.

use ash::prelude::VkResult;
use ash::vk::{self, Handle};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

use super::gpu::{ColorAttachment, Gpu, PipelineDesc, RenderPassBegin, Submission, SurfaceSupport};
use crate::window::{ResizeCallback, WindowSystem};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Semaphore,
    Fence,
    CommandPool,
    Swapchain,
    ImageView,
    RenderPass,
    Framebuffer,
    Pipeline,
    PipelineLayout,
}

/// Next acquire result to inject.
#[derive(Debug, Clone, Copy)]
pub enum AcquireScript {
    /// Hands out an image and signals the semaphore, but reports suboptimal.
    Suboptimal,
    OutOfDate,
    /// Reports a timeout without sleeping.
    TimedOut,
    Fail(vk::Result),
}

#[derive(Debug, Default, Clone, Copy)]
struct FenceState {
    signaled: bool,
    pending: bool,
    stalled: bool,
}

#[derive(Debug, Default)]
struct SwapchainState {
    images: Vec<vk::Image>,
    acquired: HashSet<u32>,
    last: Option<u32>,
    /// Fence of the submission that last rendered to each presented image.
    owners: HashMap<u32, vk::Fence>,
}

#[derive(Default)]
struct State {
    next_handle: u64,
    live: HashMap<u64, Kind>,

    fences: HashMap<u64, FenceState>,
    semaphores: HashMap<u64, bool>,
    fail_fence_after: Option<u32>,
    last_fence_timeout: Option<u64>,

    pools: HashMap<u64, Vec<vk::CommandBuffer>>,
    /// Fence each command buffer was last submitted with.
    in_flight: HashMap<vk::CommandBuffer, vk::Fence>,
    recording: HashSet<vk::CommandBuffer>,
    fail_next_command_submit: Option<vk::Result>,
    command_submits: usize,
    last_submit_fence: Option<vk::Fence>,
    last_acquired: Option<u32>,

    swapchains: HashMap<u64, SwapchainState>,
    swapchains_created: usize,
    last_swapchain_extent: Option<vk::Extent2D>,
    acquire_script: VecDeque<AcquireScript>,
    present_script: VecDeque<vk::Result>,
    presents: usize,

    pipelines_built: usize,
    last_pipeline_desc: Option<PipelineDesc>,
    idle_waits: usize,

    violations: Vec<String>,
}

impl State {
    fn mint<H: Handle>(&mut self, kind: Option<Kind>) -> H {
        self.next_handle += 1;
        if let Some(kind) = kind {
            self.live.insert(self.next_handle, kind);
        }
        H::from_raw(self.next_handle)
    }

    fn forget<H: Handle>(&mut self, handle: H, kind: Kind) {
        let raw = handle.as_raw();
        if raw == 0 {
            return;
        }
        match self.live.remove(&raw) {
            Some(found) if found == kind => {}
            found => panic!("destroying {:?} {:#x}, live as {:?}", kind, raw, found),
        }
    }

    fn wait_semaphore(&mut self, semaphore: vk::Semaphore, what: &str) {
        match self.semaphores.get_mut(&semaphore.as_raw()) {
            Some(signaled) if *signaled => *signaled = false,
            Some(_) => self
                .violations
                .push(format!("{} waits on unsignaled semaphore {:?}", what, semaphore)),
            None => self
                .violations
                .push(format!("{} waits on unknown semaphore {:?}", what, semaphore)),
        }
    }

    fn signal_semaphore(&mut self, semaphore: vk::Semaphore, what: &str) {
        match self.semaphores.get_mut(&semaphore.as_raw()) {
            Some(signaled) if !*signaled => *signaled = true,
            Some(_) => self
                .violations
                .push(format!("{} signals already signaled semaphore {:?}", what, semaphore)),
            None => self
                .violations
                .push(format!("{} signals unknown semaphore {:?}", what, semaphore)),
        }
    }
}

pub struct FakeGpu {
    state: Mutex<State>,
}

impl FakeGpu {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
        }
    }

    pub fn live(&self, kind: Kind) -> usize {
        self.state.lock().live.values().filter(|&&k| k == kind).count()
    }

    pub fn fence_signaled(&self, fence: vk::Fence) -> bool {
        self.state
            .lock()
            .fences
            .get(&fence.as_raw())
            .map_or(false, |f| f.signaled)
    }

    /// Let `n` more fences be created, then fail the next one.
    pub fn fail_fence_creation_after(&self, n: u32) {
        self.state.lock().fail_fence_after = Some(n);
    }

    /// Work submitted with `fence` never completes.
    pub fn stall_fence(&self, fence: vk::Fence) {
        if let Some(state) = self.state.lock().fences.get_mut(&fence.as_raw()) {
            state.stalled = true;
        }
    }

    pub fn last_fence_timeout(&self) -> Option<u64> {
        self.state.lock().last_fence_timeout
    }

    pub fn script_acquire(&self, script: AcquireScript) {
        self.state.lock().acquire_script.push_back(script);
    }

    /// `SUBOPTIMAL_KHR` presents and reports suboptimal; anything else fails.
    pub fn script_present(&self, result: vk::Result) {
        self.state.lock().present_script.push_back(result);
    }

    pub fn fail_next_command_submit(&self, result: vk::Result) {
        self.state.lock().fail_next_command_submit = Some(result);
    }

    /// Submissions that carried a command buffer.
    pub fn command_submits(&self) -> usize {
        self.state.lock().command_submits
    }

    pub fn presents(&self) -> usize {
        self.state.lock().presents
    }

    pub fn swapchains_created(&self) -> usize {
        self.state.lock().swapchains_created
    }

    pub fn last_swapchain_extent(&self) -> Option<vk::Extent2D> {
        self.state.lock().last_swapchain_extent
    }

    pub fn pipelines_built(&self) -> usize {
        self.state.lock().pipelines_built
    }

    pub fn last_pipeline_desc(&self) -> Option<PipelineDesc> {
        self.state.lock().last_pipeline_desc
    }

    pub fn idle_waits(&self) -> usize {
        self.state.lock().idle_waits
    }

    pub fn violations(&self) -> Vec<String> {
        self.state.lock().violations.clone()
    }
}

impl Gpu for FakeGpu {
    fn wait_idle(&self) -> VkResult<()> {
        let mut state = self.state.lock();
        state.idle_waits += 1;
        for fence in state.fences.values_mut() {
            if fence.pending && !fence.stalled {
                fence.pending = false;
                fence.signaled = true;
            }
        }
        Ok(())
    }

    fn create_semaphore(&self) -> VkResult<vk::Semaphore> {
        let mut state = self.state.lock();
        let semaphore: vk::Semaphore = state.mint(Some(Kind::Semaphore));
        state.semaphores.insert(semaphore.as_raw(), false);
        Ok(semaphore)
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        let mut state = self.state.lock();
        state.forget(semaphore, Kind::Semaphore);
        state.semaphores.remove(&semaphore.as_raw());
    }

    fn create_fence(&self, signaled: bool) -> VkResult<vk::Fence> {
        let mut state = self.state.lock();
        match state.fail_fence_after {
            Some(0) => {
                state.fail_fence_after = None;
                return Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
            }
            Some(n) => state.fail_fence_after = Some(n - 1),
            None => {}
        }

        let fence: vk::Fence = state.mint(Some(Kind::Fence));
        state.fences.insert(
            fence.as_raw(),
            FenceState {
                signaled,
                ..Default::default()
            },
        );
        Ok(fence)
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        let mut state = self.state.lock();
        state.forget(fence, Kind::Fence);
        state.fences.remove(&fence.as_raw());
    }

    fn wait_for_fence(&self, fence: vk::Fence, timeout_ns: u64) -> VkResult<()> {
        {
            let mut state = self.state.lock();
            state.last_fence_timeout = Some(timeout_ns);
            let fence = state
                .fences
                .get_mut(&fence.as_raw())
                .ok_or(vk::Result::ERROR_UNKNOWN)?;

            if fence.signaled {
                return Ok(());
            }
            if fence.pending && !fence.stalled {
                fence.pending = false;
                fence.signaled = true;
                return Ok(());
            }
        }

        // Never going to signal: behave like the driver and sit out the timeout
        std::thread::sleep(Duration::from_nanos(timeout_ns));
        Err(vk::Result::TIMEOUT)
    }

    fn reset_fence(&self, fence: vk::Fence) -> VkResult<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let entry = state
            .fences
            .get_mut(&fence.as_raw())
            .ok_or(vk::Result::ERROR_UNKNOWN)?;
        let pending = entry.pending;
        entry.signaled = false;
        if pending {
            state
                .violations
                .push(format!("reset of in-flight fence {:?}", fence));
        }
        Ok(())
    }

    fn create_command_pool(&self) -> VkResult<vk::CommandPool> {
        let mut state = self.state.lock();
        let pool: vk::CommandPool = state.mint(Some(Kind::CommandPool));
        state.pools.insert(pool.as_raw(), Vec::new());
        Ok(pool)
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        let mut state = self.state.lock();
        state.forget(pool, Kind::CommandPool);
        for buffer in state.pools.remove(&pool.as_raw()).unwrap_or_default() {
            state.in_flight.remove(&buffer);
            state.recording.remove(&buffer);
        }
    }

    fn allocate_command_buffers(
        &self,
        pool: vk::CommandPool,
        count: u32,
    ) -> VkResult<Vec<vk::CommandBuffer>> {
        let mut state = self.state.lock();
        if !state.pools.contains_key(&pool.as_raw()) {
            return Err(vk::Result::ERROR_UNKNOWN);
        }
        let buffers: Vec<vk::CommandBuffer> = (0..count).map(|_| state.mint(None)).collect();
        if let Some(owned) = state.pools.get_mut(&pool.as_raw()) {
            owned.extend_from_slice(&buffers);
        }
        Ok(buffers)
    }

    fn begin_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VkResult<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if let Some(fence) = state.in_flight.get(&command_buffer).copied() {
            let retired = state
                .fences
                .get(&fence.as_raw())
                .map_or(true, |f| !f.pending);
            if !retired {
                state.violations.push(format!(
                    "command buffer {:?} recorded while fence {:?} is unsignaled",
                    command_buffer, fence
                ));
            }
        }
        state.recording.insert(command_buffer);
        Ok(())
    }

    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VkResult<()> {
        let mut state = self.state.lock();
        if !state.recording.remove(&command_buffer) {
            state
                .violations
                .push(format!("end of command buffer {:?} that is not recording", command_buffer));
        }
        Ok(())
    }

    fn cmd_begin_render_pass(&self, command_buffer: vk::CommandBuffer, _begin: &RenderPassBegin) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if !state.recording.contains(&command_buffer) {
            state
                .violations
                .push(format!("render pass begun outside recording on {:?}", command_buffer));
        }

        // The image's previous rendering must have retired before it is drawn again
        let Some(image) = state.last_acquired else {
            return;
        };
        let busy = state
            .swapchains
            .values()
            .filter_map(|chain| chain.owners.get(&image))
            .find(|fence| state.fences.get(&fence.as_raw()).map_or(false, |f| f.pending))
            .copied();
        if let Some(fence) = busy {
            state.violations.push(format!(
                "image {} rendered while fence {:?} is still pending",
                image, fence
            ));
        }
    }

    fn cmd_end_render_pass(&self, _command_buffer: vk::CommandBuffer) {}

    fn queue_submit(&self, submission: &Submission) -> VkResult<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        if let Some(command_buffer) = submission.command_buffer {
            if let Some(result) = state.fail_next_command_submit.take() {
                return Err(result);
            }
            state.command_submits += 1;
            if submission.fence != vk::Fence::null() {
                state.in_flight.insert(command_buffer, submission.fence);
                state.last_submit_fence = Some(submission.fence);
            }
        }

        state.wait_semaphore(submission.wait, "submit");
        if let Some(signal) = submission.signal {
            state.signal_semaphore(signal, "submit");
        }

        if submission.fence != vk::Fence::null() {
            let fence = state
                .fences
                .get_mut(&submission.fence.as_raw())
                .ok_or(vk::Result::ERROR_UNKNOWN)?;
            if fence.signaled {
                let fence = submission.fence;
                state
                    .violations
                    .push(format!("submit with signaled fence {:?}", fence));
            } else {
                fence.pending = true;
            }
        }
        Ok(())
    }

    fn surface(&self) -> vk::SurfaceKHR {
        vk::SurfaceKHR::from_raw(0xfeed)
    }

    fn surface_support(&self) -> VkResult<SurfaceSupport> {
        Ok(SurfaceSupport {
            capabilities: vk::SurfaceCapabilitiesKHR {
                min_image_count: 2,
                max_image_count: 8,
                current_extent: vk::Extent2D {
                    width: u32::MAX,
                    height: u32::MAX,
                },
                min_image_extent: vk::Extent2D {
                    width: 1,
                    height: 1,
                },
                max_image_extent: vk::Extent2D {
                    width: 4096,
                    height: 4096,
                },
                ..Default::default()
            },
            formats: vec![
                vk::SurfaceFormatKHR {
                    format: vk::Format::B8G8R8A8_UNORM,
                    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
                },
                vk::SurfaceFormatKHR {
                    format: vk::Format::B8G8R8A8_SRGB,
                    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
                },
            ],
            present_modes: vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
        })
    }

    fn create_swapchain(&self, info: &vk::SwapchainCreateInfoKHR) -> VkResult<vk::SwapchainKHR> {
        let mut state = self.state.lock();
        if !state.swapchains.is_empty() {
            state
                .violations
                .push("swapchain created while another is alive".to_string());
        }

        let swapchain: vk::SwapchainKHR = state.mint(Some(Kind::Swapchain));
        let images: Vec<vk::Image> = (0..info.min_image_count).map(|_| state.mint(None)).collect();
        state.swapchains.insert(
            swapchain.as_raw(),
            SwapchainState {
                images,
                ..Default::default()
            },
        );
        state.swapchains_created += 1;
        state.last_swapchain_extent = Some(info.image_extent);
        Ok(swapchain)
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        let mut state = self.state.lock();
        state.forget(swapchain, Kind::Swapchain);
        state.swapchains.remove(&swapchain.as_raw());
    }

    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> VkResult<Vec<vk::Image>> {
        self.state
            .lock()
            .swapchains
            .get(&swapchain.as_raw())
            .map(|chain| chain.images.clone())
            .ok_or(vk::Result::ERROR_UNKNOWN)
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        _timeout_ns: u64,
        signal: vk::Semaphore,
    ) -> VkResult<(u32, bool)> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let suboptimal = match state.acquire_script.pop_front() {
            None => false,
            Some(AcquireScript::Suboptimal) => true,
            Some(AcquireScript::OutOfDate) => return Err(vk::Result::ERROR_OUT_OF_DATE_KHR),
            Some(AcquireScript::TimedOut) => return Err(vk::Result::TIMEOUT),
            Some(AcquireScript::Fail(result)) => return Err(result),
        };

        let chain = state
            .swapchains
            .get_mut(&swapchain.as_raw())
            .ok_or(vk::Result::ERROR_SURFACE_LOST_KHR)?;
        let count = chain.images.len() as u32;
        let start = chain.last.map_or(0, |last| last + 1);
        let free = (0..count)
            .map(|offset| (start + offset) % count)
            .find(|index| !chain.acquired.contains(index));

        let Some(index) = free else {
            state
                .violations
                .push("acquired more images than the swapchain has".to_string());
            return Err(vk::Result::TIMEOUT);
        };
        chain.acquired.insert(index);
        chain.last = Some(index);
        state.last_acquired = Some(index);

        state.signal_semaphore(signal, "acquire");
        Ok((index, suboptimal))
    }

    fn queue_present(
        &self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> VkResult<bool> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let scripted = state.present_script.pop_front();

        // Waits execute even when the presentation engine rejects the image
        state.wait_semaphore(wait, "present");

        let chain = state
            .swapchains
            .get_mut(&swapchain.as_raw())
            .ok_or(vk::Result::ERROR_SURFACE_LOST_KHR)?;
        if !chain.acquired.remove(&image_index) {
            state
                .violations
                .push(format!("image {} presented without being acquired", image_index));
        } else if let Some(fence) = state.last_submit_fence.take() {
            chain.owners.insert(image_index, fence);
        }

        match scripted {
            None => {
                state.presents += 1;
                Ok(false)
            }
            Some(vk::Result::SUBOPTIMAL_KHR) => {
                state.presents += 1;
                Ok(true)
            }
            Some(result) => Err(result),
        }
    }

    fn create_image_view(&self, _image: vk::Image, _format: vk::Format) -> VkResult<vk::ImageView> {
        Ok(self.state.lock().mint(Some(Kind::ImageView)))
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        self.state.lock().forget(view, Kind::ImageView);
    }

    fn create_render_pass(&self, _attachment: &ColorAttachment) -> VkResult<vk::RenderPass> {
        Ok(self.state.lock().mint(Some(Kind::RenderPass)))
    }

    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        self.state.lock().forget(render_pass, Kind::RenderPass);
    }

    fn create_framebuffer(
        &self,
        _render_pass: vk::RenderPass,
        _view: vk::ImageView,
        _extent: vk::Extent2D,
    ) -> VkResult<vk::Framebuffer> {
        Ok(self.state.lock().mint(Some(Kind::Framebuffer)))
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        self.state.lock().forget(framebuffer, Kind::Framebuffer);
    }

    fn create_pipeline_layout(&self) -> VkResult<vk::PipelineLayout> {
        Ok(self.state.lock().mint(Some(Kind::PipelineLayout)))
    }

    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        self.state.lock().forget(layout, Kind::PipelineLayout);
    }

    fn create_graphics_pipeline(&self, desc: &PipelineDesc) -> VkResult<vk::Pipeline> {
        let mut state = self.state.lock();
        state.pipelines_built += 1;
        state.last_pipeline_desc = Some(*desc);
        Ok(state.mint(Some(Kind::Pipeline)))
    }

    fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        self.state.lock().forget(pipeline, Kind::Pipeline);
    }
}

type QueryHook = Box<dyn Fn() + Send + Sync>;

/// Window whose size and resize events are driven by the test.
pub struct FakeWindow {
    size: Mutex<(u32, u32)>,
    callbacks: Mutex<Vec<ResizeCallback>>,
    on_query: Mutex<Option<QueryHook>>,
}

impl FakeWindow {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            size: Mutex::new((width, height)),
            callbacks: Mutex::new(Vec::new()),
            on_query: Mutex::new(None),
        }
    }

    /// Change the drawable size and deliver the resize notification.
    pub fn resize(&self, width: u32, height: u32) {
        *self.size.lock() = (width, height);
        for callback in self.callbacks.lock().iter() {
            callback(width, height);
        }
    }

    /// Run `hook` every time the size is queried (i.e. in the middle of a rebuild).
    pub fn on_size_query(&self, hook: impl Fn() + Send + Sync + 'static) {
        *self.on_query.lock() = Some(Box::new(hook));
    }
}

impl WindowSystem for FakeWindow {
    fn framebuffer_size(&self) -> (u32, u32) {
        if let Some(hook) = self.on_query.lock().as_ref() {
            hook();
        }
        *self.size.lock()
    }

    fn on_window_resized(&self, callback: ResizeCallback) {
        self.callbacks.lock().push(callback);
    }
}
