//! The rendering context.
//!
//! [`Renderer`] exclusively owns every GPU handle tied to the current
//! surface configuration and drives the [`FrameManager`] over them. The
//! window system only ever sees a [`RebuildTrigger`]: resize notifications
//! and invalidated presents set it, and the renderer rebuilds at the start
//! of the next frame, never while one is being recorded.

use ash::vk;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

use crate::backend::command::CommandPool;
use crate::backend::consts::{
    FRAME_ACQUIRE_TIMEOUT, OPTIMAL_BUFFER_COUNT, SURFACE_COLOR_SPACE, SURFACE_FORMAT,
};
use crate::backend::frame::{FrameManager, FrameState, FrameStatus, FrameTargets};
use crate::backend::gpu::Gpu;
use crate::backend::pipeline::{PipelineManager, PipelineTarget};
use crate::backend::render_pass::{Framebuffers, RenderPassCache, RenderTarget};
use crate::backend::shader::ShaderProgram;
use crate::backend::swapchain::{clamp_image_count, Swapchain, SwapchainRequest};
use crate::error::{RenderError, Result};
use crate::window::WindowSystem;

/// Knobs the renderer is constructed with.
#[derive(Debug, Clone)]
pub struct RendererSettings {
    /// Validation-friendly rendering: no back-face culling.
    pub debug: bool,
    /// Blocking FIFO presentation instead of MAILBOX/IMMEDIATE.
    pub vsync: bool,
    pub clear_color: [f32; 4],
    /// Desired in-flight frames and swapchain images, clamped by the surface.
    pub buffer_count: u32,
    pub frame_timeout: Duration,
}

impl Default for RendererSettings {
    fn default() -> Self {
        Self {
            debug: false,
            vsync: true,
            clear_color: [0.0, 0.0, 0.0, 1.0],
            buffer_count: OPTIMAL_BUFFER_COUNT,
            frame_timeout: FRAME_ACQUIRE_TIMEOUT,
        }
    }
}

/// What a call to [`Renderer::rebuild`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebuildOutcome {
    Rebuilt,
    /// Drawable size is zero; nothing was recreated.
    Minimized,
    /// Another rebuild was already running, or a frame is recording.
    Skipped,
}

#[derive(Debug, Default)]
struct TriggerState {
    pending: bool,
    rebuilding: bool,
}

/// Shared between the window callbacks, the frame manager and the renderer.
#[derive(Debug, Default)]
pub struct RebuildTrigger {
    state: Mutex<TriggerState>,
}

impl RebuildTrigger {
    /// Ask for a rebuild at the next frame boundary.
    ///
    /// Returns `false` when ignored because a rebuild is already running.
    pub fn request(&self) -> bool {
        let mut state = self.state.lock();
        if state.rebuilding {
            return false;
        }
        state.pending = true;
        true
    }

    pub fn is_pending(&self) -> bool {
        self.state.lock().pending
    }

    pub fn is_rebuilding(&self) -> bool {
        self.state.lock().rebuilding
    }

    /// Enter the rebuild section; `None` if someone is already in it.
    pub fn begin(self: &Arc<Self>) -> Option<RebuildGuard> {
        let mut state = self.state.lock();
        if state.rebuilding {
            return None;
        }
        state.rebuilding = true;
        state.pending = false;
        Some(RebuildGuard {
            trigger: Arc::clone(self),
        })
    }
}

/// Clears the rebuilding flag on drop, including on error paths.
pub struct RebuildGuard {
    trigger: Arc<RebuildTrigger>,
}

impl Drop for RebuildGuard {
    fn drop(&mut self) {
        self.trigger.state.lock().rebuilding = false;
    }
}

/// Everything minted for one swapchain generation.
struct SurfaceResources<G: Gpu> {
    // Field order is destruction order
    pipelines: PipelineManager<G>,
    _render_passes: RenderPassCache<G>,
    framebuffers: Framebuffers<G>,
    swapchain: Swapchain<G>,
    commands: CommandPool<G>,
    render_pass: vk::RenderPass,
}

impl<G: Gpu> SurfaceResources<G> {
    fn create(
        gpu: &Arc<G>,
        settings: &RendererSettings,
        slot_count: usize,
        width: u32,
        height: u32,
    ) -> Result<Self> {
        let commands = CommandPool::new(gpu.clone(), slot_count)?;

        let swapchain = Swapchain::new(
            gpu.clone(),
            &SwapchainRequest {
                desired_image_count: settings.buffer_count,
                format: SURFACE_FORMAT,
                color_space: SURFACE_COLOR_SPACE,
                width,
                height,
                vsync: settings.vsync,
            },
        )?;

        let mut render_passes = RenderPassCache::new(gpu.clone(), swapchain.format());
        let render_pass = render_passes.get(RenderTarget::Screen)?;

        let framebuffers = Framebuffers::new(
            gpu.clone(),
            render_pass,
            swapchain.image_views(),
            swapchain.extent(),
        )?;

        let mut pipelines = PipelineManager::new(
            gpu.clone(),
            PipelineTarget {
                render_pass,
                extent: swapchain.extent(),
                debug: settings.debug,
            },
        )?;
        pipelines.preload(&ShaderProgram::BUILT_IN)?;

        Ok(Self {
            pipelines,
            _render_passes: render_passes,
            framebuffers,
            swapchain,
            commands,
            render_pass,
        })
    }

    fn targets(&self, clear_color: [f32; 4]) -> FrameTargets<'_, G> {
        FrameTargets {
            swapchain: &self.swapchain,
            commands: &self.commands,
            framebuffers: &self.framebuffers,
            render_pass: self.render_pass,
            clear_color,
        }
    }
}

/// Handed to draw callbacks while a frame is recording.
pub struct FrameContext<'a, G: Gpu> {
    pub image_index: u32,
    pub command_buffer: vk::CommandBuffer,
    pub extent: vk::Extent2D,
    pipelines: &'a mut PipelineManager<G>,
}

impl<G: Gpu> FrameContext<'_, G> {
    pub fn pipeline(&mut self, program: ShaderProgram) -> Result<vk::Pipeline> {
        self.pipelines.pipeline(program)
    }

    pub fn pipeline_layout(&self) -> vk::PipelineLayout {
        self.pipelines.layout()
    }
}

pub struct Renderer<G: Gpu, W: WindowSystem> {
    // Field order is drop order: per-generation objects go before the
    // slot sync objects, and the device handle goes last.
    surface: Option<SurfaceResources<G>>,
    frames: FrameManager<G>,
    trigger: Arc<RebuildTrigger>,
    window: Arc<W>,
    settings: RendererSettings,
    gpu: Arc<G>,
}

impl<G: Gpu, W: WindowSystem> Renderer<G, W> {
    pub fn new(gpu: Arc<G>, window: Arc<W>, settings: RendererSettings) -> Result<Self> {
        let support = gpu
            .surface_support()
            .map_err(RenderError::creation("surface capability query"))?;
        let slot_count = clamp_image_count(&support.capabilities, settings.buffer_count) as usize;

        let trigger = Arc::new(RebuildTrigger::default());

        let on_invalidated = {
            let trigger = trigger.clone();
            Box::new(move || {
                trigger.request();
            })
        };
        let frames = FrameManager::new(
            gpu.clone(),
            slot_count,
            settings.frame_timeout,
            on_invalidated,
        )?;

        {
            let trigger = trigger.clone();
            window.on_window_resized(Box::new(move |width: u32, height: u32| {
                if !trigger.request() {
                    log::debug!("Resize to {}x{} during rebuild ignored", width, height);
                }
            }));
        }

        let mut renderer = Self {
            surface: None,
            frames,
            trigger,
            window,
            settings,
            gpu,
        };

        // Startup failures keep their own error kind (e.g. unsupported format)
        renderer.configure_surface()?;

        log::info!("Renderer ready with {} frames in flight", slot_count);
        Ok(renderer)
    }

    /// Tear down and recreate every surface-dependent object.
    ///
    /// Returns [`RebuildOutcome::Skipped`] when called while a rebuild is
    /// already running. Called mid-frame, it leaves the trigger pending so
    /// the rebuild happens at the next `frame_begin`.
    pub fn rebuild(&mut self) -> Result<RebuildOutcome> {
        if self.frames.state() == FrameState::Recording {
            log::debug!("Rebuild requested while recording, deferring to the next frame");
            self.trigger.request();
            return Ok(RebuildOutcome::Skipped);
        }

        let Some(_guard) = self.trigger.begin() else {
            log::debug!("Rebuild already in progress, ignoring");
            return Ok(RebuildOutcome::Skipped);
        };

        log::info!("Rebuilding swapchain");

        self.gpu
            .wait_idle()
            .map_err(|result| RenderError::DeviceHang {
                what: "device idle",
                timeout: self.settings.frame_timeout,
                result,
            })?;

        // pipelines -> render passes -> framebuffers -> swapchain -> command pool
        self.surface = None;

        let outcome = self
            .configure_surface()
            .map_err(|e| RenderError::SurfaceReconfigurationFailed(Box::new(e)))?;

        log::info!("Swapchain rebuild finished: {:?}", outcome);
        Ok(outcome)
    }

    fn configure_surface(&mut self) -> Result<RebuildOutcome> {
        let (width, height) = self.window.framebuffer_size();
        if width == 0 || height == 0 {
            log::info!("Window minimized, waiting for resize");
            self.frames.reset_image_tracking(0);
            return Ok(RebuildOutcome::Minimized);
        }

        let resources = SurfaceResources::create(
            &self.gpu,
            &self.settings,
            self.frames.slot_count(),
            width,
            height,
        )?;

        self.frames
            .reset_image_tracking(resources.swapchain.image_count());
        self.surface = Some(resources);
        Ok(RebuildOutcome::Rebuilt)
    }

    /// Start a frame, rebuilding first if the surface was invalidated.
    pub fn frame_begin(&mut self) -> Result<()> {
        if self.trigger.is_pending() {
            self.rebuild()?;
        }

        match &self.surface {
            Some(surface) => {
                let targets = surface.targets(self.settings.clear_color);
                self.frames.frame_begin(&targets)
            }
            None => {
                self.frames.frame_skip();
                Ok(())
            }
        }
    }

    /// Record `draw` into the current frame; skipped when unavailable.
    pub fn frame_apply_commands<F>(&mut self, draw: F) -> Result<()>
    where
        F: FnOnce(&mut FrameContext<'_, G>) -> Result<()>,
    {
        let Some(surface) = self.surface.as_mut() else {
            return Ok(());
        };
        let extent = surface.swapchain.extent();
        let pipelines = &mut surface.pipelines;

        let mut result = Ok(());
        self.frames
            .frame_apply_commands(|image_index, command_buffer| {
                let mut context = FrameContext {
                    image_index,
                    command_buffer,
                    extent,
                    pipelines,
                };
                result = draw(&mut context);
            });
        result
    }

    pub fn frame_end(&mut self) -> Result<FrameStatus> {
        let clear_color = self.settings.clear_color;
        let targets = self.surface.as_ref().map(|s| s.targets(clear_color));
        self.frames.frame_end(targets.as_ref())
    }

    /// Cached pipeline for `program`; `None` while minimized.
    pub fn pipeline(&mut self, program: ShaderProgram) -> Result<Option<vk::Pipeline>> {
        self.surface
            .as_mut()
            .map(|surface| surface.pipelines.pipeline(program))
            .transpose()
    }

    #[inline]
    pub fn is_minimized(&self) -> bool {
        self.surface.is_none()
    }

    #[inline]
    pub fn trigger(&self) -> &Arc<RebuildTrigger> {
        &self.trigger
    }

    #[inline]
    pub fn frame_id(&self) -> usize {
        self.frames.frame_id()
    }

    #[inline]
    pub fn frame_state(&self) -> FrameState {
        self.frames.state()
    }

    #[inline]
    pub fn slot_count(&self) -> usize {
        self.frames.slot_count()
    }

    pub fn extent(&self) -> Option<vk::Extent2D> {
        self.surface.as_ref().map(|s| s.swapchain.extent())
    }

    pub fn present_mode(&self) -> Option<vk::PresentModeKHR> {
        self.surface.as_ref().map(|s| s.swapchain.present_mode())
    }
}

impl<G: Gpu, W: WindowSystem> Drop for Renderer<G, W> {
    fn drop(&mut self) {
        log::info!("Shutting down renderer...");
        if let Err(e) = self.gpu.wait_idle() {
            log::warn!("Device wait idle failed during shutdown: {}", e);
        }
    }
}
