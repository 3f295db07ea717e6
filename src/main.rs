// =============================================================================
// VK2D - Vulkan 2D renderer demo
// =============================================================================
//
// Opens a window, brings up the Vulkan device and drives the renderer's
// frame lifecycle on every redraw.
//
// FRAME FLOW:
// 1. frame_begin       - wait for the slot, acquire an image, begin the pass
// 2. frame_apply_commands - caller records draws
// 3. frame_end         - submit, present, advance the slot
//
// Resizes reach the renderer through the window adapter; it rebuilds the
// swapchain at the next frame_begin.
//
// =============================================================================

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;
use std::time::Instant;
use vk2d::backend::{FrameStatus, ShaderProgram, VulkanDevice};
use vk2d::config::Config;
use vk2d::window::WinitWindow;
use vk2d::{RenderError, Renderer};
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    window::{Fullscreen, WindowAttributes},
};

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> Result<()> {
    // Load configuration from config.toml
    let config = Config::load();

    // Initialize logging
    env_logger::Builder::from_default_env()
        .filter_level(config.log_level())
        .init();

    log::info!("Starting vk2d");
    log::info!(
        "Window: {}x{} ({})",
        config.window.width,
        config.window.height,
        if config.window.fullscreen { "fullscreen" } else { "windowed" }
    );
    log::info!("VSync: {}", config.graphics.vsync);

    let event_loop = EventLoop::new()?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;
    Ok(())
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

/// IMPORTANT: Field order matters for Drop! The renderer releases its GPU
/// objects before the last reference to the device goes away.
struct App {
    config: Config,

    renderer: Option<Renderer<VulkanDevice, WinitWindow>>,
    device: Option<Arc<VulkanDevice>>,
    window: Option<Arc<WinitWindow>>,
    is_fullscreen: bool,

    // FPS tracking
    frame_count: u32,
    last_frame_time: Instant,
    last_fps_update: Instant,
}

impl App {
    fn new(config: Config) -> Self {
        let now = Instant::now();
        let is_fullscreen = config.window.fullscreen;
        Self {
            config,
            renderer: None,
            device: None,
            window: None,
            is_fullscreen,
            frame_count: 0,
            last_frame_time: now,
            last_fps_update: now,
        }
    }

    fn init_vulkan(&mut self, window: Arc<WinitWindow>) -> Result<()> {
        let device = VulkanDevice::new(
            &self.config.window.title,
            window.as_ref(),
            self.config.debug.validation_layers,
        )?;

        let renderer = Renderer::new(
            device.clone(),
            window.clone(),
            self.config.renderer_settings(),
        )
        .context("Failed to create renderer")?;

        self.renderer = Some(renderer);
        self.device = Some(device);
        self.window = Some(window);
        Ok(())
    }

    // =========================================================================
    // RENDERING
    // =========================================================================

    fn render_frame(&mut self) -> vk2d::Result<FrameStatus> {
        let (Some(renderer), Some(device)) = (self.renderer.as_mut(), self.device.as_ref()) else {
            return Ok(FrameStatus::Skipped);
        };

        renderer.frame_begin()?;
        renderer.frame_apply_commands(|frame| {
            let pipeline = frame.pipeline(ShaderProgram::Rect)?;
            unsafe {
                device.device().cmd_bind_pipeline(
                    frame.command_buffer,
                    vk::PipelineBindPoint::GRAPHICS,
                    pipeline,
                );
            }
            Ok(())
        })?;
        renderer.frame_end()
    }

    /// Fatal kinds stop the process; anything else costs one frame.
    fn handle_render_error(&self, error: RenderError) {
        if error.is_fatal() {
            log::error!("Fatal render error: {}", error);
            std::process::abort();
        }
        log::warn!("Frame dropped: {}", error);
    }

    // =========================================================================
    // FULLSCREEN TOGGLE
    // =========================================================================

    fn toggle_fullscreen(&mut self) {
        if let Some(ref window) = self.window {
            self.is_fullscreen = !self.is_fullscreen;

            if self.is_fullscreen {
                // Enter fullscreen (use current monitor)
                window
                    .window()
                    .set_fullscreen(Some(Fullscreen::Borderless(None)));
                log::info!("Entered fullscreen mode");
            } else {
                window.window().set_fullscreen(None);
                log::info!("Exited fullscreen mode");
            }
        }
    }

    // =========================================================================
    // FPS TRACKING
    // =========================================================================

    fn update_fps(&mut self) {
        if !self.config.debug.show_fps {
            return;
        }

        let now = Instant::now();
        let frame_time = now.duration_since(self.last_frame_time).as_secs_f32();
        self.last_frame_time = now;
        self.frame_count += 1;

        // Update title every second
        let elapsed = now.duration_since(self.last_fps_update).as_secs_f32();
        if elapsed >= 1.0 {
            let fps = self.frame_count as f32 / elapsed;

            if let Some(ref window) = self.window {
                let mode = if self.is_fullscreen { "fullscreen" } else { "windowed" };
                window.window().set_title(&format!(
                    "{} - {:.0} FPS ({:.2}ms) [{}]",
                    self.config.window.title,
                    fps,
                    frame_time * 1000.0,
                    mode
                ));
            }

            self.frame_count = 0;
            self.last_fps_update = now;
        }
    }
}

// =============================================================================
// EVENT HANDLING
// =============================================================================

impl ApplicationHandler for App {
    /// Called when the application is ready to create windows.
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        // Create window with settings from config
        let mut window_attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ));

        if self.config.window.fullscreen {
            window_attributes =
                window_attributes.with_fullscreen(Some(Fullscreen::Borderless(None)));
        }

        let window = match event_loop.create_window(window_attributes) {
            Ok(w) => Arc::new(WinitWindow::new(Arc::new(w))),
            Err(e) => {
                log::error!("Failed to create window: {:?}", e);
                event_loop.exit();
                return;
            }
        };

        if let Err(e) = self.init_vulkan(window) {
            log::error!("Failed to initialize Vulkan: {:?}", e);
            event_loop.exit();
        }
    }

    /// Handle window events.
    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                event_loop.exit();
            }

            WindowEvent::Resized(size) => {
                if let Some(ref window) = self.window {
                    window.notify_resized(size.width, size.height);
                    // Wakes the loop so a restore from minimized gets its rebuild
                    window.window().request_redraw();
                }
            }

            WindowEvent::RedrawRequested => match self.render_frame() {
                Ok(FrameStatus::Presented) => self.update_fps(),
                Ok(_) => {}
                Err(e) => self.handle_render_error(e),
            },

            WindowEvent::KeyboardInput { event, .. } => {
                use winit::keyboard::{KeyCode, PhysicalKey};

                if event.state.is_pressed() {
                    if let PhysicalKey::Code(key) = event.physical_key {
                        match key {
                            // ESC - Quit application
                            KeyCode::Escape => {
                                log::info!("ESC pressed, exiting...");
                                event_loop.exit();
                            }
                            // F11 - Toggle fullscreen
                            KeyCode::F11 => {
                                self.toggle_fullscreen();
                            }
                            _ => {}
                        }
                    }
                }
            }

            _ => {}
        }
    }

    /// Request continuous redraws for maximum FPS; sleep until the next
    /// event while minimized.
    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        let minimized = self.renderer.as_ref().map_or(true, |r| r.is_minimized());
        if minimized {
            event_loop.set_control_flow(ControlFlow::Wait);
            return;
        }
        event_loop.set_control_flow(ControlFlow::Poll);
        if let Some(ref window) = self.window {
            window.window().request_redraw();
        }
    }
}

// =============================================================================
// CLEANUP
// =============================================================================

impl Drop for App {
    fn drop(&mut self) {
        log::info!("Cleaning up Vulkan resources...");

        // Renderer waits for the GPU, then frees surface objects and sync primitives
        self.renderer = None;
        // Device, surface and instance go with the last Arc
        self.device = None;

        log::info!("Cleanup complete");
    }
}
