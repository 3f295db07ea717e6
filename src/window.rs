// Windowing collaborator
//
// The renderer only needs three things from the window system: a surface,
// the drawable size, and a notification when that size changes. Anything
// implementing these traits can host it; `WinitWindow` is the winit one.

use ash::prelude::VkResult;
use ash::vk;
use parking_lot::Mutex;
use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle};
use std::ffi::c_char;
use std::sync::Arc;

/// Invoked with the new drawable size in pixels.
pub type ResizeCallback = Box<dyn Fn(u32, u32) + Send + Sync>;

pub trait WindowSystem {
    /// Current drawable size in pixels; `(0, 0)` while minimized.
    fn framebuffer_size(&self) -> (u32, u32);

    /// Register `callback` for every future resize.
    fn on_window_resized(&self, callback: ResizeCallback);
}

pub trait SurfaceProvider {
    /// Instance extensions needed to create a surface for this window.
    fn required_extensions(&self) -> VkResult<Vec<*const c_char>>;

    /// # Safety
    /// `instance` must have been created from `entry` with
    /// [`required_extensions`](Self::required_extensions) enabled, and must
    /// outlive the returned surface.
    unsafe fn create_surface(
        &self,
        entry: &ash::Entry,
        instance: &ash::Instance,
    ) -> VkResult<vk::SurfaceKHR>;
}

/// A winit window plus the resize listeners registered against it.
pub struct WinitWindow {
    window: Arc<winit::window::Window>,
    callbacks: Mutex<Vec<ResizeCallback>>,
}

impl WinitWindow {
    pub fn new(window: Arc<winit::window::Window>) -> Self {
        Self {
            window,
            callbacks: Mutex::new(Vec::new()),
        }
    }

    #[inline]
    pub fn window(&self) -> &winit::window::Window {
        &self.window
    }

    /// Forward a `WindowEvent::Resized` to every listener.
    pub fn notify_resized(&self, width: u32, height: u32) {
        log::debug!("Window resized to {}x{}", width, height);
        for callback in self.callbacks.lock().iter() {
            callback(width, height);
        }
    }
}

impl WindowSystem for WinitWindow {
    fn framebuffer_size(&self) -> (u32, u32) {
        let size = self.window.inner_size();
        (size.width, size.height)
    }

    fn on_window_resized(&self, callback: ResizeCallback) {
        self.callbacks.lock().push(callback);
    }
}

impl SurfaceProvider for WinitWindow {
    fn required_extensions(&self) -> VkResult<Vec<*const c_char>> {
        let extensions =
            ash_window::enumerate_required_extensions(self.window.raw_display_handle())?;
        Ok(extensions.to_vec())
    }

    unsafe fn create_surface(
        &self,
        entry: &ash::Entry,
        instance: &ash::Instance,
    ) -> VkResult<vk::SurfaceKHR> {
        ash_window::create_surface(
            entry,
            instance,
            self.window.raw_display_handle(),
            self.window.raw_window_handle(),
            None,
        )
    }
}
