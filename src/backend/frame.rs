//! Frame lifecycle: acquire, record, submit, present, advance.
//!
//! The [`FrameManager`] rotates through a fixed number of in-flight slots.
//! Each slot owns a command buffer (borrowed from the current
//! [`CommandPool`]), a render-available / present-available semaphore pair
//! and a frame-busy fence.
//!
//! ```text
//! frame_begin:  wait frame-busy[slot] ─> acquire image ─> wait image-busy[image]
//!               ─> image-busy[image] = frame-busy[slot] ─> reset fence ─> begin pass
//! frame_end:    end pass ─> submit (wait render-available, signal present-available
//!               + frame-busy) ─> present (wait present-available) ─> slot += 1
//! ```
//!
//! Slot count and swapchain image count are negotiated independently, so a
//! second fence map keyed by image index guards against reusing an image
//! the GPU has not finished with.
//!
//! Not thread-safe: drive it from the render thread only.

use ash::vk;
use std::sync::Arc;
use std::time::Duration;

use super::command::CommandPool;
use super::gpu::{Gpu, RenderPassBegin, Submission};
use super::render_pass::Framebuffers;
use super::swapchain::{timeout_ns, PresentStatus, Swapchain};
use super::sync::SyncPrimitives;
use crate::error::{RenderError, Result};

/// Called when acquire or present reports the surface invalidated.
pub type InvalidationCallback = Box<dyn FnMut() + Send>;

/// Where the current slot is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    Idle,
    Recording,
    /// Acquisition failed this tick; recording and submission are skipped.
    Unavailable,
}

/// How a frame ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    Presented,
    /// Nothing was recorded (unavailable frame, or present found the surface out of date).
    Skipped,
    /// Submit or present failed; the frame was dropped and the slot released.
    Abandoned,
}

/// The swapchain-generation resources a frame renders into.
pub struct FrameTargets<'a, G: Gpu> {
    pub swapchain: &'a Swapchain<G>,
    pub commands: &'a CommandPool<G>,
    pub framebuffers: &'a Framebuffers<G>,
    pub render_pass: vk::RenderPass,
    pub clear_color: [f32; 4],
}

pub struct FrameManager<G: Gpu> {
    gpu: Arc<G>,
    sync: SyncPrimitives<G>,
    timeout: Duration,
    on_invalidated: InvalidationCallback,

    state: FrameState,
    frame_id: usize,
    image_id: u32,
    command_buffer: vk::CommandBuffer,
    /// Fence of the slot that last rendered to each swapchain image.
    image_busy: Vec<vk::Fence>,
}

impl<G: Gpu> FrameManager<G> {
    pub fn new(
        gpu: Arc<G>,
        slot_count: usize,
        timeout: Duration,
        on_invalidated: InvalidationCallback,
    ) -> Result<Self> {
        let sync = SyncPrimitives::new(gpu.clone(), slot_count)?;

        log::info!("Frame manager created with {} frames in flight", slot_count);

        Ok(Self {
            gpu,
            sync,
            timeout,
            on_invalidated,
            state: FrameState::Idle,
            frame_id: 0,
            image_id: 0,
            command_buffer: vk::CommandBuffer::null(),
            image_busy: Vec::new(),
        })
    }

    /// Forget image ownership after the swapchain was rebuilt.
    ///
    /// Only valid after a device-idle wait: every fence in the old map has
    /// been retired by then.
    pub fn reset_image_tracking(&mut self, image_count: usize) {
        self.image_busy.clear();
        self.image_busy.resize(image_count, vk::Fence::null());
    }

    /// Prepare the current slot and start recording into it.
    ///
    /// On an invalidated surface the frame is marked unavailable, the
    /// invalidation callback fires and nothing is recorded.
    pub fn frame_begin(&mut self, targets: &FrameTargets<'_, G>) -> Result<()> {
        debug_assert_ne!(self.state, FrameState::Recording, "frame_begin called twice");
        self.state = FrameState::Unavailable;

        let sync = *self.sync.slot(self.frame_id);

        // The GPU may still be executing this slot's previous command buffer
        self.wait(sync.frame_busy, "frame-busy fence")?;

        let (image_id, status) = targets
            .swapchain
            .acquire_next_image(self.timeout, sync.render_available);

        match status {
            PresentStatus::Ok => {}
            PresentStatus::Suboptimal => {
                log::debug!("Swapchain suboptimal on acquire, skipping frame");
                // A suboptimal acquire still signals the semaphore; consume it
                // so the slot can acquire again after the rebuild.
                self.drain_semaphore(sync.render_available);
                (self.on_invalidated)();
                return Ok(());
            }
            PresentStatus::OutOfDate => {
                log::debug!("Swapchain out of date on acquire, skipping frame");
                (self.on_invalidated)();
                return Ok(());
            }
            PresentStatus::TimedOut => {
                return Err(RenderError::DeviceHang {
                    what: "swapchain image",
                    timeout: self.timeout,
                    result: vk::Result::TIMEOUT,
                });
            }
            PresentStatus::Error(vk::Result::ERROR_DEVICE_LOST) => {
                return Err(RenderError::DeviceHang {
                    what: "swapchain image",
                    timeout: self.timeout,
                    result: vk::Result::ERROR_DEVICE_LOST,
                });
            }
            PresentStatus::Error(e) => {
                log::warn!("Failed to acquire swapchain image: {}", e);
                return Ok(());
            }
        }

        // The image may still be in use by a different slot's submission
        let image = image_id as usize;
        if image >= self.image_busy.len() {
            self.image_busy.resize(image + 1, vk::Fence::null());
        }
        let image_busy = self.image_busy[image];
        if image_busy != vk::Fence::null() && image_busy != sync.frame_busy {
            self.wait(image_busy, "image-busy fence")?;
        }
        self.image_busy[image] = sync.frame_busy;

        self.gpu
            .reset_fence(sync.frame_busy)
            .map_err(RenderError::recording("reset frame fence"))?;

        let command_buffer = targets.commands.buffer(self.frame_id);
        self.gpu
            .begin_command_buffer(command_buffer)
            .map_err(RenderError::recording("begin command buffer"))?;

        self.gpu.cmd_begin_render_pass(
            command_buffer,
            &RenderPassBegin {
                render_pass: targets.render_pass,
                framebuffer: targets.framebuffers.get(image_id),
                extent: targets.swapchain.extent(),
                clear_color: targets.clear_color,
            },
        );

        self.image_id = image_id;
        self.command_buffer = command_buffer;
        self.state = FrameState::Recording;
        Ok(())
    }

    /// Mark this tick unavailable without touching the GPU (no surface).
    pub fn frame_skip(&mut self) {
        self.state = FrameState::Unavailable;
    }

    /// Record caller commands into the current frame; no-op when unavailable.
    pub fn frame_apply_commands<F>(&self, apply: F)
    where
        F: FnOnce(u32, vk::CommandBuffer),
    {
        if self.state != FrameState::Recording {
            return;
        }
        apply(self.image_id, self.command_buffer);
    }

    /// Finish, submit and present the current frame, then advance the slot.
    ///
    /// `targets` may be `None` only when the frame is not recording.
    pub fn frame_end(&mut self, targets: Option<&FrameTargets<'_, G>>) -> Result<FrameStatus> {
        let status = match (self.state, targets) {
            (FrameState::Recording, Some(targets)) => self.finish(targets),
            (FrameState::Recording, None) => {
                log::error!("Frame ended without render targets, dropping it");
                let sync = *self.sync.slot(self.frame_id);
                self.release_slot(sync.render_available, sync.frame_busy)
                    .map(|()| FrameStatus::Abandoned)
            }
            _ => Ok(FrameStatus::Skipped),
        };

        // Failed frames must not stall the rotation
        self.state = FrameState::Idle;
        self.command_buffer = vk::CommandBuffer::null();
        self.next_frame();
        status
    }

    fn finish(&mut self, targets: &FrameTargets<'_, G>) -> Result<FrameStatus> {
        let sync = *self.sync.slot(self.frame_id);
        let command_buffer = self.command_buffer;

        self.gpu.cmd_end_render_pass(command_buffer);
        self.gpu
            .end_command_buffer(command_buffer)
            .map_err(RenderError::recording("end command buffer"))?;

        let submission = Submission {
            command_buffer: Some(command_buffer),
            wait: sync.render_available,
            signal: Some(sync.present_available),
            fence: sync.frame_busy,
        };

        if let Err(result) = self.gpu.queue_submit(&submission) {
            let error = RenderError::SubmitOrPresentFailed {
                what: "submit",
                result,
            };
            log::error!("{}", error);
            self.release_slot(sync.render_available, sync.frame_busy)?;
            return Ok(FrameStatus::Abandoned);
        }

        match targets
            .swapchain
            .present(self.image_id, sync.present_available)
        {
            PresentStatus::Ok => Ok(FrameStatus::Presented),
            PresentStatus::Suboptimal => {
                log::debug!("Swapchain suboptimal on present");
                (self.on_invalidated)();
                Ok(FrameStatus::Presented)
            }
            PresentStatus::OutOfDate => {
                log::debug!("Swapchain out of date on present");
                (self.on_invalidated)();
                Ok(FrameStatus::Skipped)
            }
            PresentStatus::TimedOut => {
                log::warn!("Present timed out, frame dropped");
                Ok(FrameStatus::Abandoned)
            }
            PresentStatus::Error(result) => {
                let error = RenderError::SubmitOrPresentFailed {
                    what: "present",
                    result,
                };
                log::error!("{}", error);
                Ok(FrameStatus::Abandoned)
            }
        }
    }

    fn next_frame(&mut self) {
        self.frame_id = (self.frame_id + 1) % self.sync.len();
    }

    fn wait(&self, fence: vk::Fence, what: &'static str) -> Result<()> {
        self.gpu
            .wait_for_fence(fence, timeout_ns(self.timeout))
            .map_err(|result| RenderError::DeviceHang {
                what,
                timeout: self.timeout,
                result,
            })
    }

    /// Empty submission that only waits on `semaphore`.
    fn drain_semaphore(&self, semaphore: vk::Semaphore) {
        let submission = Submission {
            command_buffer: None,
            wait: semaphore,
            signal: None,
            fence: vk::Fence::null(),
        };
        if let Err(e) = self.gpu.queue_submit(&submission) {
            log::warn!("Failed to drain acquire semaphore: {}", e);
        }
    }

    /// The real submit never reached the queue: consume the acquire
    /// semaphore and signal the slot fence so the next wait on it returns.
    fn release_slot(&self, semaphore: vk::Semaphore, fence: vk::Fence) -> Result<()> {
        let submission = Submission {
            command_buffer: None,
            wait: semaphore,
            signal: None,
            fence,
        };
        self.gpu
            .queue_submit(&submission)
            .map_err(|result| RenderError::DeviceHang {
                what: "slot release",
                timeout: self.timeout,
                result,
            })
    }

    #[inline]
    pub fn state(&self) -> FrameState {
        self.state
    }

    #[inline]
    pub fn is_available(&self) -> bool {
        self.state == FrameState::Recording
    }

    /// Current in-flight slot.
    #[inline]
    pub fn frame_id(&self) -> usize {
        self.frame_id
    }

    /// Swapchain image acquired for the current frame.
    #[inline]
    pub fn image_id(&self) -> u32 {
        self.image_id
    }

    #[inline]
    pub fn slot_count(&self) -> usize {
        self.sync.len()
    }
}
