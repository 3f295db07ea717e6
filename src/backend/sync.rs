// Synchronization primitives
//
// One semaphore pair and one fence per in-flight slot. Created once at
// startup, untouched by swapchain rebuilds, destroyed only at shutdown.

use ash::vk;
use std::sync::Arc;

use super::gpu::Gpu;
use crate::error::{RenderError, Result};

/// Frame synchronization - one per frame in flight
#[derive(Debug, Clone, Copy)]
pub struct FrameSync {
    /// Signaled by image acquisition, waited on by the submit.
    pub render_available: vk::Semaphore,
    /// Signaled by the submit, waited on by present.
    pub present_available: vk::Semaphore,
    /// Signaled when the slot's command buffer retires.
    pub frame_busy: vk::Fence,
}

/// The per-slot sync objects for every in-flight frame.
pub struct SyncPrimitives<G: Gpu> {
    gpu: Arc<G>,
    slots: Box<[FrameSync]>,
}

impl<G: Gpu> SyncPrimitives<G> {
    pub fn new(gpu: Arc<G>, slot_count: usize) -> Result<Self> {
        let mut slots = Vec::with_capacity(slot_count);

        for _ in 0..slot_count {
            match Self::create_slot(&gpu) {
                Ok(slot) => slots.push(slot),
                Err(e) => {
                    for slot in slots.iter().rev() {
                        Self::destroy_slot(&gpu, slot);
                    }
                    return Err(e);
                }
            }
        }

        log::debug!("Created sync primitives for {} frames in flight", slot_count);

        Ok(Self {
            gpu,
            slots: slots.into_boxed_slice(),
        })
    }

    fn create_slot(gpu: &G) -> Result<FrameSync> {
        let render_available = gpu
            .create_semaphore()
            .map_err(RenderError::creation("render-available semaphore"))?;

        let present_available = match gpu.create_semaphore() {
            Ok(semaphore) => semaphore,
            Err(result) => {
                gpu.destroy_semaphore(render_available);
                return Err(RenderError::creation("present-available semaphore")(result));
            }
        };

        // Start signaled so the first wait doesn't block forever
        let frame_busy = match gpu.create_fence(true) {
            Ok(fence) => fence,
            Err(result) => {
                gpu.destroy_semaphore(present_available);
                gpu.destroy_semaphore(render_available);
                return Err(RenderError::creation("frame-busy fence")(result));
            }
        };

        Ok(FrameSync {
            render_available,
            present_available,
            frame_busy,
        })
    }

    fn destroy_slot(gpu: &G, slot: &FrameSync) {
        gpu.destroy_fence(slot.frame_busy);
        gpu.destroy_semaphore(slot.present_available);
        gpu.destroy_semaphore(slot.render_available);
    }

    #[inline]
    pub fn slot(&self, index: usize) -> &FrameSync {
        &self.slots[index]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl<G: Gpu> Drop for SyncPrimitives<G> {
    /// Caller contract: the device is idle.
    fn drop(&mut self) {
        for slot in self.slots.iter().rev() {
            Self::destroy_slot(&self.gpu, slot);
        }
        log::info!("Freed sync primitives");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::testing::{FakeGpu, Kind};

    #[test]
    fn test_one_set_per_slot() {
        let gpu = Arc::new(FakeGpu::new());
        let sync = SyncPrimitives::new(gpu.clone(), 3).unwrap();

        assert_eq!(sync.len(), 3);
        assert_eq!(gpu.live(Kind::Semaphore), 6);
        assert_eq!(gpu.live(Kind::Fence), 3);
        assert_ne!(sync.slot(0).frame_busy, sync.slot(1).frame_busy);
    }

    #[test]
    fn test_fences_start_signaled() {
        let gpu = Arc::new(FakeGpu::new());
        let sync = SyncPrimitives::new(gpu.clone(), 2).unwrap();

        for i in 0..sync.len() {
            assert!(gpu.fence_signaled(sync.slot(i).frame_busy));
        }
    }

    #[test]
    fn test_drop_frees_everything() {
        let gpu = Arc::new(FakeGpu::new());
        drop(SyncPrimitives::new(gpu.clone(), 3).unwrap());

        assert_eq!(gpu.live(Kind::Semaphore), 0);
        assert_eq!(gpu.live(Kind::Fence), 0);
    }

    #[test]
    fn test_partial_creation_is_rolled_back() {
        let gpu = Arc::new(FakeGpu::new());
        gpu.fail_fence_creation_after(1);

        let result = SyncPrimitives::new(gpu.clone(), 3);
        assert!(matches!(
            result,
            Err(RenderError::ResourceCreationFailed { what: "frame-busy fence", .. })
        ));
        assert_eq!(gpu.live(Kind::Semaphore), 0);
        assert_eq!(gpu.live(Kind::Fence), 0);
    }
}
