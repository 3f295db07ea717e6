// Command pool with one primary command buffer per in-flight slot

use ash::vk;
use std::sync::Arc;

use super::gpu::Gpu;
use crate::error::{RenderError, Result};

pub struct CommandPool<G: Gpu> {
    gpu: Arc<G>,
    pool: vk::CommandPool,
    buffers: Box<[vk::CommandBuffer]>,
}

impl<G: Gpu> CommandPool<G> {
    pub fn new(gpu: Arc<G>, slot_count: usize) -> Result<Self> {
        let pool = gpu
            .create_command_pool()
            .map_err(RenderError::creation("command pool"))?;

        let buffers = match gpu.allocate_command_buffers(pool, slot_count as u32) {
            Ok(buffers) => buffers,
            Err(result) => {
                gpu.destroy_command_pool(pool);
                return Err(RenderError::creation("command buffers")(result));
            }
        };

        log::debug!("Created command pool with {} buffers", buffers.len());

        Ok(Self {
            gpu,
            pool,
            buffers: buffers.into_boxed_slice(),
        })
    }

    /// Command buffer owned by in-flight slot `slot`.
    #[inline]
    pub fn buffer(&self, slot: usize) -> vk::CommandBuffer {
        self.buffers[slot]
    }

    #[inline]
    pub fn buffers_count(&self) -> usize {
        self.buffers.len()
    }
}

impl<G: Gpu> Drop for CommandPool<G> {
    fn drop(&mut self) {
        // Destroying the pool frees its buffers
        self.gpu.destroy_command_pool(self.pool);
        log::info!("Freed command pool");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::testing::{FakeGpu, Kind};

    #[test]
    fn test_one_buffer_per_slot() {
        let gpu = Arc::new(FakeGpu::new());
        let pool = CommandPool::new(gpu.clone(), 3).unwrap();

        assert_eq!(pool.buffers_count(), 3);
        assert_ne!(pool.buffer(0), pool.buffer(2));

        drop(pool);
        assert_eq!(gpu.live(Kind::CommandPool), 0);
    }
}
