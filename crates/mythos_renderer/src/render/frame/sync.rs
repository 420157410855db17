//! Per-slot synchronization objects

use ash::vk;

use crate::render::backend::GpuDevice;
use crate::render::error::{RenderError, RenderResult};

/// Semaphores and fence owned by one frame-in-flight slot
///
/// The fence is created signaled so the first wait on a fresh slot returns
/// immediately.
pub struct FrameSync<D: GpuDevice> {
    device: D,
    /// Signaled when the acquired swapchain image is ready to be written
    pub image_available: vk::Semaphore,
    /// Signaled when rendering finishes; presentation waits on it
    pub render_finished: vk::Semaphore,
    /// Signaled when the slot's submission completes on the GPU
    pub in_flight: vk::Fence,
}

impl<D: GpuDevice> FrameSync<D> {
    /// Create both semaphores and the signaled fence
    pub fn new(device: &D) -> RenderResult<Self> {
        let mut sync = Self {
            device: device.clone(),
            image_available: vk::Semaphore::null(),
            render_finished: vk::Semaphore::null(),
            in_flight: vk::Fence::null(),
        };
        sync.image_available = device.create_semaphore().map_err(RenderError::SyncObjectCreation)?;
        sync.render_finished = device.create_semaphore().map_err(RenderError::SyncObjectCreation)?;
        sync.in_flight = device.create_fence(true).map_err(RenderError::SyncObjectCreation)?;
        Ok(sync)
    }
}

impl<D: GpuDevice> Drop for FrameSync<D> {
    fn drop(&mut self) {
        if self.in_flight != vk::Fence::null() {
            self.device.destroy_fence(self.in_flight);
        }
        for semaphore in [self.render_finished, self.image_available] {
            if semaphore != vk::Semaphore::null() {
                self.device.destroy_semaphore(semaphore);
            }
        }
    }
}
