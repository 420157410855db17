//! Frame scheduling
//!
//! One frame walks `Idle → WaitFence → Acquire → Record → Submit → Present →
//! Idle` on slot `frame_counter % frames_in_flight`. The CPU only touches a
//! slot's command buffer, uniform buffer and fence after waiting on that
//! fence, so a slot is never rewritten while the GPU may still read it.
//!
//! A stale swapchain is rebuilt locally: on acquire the frame is abandoned
//! without advancing the counter, on present the rebuild happens after the
//! image is queued.

use std::time::Instant;

use ash::vk;

use crate::config::RendererConfig;
use crate::foundation::logging::Logger;
use crate::render::backend::{GpuDevice, GpuEntry, SubmitDesc};
use crate::render::device_context::DeviceContext;
use crate::render::error::{RenderError, RenderResult};
use crate::render::frame::commands::CommandRecorder;
use crate::render::frame::FrameResources;
use crate::render::pipeline::PipelineResources;
use crate::render::swapchain::SwapchainManager;
use crate::render::vertex::UniformBufferObject;

/// Phase of the frame currently being processed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    /// Between frames
    Idle,
    /// Waiting for the slot's previous submission
    WaitFence,
    /// Acquiring a swapchain image
    Acquire,
    /// Recording the command buffer and writing uniforms
    Record,
    /// Submitting to the graphics queue
    Submit,
    /// Queueing the image for presentation
    Present,
}

/// What happened to a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// The frame was submitted and presented
    Presented {
        /// Frame-in-flight slot used
        slot: usize,
        /// Swapchain image rendered into
        image_index: u32,
        /// Whether presentation was rebuilt after presenting
        recreated: bool,
    },
    /// Acquire reported a stale swapchain; it was rebuilt and nothing was drawn
    Recreated,
    /// The window has no drawable area
    Skipped,
}

/// Borrowed tiers a frame operates on
pub struct FrameTargets<'a, E: GpuEntry> {
    /// Device tier
    pub context: &'a DeviceContext<E>,
    /// Swapchain tier
    pub swapchain: &'a mut SwapchainManager<E::Device>,
    /// Pipeline tier
    pub pipeline: &'a mut PipelineResources<E::Device>,
    /// Frame tier
    pub frames: &'a mut FrameResources<E::Device>,
}

/// Drives the acquire-record-submit-present cycle
pub struct FrameScheduler {
    log: Logger,
    frames_in_flight: usize,
    frame_counter: u64,
    resize_requested: bool,
    recreations: u64,
    fence_timeout_ns: u64,
    clear_color: [f32; 4],
    start: Instant,
    trace: Vec<FrameState>,
}

impl FrameScheduler {
    /// Scheduler for `config.frames_in_flight` slots
    pub fn new(config: &RendererConfig, log: Logger) -> Self {
        Self {
            log,
            frames_in_flight: config.frames_in_flight.max(1),
            frame_counter: 0,
            resize_requested: false,
            recreations: 0,
            fence_timeout_ns: config.fence_timeout_ns(),
            clear_color: config.clear_color,
            start: Instant::now(),
            trace: vec![FrameState::Idle],
        }
    }

    /// Slot the next frame will use
    pub fn current_slot(&self) -> usize {
        (self.frame_counter % self.frames_in_flight as u64) as usize
    }

    /// Frames presented so far
    pub fn frame_counter(&self) -> u64 {
        self.frame_counter
    }

    /// Presentation rebuilds so far
    pub fn recreations(&self) -> u64 {
        self.recreations
    }

    /// States visited by the most recent frame
    pub fn last_trace(&self) -> &[FrameState] {
        &self.trace
    }

    /// Current state
    pub fn state(&self) -> FrameState {
        self.trace.last().copied().unwrap_or(FrameState::Idle)
    }

    /// Rebuild presentation after the next presented frame
    pub fn request_resize(&mut self) {
        self.resize_requested = true;
    }

    /// Whether a resize is pending
    pub fn resize_requested(&self) -> bool {
        self.resize_requested
    }

    fn enter(&mut self, state: FrameState) {
        self.trace.push(state);
    }

    /// Run one frame against `targets` for a window of `window_size`
    pub fn draw_frame<E: GpuEntry>(
        &mut self,
        targets: &mut FrameTargets<'_, E>,
        window_size: (u32, u32),
    ) -> RenderResult<FrameOutcome> {
        self.trace.clear();
        self.enter(FrameState::Idle);
        if window_size.0 == 0 || window_size.1 == 0 {
            return Ok(FrameOutcome::Skipped);
        }

        let context = targets.context;
        let device = context.device();
        let slot = self.current_slot();
        let sync = targets.frames.sync(slot).ok_or_else(|| targets.frames.slot_error(slot))?;
        let (image_available, render_finished, in_flight) = (sync.image_available, sync.render_finished, sync.in_flight);

        self.enter(FrameState::WaitFence);
        self.wait_for_slot(device, in_flight, slot)?;

        self.enter(FrameState::Acquire);
        let image_index = match device.acquire_next_image(targets.swapchain.handle(), u64::MAX, image_available) {
            Ok((index, suboptimal)) => {
                if suboptimal {
                    self.log.debug("Swapchain suboptimal on acquire; presenting anyway");
                }
                index
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                self.log.warn("Swapchain out of date on acquire");
                self.recreate_presentation(targets, window_size)?;
                self.enter(FrameState::Idle);
                return Ok(FrameOutcome::Recreated);
            }
            Err(e) => {
                self.log.error(format!("Failed to acquire swapchain image: {e:?}"));
                return Err(RenderError::SwapchainAcquire(e));
            }
        };
        let framebuffer = targets
            .frames
            .framebuffer(image_index)
            .ok_or(RenderError::SwapchainAcquire(vk::Result::ERROR_UNKNOWN))?;

        self.enter(FrameState::Record);
        device.reset_fence(in_flight).map_err(RenderError::FenceWait)?;
        let command_buffer = targets
            .frames
            .command_buffer(slot)
            .ok_or_else(|| targets.frames.slot_error(slot))?;
        device
            .reset_command_buffer(command_buffer)
            .map_err(RenderError::CommandRecording)?;
        self.record(device, command_buffer, framebuffer, targets, slot)?;
        let ubo = UniformBufferObject::spinning(self.start.elapsed().as_secs_f32(), targets.swapchain.extent());
        targets.frames.write_uniforms(slot, &ubo)?;

        self.enter(FrameState::Submit);
        let submit = SubmitDesc {
            command_buffer,
            wait: Some((image_available, vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)),
            signal: Some(render_finished),
            fence: in_flight,
        };
        device.queue_submit(context.graphics_queue(), &submit).map_err(|e| {
            self.log.error(format!("Queue submission failed: {e:?}"));
            RenderError::Submit(e)
        })?;

        self.enter(FrameState::Present);
        let stale = match device.queue_present(
            context.present_queue(),
            targets.swapchain.handle(),
            image_index,
            render_finished,
        ) {
            Ok(suboptimal) => suboptimal,
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => true,
            Err(e) => {
                self.log.error(format!("Presentation failed: {e:?}"));
                return Err(RenderError::Present(e));
            }
        };
        self.frame_counter += 1;

        let recreated = stale || self.resize_requested;
        if recreated {
            self.recreate_presentation(targets, window_size)?;
        }
        self.enter(FrameState::Idle);
        Ok(FrameOutcome::Presented {
            slot,
            image_index,
            recreated,
        })
    }

    fn wait_for_slot<D: GpuDevice>(&self, device: &D, fence: vk::Fence, slot: usize) -> RenderResult<()> {
        device.wait_for_fence(fence, self.fence_timeout_ns).map_err(|result| {
            if result == vk::Result::TIMEOUT {
                self.log.error(format!(
                    "Frame slot {slot} fence not signaled within {} ms; the GPU may be hung",
                    self.fence_timeout_ns / 1_000_000
                ));
            } else {
                self.log.error(format!("Waiting on frame slot {slot} fence failed: {result:?}"));
            }
            RenderError::FenceWait(result)
        })
    }

    fn record<E: GpuEntry>(
        &self,
        device: &E::Device,
        command_buffer: vk::CommandBuffer,
        framebuffer: vk::Framebuffer,
        targets: &FrameTargets<'_, E>,
        slot: usize,
    ) -> RenderResult<()> {
        let extent = targets.swapchain.extent();
        let pipeline = &*targets.pipeline;
        let frames = &*targets.frames;
        let descriptor_set = frames.descriptor_set(slot).ok_or_else(|| frames.slot_error(slot))?;

        let mut clear_values = vec![vk::ClearValue {
            color: vk::ClearColorValue {
                float32: self.clear_color,
            },
        }];
        if pipeline.depth_format().is_some() {
            clear_values.push(vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue { depth: 1.0, stencil: 0 },
            });
        }

        let mut recorder = CommandRecorder::begin(device, command_buffer)?;
        {
            let mut pass = recorder.begin_render_pass(pipeline.render_pass(), framebuffer, extent, &clear_values);
            pass.set_viewport_and_scissor(extent);
            pass.bind_pipeline(pipeline.pipeline());
            let (vertex_buffer, index_buffer) = frames.geometry();
            pass.bind_geometry(vertex_buffer, index_buffer);
            pass.bind_descriptor_set(pipeline.pipeline_layout(), descriptor_set);
            pass.draw_indexed(frames.index_count());
        }
        recorder.finish()?;
        Ok(())
    }

    /// Rebuild everything that depends on the swapchain
    ///
    /// Waits for the device, releases framebuffers and depth, rebuilds the
    /// swapchain, rebuilds the pipeline tier only if the surface format
    /// changed, then recreates framebuffers and depth.
    pub fn recreate_presentation<E: GpuEntry>(
        &mut self,
        targets: &mut FrameTargets<'_, E>,
        window_size: (u32, u32),
    ) -> RenderResult<()> {
        let context = targets.context;
        context.wait_idle()?;
        targets.frames.destroy_size_dependent();
        targets.swapchain.recreate(context, window_size)?;

        let color_format = targets.swapchain.format().format;
        if targets.pipeline.needs_rebuild(color_format) {
            let depth_format = targets.pipeline.depth_format();
            targets.pipeline.rebuild_for_format(color_format, depth_format)?;
        }
        targets.frames.create_size_dependent(&*targets.swapchain, &*targets.pipeline)?;

        self.resize_requested = false;
        self.recreations += 1;
        let extent = targets.swapchain.extent();
        self.log.info(format!(
            "Presentation rebuilt at {}x{} ({} images)",
            extent.width,
            extent.height,
            targets.swapchain.image_count()
        ));
        Ok(())
    }
}
