//! Command buffer recording
//!
//! [`CommandRecorder`] begins a frame's command buffer and hands out an
//! [`ActiveRenderPass`] whose lifetime brackets the render pass: the pass is
//! ended when the value drops, before [`CommandRecorder::finish`] can run.

use ash::vk;

use crate::render::backend::GpuDevice;
use crate::render::error::{RenderError, RenderResult};

/// A command buffer in the recording state
pub struct CommandRecorder<'a, D: GpuDevice> {
    device: &'a D,
    buffer: vk::CommandBuffer,
}

impl<'a, D: GpuDevice> CommandRecorder<'a, D> {
    /// Begin recording into a reset command buffer
    pub fn begin(device: &'a D, buffer: vk::CommandBuffer) -> RenderResult<Self> {
        device.begin_command_buffer(buffer, false).map_err(RenderError::CommandRecording)?;
        Ok(Self { device, buffer })
    }

    /// Begin an inline render pass covering `extent`
    pub fn begin_render_pass(
        &mut self,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        clear_values: &[vk::ClearValue],
    ) -> ActiveRenderPass<'_, 'a, D> {
        self.device
            .cmd_begin_render_pass(self.buffer, render_pass, framebuffer, extent, clear_values);
        ActiveRenderPass { recorder: self }
    }

    /// End recording
    pub fn finish(self) -> RenderResult<vk::CommandBuffer> {
        self.device.end_command_buffer(self.buffer).map_err(RenderError::CommandRecording)?;
        Ok(self.buffer)
    }
}

/// Commands valid inside a render pass
pub struct ActiveRenderPass<'r, 'a, D: GpuDevice> {
    recorder: &'r mut CommandRecorder<'a, D>,
}

impl<D: GpuDevice> ActiveRenderPass<'_, '_, D> {
    fn device(&self) -> &D {
        self.recorder.device
    }

    fn buffer(&self) -> vk::CommandBuffer {
        self.recorder.buffer
    }

    /// Full-extent viewport and scissor
    pub fn set_viewport_and_scissor(&mut self, extent: vk::Extent2D) {
        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        let scissor = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        };
        self.device().cmd_set_viewport(self.buffer(), viewport);
        self.device().cmd_set_scissor(self.buffer(), scissor);
    }

    /// Bind the graphics pipeline
    pub fn bind_pipeline(&mut self, pipeline: vk::Pipeline) {
        self.device().cmd_bind_pipeline(self.buffer(), pipeline);
    }

    /// Bind vertex and `u32` index buffers
    pub fn bind_geometry(&mut self, vertex_buffer: vk::Buffer, index_buffer: vk::Buffer) {
        self.device().cmd_bind_vertex_buffer(self.buffer(), vertex_buffer);
        self.device().cmd_bind_index_buffer(self.buffer(), index_buffer);
    }

    /// Bind a descriptor set at set 0
    pub fn bind_descriptor_set(&mut self, layout: vk::PipelineLayout, set: vk::DescriptorSet) {
        self.device().cmd_bind_descriptor_set(self.buffer(), layout, set);
    }

    /// Draw `index_count` indices
    pub fn draw_indexed(&mut self, index_count: u32) {
        self.device().cmd_draw_indexed(self.buffer(), index_count);
    }
}

impl<D: GpuDevice> Drop for ActiveRenderPass<'_, '_, D> {
    fn drop(&mut self) {
        self.device().cmd_end_render_pass(self.buffer());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::backend::mock::MockSetup;
    use crate::render::test_support::mock_context;

    #[test]
    fn test_render_pass_ends_before_command_buffer() {
        let (gpu, context) = mock_context(MockSetup::default());
        let extent = vk::Extent2D { width: 64, height: 64 };
        gpu.clear_events();

        let mut recorder = CommandRecorder::begin(context.device(), vk::CommandBuffer::null()).unwrap();
        {
            let mut pass = recorder.begin_render_pass(vk::RenderPass::null(), vk::Framebuffer::null(), extent, &[]);
            pass.set_viewport_and_scissor(extent);
            pass.draw_indexed(6);
        }
        recorder.finish().unwrap();

        assert_eq!(
            gpu.events(),
            vec![
                "begin_command_buffer",
                "begin_render_pass",
                "end_render_pass",
                "end_command_buffer"
            ]
        );
        assert_eq!(gpu.draws(), vec![6]);
    }
}
