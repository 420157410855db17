//! Frame-tier resource ownership

use std::mem::size_of;

use ash::vk;

use super::memory::{
    copy_buffer, record_mipmaps, record_transition, BufferResource, ImageResource, ImageSpec, SingleTimeCommands,
    UniformBuffer,
};
use super::sync::FrameSync;
use crate::foundation::logging::Logger;
use crate::render::backend::{DescriptorResource, DescriptorWrite, FramebufferDesc, GpuDevice, GpuEntry};
use crate::render::device_context::DeviceContext;
use crate::render::error::{RenderError, RenderResult};
use crate::render::pipeline::{PipelineResources, SAMPLER_BINDING, UNIFORM_BINDING};
use crate::render::swapchain::SwapchainManager;
use crate::render::vertex::{Mesh, TextureData, UniformBufferObject};

/// Format of the sampled texture
pub const TEXTURE_FORMAT: vk::Format = vk::Format::R8G8B8A8_SRGB;

/// Command buffers, sync objects, buffers, textures, descriptors and framebuffers
///
/// Built null-initialized and filled step by step; `Drop` releases whatever
/// was created, in reverse order.
pub struct FrameResources<D: GpuDevice> {
    device: D,
    log: Logger,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    graphics_queue: vk::Queue,
    frames_in_flight: usize,

    command_pool: vk::CommandPool,
    command_buffers: Vec<vk::CommandBuffer>,
    sync: Vec<FrameSync<D>>,

    depth: Option<ImageResource<D>>,
    framebuffers: Vec<vk::Framebuffer>,

    texture: Option<ImageResource<D>>,
    sampler: vk::Sampler,
    vertex_buffer: Option<BufferResource<D>>,
    index_buffer: Option<BufferResource<D>>,
    index_count: u32,
    uniform_buffers: Vec<UniformBuffer<D>>,

    descriptor_pool: vk::DescriptorPool,
    descriptor_sets: Vec<vk::DescriptorSet>,
}

impl<D: GpuDevice> FrameResources<D> {
    /// Create every frame-tier resource for the given swapchain and pipeline
    pub fn new<E: GpuEntry<Device = D>>(
        context: &DeviceContext<E>,
        swapchain: &SwapchainManager<D>,
        pipeline: &PipelineResources<D>,
        frames_in_flight: usize,
        mesh: &Mesh,
        texture: &TextureData,
    ) -> RenderResult<Self> {
        let mut frames = Self {
            device: context.device().clone(),
            log: context.log().clone(),
            memory_properties: context.physical().memory_properties,
            graphics_queue: context.graphics_queue(),
            frames_in_flight,
            command_pool: vk::CommandPool::null(),
            command_buffers: Vec::new(),
            sync: Vec::new(),
            depth: None,
            framebuffers: Vec::new(),
            texture: None,
            sampler: vk::Sampler::null(),
            vertex_buffer: None,
            index_buffer: None,
            index_count: 0,
            uniform_buffers: Vec::new(),
            descriptor_pool: vk::DescriptorPool::null(),
            descriptor_sets: Vec::new(),
        };

        frames.create_command_pool(context.queue_families().graphics)?;
        frames.create_command_buffers()?;
        frames.create_sync_objects()?;
        frames.create_size_dependent(swapchain, pipeline)?;

        if pipeline.is_textured() {
            frames.create_texture_image(texture, &context.format_properties(TEXTURE_FORMAT))?;
            frames.create_texture_image_view()?;
            let anisotropy = context
                .physical()
                .anisotropy_enabled
                .then_some(context.physical().properties.limits.max_sampler_anisotropy);
            frames.create_texture_sampler(anisotropy, texture.mip_levels())?;
        }

        frames.create_vertex_buffer(mesh)?;
        frames.create_index_buffer(mesh)?;
        frames.create_uniform_buffers()?;
        frames.create_descriptor_pool(pipeline.is_textured())?;
        frames.create_descriptor_sets(pipeline.descriptor_set_layout())?;

        frames.log.info(format!(
            "Frame resources created: {frames_in_flight} frames in flight, {} framebuffers",
            frames.framebuffers.len()
        ));
        Ok(frames)
    }

    /// Resettable pool on the graphics family
    pub fn create_command_pool(&mut self, graphics_family: u32) -> RenderResult<()> {
        self.command_pool = self
            .device
            .create_command_pool(graphics_family)
            .map_err(RenderError::CommandPoolCreation)?;
        Ok(())
    }

    /// One primary command buffer per slot
    pub fn create_command_buffers(&mut self) -> RenderResult<()> {
        let count = u32::try_from(self.frames_in_flight).unwrap_or(u32::MAX);
        self.command_buffers = self
            .device
            .allocate_command_buffers(self.command_pool, count)
            .map_err(RenderError::CommandBufferAllocation)?;
        Ok(())
    }

    /// Two semaphores and a signaled fence per slot
    pub fn create_sync_objects(&mut self) -> RenderResult<()> {
        for _ in 0..self.frames_in_flight {
            let sync = FrameSync::new(&self.device)?;
            self.sync.push(sync);
        }
        Ok(())
    }

    /// Depth image and view at the swapchain extent
    pub fn create_depth_resources(&mut self, extent: vk::Extent2D, format: vk::Format) -> RenderResult<()> {
        let mut depth = ImageResource::new(
            &self.device,
            &self.memory_properties,
            ImageSpec {
                extent,
                mip_levels: 1,
                format,
                tiling: vk::ImageTiling::OPTIMAL,
                usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
                properties: vk::MemoryPropertyFlags::DEVICE_LOCAL,
            },
        )?;
        depth.create_view(vk::ImageAspectFlags::DEPTH)?;
        self.depth = Some(depth);
        Ok(())
    }

    /// One framebuffer per swapchain view: `[color, depth]`
    pub fn create_framebuffers(
        &mut self,
        views: &[vk::ImageView],
        render_pass: vk::RenderPass,
        extent: vk::Extent2D,
    ) -> RenderResult<()> {
        let depth_view = self.depth.as_ref().map(ImageResource::view);
        for &view in views {
            let mut attachments = vec![view];
            attachments.extend(depth_view);
            let desc = FramebufferDesc {
                render_pass,
                attachments,
                extent,
            };
            let framebuffer = self
                .device
                .create_framebuffer(&desc)
                .map_err(RenderError::FramebufferCreation)?;
            self.framebuffers.push(framebuffer);
        }
        Ok(())
    }

    /// Depth resources and framebuffers for the current swapchain
    pub fn create_size_dependent(
        &mut self,
        swapchain: &SwapchainManager<D>,
        pipeline: &PipelineResources<D>,
    ) -> RenderResult<()> {
        if let Some(format) = pipeline.depth_format() {
            self.create_depth_resources(swapchain.extent(), format)?;
        }
        self.create_framebuffers(swapchain.image_views(), pipeline.render_pass(), swapchain.extent())
    }

    /// Release framebuffers and the depth buffer ahead of a swapchain rebuild
    pub fn destroy_size_dependent(&mut self) {
        for framebuffer in self.framebuffers.drain(..) {
            self.device.destroy_framebuffer(framebuffer);
        }
        self.depth = None;
    }

    /// Upload RGBA8 pixels into a mip-mapped, shader-readable image
    pub fn create_texture_image(&mut self, texture: &TextureData, format_properties: &vk::FormatProperties) -> RenderResult<()> {
        texture.validate()?;
        let mip_levels = texture.mip_levels();
        let extent = vk::Extent2D {
            width: texture.width,
            height: texture.height,
        };
        let staging = BufferResource::staging(&self.device, &self.memory_properties, &texture.pixels)?;
        let image = ImageResource::new(
            &self.device,
            &self.memory_properties,
            ImageSpec {
                extent,
                mip_levels,
                format: TEXTURE_FORMAT,
                tiling: vk::ImageTiling::OPTIMAL,
                usage: vk::ImageUsageFlags::TRANSFER_SRC
                    | vk::ImageUsageFlags::TRANSFER_DST
                    | vk::ImageUsageFlags::SAMPLED,
                properties: vk::MemoryPropertyFlags::DEVICE_LOCAL,
            },
        )?;

        let commands = SingleTimeCommands::begin(&self.device, self.command_pool, self.graphics_queue)?;
        record_transition(
            &self.device,
            commands.buffer(),
            image.image(),
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            0,
            mip_levels,
        )?;
        self.device.cmd_copy_buffer_to_image(
            commands.buffer(),
            staging.handle(),
            image.image(),
            vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            },
        );
        record_mipmaps(
            &self.device,
            commands.buffer(),
            image.image(),
            format_properties,
            extent,
            mip_levels,
        )?;
        commands.submit_and_wait()?;

        self.log.debug(format!(
            "Texture uploaded: {}x{}, {mip_levels} mip levels",
            texture.width, texture.height
        ));
        self.texture = Some(image);
        Ok(())
    }

    /// View over every mip level of the texture
    pub fn create_texture_image_view(&mut self) -> RenderResult<()> {
        let texture = self.texture.as_mut().ok_or_else(|| RenderError::UnsupportedFormat {
            reason: "texture view requested before the texture image exists".to_string(),
        })?;
        texture.create_view(vk::ImageAspectFlags::COLOR)?;
        Ok(())
    }

    /// Linear, repeating sampler; anisotropic when `max_anisotropy` is given
    pub fn create_texture_sampler(&mut self, max_anisotropy: Option<f32>, mip_levels: u32) -> RenderResult<()> {
        let info = vk::SamplerCreateInfo::builder()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .address_mode_u(vk::SamplerAddressMode::REPEAT)
            .address_mode_v(vk::SamplerAddressMode::REPEAT)
            .address_mode_w(vk::SamplerAddressMode::REPEAT)
            .anisotropy_enable(max_anisotropy.is_some())
            .max_anisotropy(max_anisotropy.unwrap_or(1.0))
            .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
            .unnormalized_coordinates(false)
            .compare_enable(false)
            .compare_op(vk::CompareOp::ALWAYS)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .min_lod(0.0)
            .max_lod(mip_levels as f32)
            .mip_lod_bias(0.0)
            .build();
        self.sampler = self.device.create_sampler(&info).map_err(RenderError::SamplerCreation)?;
        Ok(())
    }

    fn create_device_local_buffer(&self, bytes: &[u8], usage: vk::BufferUsageFlags) -> RenderResult<BufferResource<D>> {
        let staging = BufferResource::staging(&self.device, &self.memory_properties, bytes)?;
        let buffer = BufferResource::new(
            &self.device,
            &self.memory_properties,
            staging.size(),
            usage | vk::BufferUsageFlags::TRANSFER_DST,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;
        copy_buffer(
            &self.device,
            self.command_pool,
            self.graphics_queue,
            staging.handle(),
            buffer.handle(),
            staging.size(),
        )?;
        Ok(buffer)
    }

    /// Device-local vertex buffer filled through a staging copy
    pub fn create_vertex_buffer(&mut self, mesh: &Mesh) -> RenderResult<()> {
        mesh.validate()?;
        let buffer =
            self.create_device_local_buffer(bytemuck::cast_slice(&mesh.vertices), vk::BufferUsageFlags::VERTEX_BUFFER)?;
        self.vertex_buffer = Some(buffer);
        Ok(())
    }

    /// Device-local `u32` index buffer filled through a staging copy
    pub fn create_index_buffer(&mut self, mesh: &Mesh) -> RenderResult<()> {
        mesh.validate()?;
        let buffer =
            self.create_device_local_buffer(bytemuck::cast_slice(&mesh.indices), vk::BufferUsageFlags::INDEX_BUFFER)?;
        self.index_buffer = Some(buffer);
        self.index_count = mesh.index_count();
        Ok(())
    }

    /// One persistently mapped uniform buffer per slot
    pub fn create_uniform_buffers(&mut self) -> RenderResult<()> {
        let size = size_of::<UniformBufferObject>() as vk::DeviceSize;
        for _ in 0..self.frames_in_flight {
            let buffer = UniformBuffer::new(&self.device, &self.memory_properties, size)?;
            self.uniform_buffers.push(buffer);
        }
        Ok(())
    }

    /// Pool sized for one set per slot
    pub fn create_descriptor_pool(&mut self, textured: bool) -> RenderResult<()> {
        let count = u32::try_from(self.frames_in_flight).unwrap_or(u32::MAX);
        let mut sizes = vec![vk::DescriptorPoolSize {
            ty: vk::DescriptorType::UNIFORM_BUFFER,
            descriptor_count: count,
        }];
        if textured {
            sizes.push(vk::DescriptorPoolSize {
                ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                descriptor_count: count,
            });
        }
        self.descriptor_pool = self
            .device
            .create_descriptor_pool(count, &sizes)
            .map_err(RenderError::DescriptorPoolCreation)?;
        Ok(())
    }

    /// Allocate one set per slot and point set i at uniform buffer i
    pub fn create_descriptor_sets(&mut self, layout: vk::DescriptorSetLayout) -> RenderResult<()> {
        let layouts = vec![layout; self.frames_in_flight];
        let sets = self
            .device
            .allocate_descriptor_sets(self.descriptor_pool, &layouts)
            .map_err(|e| RenderError::DescriptorSetAllocation {
                reason: format!("vkAllocateDescriptorSets failed: {e:?}"),
            })?;
        if sets.len() != self.frames_in_flight {
            return Err(RenderError::DescriptorSetAllocation {
                reason: format!("expected {} sets, got {}", self.frames_in_flight, sets.len()),
            });
        }

        let texture_view = self.texture.as_ref().map(ImageResource::view);
        let mut writes = Vec::with_capacity(sets.len() * 2);
        for (&set, uniform) in sets.iter().zip(&self.uniform_buffers) {
            writes.push(DescriptorWrite {
                set,
                binding: UNIFORM_BINDING,
                resource: DescriptorResource::UniformBuffer {
                    buffer: uniform.handle(),
                    range: uniform.size(),
                },
            });
            if let Some(view) = texture_view {
                writes.push(DescriptorWrite {
                    set,
                    binding: SAMPLER_BINDING,
                    resource: DescriptorResource::CombinedImageSampler {
                        view,
                        sampler: self.sampler,
                    },
                });
            }
        }
        self.device.update_descriptor_sets(&writes);
        self.descriptor_sets = sets;
        Ok(())
    }

    /// Write slot `slot`'s uniform buffer
    ///
    /// Only call once the slot's fence has been observed signaled.
    pub fn write_uniforms(&mut self, slot: usize, ubo: &UniformBufferObject) -> RenderResult<()> {
        let frames_in_flight = self.frames_in_flight;
        let buffer = self
            .uniform_buffers
            .get_mut(slot)
            .ok_or(RenderError::FrameSlot { slot, frames_in_flight })?;
        buffer.write(bytemuck::bytes_of(ubo))
    }

    /// Number of slots
    pub fn frames_in_flight(&self) -> usize {
        self.frames_in_flight
    }

    /// Error for a slot outside `0..frames_in_flight`
    pub fn slot_error(&self, slot: usize) -> RenderError {
        RenderError::FrameSlot {
            slot,
            frames_in_flight: self.frames_in_flight,
        }
    }

    /// Sync objects of a slot
    pub fn sync(&self, slot: usize) -> Option<&FrameSync<D>> {
        self.sync.get(slot)
    }

    /// Command buffer of a slot
    pub fn command_buffer(&self, slot: usize) -> Option<vk::CommandBuffer> {
        self.command_buffers.get(slot).copied()
    }

    /// Descriptor set of a slot
    pub fn descriptor_set(&self, slot: usize) -> Option<vk::DescriptorSet> {
        self.descriptor_sets.get(slot).copied()
    }

    /// Uniform buffer of a slot
    pub fn uniform_buffer(&self, slot: usize) -> Option<&UniformBuffer<D>> {
        self.uniform_buffers.get(slot)
    }

    /// Framebuffer for a swapchain image
    pub fn framebuffer(&self, image_index: u32) -> Option<vk::Framebuffer> {
        self.framebuffers.get(image_index as usize).copied()
    }

    /// Number of framebuffers
    pub fn framebuffer_count(&self) -> usize {
        self.framebuffers.len()
    }

    /// Vertex and index buffer handles
    pub fn geometry(&self) -> (vk::Buffer, vk::Buffer) {
        let handle = |buffer: &Option<BufferResource<D>>| buffer.as_ref().map_or(vk::Buffer::null(), BufferResource::handle);
        (handle(&self.vertex_buffer), handle(&self.index_buffer))
    }

    /// Number of indices to draw
    pub fn index_count(&self) -> u32 {
        self.index_count
    }
}

impl<D: GpuDevice> Drop for FrameResources<D> {
    fn drop(&mut self) {
        self.destroy_size_dependent();
        if self.descriptor_pool != vk::DescriptorPool::null() {
            self.device.destroy_descriptor_pool(self.descriptor_pool);
        }
        self.uniform_buffers.clear();
        self.index_buffer = None;
        self.vertex_buffer = None;
        if self.sampler != vk::Sampler::null() {
            self.device.destroy_sampler(self.sampler);
        }
        self.texture = None;
        self.sync.clear();
        if self.command_pool != vk::CommandPool::null() {
            if !self.command_buffers.is_empty() {
                self.device.free_command_buffers(self.command_pool, &self.command_buffers);
            }
            self.device.destroy_command_pool(self.command_pool);
        }
    }
}
