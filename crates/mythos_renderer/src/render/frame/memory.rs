//! Buffers, images and the single-time upload path
//!
//! Every buffer or image is created with the two-step contract: create the
//! handle, query its requirements, pick a memory type, allocate, bind. The
//! handle and its memory are owned by one value and released together.

use std::ptr::NonNull;

use ash::vk;

use crate::render::backend::{GpuDevice, ImageBarrier, SubmitDesc};
use crate::render::error::{RenderError, RenderResult};

/// First memory type allowed by `type_bits` with all of `properties`
pub fn find_memory_type(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    properties: vk::MemoryPropertyFlags,
) -> RenderResult<u32> {
    let count = memory_properties.memory_type_count.min(vk::MAX_MEMORY_TYPES as u32);
    (0..count)
        .find(|&i| {
            type_bits & (1 << i) != 0 && memory_properties.memory_types[i as usize].property_flags.contains(properties)
        })
        .ok_or(RenderError::NoSuitableMemoryType { type_bits, properties })
}

/// Buffer handle and its memory
pub struct BufferResource<D: GpuDevice> {
    device: D,
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    size: vk::DeviceSize,
}

impl<D: GpuDevice> BufferResource<D> {
    /// Create, allocate and bind an exclusive buffer
    pub fn new(
        device: &D,
        memory_properties: &vk::PhysicalDeviceMemoryProperties,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> RenderResult<Self> {
        if size == 0 {
            return Err(RenderError::BufferCreation(vk::Result::ERROR_INITIALIZATION_FAILED));
        }
        let info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .build();
        let buffer = device.create_buffer(&info).map_err(RenderError::BufferCreation)?;

        let mut resource = Self {
            device: device.clone(),
            buffer,
            memory: vk::DeviceMemory::null(),
            size,
        };

        let requirements = device.buffer_memory_requirements(buffer);
        let type_index = find_memory_type(memory_properties, requirements.memory_type_bits, properties)?;
        resource.memory = device
            .allocate_memory(requirements.size, type_index)
            .map_err(RenderError::MemoryAllocation)?;
        device
            .bind_buffer_memory(buffer, resource.memory)
            .map_err(RenderError::MemoryAllocation)?;

        Ok(resource)
    }

    /// Host-visible buffer already holding `bytes`
    pub fn staging(device: &D, memory_properties: &vk::PhysicalDeviceMemoryProperties, bytes: &[u8]) -> RenderResult<Self> {
        let staging = Self::new(
            device,
            memory_properties,
            bytes.len() as vk::DeviceSize,
            vk::BufferUsageFlags::TRANSFER_SRC,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )?;
        staging.upload(bytes)?;
        Ok(staging)
    }

    /// Map, copy `bytes` to offset 0, unmap
    pub fn upload(&self, bytes: &[u8]) -> RenderResult<()> {
        let mut mapping = self.map()?;
        mapping.write(bytes)
    }

    /// Map the whole buffer until the returned value drops
    pub fn map(&self) -> RenderResult<MappedMemory<D>> {
        MappedMemory::new(&self.device, self.memory, self.size)
    }

    /// Buffer handle
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    /// Backing memory
    pub fn memory(&self) -> vk::DeviceMemory {
        self.memory
    }

    /// Requested size in bytes
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }
}

impl<D: GpuDevice> Drop for BufferResource<D> {
    fn drop(&mut self) {
        self.device.destroy_buffer(self.buffer);
        if self.memory != vk::DeviceMemory::null() {
            self.device.free_memory(self.memory);
        }
    }
}

/// A live host mapping, unmapped on drop
pub struct MappedMemory<D: GpuDevice> {
    device: D,
    memory: vk::DeviceMemory,
    ptr: NonNull<u8>,
    len: usize,
}

impl<D: GpuDevice> MappedMemory<D> {
    fn new(device: &D, memory: vk::DeviceMemory, size: vk::DeviceSize) -> RenderResult<Self> {
        let len = usize::try_from(size).map_err(|_| RenderError::MemoryMap(vk::Result::ERROR_MEMORY_MAP_FAILED))?;
        let raw = device.map_memory(memory, 0, size).map_err(RenderError::MemoryMap)?;
        let Some(ptr) = NonNull::new(raw.cast::<u8>()) else {
            device.unmap_memory(memory);
            return Err(RenderError::MemoryMap(vk::Result::ERROR_MEMORY_MAP_FAILED));
        };
        Ok(Self {
            device: device.clone(),
            memory,
            ptr,
            len,
        })
    }

    /// Copy `bytes` to the start of the mapping
    pub fn write(&mut self, bytes: &[u8]) -> RenderResult<()> {
        if bytes.len() > self.len {
            return Err(RenderError::MemoryMap(vk::Result::ERROR_MEMORY_MAP_FAILED));
        }
        // SAFETY: the mapping covers `len` bytes and stays valid until drop
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), self.ptr.as_ptr(), bytes.len());
        }
        Ok(())
    }

    /// Mapped length in bytes
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the mapping is zero-sized
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl<D: GpuDevice> Drop for MappedMemory<D> {
    fn drop(&mut self) {
        self.device.unmap_memory(self.memory);
    }
}

/// Host-coherent uniform buffer kept mapped for its whole life
pub struct UniformBuffer<D: GpuDevice> {
    // Unmapped before the buffer and its memory are released
    mapping: MappedMemory<D>,
    buffer: BufferResource<D>,
}

impl<D: GpuDevice> UniformBuffer<D> {
    /// Create and persistently map a uniform buffer of `size` bytes
    pub fn new(device: &D, memory_properties: &vk::PhysicalDeviceMemoryProperties, size: vk::DeviceSize) -> RenderResult<Self> {
        let buffer = BufferResource::new(
            device,
            memory_properties,
            size,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )?;
        let mapping = buffer.map()?;
        Ok(Self { mapping, buffer })
    }

    /// Overwrite the contents
    pub fn write(&mut self, bytes: &[u8]) -> RenderResult<()> {
        self.mapping.write(bytes)
    }

    /// Buffer handle
    pub fn handle(&self) -> vk::Buffer {
        self.buffer.handle()
    }

    /// Backing memory
    pub fn memory(&self) -> vk::DeviceMemory {
        self.buffer.memory()
    }

    /// Size in bytes
    pub fn size(&self) -> vk::DeviceSize {
        self.buffer.size()
    }
}

/// Parameters of a 2D image
#[derive(Debug, Clone, Copy)]
pub struct ImageSpec {
    /// Size of mip level 0
    pub extent: vk::Extent2D,
    /// Mip levels to allocate
    pub mip_levels: u32,
    /// Texel format
    pub format: vk::Format,
    /// Tiling
    pub tiling: vk::ImageTiling,
    /// Usage flags
    pub usage: vk::ImageUsageFlags,
    /// Memory properties
    pub properties: vk::MemoryPropertyFlags,
}

/// Image handle, its memory and an optional view
pub struct ImageResource<D: GpuDevice> {
    device: D,
    image: vk::Image,
    memory: vk::DeviceMemory,
    view: vk::ImageView,
    spec: ImageSpec,
}

impl<D: GpuDevice> ImageResource<D> {
    /// Create, allocate and bind a 2D image
    pub fn new(device: &D, memory_properties: &vk::PhysicalDeviceMemoryProperties, spec: ImageSpec) -> RenderResult<Self> {
        let info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width: spec.extent.width,
                height: spec.extent.height,
                depth: 1,
            })
            .mip_levels(spec.mip_levels)
            .array_layers(1)
            .format(spec.format)
            .tiling(spec.tiling)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(spec.usage)
            .samples(vk::SampleCountFlags::TYPE_1)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .build();
        let image = device.create_image(&info).map_err(RenderError::ImageCreation)?;

        let mut resource = Self {
            device: device.clone(),
            image,
            memory: vk::DeviceMemory::null(),
            view: vk::ImageView::null(),
            spec,
        };

        let requirements = device.image_memory_requirements(image);
        let type_index = find_memory_type(memory_properties, requirements.memory_type_bits, spec.properties)?;
        resource.memory = device
            .allocate_memory(requirements.size, type_index)
            .map_err(RenderError::MemoryAllocation)?;
        device
            .bind_image_memory(image, resource.memory)
            .map_err(RenderError::MemoryAllocation)?;

        Ok(resource)
    }

    /// Create the view covering every mip level
    pub fn create_view(&mut self, aspect: vk::ImageAspectFlags) -> RenderResult<vk::ImageView> {
        let info = vk::ImageViewCreateInfo::builder()
            .image(self.image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(self.spec.format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: aspect,
                base_mip_level: 0,
                level_count: self.spec.mip_levels,
                base_array_layer: 0,
                layer_count: 1,
            })
            .build();
        self.view = self.device.create_image_view(&info).map_err(RenderError::ImageViewCreation)?;
        Ok(self.view)
    }

    /// Image handle
    pub fn image(&self) -> vk::Image {
        self.image
    }

    /// View, or null before [`Self::create_view`]
    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    /// Creation parameters
    pub fn spec(&self) -> &ImageSpec {
        &self.spec
    }
}

impl<D: GpuDevice> Drop for ImageResource<D> {
    fn drop(&mut self) {
        if self.view != vk::ImageView::null() {
            self.device.destroy_image_view(self.view);
        }
        self.device.destroy_image(self.image);
        if self.memory != vk::DeviceMemory::null() {
            self.device.free_memory(self.memory);
        }
    }
}

/// One-shot command buffer submitted and waited on a queue
pub struct SingleTimeCommands<'a, D: GpuDevice> {
    device: &'a D,
    pool: vk::CommandPool,
    queue: vk::Queue,
    buffer: vk::CommandBuffer,
}

impl<'a, D: GpuDevice> SingleTimeCommands<'a, D> {
    /// Allocate and begin a one-time-submit command buffer
    pub fn begin(device: &'a D, pool: vk::CommandPool, queue: vk::Queue) -> RenderResult<Self> {
        let buffer = device
            .allocate_command_buffers(pool, 1)
            .map_err(RenderError::CommandBufferAllocation)?
            .first()
            .copied()
            .ok_or(RenderError::CommandBufferAllocation(vk::Result::ERROR_UNKNOWN))?;
        let commands = Self {
            device,
            pool,
            queue,
            buffer,
        };
        device.begin_command_buffer(buffer, true).map_err(RenderError::CommandRecording)?;
        Ok(commands)
    }

    /// Command buffer being recorded
    pub fn buffer(&self) -> vk::CommandBuffer {
        self.buffer
    }

    /// End, submit and block until the queue is idle
    pub fn submit_and_wait(self) -> RenderResult<()> {
        self.device.end_command_buffer(self.buffer).map_err(RenderError::CommandRecording)?;
        let submit = SubmitDesc {
            command_buffer: self.buffer,
            wait: None,
            signal: None,
            fence: vk::Fence::null(),
        };
        self.device.queue_submit(self.queue, &submit).map_err(RenderError::Submit)?;
        self.device.queue_wait_idle(self.queue).map_err(RenderError::Submit)
    }
}

impl<D: GpuDevice> Drop for SingleTimeCommands<'_, D> {
    fn drop(&mut self) {
        self.device.free_command_buffers(self.pool, &[self.buffer]);
    }
}

/// Copy `size` bytes between buffers through a single-time command buffer
pub fn copy_buffer<D: GpuDevice>(
    device: &D,
    pool: vk::CommandPool,
    queue: vk::Queue,
    src: vk::Buffer,
    dst: vk::Buffer,
    size: vk::DeviceSize,
) -> RenderResult<()> {
    let commands = SingleTimeCommands::begin(device, pool, queue)?;
    device.cmd_copy_buffer(commands.buffer(), src, dst, size);
    commands.submit_and_wait()
}

/// Access masks and stages for the layout transitions the renderer performs
pub fn transition_masks(
    old: vk::ImageLayout,
    new: vk::ImageLayout,
) -> Option<(vk::AccessFlags, vk::AccessFlags, vk::PipelineStageFlags, vk::PipelineStageFlags)> {
    match (old, new) {
        (vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL) => Some((
            vk::AccessFlags::empty(),
            vk::AccessFlags::TRANSFER_WRITE,
            vk::PipelineStageFlags::TOP_OF_PIPE,
            vk::PipelineStageFlags::TRANSFER,
        )),
        (vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::TRANSFER_SRC_OPTIMAL) => Some((
            vk::AccessFlags::TRANSFER_WRITE,
            vk::AccessFlags::TRANSFER_READ,
            vk::PipelineStageFlags::TRANSFER,
            vk::PipelineStageFlags::TRANSFER,
        )),
        (vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL) => Some((
            vk::AccessFlags::TRANSFER_WRITE,
            vk::AccessFlags::SHADER_READ,
            vk::PipelineStageFlags::TRANSFER,
            vk::PipelineStageFlags::FRAGMENT_SHADER,
        )),
        (vk::ImageLayout::TRANSFER_SRC_OPTIMAL, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL) => Some((
            vk::AccessFlags::TRANSFER_READ,
            vk::AccessFlags::SHADER_READ,
            vk::PipelineStageFlags::TRANSFER,
            vk::PipelineStageFlags::FRAGMENT_SHADER,
        )),
        (vk::ImageLayout::UNDEFINED, vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL) => Some((
            vk::AccessFlags::empty(),
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            vk::PipelineStageFlags::TOP_OF_PIPE,
            vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
        )),
        _ => None,
    }
}

/// Record a layout transition of `level_count` mips starting at `base_mip_level`
pub fn record_transition<D: GpuDevice>(
    device: &D,
    command_buffer: vk::CommandBuffer,
    image: vk::Image,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
    base_mip_level: u32,
    level_count: u32,
) -> RenderResult<()> {
    let (src_access, dst_access, src_stage, dst_stage) =
        transition_masks(old_layout, new_layout).ok_or_else(|| RenderError::UnsupportedFormat {
            reason: format!("unsupported layout transition {old_layout:?} -> {new_layout:?}"),
        })?;
    let aspect = if new_layout == vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL {
        vk::ImageAspectFlags::DEPTH
    } else {
        vk::ImageAspectFlags::COLOR
    };
    device.cmd_image_barrier(
        command_buffer,
        &ImageBarrier {
            image,
            old_layout,
            new_layout,
            src_access,
            dst_access,
            src_stage,
            dst_stage,
            aspect,
            base_mip_level,
            level_count,
        },
    );
    Ok(())
}

/// Blit each level from the previous one and leave every level shader-readable
///
/// Expects every level in `TRANSFER_DST_OPTIMAL` with level 0 filled.
pub fn record_mipmaps<D: GpuDevice>(
    device: &D,
    command_buffer: vk::CommandBuffer,
    image: vk::Image,
    format_properties: &vk::FormatProperties,
    extent: vk::Extent2D,
    mip_levels: u32,
) -> RenderResult<()> {
    if mip_levels > 1
        && !format_properties
            .optimal_tiling_features
            .contains(vk::FormatFeatureFlags::SAMPLED_IMAGE_FILTER_LINEAR)
    {
        return Err(RenderError::UnsupportedFormat {
            reason: "texture format does not support linear blitting".to_string(),
        });
    }

    let to_offset = |width: i32, height: i32| vk::Offset3D { x: width, y: height, z: 1 };
    let layers = |mip_level: u32| vk::ImageSubresourceLayers {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        mip_level,
        base_array_layer: 0,
        layer_count: 1,
    };

    let mut width = i32::try_from(extent.width).unwrap_or(i32::MAX);
    let mut height = i32::try_from(extent.height).unwrap_or(i32::MAX);
    for level in 1..mip_levels {
        record_transition(
            device,
            command_buffer,
            image,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            level - 1,
            1,
        )?;

        let next_width = (width / 2).max(1);
        let next_height = (height / 2).max(1);
        let region = vk::ImageBlit {
            src_subresource: layers(level - 1),
            src_offsets: [vk::Offset3D::default(), to_offset(width, height)],
            dst_subresource: layers(level),
            dst_offsets: [vk::Offset3D::default(), to_offset(next_width, next_height)],
        };
        device.cmd_blit_image(command_buffer, image, region);

        record_transition(
            device,
            command_buffer,
            image,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            level - 1,
            1,
        )?;

        width = next_width;
        height = next_height;
    }

    record_transition(
        device,
        command_buffer,
        image,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        mip_levels.saturating_sub(1),
        1,
    )
}
