//! GPU backend seam
//!
//! The renderer's ownership tiers never call `ash` directly. They go through
//! three traits mirroring Vulkan's dispatch levels:
//!
//! - [`GpuEntry`]: loader-level queries and instance creation
//! - [`GpuInstance`]: surface, physical-device queries, device creation
//! - [`GpuDevice`]: every device-level object and command
//!
//! Handles and plain-data structures are the `ash::vk` types. Create infos that
//! carry pointers are replaced by the owned descriptor structs in this module,
//! so callers never juggle lifetimes of pointed-to arrays.
//!
//! [`vulkan`] is the production implementation. Tests use the `mock` module.

use ash::prelude::VkResult;
use ash::vk;

use crate::foundation::logging::Logger;
use crate::platform::WindowSource;

pub mod vulkan;

#[cfg(test)]
pub(crate) mod mock;

/// Instance creation parameters
#[derive(Debug, Clone, Default)]
pub struct InstanceDesc {
    /// Application name reported to the driver
    pub application_name: String,
    /// Application version (major, minor, patch)
    pub application_version: (u32, u32, u32),
    /// Instance extensions to enable
    pub extensions: Vec<String>,
    /// Instance layers to enable
    pub layers: Vec<String>,
    /// Install a debug-utils messenger routed to the renderer's logger
    pub debug_messenger: bool,
}

/// Logical device creation parameters
#[derive(Debug, Clone, Default)]
pub struct DeviceDesc {
    /// One queue is created per listed family; entries must be unique
    pub queue_families: Vec<u32>,
    /// Device extensions to enable
    pub extensions: Vec<String>,
    /// Device layers (ignored by modern loaders, kept for older ones)
    pub layers: Vec<String>,
    /// Enable the `samplerAnisotropy` feature
    pub sampler_anisotropy: bool,
}

/// Swapchain creation parameters
#[derive(Debug, Clone)]
pub struct SwapchainDesc {
    /// Target surface
    pub surface: vk::SurfaceKHR,
    /// Requested minimum image count
    pub min_image_count: u32,
    /// Image format and color space
    pub format: vk::SurfaceFormatKHR,
    /// Image extent
    pub extent: vk::Extent2D,
    /// Presentation mode
    pub present_mode: vk::PresentModeKHR,
    /// Surface transform, normally the current transform
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
    /// Families sharing the images; more than one selects concurrent sharing
    pub queue_family_indices: Vec<u32>,
    /// Chain being replaced, or null
    pub old_swapchain: vk::SwapchainKHR,
}

/// Render pass layout: attachments, a single graphics subpass, dependencies
#[derive(Debug, Clone, Default)]
pub struct RenderPassDesc {
    /// Attachment descriptions
    pub attachments: Vec<vk::AttachmentDescription>,
    /// Color attachment references of the subpass
    pub color_refs: Vec<vk::AttachmentReference>,
    /// Depth attachment reference of the subpass
    pub depth_ref: Option<vk::AttachmentReference>,
    /// Subpass dependencies
    pub dependencies: Vec<vk::SubpassDependency>,
}

/// Graphics pipeline state
#[derive(Debug, Clone)]
pub struct GraphicsPipelineDesc {
    /// Vertex shader module
    pub vertex_module: vk::ShaderModule,
    /// Fragment shader module
    pub fragment_module: vk::ShaderModule,
    /// Vertex buffer bindings
    pub vertex_bindings: Vec<vk::VertexInputBindingDescription>,
    /// Vertex attributes
    pub vertex_attributes: Vec<vk::VertexInputAttributeDescription>,
    /// Primitive topology
    pub topology: vk::PrimitiveTopology,
    /// Face culling
    pub cull_mode: vk::CullModeFlags,
    /// Front-face winding
    pub front_face: vk::FrontFace,
    /// Rasterization samples
    pub samples: vk::SampleCountFlags,
    /// Depth test and write with `LESS`
    pub depth_test: bool,
    /// States supplied at record time
    pub dynamic_states: Vec<vk::DynamicState>,
    /// Pipeline layout
    pub layout: vk::PipelineLayout,
    /// Render pass the pipeline is compatible with
    pub render_pass: vk::RenderPass,
}

/// Framebuffer creation parameters
#[derive(Debug, Clone)]
pub struct FramebufferDesc {
    /// Compatible render pass
    pub render_pass: vk::RenderPass,
    /// Attachment views in render-pass order
    pub attachments: Vec<vk::ImageView>,
    /// Framebuffer size
    pub extent: vk::Extent2D,
}

/// Queue submission of one command buffer
#[derive(Debug, Clone, Copy)]
pub struct SubmitDesc {
    /// Command buffer to execute
    pub command_buffer: vk::CommandBuffer,
    /// Semaphore to wait on and the stage that waits
    pub wait: Option<(vk::Semaphore, vk::PipelineStageFlags)>,
    /// Semaphore signaled on completion
    pub signal: Option<vk::Semaphore>,
    /// Fence signaled on completion, or null
    pub fence: vk::Fence,
}

/// Resource referenced by a descriptor write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorResource {
    /// `UNIFORM_BUFFER` descriptor
    UniformBuffer {
        /// Buffer handle
        buffer: vk::Buffer,
        /// Bytes visible to the shader
        range: vk::DeviceSize,
    },
    /// `COMBINED_IMAGE_SAMPLER` descriptor in `SHADER_READ_ONLY_OPTIMAL`
    CombinedImageSampler {
        /// Image view
        view: vk::ImageView,
        /// Sampler
        sampler: vk::Sampler,
    },
}

/// One descriptor write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorWrite {
    /// Target set
    pub set: vk::DescriptorSet,
    /// Target binding
    pub binding: u32,
    /// What the binding points at
    pub resource: DescriptorResource,
}

/// Image layout transition recorded as a pipeline barrier
#[derive(Debug, Clone, Copy)]
pub struct ImageBarrier {
    /// Image to transition
    pub image: vk::Image,
    /// Current layout
    pub old_layout: vk::ImageLayout,
    /// Target layout
    pub new_layout: vk::ImageLayout,
    /// Accesses made available
    pub src_access: vk::AccessFlags,
    /// Accesses made visible
    pub dst_access: vk::AccessFlags,
    /// Stage waited on
    pub src_stage: vk::PipelineStageFlags,
    /// Stage that waits
    pub dst_stage: vk::PipelineStageFlags,
    /// Aspect of the image
    pub aspect: vk::ImageAspectFlags,
    /// First mip level affected
    pub base_mip_level: u32,
    /// Number of mip levels affected
    pub level_count: u32,
}

/// Loader-level entry point
pub trait GpuEntry {
    /// Instance type created by this entry
    type Instance: GpuInstance<Device = Self::Device>;
    /// Device type created by the instance
    type Device: GpuDevice;

    /// Names of all available instance extensions
    fn instance_extension_names(&self) -> VkResult<Vec<String>>;

    /// Names of all available instance layers
    fn instance_layer_names(&self) -> VkResult<Vec<String>>;

    /// Create an instance; `log` receives validation messages
    fn create_instance(&self, desc: &InstanceDesc, log: &Logger) -> VkResult<Self::Instance>;
}

/// Instance-level operations
pub trait GpuInstance: Clone {
    /// Device type created by this instance
    type Device: GpuDevice;

    /// Create a presentation surface for a window
    fn create_surface(&self, window: &dyn WindowSource) -> VkResult<vk::SurfaceKHR>;
    /// Destroy a surface
    fn destroy_surface(&self, surface: vk::SurfaceKHR);

    /// All physical devices
    fn enumerate_physical_devices(&self) -> VkResult<Vec<vk::PhysicalDevice>>;
    /// Device properties (name, limits)
    fn physical_device_properties(&self, device: vk::PhysicalDevice) -> vk::PhysicalDeviceProperties;
    /// Supported features
    fn physical_device_features(&self, device: vk::PhysicalDevice) -> vk::PhysicalDeviceFeatures;
    /// Queue families
    fn queue_family_properties(&self, device: vk::PhysicalDevice) -> Vec<vk::QueueFamilyProperties>;
    /// Names of supported device extensions
    fn device_extension_names(&self, device: vk::PhysicalDevice) -> VkResult<Vec<String>>;
    /// Memory heaps and types
    fn memory_properties(&self, device: vk::PhysicalDevice) -> vk::PhysicalDeviceMemoryProperties;
    /// Format feature support
    fn format_properties(&self, device: vk::PhysicalDevice, format: vk::Format) -> vk::FormatProperties;

    /// Whether `family` can present to `surface`
    fn surface_support(&self, device: vk::PhysicalDevice, family: u32, surface: vk::SurfaceKHR) -> VkResult<bool>;
    /// Surface capabilities
    fn surface_capabilities(
        &self,
        device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
    ) -> VkResult<vk::SurfaceCapabilitiesKHR>;
    /// Supported surface formats
    fn surface_formats(&self, device: vk::PhysicalDevice, surface: vk::SurfaceKHR) -> VkResult<Vec<vk::SurfaceFormatKHR>>;
    /// Supported present modes
    fn surface_present_modes(
        &self,
        device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
    ) -> VkResult<Vec<vk::PresentModeKHR>>;

    /// Create a logical device
    fn create_device(&self, physical_device: vk::PhysicalDevice, desc: &DeviceDesc) -> VkResult<Self::Device>;

    /// Destroy the instance; every child object must already be gone
    fn destroy_instance(&self);
}

/// Device-level operations
///
/// Implementations are cheap to clone. Every resource owner keeps its own
/// clone so it can release its handles in `Drop`.
pub trait GpuDevice: Clone {
    /// Raw device handle
    fn handle(&self) -> vk::Device;
    /// Queue `0` of `family`
    fn get_device_queue(&self, family: u32) -> vk::Queue;
    /// Block until all queues are idle
    fn device_wait_idle(&self) -> VkResult<()>;
    /// Block until `queue` is idle
    fn queue_wait_idle(&self, queue: vk::Queue) -> VkResult<()>;
    /// Destroy the device; every child object must already be gone
    fn destroy_device(&self);

    // Swapchain
    /// Create a swapchain
    fn create_swapchain(&self, desc: &SwapchainDesc) -> VkResult<vk::SwapchainKHR>;
    /// Destroy a swapchain
    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR);
    /// Images owned by a swapchain
    fn get_swapchain_images(&self, swapchain: vk::SwapchainKHR) -> VkResult<Vec<vk::Image>>;
    /// Acquire the next image; `Ok((index, suboptimal))`
    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        timeout: u64,
        semaphore: vk::Semaphore,
    ) -> VkResult<(u32, bool)>;
    /// Present an image; `Ok(suboptimal)`
    fn queue_present(
        &self,
        queue: vk::Queue,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    ) -> VkResult<bool>;

    // Images and views
    /// Create an image view
    fn create_image_view(&self, info: &vk::ImageViewCreateInfo) -> VkResult<vk::ImageView>;
    /// Destroy an image view
    fn destroy_image_view(&self, view: vk::ImageView);
    /// Create an image (exclusive sharing)
    fn create_image(&self, info: &vk::ImageCreateInfo) -> VkResult<vk::Image>;
    /// Destroy an image
    fn destroy_image(&self, image: vk::Image);
    /// Memory requirements of an image
    fn image_memory_requirements(&self, image: vk::Image) -> vk::MemoryRequirements;
    /// Bind memory to an image
    fn bind_image_memory(&self, image: vk::Image, memory: vk::DeviceMemory) -> VkResult<()>;
    /// Create a sampler
    fn create_sampler(&self, info: &vk::SamplerCreateInfo) -> VkResult<vk::Sampler>;
    /// Destroy a sampler
    fn destroy_sampler(&self, sampler: vk::Sampler);

    // Buffers and memory
    /// Create a buffer (exclusive sharing)
    fn create_buffer(&self, info: &vk::BufferCreateInfo) -> VkResult<vk::Buffer>;
    /// Destroy a buffer
    fn destroy_buffer(&self, buffer: vk::Buffer);
    /// Memory requirements of a buffer
    fn buffer_memory_requirements(&self, buffer: vk::Buffer) -> vk::MemoryRequirements;
    /// Bind memory to a buffer
    fn bind_buffer_memory(&self, buffer: vk::Buffer, memory: vk::DeviceMemory) -> VkResult<()>;
    /// Allocate device memory
    fn allocate_memory(&self, size: vk::DeviceSize, memory_type_index: u32) -> VkResult<vk::DeviceMemory>;
    /// Free device memory
    fn free_memory(&self, memory: vk::DeviceMemory);
    /// Map a range of host-visible memory
    fn map_memory(
        &self,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
        size: vk::DeviceSize,
    ) -> VkResult<*mut std::ffi::c_void>;
    /// Unmap memory
    fn unmap_memory(&self, memory: vk::DeviceMemory);

    // Pipeline objects
    /// Create a render pass
    fn create_render_pass(&self, desc: &RenderPassDesc) -> VkResult<vk::RenderPass>;
    /// Destroy a render pass
    fn destroy_render_pass(&self, render_pass: vk::RenderPass);
    /// Create a descriptor set layout
    fn create_descriptor_set_layout(
        &self,
        bindings: &[vk::DescriptorSetLayoutBinding],
    ) -> VkResult<vk::DescriptorSetLayout>;
    /// Destroy a descriptor set layout
    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout);
    /// Create a pipeline layout over the given set layouts
    fn create_pipeline_layout(&self, set_layouts: &[vk::DescriptorSetLayout]) -> VkResult<vk::PipelineLayout>;
    /// Destroy a pipeline layout
    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout);
    /// Create a shader module from SPIR-V words
    fn create_shader_module(&self, code: &[u32]) -> VkResult<vk::ShaderModule>;
    /// Destroy a shader module
    fn destroy_shader_module(&self, module: vk::ShaderModule);
    /// Create a graphics pipeline
    fn create_graphics_pipeline(&self, desc: &GraphicsPipelineDesc) -> VkResult<vk::Pipeline>;
    /// Destroy a pipeline
    fn destroy_pipeline(&self, pipeline: vk::Pipeline);
    /// Create a framebuffer
    fn create_framebuffer(&self, desc: &FramebufferDesc) -> VkResult<vk::Framebuffer>;
    /// Destroy a framebuffer
    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer);

    // Descriptors
    /// Create a descriptor pool
    fn create_descriptor_pool(
        &self,
        max_sets: u32,
        pool_sizes: &[vk::DescriptorPoolSize],
    ) -> VkResult<vk::DescriptorPool>;
    /// Destroy a descriptor pool and every set allocated from it
    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool);
    /// Allocate one set per layout
    fn allocate_descriptor_sets(
        &self,
        pool: vk::DescriptorPool,
        layouts: &[vk::DescriptorSetLayout],
    ) -> VkResult<Vec<vk::DescriptorSet>>;
    /// Write descriptors
    fn update_descriptor_sets(&self, writes: &[DescriptorWrite]);

    // Commands
    /// Create a resettable command pool for `family`
    fn create_command_pool(&self, family: u32) -> VkResult<vk::CommandPool>;
    /// Destroy a command pool and its buffers
    fn destroy_command_pool(&self, pool: vk::CommandPool);
    /// Allocate primary command buffers
    fn allocate_command_buffers(&self, pool: vk::CommandPool, count: u32) -> VkResult<Vec<vk::CommandBuffer>>;
    /// Return command buffers to their pool
    fn free_command_buffers(&self, pool: vk::CommandPool, buffers: &[vk::CommandBuffer]);
    /// Reset a command buffer
    fn reset_command_buffer(&self, buffer: vk::CommandBuffer) -> VkResult<()>;
    /// Begin recording
    fn begin_command_buffer(&self, buffer: vk::CommandBuffer, one_time_submit: bool) -> VkResult<()>;
    /// End recording
    fn end_command_buffer(&self, buffer: vk::CommandBuffer) -> VkResult<()>;
    /// Begin a render pass with inline contents
    fn cmd_begin_render_pass(
        &self,
        buffer: vk::CommandBuffer,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        clear_values: &[vk::ClearValue],
    );
    /// End the current render pass
    fn cmd_end_render_pass(&self, buffer: vk::CommandBuffer);
    /// Bind a graphics pipeline
    fn cmd_bind_pipeline(&self, buffer: vk::CommandBuffer, pipeline: vk::Pipeline);
    /// Set viewport 0
    fn cmd_set_viewport(&self, buffer: vk::CommandBuffer, viewport: vk::Viewport);
    /// Set scissor 0
    fn cmd_set_scissor(&self, buffer: vk::CommandBuffer, scissor: vk::Rect2D);
    /// Bind a vertex buffer at binding 0
    fn cmd_bind_vertex_buffer(&self, buffer: vk::CommandBuffer, vertex_buffer: vk::Buffer);
    /// Bind a `u32` index buffer
    fn cmd_bind_index_buffer(&self, buffer: vk::CommandBuffer, index_buffer: vk::Buffer);
    /// Bind a descriptor set at set 0
    fn cmd_bind_descriptor_set(&self, buffer: vk::CommandBuffer, layout: vk::PipelineLayout, set: vk::DescriptorSet);
    /// Indexed draw of one instance
    fn cmd_draw_indexed(&self, buffer: vk::CommandBuffer, index_count: u32);
    /// Copy between buffers
    fn cmd_copy_buffer(&self, buffer: vk::CommandBuffer, src: vk::Buffer, dst: vk::Buffer, size: vk::DeviceSize);
    /// Copy a tightly packed buffer into mip 0 of an image in `TRANSFER_DST_OPTIMAL`
    fn cmd_copy_buffer_to_image(&self, buffer: vk::CommandBuffer, src: vk::Buffer, image: vk::Image, extent: vk::Extent3D);
    /// Record an image memory barrier
    fn cmd_image_barrier(&self, buffer: vk::CommandBuffer, barrier: &ImageBarrier);
    /// Linear blit between mip levels of the same image
    fn cmd_blit_image(&self, buffer: vk::CommandBuffer, image: vk::Image, region: vk::ImageBlit);

    // Synchronization
    /// Create a binary semaphore
    fn create_semaphore(&self) -> VkResult<vk::Semaphore>;
    /// Destroy a semaphore
    fn destroy_semaphore(&self, semaphore: vk::Semaphore);
    /// Create a fence, optionally signaled
    fn create_fence(&self, signaled: bool) -> VkResult<vk::Fence>;
    /// Destroy a fence
    fn destroy_fence(&self, fence: vk::Fence);
    /// Wait for a fence; `Err(TIMEOUT)` when the timeout elapses
    fn wait_for_fence(&self, fence: vk::Fence, timeout: u64) -> VkResult<()>;
    /// Return a fence to the unsignaled state
    fn reset_fence(&self, fence: vk::Fence) -> VkResult<()>;
    /// Submit one command buffer
    fn queue_submit(&self, queue: vk::Queue, submit: &SubmitDesc) -> VkResult<()>;
}
