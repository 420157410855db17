//! In-memory backend for tests
//!
//! Models just enough of a GPU to check ownership and synchronization:
//! every handle is counted on create/destroy, fences follow Vulkan's
//! signaled/unsignaled rules, submitted work completes only when the CPU waits
//! for it, and misuse (resetting a busy command buffer, resetting an
//! unsignaled fence, destroying something twice) is recorded as a violation.
//! Acquire and present results can be scripted per call.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::ffi::c_void;
use std::rc::Rc;

use ash::prelude::VkResult;
use ash::vk::{self, Handle};

use super::{
    DescriptorWrite, DeviceDesc, FramebufferDesc, GpuDevice, GpuEntry, GpuInstance, GraphicsPipelineDesc,
    ImageBarrier, InstanceDesc, RenderPassDesc, SubmitDesc, SwapchainDesc,
};
use crate::foundation::logging::Logger;
use crate::platform::WindowSource;

/// Object kinds that are counted
const DEVICE_CHILDREN: [&str; 17] = [
    "swapchain",
    "image_view",
    "image",
    "memory",
    "buffer",
    "sampler",
    "render_pass",
    "descriptor_set_layout",
    "pipeline_layout",
    "shader_module",
    "pipeline",
    "framebuffer",
    "descriptor_pool",
    "command_pool",
    "semaphore",
    "fence",
    "mapping",
];

/// A simulated physical device
#[derive(Debug, Clone)]
pub(crate) struct MockAdapter {
    pub name: String,
    pub queue_families: Vec<vk::QueueFlags>,
    pub present_families: Vec<u32>,
    pub extensions: Vec<String>,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub sampler_anisotropy: bool,
    pub memory_types: Vec<vk::MemoryPropertyFlags>,
    pub unsupported_formats: Vec<vk::Format>,
}

impl MockAdapter {
    /// One graphics+present family, the swapchain extension, one format, FIFO only
    pub(crate) fn standard(name: &str) -> Self {
        Self {
            name: name.to_string(),
            queue_families: vec![vk::QueueFlags::GRAPHICS | vk::QueueFlags::TRANSFER],
            present_families: vec![0],
            extensions: vec!["VK_KHR_swapchain".to_string()],
            formats: vec![vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            }],
            present_modes: vec![vk::PresentModeKHR::FIFO],
            capabilities: vk::SurfaceCapabilitiesKHR {
                min_image_count: 2,
                max_image_count: 3,
                current_extent: vk::Extent2D {
                    width: u32::MAX,
                    height: u32::MAX,
                },
                min_image_extent: vk::Extent2D { width: 1, height: 1 },
                max_image_extent: vk::Extent2D {
                    width: 4096,
                    height: 4096,
                },
                max_image_array_layers: 1,
                current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
                supported_transforms: vk::SurfaceTransformFlagsKHR::IDENTITY,
                supported_composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
                supported_usage_flags: vk::ImageUsageFlags::COLOR_ATTACHMENT,
            },
            sampler_anisotropy: true,
            memory_types: vec![
                vk::MemoryPropertyFlags::DEVICE_LOCAL,
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            ],
            unsupported_formats: Vec::new(),
        }
    }

    pub(crate) fn without_extension(mut self, extension: &str) -> Self {
        self.extensions.retain(|e| e != extension);
        self
    }

    /// Graphics on family 0, present only on family 1
    pub(crate) fn with_split_queues(mut self) -> Self {
        self.queue_families = vec![vk::QueueFlags::GRAPHICS, vk::QueueFlags::TRANSFER];
        self.present_families = vec![1];
        self
    }
}

/// What the simulated loader and driver expose
#[derive(Debug, Clone)]
pub(crate) struct MockSetup {
    pub instance_extensions: Vec<String>,
    pub layers: Vec<String>,
    pub adapters: Vec<MockAdapter>,
}

impl Default for MockSetup {
    fn default() -> Self {
        Self {
            instance_extensions: vec![
                "VK_KHR_surface".to_string(),
                "VK_KHR_xlib_surface".to_string(),
                "VK_EXT_debug_utils".to_string(),
            ],
            layers: vec!["VK_LAYER_KHRONOS_validation".to_string()],
            adapters: vec![MockAdapter::standard("Mock GPU")],
        }
    }
}

/// A queue submission as the mock saw it
#[derive(Debug, Clone, Copy)]
pub(crate) struct SubmitRecord {
    pub command_buffer: vk::CommandBuffer,
    pub fence: vk::Fence,
    pub wait: Option<(vk::Semaphore, vk::PipelineStageFlags)>,
    pub signal: Option<vk::Semaphore>,
}

#[derive(Debug, Default)]
pub(crate) struct MockState {
    setup: MockSetup,
    next_handle: u64,
    live: HashMap<&'static str, HashSet<u64>>,
    created: HashMap<&'static str, usize>,
    destroyed: HashMap<&'static str, usize>,
    violations: Vec<String>,
    events: Vec<String>,

    fences: HashMap<u64, bool>,
    pending: VecDeque<(u64, u64)>,
    busy_command_buffers: HashSet<u64>,
    stalled: bool,

    swapchain_images: HashMap<u64, Vec<vk::Image>>,
    next_image: u32,
    acquire_calls: u32,
    acquire_script: HashMap<u32, vk::Result>,
    present_calls: u32,
    present_script: HashMap<u32, vk::Result>,
    surface_extent: Option<vk::Extent2D>,
    surface_formats: Option<Vec<vk::SurfaceFormatKHR>>,

    submits: Vec<SubmitRecord>,
    descriptor_writes: Vec<DescriptorWrite>,
    buffer_sizes: HashMap<u64, u64>,
    image_sizes: HashMap<u64, u64>,
    memory: HashMap<u64, Vec<u8>>,
    failures: HashMap<&'static str, vk::Result>,
    null_queue_family: Option<u32>,

    last_device: Option<DeviceDesc>,
    last_swapchain: Option<SwapchainDesc>,
    last_render_pass: Option<RenderPassDesc>,
    last_pipeline: Option<GraphicsPipelineDesc>,
    set_layout_bindings: Vec<Vec<vk::DescriptorSetLayoutBinding>>,
    barriers: Vec<ImageBarrier>,
    blits: usize,
    draws: Vec<u32>,
    render_pass_begins: Vec<vk::Framebuffer>,
}

impl MockState {
    fn allocate(&mut self, kind: &'static str) -> u64 {
        self.next_handle += 1;
        let handle = self.next_handle;
        self.live.entry(kind).or_default().insert(handle);
        *self.created.entry(kind).or_default() += 1;
        self.events.push(format!("create_{kind}"));
        handle
    }

    fn release(&mut self, kind: &'static str, handle: u64) {
        if handle == 0 {
            return;
        }
        let removed = self.live.get_mut(kind).is_some_and(|set| set.remove(&handle));
        if removed {
            *self.destroyed.entry(kind).or_default() += 1;
            self.events.push(format!("destroy_{kind}"));
        } else {
            self.violations.push(format!("destroy of unknown or already destroyed {kind} {handle:#x}"));
        }
    }

    fn fail(&mut self, op: &'static str) -> VkResult<()> {
        match self.failures.get(op) {
            Some(&result) => {
                self.events.push(format!("fail_{op}"));
                Err(result)
            }
            None => Ok(()),
        }
    }

    fn live_count(&self, kind: &str) -> usize {
        self.live.get(kind).map_or(0, HashSet::len)
    }

    fn adapter(&self, device: vk::PhysicalDevice) -> &MockAdapter {
        let index = usize::try_from(device.as_raw().saturating_sub(1)).unwrap_or(0);
        &self.setup.adapters[index]
    }

    /// Complete queued submissions in order until `fence` (or all of them) signals
    fn complete_until(&mut self, fence: Option<u64>) {
        while let Some((pending_fence, command_buffer)) = self.pending.pop_front() {
            if pending_fence != 0 {
                self.fences.insert(pending_fence, true);
            }
            self.busy_command_buffers.remove(&command_buffer);
            if fence.is_some_and(|f| f == pending_fence) {
                break;
            }
        }
    }

    fn check_idle_buffer(&mut self, buffer: vk::CommandBuffer, op: &str) {
        if self.busy_command_buffers.contains(&buffer.as_raw()) {
            self.violations
                .push(format!("{op} on command buffer {:#x} while the GPU still executes it", buffer.as_raw()));
        }
    }
}

/// Test-side view of the simulated GPU
#[derive(Clone)]
pub(crate) struct MockGpu {
    state: Rc<RefCell<MockState>>,
}

impl MockGpu {
    pub(crate) fn new(setup: MockSetup) -> Self {
        Self {
            state: Rc::new(RefCell::new(MockState {
                setup,
                ..MockState::default()
            })),
        }
    }

    pub(crate) fn entry(&self) -> MockEntry {
        MockEntry {
            state: Rc::clone(&self.state),
        }
    }

    pub(crate) fn live(&self, kind: &str) -> usize {
        self.state.borrow().live_count(kind)
    }

    pub(crate) fn total_live(&self) -> usize {
        self.state.borrow().live.values().map(HashSet::len).sum()
    }

    pub(crate) fn created(&self, kind: &str) -> usize {
        self.state.borrow().created.get(kind).copied().unwrap_or(0)
    }

    pub(crate) fn destroyed(&self, kind: &str) -> usize {
        self.state.borrow().destroyed.get(kind).copied().unwrap_or(0)
    }

    pub(crate) fn violations(&self) -> Vec<String> {
        self.state.borrow().violations.clone()
    }

    pub(crate) fn events(&self) -> Vec<String> {
        self.state.borrow().events.clone()
    }

    /// Forget recorded events, submissions and draws
    pub(crate) fn clear_events(&self) {
        let mut state = self.state.borrow_mut();
        state.events.clear();
        state.submits.clear();
        state.draws.clear();
        state.render_pass_begins.clear();
    }

    pub(crate) fn submits(&self) -> Vec<SubmitRecord> {
        self.state.borrow().submits.clone()
    }

    pub(crate) fn present_calls(&self) -> u32 {
        self.state.borrow().present_calls
    }

    pub(crate) fn descriptor_writes(&self) -> Vec<DescriptorWrite> {
        self.state.borrow().descriptor_writes.clone()
    }

    pub(crate) fn last_device(&self) -> Option<DeviceDesc> {
        self.state.borrow().last_device.clone()
    }

    pub(crate) fn last_swapchain(&self) -> Option<SwapchainDesc> {
        self.state.borrow().last_swapchain.clone()
    }

    pub(crate) fn last_render_pass(&self) -> Option<RenderPassDesc> {
        self.state.borrow().last_render_pass.clone()
    }

    pub(crate) fn last_pipeline(&self) -> Option<GraphicsPipelineDesc> {
        self.state.borrow().last_pipeline.clone()
    }

    pub(crate) fn set_layout_bindings(&self) -> Vec<Vec<vk::DescriptorSetLayoutBinding>> {
        self.state.borrow().set_layout_bindings.clone()
    }

    pub(crate) fn barriers(&self) -> Vec<ImageBarrier> {
        self.state.borrow().barriers.clone()
    }

    pub(crate) fn blits(&self) -> usize {
        self.state.borrow().blits
    }

    pub(crate) fn draws(&self) -> Vec<u32> {
        self.state.borrow().draws.clone()
    }

    pub(crate) fn render_pass_begins(&self) -> Vec<vk::Framebuffer> {
        self.state.borrow().render_pass_begins.clone()
    }

    pub(crate) fn memory_contents(&self, memory: vk::DeviceMemory) -> Vec<u8> {
        self.state
            .borrow()
            .memory
            .get(&memory.as_raw())
            .cloned()
            .unwrap_or_default()
    }

    /// Make the `call`-th acquire (1-based) return `result`
    pub(crate) fn script_acquire(&self, call: u32, result: vk::Result) {
        self.state.borrow_mut().acquire_script.insert(call, result);
    }

    /// Make the `call`-th present (1-based) return `result`
    pub(crate) fn script_present(&self, call: u32, result: vk::Result) {
        self.state.borrow_mut().present_script.insert(call, result);
    }

    /// Make an operation fail with `result` until cleared
    pub(crate) fn fail(&self, op: &'static str, result: vk::Result) {
        self.state.borrow_mut().failures.insert(op, result);
    }

    pub(crate) fn clear_failures(&self) {
        self.state.borrow_mut().failures.clear();
    }

    /// Report a defined current extent, as after a window resize on most platforms
    pub(crate) fn set_surface_extent(&self, extent: vk::Extent2D) {
        self.state.borrow_mut().surface_extent = Some(extent);
    }

    pub(crate) fn set_surface_formats(&self, formats: Vec<vk::SurfaceFormatKHR>) {
        self.state.borrow_mut().surface_formats = Some(formats);
    }

    pub(crate) fn return_null_queue(&self, family: u32) {
        self.state.borrow_mut().null_queue_family = Some(family);
    }

    /// Submitted work never completes
    pub(crate) fn stall(&self) {
        self.state.borrow_mut().stalled = true;
    }
}

pub(crate) struct MockEntry {
    state: Rc<RefCell<MockState>>,
}

impl GpuEntry for MockEntry {
    type Instance = MockInstance;
    type Device = MockDevice;

    fn instance_extension_names(&self) -> VkResult<Vec<String>> {
        Ok(self.state.borrow().setup.instance_extensions.clone())
    }

    fn instance_layer_names(&self) -> VkResult<Vec<String>> {
        Ok(self.state.borrow().setup.layers.clone())
    }

    fn create_instance(&self, desc: &InstanceDesc, _log: &Logger) -> VkResult<MockInstance> {
        let mut state = self.state.borrow_mut();
        state.fail("create_instance")?;
        if desc
            .extensions
            .iter()
            .any(|e| !state.setup.instance_extensions.contains(e))
        {
            return Err(vk::Result::ERROR_EXTENSION_NOT_PRESENT);
        }
        if desc.layers.iter().any(|l| !state.setup.layers.contains(l)) {
            return Err(vk::Result::ERROR_LAYER_NOT_PRESENT);
        }
        let handle = state.allocate("instance");
        Ok(MockInstance {
            state: Rc::clone(&self.state),
            handle,
        })
    }
}

#[derive(Clone)]
pub(crate) struct MockInstance {
    state: Rc<RefCell<MockState>>,
    handle: u64,
}

impl GpuInstance for MockInstance {
    type Device = MockDevice;

    fn create_surface(&self, _window: &dyn WindowSource) -> VkResult<vk::SurfaceKHR> {
        let mut state = self.state.borrow_mut();
        state.fail("create_surface")?;
        Ok(vk::SurfaceKHR::from_raw(state.allocate("surface")))
    }

    fn destroy_surface(&self, surface: vk::SurfaceKHR) {
        self.state.borrow_mut().release("surface", surface.as_raw());
    }

    fn enumerate_physical_devices(&self) -> VkResult<Vec<vk::PhysicalDevice>> {
        let count = self.state.borrow().setup.adapters.len() as u64;
        Ok((1..=count).map(vk::PhysicalDevice::from_raw).collect())
    }

    fn physical_device_properties(&self, device: vk::PhysicalDevice) -> vk::PhysicalDeviceProperties {
        let state = self.state.borrow();
        let adapter = state.adapter(device);
        let mut properties = vk::PhysicalDeviceProperties {
            device_type: vk::PhysicalDeviceType::DISCRETE_GPU,
            ..Default::default()
        };
        for (dst, src) in properties.device_name.iter_mut().zip(adapter.name.bytes().take(255)) {
            *dst = src as std::ffi::c_char;
        }
        properties.limits.max_sampler_anisotropy = 16.0;
        properties
    }

    fn physical_device_features(&self, device: vk::PhysicalDevice) -> vk::PhysicalDeviceFeatures {
        let state = self.state.borrow();
        vk::PhysicalDeviceFeatures {
            sampler_anisotropy: vk::Bool32::from(state.adapter(device).sampler_anisotropy),
            ..Default::default()
        }
    }

    fn queue_family_properties(&self, device: vk::PhysicalDevice) -> Vec<vk::QueueFamilyProperties> {
        let state = self.state.borrow();
        state
            .adapter(device)
            .queue_families
            .iter()
            .map(|&queue_flags| vk::QueueFamilyProperties {
                queue_flags,
                queue_count: 1,
                ..Default::default()
            })
            .collect()
    }

    fn device_extension_names(&self, device: vk::PhysicalDevice) -> VkResult<Vec<String>> {
        Ok(self.state.borrow().adapter(device).extensions.clone())
    }

    fn memory_properties(&self, device: vk::PhysicalDevice) -> vk::PhysicalDeviceMemoryProperties {
        let state = self.state.borrow();
        let types = &state.adapter(device).memory_types;
        let mut properties = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: types.len() as u32,
            memory_heap_count: 1,
            ..Default::default()
        };
        for (slot, &property_flags) in properties.memory_types.iter_mut().zip(types) {
            *slot = vk::MemoryType {
                property_flags,
                heap_index: 0,
            };
        }
        properties
    }

    fn format_properties(&self, device: vk::PhysicalDevice, format: vk::Format) -> vk::FormatProperties {
        let state = self.state.borrow();
        if state.adapter(device).unsupported_formats.contains(&format) {
            return vk::FormatProperties::default();
        }
        let features = vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT
            | vk::FormatFeatureFlags::SAMPLED_IMAGE
            | vk::FormatFeatureFlags::SAMPLED_IMAGE_FILTER_LINEAR
            | vk::FormatFeatureFlags::BLIT_SRC
            | vk::FormatFeatureFlags::BLIT_DST;
        vk::FormatProperties {
            linear_tiling_features: features,
            optimal_tiling_features: features,
            buffer_features: vk::FormatFeatureFlags::empty(),
        }
    }

    fn surface_support(&self, device: vk::PhysicalDevice, family: u32, _surface: vk::SurfaceKHR) -> VkResult<bool> {
        Ok(self.state.borrow().adapter(device).present_families.contains(&family))
    }

    fn surface_capabilities(
        &self,
        device: vk::PhysicalDevice,
        _surface: vk::SurfaceKHR,
    ) -> VkResult<vk::SurfaceCapabilitiesKHR> {
        let state = self.state.borrow();
        let mut capabilities = state.adapter(device).capabilities;
        if let Some(extent) = state.surface_extent {
            capabilities.current_extent = extent;
        }
        Ok(capabilities)
    }

    fn surface_formats(&self, device: vk::PhysicalDevice, _surface: vk::SurfaceKHR) -> VkResult<Vec<vk::SurfaceFormatKHR>> {
        let state = self.state.borrow();
        Ok(state
            .surface_formats
            .clone()
            .unwrap_or_else(|| state.adapter(device).formats.clone()))
    }

    fn surface_present_modes(
        &self,
        device: vk::PhysicalDevice,
        _surface: vk::SurfaceKHR,
    ) -> VkResult<Vec<vk::PresentModeKHR>> {
        Ok(self.state.borrow().adapter(device).present_modes.clone())
    }

    fn create_device(&self, physical_device: vk::PhysicalDevice, desc: &DeviceDesc) -> VkResult<MockDevice> {
        let mut state = self.state.borrow_mut();
        state.fail("create_device")?;
        let adapter = state.adapter(physical_device);
        if desc.extensions.iter().any(|e| !adapter.extensions.contains(e)) {
            return Err(vk::Result::ERROR_EXTENSION_NOT_PRESENT);
        }
        let family_count = adapter.queue_families.len() as u32;
        if desc.queue_families.iter().any(|&f| f >= family_count) {
            return Err(vk::Result::ERROR_INITIALIZATION_FAILED);
        }
        let handle = state.allocate("device");
        state.last_device = Some(desc.clone());
        Ok(MockDevice {
            state: Rc::clone(&self.state),
            handle,
        })
    }

    fn destroy_instance(&self) {
        let mut state = self.state.borrow_mut();
        for kind in ["surface", "device"] {
            let remaining = state.live_count(kind);
            if remaining > 0 {
                state
                    .violations
                    .push(format!("instance destroyed with {remaining} live {kind}"));
            }
        }
        state.release("instance", self.handle);
    }
}

#[derive(Clone)]
pub(crate) struct MockDevice {
    state: Rc<RefCell<MockState>>,
    handle: u64,
}

impl MockDevice {
    fn create<H: Handle>(&self, kind: &'static str, op: &'static str) -> VkResult<H> {
        let mut state = self.state.borrow_mut();
        state.fail(op)?;
        Ok(H::from_raw(state.allocate(kind)))
    }

    fn destroy<H: Handle>(&self, kind: &'static str, handle: H) {
        self.state.borrow_mut().release(kind, handle.as_raw());
    }
}

impl GpuDevice for MockDevice {
    fn handle(&self) -> vk::Device {
        vk::Device::from_raw(self.handle)
    }

    fn get_device_queue(&self, family: u32) -> vk::Queue {
        if self.state.borrow().null_queue_family == Some(family) {
            return vk::Queue::null();
        }
        vk::Queue::from_raw(0x1000 + u64::from(family))
    }

    fn device_wait_idle(&self) -> VkResult<()> {
        let mut state = self.state.borrow_mut();
        state.events.push("device_wait_idle".to_string());
        state.complete_until(None);
        Ok(())
    }

    fn queue_wait_idle(&self, _queue: vk::Queue) -> VkResult<()> {
        let mut state = self.state.borrow_mut();
        state.events.push("queue_wait_idle".to_string());
        state.complete_until(None);
        Ok(())
    }

    fn destroy_device(&self) {
        let mut state = self.state.borrow_mut();
        let leaked: Vec<String> = DEVICE_CHILDREN
            .iter()
            .filter_map(|&kind| {
                let count = state.live_count(kind);
                (count > 0).then(|| format!("{count} {kind}"))
            })
            .collect();
        if !leaked.is_empty() {
            state
                .violations
                .push(format!("device destroyed with live children: {}", leaked.join(", ")));
        }
        state.release("device", self.handle);
    }

    fn create_swapchain(&self, desc: &SwapchainDesc) -> VkResult<vk::SwapchainKHR> {
        let mut state = self.state.borrow_mut();
        state.fail("create_swapchain")?;
        let handle = state.allocate("swapchain");
        let images = (0..desc.min_image_count)
            .map(|i| vk::Image::from_raw(0x10_0000 + handle * 16 + u64::from(i)))
            .collect();
        state.swapchain_images.insert(handle, images);
        state.last_swapchain = Some(desc.clone());
        Ok(vk::SwapchainKHR::from_raw(handle))
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        let mut state = self.state.borrow_mut();
        state.swapchain_images.remove(&swapchain.as_raw());
        state.release("swapchain", swapchain.as_raw());
    }

    fn get_swapchain_images(&self, swapchain: vk::SwapchainKHR) -> VkResult<Vec<vk::Image>> {
        self.state
            .borrow()
            .swapchain_images
            .get(&swapchain.as_raw())
            .cloned()
            .ok_or(vk::Result::ERROR_SURFACE_LOST_KHR)
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        _timeout: u64,
        _semaphore: vk::Semaphore,
    ) -> VkResult<(u32, bool)> {
        let mut state = self.state.borrow_mut();
        state.acquire_calls += 1;
        state.events.push("acquire".to_string());
        let scripted = state.acquire_script.get(&state.acquire_calls).copied();
        let suboptimal = match scripted {
            Some(vk::Result::SUBOPTIMAL_KHR) => true,
            Some(result) => return Err(result),
            None => false,
        };
        let count = state
            .swapchain_images
            .get(&swapchain.as_raw())
            .map_or(0, Vec::len) as u32;
        if count == 0 {
            return Err(vk::Result::ERROR_SURFACE_LOST_KHR);
        }
        let index = state.next_image % count;
        state.next_image += 1;
        Ok((index, suboptimal))
    }

    fn queue_present(
        &self,
        _queue: vk::Queue,
        _swapchain: vk::SwapchainKHR,
        _image_index: u32,
        _wait_semaphore: vk::Semaphore,
    ) -> VkResult<bool> {
        let mut state = self.state.borrow_mut();
        state.present_calls += 1;
        state.events.push("present".to_string());
        match state.present_script.get(&state.present_calls).copied() {
            Some(vk::Result::SUBOPTIMAL_KHR) => Ok(true),
            Some(result) => Err(result),
            None => Ok(false),
        }
    }

    fn create_image_view(&self, _info: &vk::ImageViewCreateInfo) -> VkResult<vk::ImageView> {
        self.create("image_view", "create_image_view")
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        self.destroy("image_view", view);
    }

    fn create_image(&self, info: &vk::ImageCreateInfo) -> VkResult<vk::Image> {
        let image: vk::Image = self.create("image", "create_image")?;
        let size = u64::from(info.extent.width) * u64::from(info.extent.height) * 4 * 2;
        self.state.borrow_mut().image_sizes.insert(image.as_raw(), size);
        Ok(image)
    }

    fn destroy_image(&self, image: vk::Image) {
        self.destroy("image", image);
    }

    fn image_memory_requirements(&self, image: vk::Image) -> vk::MemoryRequirements {
        let state = self.state.borrow();
        vk::MemoryRequirements {
            size: state.image_sizes.get(&image.as_raw()).copied().unwrap_or(256),
            alignment: 256,
            memory_type_bits: u32::MAX,
        }
    }

    fn bind_image_memory(&self, _image: vk::Image, _memory: vk::DeviceMemory) -> VkResult<()> {
        self.state.borrow_mut().fail("bind_image_memory")
    }

    fn create_sampler(&self, _info: &vk::SamplerCreateInfo) -> VkResult<vk::Sampler> {
        self.create("sampler", "create_sampler")
    }

    fn destroy_sampler(&self, sampler: vk::Sampler) {
        self.destroy("sampler", sampler);
    }

    fn create_buffer(&self, info: &vk::BufferCreateInfo) -> VkResult<vk::Buffer> {
        let buffer: vk::Buffer = self.create("buffer", "create_buffer")?;
        let mut state = self.state.borrow_mut();
        if info.size == 0 {
            state.violations.push(format!("buffer {:#x} created with size 0", buffer.as_raw()));
        }
        state.buffer_sizes.insert(buffer.as_raw(), info.size);
        Ok(buffer)
    }

    fn destroy_buffer(&self, buffer: vk::Buffer) {
        self.destroy("buffer", buffer);
    }

    fn buffer_memory_requirements(&self, buffer: vk::Buffer) -> vk::MemoryRequirements {
        let state = self.state.borrow();
        vk::MemoryRequirements {
            size: state.buffer_sizes.get(&buffer.as_raw()).copied().unwrap_or(256),
            alignment: 256,
            memory_type_bits: u32::MAX,
        }
    }

    fn bind_buffer_memory(&self, _buffer: vk::Buffer, _memory: vk::DeviceMemory) -> VkResult<()> {
        self.state.borrow_mut().fail("bind_buffer_memory")
    }

    fn allocate_memory(&self, size: vk::DeviceSize, _memory_type_index: u32) -> VkResult<vk::DeviceMemory> {
        let memory: vk::DeviceMemory = self.create("memory", "allocate_memory")?;
        let len = usize::try_from(size).map_err(|_| vk::Result::ERROR_OUT_OF_DEVICE_MEMORY)?;
        self.state.borrow_mut().memory.insert(memory.as_raw(), vec![0; len]);
        Ok(memory)
    }

    fn free_memory(&self, memory: vk::DeviceMemory) {
        let mut state = self.state.borrow_mut();
        if state.live.get("mapping").is_some_and(|set| set.contains(&memory.as_raw())) {
            state
                .violations
                .push(format!("memory {:#x} freed while still mapped", memory.as_raw()));
        }
        state.memory.remove(&memory.as_raw());
        state.release("memory", memory.as_raw());
    }

    fn map_memory(
        &self,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
        _size: vk::DeviceSize,
    ) -> VkResult<*mut c_void> {
        let mut state = self.state.borrow_mut();
        state.fail("map_memory")?;
        let offset = usize::try_from(offset).map_err(|_| vk::Result::ERROR_MEMORY_MAP_FAILED)?;
        let ptr = state
            .memory
            .get_mut(&memory.as_raw())
            .filter(|bytes| offset <= bytes.len())
            // The Vec is never resized while allocated, so the pointer stays valid
            .map(|bytes| bytes[offset..].as_mut_ptr().cast::<c_void>())
            .ok_or(vk::Result::ERROR_MEMORY_MAP_FAILED)?;
        state.live.entry("mapping").or_default().insert(memory.as_raw());
        Ok(ptr)
    }

    fn unmap_memory(&self, memory: vk::DeviceMemory) {
        let mut state = self.state.borrow_mut();
        if !state.live.get_mut("mapping").is_some_and(|set| set.remove(&memory.as_raw())) {
            state
                .violations
                .push(format!("unmap of memory {:#x} that is not mapped", memory.as_raw()));
        }
    }

    fn create_render_pass(&self, desc: &RenderPassDesc) -> VkResult<vk::RenderPass> {
        let render_pass = self.create("render_pass", "create_render_pass")?;
        self.state.borrow_mut().last_render_pass = Some(desc.clone());
        Ok(render_pass)
    }

    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        self.destroy("render_pass", render_pass);
    }

    fn create_descriptor_set_layout(
        &self,
        bindings: &[vk::DescriptorSetLayoutBinding],
    ) -> VkResult<vk::DescriptorSetLayout> {
        let layout = self.create("descriptor_set_layout", "create_descriptor_set_layout")?;
        self.state.borrow_mut().set_layout_bindings.push(bindings.to_vec());
        Ok(layout)
    }

    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        self.destroy("descriptor_set_layout", layout);
    }

    fn create_pipeline_layout(&self, _set_layouts: &[vk::DescriptorSetLayout]) -> VkResult<vk::PipelineLayout> {
        self.create("pipeline_layout", "create_pipeline_layout")
    }

    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        self.destroy("pipeline_layout", layout);
    }

    fn create_shader_module(&self, code: &[u32]) -> VkResult<vk::ShaderModule> {
        if code.is_empty() {
            return Err(vk::Result::ERROR_INVALID_SHADER_NV);
        }
        self.create("shader_module", "create_shader_module")
    }

    fn destroy_shader_module(&self, module: vk::ShaderModule) {
        self.destroy("shader_module", module);
    }

    fn create_graphics_pipeline(&self, desc: &GraphicsPipelineDesc) -> VkResult<vk::Pipeline> {
        let pipeline = self.create("pipeline", "create_graphics_pipeline")?;
        self.state.borrow_mut().last_pipeline = Some(desc.clone());
        Ok(pipeline)
    }

    fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        self.destroy("pipeline", pipeline);
    }

    fn create_framebuffer(&self, _desc: &FramebufferDesc) -> VkResult<vk::Framebuffer> {
        self.create("framebuffer", "create_framebuffer")
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        self.destroy("framebuffer", framebuffer);
    }

    fn create_descriptor_pool(
        &self,
        _max_sets: u32,
        _pool_sizes: &[vk::DescriptorPoolSize],
    ) -> VkResult<vk::DescriptorPool> {
        self.create("descriptor_pool", "create_descriptor_pool")
    }

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        self.destroy("descriptor_pool", pool);
    }

    fn allocate_descriptor_sets(
        &self,
        _pool: vk::DescriptorPool,
        layouts: &[vk::DescriptorSetLayout],
    ) -> VkResult<Vec<vk::DescriptorSet>> {
        let mut state = self.state.borrow_mut();
        state.fail("allocate_descriptor_sets")?;
        Ok(layouts
            .iter()
            .map(|_| {
                state.next_handle += 1;
                vk::DescriptorSet::from_raw(state.next_handle)
            })
            .collect())
    }

    fn update_descriptor_sets(&self, writes: &[DescriptorWrite]) {
        self.state.borrow_mut().descriptor_writes.extend_from_slice(writes);
    }

    fn create_command_pool(&self, _family: u32) -> VkResult<vk::CommandPool> {
        self.create("command_pool", "create_command_pool")
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        self.destroy("command_pool", pool);
    }

    fn allocate_command_buffers(&self, _pool: vk::CommandPool, count: u32) -> VkResult<Vec<vk::CommandBuffer>> {
        let mut state = self.state.borrow_mut();
        state.fail("allocate_command_buffers")?;
        Ok((0..count)
            .map(|_| {
                state.next_handle += 1;
                vk::CommandBuffer::from_raw(state.next_handle)
            })
            .collect())
    }

    fn free_command_buffers(&self, _pool: vk::CommandPool, buffers: &[vk::CommandBuffer]) {
        let mut state = self.state.borrow_mut();
        for &buffer in buffers {
            state.check_idle_buffer(buffer, "free");
        }
    }

    fn reset_command_buffer(&self, buffer: vk::CommandBuffer) -> VkResult<()> {
        let mut state = self.state.borrow_mut();
        state.events.push("reset_command_buffer".to_string());
        state.check_idle_buffer(buffer, "reset");
        Ok(())
    }

    fn begin_command_buffer(&self, buffer: vk::CommandBuffer, _one_time_submit: bool) -> VkResult<()> {
        let mut state = self.state.borrow_mut();
        state.events.push("begin_command_buffer".to_string());
        state.check_idle_buffer(buffer, "begin");
        Ok(())
    }

    fn end_command_buffer(&self, _buffer: vk::CommandBuffer) -> VkResult<()> {
        self.state.borrow_mut().events.push("end_command_buffer".to_string());
        Ok(())
    }

    fn cmd_begin_render_pass(
        &self,
        _buffer: vk::CommandBuffer,
        _render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        _extent: vk::Extent2D,
        _clear_values: &[vk::ClearValue],
    ) {
        let mut state = self.state.borrow_mut();
        state.events.push("begin_render_pass".to_string());
        state.render_pass_begins.push(framebuffer);
    }

    fn cmd_end_render_pass(&self, _buffer: vk::CommandBuffer) {
        self.state.borrow_mut().events.push("end_render_pass".to_string());
    }

    fn cmd_bind_pipeline(&self, _buffer: vk::CommandBuffer, _pipeline: vk::Pipeline) {}

    fn cmd_set_viewport(&self, _buffer: vk::CommandBuffer, _viewport: vk::Viewport) {}

    fn cmd_set_scissor(&self, _buffer: vk::CommandBuffer, _scissor: vk::Rect2D) {}

    fn cmd_bind_vertex_buffer(&self, _buffer: vk::CommandBuffer, _vertex_buffer: vk::Buffer) {}

    fn cmd_bind_index_buffer(&self, _buffer: vk::CommandBuffer, _index_buffer: vk::Buffer) {}

    fn cmd_bind_descriptor_set(&self, _buffer: vk::CommandBuffer, _layout: vk::PipelineLayout, set: vk::DescriptorSet) {
        self.state
            .borrow_mut()
            .events
            .push(format!("bind_descriptor_set:{:#x}", set.as_raw()));
    }

    fn cmd_draw_indexed(&self, _buffer: vk::CommandBuffer, index_count: u32) {
        self.state.borrow_mut().draws.push(index_count);
    }

    fn cmd_copy_buffer(&self, _buffer: vk::CommandBuffer, _src: vk::Buffer, _dst: vk::Buffer, _size: vk::DeviceSize) {
        self.state.borrow_mut().events.push("copy_buffer".to_string());
    }

    fn cmd_copy_buffer_to_image(&self, _buffer: vk::CommandBuffer, _src: vk::Buffer, _image: vk::Image, _extent: vk::Extent3D) {
        self.state.borrow_mut().events.push("copy_buffer_to_image".to_string());
    }

    fn cmd_image_barrier(&self, _buffer: vk::CommandBuffer, barrier: &ImageBarrier) {
        self.state.borrow_mut().barriers.push(*barrier);
    }

    fn cmd_blit_image(&self, _buffer: vk::CommandBuffer, _image: vk::Image, _region: vk::ImageBlit) {
        self.state.borrow_mut().blits += 1;
    }

    fn create_semaphore(&self) -> VkResult<vk::Semaphore> {
        self.create("semaphore", "create_semaphore")
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        self.destroy("semaphore", semaphore);
    }

    fn create_fence(&self, signaled: bool) -> VkResult<vk::Fence> {
        let fence: vk::Fence = self.create("fence", "create_fence")?;
        self.state.borrow_mut().fences.insert(fence.as_raw(), signaled);
        Ok(fence)
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        let mut state = self.state.borrow_mut();
        if state.pending.iter().any(|&(f, _)| f == fence.as_raw()) {
            state.violations.push(format!("fence {:#x} destroyed while in use", fence.as_raw()));
        }
        state.fences.remove(&fence.as_raw());
        state.release("fence", fence.as_raw());
    }

    fn wait_for_fence(&self, fence: vk::Fence, timeout: u64) -> VkResult<()> {
        let mut state = self.state.borrow_mut();
        state.events.push("wait_fence".to_string());
        let raw = fence.as_raw();
        if state.fences.get(&raw).copied().unwrap_or(false) {
            return Ok(());
        }
        let pending = state.pending.iter().any(|&(f, _)| f == raw);
        if !pending {
            state
                .violations
                .push(format!("wait on fence {raw:#x} that nothing will signal"));
            return Err(vk::Result::TIMEOUT);
        }
        if state.stalled {
            if timeout == u64::MAX {
                state.violations.push("unbounded wait on a stalled GPU".to_string());
                return Err(vk::Result::ERROR_DEVICE_LOST);
            }
            return Err(vk::Result::TIMEOUT);
        }
        state.complete_until(Some(raw));
        Ok(())
    }

    fn reset_fence(&self, fence: vk::Fence) -> VkResult<()> {
        let mut state = self.state.borrow_mut();
        state.events.push("reset_fence".to_string());
        let raw = fence.as_raw();
        if !state.fences.get(&raw).copied().unwrap_or(false) {
            state.violations.push(format!("reset of unsignaled fence {raw:#x}"));
        }
        state.fences.insert(raw, false);
        Ok(())
    }

    fn queue_submit(&self, queue: vk::Queue, submit: &SubmitDesc) -> VkResult<()> {
        let mut state = self.state.borrow_mut();
        state.fail("queue_submit")?;
        state.events.push("submit".to_string());
        if queue == vk::Queue::null() {
            state.violations.push("submit to a null queue".to_string());
        }
        state.check_idle_buffer(submit.command_buffer, "submit");
        let fence = submit.fence.as_raw();
        if fence != 0 && state.fences.get(&fence).copied().unwrap_or(false) {
            state.violations.push(format!("submit with already signaled fence {fence:#x}"));
        }
        state.pending.push_back((fence, submit.command_buffer.as_raw()));
        state.busy_command_buffers.insert(submit.command_buffer.as_raw());
        state.submits.push(SubmitRecord {
            command_buffer: submit.command_buffer,
            fence: submit.fence,
            wait: submit.wait,
            signal: submit.signal,
        });
        Ok(())
    }
}
