//! Swapchain management
//!
//! [`SwapchainManager`] owns the presentable image chain and one view per
//! image. It is destroyed and rebuilt in place when presentation goes stale.

use ash::vk;

use super::backend::{GpuDevice, GpuEntry, SwapchainDesc};
use super::device_context::DeviceContext;
use super::error::{RenderError, RenderResult};
use crate::config::RendererConfig;
use crate::foundation::logging::Logger;

/// Format, present-mode preferences applied on every (re)build
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainPreferences {
    /// Format/color-space pair picked when the surface offers it
    pub surface_format: vk::SurfaceFormatKHR,
    /// Use MAILBOX when available
    pub prefer_mailbox: bool,
}

impl SwapchainPreferences {
    /// Preferences from configuration
    pub fn from_config(config: &RendererConfig) -> Self {
        Self {
            surface_format: config.preferred_surface_format.to_vk(),
            prefer_mailbox: config.prefer_mailbox,
        }
    }
}

/// Preferred format if offered, otherwise the first one listed
pub fn choose_surface_format(
    formats: &[vk::SurfaceFormatKHR],
    preferred: vk::SurfaceFormatKHR,
) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .copied()
        .find(|f| f.format == preferred.format && f.color_space == preferred.color_space)
        .or_else(|| formats.first().copied())
}

/// MAILBOX when offered and preferred, otherwise FIFO
pub fn choose_present_mode(modes: &[vk::PresentModeKHR], prefer_mailbox: bool) -> vk::PresentModeKHR {
    if prefer_mailbox && modes.contains(&vk::PresentModeKHR::MAILBOX) {
        vk::PresentModeKHR::MAILBOX
    } else {
        // FIFO is the only mode every implementation must support
        vk::PresentModeKHR::FIFO
    }
}

/// Surface-defined extent, or the window size clamped to the surface limits
pub fn choose_extent(capabilities: &vk::SurfaceCapabilitiesKHR, window_size: (u32, u32)) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }
    let (width, height) = window_size;
    let min = capabilities.min_image_extent;
    let max = capabilities.max_image_extent;
    vk::Extent2D {
        width: width.max(min.width).min(max.width),
        height: height.max(min.height).min(max.height),
    }
}

/// One more than the minimum, capped by a nonzero maximum
pub fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let desired = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 {
        desired.min(capabilities.max_image_count)
    } else {
        desired
    }
}

/// Presentable image chain and its views
pub struct SwapchainManager<D: GpuDevice> {
    device: D,
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    format: vk::SurfaceFormatKHR,
    present_mode: vk::PresentModeKHR,
    extent: vk::Extent2D,
    preferences: SwapchainPreferences,
    log: Logger,
}

impl<D: GpuDevice> SwapchainManager<D> {
    /// Build the chain and its views for the given window size
    pub fn create<E: GpuEntry<Device = D>>(
        context: &DeviceContext<E>,
        window_size: (u32, u32),
        preferences: SwapchainPreferences,
    ) -> RenderResult<Self> {
        let log = context.log().clone();
        let support = context.query_swapchain_support()?;

        let format = choose_surface_format(&support.formats, preferences.surface_format).ok_or_else(|| {
            RenderError::SwapchainCreation {
                reason: "surface reports no formats".to_string(),
            }
        })?;
        let present_mode = choose_present_mode(&support.present_modes, preferences.prefer_mailbox);
        let extent = choose_extent(&support.capabilities, window_size);
        let image_count = choose_image_count(&support.capabilities);

        let families = context.queue_families();
        let queue_family_indices = if families.is_split() {
            vec![families.graphics, families.present]
        } else {
            vec![families.graphics]
        };

        let desc = SwapchainDesc {
            surface: context.surface(),
            min_image_count: image_count,
            format,
            extent,
            present_mode,
            pre_transform: support.capabilities.current_transform,
            queue_family_indices,
            old_swapchain: vk::SwapchainKHR::null(),
        };

        let device = context.device().clone();
        let swapchain = device.create_swapchain(&desc).map_err(|e| {
            log.error(format!("vkCreateSwapchainKHR failed: {e:?}"));
            RenderError::SwapchainCreation {
                reason: format!("vkCreateSwapchainKHR failed: {e:?}"),
            }
        })?;

        let mut manager = Self {
            device,
            swapchain,
            images: Vec::new(),
            image_views: Vec::new(),
            format,
            present_mode,
            extent,
            preferences,
            log,
        };

        manager.images = manager
            .device
            .get_swapchain_images(swapchain)
            .map_err(|e| RenderError::SwapchainCreation {
                reason: format!("failed to get swapchain images: {e:?}"),
            })?;
        manager.create_image_views()?;

        manager.log.info(format!(
            "Swapchain created: {}x{}, {} images, {:?}, {:?}",
            extent.width,
            extent.height,
            manager.images.len(),
            format.format,
            present_mode
        ));
        Ok(manager)
    }

    /// One 2D color view per swapchain image
    pub fn create_image_views(&mut self) -> RenderResult<()> {
        for &image in &self.images {
            let info = vk::ImageViewCreateInfo::builder()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(self.format.format)
                .components(vk::ComponentMapping::default())
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                })
                .build();
            let view = self.device.create_image_view(&info).map_err(RenderError::ImageViewCreation)?;
            self.image_views.push(view);
        }
        Ok(())
    }

    /// Wait for the device, tear down, and rebuild for a new window size
    pub fn recreate<E: GpuEntry<Device = D>>(
        &mut self,
        context: &DeviceContext<E>,
        window_size: (u32, u32),
    ) -> RenderResult<()> {
        context.wait_idle()?;
        self.destroy();
        *self = Self::create(context, window_size, self.preferences)?;
        Ok(())
    }

    /// Destroy views, then the chain; safe to call twice
    pub fn destroy(&mut self) {
        for view in self.image_views.drain(..) {
            self.device.destroy_image_view(view);
        }
        self.images.clear();
        if self.swapchain != vk::SwapchainKHR::null() {
            self.device.destroy_swapchain(self.swapchain);
            self.swapchain = vk::SwapchainKHR::null();
            self.log.debug("Swapchain destroyed");
        }
    }

    /// Swapchain handle
    pub fn handle(&self) -> vk::SwapchainKHR {
        self.swapchain
    }

    /// Chosen format and color space
    pub fn format(&self) -> vk::SurfaceFormatKHR {
        self.format
    }

    /// Chosen present mode
    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    /// Image extent
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Swapchain images
    pub fn images(&self) -> &[vk::Image] {
        &self.images
    }

    /// One view per image
    pub fn image_views(&self) -> &[vk::ImageView] {
        &self.image_views
    }

    /// Number of images
    pub fn image_count(&self) -> usize {
        self.images.len()
    }
}

impl<D: GpuDevice> Drop for SwapchainManager<D> {
    fn drop(&mut self) {
        self.destroy();
    }
}
