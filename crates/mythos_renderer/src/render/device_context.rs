//! Device context: instance, surface, adapter, logical device and queues
//!
//! Construction runs four steps in order: [`DeviceContext::create_instance`],
//! [`DeviceContext::create_surface`], [`DeviceContext::select_physical_device`]
//! and [`DeviceContext::create_logical_device`]. Each step registers its
//! release on a [`TeardownStack`], so a failure part-way through releases
//! exactly what was created before it.
//!
//! Adapter and queue-family selection is first-match: the first adapter that
//! meets every requirement wins, and the first family with the needed
//! capability is used even when a dedicated present family exists. This is a
//! deliberate simplification, not a scored selection.

use std::collections::BTreeSet;

use ash::vk;

use super::backend::vulkan::name_from_chars;
use super::backend::{DeviceDesc, GpuDevice, GpuEntry, GpuInstance, InstanceDesc};
use super::error::{RenderError, RenderResult};
use super::frame::memory::find_memory_type;
use super::teardown::TeardownStack;
use crate::config::RendererConfig;
use crate::foundation::logging::Logger;
use crate::platform::WindowSource;

/// Device extension every adapter must support
pub const SWAPCHAIN_EXTENSION: &str = "VK_KHR_swapchain";

/// Instance extension added when validation is enabled
pub const DEBUG_UTILS_EXTENSION: &str = "VK_EXT_debug_utils";

/// Depth formats in order of preference
pub const DEPTH_FORMAT_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

/// Queue family indices resolved for an adapter
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    /// First family with graphics capability
    pub graphics: Option<u32>,
    /// First family able to present to the surface
    pub present: Option<u32>,
}

impl QueueFamilyIndices {
    /// Both families resolved
    pub fn is_complete(&self) -> bool {
        self.graphics.is_some() && self.present.is_some()
    }

    /// Resolved pair, if complete
    pub fn resolved(&self) -> Option<QueueFamilies> {
        Some(QueueFamilies {
            graphics: self.graphics?,
            present: self.present?,
        })
    }
}

/// Resolved queue families of the selected adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilies {
    /// Graphics family
    pub graphics: u32,
    /// Present family, possibly equal to graphics
    pub present: u32,
}

impl QueueFamilies {
    /// Distinct family indices, ascending
    pub fn unique(&self) -> Vec<u32> {
        BTreeSet::from([self.graphics, self.present]).into_iter().collect()
    }

    /// Whether graphics and present use different families
    pub fn is_split(&self) -> bool {
        self.graphics != self.present
    }
}

/// Surface capabilities, formats and present modes for one adapter
#[derive(Debug, Clone, Default)]
pub struct SwapchainSupport {
    /// Surface capabilities
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    /// Supported surface formats
    pub formats: Vec<vk::SurfaceFormatKHR>,
    /// Supported present modes
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupport {
    /// At least one format and one present mode
    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }
}

/// What an adapter offers, gathered during selection
#[derive(Debug, Clone)]
pub struct AdapterReport {
    /// Adapter handle
    pub handle: vk::PhysicalDevice,
    /// Device name
    pub name: String,
    /// Resolved queue families
    pub queue_families: QueueFamilyIndices,
    /// Supported device extensions
    pub extensions: Vec<String>,
    /// Surface support
    pub swapchain_support: SwapchainSupport,
    /// `samplerAnisotropy` feature
    pub supports_anisotropy: bool,
}

/// Requirements an adapter must meet
#[derive(Debug, Clone)]
pub struct DeviceRequirements {
    /// Device extensions that must be present
    pub extensions: Vec<String>,
    /// Require anisotropic sampling
    pub anisotropy: bool,
}

impl DeviceRequirements {
    /// Requirements derived from configuration
    pub fn from_config(config: &RendererConfig) -> Self {
        Self {
            extensions: vec![SWAPCHAIN_EXTENSION.to_string()],
            anisotropy: config.require_anisotropy && config.enable_texture,
        }
    }
}

/// Names from `required` missing in `available`
pub fn missing_names(available: &[String], required: &[String]) -> Vec<String> {
    required
        .iter()
        .filter(|name| !available.contains(name))
        .cloned()
        .collect()
}

/// Why an adapter is rejected, or `None` if it qualifies
pub fn unsuitability(report: &AdapterReport, requirements: &DeviceRequirements) -> Option<String> {
    if !report.queue_families.is_complete() {
        return Some(format!("queue families unresolved ({:?})", report.queue_families));
    }
    let missing = missing_names(&report.extensions, &requirements.extensions);
    if !missing.is_empty() {
        return Some(format!("missing device extensions: {}", missing.join(", ")));
    }
    if !report.swapchain_support.is_adequate() {
        return Some("no surface formats or present modes".to_string());
    }
    if requirements.anisotropy && !report.supports_anisotropy {
        return Some("anisotropic sampling unsupported".to_string());
    }
    None
}

/// Whether an adapter meets every requirement
pub fn is_device_suitable(report: &AdapterReport, requirements: &DeviceRequirements) -> bool {
    unsuitability(report, requirements).is_none()
}

/// Index of the first suitable adapter
pub fn select_first_suitable(reports: &[AdapterReport], requirements: &DeviceRequirements) -> Option<usize> {
    reports.iter().position(|report| is_device_suitable(report, requirements))
}

/// Extension and layer lists kept for diagnostics
#[derive(Debug, Clone, Default)]
pub struct InstanceDiagnostics {
    /// Instance extensions the loader offers
    pub available_extensions: Vec<String>,
    /// Instance extensions the renderer enabled
    pub required_extensions: Vec<String>,
    /// Layers the loader offers
    pub available_layers: Vec<String>,
    /// Layers the renderer enabled
    pub enabled_layers: Vec<String>,
}

/// The selected adapter
#[derive(Debug, Clone)]
pub struct PhysicalDeviceInfo {
    /// Adapter handle
    pub handle: vk::PhysicalDevice,
    /// Device name
    pub name: String,
    /// Properties and limits
    pub properties: vk::PhysicalDeviceProperties,
    /// Memory heaps and types
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    /// Resolved queue families
    pub queue_families: QueueFamilies,
    /// Anisotropic sampling is enabled on the logical device
    pub anisotropy_enabled: bool,
}

/// Owner of the instance, surface, logical device and queues
pub struct DeviceContext<E: GpuEntry> {
    instance: E::Instance,
    surface: vk::SurfaceKHR,
    physical: PhysicalDeviceInfo,
    device: E::Device,
    graphics_queue: vk::Queue,
    present_queue: vk::Queue,
    diagnostics: InstanceDiagnostics,
    validation_layers: Vec<String>,
    log: Logger,
}

impl<E: GpuEntry> DeviceContext<E> {
    /// Run every construction step, releasing partial state on failure
    pub fn new(entry: &E, window: &dyn WindowSource, config: &RendererConfig, log: &Logger) -> RenderResult<Self> {
        let mut teardown = TeardownStack::new(log);

        let (instance, diagnostics) = Self::create_instance(entry, window, config, log)?;
        let owned = instance.clone();
        teardown.push("instance", move || owned.destroy_instance());

        let surface = Self::create_surface(&instance, window, log)?;
        let owned = instance.clone();
        teardown.push("surface", move || owned.destroy_surface(surface));

        let requirements = DeviceRequirements::from_config(config);
        let physical = Self::select_physical_device(&instance, surface, &requirements, log)?;

        let (device, graphics_queue, present_queue) =
            Self::create_logical_device(&instance, &physical, &diagnostics.enabled_layers, log)?;

        teardown.disarm();

        Ok(Self {
            instance,
            surface,
            physical,
            device,
            graphics_queue,
            present_queue,
            validation_layers: diagnostics.enabled_layers.clone(),
            diagnostics,
            log: log.clone(),
        })
    }

    /// Verify required extensions and layers, then create the instance
    pub fn create_instance(
        entry: &E,
        window: &dyn WindowSource,
        config: &RendererConfig,
        log: &Logger,
    ) -> RenderResult<(E::Instance, InstanceDiagnostics)> {
        let available_extensions = entry.instance_extension_names().map_err(|e| RenderError::InstanceCreation {
            reason: format!("Failed to enumerate instance extensions: {e:?}"),
        })?;
        let available_layers = entry.instance_layer_names().map_err(|e| RenderError::InstanceCreation {
            reason: format!("Failed to enumerate instance layers: {e:?}"),
        })?;
        log.debug(format!("Available instance extensions: {}", available_extensions.join(", ")));
        log.debug(format!("Available instance layers: {}", available_layers.join(", ")));

        let validation = config.validation_enabled();
        let mut required_extensions = window.required_instance_extensions();
        if validation && !required_extensions.iter().any(|e| e == DEBUG_UTILS_EXTENSION) {
            required_extensions.push(DEBUG_UTILS_EXTENSION.to_string());
        }
        let enabled_layers = if validation {
            config.validation_layers.clone()
        } else {
            Vec::new()
        };

        let missing = missing_names(&available_extensions, &required_extensions);
        if !missing.is_empty() {
            log.error(format!("Missing required instance extensions: {}", missing.join(", ")));
            return Err(RenderError::InstanceCreation {
                reason: format!("missing required instance extensions: {}", missing.join(", ")),
            });
        }

        let missing = missing_names(&available_layers, &enabled_layers);
        if !missing.is_empty() {
            log.error(format!("Missing requested layers: {}", missing.join(", ")));
            return Err(RenderError::InstanceCreation {
                reason: format!("missing requested layers: {}", missing.join(", ")),
            });
        }

        let desc = InstanceDesc {
            application_name: config.application_name.clone(),
            application_version: config.application_version,
            extensions: required_extensions.clone(),
            layers: enabled_layers.clone(),
            debug_messenger: validation,
        };

        let instance = entry.create_instance(&desc, log).map_err(|e| {
            log.error(format!("vkCreateInstance failed: {e:?}"));
            RenderError::InstanceCreation {
                reason: format!("vkCreateInstance failed: {e:?}"),
            }
        })?;

        log.info(format!(
            "Vulkan instance created ({} extensions, {} layers, validation {})",
            required_extensions.len(),
            enabled_layers.len(),
            if validation { "on" } else { "off" }
        ));

        Ok((
            instance,
            InstanceDiagnostics {
                available_extensions,
                required_extensions,
                available_layers,
                enabled_layers,
            },
        ))
    }

    /// Create the presentation surface through the platform accessor
    pub fn create_surface(instance: &E::Instance, window: &dyn WindowSource, log: &Logger) -> RenderResult<vk::SurfaceKHR> {
        let surface = instance.create_surface(window).map_err(|e| {
            log.error(format!("Surface creation failed: {e:?}"));
            RenderError::SurfaceCreation(e)
        })?;
        log.info("Presentation surface created");
        Ok(surface)
    }

    /// Gather what an adapter offers for this surface
    pub fn inspect_adapter(
        instance: &E::Instance,
        handle: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
        log: &Logger,
    ) -> AdapterReport {
        let properties = instance.physical_device_properties(handle);
        let name = name_from_chars(&properties.device_name);

        let families = instance.queue_family_properties(handle);
        let graphics = families
            .iter()
            .position(|family| family.queue_count > 0 && family.queue_flags.contains(vk::QueueFlags::GRAPHICS))
            .and_then(|index| u32::try_from(index).ok());
        let present = (0..families.len())
            .filter_map(|index| u32::try_from(index).ok())
            .find(|&index| match instance.surface_support(handle, index, surface) {
                Ok(supported) => supported,
                Err(e) => {
                    log.warn(format!("{name}: surface support query for family {index} failed: {e:?}"));
                    false
                }
            });

        let extensions = instance.device_extension_names(handle).unwrap_or_else(|e| {
            log.warn(format!("{name}: extension enumeration failed: {e:?}"));
            Vec::new()
        });

        let swapchain_support = query_support::<E::Instance>(instance, handle, surface).unwrap_or_else(|e| {
            log.warn(format!("{name}: swapchain support query failed: {e:?}"));
            SwapchainSupport::default()
        });

        AdapterReport {
            handle,
            name,
            queue_families: QueueFamilyIndices { graphics, present },
            extensions,
            swapchain_support,
            supports_anisotropy: instance.physical_device_features(handle).sampler_anisotropy == vk::TRUE,
        }
    }

    /// Pick the first adapter meeting every requirement
    pub fn select_physical_device(
        instance: &E::Instance,
        surface: vk::SurfaceKHR,
        requirements: &DeviceRequirements,
        log: &Logger,
    ) -> RenderResult<PhysicalDeviceInfo> {
        let handles = instance.enumerate_physical_devices().map_err(|e| {
            log.error(format!("Physical device enumeration failed: {e:?}"));
            RenderError::NoSuitableDevice
        })?;
        log.info(format!("Found {} physical device(s)", handles.len()));

        for handle in handles {
            let report = Self::inspect_adapter(instance, handle, surface, log);
            if let Some(reason) = unsuitability(&report, requirements) {
                log.info(format!("Skipping {}: {reason}", report.name));
                continue;
            }

            let Some(queue_families) = report.queue_families.resolved() else {
                continue;
            };
            log.info(format!(
                "Selected physical device {} (graphics family {}, present family {})",
                report.name, queue_families.graphics, queue_families.present
            ));

            return Ok(PhysicalDeviceInfo {
                handle,
                name: report.name,
                properties: instance.physical_device_properties(handle),
                memory_properties: instance.memory_properties(handle),
                queue_families,
                anisotropy_enabled: report.supports_anisotropy,
            });
        }

        log.error("No physical device satisfies the renderer's requirements");
        Err(RenderError::NoSuitableDevice)
    }

    /// Create the logical device and fetch its queues
    pub fn create_logical_device(
        instance: &E::Instance,
        physical: &PhysicalDeviceInfo,
        layers: &[String],
        log: &Logger,
    ) -> RenderResult<(E::Device, vk::Queue, vk::Queue)> {
        let families = physical.queue_families;
        let desc = DeviceDesc {
            queue_families: families.unique(),
            extensions: vec![SWAPCHAIN_EXTENSION.to_string()],
            layers: layers.to_vec(),
            sampler_anisotropy: physical.anisotropy_enabled,
        };

        let device = instance.create_device(physical.handle, &desc).map_err(|e| {
            log.error(format!("Logical device creation failed: {e:?}"));
            RenderError::DeviceCreation(e)
        })?;

        let graphics_queue = device.get_device_queue(families.graphics);
        let present_queue = device.get_device_queue(families.present);
        for (queue, name, family) in [
            (graphics_queue, "graphics", families.graphics),
            (present_queue, "present", families.present),
        ] {
            if queue == vk::Queue::null() {
                log.error(format!("Null {name} queue from family {family}"));
                device.destroy_device();
                return Err(RenderError::QueueRetrieval { queue: name, family });
            }
        }

        log.info(format!(
            "Logical device created with {} queue famil{}",
            desc.queue_families.len(),
            if desc.queue_families.len() == 1 { "y" } else { "ies" }
        ));
        Ok((device, graphics_queue, present_queue))
    }

    /// Re-query surface support for the selected adapter
    pub fn query_swapchain_support(&self) -> RenderResult<SwapchainSupport> {
        query_support::<E::Instance>(&self.instance, self.physical.handle, self.surface).map_err(|e| {
            RenderError::SwapchainCreation {
                reason: format!("surface support query failed: {e:?}"),
            }
        })
    }

    /// Memory type index satisfying `type_bits` and `properties`
    pub fn find_memory_type(&self, type_bits: u32, properties: vk::MemoryPropertyFlags) -> RenderResult<u32> {
        find_memory_type(&self.physical.memory_properties, type_bits, properties)
    }

    /// Format feature support on the selected adapter
    pub fn format_properties(&self, format: vk::Format) -> vk::FormatProperties {
        self.instance.format_properties(self.physical.handle, format)
    }

    /// First candidate supporting `features` with the given tiling
    pub fn find_supported_format(
        &self,
        candidates: &[vk::Format],
        tiling: vk::ImageTiling,
        features: vk::FormatFeatureFlags,
    ) -> RenderResult<vk::Format> {
        candidates
            .iter()
            .copied()
            .find(|&format| {
                let properties = self.format_properties(format);
                match tiling {
                    vk::ImageTiling::LINEAR => properties.linear_tiling_features.contains(features),
                    vk::ImageTiling::OPTIMAL => properties.optimal_tiling_features.contains(features),
                    _ => false,
                }
            })
            .ok_or_else(|| RenderError::UnsupportedFormat {
                reason: format!("none of {candidates:?} supports {features:?} with {tiling:?} tiling"),
            })
    }

    /// Depth attachment format for this adapter
    pub fn find_depth_format(&self) -> RenderResult<vk::Format> {
        self.find_supported_format(
            &DEPTH_FORMAT_CANDIDATES,
            vk::ImageTiling::OPTIMAL,
            vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
        )
    }

    /// Block until the device has finished all submitted work
    pub fn wait_idle(&self) -> RenderResult<()> {
        self.device.device_wait_idle().map_err(RenderError::DeviceIdle)
    }

    /// Logical device
    pub fn device(&self) -> &E::Device {
        &self.device
    }

    /// Instance
    pub fn instance(&self) -> &E::Instance {
        &self.instance
    }

    /// Presentation surface
    pub fn surface(&self) -> vk::SurfaceKHR {
        self.surface
    }

    /// Selected adapter
    pub fn physical(&self) -> &PhysicalDeviceInfo {
        &self.physical
    }

    /// Resolved queue families
    pub fn queue_families(&self) -> QueueFamilies {
        self.physical.queue_families
    }

    /// Graphics queue
    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    /// Present queue
    pub fn present_queue(&self) -> vk::Queue {
        self.present_queue
    }

    /// Extension and layer lists from instance creation
    pub fn diagnostics(&self) -> &InstanceDiagnostics {
        &self.diagnostics
    }

    /// Layers enabled on the instance and device
    pub fn validation_layers(&self) -> &[String] {
        &self.validation_layers
    }

    /// Logger shared by every tier
    pub fn log(&self) -> &Logger {
        &self.log
    }
}

impl<E: GpuEntry> Drop for DeviceContext<E> {
    fn drop(&mut self) {
        self.device.destroy_device();
        self.instance.destroy_surface(self.surface);
        self.instance.destroy_instance();
        self.log.info("Device context destroyed");
    }
}

fn query_support<I: GpuInstance>(
    instance: &I,
    handle: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
) -> ash::prelude::VkResult<SwapchainSupport> {
    Ok(SwapchainSupport {
        capabilities: instance.surface_capabilities(handle, surface)?,
        formats: instance.surface_formats(handle, surface)?,
        present_modes: instance.surface_present_modes(handle, surface)?,
    })
}
