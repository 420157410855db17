//! Renderer configuration

use std::path::Path;
use std::time::Duration;

use ash::vk;
use serde::{Deserialize, Serialize};

use super::Config;

/// Name of the Khronos validation layer
pub const KHRONOS_VALIDATION_LAYER: &str = "VK_LAYER_KHRONOS_validation";

/// Shader binary locations
///
/// Paths are relative to the working directory. [`ShaderConfig::default`]
/// probes the usual build output locations so the demo runs from either the
/// workspace root or the crate directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShaderConfig {
    /// Path to the vertex shader SPIR-V file
    pub vertex_shader_path: String,
    /// Path to the fragment shader SPIR-V file
    pub fragment_shader_path: String,
}

impl ShaderConfig {
    /// Create a new shader configuration
    pub fn new(vertex_path: impl Into<String>, fragment_path: impl Into<String>) -> Self {
        Self {
            vertex_shader_path: vertex_path.into(),
            fragment_shader_path: fragment_path.into(),
        }
    }

    /// Create shader config with automatic path resolution
    pub fn with_path_resolution(base_vertex: &str, base_fragment: &str) -> Self {
        const SHADER_DIRS: [&str; 4] = ["shaders/", "target/shaders/", "../../target/shaders/", "./"];

        let find = |name: &str| {
            SHADER_DIRS
                .iter()
                .map(|dir| format!("{dir}{name}"))
                .find(|candidate| Path::new(candidate).exists())
                .unwrap_or_else(|| format!("shaders/{name}"))
        };

        Self {
            vertex_shader_path: find(base_vertex),
            fragment_shader_path: find(base_fragment),
        }
    }

    /// Check that both paths are set
    ///
    /// Existence is checked when the pipeline loads the binaries, so a missing
    /// file surfaces as a pipeline creation failure.
    pub fn validate(&self) -> Result<(), String> {
        if self.vertex_shader_path.is_empty() {
            return Err("Vertex shader path cannot be empty".to_string());
        }
        if self.fragment_shader_path.is_empty() {
            return Err("Fragment shader path cannot be empty".to_string());
        }
        Ok(())
    }
}

impl Default for ShaderConfig {
    fn default() -> Self {
        Self::with_path_resolution("vert.spv", "frag.spv")
    }
}

/// Preferred swapchain surface format, paired with the sRGB non-linear color space
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SurfaceFormatPreference {
    /// `B8G8R8A8_SRGB`
    Bgra8Srgb,
    /// `R8G8B8A8_SRGB`
    Rgba8Srgb,
    /// `B8G8R8A8_UNORM`
    Bgra8Unorm,
}

impl SurfaceFormatPreference {
    /// The Vulkan format/color-space pair
    pub fn to_vk(self) -> vk::SurfaceFormatKHR {
        let format = match self {
            Self::Bgra8Srgb => vk::Format::B8G8R8A8_SRGB,
            Self::Rgba8Srgb => vk::Format::R8G8B8A8_SRGB,
            Self::Bgra8Unorm => vk::Format::B8G8R8A8_UNORM,
        };
        vk::SurfaceFormatKHR {
            format,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }
    }
}

/// Configuration for the Vulkan renderer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Application name for Vulkan instance creation
    pub application_name: String,
    /// Application version (major, minor, patch)
    pub application_version: (u32, u32, u32),
    /// Number of frames the CPU may prepare ahead of the GPU
    pub frames_in_flight: usize,
    /// Whether to enable validation layers; `None` enables them in debug builds
    pub enable_validation: Option<bool>,
    /// Layers requested when validation is enabled
    pub validation_layers: Vec<String>,
    /// Preferred swapchain format
    pub preferred_surface_format: SurfaceFormatPreference,
    /// Use MAILBOX presentation when the surface offers it
    pub prefer_mailbox: bool,
    /// Allocate a depth buffer and enable depth testing
    pub enable_depth: bool,
    /// Create the texture, sampler and image-sampler descriptor binding
    pub enable_texture: bool,
    /// Reject devices without anisotropic sampling
    pub require_anisotropy: bool,
    /// Clear color for the color attachment
    pub clear_color: [f32; 4],
    /// Upper bound on a frame-fence wait; `None` waits forever
    pub fence_timeout_ms: Option<u64>,
    /// Shader configuration
    pub shaders: ShaderConfig,
}

impl RendererConfig {
    /// Create a new renderer configuration
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            application_name: app_name.into(),
            application_version: (1, 0, 0),
            frames_in_flight: 2,
            enable_validation: None,
            validation_layers: vec![KHRONOS_VALIDATION_LAYER.to_string()],
            preferred_surface_format: SurfaceFormatPreference::Bgra8Srgb,
            prefer_mailbox: true,
            enable_depth: true,
            enable_texture: true,
            require_anisotropy: true,
            clear_color: [0.0, 0.0, 0.0, 1.0],
            fence_timeout_ms: None,
            shaders: ShaderConfig::default(),
        }
    }

    /// Set application version
    pub fn with_version(mut self, major: u32, minor: u32, patch: u32) -> Self {
        self.application_version = (major, minor, patch);
        self
    }

    /// Set custom shader configuration
    pub fn with_shaders(mut self, shaders: ShaderConfig) -> Self {
        self.shaders = shaders;
        self
    }

    /// Set the number of frames in flight
    pub fn with_frames_in_flight(mut self, frames: usize) -> Self {
        self.frames_in_flight = frames;
        self
    }

    /// Enable or disable validation layers
    pub fn with_validation(mut self, enabled: bool) -> Self {
        self.enable_validation = Some(enabled);
        self
    }

    /// Enable or disable the depth buffer
    pub fn with_depth(mut self, enabled: bool) -> Self {
        self.enable_depth = enabled;
        self
    }

    /// Enable or disable texturing
    pub fn with_texture(mut self, enabled: bool) -> Self {
        self.enable_texture = enabled;
        self
    }

    /// Require or relax the anisotropic sampling requirement
    pub fn with_anisotropy_required(mut self, required: bool) -> Self {
        self.require_anisotropy = required;
        self
    }

    /// Bound frame-fence waits
    pub fn with_fence_timeout(mut self, timeout: Duration) -> Self {
        self.fence_timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// Whether validation layers are active for this build
    pub fn validation_enabled(&self) -> bool {
        self.enable_validation.unwrap_or(cfg!(debug_assertions))
    }

    /// Fence timeout in nanoseconds as the API expects it
    pub fn fence_timeout_ns(&self) -> u64 {
        self.fence_timeout_ms
            .map_or(u64::MAX, |ms| ms.saturating_mul(1_000_000))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.application_name.is_empty() {
            return Err("Application name cannot be empty".to_string());
        }

        if self.frames_in_flight == 0 {
            return Err("Frames in flight must be at least 1".to_string());
        }

        if self.frames_in_flight > 8 {
            return Err("Frames in flight should not exceed 8".to_string());
        }

        if self.application_name.contains('\0') {
            return Err("Application name cannot contain NUL bytes".to_string());
        }

        self.shaders.validate()
    }
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self::new("Mythos Application")
    }
}

impl Config for RendererConfig {}
