//! GPU payloads: vertices, uniforms, the default mesh and texture

use std::mem::{offset_of, size_of};

use ash::vk;
use bytemuck::{Pod, Zeroable};

use crate::foundation::math::{look_at, rotation_z, to_columns, vulkan_perspective, Point3, Vec3};
use crate::render::error::{RenderError, RenderResult};

/// Vertex with position, color and texture coordinate
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    /// Object-space position
    pub pos: [f32; 3],
    /// Vertex color
    pub color: [f32; 3],
    /// Texture coordinate
    pub tex_coord: [f32; 2],
}

impl Vertex {
    /// Vertex from its three attributes
    pub const fn new(pos: [f32; 3], color: [f32; 3], tex_coord: [f32; 2]) -> Self {
        Self { pos, color, tex_coord }
    }

    /// Binding 0, advancing per vertex
    pub fn binding_description() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription {
            binding: 0,
            stride: size_of::<Self>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }
    }

    /// Locations 0..3: position, color, texture coordinate
    pub fn attribute_descriptions() -> [vk::VertexInputAttributeDescription; 3] {
        [
            vk::VertexInputAttributeDescription {
                binding: 0,
                location: 0,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: offset_of!(Self, pos) as u32,
            },
            vk::VertexInputAttributeDescription {
                binding: 0,
                location: 1,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: offset_of!(Self, color) as u32,
            },
            vk::VertexInputAttributeDescription {
                binding: 0,
                location: 2,
                format: vk::Format::R32G32_SFLOAT,
                offset: offset_of!(Self, tex_coord) as u32,
            },
        ]
    }
}

/// Model, view and projection matrices in GLSL `mat4` layout
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct UniformBufferObject {
    /// Model matrix
    pub model: [[f32; 4]; 4],
    /// View matrix
    pub view: [[f32; 4]; 4],
    /// Projection matrix, Y flipped for Vulkan
    pub proj: [[f32; 4]; 4],
}

impl UniformBufferObject {
    /// Degrees per second of model rotation
    pub const SPIN_RATE: f32 = 90.0;

    /// Model spinning about Z, seen from (2, 2, 2) with Z up
    pub fn spinning(elapsed_secs: f32, extent: vk::Extent2D) -> Self {
        let aspect = if extent.height == 0 {
            1.0
        } else {
            extent.width as f32 / extent.height as f32
        };
        let view = look_at(Point3::new(2.0, 2.0, 2.0), Point3::origin(), Vec3::z());
        Self {
            model: to_columns(&rotation_z(elapsed_secs * Self::SPIN_RATE)),
            view: to_columns(&view),
            proj: to_columns(&vulkan_perspective(aspect, 45.0, 0.1, 10.0)),
        }
    }
}

/// Indexed triangle list
#[derive(Debug, Clone, PartialEq)]
pub struct Mesh {
    /// Vertices
    pub vertices: Vec<Vertex>,
    /// Triangle indices
    pub indices: Vec<u32>,
}

impl Mesh {
    /// Two textured quads stacked half a unit apart on Z
    pub fn quad_stack() -> Self {
        let quad = |z: f32| {
            [
                Vertex::new([-0.5, -0.5, z], [1.0, 0.0, 0.0], [1.0, 0.0]),
                Vertex::new([0.5, -0.5, z], [0.0, 1.0, 0.0], [0.0, 0.0]),
                Vertex::new([0.5, 0.5, z], [0.0, 0.0, 1.0], [0.0, 1.0]),
                Vertex::new([-0.5, 0.5, z], [1.0, 1.0, 1.0], [1.0, 1.0]),
            ]
        };
        let vertices = quad(0.0).into_iter().chain(quad(-0.5)).collect();
        let indices = vec![0, 1, 2, 2, 3, 0, 4, 5, 6, 6, 7, 4];
        Self { vertices, indices }
    }

    /// Number of indices drawn
    pub fn index_count(&self) -> u32 {
        u32::try_from(self.indices.len()).unwrap_or(u32::MAX)
    }

    /// Check the mesh can be drawn: both lists non-empty, every index in range
    pub fn validate(&self) -> RenderResult<()> {
        let invalid = |reason: String| Err(RenderError::InvalidScene { reason });
        if self.vertices.is_empty() {
            return invalid("mesh has no vertices".to_string());
        }
        if self.indices.is_empty() {
            return invalid("mesh has no indices".to_string());
        }
        if let Some(&index) = self.indices.iter().find(|&&i| i as usize >= self.vertices.len()) {
            return invalid(format!("index {index} out of range for {} vertices", self.vertices.len()));
        }
        Ok(())
    }
}

impl Default for Mesh {
    fn default() -> Self {
        Self::quad_stack()
    }
}

/// RGBA8 pixels held in memory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureData {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Row-major RGBA8 pixels
    pub pixels: Vec<u8>,
}

impl TextureData {
    /// Square checkerboard with `cells` squares per side
    pub fn checkerboard(size: u32, cells: u32) -> Self {
        let cell = (size / cells.max(1)).max(1);
        let mut pixels = Vec::with_capacity(size as usize * size as usize * 4);
        for y in 0..size {
            for x in 0..size {
                let light = ((x / cell) + (y / cell)) % 2 == 0;
                let shade = if light { 230 } else { 40 };
                pixels.extend_from_slice(&[shade, shade, shade, 255]);
            }
        }
        Self {
            width: size,
            height: size,
            pixels,
        }
    }

    /// Full mip chain length: `floor(log2(max(w, h))) + 1`
    pub fn mip_levels(&self) -> u32 {
        let largest = self.width.max(self.height).max(1);
        u32::BITS - largest.leading_zeros()
    }

    /// Byte size of the base level
    pub fn size_bytes(&self) -> vk::DeviceSize {
        self.pixels.len() as vk::DeviceSize
    }

    /// Check the dimensions are non-zero and `pixels` holds exactly `width * height` RGBA8 texels
    pub fn validate(&self) -> RenderResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(RenderError::InvalidScene {
                reason: format!("texture is {}x{}", self.width, self.height),
            });
        }
        let expected = u64::from(self.width) * u64::from(self.height) * 4;
        if self.pixels.len() as u64 != expected {
            return Err(RenderError::InvalidScene {
                reason: format!(
                    "texture is {}x{} but holds {} bytes, expected {expected}",
                    self.width,
                    self.height,
                    self.pixels.len()
                ),
            });
        }
        Ok(())
    }
}

impl Default for TextureData {
    fn default() -> Self {
        Self::checkerboard(256, 8)
    }
}
