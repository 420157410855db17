//! Math utilities and types
//!
//! Thin aliases over `nalgebra` plus the camera helpers the renderer needs to
//! produce Vulkan-ready matrices.

pub use nalgebra::{Matrix4, Vector3};

/// 3D vector type
pub type Vec3 = Vector3<f32>;

/// 4x4 matrix type
pub type Mat4 = Matrix4<f32>;

/// 3D point type
pub type Point3 = nalgebra::Point3<f32>;

/// Common mathematical constants
pub mod constants {
    /// Degrees to radians conversion factor
    pub const DEG_TO_RAD: f32 = std::f32::consts::PI / 180.0;
}

/// Right-handed view matrix looking from `eye` at `target`
pub fn look_at(eye: Point3, target: Point3, up: Vec3) -> Mat4 {
    Mat4::look_at_rh(&eye, &target, &up)
}

/// Perspective projection adjusted for Vulkan clip space
///
/// `nalgebra` follows the OpenGL convention where clip-space Y points up.
/// Vulkan's points down, so the Y scale is negated.
pub fn vulkan_perspective(aspect: f32, fov_y_degrees: f32, near: f32, far: f32) -> Mat4 {
    let mut projection = Mat4::new_perspective(aspect, fov_y_degrees * constants::DEG_TO_RAD, near, far);
    projection[(1, 1)] *= -1.0;
    projection
}

/// Rotation of `degrees` around the Z axis
pub fn rotation_z(degrees: f32) -> Mat4 {
    Mat4::new_rotation(Vec3::z() * (degrees * constants::DEG_TO_RAD))
}

/// Column-major array layout as consumed by GLSL `mat4`
pub fn to_columns(matrix: &Mat4) -> [[f32; 4]; 4] {
    (*matrix).into()
}
