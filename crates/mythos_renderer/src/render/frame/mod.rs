//! Per-frame GPU resources
//!
//! Memory-backed buffers and images, per-slot synchronization, command
//! recording, and the [`FrameResources`] tier that owns all of them.

pub mod commands;
pub mod memory;
pub mod resources;
pub mod sync;

pub use resources::FrameResources;
