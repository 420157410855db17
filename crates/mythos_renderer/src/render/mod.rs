//! Rendering core
//!
//! Ownership tiers, leaf first: [`DeviceContext`], [`SwapchainManager`],
//! [`PipelineResources`], [`FrameResources`]. [`FrameScheduler`] drives the
//! frame loop over them and [`Renderer`] composes everything.

pub mod backend;
pub mod device_context;
pub mod error;
pub mod frame;
pub mod pipeline;
pub mod renderer;
pub mod scheduler;
pub mod swapchain;
pub mod teardown;
pub mod vertex;

pub use device_context::{DeviceContext, PhysicalDeviceInfo, QueueFamilies, SwapchainSupport};
pub use error::{ErrorKind, RenderError, RenderResult};
pub use frame::FrameResources;
pub use pipeline::PipelineResources;
pub use renderer::Renderer;
pub use scheduler::{FrameOutcome, FrameScheduler, FrameState};
pub use swapchain::SwapchainManager;
pub use vertex::{Mesh, TextureData, UniformBufferObject, Vertex};
