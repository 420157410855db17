//! # Mythos Renderer
//!
//! Vulkan rendering backend for the Mythos engine. The crate owns the graphics
//! device, the swapchain, the graphics pipeline and the per-frame synchronization
//! objects, and drives a repeating acquire-record-submit-present cycle.
//!
//! ## Architecture
//!
//! Resources are grouped into ownership tiers that are built bottom-up and torn
//! down top-down:
//!
//! - [`render::DeviceContext`]: instance, surface, physical/logical device, queues
//! - [`render::SwapchainManager`]: presentable images and their views
//! - [`render::PipelineResources`]: render pass, descriptor layout, pipeline
//! - [`render::FrameResources`]: command buffers, sync objects, buffers, textures
//! - [`render::FrameScheduler`]: the per-frame state machine
//!
//! [`render::Renderer`] composes the tiers and [`layer::RendererLayer`] exposes
//! the renderer to an engine's layer stack through [`layer::Layer`].
//!
//! Every GPU call goes through the [`render::backend`] traits. The production
//! implementation wraps `ash`; tests run against an in-crate mock device.

#![warn(missing_docs)]

pub mod config;
pub mod foundation;
pub mod layer;
pub mod platform;
pub mod render;

pub use config::{Config, ConfigError, RendererConfig};
pub use foundation::logging::{LogSink, Logger};
pub use layer::{Layer, RendererLayer};
pub use platform::WindowSource;
pub use render::{ErrorKind, RenderError, RenderResult, Renderer};
