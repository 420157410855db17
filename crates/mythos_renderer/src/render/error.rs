//! Renderer error types
//!
//! Every creation step and every frame operation returns a [`RenderResult`].
//! Errors are grouped into three kinds so the owning layer can decide between
//! "failed to activate", "recoverable frame hiccup" and "fatal".

use ash::vk;
use thiserror::Error;

use crate::config::ConfigError;

/// Broad classification of a [`RenderError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Instance, device, swapchain, pipeline or resource creation failed
    Initialization,
    /// Acquire, submit or present failed during a frame
    RuntimeFrame,
    /// No memory type matched, or a buffer/image could not be created
    ResourceAllocation,
}

/// Renderer errors
#[derive(Error, Debug)]
pub enum RenderError {
    /// Configuration could not be loaded or failed validation
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// Configuration values are out of range
    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        /// What was wrong
        reason: String,
    },

    /// Mesh or texture data cannot be uploaded as given
    #[error("Invalid scene: {reason}")]
    InvalidScene {
        /// What was wrong
        reason: String,
    },

    /// A frame slot outside `0..frames_in_flight` was requested
    #[error("Frame slot {slot} out of range for {frames_in_flight} frames in flight")]
    FrameSlot {
        /// Requested slot
        slot: usize,
        /// Number of slots
        frames_in_flight: usize,
    },

    /// Instance creation failed or a required extension/layer is missing
    #[error("Instance creation failed: {reason}")]
    InstanceCreation {
        /// Description of the failure
        reason: String,
    },

    /// The platform could not create a presentation surface
    #[error("Surface creation failed: {0:?}")]
    SurfaceCreation(vk::Result),

    /// No physical device satisfies the renderer's requirements
    #[error("No suitable physical device found")]
    NoSuitableDevice,

    /// Logical device creation failed
    #[error("Logical device creation failed: {0:?}")]
    DeviceCreation(vk::Result),

    /// A queue handle came back null
    #[error("Failed to retrieve {queue} queue from family {family}")]
    QueueRetrieval {
        /// Which queue ("graphics" or "present")
        queue: &'static str,
        /// Queue family index the queue was requested from
        family: u32,
    },

    /// Swapchain creation or support query failed
    #[error("Swapchain creation failed: {reason}")]
    SwapchainCreation {
        /// Description of the failure
        reason: String,
    },

    /// Image view creation failed
    #[error("Image view creation failed: {0:?}")]
    ImageViewCreation(vk::Result),

    /// Render pass creation failed
    #[error("Render pass creation failed: {0:?}")]
    RenderPassCreation(vk::Result),

    /// Descriptor set layout creation failed
    #[error("Descriptor set layout creation failed: {0:?}")]
    DescriptorSetLayoutCreation(vk::Result),

    /// Shader loading, pipeline layout or pipeline creation failed
    #[error("Pipeline creation failed: {reason}")]
    PipelineCreation {
        /// Description of the failure
        reason: String,
    },

    /// Framebuffer creation failed
    #[error("Framebuffer creation failed: {0:?}")]
    FramebufferCreation(vk::Result),

    /// Command pool creation failed
    #[error("Command pool creation failed: {0:?}")]
    CommandPoolCreation(vk::Result),

    /// Command buffer allocation failed
    #[error("Command buffer allocation failed: {0:?}")]
    CommandBufferAllocation(vk::Result),

    /// Semaphore or fence creation failed
    #[error("Synchronization object creation failed: {0:?}")]
    SyncObjectCreation(vk::Result),

    /// Descriptor pool creation failed
    #[error("Descriptor pool creation failed: {0:?}")]
    DescriptorPoolCreation(vk::Result),

    /// Descriptor set allocation failed or produced the wrong count
    #[error("Descriptor set allocation failed: {reason}")]
    DescriptorSetAllocation {
        /// Description of the failure
        reason: String,
    },

    /// Sampler creation failed
    #[error("Sampler creation failed: {0:?}")]
    SamplerCreation(vk::Result),

    /// A format lacks a feature the renderer needs
    #[error("Unsupported format: {reason}")]
    UnsupportedFormat {
        /// Which format/feature combination was missing
        reason: String,
    },

    /// No memory type satisfies the requirement mask and property flags
    #[error("No suitable memory type (type bits {type_bits:#b}, properties {properties:?})")]
    NoSuitableMemoryType {
        /// Memory type mask from the requirements
        type_bits: u32,
        /// Requested property flags
        properties: vk::MemoryPropertyFlags,
    },

    /// Buffer handle creation failed
    #[error("Buffer creation failed: {0:?}")]
    BufferCreation(vk::Result),

    /// Image handle creation failed
    #[error("Image creation failed: {0:?}")]
    ImageCreation(vk::Result),

    /// Device memory allocation or binding failed
    #[error("Memory allocation failed: {0:?}")]
    MemoryAllocation(vk::Result),

    /// Mapping device memory failed
    #[error("Memory mapping failed: {0:?}")]
    MemoryMap(vk::Result),

    /// Waiting for the device to go idle failed
    #[error("Device wait idle failed: {0:?}")]
    DeviceIdle(vk::Result),

    /// Waiting on a frame fence failed or timed out
    #[error("Fence wait failed: {0:?}")]
    FenceWait(vk::Result),

    /// Acquiring the next swapchain image failed with a non-recoverable result
    #[error("Swapchain image acquisition failed: {0:?}")]
    SwapchainAcquire(vk::Result),

    /// Beginning, ending or resetting a command buffer failed
    #[error("Command recording failed: {0:?}")]
    CommandRecording(vk::Result),

    /// Queue submission failed
    #[error("Queue submission failed: {0:?}")]
    Submit(vk::Result),

    /// Presentation failed with a non-recoverable result
    #[error("Presentation failed: {0:?}")]
    Present(vk::Result),
}

impl RenderError {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NoSuitableMemoryType { .. }
            | Self::BufferCreation(_)
            | Self::ImageCreation(_)
            | Self::MemoryAllocation(_)
            | Self::MemoryMap(_) => ErrorKind::ResourceAllocation,

            Self::FenceWait(_)
            | Self::DeviceIdle(_)
            | Self::SwapchainAcquire(_)
            | Self::FrameSlot { .. }
            | Self::CommandRecording(_)
            | Self::Submit(_)
            | Self::Present(_) => ErrorKind::RuntimeFrame,

            _ => ErrorKind::Initialization,
        }
    }

    /// Whether the device itself is gone and no further frames can succeed
    pub fn is_device_lost(&self) -> bool {
        matches!(
            self,
            Self::FenceWait(vk::Result::ERROR_DEVICE_LOST)
                | Self::DeviceIdle(vk::Result::ERROR_DEVICE_LOST)
                | Self::SwapchainAcquire(vk::Result::ERROR_DEVICE_LOST)
                | Self::Submit(vk::Result::ERROR_DEVICE_LOST)
                | Self::Present(vk::Result::ERROR_DEVICE_LOST)
        )
    }
}

/// Result type for renderer operations
pub type RenderResult<T> = Result<T, RenderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(RenderError::NoSuitableDevice.kind(), ErrorKind::Initialization);
        assert_eq!(
            RenderError::PipelineCreation { reason: "missing shader".into() }.kind(),
            ErrorKind::Initialization
        );
        assert_eq!(
            RenderError::Submit(vk::Result::ERROR_DEVICE_LOST).kind(),
            ErrorKind::RuntimeFrame
        );
        assert_eq!(
            RenderError::NoSuitableMemoryType {
                type_bits: 0b10,
                properties: vk::MemoryPropertyFlags::HOST_VISIBLE,
            }
            .kind(),
            ErrorKind::ResourceAllocation
        );
    }

    #[test]
    fn test_scene_and_slot_kinds() {
        let scene = RenderError::InvalidScene { reason: "mesh has no vertices".into() };
        assert_eq!(scene.kind(), ErrorKind::Initialization);
        assert_eq!(scene.to_string(), "Invalid scene: mesh has no vertices");

        let slot = RenderError::FrameSlot { slot: 3, frames_in_flight: 2 };
        assert_eq!(slot.kind(), ErrorKind::RuntimeFrame);
        assert!(!slot.is_device_lost());
    }

    #[test]
    fn test_device_lost_detection() {
        assert!(RenderError::Present(vk::Result::ERROR_DEVICE_LOST).is_device_lost());
        assert!(!RenderError::Present(vk::Result::ERROR_SURFACE_LOST_KHR).is_device_lost());
        assert!(!RenderError::NoSuitableDevice.is_device_lost());
    }

    #[test]
    fn test_error_display() {
        let error = RenderError::QueueRetrieval { queue: "present", family: 2 };
        assert_eq!(error.to_string(), "Failed to retrieve present queue from family 2");
    }
}
