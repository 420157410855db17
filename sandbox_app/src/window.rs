//! GLFW window adapter
//!
//! Opens a Vulkan-ready (no client API) resizable window and exposes it to the
//! renderer as a [`WindowSource`].

use ash::prelude::VkResult;
use ash::vk;
use ash::vk::Handle;
use mythos_renderer::WindowSource;
use thiserror::Error;

/// Window setup errors
#[derive(Error, Debug)]
pub enum WindowError {
    #[error("GLFW initialization failed")]
    InitializationFailed,

    #[error("Window creation failed")]
    CreationFailed,

    #[error("GLFW reports no Vulkan support on this system")]
    VulkanUnsupported,
}

/// The event loop half: GLFW context and the window's event receiver
pub struct EventLoop {
    glfw: glfw::Glfw,
    events: glfw::GlfwReceiver<(f64, glfw::WindowEvent)>,
}

impl EventLoop {
    pub fn poll(&mut self) -> Vec<glfw::WindowEvent> {
        self.glfw.poll_events();
        glfw::flush_messages(&self.events).map(|(_, event)| event).collect()
    }
}

/// The renderer half: the window itself
pub struct GlfwWindow {
    window: glfw::PWindow,
    extensions: Vec<String>,
}

impl GlfwWindow {
    pub fn open(title: &str, width: u32, height: u32) -> Result<(Self, EventLoop), WindowError> {
        let mut glfw = glfw::init(glfw::fail_on_errors).map_err(|_| WindowError::InitializationFailed)?;

        glfw.window_hint(glfw::WindowHint::ClientApi(glfw::ClientApiHint::NoApi));
        glfw.window_hint(glfw::WindowHint::Resizable(true));

        let extensions = glfw
            .get_required_instance_extensions()
            .ok_or(WindowError::VulkanUnsupported)?;

        let (mut window, events) = glfw
            .create_window(width, height, title, glfw::WindowMode::Windowed)
            .ok_or(WindowError::CreationFailed)?;

        window.set_key_polling(true);
        window.set_close_polling(true);
        window.set_framebuffer_size_polling(true);

        Ok((Self { window, extensions }, EventLoop { glfw, events }))
    }

    pub fn should_close(&self) -> bool {
        self.window.should_close()
    }
}

impl WindowSource for GlfwWindow {
    fn client_size(&self) -> (u32, u32) {
        let (width, height) = self.window.get_framebuffer_size();
        (u32::try_from(width).unwrap_or(0), u32::try_from(height).unwrap_or(0))
    }

    fn required_instance_extensions(&self) -> Vec<String> {
        self.extensions.clone()
    }

    fn create_surface(&self, _entry: &ash::Entry, instance: &ash::Instance) -> VkResult<vk::SurfaceKHR> {
        let mut surface = vk::SurfaceKHR::null();
        let result = self
            .window
            .create_window_surface(instance.handle(), std::ptr::null(), &mut surface);
        match result {
            vk::Result::SUCCESS if !surface.is_null() => Ok(surface),
            vk::Result::SUCCESS => Err(vk::Result::ERROR_INITIALIZATION_FAILED),
            error => Err(error),
        }
    }
}
