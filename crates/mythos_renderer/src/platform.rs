//! Platform window access
//!
//! The renderer never processes window messages. It only needs to know the
//! client-area size, which instance extensions the windowing system requires,
//! and how to create a presentation surface. [`WindowSource`] is that accessor;
//! the renderer queries it at construction and again on every swapchain
//! recreation.

use ash::prelude::VkResult;
use ash::vk;
use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle, RawDisplayHandle, RawWindowHandle};

/// Accessor for the native window the renderer presents into
pub trait WindowSource {
    /// Current client-area size in pixels
    fn client_size(&self) -> (u32, u32);

    /// Instance extensions the windowing system needs for surface creation
    fn required_instance_extensions(&self) -> Vec<String>;

    /// Create a presentation surface for `instance`
    fn create_surface(&self, entry: &ash::Entry, instance: &ash::Instance) -> VkResult<vk::SurfaceKHR>;
}

/// Instance extensions `ash_window` needs for a display handle
pub fn surface_extensions_for(display: RawDisplayHandle) -> VkResult<Vec<String>> {
    let names = ash_window::enumerate_required_extensions(display)?;
    Ok(names
        .iter()
        .map(|&name| {
            // SAFETY: ash_window returns pointers to static NUL-terminated extension names
            unsafe { std::ffi::CStr::from_ptr(name) }
                .to_string_lossy()
                .into_owned()
        })
        .collect())
}

/// [`WindowSource`] for any window exposing raw window and display handles
///
/// Surface creation goes through `ash_window`. The size callback lets the
/// owner report the framebuffer size however its windowing crate exposes it.
pub struct RawWindow<W> {
    window: W,
    size: Box<dyn Fn(&W) -> (u32, u32)>,
}

impl<W> RawWindow<W>
where
    W: HasRawWindowHandle + HasRawDisplayHandle,
{
    /// Wrap a window and a client-size query
    pub fn new(window: W, size: impl Fn(&W) -> (u32, u32) + 'static) -> Self {
        Self {
            window,
            size: Box::new(size),
        }
    }

    /// The wrapped window
    pub fn window(&self) -> &W {
        &self.window
    }

    fn handles(&self) -> (RawDisplayHandle, RawWindowHandle) {
        (self.window.raw_display_handle(), self.window.raw_window_handle())
    }
}

impl<W> WindowSource for RawWindow<W>
where
    W: HasRawWindowHandle + HasRawDisplayHandle,
{
    fn client_size(&self) -> (u32, u32) {
        (self.size)(&self.window)
    }

    fn required_instance_extensions(&self) -> Vec<String> {
        let (display, _) = self.handles();
        surface_extensions_for(display).unwrap_or_else(|_| vec!["VK_KHR_surface".to_string()])
    }

    fn create_surface(&self, entry: &ash::Entry, instance: &ash::Instance) -> VkResult<vk::SurfaceKHR> {
        let (display, window) = self.handles();
        // SAFETY: the handles come from a live window owned by self
        unsafe { ash_window::create_surface(entry, instance, display, window, None) }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::cell::Cell;

    /// Window stand-in for the mock backend; surface creation is handled by the mock instance
    pub(crate) struct FakeWindow {
        pub size: Cell<(u32, u32)>,
    }

    impl FakeWindow {
        pub(crate) fn new(width: u32, height: u32) -> Self {
            Self { size: Cell::new((width, height)) }
        }

        pub(crate) fn resize(&self, width: u32, height: u32) {
            self.size.set((width, height));
        }
    }

    impl WindowSource for FakeWindow {
        fn client_size(&self) -> (u32, u32) {
            self.size.get()
        }

        fn required_instance_extensions(&self) -> Vec<String> {
            vec!["VK_KHR_surface".to_string(), "VK_KHR_xlib_surface".to_string()]
        }

        fn create_surface(&self, _entry: &ash::Entry, _instance: &ash::Instance) -> VkResult<vk::SurfaceKHR> {
            Err(vk::Result::ERROR_EXTENSION_NOT_PRESENT)
        }
    }

    #[test]
    fn test_fake_window_resizes() {
        let window = FakeWindow::new(800, 600);
        window.resize(1024, 768);
        assert_eq!(window.client_size(), (1024, 768));
    }
}
