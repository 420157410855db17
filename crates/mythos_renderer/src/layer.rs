//! Layer integration
//!
//! Engines sequence their subsystems as a stack of [`Layer`]s, calling
//! `update` then `render` on each once per tick. [`RendererLayer`] is the
//! renderer's entry in that stack. It never panics: a renderer that fails to
//! build leaves the layer inactive with the error recorded, and a fatal frame
//! error tears the renderer down and deactivates the layer.

use std::rc::Rc;

use crate::config::RendererConfig;
use crate::foundation::logging::Logger;
use crate::platform::WindowSource;
use crate::render::backend::vulkan::VulkanEntry;
use crate::render::backend::GpuEntry;
use crate::render::error::RenderError;
use crate::render::Renderer;

/// One entry in an engine's layer stack
pub trait Layer {
    /// Display name
    fn name(&self) -> &str;

    /// Per-tick simulation step
    fn update(&mut self);

    /// Per-tick draw step
    fn render(&mut self);

    /// Whether the layer still does anything
    fn is_active(&self) -> bool {
        true
    }
}

/// Layer owning a [`Renderer`]
pub struct RendererLayer<E: GpuEntry> {
    renderer: Option<Renderer<E>>,
    activation_error: Option<RenderError>,
    fatal_error: Option<RenderError>,
    log: Logger,
}

impl RendererLayer<VulkanEntry> {
    /// Load the system Vulkan library and build a renderer for `window`
    pub fn vulkan(window: Rc<dyn WindowSource>, config: &RendererConfig, log: Logger) -> Self {
        match VulkanEntry::load() {
            Ok(entry) => Self::new(&entry, window, config, log),
            Err(e) => Self::failed(e, log),
        }
    }
}

impl<E: GpuEntry> RendererLayer<E> {
    /// Build a renderer; a failure is recorded, not raised
    pub fn new(entry: &E, window: Rc<dyn WindowSource>, config: &RendererConfig, log: Logger) -> Self {
        match Renderer::new(entry, window, config, log.clone()) {
            Ok(renderer) => Self {
                renderer: Some(renderer),
                activation_error: None,
                fatal_error: None,
                log,
            },
            Err(e) => Self::failed(e, log),
        }
    }

    fn failed(error: RenderError, log: Logger) -> Self {
        log.error(format!("Renderer layer failed to activate: {error}"));
        Self {
            renderer: None,
            activation_error: Some(error),
            fatal_error: None,
            log,
        }
    }

    /// Why construction failed, if it did
    pub fn activation_error(&self) -> Option<&RenderError> {
        self.activation_error.as_ref()
    }

    /// The frame error that deactivated the layer, if any
    pub fn fatal_error(&self) -> Option<&RenderError> {
        self.fatal_error.as_ref()
    }

    /// The live renderer
    pub fn renderer(&self) -> Option<&Renderer<E>> {
        self.renderer.as_ref()
    }

    /// Forward a window resize to the renderer
    pub fn request_resize(&mut self) {
        if let Some(renderer) = self.renderer.as_mut() {
            renderer.request_resize();
        }
    }
}

impl<E: GpuEntry> Layer for RendererLayer<E> {
    fn name(&self) -> &str {
        "Renderer"
    }

    fn update(&mut self) {}

    fn render(&mut self) {
        let Some(renderer) = self.renderer.as_mut() else {
            return;
        };
        if let Err(e) = renderer.render_frame() {
            self.log.error(format!("Fatal render error, deactivating renderer layer: {e}"));
            self.renderer = None;
            self.fatal_error = Some(e);
        }
    }

    fn is_active(&self) -> bool {
        self.renderer.is_some()
    }
}
