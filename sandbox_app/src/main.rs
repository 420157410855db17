//! Mythos sandbox
//!
//! Opens a window, pushes the renderer layer and runs the layer loop until the
//! window closes or the renderer deactivates. An optional config path may be
//! passed as the first argument (`.toml` or `.ron`).

mod window;

use std::rc::Rc;

use mythos_renderer::{Config, Layer, Logger, RendererConfig, RendererLayer};

use crate::window::GlfwWindow;

fn load_config() -> RendererConfig {
    let Some(path) = std::env::args().nth(1) else {
        return RendererConfig::new("Mythos Sandbox");
    };
    match RendererConfig::load_from_file(&path) {
        Ok(config) => {
            log::info!("Loaded renderer config from {path}");
            config
        }
        Err(e) => {
            log::warn!("Could not load {path} ({e}), using defaults");
            RendererConfig::new("Mythos Sandbox")
        }
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = load_config();
    let (window, mut event_loop) = match GlfwWindow::open(&config.application_name, 1280, 720) {
        Ok(pair) => pair,
        Err(e) => {
            log::error!("{e}");
            std::process::exit(1);
        }
    };
    let window = Rc::new(window);

    let mut renderer_layer = RendererLayer::vulkan(window.clone(), &config, Logger::facade());
    if let Some(error) = renderer_layer.activation_error() {
        log::error!("Renderer unavailable: {error}");
        std::process::exit(1);
    }

    while !window.should_close() && renderer_layer.is_active() {
        for event in event_loop.poll() {
            match event {
                glfw::WindowEvent::FramebufferSize(..) => renderer_layer.request_resize(),
                glfw::WindowEvent::Key(glfw::Key::Escape, _, glfw::Action::Press, _) => return,
                _ => {}
            }
        }

        renderer_layer.update();
        renderer_layer.render();
    }

    if let Some(error) = renderer_layer.fatal_error() {
        log::error!("Renderer stopped: {error}");
        std::process::exit(1);
    }
}
