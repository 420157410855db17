//! Renderer composition
//!
//! [`Renderer`] builds the tiers bottom-up and owns them for its lifetime.
//! Fields are declared top tier first so the compiler drops them top-down,
//! after `Drop` has waited for the device to go idle.

use std::rc::Rc;

use ash::vk;

use crate::config::RendererConfig;
use crate::foundation::logging::Logger;
use crate::platform::WindowSource;
use crate::render::backend::GpuEntry;
use crate::render::device_context::DeviceContext;
use crate::render::error::{RenderError, RenderResult};
use crate::render::frame::FrameResources;
use crate::render::pipeline::PipelineResources;
use crate::render::scheduler::{FrameOutcome, FrameScheduler, FrameTargets};
use crate::render::swapchain::{SwapchainManager, SwapchainPreferences};
use crate::render::vertex::{Mesh, TextureData};

/// Vulkan renderer for one window
pub struct Renderer<E: GpuEntry> {
    scheduler: FrameScheduler,
    frames: FrameResources<E::Device>,
    pipeline: PipelineResources<E::Device>,
    swapchain: SwapchainManager<E::Device>,
    context: DeviceContext<E>,
    window: Rc<dyn WindowSource>,
    log: Logger,
}

impl<E: GpuEntry> Renderer<E> {
    /// Renderer drawing the default scene: two stacked quads with a checkerboard texture
    pub fn new(entry: &E, window: Rc<dyn WindowSource>, config: &RendererConfig, log: Logger) -> RenderResult<Self> {
        Self::with_scene(entry, window, config, log, &Mesh::quad_stack(), &TextureData::default())
    }

    /// Renderer drawing `mesh` textured with `texture`
    ///
    /// The config and scene are checked before any GPU work. A failure at any
    /// later step releases whatever earlier steps created.
    pub fn with_scene(
        entry: &E,
        window: Rc<dyn WindowSource>,
        config: &RendererConfig,
        log: Logger,
        mesh: &Mesh,
        texture: &TextureData,
    ) -> RenderResult<Self> {
        config
            .validate()
            .map_err(|reason| RenderError::InvalidConfig { reason })?;
        mesh.validate()?;
        if config.enable_texture {
            texture.validate()?;
        }
        log.info(format!("Initializing renderer for '{}'", config.application_name));

        let context = DeviceContext::new(entry, window.as_ref(), config, &log)?;
        let swapchain = SwapchainManager::create(
            &context,
            window.client_size(),
            SwapchainPreferences::from_config(config),
        )?;
        let pipeline = PipelineResources::new(&context, swapchain.format().format, config)?;
        let frames = FrameResources::new(
            &context,
            &swapchain,
            &pipeline,
            config.frames_in_flight,
            mesh,
            texture,
        )?;
        let scheduler = FrameScheduler::new(config, log.clone());

        log.info(format!(
            "Renderer ready on {} ({}x{}, {} frames in flight)",
            context.physical().name,
            swapchain.extent().width,
            swapchain.extent().height,
            config.frames_in_flight
        ));

        Ok(Self {
            scheduler,
            frames,
            pipeline,
            swapchain,
            context,
            window,
            log,
        })
    }

    /// Draw one frame at the window's current size
    pub fn render_frame(&mut self) -> RenderResult<FrameOutcome> {
        let window_size = self.window.client_size();
        let mut targets = FrameTargets {
            context: &self.context,
            swapchain: &mut self.swapchain,
            pipeline: &mut self.pipeline,
            frames: &mut self.frames,
        };
        self.scheduler.draw_frame(&mut targets, window_size)
    }

    /// Rebuild presentation after the next frame is presented
    pub fn request_resize(&mut self) {
        self.scheduler.request_resize();
    }

    /// Block until the GPU has finished all submitted work
    pub fn wait_idle(&self) -> RenderResult<()> {
        self.context.wait_idle()
    }

    /// Frame scheduler state
    pub fn scheduler(&self) -> &FrameScheduler {
        &self.scheduler
    }

    /// Device tier
    pub fn context(&self) -> &DeviceContext<E> {
        &self.context
    }

    /// Current swapchain extent
    pub fn swapchain_extent(&self) -> vk::Extent2D {
        self.swapchain.extent()
    }

    /// Current swapchain surface format
    pub fn surface_format(&self) -> vk::SurfaceFormatKHR {
        self.swapchain.format()
    }
}

impl<E: GpuEntry> Drop for Renderer<E> {
    fn drop(&mut self) {
        if let Err(e) = self.context.wait_idle() {
            self.log.error(format!("Device wait idle failed during shutdown: {e}"));
        }
        self.log.info("Shutting down renderer");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::tests::FakeWindow;
    use crate::render::backend::mock::{MockGpu, MockSetup};
    use crate::render::error::ErrorKind;
    use crate::render::test_support::test_config;

    fn renderer(gpu: &MockGpu, window: Rc<FakeWindow>, config: &RendererConfig) -> RenderResult<Renderer<crate::render::backend::mock::MockEntry>> {
        Renderer::new(&gpu.entry(), window, config, Logger::default())
    }

    #[test]
    fn test_teardown_releases_every_object() {
        let gpu = MockGpu::new(MockSetup::default());
        let window = Rc::new(FakeWindow::new(800, 600));
        let mut renderer = renderer(&gpu, window.clone(), &test_config("renderer_teardown")).unwrap();

        for _ in 0..10 {
            renderer.render_frame().unwrap();
        }
        window.resize(1024, 768);
        renderer.request_resize();
        renderer.render_frame().unwrap();
        assert_eq!(renderer.swapchain_extent(), vk::Extent2D { width: 1024, height: 768 });

        drop(renderer);

        assert_eq!(gpu.total_live(), 0);
        assert!(gpu.violations().is_empty(), "{:?}", gpu.violations());
    }

    #[test]
    fn test_drop_waits_for_idle_before_destroying() {
        let gpu = MockGpu::new(MockSetup::default());
        let mut renderer = renderer(&gpu, Rc::new(FakeWindow::new(800, 600)), &test_config("renderer_idle")).unwrap();
        renderer.render_frame().unwrap();
        gpu.clear_events();

        drop(renderer);

        let events = gpu.events();
        assert_eq!(events.first().map(String::as_str), Some("device_wait_idle"));
        let destroy_device = events.iter().position(|e| e == "destroy_device").unwrap();
        let destroy_instance = events.iter().position(|e| e == "destroy_instance").unwrap();
        assert!(events[..destroy_device].iter().any(|e| e == "destroy_framebuffer"));
        assert!(destroy_device < destroy_instance);
    }

    #[test]
    fn test_invalid_config_rejected_before_any_gpu_work() {
        let gpu = MockGpu::new(MockSetup::default());
        let config = test_config("renderer_invalid").with_frames_in_flight(0);

        let result = renderer(&gpu, Rc::new(FakeWindow::new(800, 600)), &config);

        let error = result.err().unwrap();
        assert!(matches!(error, RenderError::InvalidConfig { .. }));
        assert_eq!(error.kind(), ErrorKind::Initialization);
        assert!(gpu.events().is_empty());
    }

    #[test]
    fn test_init_failure_at_each_tier_leaks_nothing() {
        let failing_steps = [
            ("create_swapchain", vk::Result::ERROR_INITIALIZATION_FAILED),
            ("create_graphics_pipeline", vk::Result::ERROR_INITIALIZATION_FAILED),
            ("create_sampler", vk::Result::ERROR_OUT_OF_DEVICE_MEMORY),
            ("allocate_memory", vk::Result::ERROR_OUT_OF_DEVICE_MEMORY),
            ("create_fence", vk::Result::ERROR_OUT_OF_HOST_MEMORY),
        ];
        for (op, result) in failing_steps {
            let gpu = MockGpu::new(MockSetup::default());
            gpu.fail(op, result);

            let outcome = renderer(&gpu, Rc::new(FakeWindow::new(800, 600)), &test_config("renderer_fail"));

            assert!(outcome.is_err(), "{op} should fail initialization");
            assert_eq!(gpu.total_live(), 0, "{op} leaked objects");
            assert!(gpu.violations().is_empty(), "{op}: {:?}", gpu.violations());
        }
    }

    #[test]
    fn test_invalid_scene_rejected_before_any_gpu_work() {
        let short_texture = TextureData {
            width: 256,
            height: 256,
            pixels: vec![0; 16],
        };
        let empty_mesh = Mesh {
            vertices: Vec::new(),
            indices: Vec::new(),
        };
        let mut stray_index = Mesh::quad_stack();
        stray_index.indices[0] = 100;
        let scenes = [
            (Mesh::quad_stack(), short_texture),
            (empty_mesh, TextureData::default()),
            (stray_index, TextureData::default()),
        ];

        for (mesh, texture) in &scenes {
            let gpu = MockGpu::new(MockSetup::default());
            let result = Renderer::with_scene(
                &gpu.entry(),
                Rc::new(FakeWindow::new(800, 600)),
                &test_config("renderer_scene"),
                Logger::default(),
                mesh,
                texture,
            );

            let error = result.err().unwrap();
            assert!(matches!(error, RenderError::InvalidScene { .. }), "{error}");
            assert_eq!(error.kind(), ErrorKind::Initialization);
            assert!(gpu.events().is_empty());
        }
    }

    #[test]
    fn test_untextured_renderer_ignores_texture_data() {
        let gpu = MockGpu::new(MockSetup::default());
        let config = test_config("renderer_untextured").with_texture(false);
        let unused = TextureData {
            width: 0,
            height: 0,
            pixels: Vec::new(),
        };

        let renderer = Renderer::with_scene(
            &gpu.entry(),
            Rc::new(FakeWindow::new(800, 600)),
            &config,
            Logger::default(),
            &Mesh::quad_stack(),
            &unused,
        );

        assert!(renderer.is_ok());
        assert!(gpu.violations().is_empty(), "{:?}", gpu.violations());
    }

    #[test]
    fn test_retry_after_transient_failure() {
        let gpu = MockGpu::new(MockSetup::default());
        gpu.fail("create_fence", vk::Result::ERROR_OUT_OF_HOST_MEMORY);
        let config = test_config("renderer_retry");

        assert!(renderer(&gpu, Rc::new(FakeWindow::new(800, 600)), &config).is_err());
        assert_eq!(gpu.total_live(), 0);

        gpu.clear_failures();
        let mut retried = renderer(&gpu, Rc::new(FakeWindow::new(800, 600)), &config).unwrap();
        retried.render_frame().unwrap();
        drop(retried);

        assert_eq!(gpu.total_live(), 0);
        assert!(gpu.violations().is_empty(), "{:?}", gpu.violations());
    }

    #[test]
    fn test_minimized_window_skips_until_restored() {
        let gpu = MockGpu::new(MockSetup::default());
        let window = Rc::new(FakeWindow::new(800, 600));
        let mut renderer = renderer(&gpu, window.clone(), &test_config("renderer_minimized")).unwrap();

        window.resize(0, 0);
        assert_eq!(renderer.render_frame().unwrap(), FrameOutcome::Skipped);

        window.resize(640, 480);
        renderer.request_resize();
        assert!(matches!(
            renderer.render_frame().unwrap(),
            FrameOutcome::Presented { recreated: true, .. }
        ));
        assert_eq!(renderer.scheduler().frame_counter(), 1);
    }
}
