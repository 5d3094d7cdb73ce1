use std::path::PathBuf;
use std::sync::Arc;

use winit::window::Window;

use cornell_path_tracer::scene::create_cornell_box;
use cornell_path_tracer::screenshot;
use cornell_path_tracer::wgpu_ctx::WgpuContext;
use cornell_path_tracer::window_surface::WindowSurface;
use cornell_path_tracer::{Camera, FrameStatus, RenderResult, Renderer, RendererConfig};

use crate::IntersectorKind;

/// Everything the windowed mode keeps alive between events.
pub struct State {
    pub window: Arc<Window>,
    surface: WindowSurface,
    renderer: Renderer,
}

impl State {
    pub async fn new(
        window: Window,
        config: RendererConfig,
        intersector: IntersectorKind,
    ) -> RenderResult<Self> {
        let window = Arc::new(window);
        let ctx = WgpuContext::new(window.clone()).await?;
        let surface = WindowSurface::new(ctx);
        let gpu = surface.gpu();
        let extent = surface.extent();

        let scene = create_cornell_box()?;
        let intersector = intersector.build(&gpu, &scene)?;
        let renderer = Renderer::new(
            gpu,
            config,
            &scene,
            Camera::cornell(),
            intersector,
            extent.width,
            extent.height,
        )?;

        Ok(Self {
            window,
            surface,
            renderer,
        })
    }

    pub fn resize(&mut self, size: winit::dpi::PhysicalSize<u32>) -> RenderResult<()> {
        if size.width == 0 || size.height == 0 {
            return Ok(());
        }
        self.surface.resize(size.width, size.height);
        self.renderer.resize(size.width, size.height)
    }

    pub fn render(&mut self) -> RenderResult<FrameStatus> {
        self.renderer.render(&mut self.surface)
    }

    pub fn save_screenshot(&mut self) -> RenderResult<PathBuf> {
        let image = screenshot::capture(&self.renderer.read_accumulation()?);
        let path = screenshot::default_path();
        screenshot::save_png(&image, &path)?;
        Ok(path)
    }

    pub fn shutdown(&mut self) -> RenderResult<()> {
        self.renderer.drain()?;
        log::info!(
            "exiting after {} accumulated frames",
            self.renderer.frame_index()
        );
        Ok(())
    }
}
