mod state;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use state::State;
use winit::{
    application::ApplicationHandler,
    event::{ElementState, WindowEvent},
    event_loop::{ControlFlow, EventLoop},
    keyboard::{Key, NamedKey},
    window::Window,
};

use cornell_path_tracer::config::DEFAULT_SEED;
use cornell_path_tracer::scene::{Scene, create_cornell_box};
use cornell_path_tracer::{
    Camera, ComputeIntersector, GpuContext, ImageSurface, Intersector, RenderError, RenderResult,
    Renderer, RendererConfig, screenshot,
};

/// How the intersection kernel walks the scene
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum IntersectorKind {
    /// Median-split bounding volume hierarchy
    #[default]
    Bvh,
    /// Every ray against every triangle
    BruteForce,
}

impl IntersectorKind {
    pub fn build(self, gpu: &GpuContext, scene: &Scene) -> RenderResult<Arc<dyn Intersector>> {
        Ok(match self {
            IntersectorKind::Bvh => Arc::new(ComputeIntersector::bvh(gpu, scene)?),
            IntersectorKind::BruteForce => Arc::new(ComputeIntersector::brute_force(gpu, scene)?),
        })
    }
}

/// Progressive Cornell box path tracer
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Window or image width in pixels
    #[arg(long, default_value_t = 800)]
    width: u32,

    /// Window or image height in pixels
    #[arg(long, default_value_t = 600)]
    height: u32,

    /// Intersect/shade/shadow iterations per frame
    #[arg(long, default_value_t = 3)]
    bounces: u32,

    /// Frames that may be queued ahead of completion
    #[arg(long, default_value_t = 3)]
    frames_in_flight: usize,

    /// Random pool seed
    #[arg(long, default_value_t = DEFAULT_SEED)]
    seed: u64,

    /// Intersection kernel
    #[arg(long, value_enum, default_value_t = IntersectorKind::Bvh)]
    intersector: IntersectorKind,

    /// Render without a window and write a PNG
    #[arg(long)]
    headless: bool,

    /// Frames to accumulate in headless mode
    #[arg(long, default_value_t = 64)]
    frames: u32,

    /// PNG path for headless mode [default: output/render_<timestamp>.png]
    #[arg(long)]
    output: Option<PathBuf>,
}

impl Args {
    fn renderer_config(&self) -> RendererConfig {
        RendererConfig::default()
            .bounces(self.bounces)
            .frames_in_flight(self.frames_in_flight)
            .seed(self.seed)
    }
}

struct App {
    args: Args,
    state: Option<State>,
    error: Option<RenderError>,
}

impl App {
    fn fail(&mut self, el: &winit::event_loop::ActiveEventLoop, error: RenderError) {
        log::error!("{error}");
        self.error = Some(error);
        el.exit();
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, el: &winit::event_loop::ActiveEventLoop) {
        if self.state.is_some() {
            return;
        }
        let attributes = Window::default_attributes()
            .with_title("Cornell Box")
            .with_inner_size(winit::dpi::PhysicalSize::new(self.args.width, self.args.height));
        let window = match el.create_window(attributes) {
            Ok(window) => window,
            Err(e) => return self.fail(el, RenderError::Surface(e.to_string())),
        };
        let config = self.args.renderer_config();
        match pollster::block_on(State::new(window, config, self.args.intersector)) {
            Ok(state) => {
                state.window.request_redraw();
                self.state = Some(state);
            }
            Err(e) => self.fail(el, e),
        }
    }

    fn window_event(
        &mut self,
        el: &winit::event_loop::ActiveEventLoop,
        _: winit::window::WindowId,
        ev: WindowEvent,
    ) {
        let Some(state) = &mut self.state else {
            return;
        };
        let result = match ev {
            WindowEvent::CloseRequested => {
                let result = state.shutdown();
                el.exit();
                result
            }
            WindowEvent::Resized(size) => state.resize(size),
            WindowEvent::KeyboardInput { event, .. } if event.state == ElementState::Pressed => {
                match event.logical_key.as_ref() {
                    Key::Named(NamedKey::Escape) => {
                        let result = state.shutdown();
                        el.exit();
                        result
                    }
                    Key::Character("s") => state.save_screenshot().map(|_| ()),
                    _ => Ok(()),
                }
            }
            WindowEvent::RedrawRequested => {
                let result = state.render().map(|_| ());
                state.window.request_redraw();
                result
            }
            _ => Ok(()),
        };
        if let Err(e) = result {
            self.fail(el, e);
        }
    }
}

fn run_headless(args: &Args) -> anyhow::Result<()> {
    let gpu = pollster::block_on(GpuContext::headless())?;
    let scene = create_cornell_box()?;
    let intersector = args.intersector.build(&gpu, &scene)?;
    let mut renderer = Renderer::new(
        gpu.clone(),
        args.renderer_config(),
        &scene,
        Camera::cornell(),
        intersector,
        args.width,
        args.height,
    )?;
    let mut surface = ImageSurface::new(&gpu, args.width, args.height);

    let start = std::time::Instant::now();
    for frame in 0..args.frames {
        renderer.render(&mut surface)?;
        // Presented images are not needed, only the final average.
        while surface.try_recv()?.is_some() {}
        if (frame + 1) % 16 == 0 {
            log::info!("{} / {} frames", frame + 1, args.frames);
        }
    }

    let image = screenshot::capture(&renderer.read_accumulation()?);
    log::info!(
        "rendered {} frames at {}x{} in {:.2?}",
        args.frames,
        args.width,
        args.height,
        start.elapsed()
    );

    let path = args.output.clone().unwrap_or_else(screenshot::default_path);
    screenshot::save_png(&image, &path)?;
    Ok(())
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    if args.headless {
        return run_headless(&args);
    }

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);
    let mut app = App {
        args,
        state: None,
        error: None,
    };
    event_loop.run_app(&mut app)?;

    match app.error {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}
