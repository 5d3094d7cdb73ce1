mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use pretty_assertions::assert_eq;
use rstest::rstest;

use cornell_path_tracer::gpu::Extent;
use cornell_path_tracer::scene::{create_cornell_box, create_empty_room};
use cornell_path_tracer::{
    Camera, ComputeIntersector, DisplaySurface, Drawable, FrameStatus, GpuContext, ImageSurface,
    RenderError, Renderer, RendererConfig, screenshot,
};

fn renderer(gpu: &GpuContext, config: RendererConfig, width: u32, height: u32) -> Renderer {
    let scene = create_cornell_box().unwrap();
    common::renderer_for(gpu, &scene, config, width, height).unwrap()
}

/// Wraps an [`ImageSurface`] and fails if a drawable is requested while an earlier one has
/// not been presented, the way a swapchain refuses a second image.
struct SingleImageSurface {
    inner: ImageSurface,
    outstanding: Arc<AtomicBool>,
}

impl SingleImageSurface {
    fn new(gpu: &GpuContext, width: u32, height: u32) -> Self {
        Self {
            inner: ImageSurface::new(gpu, width, height),
            outstanding: Arc::new(AtomicBool::new(false)),
        }
    }

    fn is_outstanding(&self) -> bool {
        self.outstanding.load(Ordering::Acquire)
    }
}

impl DisplaySurface for SingleImageSurface {
    fn acquire(&mut self) -> Option<Box<dyn Drawable>> {
        assert!(
            !self.outstanding.swap(true, Ordering::AcqRel),
            "a second drawable was requested before the first was presented"
        );
        let inner = self.inner.acquire()?;
        Some(Box::new(TrackedDrawable {
            inner,
            outstanding: self.outstanding.clone(),
        }))
    }
}

struct TrackedDrawable {
    inner: Box<dyn Drawable>,
    outstanding: Arc<AtomicBool>,
}

impl Drawable for TrackedDrawable {
    fn extent(&self) -> Extent {
        self.inner.extent()
    }

    fn format(&self) -> wgpu::TextureFormat {
        self.inner.format()
    }

    fn view(&self) -> &wgpu::TextureView {
        self.inner.view()
    }

    fn encode_after_present(&self, encoder: &mut wgpu::CommandEncoder) {
        self.inner.encode_after_present(encoder);
    }

    fn present(self: Box<Self>) {
        let TrackedDrawable { inner, outstanding } = *self;
        inner.present();
        outstanding.store(false, Ordering::Release);
    }
}

#[test]
fn each_drawable_is_presented_before_the_next_is_acquired() {
    let Some(gpu) = common::gpu() else { return };
    let config = RendererConfig::default().frames_in_flight(3);
    let mut renderer = renderer(&gpu, config, 24, 16);
    let mut surface = SingleImageSurface::new(&gpu, 24, 16);
    for expected in 0..6 {
        assert_eq!(
            renderer.render(&mut surface).unwrap(),
            FrameStatus::Presented {
                frame_index: expected
            }
        );
        assert!(!surface.is_outstanding(), "frame {expected} kept its drawable");
    }
    renderer.drain().unwrap();
    assert_eq!(surface.inner.pending(), 6);
}

#[test]
fn fourth_frame_waits_for_the_oldest_to_complete() {
    let Some(gpu) = common::gpu() else { return };
    let config = RendererConfig::default().frames_in_flight(3);
    let mut renderer = renderer(&gpu, config, 32, 32);
    let mut surface = ImageSurface::new(&gpu, 32, 32);
    assert_eq!(renderer.in_flight_frames(), 0);

    for n in 1..=6u32 {
        renderer.render(&mut surface).unwrap();
        assert!(renderer.in_flight_frames() <= 3);
        if n > 3 {
            // Frame n could only take a slot once frame n - 3 had finished.
            assert!(
                renderer.completed_frames() >= n - 3,
                "frame {n} started with only {} completed",
                renderer.completed_frames()
            );
        }
    }
    renderer.drain().unwrap();
    assert_eq!(renderer.in_flight_frames(), 0);
    assert_eq!(renderer.completed_frames(), 6);
}

#[test]
fn frame_index_counts_presented_frames() {
    let Some(gpu) = common::gpu() else { return };
    let mut renderer = renderer(&gpu, RendererConfig::default(), 24, 16);
    let mut surface = ImageSurface::new(&gpu, 24, 16);
    for expected in 0..5 {
        assert_eq!(
            renderer.render(&mut surface).unwrap(),
            FrameStatus::Presented {
                frame_index: expected
            }
        );
    }
    assert_eq!(renderer.frame_index(), 5);
    renderer.drain().unwrap();
    assert_eq!(surface.pending(), 5);
}

#[test]
fn missing_drawable_skips_without_side_effects() {
    let Some(gpu) = common::gpu() else { return };
    let mut renderer = renderer(&gpu, RendererConfig::default(), 16, 16);
    let mut surface = ImageSurface::new(&gpu, 16, 16);
    renderer.render(&mut surface).unwrap();
    let before = renderer.read_accumulation().unwrap();

    surface.set_available(false);
    for _ in 0..3 {
        assert_eq!(renderer.render(&mut surface).unwrap(), FrameStatus::Skipped);
    }
    assert_eq!(renderer.frame_index(), 1);
    assert_eq!(renderer.completed_frames(), 1);
    assert_eq!(renderer.read_accumulation().unwrap(), before);

    surface.set_available(true);
    assert_eq!(
        renderer.render(&mut surface).unwrap(),
        FrameStatus::Presented { frame_index: 1 }
    );
    renderer.drain().unwrap();
    assert_eq!(surface.pending(), 2);
}

#[test]
fn resize_reallocates_and_restarts_accumulation() {
    let Some(gpu) = common::gpu() else { return };
    let mut renderer = renderer(&gpu, RendererConfig::default(), 32, 32);
    let mut surface = ImageSurface::new(&gpu, 32, 32);
    for _ in 0..3 {
        renderer.render(&mut surface).unwrap();
    }
    assert_eq!(renderer.frame_index(), 3);

    renderer.resize(48, 20).unwrap();
    assert_eq!(renderer.frame_index(), 0);
    assert_eq!(renderer.extent(), Extent::new(48, 20));
    let fresh = renderer.read_accumulation().unwrap();
    assert_eq!(fresh.extent(), Extent::new(48, 20));
    assert!(fresh.texels().iter().all(|t| *t == glam::Vec4::ZERO));

    assert_eq!(
        renderer.render(&mut surface).unwrap(),
        FrameStatus::Presented { frame_index: 0 }
    );
    let first = renderer.read_accumulation().unwrap();
    assert!(first.texels().iter().any(|t| *t != glam::Vec4::ZERO));
}

#[rstest]
#[case::zero_width(0, 10)]
#[case::zero_height(10, 0)]
#[case::unchanged(32, 32)]
fn degenerate_resizes_are_ignored(#[case] width: u32, #[case] height: u32) {
    let Some(gpu) = common::gpu() else { return };
    let mut renderer = renderer(&gpu, RendererConfig::default(), 32, 32);
    let mut surface = ImageSurface::new(&gpu, 32, 32);
    renderer.render(&mut surface).unwrap();

    renderer.resize(width, height).unwrap();
    assert_eq!(renderer.extent(), Extent::new(32, 32));
    assert_eq!(renderer.frame_index(), 1);
}

#[test]
fn presented_frames_are_scaled_to_the_drawable() {
    let Some(gpu) = common::gpu() else { return };
    let mut renderer = renderer(&gpu, RendererConfig::default(), 16, 8);
    let mut surface = ImageSurface::new(&gpu, 40, 30);
    renderer.render(&mut surface).unwrap();
    let image = surface
        .next_image()
        .unwrap()
        .expect("frame was presented");
    assert_eq!(image.dimensions(), (40, 30));
    assert!(image.pixels().all(|p| p.0[3] == 255));
}

#[test]
fn presented_frame_matches_the_tonemapped_accumulation() {
    let Some(gpu) = common::gpu() else { return };
    let mut renderer = renderer(&gpu, RendererConfig::default(), 24, 24);
    let mut surface = ImageSurface::new(&gpu, 24, 24);
    renderer.render(&mut surface).unwrap();

    let presented = surface.next_image().unwrap().expect("frame was presented");
    let captured = screenshot::capture(&renderer.read_accumulation().unwrap());
    let off_by_more_than_one = presented
        .pixels()
        .zip(captured.pixels())
        .filter(|(p, c)| p.0.iter().zip(c.0).any(|(&a, b)| a.abs_diff(b) > 1))
        .count();
    assert_eq!(off_by_more_than_one, 0);
}

#[rstest]
#[case(1)]
#[case(2)]
#[case(3)]
fn more_frames_than_slots_all_complete(#[case] frames_in_flight: usize) {
    let Some(gpu) = common::gpu() else { return };
    let config = RendererConfig::default().frames_in_flight(frames_in_flight);
    let mut renderer = renderer(&gpu, config, 16, 16);
    let mut surface = ImageSurface::new(&gpu, 16, 16);
    for _ in 0..10 {
        renderer.render(&mut surface).unwrap();
        assert!(renderer.in_flight_frames() <= frames_in_flight);
    }
    renderer.drain().unwrap();
    assert_eq!(surface.pending(), 10);
    assert_eq!(renderer.completed_frames(), 10);
}

#[test]
fn same_seed_renders_the_same_image() {
    let Some(gpu) = common::gpu() else { return };
    let render = || {
        let mut renderer = renderer(&gpu, RendererConfig::default().seed(9), 24, 24);
        let mut surface = ImageSurface::new(&gpu, 24, 24);
        for _ in 0..4 {
            renderer.render(&mut surface).unwrap();
        }
        renderer.read_accumulation().unwrap()
    };
    assert_eq!(render(), render());
}

#[test]
fn invalid_setups_are_rejected() {
    let Some(gpu) = common::gpu() else { return };
    let scene = create_empty_room().unwrap();
    let intersector = Arc::new(ComputeIntersector::bvh(&gpu, &scene).unwrap());
    let build = |config: RendererConfig, width, height| {
        Renderer::new(
            gpu.clone(),
            config,
            &scene,
            Camera::cornell(),
            intersector.clone(),
            width,
            height,
        )
    };

    assert!(matches!(
        build(RendererConfig::default().frames_in_flight(0), 8, 8),
        Err(RenderError::InvalidConfig(_))
    ));
    assert!(matches!(
        build(RendererConfig::default(), 0, 8),
        Err(RenderError::InvalidConfig(_))
    ));
    assert!(matches!(
        build(RendererConfig::default().max_allocation_bytes(1024), 64, 64),
        Err(RenderError::ResourceExhausted { .. })
    ));
}

#[test]
fn accumulated_image_is_written_as_png() {
    let Some(gpu) = common::gpu() else { return };
    let mut renderer = renderer(&gpu, RendererConfig::default(), 20, 10);
    let mut surface = ImageSurface::new(&gpu, 20, 10);
    renderer.render(&mut surface).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("render.png");
    let image = screenshot::capture(&renderer.read_accumulation().unwrap());
    screenshot::save_png(&image, &path).unwrap();

    let loaded = image::open(&path).unwrap().to_rgba8();
    assert_eq!(loaded.dimensions(), (20, 10));
    assert_eq!(loaded, image);
}
