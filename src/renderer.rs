use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::camera::Camera;
use crate::config::RendererConfig;
use crate::error::{RenderError, RenderResult};
use crate::frames::{FrameSlot, InFlightFrames};
use crate::gpu::{Extent, GpuContext, RadianceImage};
use crate::intersector::{IntersectionMode, Intersector};
use crate::passes::*;
use crate::scene::Scene;
use crate::surface::DisplaySurface;
use crate::uniforms::FrameDataManager;

/// Outcome of one [`Renderer::render`] call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameStatus {
    /// The frame was encoded, submitted and presented; the device finishes it in the
    /// background.
    Presented { frame_index: u32 },
    /// The surface had no drawable. Nothing was encoded and no state changed.
    Skipped,
}

/// Pipelines of every stage, bound to the current render targets.
struct Passes {
    raygen: RayGenPass,
    intersect: IntersectPass,
    shade: ShadePass,
    shadow: ShadowPass,
    accumulate: AccumulatePass,
    present: PresentPass,
}

impl Passes {
    fn new(
        gpu: &GpuContext,
        scene: SceneBuffers,
        intersector: Arc<dyn Intersector>,
        frame_data: &FrameDataManager,
        targets: &RenderTargets,
    ) -> RenderResult<Self> {
        Ok(Self {
            raygen: RayGenPass::new(gpu, frame_data, targets)?,
            intersect: IntersectPass::new(intersector),
            shade: ShadePass::new(gpu, scene, frame_data, targets)?,
            shadow: ShadowPass::new(gpu, frame_data, targets)?,
            accumulate: AccumulatePass::new(gpu, frame_data, targets)?,
            present: PresentPass::new(gpu, frame_data, targets)?,
        })
    }

    fn rebind(&mut self, gpu: &GpuContext, frame_data: &FrameDataManager, targets: &RenderTargets) {
        self.raygen.rebind(gpu, frame_data, targets);
        self.shade.rebind(gpu, frame_data, targets);
        self.shadow.rebind(gpu, frame_data, targets);
        self.accumulate.rebind(gpu, frame_data, targets);
        self.present.rebind(gpu, frame_data, targets);
    }
}

/// Progressive path tracer. Every call to [`render`](Self::render) adds one sample per pixel
/// to the running average and presents the result.
pub struct Renderer {
    gpu: GpuContext,
    bounce_count: u32,
    frames: InFlightFrames,
    frame_data: FrameDataManager,
    targets: RenderTargets,
    passes: Passes,
    /// Submissions that may still hold a slot, oldest first.
    pending: VecDeque<wgpu::SubmissionIndex>,
    completed: Arc<AtomicU32>,
}

impl Renderer {
    /// Compiles every pipeline and allocates `width`×`height` render targets on `gpu`.
    ///
    /// `intersector` must have been built for `scene` on the same device.
    pub fn new(
        gpu: GpuContext,
        config: RendererConfig,
        scene: &Scene,
        camera: Camera,
        intersector: Arc<dyn Intersector>,
        width: u32,
        height: u32,
    ) -> RenderResult<Self> {
        config.validate()?;
        let extent = Extent::new(width, height);
        if extent.is_empty() {
            return Err(RenderError::InvalidConfig(format!(
                "render size {width}x{height} is empty"
            )));
        }
        if scene.triangle_count() == 0 {
            return Err(RenderError::EmptyScene);
        }

        let gpu = gpu.with_allocation_limit(config.max_allocation_bytes);
        let frames = InFlightFrames::new(config.frames_in_flight);
        let frame_data = FrameDataManager::new(
            &gpu,
            config.frames_in_flight,
            config.seed,
            camera,
            *scene.light(),
        )?;
        let targets = RenderTargets::new(&gpu, extent)?;
        let scene_buffers = SceneBuffers::new(&gpu, scene)?;
        let passes = Passes::new(&gpu, scene_buffers, intersector, &frame_data, &targets)?;
        log::info!(
            "renderer ready: {} triangles, {}x{}, {} bounces, {} frames in flight",
            scene.triangle_count(),
            width,
            height,
            config.bounce_count,
            config.frames_in_flight
        );

        Ok(Self {
            gpu,
            bounce_count: config.bounce_count,
            frames,
            frame_data,
            targets,
            passes,
            pending: VecDeque::with_capacity(config.frames_in_flight),
            completed: Arc::new(AtomicU32::new(0)),
        })
    }

    pub fn extent(&self) -> Extent {
        self.targets.extent
    }

    /// Samples accumulated since the last resize, including frames still in flight.
    pub fn frame_index(&self) -> u32 {
        self.frame_data.frame_index()
    }

    /// Frames whose commands finished on the device, over the renderer's lifetime.
    pub fn completed_frames(&self) -> u32 {
        self.completed.load(Ordering::Acquire)
    }

    /// Frames submitted and not yet finished. Never more than
    /// [`RendererConfig::frames_in_flight`].
    pub fn in_flight_frames(&self) -> usize {
        self.frames.in_flight()
    }

    /// Takes a free slot, waiting on the oldest submission while all of them are busy.
    fn acquire_slot(&mut self) -> RenderResult<FrameSlot> {
        loop {
            if let Some(slot) = self.frames.try_acquire() {
                return Ok(slot);
            }
            let Some(oldest) = self.pending.pop_front() else {
                self.gpu.wait_idle()?;
                return self.frames.try_acquire().ok_or_else(|| {
                    RenderError::DeviceLost("frame slots were not released".into())
                });
            };
            log::trace!("all frame slots busy, waiting for the oldest frame");
            self.gpu.wait_for(oldest)?;
        }
    }

    /// Encodes, submits and presents one frame.
    ///
    /// The drawable is acquired before anything else so that a frame without one leaves the
    /// renderer untouched. Blocks while all in-flight slots are busy.
    pub fn render(&mut self, surface: &mut dyn DisplaySurface) -> RenderResult<FrameStatus> {
        let Some(drawable) = surface.acquire() else {
            log::trace!("no drawable available, skipping frame");
            return Ok(FrameStatus::Skipped);
        };
        self.passes.present.prepare(&self.gpu, drawable.format())?;

        let slot = self.acquire_slot()?;
        let extent = self.targets.extent;
        let offsets =
            self.frame_data
                .advance_frame(&self.gpu.queue, &slot, extent.width, extent.height);

        let passes = &self.passes;
        let targets = &self.targets;
        let mut encoder = self
            .gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Frame Encoder"),
            });

        passes.raygen.encode(&mut encoder, &offsets);
        for _ in 0..self.bounce_count {
            passes.intersect.encode(
                &mut encoder,
                IntersectionMode::Nearest,
                &targets.rays,
                &targets.intersections,
            );
            passes.shade.encode(&mut encoder, &offsets);
            passes.intersect.encode(
                &mut encoder,
                IntersectionMode::Any,
                &targets.shadow_rays,
                &targets.intersections,
            );
            passes.shadow.encode(&mut encoder, &offsets);
        }
        passes.accumulate.encode(&mut encoder, &offsets);
        passes
            .present
            .encode(&mut encoder, &offsets, drawable.view(), drawable.format());
        drawable.encode_after_present(&mut encoder);

        let completed = self.completed.clone();
        encoder.on_submitted_work_done(move || {
            completed.fetch_add(1, Ordering::Release);
            drop(slot);
        });
        let index = self.gpu.queue.submit(std::iter::once(encoder.finish()));
        self.pending.push_back(index);
        while self.pending.len() > self.frames.capacity() {
            self.pending.pop_front();
        }
        drawable.present();

        log::trace!(
            "submitted frame {} in slot {}",
            offsets.frame_index,
            offsets.slot
        );
        Ok(FrameStatus::Presented {
            frame_index: offsets.frame_index,
        })
    }

    /// Reallocates every size-dependent resource and restarts accumulation.
    ///
    /// Zero-sized and unchanged sizes are ignored.
    pub fn resize(&mut self, width: u32, height: u32) -> RenderResult<()> {
        let extent = Extent::new(width, height);
        if extent.is_empty() || extent == self.targets.extent {
            return Ok(());
        }

        self.drain()?;
        let targets = RenderTargets::new(&self.gpu, extent)?;
        let old = std::mem::replace(&mut self.targets, targets);
        self.passes.rebind(&self.gpu, &self.frame_data, &self.targets);
        old.destroy();

        self.frame_data.reset();
        log::info!("resized to {width}x{height}, accumulation restarted");
        Ok(())
    }

    /// Blocks until every submitted frame has completed.
    pub fn drain(&mut self) -> RenderResult<()> {
        self.gpu.wait_idle()?;
        self.pending.clear();
        self.frames.drain();
        Ok(())
    }

    /// Copy of the running average, after all submitted frames have completed.
    pub fn read_accumulation(&mut self) -> RenderResult<RadianceImage> {
        self.drain()?;
        let texels = self.gpu.read_buffer(&self.targets.accumulation)?;
        Ok(RadianceImage::new(self.targets.extent, texels))
    }
}
