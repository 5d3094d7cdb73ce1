//! Per-frame compute stages and the present pass.
//!
//! Every stage is one WGSL kernel dispatched over 8×8 workgroups. Passes compile their
//! pipeline once and rebuild only their bind group when the render targets change. Stages
//! run in encoding order, so a pass always sees the complete output of the pass before it.

pub mod accumulate;
pub mod intersect;
pub mod present;
pub mod raygen;
pub mod shade;
pub mod shadow;

use glam::Vec4;

use crate::error::RenderResult;
use crate::gpu::{Extent, GpuBuffer, GpuContext};
use crate::intersector::{Intersection, Ray};

pub use accumulate::AccumulatePass;
pub use intersect::IntersectPass;
pub use present::PresentPass;
pub use raygen::RayGenPass;
pub use shade::{SceneBuffers, ShadePass};
pub use shadow::ShadowPass;

/// Size-dependent device resources. Recreated as a whole on resize.
#[derive(Clone, Debug)]
pub struct RenderTargets {
    pub extent: Extent,
    pub rays: GpuBuffer<Ray>,
    pub shadow_rays: GpuBuffer<Ray>,
    pub intersections: GpuBuffer<Intersection>,
    /// This frame's radiance estimate.
    pub render_target: GpuBuffer<Vec4>,
    /// Running average over all frames since the last resize.
    pub accumulation: GpuBuffer<Vec4>,
}

impl RenderTargets {
    pub fn new(gpu: &GpuContext, extent: Extent) -> RenderResult<Self> {
        let count = extent.texel_count();
        let usage = wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC;
        let targets = Self {
            extent,
            rays: gpu.create_buffer("Ray Buffer", count, usage)?,
            shadow_rays: gpu.create_buffer("Shadow Ray Buffer", count, usage)?,
            intersections: gpu.create_buffer("Intersection Buffer", count, usage)?,
            render_target: gpu.create_buffer("Render Target", count, usage)?,
            accumulation: gpu.create_buffer("Accumulation Buffer", count, usage)?,
        };
        log::debug!(
            "allocated {}x{} render targets ({} bytes)",
            extent.width,
            extent.height,
            targets.size()
        );
        Ok(targets)
    }

    pub fn size(&self) -> u64 {
        self.rays.size()
            + self.shadow_rays.size()
            + self.intersections.size()
            + self.render_target.size()
            + self.accumulation.size()
    }

    /// Frees the device memory now instead of when the last bind group lets go.
    pub fn destroy(&self) {
        self.rays.buffer().destroy();
        self.shadow_rays.buffer().destroy();
        self.intersections.buffer().destroy();
        self.render_target.buffer().destroy();
        self.accumulation.buffer().destroy();
    }
}

fn dispatch_8x8(cpass: &mut wgpu::ComputePass<'_>, extent: Extent) {
    let (x, y) = extent.workgroups_8x8();
    cpass.dispatch_workgroups(x, y, 1);
}
