use std::sync::Arc;

use cornell_path_tracer::scene::Scene;
use cornell_path_tracer::{
    Camera, ComputeIntersector, GpuContext, RenderResult, Renderer, RendererConfig,
};

/// Headless device, or `None` (with a note on stderr) on machines without an adapter.
pub fn gpu() -> Option<GpuContext> {
    match pollster::block_on(GpuContext::headless()) {
        Ok(gpu) => Some(gpu),
        Err(e) => {
            eprintln!("skipping GPU test: {e}");
            None
        }
    }
}

pub fn renderer_for(
    gpu: &GpuContext,
    scene: &Scene,
    config: RendererConfig,
    width: u32,
    height: u32,
) -> RenderResult<Renderer> {
    let intersector = Arc::new(ComputeIntersector::bvh(gpu, scene)?);
    Renderer::new(
        gpu.clone(),
        config,
        scene,
        Camera::cornell(),
        intersector,
        width,
        height,
    )
}
