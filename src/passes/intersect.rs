use std::sync::Arc;

use crate::gpu::GpuBuffer;
use crate::intersector::{Intersection, IntersectionMode, Intersector, Ray};

/// Hands a ray buffer to the injected intersector.
pub struct IntersectPass {
    intersector: Arc<dyn Intersector>,
}

impl IntersectPass {
    pub fn new(intersector: Arc<dyn Intersector>) -> Self {
        Self { intersector }
    }

    pub fn encode(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        mode: IntersectionMode,
        rays: &GpuBuffer<Ray>,
        intersections: &GpuBuffer<Intersection>,
    ) {
        self.intersector
            .encode_intersection(encoder, mode, rays, intersections);
    }
}
