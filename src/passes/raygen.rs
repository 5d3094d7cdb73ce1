use glam::Vec2;

use super::{RenderTargets, dispatch_8x8};
use crate::error::RenderResult;
use crate::geometry::RAY_MASK_PRIMARY;
use crate::gpu::{Extent, GpuContext};
use crate::intersector::Ray;
use crate::uniforms::{FrameDataManager, FrameOffsets, Uniforms};
use crate::wgpu_utils::{
    create_compute_pipeline, create_shader_module, dynamic_storage_entry, dynamic_uniform_entry,
    storage_entry,
};

const SHADER: &str = concat!(
    include_str!("../shaders/common.wgsl"),
    include_str!("../shaders/raygen.wgsl")
);

/// Primary ray through pixel `(x, y)`, jittered by `r` inside the pixel.
pub fn primary_ray(uniforms: &Uniforms, x: u32, y: u32, r: Vec2) -> Ray {
    let size = Vec2::new(uniforms.width as f32, uniforms.height as f32);
    let pixel = Vec2::new(x as f32, y as f32) + r;
    let mut uv = pixel / size * 2.0 - 1.0;
    // Image rows run top to bottom, the camera's up vector points the other way.
    uv.y = -uv.y;

    let camera = &uniforms.camera;
    let direction = (uv.x * camera.right + uv.y * camera.up + camera.forward).normalize();
    Ray::new(camera.position, direction, RAY_MASK_PRIMARY, Ray::UNBOUNDED)
}

/// Writes one jittered primary ray per pixel and clears the render target.
pub struct RayGenPass {
    pipeline: wgpu::ComputePipeline,
    layout: wgpu::BindGroupLayout,
    bind_group: wgpu::BindGroup,
    extent: Extent,
}

impl RayGenPass {
    pub fn new(
        gpu: &GpuContext,
        frame_data: &FrameDataManager,
        targets: &RenderTargets,
    ) -> RenderResult<Self> {
        let device = &gpu.device;
        let shader = create_shader_module(device, "RayGen Shader", SHADER)?;
        let compute = wgpu::ShaderStages::COMPUTE;
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("RayGen Bind Group Layout"),
            entries: &[
                dynamic_uniform_entry(0, compute),
                dynamic_storage_entry(1, compute),
                storage_entry(2, compute, false),
                storage_entry(3, compute, false),
            ],
        });
        let pipeline =
            create_compute_pipeline(device, "RayGen Pipeline", &shader, "main", &[&layout])?;
        let bind_group = Self::bind(device, &layout, frame_data, targets);
        Ok(Self {
            pipeline,
            layout,
            bind_group,
            extent: targets.extent,
        })
    }

    fn bind(
        device: &wgpu::Device,
        layout: &wgpu::BindGroupLayout,
        frame_data: &FrameDataManager,
        targets: &RenderTargets,
    ) -> wgpu::BindGroup {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("RayGen Bind Group"),
            layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: frame_data.uniform_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: frame_data.random_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: targets.rays.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: targets.render_target.as_entire_binding(),
                },
            ],
        })
    }

    pub fn rebind(&mut self, gpu: &GpuContext, frame_data: &FrameDataManager, targets: &RenderTargets) {
        self.bind_group = Self::bind(&gpu.device, &self.layout, frame_data, targets);
        self.extent = targets.extent;
    }

    pub fn encode(&self, encoder: &mut wgpu::CommandEncoder, offsets: &FrameOffsets) {
        let mut cpass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("RayGen Pass"),
            timestamp_writes: None,
        });
        cpass.set_pipeline(&self.pipeline);
        cpass.set_bind_group(0, &self.bind_group, &offsets.uniform_and_randoms());
        dispatch_8x8(&mut cpass, self.extent);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::Camera;
    use crate::uniforms::CameraUniforms;
    use glam::Vec3;

    fn uniforms(width: u32, height: u32) -> Uniforms {
        Uniforms {
            width,
            height,
            camera: CameraUniforms::new(&Camera::cornell(), width, height),
            ..Default::default()
        }
    }

    #[test]
    fn center_pixel_looks_down_the_view_axis() {
        let u = uniforms(64, 64);
        let ray = primary_ray(&u, 32, 32, Vec2::ZERO);
        assert!((ray.direction - Vec3::NEG_Z).length() < 1e-6);
        assert_eq!(ray.origin, Vec3::new(0.0, 1.0, 3.38));
        assert_eq!(ray.mask, RAY_MASK_PRIMARY);
        assert_eq!(ray.max_distance, Ray::UNBOUNDED);
        assert_eq!(ray.color, Vec3::ONE);
    }

    #[test]
    fn top_rows_point_up_and_left_columns_point_left() {
        let u = uniforms(64, 32);
        let top_left = primary_ray(&u, 0, 0, Vec2::splat(0.5));
        assert!(top_left.direction.y > 0.0);
        assert!(top_left.direction.x < 0.0);
        let bottom_right = primary_ray(&u, 63, 31, Vec2::splat(0.5));
        assert!(bottom_right.direction.y < 0.0);
        assert!(bottom_right.direction.x > 0.0);
    }
}
