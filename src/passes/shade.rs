use std::f32::consts::PI;

use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3};

use super::{RenderTargets, dispatch_8x8};
use crate::error::RenderResult;
use crate::geometry::{RAY_MASK_SECONDARY, RAY_MASK_SHADOW, TriangleMask};
use crate::gpu::{Extent, GpuBuffer, GpuContext};
use crate::intersector::{Intersection, Ray};
use crate::scene::{AreaLight, Scene};
use crate::uniforms::{FrameDataManager, FrameOffsets};
use crate::wgpu_utils::{
    create_compute_pipeline, create_shader_module, dynamic_storage_entry, dynamic_uniform_entry,
    storage_entry,
};

const SHADER: &str = concat!(
    include_str!("../shaders/common.wgsl"),
    include_str!("../shaders/shade.wgsl")
);

/// Offset along the surface normal applied to secondary and shadow ray origins.
pub const SURFACE_EPSILON: f32 = 1e-3;

/// Cosine-weighted direction around +Y.
pub fn cosine_weighted_hemisphere(r: Vec2) -> Vec3 {
    let phi = 2.0 * PI * r.x;
    let (sin_phi, cos_phi) = phi.sin_cos();
    let cos_theta = r.y.sqrt();
    let sin_theta = (1.0 - cos_theta * cos_theta).max(0.0).sqrt();
    Vec3::new(sin_theta * cos_phi, cos_theta, sin_theta * sin_phi)
}

/// Rotates a +Y hemisphere sample so that +Y maps onto `normal`.
pub fn align_with_normal(sample: Vec3, normal: Vec3) -> Vec3 {
    let up = normal;
    // Any fixed vector that is never parallel to an axis-aligned normal works here.
    let right = normal.cross(Vec3::new(0.0072, 1.0, 0.0034)).normalize();
    let forward = right.cross(up);
    sample.x * right + sample.y * up + sample.z * forward
}

/// Shades one path vertex.
///
/// On a geometry hit the direct light contribution is returned and also stored in the shadow
/// ray, so that [`resolve_shadow`](super::shadow::resolve_shadow) can take it back if the
/// light turns out to be occluded. `ray` becomes the continuation of the path. Light hits
/// terminate the path; misses terminate both rays.
pub fn shade(
    scene: &Scene,
    light: &AreaLight,
    ray: &mut Ray,
    hit: &Intersection,
    shadow_ray: &mut Ray,
    r: Vec2,
) -> Vec3 {
    if !ray.is_active() || !hit.is_hit() {
        ray.deactivate();
        shadow_ray.deactivate();
        return Vec3::ZERO;
    }

    let triangle = hit.primitive_index as usize;
    match scene.masks()[triangle] {
        TriangleMask::Light => {
            let emitted = ray.color * light.color;
            ray.deactivate();
            shadow_ray.deactivate();
            emitted
        }
        TriangleMask::Geometry => {
            let coordinates = hit.coordinates.to_array();
            let point = ray.origin + ray.direction * hit.distance;
            let normal = Scene::interpolate(scene.normals(), triangle, coordinates).normalize();
            let color = Scene::interpolate(scene.colors(), triangle, coordinates) * ray.color;

            let (to_light, distance, radiance) = light.sample(r.to_array(), point);
            let contribution = radiance * normal.dot(to_light).clamp(0.0, 1.0) * color;

            let origin = point + normal * SURFACE_EPSILON;
            *shadow_ray = Ray::new(origin, to_light, RAY_MASK_SHADOW, distance - SURFACE_EPSILON)
                .with_color(contribution);

            let bounce = align_with_normal(cosine_weighted_hemisphere(r), normal);
            *ray = Ray::new(origin, bounce, RAY_MASK_SECONDARY, Ray::UNBOUNDED).with_color(color);

            contribution
        }
    }
}

/// Per-vertex shading attributes in kernel layout.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct ShadingVertex {
    pub normal: Vec3,
    pub _pad0: f32,
    pub color: Vec3,
    pub _pad1: f32,
}

/// Scene data the shading kernel reads: vertex attributes and one mask per triangle.
pub struct SceneBuffers {
    pub vertices: GpuBuffer<ShadingVertex>,
    pub masks: GpuBuffer<u32>,
}

impl SceneBuffers {
    pub fn new(gpu: &GpuContext, scene: &Scene) -> RenderResult<Self> {
        let vertices: Vec<ShadingVertex> = scene
            .normals()
            .iter()
            .zip(scene.colors())
            .map(|(&normal, &color)| ShadingVertex {
                normal,
                color,
                ..ShadingVertex::default()
            })
            .collect();
        let masks: Vec<u32> = scene.masks().iter().map(|m| m.bits()).collect();
        let usage = wgpu::BufferUsages::STORAGE;
        Ok(Self {
            vertices: gpu.create_buffer_init("Shading Vertices", &vertices, usage)?,
            masks: gpu.create_buffer_init("Shading Triangle Masks", &masks, usage)?,
        })
    }
}

/// Direct lighting with a shadow ray per pixel, then the cosine-weighted continuation.
pub struct ShadePass {
    pipeline: wgpu::ComputePipeline,
    layout: wgpu::BindGroupLayout,
    bind_group: wgpu::BindGroup,
    scene: SceneBuffers,
    extent: Extent,
}

impl ShadePass {
    pub fn new(
        gpu: &GpuContext,
        scene: SceneBuffers,
        frame_data: &FrameDataManager,
        targets: &RenderTargets,
    ) -> RenderResult<Self> {
        let device = &gpu.device;
        let shader = create_shader_module(device, "Shade Shader", SHADER)?;
        let compute = wgpu::ShaderStages::COMPUTE;
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Shade Bind Group Layout"),
            entries: &[
                dynamic_uniform_entry(0, compute),
                dynamic_storage_entry(1, compute),
                storage_entry(2, compute, false),
                storage_entry(3, compute, false),
                storage_entry(4, compute, true),
                storage_entry(5, compute, true),
                storage_entry(6, compute, true),
                storage_entry(7, compute, false),
            ],
        });
        let pipeline =
            create_compute_pipeline(device, "Shade Pipeline", &shader, "main", &[&layout])?;
        let bind_group = Self::bind(device, &layout, &scene, frame_data, targets);
        Ok(Self {
            pipeline,
            layout,
            bind_group,
            scene,
            extent: targets.extent,
        })
    }

    fn bind(
        device: &wgpu::Device,
        layout: &wgpu::BindGroupLayout,
        scene: &SceneBuffers,
        frame_data: &FrameDataManager,
        targets: &RenderTargets,
    ) -> wgpu::BindGroup {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Shade Bind Group"),
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
                    resource: targets.shadow_rays.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: targets.intersections.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 5,
                    resource: scene.vertices.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 6,
                    resource: scene.masks.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 7,
                    resource: targets.render_target.as_entire_binding(),
                },
            ],
        })
    }

    pub fn rebind(&mut self, gpu: &GpuContext, frame_data: &FrameDataManager, targets: &RenderTargets) {
        self.bind_group = Self::bind(&gpu.device, &self.layout, &self.scene, frame_data, targets);
        self.extent = targets.extent;
    }

    pub fn encode(&self, encoder: &mut wgpu::CommandEncoder, offsets: &FrameOffsets) {
        let mut cpass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("Shade Pass"),
            timestamp_writes: None,
        });
        cpass.set_pipeline(&self.pipeline);
        cpass.set_bind_group(0, &self.bind_group, &offsets.uniform_and_randoms());
        dispatch_8x8(&mut cpass, self.extent);
    }
}
