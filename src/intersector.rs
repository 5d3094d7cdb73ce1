//! Ray and intersection records and the batch intersector boundary.
//!
//! The render stages never intersect rays themselves. They hand a whole ray buffer to an
//! [`Intersector`], which records device work that fills an intersection buffer
//! positionally: intersection `i` belongs to ray `i`. [`HostIntersector`]s answer the same
//! queries on the CPU and serve as references.

use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3};
use rayon::prelude::*;

use crate::accel::AccelerationStructure;
use crate::error::{RenderError, RenderResult};
use crate::gpu::{GpuBuffer, GpuContext};
use crate::scene::Scene;
use crate::wgpu_utils::{create_compute_pipeline, create_shader_module, storage_entry};

const INTERSECT_SHADER: &str = concat!(
    include_str!("shaders/common.wgsl"),
    include_str!("shaders/intersect.wgsl")
);

/// Byte stride of one [`Ray`] record.
pub const RAY_STRIDE: usize = 48;
/// Byte stride of one [`Intersection`] record.
pub const INTERSECTION_STRIDE: usize = 16;

/// Ray record: origin, mask, direction, maximum distance and the path color carried along.
///
/// A negative `max_distance` marks the ray as inactive; intersectors report no hit for it.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct Ray {
    pub origin: Vec3,
    pub mask: u32,
    pub direction: Vec3,
    pub max_distance: f32,
    pub color: Vec3,
    pub _pad: u32,
}

/// Intersection record: distance, primitive and barycentric coordinates of the hit.
/// A negative distance means no hit.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct Intersection {
    pub distance: f32,
    pub primitive_index: u32,
    pub coordinates: Vec2,
}

const _: () = {
    assert!(std::mem::size_of::<Ray>() == RAY_STRIDE);
    assert!(std::mem::size_of::<Intersection>() == INTERSECTION_STRIDE);
};

impl Ray {
    /// Largest distance a ray may travel; the kernels have no infinity literal.
    pub const UNBOUNDED: f32 = f32::MAX;

    pub const INACTIVE: Self = Self {
        origin: Vec3::ZERO,
        mask: 0,
        direction: Vec3::ZERO,
        max_distance: -1.0,
        color: Vec3::ZERO,
        _pad: 0,
    };

    pub fn new(origin: Vec3, direction: Vec3, mask: u32, max_distance: f32) -> Self {
        Self {
            origin,
            mask,
            direction,
            max_distance,
            color: Vec3::ONE,
            _pad: 0,
        }
    }

    pub fn with_color(mut self, color: Vec3) -> Self {
        self.color = color;
        self
    }

    pub fn is_active(&self) -> bool {
        self.max_distance >= 0.0
    }

    pub fn deactivate(&mut self) {
        self.max_distance = -1.0;
    }
}

impl Intersection {
    pub const MISS: Self = Self {
        distance: -1.0,
        primitive_index: u32::MAX,
        coordinates: Vec2::ZERO,
    };

    pub fn is_hit(&self) -> bool {
        self.distance >= 0.0
    }
}

/// What an intersection query has to find.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IntersectionMode {
    /// Closest hit with distance, primitive index and barycentric coordinates.
    Nearest,
    /// Any hit, distance only. May stop at the first qualifying triangle.
    Any,
}

/// Batch ray/triangle intersection service on the device.
///
/// Implementations record work into the frame's encoder; nothing runs until the frame is
/// submitted. They must write one record per ray and be deterministic for a given input.
pub trait Intersector: Send + Sync {
    fn encode_intersection(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        mode: IntersectionMode,
        rays: &GpuBuffer<Ray>,
        intersections: &GpuBuffer<Intersection>,
    );
}

/// Compute-shader intersector over a flattened hierarchy.
///
/// [`bvh`](Self::bvh) uploads a median-split BVH. [`brute_force`](Self::brute_force) uploads
/// a single leaf, so every ray tests every triangle.
pub struct ComputeIntersector {
    device: wgpu::Device,
    nearest: wgpu::ComputePipeline,
    any: wgpu::ComputePipeline,
    ray_layout: wgpu::BindGroupLayout,
    scene_bind_group: wgpu::BindGroup,
    max_groups_per_dimension: u32,
}

impl ComputeIntersector {
    pub const WORKGROUP_SIZE: u32 = 64;

    pub fn new(gpu: &GpuContext, accel: &AccelerationStructure) -> RenderResult<Self> {
        if !accel.is_built() {
            return Err(RenderError::InvalidConfig(
                "acceleration structure has not been built".into(),
            ));
        }
        let device = &gpu.device;
        let shader = create_shader_module(device, "Intersect Shader", INTERSECT_SHADER)?;

        let storage = wgpu::BufferUsages::STORAGE;
        let positions =
            gpu.create_buffer_init("Triangle Positions", &accel.position_records(), storage)?;
        let masks = gpu.create_buffer_init("Triangle Masks", accel.masks(), storage)?;
        let nodes = gpu.create_buffer_init("BVH Nodes", &accel.node_records(), storage)?;
        let indices =
            gpu.create_buffer_init("BVH Triangle Indices", accel.triangle_indices(), storage)?;

        let compute = wgpu::ShaderStages::COMPUTE;
        let scene_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Intersect Scene Bind Group Layout"),
            entries: &[
                storage_entry(0, compute, true),
                storage_entry(1, compute, true),
                storage_entry(2, compute, true),
                storage_entry(3, compute, true),
            ],
        });
        let ray_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Intersect Ray Bind Group Layout"),
            entries: &[storage_entry(0, compute, true), storage_entry(1, compute, false)],
        });

        let nearest = create_compute_pipeline(
            device,
            "Intersect Nearest Pipeline",
            &shader,
            "intersect_nearest",
            &[&scene_layout, &ray_layout],
        )?;
        let any = create_compute_pipeline(
            device,
            "Intersect Any Pipeline",
            &shader,
            "intersect_any",
            &[&scene_layout, &ray_layout],
        )?;

        let scene_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Intersect Scene Bind Group"),
            layout: &scene_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: positions.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: masks.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: nodes.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: indices.as_entire_binding(),
                },
            ],
        });

        log::debug!(
            "intersection kernel ready: {} triangles, {} nodes",
            accel.triangle_count(),
            nodes.len()
        );
        Ok(Self {
            device: device.clone(),
            nearest,
            any,
            ray_layout,
            scene_bind_group,
            max_groups_per_dimension: device.limits().max_compute_workgroups_per_dimension,
        })
    }

    pub fn bvh(gpu: &GpuContext, scene: &Scene) -> RenderResult<Self> {
        Self::new(gpu, &AccelerationStructure::for_scene(scene)?)
    }

    pub fn brute_force(gpu: &GpuContext, scene: &Scene) -> RenderResult<Self> {
        Self::new(gpu, &AccelerationStructure::single_leaf(scene)?)
    }

    /// Workgroups for `ray_count` rays, folded into a second dimension past the device limit.
    fn dispatch_size(&self, ray_count: usize) -> (u32, u32) {
        let groups = (ray_count as u32).div_ceil(Self::WORKGROUP_SIZE);
        let x = groups.clamp(1, self.max_groups_per_dimension);
        (x, groups.div_ceil(x))
    }
}

impl Intersector for ComputeIntersector {
    fn encode_intersection(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        mode: IntersectionMode,
        rays: &GpuBuffer<Ray>,
        intersections: &GpuBuffer<Intersection>,
    ) {
        debug_assert_eq!(rays.len(), intersections.len(), "ray/intersection count");
        if rays.is_empty() {
            return;
        }

        let ray_bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Intersect Ray Bind Group"),
            layout: &self.ray_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: rays.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: intersections.as_entire_binding(),
                },
            ],
        });

        let (pipeline, label) = match mode {
            IntersectionMode::Nearest => (&self.nearest, "Intersect Nearest Pass"),
            IntersectionMode::Any => (&self.any, "Intersect Any Pass"),
        };
        let mut cpass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some(label),
            timestamp_writes: None,
        });
        cpass.set_pipeline(pipeline);
        cpass.set_bind_group(0, &self.scene_bind_group, &[]);
        cpass.set_bind_group(1, &ray_bind_group, &[]);
        let (x, y) = self.dispatch_size(rays.len());
        cpass.dispatch_workgroups(x, y, 1);
    }
}

/// CPU counterpart of [`Intersector`], used as a reference.
pub trait HostIntersector {
    fn intersect(
        &self,
        mode: IntersectionMode,
        accel: &AccelerationStructure,
        rays: &[Ray],
        intersections: &mut [Intersection],
    );
}

fn any_hit(distance: f32) -> Intersection {
    if distance >= 0.0 {
        Intersection {
            distance,
            ..Intersection::MISS
        }
    } else {
        Intersection::MISS
    }
}

/// Traverses the acceleration structure's hierarchy; rays are processed in parallel.
#[derive(Clone, Copy, Debug, Default)]
pub struct BvhIntersector;

impl HostIntersector for BvhIntersector {
    fn intersect(
        &self,
        mode: IntersectionMode,
        accel: &AccelerationStructure,
        rays: &[Ray],
        intersections: &mut [Intersection],
    ) {
        assert_eq!(rays.len(), intersections.len(), "ray/intersection count");
        intersections
            .par_iter_mut()
            .zip(rays.par_iter())
            .for_each(|(out, ray)| {
                *out = match mode {
                    IntersectionMode::Nearest => accel.intersect_nearest(ray),
                    IntersectionMode::Any => any_hit(accel.intersect_any(ray)),
                };
            });
    }
}

/// Tests every ray against every triangle.
#[derive(Clone, Copy, Debug, Default)]
pub struct BruteForceIntersector;

impl BruteForceIntersector {
    fn nearest(accel: &AccelerationStructure, ray: &Ray) -> Intersection {
        let mut closest = Intersection::MISS;
        if !ray.is_active() {
            return closest;
        }
        let mut t_max = ray.max_distance;
        for tri in 0..accel.triangle_count() {
            if let Some((t, u, v)) = accel.hit_triangle(ray, tri, t_max) {
                t_max = t;
                closest = Intersection {
                    distance: t,
                    primitive_index: tri as u32,
                    coordinates: Vec2::new(u, v),
                };
            }
        }
        closest
    }

    fn any(accel: &AccelerationStructure, ray: &Ray) -> f32 {
        if !ray.is_active() {
            return -1.0;
        }
        (0..accel.triangle_count())
            .find_map(|tri| accel.hit_triangle(ray, tri, ray.max_distance))
            .map_or(-1.0, |(t, _, _)| t)
    }
}

impl HostIntersector for BruteForceIntersector {
    fn intersect(
        &self,
        mode: IntersectionMode,
        accel: &AccelerationStructure,
        rays: &[Ray],
        intersections: &mut [Intersection],
    ) {
        assert_eq!(rays.len(), intersections.len(), "ray/intersection count");
        for (out, ray) in intersections.iter_mut().zip(rays) {
            *out = match mode {
                IntersectionMode::Nearest => Self::nearest(accel, ray),
                IntersectionMode::Any => any_hit(Self::any(accel, ray)),
            };
        }
    }
}
