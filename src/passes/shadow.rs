use glam::Vec3;

use super::{RenderTargets, dispatch_8x8};
use crate::error::RenderResult;
use crate::gpu::{Extent, GpuContext};
use crate::intersector::{Intersection, Ray};
use crate::uniforms::{FrameDataManager, FrameOffsets};
use crate::wgpu_utils::{
    create_compute_pipeline, create_shader_module, dynamic_uniform_entry, storage_entry,
};

const SHADER: &str = concat!(
    include_str!("../shaders/common.wgsl"),
    include_str!("../shaders/shadow.wgsl")
);

/// Radiance to take back from the pixel: the shadow ray's payload when something blocks it.
pub fn resolve_shadow(shadow_ray: &Ray, hit: &Intersection) -> Vec3 {
    if shadow_ray.is_active() && hit.is_hit() {
        shadow_ray.color
    } else {
        Vec3::ZERO
    }
}

/// Cancels the light contributions whose shadow rays turned out to be occluded.
pub struct ShadowPass {
    pipeline: wgpu::ComputePipeline,
    layout: wgpu::BindGroupLayout,
    bind_group: wgpu::BindGroup,
    extent: Extent,
}

impl ShadowPass {
    pub fn new(
        gpu: &GpuContext,
        frame_data: &FrameDataManager,
        targets: &RenderTargets,
    ) -> RenderResult<Self> {
        let device = &gpu.device;
        let shader = create_shader_module(device, "Shadow Shader", SHADER)?;
        let compute = wgpu::ShaderStages::COMPUTE;
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Shadow Bind Group Layout"),
            entries: &[
                dynamic_uniform_entry(0, compute),
                storage_entry(1, compute, true),
                storage_entry(2, compute, true),
                storage_entry(3, compute, false),
            ],
        });
        let pipeline =
            create_compute_pipeline(device, "Shadow Pipeline", &shader, "main", &[&layout])?;
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
            label: Some("Shadow Bind Group"),
            layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: frame_data.uniform_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: targets.shadow_rays.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: targets.intersections.as_entire_binding(),
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
            label: Some("Shadow Pass"),
            timestamp_writes: None,
        });
        cpass.set_pipeline(&self.pipeline);
        cpass.set_bind_group(0, &self.bind_group, &offsets.uniform());
        dispatch_8x8(&mut cpass, self.extent);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accel::AccelerationStructure;
    use crate::geometry::{Faces, RAY_MASK_PRIMARY};
    use crate::intersector::{BruteForceIntersector, HostIntersector, IntersectionMode};
    use crate::passes::shade::shade;
    use crate::scene::{BoxSpec, Scene, SceneBuilder, create_empty_room};
    use glam::{Mat4, Vec2};

    /// Shades a floor point under the light and resolves its shadow ray against `scene`.
    fn net_floor_contribution(scene: &Scene) -> (Vec3, Vec3) {
        let accel = AccelerationStructure::for_scene(scene).unwrap();
        let light = *scene.light();
        let mut ray = Ray::new(Vec3::new(0.0, 0.5, 0.0), Vec3::NEG_Y, RAY_MASK_PRIMARY, Ray::UNBOUNDED);
        let hit = accel.intersect_nearest(&ray);

        let mut shadow_ray = Ray::INACTIVE;
        let added = shade(scene, &light, &mut ray, &hit, &mut shadow_ray, Vec2::splat(0.5));

        let mut occlusion = [Intersection::MISS];
        BruteForceIntersector.intersect(
            IntersectionMode::Any,
            &accel,
            &[shadow_ray],
            &mut occlusion,
        );
        (added, added - resolve_shadow(&shadow_ray, &occlusion[0]))
    }

    #[test]
    fn unoccluded_contribution_is_kept() {
        let scene = create_empty_room().unwrap();
        let (added, net) = net_floor_contribution(&scene);
        assert!(added.min_element() > 0.0);
        assert_eq!(net, added);
    }

    #[test]
    fn occluded_contribution_cancels() {
        let mut builder = SceneBuilder::new();
        builder.add_box(
            BoxSpec::new(
                Faces::POSITIVE_Y,
                Mat4::from_translation(Vec3::new(0.0, 1.0, 0.0))
                    * Mat4::from_scale(Vec3::new(0.5, 1.98, 0.5)),
            )
            .inward()
            .light(),
        );
        builder.add_box(
            BoxSpec::new(
                Faces::NEGATIVE_Y,
                Mat4::from_translation(Vec3::new(0.0, 1.0, 0.0)) * Mat4::from_scale(Vec3::splat(2.0)),
            )
            .inward(),
        );
        // A blocker floating between the floor point and the light.
        builder.add_box(BoxSpec::new(
            Faces::ALL,
            Mat4::from_translation(Vec3::new(0.0, 1.2, 0.0)) * Mat4::from_scale(Vec3::splat(0.2)),
        ));
        let scene = builder.build().unwrap();

        let (added, net) = net_floor_contribution(&scene);
        assert!(added.min_element() > 0.0);
        assert!(net.abs().max_element() < 1e-6);
    }

    #[test]
    fn inactive_shadow_rays_take_nothing_back() {
        let hit = Intersection {
            distance: 0.5,
            primitive_index: 0,
            coordinates: Vec2::ZERO,
        };
        let shadow_ray = Ray::INACTIVE.with_color(Vec3::ONE);
        assert_eq!(resolve_shadow(&shadow_ray, &hit), Vec3::ZERO);
    }
}
