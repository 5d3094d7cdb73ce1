use glam::Vec4;

use super::{RenderTargets, dispatch_8x8};
use crate::error::RenderResult;
use crate::gpu::{Extent, GpuContext};
use crate::uniforms::{FrameDataManager, FrameOffsets};
use crate::wgpu_utils::{
    create_compute_pipeline, create_shader_module, dynamic_uniform_entry, storage_entry,
};

const SHADER: &str = concat!(
    include_str!("../shaders/common.wgsl"),
    include_str!("../shaders/accumulate.wgsl")
);

/// Folds `sample` into the running average of `frame_index` earlier samples.
pub fn accumulate(average: Vec4, sample: Vec4, frame_index: u32) -> Vec4 {
    if frame_index == 0 {
        return sample;
    }
    let n = frame_index as f32;
    (average * n + sample) / (n + 1.0)
}

/// Folds the render target into the accumulation buffer.
pub struct AccumulatePass {
    pipeline: wgpu::ComputePipeline,
    layout: wgpu::BindGroupLayout,
    bind_group: wgpu::BindGroup,
    extent: Extent,
}

impl AccumulatePass {
    pub fn new(
        gpu: &GpuContext,
        frame_data: &FrameDataManager,
        targets: &RenderTargets,
    ) -> RenderResult<Self> {
        let device = &gpu.device;
        let shader = create_shader_module(device, "Accumulate Shader", SHADER)?;
        let compute = wgpu::ShaderStages::COMPUTE;
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Accumulate Bind Group Layout"),
            entries: &[
                dynamic_uniform_entry(0, compute),
                storage_entry(1, compute, true),
                storage_entry(2, compute, false),
            ],
        });
        let pipeline =
            create_compute_pipeline(device, "Accumulate Pipeline", &shader, "main", &[&layout])?;
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
            label: Some("Accumulate Bind Group"),
            layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: frame_data.uniform_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: targets.render_target.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: targets.accumulation.as_entire_binding(),
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
            label: Some("Accumulate Pass"),
            timestamp_writes: None,
        });
        cpass.set_pipeline(&self.pipeline);
        cpass.set_bind_group(0, &self.bind_group, &offsets.uniform());
        dispatch_8x8(&mut cpass, self.extent);
    }
}
