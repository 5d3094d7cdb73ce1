use std::collections::HashMap;

use bytemuck::{Pod, Zeroable};
use glam::{Vec3, Vec4};

use super::RenderTargets;
use crate::error::{RenderError, RenderResult};
use crate::gpu::{GpuBuffer, GpuContext};
use crate::uniforms::{FrameDataManager, FrameOffsets};
use crate::wgpu_utils::{create_shader_module, dynamic_uniform_entry, storage_entry};

const SHADER: &str = concat!(
    include_str!("../shaders/common.wgsl"),
    include_str!("../shaders/present.wgsl")
);

pub fn linear_to_srgb(c: f32) -> f32 {
    if c <= 0.003_130_8 {
        c * 12.92
    } else {
        1.055 * c.powf(1.0 / 2.4) - 0.055
    }
}

/// Reinhard tone mapping followed by sRGB encoding. Alpha is always opaque.
pub fn tonemap(color: Vec4) -> [u8; 4] {
    let c = color.truncate().max(Vec3::ZERO);
    let mapped = c / (Vec3::ONE + c);
    let encode = |v: f32| (linear_to_srgb(v) * 255.0 + 0.5).clamp(0.0, 255.0) as u8;
    [encode(mapped.x), encode(mapped.y), encode(mapped.z), 255]
}

#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct BlitVertex {
    pub position: [f32; 2],
    pub uv: [f32; 2],
}

/// Two triangles over clip space. `uv` runs top to bottom like the image rows.
pub const FULLSCREEN_QUAD: [BlitVertex; 6] = [
    BlitVertex { position: [-1.0, -1.0], uv: [0.0, 1.0] },
    BlitVertex { position: [1.0, -1.0], uv: [1.0, 1.0] },
    BlitVertex { position: [1.0, 1.0], uv: [1.0, 0.0] },
    BlitVertex { position: [-1.0, -1.0], uv: [0.0, 1.0] },
    BlitVertex { position: [1.0, 1.0], uv: [1.0, 0.0] },
    BlitVertex { position: [-1.0, 1.0], uv: [0.0, 0.0] },
];

const VERTEX_ATTRIBUTES: [wgpu::VertexAttribute; 2] =
    wgpu::vertex_attr_array![0 => Float32x2, 1 => Float32x2];

/// Draws the tone-mapped accumulation buffer over a drawable, scaling with nearest sampling
/// when the drawable and the render targets differ in size.
///
/// One render pipeline per drawable format, built on first use.
pub struct PresentPass {
    shader: wgpu::ShaderModule,
    layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    pipelines: HashMap<wgpu::TextureFormat, wgpu::RenderPipeline>,
    vertices: GpuBuffer<BlitVertex>,
    bind_group: wgpu::BindGroup,
}

impl PresentPass {
    pub fn new(
        gpu: &GpuContext,
        frame_data: &FrameDataManager,
        targets: &RenderTargets,
    ) -> RenderResult<Self> {
        let device = &gpu.device;
        let shader = create_shader_module(device, "Present Shader", SHADER)?;
        let fragment = wgpu::ShaderStages::FRAGMENT;
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Present Bind Group Layout"),
            entries: &[dynamic_uniform_entry(0, fragment), storage_entry(1, fragment, true)],
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Present Pipeline Layout"),
            bind_group_layouts: &[&layout],
            immediate_size: 0,
        });
        let vertices = gpu.create_buffer_init(
            "Fullscreen Quad",
            &FULLSCREEN_QUAD,
            wgpu::BufferUsages::VERTEX,
        )?;
        let bind_group = Self::bind(device, &layout, frame_data, targets);

        let mut pass = Self {
            shader,
            layout,
            pipeline_layout,
            pipelines: HashMap::new(),
            vertices,
            bind_group,
        };
        pass.prepare(gpu, wgpu::TextureFormat::Rgba8Unorm)?;
        Ok(pass)
    }

    fn bind(
        device: &wgpu::Device,
        layout: &wgpu::BindGroupLayout,
        frame_data: &FrameDataManager,
        targets: &RenderTargets,
    ) -> wgpu::BindGroup {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Present Bind Group"),
            layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: frame_data.uniform_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: targets.accumulation.as_entire_binding(),
                },
            ],
        })
    }

    pub fn rebind(&mut self, gpu: &GpuContext, frame_data: &FrameDataManager, targets: &RenderTargets) {
        self.bind_group = Self::bind(&gpu.device, &self.layout, frame_data, targets);
    }

    /// Builds the pipeline for drawables of `format` unless it exists already.
    pub fn prepare(&mut self, gpu: &GpuContext, format: wgpu::TextureFormat) -> RenderResult<()> {
        if self.pipelines.contains_key(&format) {
            return Ok(());
        }
        if format.is_srgb() {
            return Err(RenderError::Surface(format!(
                "{format:?} would encode sRGB twice, use a linear format"
            )));
        }

        let device = &gpu.device;
        let scope = device.push_error_scope(wgpu::ErrorFilter::Validation);
        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Present Pipeline"),
            layout: Some(&self.pipeline_layout),
            vertex: wgpu::VertexState {
                module: &self.shader,
                entry_point: Some("vs_main"),
                compilation_options: Default::default(),
                buffers: &[wgpu::VertexBufferLayout {
                    array_stride: std::mem::size_of::<BlitVertex>() as u64,
                    step_mode: wgpu::VertexStepMode::Vertex,
                    attributes: &VERTEX_ATTRIBUTES,
                }],
            },
            fragment: Some(wgpu::FragmentState {
                module: &self.shader,
                entry_point: Some("fs_main"),
                compilation_options: Default::default(),
                targets: &[Some(wgpu::ColorTargetState {
                    format,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
            }),
            primitive: wgpu::PrimitiveState::default(),
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview_mask: None,
            cache: None,
        });
        if let Some(error) = pollster::block_on(scope.pop()) {
            return Err(RenderError::pipeline("Present Pipeline", error));
        }

        log::debug!("present pipeline built for {format:?}");
        self.pipelines.insert(format, pipeline);
        Ok(())
    }

    /// Records the draw into `view`. Call [`prepare`](Self::prepare) for `format` first.
    pub fn encode(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        offsets: &FrameOffsets,
        view: &wgpu::TextureView,
        format: wgpu::TextureFormat,
    ) {
        let Some(pipeline) = self.pipelines.get(&format) else {
            log::warn!("no present pipeline for {format:?}, frame left blank");
            return;
        };
        let mut rpass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Present Pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view,
                resolve_target: None,
                depth_slice: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
            multiview_mask: None,
        });
        rpass.set_pipeline(pipeline);
        rpass.set_bind_group(0, Some(&self.bind_group), &offsets.uniform());
        rpass.set_vertex_buffer(0, self.vertices.buffer().slice(..));
        rpass.draw(0..FULLSCREEN_QUAD.len() as u32, 0..1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn black_and_white_points() {
        assert_eq!(tonemap(Vec4::ZERO), [0, 0, 0, 255]);
        assert_eq!(tonemap(Vec4::splat(-5.0)), [0, 0, 0, 255]);
        // c / (1 + c) = 0.5 for c = 1, which sRGB encodes to 188.
        assert_eq!(tonemap(Vec4::new(1.0, 1.0, 1.0, 0.0)), [188, 188, 188, 255]);
        assert_eq!(tonemap(Vec4::splat(1e9)), [255, 255, 255, 255]);
    }

    #[test]
    fn srgb_curve_is_monotonic() {
        let values: Vec<f32> = (0..=100).map(|i| linear_to_srgb(i as f32 / 100.0)).collect();
        assert!(values.windows(2).all(|w| w[1] > w[0]));
        assert!((linear_to_srgb(1.0) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn quad_maps_the_top_edge_to_the_first_row() {
        for vertex in FULLSCREEN_QUAD {
            let [x, y] = vertex.position;
            assert_eq!(vertex.uv, [(x + 1.0) / 2.0, (1.0 - y) / 2.0]);
        }
        let bottom = FULLSCREEN_QUAD.iter().filter(|v| v.position[1] < 0.0).count();
        assert_eq!(bottom, 3);
    }
}
