use std::sync::Arc;

use crate::error::{RenderError, RenderResult};
use crate::gpu::{GpuContext, request_device};

/// Window-side graphics state: the wgpu device and the window's swapchain surface.
pub struct WgpuContext {
    pub _instance: wgpu::Instance,
    pub adapter: wgpu::Adapter,
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub surface: wgpu::Surface<'static>,
    pub config: wgpu::SurfaceConfiguration,
}

impl WgpuContext {
    pub async fn new(window: Arc<winit::window::Window>) -> RenderResult<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            flags: wgpu::InstanceFlags::from_env_or_default(),
            ..Default::default()
        });

        let surface = instance
            .create_surface(window.clone())
            .map_err(|e| RenderError::Surface(e.to_string()))?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                compatible_surface: Some(&surface),
                ..Default::default()
            })
            .await
            .map_err(|_| RenderError::AdapterUnavailable)?;

        let (device, queue) = request_device(&adapter, "presentation device").await?;

        let size = window.inner_size();
        let mut config = surface
            .get_default_config(&adapter, size.width.max(1), size.height.max(1))
            .ok_or_else(|| RenderError::Surface("surface is not supported by the adapter".into()))?;
        // The present shader encodes sRGB itself.
        config.format = config.format.remove_srgb_suffix();
        surface.configure(&device, &config);
        log::debug!(
            "surface configured: {}x{} {:?}",
            config.width,
            config.height,
            config.format
        );

        Ok(Self {
            _instance: instance,
            adapter,
            device,
            queue,
            surface,
            config,
        })
    }

    /// The same device and queue, for the renderer.
    pub fn gpu(&self) -> GpuContext {
        GpuContext::new(self.device.clone(), self.queue.clone())
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            self.config.width = width;
            self.config.height = height;
            self.surface.configure(&self.device, &self.config);
        }
    }

    /// Next swapchain image, or `None` when the surface has nothing to give this cycle.
    pub fn acquire_frame(&mut self) -> Option<wgpu::SurfaceTexture> {
        match self.surface.get_current_texture() {
            Ok(frame) => Some(frame),
            Err(wgpu::SurfaceError::Outdated | wgpu::SurfaceError::Lost) => {
                log::debug!("surface outdated, reconfiguring");
                self.surface.configure(&self.device, &self.config);
                None
            }
            Err(e) => {
                log::warn!("no drawable this frame: {e}");
                None
            }
        }
    }
}
