use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::gpu::{Extent, GpuContext};
use crate::surface::{DisplaySurface, Drawable};
use crate::wgpu_ctx::WgpuContext;

/// Presents frames into a winit window through wgpu.
///
/// At most one swapchain image is out at a time. It is acquired and presented inside the
/// same `render` call, so it never waits on earlier frames still running on the device.
pub struct WindowSurface {
    ctx: WgpuContext,
    outstanding: Arc<AtomicBool>,
}

impl WindowSurface {
    pub fn new(ctx: WgpuContext) -> Self {
        Self {
            ctx,
            outstanding: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn gpu(&self) -> GpuContext {
        self.ctx.gpu()
    }

    pub fn extent(&self) -> Extent {
        Extent::new(self.ctx.config.width, self.ctx.config.height)
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.ctx.resize(width, height);
    }
}

impl DisplaySurface for WindowSurface {
    fn acquire(&mut self) -> Option<Box<dyn Drawable>> {
        if self.outstanding.swap(true, Ordering::AcqRel) {
            log::warn!("previous swapchain image was not presented yet");
            return None;
        }
        let Some(frame) = self.ctx.acquire_frame() else {
            self.outstanding.store(false, Ordering::Release);
            return None;
        };
        let format = self.ctx.config.format;
        let view = frame.texture.create_view(&wgpu::TextureViewDescriptor {
            format: Some(format),
            ..Default::default()
        });
        Some(Box::new(WindowDrawable {
            extent: Extent::new(frame.texture.width(), frame.texture.height()),
            format,
            view,
            frame: Some(frame),
            outstanding: self.outstanding.clone(),
        }))
    }
}

struct WindowDrawable {
    extent: Extent,
    format: wgpu::TextureFormat,
    view: wgpu::TextureView,
    frame: Option<wgpu::SurfaceTexture>,
    outstanding: Arc<AtomicBool>,
}

impl Drawable for WindowDrawable {
    fn extent(&self) -> Extent {
        self.extent
    }

    fn format(&self) -> wgpu::TextureFormat {
        self.format
    }

    fn view(&self) -> &wgpu::TextureView {
        &self.view
    }

    fn present(mut self: Box<Self>) {
        if let Some(frame) = self.frame.take() {
            frame.present();
        }
    }
}

impl Drop for WindowDrawable {
    // An unpresented image is discarded with its `SurfaceTexture`.
    fn drop(&mut self) {
        self.outstanding.store(false, Ordering::Release);
    }
}
