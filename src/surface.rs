//! Presentation boundary: where finished frames go.

use flume::{Receiver, Sender};
use image::RgbaImage;

use crate::error::{RenderError, RenderResult};
use crate::gpu::{Extent, GpuContext};
use crate::wgpu_utils::create_texture_2d;

/// A render target handed out for exactly one frame.
///
/// The renderer draws into [`view`](Self::view), submits, then calls
/// [`present`](Self::present) before it returns. No drawable outlives the `render` call that
/// acquired it.
pub trait Drawable {
    fn extent(&self) -> Extent;

    fn format(&self) -> wgpu::TextureFormat;

    fn view(&self) -> &wgpu::TextureView;

    /// Records work that has to run after the present pass, in the same submission.
    fn encode_after_present(&self, _encoder: &mut wgpu::CommandEncoder) {}

    /// Hands the image to the display. Called once the frame has been submitted.
    fn present(self: Box<Self>);
}

/// Source of drawables. `acquire` returning `None` makes the renderer skip the frame.
pub trait DisplaySurface {
    fn acquire(&mut self) -> Option<Box<dyn Drawable>>;
}

/// Headless surface. Presented frames are copied back and arrive as images on a channel.
pub struct ImageSurface {
    gpu: GpuContext,
    extent: Extent,
    available: bool,
    target: Option<(wgpu::Texture, wgpu::TextureView)>,
    sender: Sender<MappedFrame>,
    receiver: Receiver<MappedFrame>,
}

impl ImageSurface {
    pub const FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

    pub fn new(gpu: &GpuContext, width: u32, height: u32) -> Self {
        let (sender, receiver) = flume::unbounded();
        Self {
            gpu: gpu.clone(),
            extent: Extent::new(width, height),
            available: true,
            target: None,
            sender,
            receiver,
        }
    }

    pub fn extent(&self) -> Extent {
        self.extent
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        let extent = Extent::new(width, height);
        if extent != self.extent {
            self.extent = extent;
            self.target = None;
        }
    }

    /// While unavailable, `acquire` yields nothing, like a compositor with no free buffer.
    pub fn set_available(&mut self, available: bool) {
        self.available = available;
    }

    /// Oldest presented frame whose pixels are back on the host, without blocking.
    pub fn try_recv(&self) -> RenderResult<Option<RgbaImage>> {
        self.gpu.poll()?;
        match self.receiver.try_recv() {
            Ok(frame) => frame.into_image().map(Some),
            Err(_) => Ok(None),
        }
    }

    /// Waits for all submitted work, then returns the oldest presented frame.
    pub fn next_image(&self) -> RenderResult<Option<RgbaImage>> {
        self.gpu.wait_idle()?;
        self.try_recv()
    }

    /// Frames presented, read back, and not yet received.
    pub fn pending(&self) -> usize {
        if let Err(e) = self.gpu.poll() {
            log::warn!("{e}");
        }
        self.receiver.len()
    }

    fn target(&mut self) -> (wgpu::Texture, wgpu::TextureView) {
        let extent = self.extent;
        let device = &self.gpu.device;
        self.target
            .get_or_insert_with(|| {
                let texture = create_texture_2d(
                    device,
                    "Image Surface Target",
                    extent.width,
                    extent.height,
                    Self::FORMAT,
                    wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
                );
                let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
                (texture, view)
            })
            .clone()
    }
}

impl DisplaySurface for ImageSurface {
    fn acquire(&mut self) -> Option<Box<dyn Drawable>> {
        if !self.available || self.extent.is_empty() {
            return None;
        }
        let (texture, view) = self.target();
        let padded_row = padded_bytes_per_row(self.extent.width);
        let readback = self.gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Image Surface Readback"),
            size: u64::from(padded_row) * u64::from(self.extent.height),
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        Some(Box::new(ImageDrawable {
            extent: self.extent,
            texture,
            view,
            readback,
            padded_row,
            sender: self.sender.clone(),
        }))
    }
}

fn padded_bytes_per_row(width: u32) -> u32 {
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    (width * 4).div_ceil(align) * align
}

struct ImageDrawable {
    extent: Extent,
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    readback: wgpu::Buffer,
    padded_row: u32,
    sender: Sender<MappedFrame>,
}

impl Drawable for ImageDrawable {
    fn extent(&self) -> Extent {
        self.extent
    }

    fn format(&self) -> wgpu::TextureFormat {
        ImageSurface::FORMAT
    }

    fn view(&self) -> &wgpu::TextureView {
        &self.view
    }

    fn encode_after_present(&self, encoder: &mut wgpu::CommandEncoder) {
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &self.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &self.readback,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(self.padded_row),
                    rows_per_image: Some(self.extent.height),
                },
            },
            wgpu::Extent3d {
                width: self.extent.width,
                height: self.extent.height,
                depth_or_array_layers: 1,
            },
        );
    }

    fn present(self: Box<Self>) {
        let ImageDrawable {
            extent,
            readback,
            padded_row,
            sender,
            ..
        } = *self;
        let buffer = readback.clone();
        readback.map_async(wgpu::MapMode::Read, .., move |result| {
            let frame = MappedFrame {
                extent,
                padded_row,
                buffer,
                result,
            };
            if sender.send(frame).is_err() {
                log::debug!("image surface dropped, discarding presented frame");
            }
        });
    }
}

/// Readback buffer of one presented frame, mapped (or failed to map) by the device.
struct MappedFrame {
    extent: Extent,
    padded_row: u32,
    buffer: wgpu::Buffer,
    result: Result<(), wgpu::BufferAsyncError>,
}

impl MappedFrame {
    fn into_image(self) -> RenderResult<RgbaImage> {
        self.result
            .map_err(|e| RenderError::Readback(e.to_string()))?;

        let row = (self.extent.width * 4) as usize;
        let mut pixels = Vec::with_capacity(row * self.extent.height as usize);
        {
            let data = self.buffer.get_mapped_range(..);
            for padded in data.chunks_exact(self.padded_row as usize) {
                pixels.extend_from_slice(&padded[..row]);
            }
        }
        self.buffer.unmap();

        RgbaImage::from_raw(self.extent.width, self.extent.height, pixels)
            .ok_or_else(|| RenderError::Readback("presented frame has the wrong size".into()))
    }
}
