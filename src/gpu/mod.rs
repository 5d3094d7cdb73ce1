//! Device access shared by every stage.
//!
//! [`GpuContext`] bundles the wgpu device and queue with the allocation limit the renderer was
//! configured with, and knows how to wait for submissions and read buffers back.

mod buffer;

use bytemuck::Pod;
use glam::Vec4;
use wgpu::util::DeviceExt;

use crate::error::{RenderError, RenderResult};

pub use buffer::GpuBuffer;

/// Storage buffers bound by the busiest kernel (shading).
pub const REQUIRED_STORAGE_BUFFERS: u32 = 7;

/// Width and height of a target or of the viewport, in texels.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Extent {
    pub width: u32,
    pub height: u32,
}

impl Extent {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn texel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Workgroup counts covering the extent with 8x8 tiles.
    pub fn workgroups_8x8(&self) -> (u32, u32) {
        (self.width.div_ceil(8), self.height.div_ceil(8))
    }
}

/// Host copy of a linear RGBA float target, row-major.
#[derive(Clone, Debug, PartialEq)]
pub struct RadianceImage {
    extent: Extent,
    texels: Vec<Vec4>,
}

impl RadianceImage {
    pub fn new(extent: Extent, texels: Vec<Vec4>) -> Self {
        debug_assert_eq!(texels.len(), extent.texel_count());
        Self { extent, texels }
    }

    pub fn extent(&self) -> Extent {
        self.extent
    }

    pub fn texels(&self) -> &[Vec4] {
        &self.texels
    }

    pub fn read(&self, x: u32, y: u32) -> Vec4 {
        self.texels[(y * self.extent.width + x) as usize]
    }
}

#[derive(Clone, Debug)]
pub struct GpuContext {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    max_allocation: u64,
}

impl GpuContext {
    pub fn new(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        Self {
            device,
            queue,
            max_allocation: u64::MAX,
        }
    }

    /// Opens a device with no presentation surface attached.
    pub async fn headless() -> RenderResult<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::from_env().unwrap_or(wgpu::Backends::all()),
            flags: wgpu::InstanceFlags::from_env_or_default(),
            ..Default::default()
        });

        let mut options = wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            force_fallback_adapter: false,
            compatible_surface: None,
        };
        let adapter = match instance.request_adapter(&options).await {
            Ok(adapter) => adapter,
            Err(_) => {
                log::debug!("no hardware adapter, trying a fallback adapter");
                options.force_fallback_adapter = true;
                instance
                    .request_adapter(&options)
                    .await
                    .map_err(|_| RenderError::AdapterUnavailable)?
            }
        };

        let (device, queue) = request_device(&adapter, "headless device").await?;
        Ok(Self::new(device, queue))
    }

    /// Same device, with allocations capped at `bytes` per buffer.
    pub fn with_allocation_limit(mut self, bytes: u64) -> Self {
        self.max_allocation = bytes;
        self
    }

    pub fn max_allocation_bytes(&self) -> u64 {
        self.max_allocation
    }

    fn check_allocation(
        &self,
        label: &str,
        bytes: u64,
        usage: wgpu::BufferUsages,
    ) -> RenderResult<()> {
        let limits = self.device.limits();
        let mut cap = self.max_allocation.min(limits.max_buffer_size);
        if usage.contains(wgpu::BufferUsages::STORAGE) {
            cap = cap.min(u64::from(limits.max_storage_buffer_binding_size));
        }
        if bytes > cap {
            log::error!("`{label}` needs {bytes} bytes, limit is {cap}");
            return Err(RenderError::exhausted(label, bytes));
        }
        Ok(())
    }

    /// Zero-initialized buffer of `len` records.
    pub fn create_buffer<T: Pod>(
        &self,
        label: &str,
        len: usize,
        usage: wgpu::BufferUsages,
    ) -> RenderResult<GpuBuffer<T>> {
        let bytes = (len * std::mem::size_of::<T>()) as u64;
        self.check_allocation(label, bytes, usage)?;

        let scope = self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: bytes,
            usage,
            mapped_at_creation: false,
        });
        if let Some(error) = pollster::block_on(scope.pop()) {
            log::error!("`{label}`: {error}");
            return Err(RenderError::exhausted(label, bytes));
        }
        Ok(GpuBuffer::from_raw(buffer, len))
    }

    pub fn create_buffer_init<T: Pod>(
        &self,
        label: &str,
        data: &[T],
        usage: wgpu::BufferUsages,
    ) -> RenderResult<GpuBuffer<T>> {
        let bytes = std::mem::size_of_val(data) as u64;
        self.check_allocation(label, bytes, usage)?;

        let scope = self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label),
                contents: bytemuck::cast_slice(data),
                usage,
            });
        if let Some(error) = pollster::block_on(scope.pop()) {
            log::error!("`{label}`: {error}");
            return Err(RenderError::exhausted(label, bytes));
        }
        Ok(GpuBuffer::from_raw(buffer, data.len()))
    }

    /// Blocks until `index` has finished executing and its callbacks have run.
    pub fn wait_for(&self, index: wgpu::SubmissionIndex) -> RenderResult<()> {
        self.device
            .poll(wgpu::PollType::Wait {
                submission_index: Some(index),
                timeout: None,
            })
            .map(|_| ())
            .map_err(|e| RenderError::DeviceLost(e.to_string()))
    }

    /// Blocks until every submission so far has finished.
    pub fn wait_idle(&self) -> RenderResult<()> {
        self.device
            .poll(wgpu::PollType::wait_indefinitely())
            .map(|_| ())
            .map_err(|e| RenderError::DeviceLost(e.to_string()))
    }

    /// Runs callbacks of work that already finished, without blocking.
    pub fn poll(&self) -> RenderResult<()> {
        self.device
            .poll(wgpu::PollType::Poll)
            .map(|_| ())
            .map_err(|e| RenderError::DeviceLost(e.to_string()))
    }

    /// Copies `source` into a mappable staging buffer and returns its records.
    pub fn read_buffer<T: Pod>(&self, source: &GpuBuffer<T>) -> RenderResult<Vec<T>> {
        let size = source.size();
        if size == 0 {
            return Ok(Vec::new());
        }

        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Readback Staging Buffer"),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("readback"),
            });
        encoder.copy_buffer_to_buffer(source.buffer(), 0, &staging, 0, size);
        let index = self.queue.submit(std::iter::once(encoder.finish()));

        let (sender, receiver) = flume::bounded(1);
        staging.map_async(wgpu::MapMode::Read, .., move |result| {
            let _ = sender.send(result);
        });
        self.wait_for(index)?;
        receiver
            .try_recv()
            .map_err(|_| RenderError::Readback("staging buffer was not mapped".into()))?
            .map_err(|e| RenderError::Readback(e.to_string()))?;

        let records = {
            let view = staging.get_mapped_range(..);
            view.chunks_exact(std::mem::size_of::<T>())
                .map(bytemuck::pod_read_unaligned)
                .collect()
        };
        staging.unmap();
        Ok(records)
    }
}

/// Requests a device with the adapter's own limits. The kernels need more storage bindings
/// per stage than the downlevel defaults allow.
pub async fn request_device(
    adapter: &wgpu::Adapter,
    label: &str,
) -> RenderResult<(wgpu::Device, wgpu::Queue)> {
    let info = adapter.get_info();
    log::info!("adapter: {} ({:?})", info.name, info.backend);
    log::debug!("driver: {}", info.driver_info);

    let limits = adapter.limits();
    if limits.max_storage_buffers_per_shader_stage < REQUIRED_STORAGE_BUFFERS {
        return Err(RenderError::DeviceRequest(format!(
            "adapter offers {} storage buffers per stage, {REQUIRED_STORAGE_BUFFERS} are needed",
            limits.max_storage_buffers_per_shader_stage
        )));
    }

    adapter
        .request_device(&wgpu::DeviceDescriptor {
            label: Some(label),
            required_features: wgpu::Features::empty(),
            required_limits: limits,
            ..Default::default()
        })
        .await
        .map_err(|e| RenderError::DeviceRequest(e.to_string()))
}

/// Headless device for tests, or `None` (with a note on stderr) when the machine has no
/// usable adapter.
#[cfg(test)]
pub(crate) fn test_gpu() -> Option<GpuContext> {
    match pollster::block_on(GpuContext::headless()) {
        Ok(gpu) => Some(gpu),
        Err(e) => {
            eprintln!("skipping GPU test: {e}");
            None
        }
    }
}
