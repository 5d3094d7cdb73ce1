use std::marker::PhantomData;
use std::num::NonZeroU64;

use bytemuck::Pod;

/// A wgpu buffer holding `len` records of `T`.
#[derive(Debug)]
pub struct GpuBuffer<T> {
    buffer: wgpu::Buffer,
    len: usize,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for GpuBuffer<T> {
    fn clone(&self) -> Self {
        Self {
            buffer: self.buffer.clone(),
            len: self.len,
            _marker: PhantomData,
        }
    }
}

impl<T: Pod> GpuBuffer<T> {
    pub(crate) fn from_raw(buffer: wgpu::Buffer, len: usize) -> Self {
        Self {
            buffer,
            len,
            _marker: PhantomData,
        }
    }

    pub fn buffer(&self) -> &wgpu::Buffer {
        &self.buffer
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Size in bytes.
    pub fn size(&self) -> u64 {
        (self.len * std::mem::size_of::<T>()) as u64
    }

    pub fn as_entire_binding(&self) -> wgpu::BindingResource<'_> {
        self.buffer.as_entire_binding()
    }

    /// Binding of `count` records starting at the front, for use with a dynamic offset.
    pub fn window_binding(&self, count: usize) -> wgpu::BindingResource<'_> {
        wgpu::BindingResource::Buffer(wgpu::BufferBinding {
            buffer: &self.buffer,
            offset: 0,
            size: NonZeroU64::new((count * std::mem::size_of::<T>()) as u64),
        })
    }

    /// Queues a write of `data` starting at record `first`.
    pub fn write(&self, queue: &wgpu::Queue, first: usize, data: &[T]) {
        let offset = (first * std::mem::size_of::<T>()) as u64;
        queue.write_buffer(&self.buffer, offset, bytemuck::cast_slice(data));
    }
}
