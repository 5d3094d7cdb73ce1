//! Progressive Cornell box path tracer.
//!
//! A static triangle scene is traced one sample per pixel per frame and averaged over time.
//! Each frame is one wgpu submission of compute passes followed by a present render pass, with
//! up to [`RendererConfig::frames_in_flight`] frames queued ahead of completion.

pub mod accel;
pub mod camera;
pub mod config;
pub mod error;
pub mod frames;
pub mod geometry;
pub mod gpu;
pub mod intersector;
pub mod passes;
pub mod renderer;
pub mod scene;
pub mod screenshot;
pub mod surface;
pub mod uniforms;
pub mod wgpu_ctx;
pub mod wgpu_utils;
pub mod window_surface;

pub use camera::Camera;
pub use config::RendererConfig;
pub use error::{RenderError, RenderResult};
pub use gpu::{GpuContext, RadianceImage};
pub use intersector::{
    BruteForceIntersector, BvhIntersector, ComputeIntersector, HostIntersector, Intersector,
};
pub use renderer::{FrameStatus, Renderer};
pub use surface::{DisplaySurface, Drawable, ImageSurface};
