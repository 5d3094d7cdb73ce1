//! Error type shared by the renderer, the device wrapper and the presentation surfaces.

/// Everything that can go wrong while setting up or driving the renderer.
///
/// Initialization failures (adapter, device, pipelines, allocations) are fatal: callers are
/// expected to abort startup. A missing drawable for a single frame is not an error at all;
/// see [`FrameStatus::Skipped`](crate::renderer::FrameStatus::Skipped).
#[derive(thiserror::Error, Debug)]
pub enum RenderError {
    #[error("no compatible graphics adapter is available")]
    AdapterUnavailable,

    #[error("device request failed: {0}")]
    DeviceRequest(String),

    #[error("surface error: {0}")]
    Surface(String),

    #[error("pipeline `{label}` failed to compile: {message}")]
    PipelineCompilation { label: String, message: String },

    #[error("could not allocate {bytes} bytes for `{label}`")]
    ResourceExhausted { label: String, bytes: u64 },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("scene contains no triangles")]
    EmptyScene,

    #[error("device lost: {0}")]
    DeviceLost(String),

    #[error("buffer readback failed: {0}")]
    Readback(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("image encoding error: {0}")]
    Image(#[from] image::ImageError),
}

impl RenderError {
    pub fn pipeline<L: ToString, M: ToString>(label: L, message: M) -> Self {
        RenderError::PipelineCompilation {
            label: label.to_string(),
            message: message.to_string(),
        }
    }

    pub fn exhausted<L: ToString>(label: L, bytes: u64) -> Self {
        RenderError::ResourceExhausted {
            label: label.to_string(),
            bytes,
        }
    }
}

/// Result type alias for renderer operations
pub type RenderResult<T> = Result<T, RenderError>;
