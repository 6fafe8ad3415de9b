// Error taxonomy for the renderer core
//
// Per-frame "skip this frame" is NOT an error: `prepare` reports it as Ok(false).
// Everything else propagates to the caller, nothing is retried internally.

use ash::vk;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, RendererError>;

#[derive(Debug, Error)]
pub enum RendererError {
    /// A model or texture could not be read or decoded from an external source
    #[error("failed to load resource from {path:?}: {reason}")]
    ResourceLoad { path: PathBuf, reason: String },

    /// A fixed-capacity pool has no free slot left
    #[error("{pool} exhausted (capacity {capacity})")]
    PoolExhausted { pool: &'static str, capacity: u32 },

    /// Construction-time contract violation
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Backend failure during submission or wait; the owning context is unusable afterwards
    #[error("device failure during {operation}: {reason}")]
    DeviceFatal {
        operation: &'static str,
        reason: String,
    },

    /// `present` was called on a target whose `prepare` did not succeed this frame
    #[error("present called on a target that was not prepared")]
    FrameNotPrepared,

    /// The window cannot host the requested backend
    #[error("unsupported: {0}")]
    Unsupported(String),
}

impl RendererError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidConfiguration(message.into())
    }

    pub fn load(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::ResourceLoad {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::DeviceFatal { .. })
    }
}

/// Map a raw Vulkan result into `DeviceFatal`, tagged with the failing operation.
///
/// Usage: `driver.queue_wait_idle(q).map_err(device_fatal("queue wait idle"))?`
pub fn device_fatal(operation: &'static str) -> impl Fn(vk::Result) -> RendererError {
    move |result| RendererError::DeviceFatal {
        operation,
        reason: format!("{result:?}"),
    }
}

/// Same as [`device_fatal`] for the string errors GL object creation reports.
pub fn gl_fatal(operation: &'static str) -> impl Fn(String) -> RendererError {
    move |reason| RendererError::DeviceFatal { operation, reason }
}
