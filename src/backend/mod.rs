// Backend layer - native API implementations
//
// `Backend` is the closed set of APIs a context can drive. Cross-backend code
// matches on it (or on the per-object enums built from it) instead of casting.

pub mod opengl;
pub mod vulkan;

use crate::error::Result;
use crate::types::{GraphicsApi, Multisampling};
use std::sync::Arc;

#[derive(Clone)]
pub enum Backend {
    Vulkan(Arc<vulkan::VulkanBackend>),
    OpenGl(Arc<opengl::GlBackend>),
}

impl Backend {
    pub fn api(&self) -> GraphicsApi {
        match self {
            Backend::Vulkan(_) => GraphicsApi::Vulkan,
            Backend::OpenGl(_) => GraphicsApi::OpenGl,
        }
    }

    pub fn max_sample_count(&self) -> Multisampling {
        match self {
            Backend::Vulkan(vk) => vk.max_sample_count(),
            Backend::OpenGl(gl) => gl.max_sample_count(),
        }
    }

    /// Block until the device has finished all submitted work
    pub fn wait_idle(&self) -> Result<()> {
        match self {
            Backend::Vulkan(vk) => vk.wait_idle(),
            Backend::OpenGl(gl) => gl.wait_idle(),
        }
    }
}
