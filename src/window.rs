// Window handshake
//
// A window is initialised for one graphics API and then connected to a backend.
// Both steps take a `ContextToken`, which only the graphics context can create,
// so a window can only be set up through `GraphicsContext::create`.

use crate::backend::opengl::GlDriver;
use crate::backend::vulkan::{VulkanDriver, VulkanSurface};
use crate::context::ContextToken;
use crate::error::Result;
use crate::types::{Extent, GraphicsApi};
use std::sync::Arc;

pub trait Window {
    /// Prepare the native window for `api`.
    ///
    /// Fails with `Unsupported` when the window cannot host that API.
    fn init(&mut self, token: &ContextToken, api: GraphicsApi) -> Result<()>;

    /// Current drawable size in pixels
    fn size(&self) -> Extent;
}

/// Device and presentation surface a Vulkan window hands to the context
pub struct VulkanConnection {
    pub driver: Arc<dyn VulkanDriver>,
    pub surface: Box<dyn VulkanSurface>,
}

pub trait VulkanWindow: Window {
    fn connect(&mut self, token: &ContextToken) -> Result<VulkanConnection>;
}

pub trait OpenGlWindow: Window {
    /// Make the window's GL context current and return its driver
    fn connect(&mut self, token: &ContextToken) -> Result<Arc<dyn GlDriver>>;
}

/// A window together with the API the context should drive on it
pub enum WindowRef<'w> {
    Vulkan(&'w mut dyn VulkanWindow),
    OpenGl(&'w mut dyn OpenGlWindow),
}

impl WindowRef<'_> {
    pub fn api(&self) -> GraphicsApi {
        match self {
            WindowRef::Vulkan(_) => GraphicsApi::Vulkan,
            WindowRef::OpenGl(_) => GraphicsApi::OpenGl,
        }
    }
}
