//! Backend-agnostic rendering and compute on top of Vulkan or OpenGL.
//!
//! A [`GraphicsContext`] is created from a window and owns the backend. It hands
//! out pipelines, renderers, computers, storage buffers and swapchains; models
//! and textures come from its [`ResourceManager`]. Per-frame work always follows
//! the operation-target cycle: prepare, record, present.

pub mod backend;
pub mod compute;
pub mod config;
pub mod context;
pub mod error;
pub mod pipeline;
pub mod renderer;
pub mod resource;
pub mod resources;
pub mod swapchain;
pub mod target;
pub mod types;
pub mod window;

pub use backend::Backend;
pub use compute::{Computer, StorageBuffer, StorageBufferCreateInfo};
pub use config::Config;
pub use context::{ContextToken, GraphicsContext};
pub use error::{RendererError, Result};
pub use pipeline::{
    Bindings, ComputeDimensions, ComputePipeline, ComputePipelineCreateInfo, CullMode, GraphicsPipeline,
    GraphicsPipelineCreateInfo,
};
pub use renderer::{Renderer, RendererCreateInfo};
pub use resource::{Resource, ResourceId, ResourceRegistry};
pub use resources::{Model, ResourceManager, Texture, TextureCreateInfo, Vertex, VertexInput};
pub use swapchain::{Swapchain, SwapchainCreateInfo};
pub use target::{ComputeTarget, Frame, OperationTarget, RenderContext, RenderTarget};
pub use types::{
    ElementFormat, ElementLayout, Extent, GraphicsApi, Multisampling, ShaderBlockType, ShaderStage, Topology,
};
pub use window::{OpenGlWindow, VulkanConnection, VulkanWindow, Window, WindowRef};
