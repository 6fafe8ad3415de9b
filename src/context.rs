// Graphics context
//
// Top-level factory. Owns the backend and the resource manager, builds pipelines,
// renderers, computers, storage buffers and swapchains, and is the only code that
// can drive the window handshake.

use crate::backend::opengl::GlBackend;
use crate::backend::vulkan::VulkanBackend;
use crate::backend::Backend;
use crate::compute::{Computer, StorageBuffer, StorageBufferCreateInfo};
use crate::error::Result;
use crate::pipeline::{
    ComputePipeline, ComputePipelineCreateInfo, GraphicsPipeline, GraphicsPipelineCreateInfo,
};
use crate::renderer::{Renderer, RendererCreateInfo};
use crate::resources::ResourceManager;
use crate::swapchain::{Swapchain, SwapchainCreateInfo};
use crate::types::{Extent, GraphicsApi, Multisampling};
use crate::window::WindowRef;
use std::sync::Arc;

/// Capability proving the caller is the graphics context.
///
/// The field is private to this module, so no other code can make one.
pub struct ContextToken(());

pub struct GraphicsContext {
    backend: Backend,
    resources: ResourceManager,
    max_samples: Multisampling,
    window_extent: Extent,
}

impl GraphicsContext {
    /// Initialise `window` for its API, connect it and build the matching backend
    pub fn create(window: WindowRef<'_>) -> Result<Self> {
        let token = ContextToken(());
        let api = window.api();

        let (backend, extent) = match window {
            WindowRef::Vulkan(window) => {
                window.init(&token, api)?;
                let connection = window.connect(&token)?;
                let backend = VulkanBackend::new(connection.driver, connection.surface)?;
                (Backend::Vulkan(Arc::new(backend)), window.size())
            }
            WindowRef::OpenGl(window) => {
                window.init(&token, api)?;
                let driver = window.connect(&token)?;
                (Backend::OpenGl(Arc::new(GlBackend::new(driver))), window.size())
            }
        };
        Ok(Self::from_backend(backend, extent))
    }

    /// Wrap an already connected backend
    pub fn from_backend(backend: Backend, window_extent: Extent) -> Self {
        let max_samples = backend.max_sample_count();
        log::info!(
            "{} graphics context ready (max {:?}, window {}x{})",
            backend.api(),
            max_samples,
            window_extent.width,
            window_extent.height
        );
        Self {
            resources: ResourceManager::new(backend.clone()),
            backend,
            max_samples,
            window_extent,
        }
    }

    pub fn api(&self) -> GraphicsApi {
        self.backend.api()
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    pub fn resources(&self) -> &ResourceManager {
        &self.resources
    }

    /// Highest MSAA level the device supports, queried once at creation
    pub fn max_sample_count(&self) -> Multisampling {
        self.max_samples
    }

    /// Block until every piece of submitted GPU work has completed
    pub fn wait_idle(&self) -> Result<()> {
        self.backend.wait_idle()
    }

    pub fn create_graphics_pipeline(&self, info: GraphicsPipelineCreateInfo) -> Result<Arc<GraphicsPipeline>> {
        let pipeline = Arc::new(GraphicsPipeline::create(&self.backend, info, self.max_samples)?);
        self.resources.registry().track(&pipeline);
        Ok(pipeline)
    }

    pub fn create_compute_pipeline(&self, info: ComputePipelineCreateInfo) -> Result<Arc<ComputePipeline>> {
        let pipeline = Arc::new(ComputePipeline::create(&self.backend, info)?);
        self.resources.registry().track(&pipeline);
        Ok(pipeline)
    }

    pub fn create_renderer(&self, info: RendererCreateInfo) -> Result<Arc<Renderer>> {
        let renderer = Arc::new(Renderer::new(self.backend.clone(), info, self.max_samples)?);
        self.resources.registry().track(&renderer);
        Ok(renderer)
    }

    pub fn create_computer(&self) -> Arc<Computer> {
        let computer = Arc::new(Computer::new());
        self.resources.registry().track(&computer);
        computer
    }

    /// Storage buffers are exclusively owned by the caller, who drives them as compute targets
    pub fn create_storage_buffer(&self, info: &StorageBufferCreateInfo) -> Result<StorageBuffer> {
        StorageBuffer::create(&self.backend, info)
    }

    pub fn create_swapchain(&self, mut info: SwapchainCreateInfo) -> Result<Swapchain> {
        if info.extent.is_empty() {
            info.extent = self.window_extent;
        }
        Swapchain::create(&self.backend, info)
    }
}

impl Drop for GraphicsContext {
    fn drop(&mut self) {
        if let Err(err) = self.backend.wait_idle() {
            log::error!("Failed to drain device on context teardown: {}", err);
        }
        let registry = self.resources.registry();
        registry.prune();
        for resource in registry.live() {
            log::warn!("{} {} outlives its graphics context", resource.kind(), resource.id());
        }
        log::info!("{} graphics context destroyed", self.backend.api());
    }
}
