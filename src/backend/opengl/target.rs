// OpenGL operation targets
//
// The default framebuffer stands in for a swapchain image; buffer swapping is the
// presentation. Compute work executes as it is issued, so a storage buffer's
// `present` only has to publish the writes.

use super::{GlBackend, GlBuffer, GlBufferKind, GlDriver};
use crate::error::{RendererError, Result};
use crate::resource::{Resource, ResourceId};
use crate::target::{
    ComputeInfoVisitor, ComputeTarget, OperationTarget, RenderInfoVisitor, RenderTarget,
};
use crate::types::{ElementLayout, Extent, Topology};
use std::sync::Arc;

/// One slot of an OpenGL swapchain ring, backed by the default framebuffer
pub struct FrameTarget {
    id: ResourceId,
    driver: Arc<dyn GlDriver>,
    prepared: bool,
}

impl FrameTarget {
    pub(crate) fn new(backend: &GlBackend) -> Self {
        Self {
            id: ResourceId::next(),
            driver: backend.driver().clone(),
            prepared: false,
        }
    }

    pub fn framebuffer(&self) -> u32 {
        0
    }

    pub fn extent(&self) -> Extent {
        let (width, height) = self.driver.framebuffer_size();
        Extent::new(width, height)
    }
}

impl OperationTarget for FrameTarget {
    fn prepare(&mut self) -> Result<bool> {
        self.driver.bind_framebuffer(self.framebuffer());
        self.prepared = true;
        Ok(true)
    }

    fn present(&mut self) -> Result<()> {
        if !self.prepared {
            return Err(RendererError::FrameNotPrepared);
        }
        self.prepared = false;
        self.driver.swap_buffers();
        Ok(())
    }

    fn is_prepared(&self) -> bool {
        self.prepared
    }
}

impl Resource for FrameTarget {
    fn id(&self) -> ResourceId {
        self.id
    }

    fn kind(&self) -> &'static str {
        "swapchain frame"
    }
}

impl RenderTarget for FrameTarget {
    fn width(&self) -> u32 {
        self.extent().width
    }

    fn height(&self) -> u32 {
        self.extent().height
    }

    fn accept(&self, visitor: &mut dyn RenderInfoVisitor) {
        visitor.visit_opengl(self);
    }
}

/// Shader storage buffer usable as a compute target
pub struct StorageBuffer {
    id: ResourceId,
    driver: Arc<dyn GlDriver>,
    buffer: GlBuffer,
    element_count: u64,
    prepared: bool,
}

impl StorageBuffer {
    pub(crate) fn new(backend: &GlBackend, element_size: u64, bytes: &[u8]) -> Result<Self> {
        if element_size == 0 || bytes.is_empty() {
            return Err(RendererError::invalid(
                "storage buffers need a non-zero element size and initial data",
            ));
        }
        let buffer = backend.create_buffer(GlBufferKind::Storage, bytes)?;
        Ok(Self {
            id: ResourceId::next(),
            driver: backend.driver().clone(),
            buffer,
            element_count: bytes.len() as u64 / element_size,
            prepared: false,
        })
    }

    pub fn buffer(&self) -> u32 {
        self.buffer.name()
    }

    pub fn size(&self) -> u64 {
        self.buffer.size()
    }

    pub fn write(&self, offset: u64, bytes: &[u8]) {
        self.buffer.write(offset, bytes);
    }

    /// Draw every element as one vertex. The barrier after each dispatch already
    /// orders this after compute writes.
    pub fn draw(&self, layout: &ElementLayout, topology: Topology) {
        let count = u32::try_from(self.element_count).unwrap_or(u32::MAX);
        self.driver.draw_arrays(self.buffer.name(), layout, topology, count);
    }
}

impl OperationTarget for StorageBuffer {
    fn prepare(&mut self) -> Result<bool> {
        self.prepared = true;
        Ok(true)
    }

    fn present(&mut self) -> Result<()> {
        if !self.prepared {
            return Err(RendererError::FrameNotPrepared);
        }
        self.prepared = false;
        self.driver.memory_barrier();
        Ok(())
    }

    fn is_prepared(&self) -> bool {
        self.prepared
    }
}

impl Resource for StorageBuffer {
    fn id(&self) -> ResourceId {
        self.id
    }

    fn kind(&self) -> &'static str {
        "storage buffer"
    }
}

impl ComputeTarget for StorageBuffer {
    fn accept(&self, visitor: &mut dyn ComputeInfoVisitor) {
        visitor.visit_opengl(self);
    }

    fn element_count(&self) -> u64 {
        self.element_count
    }
}
