// OpenGL backend
//
// GL is an implicit state machine bound to the thread that owns the context, so
// the embedding window supplies the driver (`GlDriver`) and the core only issues
// calls through it.

pub mod target;

#[cfg(test)]
pub mod fake;

pub use target::{FrameTarget, StorageBuffer};

use crate::error::{gl_fatal, Result};
use crate::types::{ElementLayout, Multisampling, ShaderStage, Topology};
use std::sync::Arc;

/// Buffer binding targets the core uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GlBufferKind {
    Vertex,
    Index,
    Uniform,
    Storage,
}

/// Fixed-function state a graphics program is drawn with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlRasterState {
    pub depth_test: bool,
    pub cull_back_faces: bool,
    pub samples: u32,
}

pub trait GlDriver: Send + Sync {
    fn framebuffer_size(&self) -> (u32, u32);
    fn swap_buffers(&self);
    /// Block until every issued command has completed (`glFinish`)
    fn finish(&self);
    /// `GL_MAX_SAMPLES`
    fn max_samples(&self) -> u32;
    /// `GL_UNIFORM_BUFFER_OFFSET_ALIGNMENT`
    fn uniform_offset_alignment(&self) -> u64;

    fn bind_framebuffer(&self, framebuffer: u32);
    fn viewport(&self, width: u32, height: u32);
    fn clear(&self, color: [f32; 4]);

    fn create_buffer(&self, kind: GlBufferKind, bytes: &[u8]) -> std::result::Result<u32, String>;
    fn buffer_sub_data(&self, buffer: u32, offset: u64, bytes: &[u8]);
    fn delete_buffer(&self, buffer: u32);
    fn bind_buffer_range(&self, kind: GlBufferKind, binding: u32, buffer: u32, offset: u64, size: u64);

    fn create_texture(&self, width: u32, height: u32, rgba: &[u8]) -> std::result::Result<u32, String>;
    fn delete_texture(&self, texture: u32);
    fn bind_texture(&self, unit: u32, texture: u32);

    /// Compile and link GLSL sources into a program
    fn create_program(&self, stages: &[(ShaderStage, String)]) -> std::result::Result<u32, String>;
    fn delete_program(&self, program: u32);
    fn use_program(&self, program: u32, raster: Option<GlRasterState>);

    fn draw_elements(&self, vertices: u32, indices: u32, index_count: u32);
    /// Non-indexed draw of `count` vertices read from `buffer` as `layout`
    fn draw_arrays(&self, buffer: u32, layout: &ElementLayout, topology: Topology, count: u32);
    fn dispatch_compute(&self, x: u32, y: u32, z: u32);
    /// Make shader storage writes visible to subsequent commands
    fn memory_barrier(&self);
}

pub struct GlBackend {
    driver: Arc<dyn GlDriver>,
}

impl GlBackend {
    pub fn new(driver: Arc<dyn GlDriver>) -> Self {
        let (width, height) = driver.framebuffer_size();
        log::info!("OpenGL backend ready ({}x{} default framebuffer)", width, height);
        Self { driver }
    }

    pub fn driver(&self) -> &Arc<dyn GlDriver> {
        &self.driver
    }

    pub fn max_sample_count(&self) -> Multisampling {
        Multisampling::from_max_samples(self.driver.max_samples())
    }

    pub fn wait_idle(&self) -> Result<()> {
        self.driver.finish();
        Ok(())
    }

    pub fn create_buffer(&self, kind: GlBufferKind, bytes: &[u8]) -> Result<GlBuffer> {
        let name = self
            .driver
            .create_buffer(kind, bytes)
            .map_err(gl_fatal("create buffer"))?;
        Ok(GlBuffer {
            driver: self.driver.clone(),
            name,
            size: bytes.len() as u64,
        })
    }
}

/// A GL buffer object, deleted on drop
pub struct GlBuffer {
    driver: Arc<dyn GlDriver>,
    name: u32,
    size: u64,
}

impl GlBuffer {
    pub fn name(&self) -> u32 {
        self.name
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn write(&self, offset: u64, bytes: &[u8]) {
        self.driver.buffer_sub_data(self.name, offset, bytes);
    }
}

impl Drop for GlBuffer {
    fn drop(&mut self) {
        self.driver.delete_buffer(self.name);
    }
}
