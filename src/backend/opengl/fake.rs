// Recording GL driver for tests

use super::{GlBackend, GlBufferKind, GlDriver, GlRasterState};
use crate::types::{ElementLayout, ShaderStage, Topology};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub enum GlCall {
    SwapBuffers,
    Finish,
    BindFramebuffer(u32),
    Viewport(u32, u32),
    Clear([f32; 4]),
    CreateBuffer(GlBufferKind, usize),
    BufferSubData { buffer: u32, offset: u64, len: usize },
    DeleteBuffer(u32),
    BindBufferRange { kind: GlBufferKind, binding: u32, offset: u64, size: u64 },
    CreateTexture(u32, u32),
    DeleteTexture(u32),
    BindTexture(u32),
    CreateProgram(Vec<ShaderStage>),
    DeleteProgram(u32),
    UseProgram(u32),
    DrawElements(u32),
    DrawArrays { topology: Topology, count: u32 },
    DispatchCompute(u32, u32, u32),
    MemoryBarrier,
}

pub struct FakeGl {
    calls: Mutex<Vec<GlCall>>,
    next_name: AtomicU32,
    pub size: (u32, u32),
    pub max_samples: u32,
    buffers: Mutex<HashMap<u32, Vec<u8>>>,
}

impl FakeGl {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            next_name: AtomicU32::new(1),
            size: (800, 600),
            max_samples: 8,
            buffers: Mutex::new(HashMap::new()),
        })
    }

    pub fn calls(&self) -> Vec<GlCall> {
        self.calls.lock().clone()
    }

    pub fn count(&self, predicate: impl Fn(&GlCall) -> bool) -> usize {
        self.calls.lock().iter().filter(|call| predicate(call)).count()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    pub fn buffer_contents(&self, buffer: u32) -> Vec<u8> {
        self.buffers.lock().get(&buffer).cloned().unwrap_or_default()
    }

    fn record(&self, call: GlCall) {
        self.calls.lock().push(call);
    }

    fn name(&self) -> u32 {
        self.next_name.fetch_add(1, Ordering::Relaxed)
    }
}

impl GlDriver for FakeGl {
    fn framebuffer_size(&self) -> (u32, u32) {
        self.size
    }

    fn swap_buffers(&self) {
        self.record(GlCall::SwapBuffers);
    }

    fn finish(&self) {
        self.record(GlCall::Finish);
    }

    fn max_samples(&self) -> u32 {
        self.max_samples
    }

    fn uniform_offset_alignment(&self) -> u64 {
        256
    }

    fn bind_framebuffer(&self, framebuffer: u32) {
        self.record(GlCall::BindFramebuffer(framebuffer));
    }

    fn viewport(&self, width: u32, height: u32) {
        self.record(GlCall::Viewport(width, height));
    }

    fn clear(&self, color: [f32; 4]) {
        self.record(GlCall::Clear(color));
    }

    fn create_buffer(&self, kind: GlBufferKind, bytes: &[u8]) -> Result<u32, String> {
        let name = self.name();
        self.buffers.lock().insert(name, bytes.to_vec());
        self.record(GlCall::CreateBuffer(kind, bytes.len()));
        Ok(name)
    }

    fn buffer_sub_data(&self, buffer: u32, offset: u64, bytes: &[u8]) {
        if let Some(contents) = self.buffers.lock().get_mut(&buffer) {
            let start = offset as usize;
            let end = (start + bytes.len()).min(contents.len());
            contents[start..end].copy_from_slice(&bytes[..end - start]);
        }
        self.record(GlCall::BufferSubData {
            buffer,
            offset,
            len: bytes.len(),
        });
    }

    fn delete_buffer(&self, buffer: u32) {
        self.buffers.lock().remove(&buffer);
        self.record(GlCall::DeleteBuffer(buffer));
    }

    fn bind_buffer_range(&self, kind: GlBufferKind, binding: u32, _buffer: u32, offset: u64, size: u64) {
        self.record(GlCall::BindBufferRange {
            kind,
            binding,
            offset,
            size,
        });
    }

    fn create_texture(&self, width: u32, height: u32, _rgba: &[u8]) -> Result<u32, String> {
        self.record(GlCall::CreateTexture(width, height));
        Ok(self.name())
    }

    fn delete_texture(&self, texture: u32) {
        self.record(GlCall::DeleteTexture(texture));
    }

    fn bind_texture(&self, unit: u32, _texture: u32) {
        self.record(GlCall::BindTexture(unit));
    }

    fn create_program(&self, stages: &[(ShaderStage, String)]) -> Result<u32, String> {
        if stages.iter().any(|(_, source)| source.trim().is_empty()) {
            return Err("empty shader source".to_string());
        }
        self.record(GlCall::CreateProgram(
            stages.iter().map(|(stage, _)| *stage).collect(),
        ));
        Ok(self.name())
    }

    fn delete_program(&self, program: u32) {
        self.record(GlCall::DeleteProgram(program));
    }

    fn use_program(&self, program: u32, _raster: Option<GlRasterState>) {
        self.record(GlCall::UseProgram(program));
    }

    fn draw_elements(&self, _vertices: u32, _indices: u32, index_count: u32) {
        self.record(GlCall::DrawElements(index_count));
    }

    fn draw_arrays(&self, _buffer: u32, _layout: &ElementLayout, topology: Topology, count: u32) {
        self.record(GlCall::DrawArrays { topology, count });
    }

    fn dispatch_compute(&self, x: u32, y: u32, z: u32) {
        self.record(GlCall::DispatchCompute(x, y, z));
    }

    fn memory_barrier(&self) {
        self.record(GlCall::MemoryBarrier);
    }
}

pub fn backend() -> (Arc<FakeGl>, Arc<GlBackend>) {
    let fake = FakeGl::new();
    let backend = Arc::new(GlBackend::new(fake.clone()));
    (fake, backend)
}
