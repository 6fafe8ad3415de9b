// Uniform provider
//
// Pipelines ask for "a slot of N bytes fed as block type T" and get back a slot
// inside a shared, host-visible block. Blocks hold a fixed number of elements at
// the device's dynamic offset alignment; a full block is replaced by a fresh one.

use crate::backend::opengl::{GlBackend, GlBuffer, GlBufferKind};
use crate::backend::vulkan::{memory, Buffer, VulkanBackend};
use crate::backend::Backend;
use crate::error::{RendererError, Result};
use crate::types::ShaderBlockType;
use bytemuck::Pod;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Elements per uniform block
pub const ELEMENTS_PER_BLOCK: u32 = 100;

pub(crate) enum BlockStorage {
    Vulkan(Buffer),
    OpenGl(GlBuffer),
}

pub struct UniformBlock {
    storage: BlockStorage,
    stride: u64,
}

impl UniformBlock {
    pub(crate) fn storage(&self) -> &BlockStorage {
        &self.storage
    }

    pub fn stride(&self) -> u64 {
        self.stride
    }
}

/// A reserved range inside a uniform block
#[derive(Clone)]
pub struct UniformSlot {
    block: Arc<UniformBlock>,
    block_type: ShaderBlockType,
    offset: u64,
    size: u64,
}

impl UniformSlot {
    pub fn block_type(&self) -> ShaderBlockType {
        self.block_type
    }

    /// Byte offset of the slot within its block (a multiple of the alignment)
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Requested layout size, before alignment
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn block(&self) -> &Arc<UniformBlock> {
        &self.block
    }

    pub fn write(&self, bytes: &[u8]) -> Result<()> {
        if bytes.len() as u64 > self.size {
            return Err(RendererError::invalid(format!(
                "{} bytes do not fit a {} byte uniform slot",
                bytes.len(),
                self.size
            )));
        }
        match &self.block.storage {
            BlockStorage::Vulkan(buffer) => buffer.write(self.offset, bytes),
            BlockStorage::OpenGl(buffer) => {
                buffer.write(self.offset, bytes);
                Ok(())
            }
        }
    }

    pub fn write_value<T: Pod>(&self, value: &T) -> Result<()> {
        self.write(bytemuck::bytes_of(value))
    }
}

struct Arena {
    block: Arc<UniformBlock>,
    used: u32,
}

pub struct UniformAllocator {
    backend: Backend,
    alignment: u64,
    arenas: Mutex<HashMap<(ShaderBlockType, u64), Arena>>,
}

impl UniformAllocator {
    pub fn new(backend: Backend) -> Self {
        let alignment = match &backend {
            Backend::Vulkan(vk) => vk.limits().min_uniform_buffer_offset_alignment,
            Backend::OpenGl(gl) => gl.driver().uniform_offset_alignment(),
        };
        Self {
            backend,
            alignment,
            arenas: Mutex::new(HashMap::new()),
        }
    }

    pub fn alignment(&self) -> u64 {
        self.alignment
    }

    pub fn fetch(&self, block_type: ShaderBlockType, layout_size: u64) -> Result<UniformSlot> {
        if layout_size == 0 {
            return Err(RendererError::invalid("uniform layout size must be non-zero"));
        }
        if block_type == ShaderBlockType::Sampler {
            return Err(RendererError::invalid(
                "sampler blocks are fed by textures, not uniform slots",
            ));
        }

        let stride = memory::align_up(layout_size, self.alignment);
        let mut arenas = self.arenas.lock();
        let key = (block_type, stride);

        let full = arenas
            .get(&key)
            .map_or(true, |arena| arena.used >= ELEMENTS_PER_BLOCK);
        if full {
            let block = Arc::new(self.create_block(block_type, stride)?);
            log::debug!(
                "New {:?} uniform block: {} x {} bytes",
                block_type,
                ELEMENTS_PER_BLOCK,
                stride
            );
            arenas.insert(key, Arena { block, used: 0 });
        }

        let arena = arenas
            .get_mut(&key)
            .ok_or_else(|| RendererError::invalid("uniform arena vanished"))?;
        let offset = u64::from(arena.used) * stride;
        arena.used += 1;

        Ok(UniformSlot {
            block: arena.block.clone(),
            block_type,
            offset,
            size: layout_size,
        })
    }

    fn create_block(&self, block_type: ShaderBlockType, stride: u64) -> Result<UniformBlock> {
        let size = stride * u64::from(ELEMENTS_PER_BLOCK);
        let storage = match &self.backend {
            Backend::Vulkan(vk) => BlockStorage::Vulkan(vulkan_block(vk, block_type, size)?),
            Backend::OpenGl(gl) => BlockStorage::OpenGl(gl_block(gl, block_type, size)?),
        };
        Ok(UniformBlock { storage, stride })
    }
}

fn vulkan_block(backend: &VulkanBackend, block_type: ShaderBlockType, size: u64) -> Result<Buffer> {
    Buffer::new(
        backend.driver().clone(),
        size,
        block_type.buffer_usage(),
        memory::HOST_MEMORY,
    )
}

fn gl_block(backend: &GlBackend, block_type: ShaderBlockType, size: u64) -> Result<GlBuffer> {
    let kind = match block_type {
        ShaderBlockType::Storage => GlBufferKind::Storage,
        _ => GlBufferKind::Uniform,
    };
    backend.create_buffer(kind, &vec![0; size as usize])
}
