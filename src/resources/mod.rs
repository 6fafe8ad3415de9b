// Resource manager
//
// Single factory for GPU-visible data. Every resource it creates is handed out as
// an `Arc` and tracked in the registry; the manager itself never keeps them alive.

pub mod model;
pub mod texture;
pub mod uniform;

pub use model::{load_obj, Model, Vertex, VertexInput};
pub use texture::{Texture, TextureCreateInfo, TextureHandle};
pub use uniform::{UniformAllocator, UniformSlot};

use crate::backend::opengl::{GlBackend, GlBufferKind};
use crate::backend::vulkan::{Buffer, Image, LayoutTransition, VulkanBackend};
use crate::backend::Backend;
use crate::error::{device_fatal, gl_fatal, RendererError, Result};
use crate::resource::{Resource, ResourceRegistry};
use crate::types::ShaderBlockType;
use ash::vk;
use model::ModelBuffers;
use std::path::Path;
use std::sync::Arc;
use texture::TextureStorage;

pub struct ResourceManager {
    backend: Backend,
    registry: ResourceRegistry,
    uniforms: UniformAllocator,
}

impl ResourceManager {
    pub fn new(backend: Backend) -> Self {
        Self {
            uniforms: UniformAllocator::new(backend.clone()),
            backend,
            registry: ResourceRegistry::new(),
        }
    }

    pub fn registry(&self) -> &ResourceRegistry {
        &self.registry
    }

    pub fn create_model(&self, vertices: &[Vertex], indices: &[u32]) -> Result<Arc<Model>> {
        if vertices.is_empty() || indices.is_empty() {
            return Err(RendererError::invalid("models need vertices and indices"));
        }
        if let Some(bad) = indices.iter().find(|&&index| index as usize >= vertices.len()) {
            return Err(RendererError::invalid(format!(
                "index {} out of range for {} vertices",
                bad,
                vertices.len()
            )));
        }

        let vertex_bytes: &[u8] = bytemuck::cast_slice(vertices);
        let index_bytes: &[u8] = bytemuck::cast_slice(indices);
        let buffers = match &self.backend {
            Backend::Vulkan(vk) => upload_model_vulkan(vk, vertex_bytes, index_bytes)?,
            Backend::OpenGl(gl) => upload_model_gl(gl, vertex_bytes, index_bytes)?,
        };

        let model = Arc::new(Model::new(
            vertices.len() as u32,
            indices.len() as u32,
            buffers,
        ));
        self.registry.track(&model);
        log::info!(
            "Created model {} ({} vertices, {} indices)",
            model.id(),
            vertices.len(),
            indices.len()
        );
        Ok(model)
    }

    pub fn create_model_from_path(&self, path: impl AsRef<Path>) -> Result<Arc<Model>> {
        let (vertices, indices) = load_obj(path.as_ref())?;
        self.create_model(&vertices, &indices)
    }

    pub fn create_texture(&self, info: TextureCreateInfo) -> Result<Arc<Texture>> {
        info.validate()?;
        let rgba = info.to_rgba();
        let storage = match &self.backend {
            Backend::Vulkan(vk) => upload_texture_vulkan(vk, info.width, info.height, &rgba)?,
            Backend::OpenGl(gl) => {
                let driver = gl.driver().clone();
                let texture = driver
                    .create_texture(info.width, info.height, &rgba)
                    .map_err(gl_fatal("create texture"))?;
                TextureStorage::OpenGl { driver, texture }
            }
        };

        let texture = Arc::new(Texture::new(info.width, info.height, storage));
        self.registry.track(&texture);
        match &info.path {
            Some(path) => log::info!("Loaded texture {:?} ({}x{})", path, info.width, info.height),
            None => log::info!("Created texture ({}x{})", info.width, info.height),
        }
        Ok(texture)
    }

    pub fn create_texture_from_path(&self, path: impl AsRef<Path>) -> Result<Arc<Texture>> {
        self.create_texture(TextureCreateInfo::from_path(path)?)
    }

    /// Reserve `layout_size` bytes of uniform data fed as `block_type`
    pub fn fetch_uniform(&self, block_type: ShaderBlockType, layout_size: u64) -> Result<UniformSlot> {
        self.uniforms.fetch(block_type, layout_size)
    }
}

/// Copy both halves of a mesh into device-local buffers through staging
fn upload_model_vulkan(
    backend: &VulkanBackend,
    vertex_bytes: &[u8],
    index_bytes: &[u8],
) -> Result<ModelBuffers> {
    let driver = backend.driver().clone();
    let vertices = upload_buffer(backend, vk::BufferUsageFlags::VERTEX_BUFFER, vertex_bytes)?;
    let indices = upload_buffer(backend, vk::BufferUsageFlags::INDEX_BUFFER, index_bytes)?;
    Ok(ModelBuffers::Vulkan {
        driver,
        vertices,
        indices,
    })
}

fn upload_buffer(backend: &VulkanBackend, usage: vk::BufferUsageFlags, bytes: &[u8]) -> Result<Buffer> {
    let driver = backend.driver();
    let staging = Buffer::with_data(driver.clone(), vk::BufferUsageFlags::TRANSFER_SRC, bytes)?;
    let buffer = Buffer::new(
        driver.clone(),
        staging.size(),
        usage | vk::BufferUsageFlags::TRANSFER_DST,
        vk::MemoryPropertyFlags::DEVICE_LOCAL,
    )?;

    backend.one_time(|cmd| cmd.copy_buffer(staging.handle(), buffer.handle(), staging.size()))?;
    Ok(buffer)
}

fn upload_model_gl(backend: &GlBackend, vertex_bytes: &[u8], index_bytes: &[u8]) -> Result<ModelBuffers> {
    Ok(ModelBuffers::OpenGl {
        driver: backend.driver().clone(),
        vertices: backend.create_buffer(GlBufferKind::Vertex, vertex_bytes)?,
        indices: backend.create_buffer(GlBufferKind::Index, index_bytes)?,
    })
}

fn upload_texture_vulkan(
    backend: &VulkanBackend,
    width: u32,
    height: u32,
    rgba: &[u8],
) -> Result<TextureStorage> {
    let driver = backend.driver().clone();
    let extent = vk::Extent2D { width, height };

    let staging = Buffer::with_data(driver.clone(), vk::BufferUsageFlags::TRANSFER_SRC, rgba)?;
    let image = Image::new(
        driver.clone(),
        extent,
        vk::Format::R8G8B8A8_SRGB,
        vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
    )?;

    backend.one_time(|cmd| {
        cmd.transition_image(image.handle(), LayoutTransition::UndefinedToTransferDst);
        cmd.copy_buffer_to_image(staging.handle(), image.handle(), extent);
        cmd.transition_image(image.handle(), LayoutTransition::TransferDstToShaderRead);
    })?;

    let sampler = driver
        .create_sampler()
        .map_err(device_fatal("create sampler"))?;
    Ok(TextureStorage::Vulkan {
        driver,
        image,
        sampler,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::opengl::fake::{self as gl_fake, GlCall};
    use crate::backend::vulkan::fake::{self, Call};
    use glam::{Vec2, Vec3};

    fn quad() -> (Vec<Vertex>, Vec<u32>) {
        let vertex = |x: f32, y: f32| Vertex::new(Vec3::new(x, y, 0.0), Vec3::Z, Vec2::new(x, y));
        (
            vec![vertex(0.0, 0.0), vertex(1.0, 0.0), vertex(1.0, 1.0), vertex(0.0, 1.0)],
            vec![0, 1, 2, 0, 2, 3],
        )
    }

    #[test]
    fn vulkan_models_upload_through_one_time_commands() {
        let (driver, backend, _) = fake::backend();
        let manager = ResourceManager::new(Backend::Vulkan(backend));
        let (vertices, indices) = quad();

        let model = manager.create_model(&vertices, &indices).unwrap();
        assert_eq!(model.index_count(), 6);

        let calls = driver.calls();
        let copies: Vec<_> = calls
            .iter()
            .filter_map(|call| match call {
                Call::CopyBuffer(size) => Some(*size),
                _ => None,
            })
            .collect();
        assert_eq!(copies, vec![4 * u64::from(Vertex::STRIDE), 24]);
        assert_eq!(driver.count(|c| matches!(c, Call::Submit { .. })), 2);
        assert_eq!(driver.count(|c| *c == Call::QueueWaitIdle), 2);
        // Staging buffers are gone, the two device-local ones remain
        assert_eq!(
            driver.count(|c| *c == Call::Create("buffer"))
                - driver.count(|c| *c == Call::Destroy("buffer")),
            2
        );
    }

    #[test]
    fn textures_transition_around_the_copy() {
        let (driver, backend, _) = fake::backend();
        let manager = ResourceManager::new(Backend::Vulkan(backend));

        let texture = manager
            .create_texture(TextureCreateInfo::from_rgba(2, 2, vec![255; 16]))
            .unwrap();
        assert!(matches!(texture.handle(), TextureHandle::Vulkan { .. }));

        let recorded: Vec<_> = driver
            .calls()
            .into_iter()
            .filter(|call| matches!(call, Call::Transition(_) | Call::CopyBufferToImage(_)))
            .collect();
        assert_eq!(
            recorded,
            vec![
                Call::Transition(LayoutTransition::UndefinedToTransferDst),
                Call::CopyBufferToImage(vk::Extent2D { width: 2, height: 2 }),
                Call::Transition(LayoutTransition::TransferDstToShaderRead),
            ]
        );

        drop(texture);
        assert_eq!(driver.count(|c| *c == Call::Destroy("sampler")), 1);
        assert_eq!(driver.count(|c| *c == Call::Destroy("image")), 1);
    }

    #[test]
    fn created_resources_are_registered_weakly() {
        let (_gl, backend) = gl_fake::backend();
        let manager = ResourceManager::new(Backend::OpenGl(backend));
        let (vertices, indices) = quad();

        let model = manager.create_model(&vertices, &indices).unwrap();
        let texture = manager
            .create_texture(TextureCreateInfo::from_rgba(1, 1, vec![0; 4]))
            .unwrap();
        assert!(model.id() < texture.id());
        assert_eq!(manager.registry().live().len(), 2);

        drop(model);
        let live = manager.registry().live();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].kind(), "texture");
    }

    #[test]
    fn gl_models_use_buffer_objects() {
        let (gl, backend) = gl_fake::backend();
        let manager = ResourceManager::new(Backend::OpenGl(backend));
        let (vertices, indices) = quad();

        let model = manager.create_model(&vertices, &indices).unwrap();
        assert_eq!(
            gl.count(|c| matches!(c, GlCall::CreateBuffer(GlBufferKind::Vertex, 128))),
            1
        );
        assert_eq!(
            gl.count(|c| matches!(c, GlCall::CreateBuffer(GlBufferKind::Index, 24))),
            1
        );

        drop(model);
        assert_eq!(gl.count(|c| matches!(c, GlCall::DeleteBuffer(_))), 2);
    }

    #[test]
    fn out_of_range_indices_are_rejected() {
        let (_gl, backend) = gl_fake::backend();
        let manager = ResourceManager::new(Backend::OpenGl(backend));
        let (vertices, _) = quad();
        let err = manager.create_model(&vertices, &[0, 1, 4]).err().unwrap();
        assert!(matches!(err, RendererError::InvalidConfiguration(_)));
    }

    #[test]
    fn missing_files_fail_with_resource_load() {
        let (_gl, backend) = gl_fake::backend();
        let manager = ResourceManager::new(Backend::OpenGl(backend));
        assert!(matches!(
            manager.create_model_from_path("/nope/model.obj"),
            Err(RendererError::ResourceLoad { .. })
        ));
        assert!(matches!(
            manager.create_texture_from_path("/nope/texture.png"),
            Err(RendererError::ResourceLoad { .. })
        ));
    }
}
