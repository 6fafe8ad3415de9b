// Indexed triangle meshes
//
// Vertices are interleaved `Vertex` structs; what a pipeline reads from them is
// chosen per pipeline through `VertexInput`.

use crate::backend::opengl::{GlBuffer, GlDriver};
use crate::backend::vulkan::{Buffer, VulkanDriver};
use crate::error::{RendererError, Result};
use crate::resource::{Resource, ResourceId};
use crate::target::{RenderContext, RenderHandle};
use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3};
use std::mem::{offset_of, size_of};
use std::path::Path;
use std::sync::Arc;

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct Vertex {
    pub position: Vec3,
    pub normal: Vec3,
    pub tex_coord: Vec2,
}

impl Vertex {
    pub const STRIDE: u32 = size_of::<Vertex>() as u32;

    pub fn new(position: Vec3, normal: Vec3, tex_coord: Vec2) -> Self {
        Self {
            position,
            normal,
            tex_coord,
        }
    }
}

/// A vertex attribute a graphics pipeline consumes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VertexInput {
    Position,
    Normal,
    TexCoord,
}

impl VertexInput {
    pub fn offset(self) -> u32 {
        (match self {
            VertexInput::Position => offset_of!(Vertex, position),
            VertexInput::Normal => offset_of!(Vertex, normal),
            VertexInput::TexCoord => offset_of!(Vertex, tex_coord),
        }) as u32
    }

    pub fn format(self) -> vk::Format {
        match self {
            VertexInput::Position | VertexInput::Normal => vk::Format::R32G32B32_SFLOAT,
            VertexInput::TexCoord => vk::Format::R32G32_SFLOAT,
        }
    }

    /// Attribute descriptions with locations assigned in input order
    pub fn attributes(inputs: &[VertexInput]) -> Vec<vk::VertexInputAttributeDescription> {
        inputs
            .iter()
            .enumerate()
            .map(|(location, input)| {
                vk::VertexInputAttributeDescription::builder()
                    .binding(0)
                    .location(location as u32)
                    .format(input.format())
                    .offset(input.offset())
                    .build()
            })
            .collect()
    }
}

pub(crate) enum ModelBuffers {
    Vulkan {
        driver: Arc<dyn VulkanDriver>,
        vertices: Buffer,
        indices: Buffer,
    },
    OpenGl {
        driver: Arc<dyn GlDriver>,
        vertices: GlBuffer,
        indices: GlBuffer,
    },
}

pub struct Model {
    id: ResourceId,
    vertex_count: u32,
    index_count: u32,
    buffers: ModelBuffers,
}

impl Model {
    pub(crate) fn new(vertex_count: u32, index_count: u32, buffers: ModelBuffers) -> Self {
        Self {
            id: ResourceId::next(),
            vertex_count,
            index_count,
            buffers,
        }
    }

    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    pub fn index_count(&self) -> u32 {
        self.index_count
    }

    /// Bind the geometry and record an indexed draw into the frame's context
    pub fn draw(&self, context: &RenderContext) -> Result<()> {
        match (&self.buffers, context.handle) {
            (_, None) => Err(RendererError::FrameNotPrepared),
            (
                ModelBuffers::Vulkan {
                    driver,
                    vertices,
                    indices,
                },
                Some(RenderHandle::Vulkan { command_buffer, .. }),
            ) => {
                driver.cmd_bind_geometry(command_buffer, vertices.handle(), indices.handle());
                driver.cmd_draw_indexed(command_buffer, self.index_count);
                Ok(())
            }
            (
                ModelBuffers::OpenGl {
                    driver,
                    vertices,
                    indices,
                },
                Some(RenderHandle::OpenGl { .. }),
            ) => {
                driver.draw_elements(vertices.name(), indices.name(), self.index_count);
                Ok(())
            }
            _ => Err(RendererError::invalid(format!(
                "{} belongs to a different backend than the render target",
                self.id
            ))),
        }
    }
}

impl Resource for Model {
    fn id(&self) -> ResourceId {
        self.id
    }

    fn kind(&self) -> &'static str {
        "model"
    }
}

/// Read an OBJ file into de-duplicated vertices and triangle indices
pub fn load_obj(path: &Path) -> Result<(Vec<Vertex>, Vec<u32>)> {
    let options = tobj::LoadOptions {
        triangulate: true,
        single_index: true,
        ..Default::default()
    };
    let (models, _materials) =
        tobj::load_obj(path, &options).map_err(|err| RendererError::load(path, err))?;

    let mut vertices = Vec::new();
    let mut indices = Vec::new();
    for model in &models {
        let mesh = &model.mesh;
        let base = vertices.len() as u32;
        let count = mesh.positions.len() / 3;

        for i in 0..count {
            let position = Vec3::from_slice(&mesh.positions[i * 3..i * 3 + 3]);
            let normal = if mesh.normals.len() >= (i + 1) * 3 {
                Vec3::from_slice(&mesh.normals[i * 3..i * 3 + 3])
            } else {
                Vec3::ZERO
            };
            // OBJ puts v=0 at the bottom, Vulkan samples with v=0 at the top
            let tex_coord = if mesh.texcoords.len() >= (i + 1) * 2 {
                Vec2::new(mesh.texcoords[i * 2], 1.0 - mesh.texcoords[i * 2 + 1])
            } else {
                Vec2::ZERO
            };
            vertices.push(Vertex::new(position, normal, tex_coord));
        }
        indices.extend(mesh.indices.iter().map(|index| base + index));
    }

    if indices.is_empty() {
        return Err(RendererError::load(path, "no triangles in file"));
    }
    Ok((vertices, indices))
}
