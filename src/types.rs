// Small value types shared by both backends

use crate::error::{RendererError, Result};
use ash::vk;
use serde::Deserialize;

/// Which native API a context (and the window it was created from) drives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GraphicsApi {
    Vulkan,
    #[serde(alias = "gl")]
    OpenGl,
}

impl std::fmt::Display for GraphicsApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GraphicsApi::Vulkan => f.write_str("Vulkan"),
            GraphicsApi::OpenGl => f.write_str("OpenGL"),
        }
    }
}

/// MSAA level, numerically equal to the sample count
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Deserialize)]
pub enum Multisampling {
    #[default]
    X1 = 1,
    X2 = 2,
    X4 = 4,
    X8 = 8,
    X16 = 16,
    X32 = 32,
    X64 = 64,
}

impl Multisampling {
    const DESCENDING: [Multisampling; 7] = [
        Multisampling::X64,
        Multisampling::X32,
        Multisampling::X16,
        Multisampling::X8,
        Multisampling::X4,
        Multisampling::X2,
        Multisampling::X1,
    ];

    pub fn samples(self) -> u32 {
        self as u32
    }

    /// Highest level contained in a Vulkan sample-count mask
    pub fn from_vk(counts: vk::SampleCountFlags) -> Self {
        Self::DESCENDING
            .into_iter()
            .find(|level| counts.contains(level.to_vk()))
            .unwrap_or(Multisampling::X1)
    }

    /// Highest level not above GL_MAX_SAMPLES
    pub fn from_max_samples(max: u32) -> Self {
        Self::DESCENDING
            .into_iter()
            .find(|level| level.samples() <= max)
            .unwrap_or(Multisampling::X1)
    }

    pub fn to_vk(self) -> vk::SampleCountFlags {
        vk::SampleCountFlags::from_raw(self.samples())
    }
}

/// Pixel rectangle used for render areas and viewports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Extent {
    pub width: u32,
    pub height: u32,
}

impl Extent {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl From<vk::Extent2D> for Extent {
    fn from(extent: vk::Extent2D) -> Self {
        Self::new(extent.width, extent.height)
    }
}

impl From<Extent> for vk::Extent2D {
    fn from(extent: Extent) -> Self {
        vk::Extent2D {
            width: extent.width,
            height: extent.height,
        }
    }
}

/// Programmable stage a shader file is compiled for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Compute,
}

impl ShaderStage {
    pub fn to_vk(self) -> vk::ShaderStageFlags {
        match self {
            ShaderStage::Vertex => vk::ShaderStageFlags::VERTEX,
            ShaderStage::Fragment => vk::ShaderStageFlags::FRAGMENT,
            ShaderStage::Compute => vk::ShaderStageFlags::COMPUTE,
        }
    }
}

/// Primitive assembly for a graphics pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Topology {
    #[default]
    Triangles,
    Points,
}

impl Topology {
    pub fn to_vk(self) -> vk::PrimitiveTopology {
        match self {
            Topology::Triangles => vk::PrimitiveTopology::TRIANGLE_LIST,
            Topology::Points => vk::PrimitiveTopology::POINT_LIST,
        }
    }
}

/// Float vector width of one storage-buffer element attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementFormat {
    Float,
    Vec2,
    Vec3,
    Vec4,
}

impl ElementFormat {
    pub fn components(self) -> u32 {
        match self {
            ElementFormat::Float => 1,
            ElementFormat::Vec2 => 2,
            ElementFormat::Vec3 => 3,
            ElementFormat::Vec4 => 4,
        }
    }

    pub fn size(self) -> u32 {
        self.components() * 4
    }

    pub fn to_vk(self) -> vk::Format {
        match self {
            ElementFormat::Float => vk::Format::R32_SFLOAT,
            ElementFormat::Vec2 => vk::Format::R32G32_SFLOAT,
            ElementFormat::Vec3 => vk::Format::R32G32B32_SFLOAT,
            ElementFormat::Vec4 => vk::Format::R32G32B32A32_SFLOAT,
        }
    }
}

/// How a vertex stage reads storage-buffer elements drawn as vertices.
///
/// Attributes get shader locations in the order they are added.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ElementLayout {
    pub stride: u32,
    pub attributes: Vec<(ElementFormat, u32)>,
}

impl ElementLayout {
    pub fn new(stride: u32) -> Self {
        Self {
            stride,
            attributes: Vec::new(),
        }
    }

    /// Read `format` at byte `offset` of every element
    pub fn attribute(mut self, format: ElementFormat, offset: u32) -> Self {
        self.attributes.push((format, offset));
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.stride == 0 {
            return Err(RendererError::invalid("element stride must be at least 1"));
        }
        match self
            .attributes
            .iter()
            .position(|(format, offset)| offset.saturating_add(format.size()) > self.stride)
        {
            Some(location) => Err(RendererError::invalid(format!(
                "element attribute {location} reads past the {} byte stride",
                self.stride
            ))),
            None => Ok(()),
        }
    }

    pub fn vk_attributes(&self) -> Vec<vk::VertexInputAttributeDescription> {
        self.attributes
            .iter()
            .enumerate()
            .map(|(location, (format, offset))| {
                vk::VertexInputAttributeDescription::builder()
                    .binding(0)
                    .location(location as u32)
                    .format(format.to_vk())
                    .offset(*offset)
                    .build()
            })
            .collect()
    }
}

/// How a shader block is fed from the CPU side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderBlockType {
    UniformStatic,
    UniformDynamic,
    Storage,
    Sampler,
}

impl ShaderBlockType {
    pub fn descriptor_type(self) -> vk::DescriptorType {
        match self {
            ShaderBlockType::UniformStatic => vk::DescriptorType::UNIFORM_BUFFER,
            ShaderBlockType::UniformDynamic => vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
            ShaderBlockType::Storage => vk::DescriptorType::STORAGE_BUFFER,
            ShaderBlockType::Sampler => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
        }
    }

    pub fn buffer_usage(self) -> vk::BufferUsageFlags {
        match self {
            ShaderBlockType::Storage => vk::BufferUsageFlags::STORAGE_BUFFER,
            _ => vk::BufferUsageFlags::UNIFORM_BUFFER,
        }
    }
}
