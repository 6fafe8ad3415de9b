// Pipelines
//
// Create infos are plain values built by chaining: every setter takes `self` and
// returns the modified copy. Pipelines themselves are immutable once the context
// has built them; per-draw data goes through `Bindings`.

use crate::backend::opengl::{GlBufferKind, GlDriver, GlRasterState};
use crate::backend::vulkan::pipeline::{BindingSlot, GraphicsState, VertexLayout};
use crate::backend::vulkan::{DescriptorSet, PipelineObjects};
use crate::backend::Backend;
use crate::compute::StorageBuffer;
use crate::error::{gl_fatal, RendererError, Result};
use crate::resource::{Resource, ResourceId};
use crate::resources::texture::TextureHandle;
use crate::resources::uniform::BlockStorage;
use crate::resources::{Texture, UniformSlot, Vertex, VertexInput};
use crate::target::{RenderContext, RenderHandle};
use crate::types::{ElementLayout, Multisampling, ShaderBlockType, ShaderStage, Topology};
use ash::vk;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Descriptor sets a pipeline can hand out at once unless configured otherwise
pub const DEFAULT_DESCRIPTOR_CAPACITY: u32 = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderSource {
    pub stage: ShaderStage,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShaderBinding {
    pub binding: u32,
    pub block_type: ShaderBlockType,
    pub stage: ShaderStage,
}

/// Settings every pipeline kind shares
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineCreateInfo {
    pub shaders: Vec<ShaderSource>,
    pub bindings: Vec<ShaderBinding>,
    pub descriptor_capacity: u32,
}

impl Default for PipelineCreateInfo {
    fn default() -> Self {
        Self {
            shaders: Vec::new(),
            bindings: Vec::new(),
            descriptor_capacity: DEFAULT_DESCRIPTOR_CAPACITY,
        }
    }
}

impl PipelineCreateInfo {
    /// Add a shader stage. Vulkan reads SPIR-V from `path`, OpenGL reads GLSL source.
    pub fn shader(mut self, stage: ShaderStage, path: impl Into<PathBuf>) -> Self {
        self.shaders.push(ShaderSource {
            stage,
            path: path.into(),
        });
        self
    }

    pub fn binding(mut self, binding: u32, block_type: ShaderBlockType, stage: ShaderStage) -> Self {
        self.bindings.push(ShaderBinding {
            binding,
            block_type,
            stage,
        });
        self
    }

    pub fn descriptor_capacity(mut self, capacity: u32) -> Self {
        self.descriptor_capacity = capacity;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.shaders.is_empty() {
            return Err(RendererError::invalid("pipeline has no shader stages"));
        }
        for (i, shader) in self.shaders.iter().enumerate() {
            if self.shaders[..i].iter().any(|other| other.stage == shader.stage) {
                return Err(RendererError::invalid(format!(
                    "{:?} shader given more than once",
                    shader.stage
                )));
            }
        }
        for (i, binding) in self.bindings.iter().enumerate() {
            if self.bindings[..i].iter().any(|other| other.binding == binding.binding) {
                return Err(RendererError::invalid(format!(
                    "binding {} declared more than once",
                    binding.binding
                )));
            }
        }
        if self.descriptor_capacity == 0 {
            return Err(RendererError::invalid("descriptor capacity must be at least 1"));
        }
        Ok(())
    }

    fn slots(&self) -> Vec<BindingSlot> {
        self.bindings
            .iter()
            .map(|b| BindingSlot {
                binding: b.binding,
                block_type: b.block_type,
                stage: b.stage,
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CullMode {
    None,
    Front,
    #[default]
    Back,
}

impl CullMode {
    pub fn to_vk(self) -> vk::CullModeFlags {
        match self {
            CullMode::None => vk::CullModeFlags::NONE,
            CullMode::Front => vk::CullModeFlags::FRONT,
            CullMode::Back => vk::CullModeFlags::BACK,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GraphicsPipelineCreateInfo {
    pub base: PipelineCreateInfo,
    pub inputs: Vec<VertexInput>,
    /// Set when the pipeline draws storage-buffer elements instead of model vertices
    pub elements: Option<ElementLayout>,
    pub topology: Topology,
    pub multisampling: Multisampling,
    pub depth_test: bool,
    pub cull_mode: CullMode,
}

impl GraphicsPipelineCreateInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shader(mut self, stage: ShaderStage, path: impl Into<PathBuf>) -> Self {
        self.base = self.base.shader(stage, path);
        self
    }

    pub fn binding(mut self, binding: u32, block_type: ShaderBlockType, stage: ShaderStage) -> Self {
        self.base = self.base.binding(binding, block_type, stage);
        self
    }

    pub fn descriptor_capacity(mut self, capacity: u32) -> Self {
        self.base = self.base.descriptor_capacity(capacity);
        self
    }

    /// Consume `input` at the next vertex attribute location
    pub fn input(mut self, input: VertexInput) -> Self {
        self.inputs.push(input);
        self
    }

    /// Read vertices from storage-buffer elements laid out as `layout`
    pub fn elements(mut self, layout: ElementLayout) -> Self {
        self.elements = Some(layout);
        self
    }

    pub fn topology(mut self, topology: Topology) -> Self {
        self.topology = topology;
        self
    }

    pub fn multisampling(mut self, multisampling: Multisampling) -> Self {
        self.multisampling = multisampling;
        self
    }

    pub fn depth_test(mut self, enabled: bool) -> Self {
        self.depth_test = enabled;
        self
    }

    pub fn cull_mode(mut self, cull_mode: CullMode) -> Self {
        self.cull_mode = cull_mode;
        self
    }
}

/// Compute dispatch grid. Every axis is at least 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ComputeDimensions {
    x: u32,
    y: u32,
    z: u32,
}

impl ComputeDimensions {
    pub fn new(x: u32, y: u32, z: u32) -> Result<Self> {
        if x == 0 || y == 0 || z == 0 {
            return Err(RendererError::invalid(format!(
                "compute dimensions must be at least 1 on every axis, got {x}x{y}x{z}"
            )));
        }
        Ok(Self { x, y, z })
    }

    pub fn x(&self) -> u32 {
        self.x
    }

    pub fn y(&self) -> u32 {
        self.y
    }

    pub fn z(&self) -> u32 {
        self.z
    }

    /// Work groups for `element_count` elements: x covers the elements, y and z pass through
    pub fn groups_for(&self, element_count: u64) -> [u32; 3] {
        let x = element_count.div_ceil(u64::from(self.x)).max(1);
        [u32::try_from(x).unwrap_or(u32::MAX), self.y, self.z]
    }
}

impl Default for ComputeDimensions {
    fn default() -> Self {
        Self { x: 1, y: 1, z: 1 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ComputePipelineCreateInfo {
    pub base: PipelineCreateInfo,
    pub dimensions: ComputeDimensions,
}

impl ComputePipelineCreateInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shader(mut self, path: impl Into<PathBuf>) -> Self {
        self.base = self.base.shader(ShaderStage::Compute, path);
        self
    }

    pub fn binding(mut self, binding: u32, block_type: ShaderBlockType) -> Self {
        self.base = self.base.binding(binding, block_type, ShaderStage::Compute);
        self
    }

    pub fn descriptor_capacity(mut self, capacity: u32) -> Self {
        self.base = self.base.descriptor_capacity(capacity);
        self
    }

    pub fn compute_dimensions(mut self, dimensions: ComputeDimensions) -> Self {
        self.dimensions = dimensions;
        self
    }
}

/// Read a SPIR-V binary
pub fn load_spirv(path: &Path) -> Result<Vec<u32>> {
    let mut file = std::fs::File::open(path).map_err(|err| RendererError::load(path, err))?;
    ash::util::read_spv(&mut file).map_err(|err| RendererError::load(path, err))
}

pub fn load_glsl(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|err| RendererError::load(path, err))
}

enum PipelineInner {
    Vulkan(PipelineObjects),
    OpenGl {
        driver: Arc<dyn GlDriver>,
        program: u32,
        raster: Option<GlRasterState>,
    },
}

impl PipelineInner {
    fn create_gl(driver: &Arc<dyn GlDriver>, info: &PipelineCreateInfo, raster: Option<GlRasterState>) -> Result<Self> {
        let sources = info
            .shaders
            .iter()
            .map(|shader| Ok((shader.stage, load_glsl(&shader.path)?)))
            .collect::<Result<Vec<_>>>()?;
        let program = driver
            .create_program(&sources)
            .map_err(gl_fatal("link program"))?;
        Ok(PipelineInner::OpenGl {
            driver: driver.clone(),
            program,
            raster,
        })
    }
}

impl Drop for PipelineInner {
    fn drop(&mut self) {
        if let PipelineInner::OpenGl { driver, program, .. } = self {
            driver.delete_program(*program);
        }
    }
}

fn spirv_stages(info: &PipelineCreateInfo) -> Result<Vec<(ShaderStage, Vec<u32>)>> {
    info.shaders
        .iter()
        .map(|shader| Ok((shader.stage, load_spirv(&shader.path)?)))
        .collect()
}

pub struct GraphicsPipeline {
    id: ResourceId,
    info: GraphicsPipelineCreateInfo,
    inner: PipelineInner,
}

impl GraphicsPipeline {
    pub(crate) fn create(
        backend: &Backend,
        info: GraphicsPipelineCreateInfo,
        max_samples: Multisampling,
    ) -> Result<Self> {
        info.base.validate()?;
        if info.multisampling > max_samples {
            return Err(RendererError::invalid(format!(
                "{:?} requested but the device supports at most {:?}",
                info.multisampling, max_samples
            )));
        }
        if let Some(elements) = &info.elements {
            if !info.inputs.is_empty() {
                return Err(RendererError::invalid(
                    "a pipeline reads either model vertex inputs or storage-buffer elements, not both",
                ));
            }
            elements.validate()?;
        }

        let inner = match backend {
            Backend::Vulkan(vulkan) => {
                if info.depth_test {
                    log::warn!("Depth testing is not available on Vulkan targets; ignoring it");
                }
                if info.multisampling > Multisampling::X1 {
                    log::warn!(
                        "Vulkan targets render single-sampled; ignoring {:?}",
                        info.multisampling
                    );
                }
                let stages = spirv_stages(&info.base)?;
                let (stride, attributes) = match &info.elements {
                    Some(elements) => (elements.stride, elements.vk_attributes()),
                    None => (Vertex::STRIDE, VertexInput::attributes(&info.inputs)),
                };
                let objects = PipelineObjects::graphics(
                    vulkan,
                    &stages,
                    &info.base.slots(),
                    VertexLayout {
                        stride,
                        attributes: &attributes,
                    },
                    GraphicsState {
                        cull_mode: info.cull_mode.to_vk(),
                        topology: info.topology.to_vk(),
                    },
                    info.base.descriptor_capacity,
                )?;
                PipelineInner::Vulkan(objects)
            }
            Backend::OpenGl(gl) => {
                let raster = GlRasterState {
                    depth_test: info.depth_test,
                    cull_back_faces: info.cull_mode == CullMode::Back,
                    samples: info.multisampling.samples(),
                };
                PipelineInner::create_gl(gl.driver(), &info.base, Some(raster))?
            }
        };

        let pipeline = Self {
            id: ResourceId::next(),
            info,
            inner,
        };
        log::info!(
            "Created graphics pipeline {} ({} stages, {} bindings)",
            pipeline.id,
            pipeline.info.base.shaders.len(),
            pipeline.info.base.bindings.len()
        );
        Ok(pipeline)
    }

    pub fn info(&self) -> &GraphicsPipelineCreateInfo {
        &self.info
    }

    pub fn topology(&self) -> Topology {
        self.info.topology
    }

    pub fn create_bindings(&self) -> Result<Bindings> {
        Bindings::new(self.id, &self.info.base.bindings, &self.inner)
    }

    /// Element layout storage-buffer draws read with, if this pipeline takes them
    pub(crate) fn element_layout(&self) -> Result<&ElementLayout> {
        self.info.elements.as_ref().ok_or_else(|| {
            RendererError::invalid(format!(
                "pipeline {} has no element layout for drawing storage buffers",
                self.id
            ))
        })
    }

    /// Make this pipeline (and `bindings`, if any) current for the frame in `context`
    pub fn bind(&self, context: &RenderContext, bindings: Option<&Bindings>) -> Result<()> {
        match (&self.inner, context.handle) {
            (_, None) => Err(RendererError::FrameNotPrepared),
            (PipelineInner::Vulkan(objects), Some(RenderHandle::Vulkan { command_buffer, .. })) => {
                objects.bind(command_buffer);
                match bindings {
                    Some(bindings) => bindings.bind_vulkan(self.id, command_buffer),
                    None => Ok(()),
                }
            }
            (
                PipelineInner::OpenGl {
                    driver,
                    program,
                    raster,
                },
                Some(RenderHandle::OpenGl { .. }),
            ) => {
                driver.use_program(*program, *raster);
                match bindings {
                    Some(bindings) => bindings.bind_gl(self.id),
                    None => Ok(()),
                }
            }
            _ => Err(RendererError::invalid(format!(
                "pipeline {} belongs to a different backend than the render target",
                self.id
            ))),
        }
    }
}

impl Resource for GraphicsPipeline {
    fn id(&self) -> ResourceId {
        self.id
    }

    fn kind(&self) -> &'static str {
        "graphics pipeline"
    }
}

pub struct ComputePipeline {
    id: ResourceId,
    info: ComputePipelineCreateInfo,
    inner: PipelineInner,
}

impl ComputePipeline {
    pub(crate) fn create(backend: &Backend, info: ComputePipelineCreateInfo) -> Result<Self> {
        info.base.validate()?;
        if info.base.shaders.iter().any(|s| s.stage != ShaderStage::Compute) {
            return Err(RendererError::invalid(
                "compute pipelines take a single compute shader",
            ));
        }

        let inner = match backend {
            Backend::Vulkan(vulkan) => {
                let stages = spirv_stages(&info.base)?;
                PipelineInner::Vulkan(PipelineObjects::compute(
                    vulkan,
                    &stages,
                    &info.base.slots(),
                    info.base.descriptor_capacity,
                )?)
            }
            Backend::OpenGl(gl) => PipelineInner::create_gl(gl.driver(), &info.base, None)?,
        };

        let pipeline = Self {
            id: ResourceId::next(),
            info,
            inner,
        };
        log::info!(
            "Created compute pipeline {} ({:?})",
            pipeline.id,
            pipeline.info.dimensions
        );
        Ok(pipeline)
    }

    pub fn info(&self) -> &ComputePipelineCreateInfo {
        &self.info
    }

    pub fn compute_dimensions(&self) -> ComputeDimensions {
        self.info.dimensions
    }

    pub fn create_bindings(&self) -> Result<Bindings> {
        Bindings::new(self.id, &self.info.base.bindings, &self.inner)
    }

    /// Record a dispatch into an open Vulkan command buffer
    pub(crate) fn dispatch_vulkan(
        &self,
        cmd: vk::CommandBuffer,
        bindings: Option<&Bindings>,
        groups: [u32; 3],
    ) -> Result<()> {
        let PipelineInner::Vulkan(objects) = &self.inner else {
            return Err(self.wrong_backend());
        };
        objects.bind(cmd);
        if let Some(bindings) = bindings {
            bindings.bind_vulkan(self.id, cmd)?;
        }
        objects
            .driver()
            .cmd_dispatch(cmd, groups[0], groups[1], groups[2]);
        Ok(())
    }

    pub(crate) fn dispatch_gl(&self, bindings: Option<&Bindings>, groups: [u32; 3]) -> Result<()> {
        let PipelineInner::OpenGl { driver, program, .. } = &self.inner else {
            return Err(self.wrong_backend());
        };
        driver.use_program(*program, None);
        if let Some(bindings) = bindings {
            bindings.bind_gl(self.id)?;
        }
        driver.dispatch_compute(groups[0], groups[1], groups[2]);
        Ok(())
    }

    fn wrong_backend(&self) -> RendererError {
        RendererError::invalid(format!(
            "pipeline {} belongs to a different backend than the compute target",
            self.id
        ))
    }
}

impl Resource for ComputePipeline {
    fn id(&self) -> ResourceId {
        self.id
    }

    fn kind(&self) -> &'static str {
        "compute pipeline"
    }
}

enum Attachment {
    Uniform(UniformSlot),
    Texture(Arc<Texture>),
    Storage,
}

#[derive(Debug, Clone, Copy)]
enum GlEntry {
    Buffer {
        kind: GlBufferKind,
        buffer: u32,
        offset: u64,
        size: u64,
    },
    Texture(u32),
}

enum BindingTable {
    Vulkan {
        set: DescriptorSet,
        bind_point: vk::PipelineBindPoint,
        dynamic_offsets: BTreeMap<u32, u32>,
    },
    OpenGl {
        driver: Arc<dyn GlDriver>,
        entries: BTreeMap<u32, GlEntry>,
    },
}

/// Per-draw resource bindings of one pipeline.
///
/// On Vulkan this wraps a descriptor set from the pipeline's pool (dropping it
/// returns the set); on OpenGL it is a table replayed at bind time. Attached
/// uniform slots and textures are kept alive by the bindings. Storage buffers are
/// not: the caller keeps them alive while the bindings are in use.
pub struct Bindings {
    pipeline: ResourceId,
    slots: Vec<ShaderBinding>,
    table: BindingTable,
    attached: BTreeMap<u32, Attachment>,
}

impl Bindings {
    fn new(pipeline: ResourceId, slots: &[ShaderBinding], inner: &PipelineInner) -> Result<Self> {
        let table = match inner {
            PipelineInner::Vulkan(objects) => BindingTable::Vulkan {
                set: objects.allocate_set()?,
                bind_point: objects.bind_point(),
                dynamic_offsets: BTreeMap::new(),
            },
            PipelineInner::OpenGl { driver, .. } => BindingTable::OpenGl {
                driver: driver.clone(),
                entries: BTreeMap::new(),
            },
        };
        Ok(Self {
            pipeline,
            slots: slots.to_vec(),
            table,
            attached: BTreeMap::new(),
        })
    }

    fn slot(&self, binding: u32, accepted: &[ShaderBlockType]) -> Result<ShaderBinding> {
        let slot = self
            .slots
            .iter()
            .find(|slot| slot.binding == binding)
            .copied()
            .ok_or_else(|| {
                RendererError::invalid(format!("pipeline {} has no binding {}", self.pipeline, binding))
            })?;
        if !accepted.contains(&slot.block_type) {
            return Err(RendererError::invalid(format!(
                "binding {} is a {:?} block, cannot attach {:?} data",
                binding, slot.block_type, accepted
            )));
        }
        Ok(slot)
    }

    /// Feed `binding` from a uniform (or storage) slot fetched from the resource manager
    pub fn attach_uniform(&mut self, binding: u32, uniform: &UniformSlot) -> Result<()> {
        let slot = self.slot(binding, &[uniform.block_type()])?;
        let block = uniform.block();

        match (&mut self.table, block.storage()) {
            (
                BindingTable::Vulkan {
                    set,
                    dynamic_offsets,
                    ..
                },
                BlockStorage::Vulkan(buffer),
            ) => {
                let kind = slot.block_type.descriptor_type();
                if slot.block_type == ShaderBlockType::UniformDynamic {
                    let offset = u32::try_from(uniform.offset()).map_err(|_| {
                        RendererError::invalid("dynamic uniform offset exceeds 32 bits")
                    })?;
                    set.write_buffer(binding, kind, buffer.handle(), 0, uniform.size());
                    dynamic_offsets.insert(binding, offset);
                } else {
                    set.write_buffer(binding, kind, buffer.handle(), uniform.offset(), uniform.size());
                }
            }
            (BindingTable::OpenGl { entries, .. }, BlockStorage::OpenGl(buffer)) => {
                let kind = match slot.block_type {
                    ShaderBlockType::Storage => GlBufferKind::Storage,
                    _ => GlBufferKind::Uniform,
                };
                entries.insert(
                    binding,
                    GlEntry::Buffer {
                        kind,
                        buffer: buffer.name(),
                        offset: uniform.offset(),
                        size: uniform.size(),
                    },
                );
            }
            _ => return Err(RendererError::invalid("uniform slot belongs to another backend")),
        }

        self.attached.insert(binding, Attachment::Uniform(uniform.clone()));
        Ok(())
    }

    /// Feed a storage binding with a whole storage buffer
    pub fn attach_storage(&mut self, binding: u32, storage: &StorageBuffer) -> Result<()> {
        self.slot(binding, &[ShaderBlockType::Storage])?;

        match (&mut self.table, storage) {
            (BindingTable::Vulkan { set, .. }, StorageBuffer::Vulkan(buffer)) => {
                set.write_buffer(
                    binding,
                    vk::DescriptorType::STORAGE_BUFFER,
                    buffer.buffer(),
                    0,
                    buffer.size(),
                );
            }
            (BindingTable::OpenGl { entries, .. }, StorageBuffer::OpenGl(buffer)) => {
                entries.insert(
                    binding,
                    GlEntry::Buffer {
                        kind: GlBufferKind::Storage,
                        buffer: buffer.buffer(),
                        offset: 0,
                        size: buffer.size(),
                    },
                );
            }
            _ => return Err(RendererError::invalid("storage buffer belongs to another backend")),
        }

        self.attached.insert(binding, Attachment::Storage);
        Ok(())
    }

    pub fn attach_texture(&mut self, binding: u32, texture: &Arc<Texture>) -> Result<()> {
        self.slot(binding, &[ShaderBlockType::Sampler])?;

        match (&mut self.table, texture.handle()) {
            (BindingTable::Vulkan { set, .. }, TextureHandle::Vulkan { view, sampler }) => {
                set.write_image(binding, view, sampler);
            }
            (BindingTable::OpenGl { entries, .. }, TextureHandle::OpenGl { texture }) => {
                entries.insert(binding, GlEntry::Texture(texture));
            }
            _ => return Err(RendererError::invalid("texture belongs to another backend")),
        }

        self.attached.insert(binding, Attachment::Texture(texture.clone()));
        Ok(())
    }

    pub fn is_attached(&self, binding: u32) -> bool {
        self.attached.contains_key(&binding)
    }

    /// The uniform slot feeding `binding`, for per-frame writes
    pub fn uniform(&self, binding: u32) -> Option<&UniformSlot> {
        match self.attached.get(&binding) {
            Some(Attachment::Uniform(slot)) => Some(slot),
            _ => None,
        }
    }

    pub fn texture(&self, binding: u32) -> Option<&Arc<Texture>> {
        match self.attached.get(&binding) {
            Some(Attachment::Texture(texture)) => Some(texture),
            _ => None,
        }
    }

    fn check_complete(&self, pipeline: ResourceId) -> Result<()> {
        if pipeline != self.pipeline {
            return Err(RendererError::invalid(format!(
                "bindings of pipeline {} used with pipeline {}",
                self.pipeline, pipeline
            )));
        }
        match self.slots.iter().find(|slot| !self.attached.contains_key(&slot.binding)) {
            Some(missing) => Err(RendererError::invalid(format!(
                "binding {} ({:?}) has nothing attached",
                missing.binding, missing.block_type
            ))),
            None => Ok(()),
        }
    }

    fn bind_vulkan(&self, pipeline: ResourceId, cmd: vk::CommandBuffer) -> Result<()> {
        self.check_complete(pipeline)?;
        let BindingTable::Vulkan {
            set,
            bind_point,
            dynamic_offsets,
        } = &self.table
        else {
            return Err(RendererError::invalid("OpenGL bindings used on a Vulkan target"));
        };
        let offsets: Vec<u32> = dynamic_offsets.values().copied().collect();
        set.bind(cmd, *bind_point, &offsets);
        Ok(())
    }

    fn bind_gl(&self, pipeline: ResourceId) -> Result<()> {
        self.check_complete(pipeline)?;
        let BindingTable::OpenGl { driver, entries } = &self.table else {
            return Err(RendererError::invalid("Vulkan bindings used on an OpenGL target"));
        };
        for (&binding, entry) in entries {
            match *entry {
                GlEntry::Buffer {
                    kind,
                    buffer,
                    offset,
                    size,
                } => driver.bind_buffer_range(kind, binding, buffer, offset, size),
                GlEntry::Texture(texture) => driver.bind_texture(binding, texture),
            }
        }
        Ok(())
    }
}
