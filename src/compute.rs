// Compute: storage buffers as compute targets and the computer that drives them

use crate::backend::{opengl, vulkan, Backend};
use crate::error::{RendererError, Result};
use crate::pipeline::{Bindings, ComputePipeline, GraphicsPipeline};
use crate::resource::{Resource, ResourceId};
use crate::target::{ComputeInfoVisitor, ComputeTarget, Frame, OperationTarget, RenderContext, RenderHandle};
use bytemuck::Pod;
use std::mem::size_of;

/// Layout and initial contents of a storage buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageBufferCreateInfo {
    /// Size of one element as the shader sees it
    pub element_size: u64,
    pub initial_data: Vec<u8>,
}

impl StorageBufferCreateInfo {
    pub fn from_slice<T: Pod>(elements: &[T]) -> Self {
        Self {
            element_size: size_of::<T>() as u64,
            initial_data: bytemuck::cast_slice(elements).to_vec(),
        }
    }

    /// `count` zeroed elements of `element_size` bytes
    pub fn zeroed(element_size: u64, count: u64) -> Result<Self> {
        let len = element_size
            .checked_mul(count)
            .and_then(|len| usize::try_from(len).ok())
            .ok_or_else(|| {
                RendererError::invalid(format!(
                    "{count} elements of {element_size} bytes do not fit in memory"
                ))
            })?;
        Ok(Self {
            element_size,
            initial_data: vec![0; len],
        })
    }

    pub fn element_count(&self) -> u64 {
        match self.element_size {
            0 => 0,
            size => self.initial_data.len() as u64 / size,
        }
    }
}

pub enum StorageBuffer {
    Vulkan(vulkan::StorageBuffer),
    OpenGl(opengl::StorageBuffer),
}

impl StorageBuffer {
    pub(crate) fn create(backend: &Backend, info: &StorageBufferCreateInfo) -> Result<Self> {
        let buffer = match backend {
            Backend::Vulkan(vk) => StorageBuffer::Vulkan(vulkan::StorageBuffer::new(
                vk.clone(),
                info.element_size,
                &info.initial_data,
            )?),
            Backend::OpenGl(gl) => StorageBuffer::OpenGl(opengl::StorageBuffer::new(
                gl,
                info.element_size,
                &info.initial_data,
            )?),
        };
        log::info!(
            "Created storage buffer {} ({} elements of {} bytes)",
            buffer.id(),
            info.element_count(),
            info.element_size
        );
        Ok(buffer)
    }

    pub fn size(&self) -> u64 {
        match self {
            StorageBuffer::Vulkan(buffer) => buffer.size(),
            StorageBuffer::OpenGl(buffer) => buffer.size(),
        }
    }

    /// Overwrite part of the buffer from the CPU
    pub fn write(&self, offset: u64, bytes: &[u8]) -> Result<()> {
        let past_end = offset
            .checked_add(bytes.len() as u64)
            .map_or(true, |end| end > self.size());
        if past_end {
            return Err(RendererError::invalid(format!(
                "write of {} bytes at {} overflows a {} byte storage buffer",
                bytes.len(),
                offset,
                self.size()
            )));
        }
        match self {
            StorageBuffer::Vulkan(buffer) => buffer.write(offset, bytes),
            StorageBuffer::OpenGl(buffer) => {
                buffer.write(offset, bytes);
                Ok(())
            }
        }
    }

    /// Bind the buffer as vertex input and draw one vertex per element.
    ///
    /// `pipeline` must be bound already and read elements (see
    /// [`GraphicsPipelineCreateInfo::elements`](crate::GraphicsPipelineCreateInfo::elements)).
    /// On Vulkan, a frame drawing the result of a dispatch has to be told to wait
    /// for it with [`Swapchain::wait_for`](crate::Swapchain::wait_for) before the dispatch.
    pub fn draw(&self, context: &RenderContext, pipeline: &GraphicsPipeline) -> Result<()> {
        let layout = pipeline.element_layout()?;
        match (self, context.handle) {
            (_, None) => Err(RendererError::FrameNotPrepared),
            (StorageBuffer::Vulkan(buffer), Some(RenderHandle::Vulkan { command_buffer, .. })) => {
                buffer.draw(command_buffer);
                Ok(())
            }
            (StorageBuffer::OpenGl(buffer), Some(RenderHandle::OpenGl { .. })) => {
                buffer.draw(layout, pipeline.topology());
                Ok(())
            }
            _ => Err(RendererError::invalid(format!(
                "{} belongs to a different backend than the render target",
                self.id()
            ))),
        }
    }
}

impl OperationTarget for StorageBuffer {
    fn prepare(&mut self) -> Result<bool> {
        match self {
            StorageBuffer::Vulkan(buffer) => buffer.prepare(),
            StorageBuffer::OpenGl(buffer) => buffer.prepare(),
        }
    }

    fn present(&mut self) -> Result<()> {
        match self {
            StorageBuffer::Vulkan(buffer) => buffer.present(),
            StorageBuffer::OpenGl(buffer) => buffer.present(),
        }
    }

    fn is_prepared(&self) -> bool {
        match self {
            StorageBuffer::Vulkan(buffer) => buffer.is_prepared(),
            StorageBuffer::OpenGl(buffer) => buffer.is_prepared(),
        }
    }
}

impl Resource for StorageBuffer {
    fn id(&self) -> ResourceId {
        match self {
            StorageBuffer::Vulkan(buffer) => buffer.id(),
            StorageBuffer::OpenGl(buffer) => buffer.id(),
        }
    }

    fn kind(&self) -> &'static str {
        "storage buffer"
    }
}

impl ComputeTarget for StorageBuffer {
    fn accept(&self, visitor: &mut dyn ComputeInfoVisitor) {
        match self {
            StorageBuffer::Vulkan(buffer) => buffer.accept(visitor),
            StorageBuffer::OpenGl(buffer) => buffer.accept(visitor),
        }
    }

    fn element_count(&self) -> u64 {
        match self {
            StorageBuffer::Vulkan(buffer) => buffer.element_count(),
            StorageBuffer::OpenGl(buffer) => buffer.element_count(),
        }
    }
}

/// Records one dispatch into whichever backend the target belongs to
struct DispatchRecorder<'a> {
    pipeline: &'a ComputePipeline,
    bindings: Option<&'a Bindings>,
    result: Result<()>,
}

impl ComputeInfoVisitor for DispatchRecorder<'_> {
    fn visit_vulkan(&mut self, buffer: &vulkan::StorageBuffer) {
        let groups = self
            .pipeline
            .compute_dimensions()
            .groups_for(buffer.element_count());
        self.result = match buffer.command_buffer() {
            Some(cmd) => self.pipeline.dispatch_vulkan(cmd, self.bindings, groups),
            None => Err(RendererError::FrameNotPrepared),
        };
    }

    fn visit_opengl(&mut self, buffer: &opengl::StorageBuffer) {
        let groups = self
            .pipeline
            .compute_dimensions()
            .groups_for(buffer.element_count());
        self.result = self.pipeline.dispatch_gl(self.bindings, groups);
    }
}

/// Drives compute targets through prepare, dispatch and present
pub struct Computer {
    id: ResourceId,
}

impl Computer {
    pub(crate) fn new() -> Self {
        Self {
            id: ResourceId::next(),
        }
    }

    /// Run `pipeline` over `target` once.
    ///
    /// Returns `Ok(false)` when the target skipped the frame. The dispatch covers
    /// the target's elements along x in groups of the pipeline's x dimension.
    pub fn dispatch<T>(&self, target: &mut T, pipeline: &ComputePipeline, bindings: Option<&Bindings>) -> Result<bool>
    where
        T: ComputeTarget + ?Sized,
    {
        let Some(frame) = Frame::begin(target)? else {
            log::debug!("Compute target skipped the frame, nothing dispatched");
            return Ok(false);
        };

        let mut recorder = DispatchRecorder {
            pipeline,
            bindings,
            result: Ok(()),
        };
        frame.accept(&mut recorder);

        // Submit even a failed recording so the target is back in a usable state
        let presented = frame.present();
        recorder.result?;
        presented?;
        Ok(true)
    }
}

impl Resource for Computer {
    fn id(&self) -> ResourceId {
        self.id
    }

    fn kind(&self) -> &'static str {
        "computer"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::opengl::fake::{self as gl_fake, GlCall};
    use crate::backend::vulkan::fake::{self, Call};
    use crate::pipeline::{ComputeDimensions, ComputePipelineCreateInfo, GraphicsPipelineCreateInfo};
    use crate::renderer::{Renderer, RendererCreateInfo};
    use crate::types::{ElementFormat, ElementLayout, Multisampling, ShaderBlockType, ShaderStage, Topology};
    use ash::vk;
    use std::io::Write;

    fn shader(contents: &[u8]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents).unwrap();
        file
    }

    fn spirv() -> tempfile::NamedTempFile {
        let words: Vec<u8> = [0x0723_0203u32, 0x0001_0000, 0, 1, 0]
            .iter()
            .flat_map(|word| word.to_le_bytes())
            .collect();
        shader(&words)
    }

    #[test]
    fn create_info_counts_elements() {
        let info = StorageBufferCreateInfo::from_slice(&[[0f32; 4]; 10]);
        assert_eq!(info.element_size, 16);
        assert_eq!(info.element_count(), 10);
        assert_eq!(StorageBufferCreateInfo::zeroed(8, 3).unwrap().initial_data.len(), 24);
    }

    #[test]
    fn zeroed_rejects_sizes_that_overflow() {
        let err = StorageBufferCreateInfo::zeroed(u64::MAX, 2).unwrap_err();
        assert!(matches!(err, RendererError::InvalidConfiguration(_)));
    }

    #[test]
    fn vulkan_dispatch_records_then_submits_with_the_buffer_fence() {
        let (driver, backend, _) = fake::backend();
        let backend = Backend::Vulkan(backend);
        let file = spirv();
        let pipeline = ComputePipeline::create(
            &backend,
            ComputePipelineCreateInfo::new()
                .shader(file.path())
                .binding(0, ShaderBlockType::Storage)
                .compute_dimensions(ComputeDimensions::new(64, 1, 1).unwrap()),
        )
        .unwrap();

        let mut buffer =
            StorageBuffer::create(&backend, &StorageBufferCreateInfo::zeroed(16, 256).unwrap()).unwrap();
        let mut bindings = pipeline.create_bindings().unwrap();
        bindings.attach_storage(0, &buffer).unwrap();

        driver.clear();
        let computer = Computer::new();
        assert!(computer.dispatch(&mut buffer, &pipeline, Some(&bindings)).unwrap());

        let calls = driver.calls();
        let dispatch = calls.iter().position(|c| *c == Call::Dispatch(4, 1, 1)).unwrap();
        let submit = calls
            .iter()
            .position(|c| matches!(c, Call::Submit { fence, .. } if *fence != ash::vk::Fence::null()))
            .unwrap();
        assert!(calls[..dispatch].contains(&Call::WaitFence));
        assert!(calls[..dispatch].contains(&Call::BindDescriptorSet(vec![])));
        assert!(dispatch < submit);
        assert!(!buffer.is_prepared());
    }

    #[test]
    fn gl_dispatch_publishes_writes_with_a_barrier() {
        let (gl, backend) = gl_fake::backend();
        let backend = Backend::OpenGl(backend);
        let file = shader(b"#version 430\nlayout(local_size_x = 32) in;\nvoid main() {}\n");
        let pipeline = ComputePipeline::create(
            &backend,
            ComputePipelineCreateInfo::new()
                .shader(file.path())
                .compute_dimensions(ComputeDimensions::new(32, 1, 1).unwrap()),
        )
        .unwrap();
        let mut buffer =
            StorageBuffer::create(&backend, &StorageBufferCreateInfo::from_slice(&[0u32; 100])).unwrap();

        gl.clear_calls();
        Computer::new().dispatch(&mut buffer, &pipeline, None).unwrap();
        let calls = gl.calls();
        assert_eq!(
            &calls[1..],
            &[GlCall::DispatchCompute(4, 1, 1), GlCall::MemoryBarrier]
        );
    }

    #[test]
    fn mismatched_backends_are_reported_and_the_target_recovers() {
        let (_driver, vk_backend, _) = fake::backend();
        let (_gl, gl_backend) = gl_fake::backend();
        let file = spirv();
        let pipeline = ComputePipeline::create(
            &Backend::Vulkan(vk_backend),
            ComputePipelineCreateInfo::new().shader(file.path()),
        )
        .unwrap();
        let mut buffer = StorageBuffer::create(
            &Backend::OpenGl(gl_backend),
            &StorageBufferCreateInfo::zeroed(4, 4).unwrap(),
        )
        .unwrap();

        let err = Computer::new().dispatch(&mut buffer, &pipeline, None).unwrap_err();
        assert!(matches!(err, RendererError::InvalidConfiguration(_)));
        assert!(!buffer.is_prepared());
    }

    fn particle_layout() -> ElementLayout {
        ElementLayout::new(32)
            .attribute(ElementFormat::Vec2, 0)
            .attribute(ElementFormat::Vec2, 8)
            .attribute(ElementFormat::Vec4, 16)
    }

    #[test]
    fn vulkan_storage_buffers_draw_as_point_vertices() {
        let (driver, backend, _) = fake::backend();
        let backend = Backend::Vulkan(backend);
        let (vert, frag) = (spirv(), spirv());
        let pipeline = GraphicsPipeline::create(
            &backend,
            GraphicsPipelineCreateInfo::new()
                .shader(ShaderStage::Vertex, vert.path())
                .shader(ShaderStage::Fragment, frag.path())
                .elements(particle_layout())
                .topology(Topology::Points),
            Multisampling::X1,
        )
        .unwrap();
        assert_eq!(driver.topologies(), vec![vk::PrimitiveTopology::POINT_LIST]);

        let particles =
            StorageBuffer::create(&backend, &StorageBufferCreateInfo::zeroed(32, 100).unwrap()).unwrap();
        let StorageBuffer::Vulkan(inner) = &particles else {
            unreachable!()
        };
        let context = RenderContext {
            handle: Some(RenderHandle::Vulkan {
                command_buffer: vk::CommandBuffer::null(),
                image_index: 0,
                image: vk::Image::null(),
                view: vk::ImageView::null(),
            }),
            ..RenderContext::new([0.0; 4])
        };
        let renderer = Renderer::new(backend.clone(), RendererCreateInfo::default(), Multisampling::X1).unwrap();

        driver.clear();
        renderer.draw_elements(&context, &pipeline, None, &particles).unwrap();
        assert_eq!(
            driver.calls(),
            vec![
                Call::BindPipeline(vk::PipelineBindPoint::GRAPHICS),
                Call::BindVertexBuffer(inner.buffer()),
                Call::Draw(100),
            ]
        );
    }

    #[test]
    fn gl_storage_buffers_draw_with_the_pipeline_topology() {
        let (gl, backend) = gl_fake::backend();
        let backend = Backend::OpenGl(backend);
        let (vert, frag) = (
            shader(b"#version 430\nvoid main() {}\n"),
            shader(b"#version 430\nvoid main() {}\n"),
        );
        let info = GraphicsPipelineCreateInfo::new()
            .shader(ShaderStage::Vertex, vert.path())
            .shader(ShaderStage::Fragment, frag.path());
        let points = GraphicsPipeline::create(
            &backend,
            info.clone().elements(particle_layout()).topology(Topology::Points),
            Multisampling::X1,
        )
        .unwrap();
        let meshes = GraphicsPipeline::create(&backend, info, Multisampling::X1).unwrap();

        let particles =
            StorageBuffer::create(&backend, &StorageBufferCreateInfo::zeroed(32, 16).unwrap()).unwrap();
        let context = RenderContext {
            handle: Some(RenderHandle::OpenGl { framebuffer: 0 }),
            ..RenderContext::new([0.0; 4])
        };

        gl.clear_calls();
        particles.draw(&context, &points).unwrap();
        assert_eq!(
            gl.calls(),
            vec![GlCall::DrawArrays {
                topology: Topology::Points,
                count: 16
            }]
        );

        let err = particles.draw(&context, &meshes).unwrap_err();
        assert!(matches!(err, RendererError::InvalidConfiguration(_)));
        let err = particles.draw(&RenderContext::new([0.0; 4]), &points).unwrap_err();
        assert!(matches!(err, RendererError::FrameNotPrepared));
    }

    #[test]
    fn writes_past_the_end_are_rejected() {
        let (_gl, backend) = gl_fake::backend();
        let buffer = StorageBuffer::create(
            &Backend::OpenGl(backend),
            &StorageBufferCreateInfo::zeroed(4, 4).unwrap(),
        )
        .unwrap();
        assert!(buffer.write(12, &[0; 4]).is_ok());
        assert!(buffer.write(13, &[0; 4]).is_err());

        let err = buffer.write(u64::MAX, &[0; 4]).unwrap_err();
        assert!(matches!(err, RendererError::InvalidConfiguration(_)));
    }
}
