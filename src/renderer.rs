// Renderer: opens and closes rendering on a prepared render target

use crate::backend::Backend;
use crate::compute::StorageBuffer;
use crate::error::{RendererError, Result};
use crate::pipeline::{Bindings, GraphicsPipeline};
use crate::resource::{Resource, ResourceId};
use crate::resources::Model;
use crate::target::{Frame, RenderContext, RenderHandle, RenderTarget};
use crate::types::Multisampling;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RendererCreateInfo {
    pub multisampling: Multisampling,
    pub clear_color: [f32; 4],
}

impl Default for RendererCreateInfo {
    fn default() -> Self {
        Self {
            multisampling: Multisampling::X1,
            clear_color: [0.0, 0.0, 0.0, 1.0],
        }
    }
}

impl RendererCreateInfo {
    pub fn multisampling(mut self, multisampling: Multisampling) -> Self {
        self.multisampling = multisampling;
        self
    }

    pub fn clear_color(mut self, clear_color: [f32; 4]) -> Self {
        self.clear_color = clear_color;
        self
    }
}

pub struct Renderer {
    id: ResourceId,
    backend: Backend,
    info: RendererCreateInfo,
}

impl Renderer {
    pub(crate) fn new(backend: Backend, info: RendererCreateInfo, max_samples: Multisampling) -> Result<Self> {
        if info.multisampling > max_samples {
            return Err(RendererError::invalid(format!(
                "{:?} requested but the device supports at most {:?}",
                info.multisampling, max_samples
            )));
        }
        Ok(Self {
            id: ResourceId::next(),
            backend,
            info,
        })
    }

    pub fn info(&self) -> &RendererCreateInfo {
        &self.info
    }

    /// Start rendering into a prepared target: clear it and cover it with the viewport
    pub fn begin(&self, target: &dyn RenderTarget) -> Result<RenderContext> {
        let mut context = RenderContext::new(self.info.clear_color);
        target.populate_render_context(&mut context);

        match (&self.backend, context.handle) {
            (_, None) => return Err(RendererError::FrameNotPrepared),
            (Backend::Vulkan(vk), Some(RenderHandle::Vulkan { command_buffer, view, .. })) => {
                let driver = vk.driver();
                let extent: ash::vk::Extent2D = context.extent.into();
                driver.cmd_begin_rendering(command_buffer, view, extent, context.clear_color);
                driver.cmd_set_viewport(command_buffer, extent);
            }
            (Backend::OpenGl(gl), Some(RenderHandle::OpenGl { framebuffer })) => {
                let driver = gl.driver();
                driver.bind_framebuffer(framebuffer);
                driver.viewport(context.extent.width, context.extent.height);
                driver.clear(context.clear_color);
            }
            _ => {
                return Err(RendererError::invalid(format!(
                    "renderer {} and target {} use different backends",
                    self.id,
                    target.id()
                )))
            }
        }
        Ok(context)
    }

    pub fn end(&self, context: &RenderContext) -> Result<()> {
        match (&self.backend, context.handle) {
            (_, None) => Err(RendererError::FrameNotPrepared),
            (Backend::Vulkan(vk), Some(RenderHandle::Vulkan { command_buffer, .. })) => {
                vk.driver().cmd_end_rendering(command_buffer);
                Ok(())
            }
            (Backend::OpenGl(_), Some(RenderHandle::OpenGl { .. })) => Ok(()),
            _ => Err(RendererError::invalid("render context belongs to another backend")),
        }
    }

    /// Bind `pipeline` with `bindings` and draw `model`
    pub fn draw(
        &self,
        context: &RenderContext,
        pipeline: &GraphicsPipeline,
        bindings: Option<&Bindings>,
        model: &Model,
    ) -> Result<()> {
        pipeline.bind(context, bindings)?;
        model.draw(context)
    }

    /// Bind `pipeline` with `bindings` and draw the elements of `buffer` as vertices
    pub fn draw_elements(
        &self,
        context: &RenderContext,
        pipeline: &GraphicsPipeline,
        bindings: Option<&Bindings>,
        buffer: &StorageBuffer,
    ) -> Result<()> {
        pipeline.bind(context, bindings)?;
        buffer.draw(context, pipeline)
    }

    /// Prepare `target`, record through `record` between begin and end, then present.
    ///
    /// For targets outside a swapchain; a swapchain prepares and presents its own.
    pub fn render<T>(&self, target: &mut T, record: impl FnOnce(&RenderContext) -> Result<()>) -> Result<bool>
    where
        T: RenderTarget,
    {
        let Some(frame) = Frame::begin(target)? else {
            return Ok(false);
        };
        let context = self.begin(&*frame)?;
        let recorded = record(&context);
        let ended = self.end(&context);
        frame.present()?;
        recorded?;
        ended?;
        Ok(true)
    }
}

impl Resource for Renderer {
    fn id(&self) -> ResourceId {
        self.id
    }

    fn kind(&self) -> &'static str {
        "renderer"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::opengl::fake::{self as gl_fake, GlCall};
    use crate::backend::opengl::FrameTarget;
    use crate::target::OperationTarget;

    #[test]
    fn gl_frames_clear_then_swap() {
        let (gl, backend) = gl_fake::backend();
        let renderer = Renderer::new(
            Backend::OpenGl(backend.clone()),
            RendererCreateInfo::default().clear_color([0.1, 0.2, 0.3, 1.0]),
            Multisampling::X8,
        )
        .unwrap();
        let mut target = FrameTarget::new(&backend);

        gl.clear_calls();
        assert!(renderer.render(&mut target, |_| Ok(())).unwrap());
        assert_eq!(
            gl.calls(),
            vec![
                GlCall::BindFramebuffer(0),
                GlCall::BindFramebuffer(0),
                GlCall::Viewport(800, 600),
                GlCall::Clear([0.1, 0.2, 0.3, 1.0]),
                GlCall::SwapBuffers,
            ]
        );
    }

    #[test]
    fn unprepared_targets_cannot_be_begun() {
        let (_gl, backend) = gl_fake::backend();
        let renderer =
            Renderer::new(Backend::OpenGl(backend.clone()), RendererCreateInfo::default(), Multisampling::X1)
                .unwrap();
        let target = FrameTarget::new(&backend);
        assert!(!target.is_prepared());
        assert!(matches!(renderer.begin(&target), Err(RendererError::FrameNotPrepared)));
    }

    #[test]
    fn multisampling_is_bounded_by_the_device() {
        let (_gl, backend) = gl_fake::backend();
        let err = Renderer::new(
            Backend::OpenGl(backend),
            RendererCreateInfo::default().multisampling(Multisampling::X16),
            Multisampling::X8,
        )
        .err()
        .unwrap();
        assert!(matches!(err, RendererError::InvalidConfiguration(_)));
    }

    #[test]
    fn recording_errors_still_present_the_frame() {
        let (gl, backend) = gl_fake::backend();
        let renderer =
            Renderer::new(Backend::OpenGl(backend.clone()), RendererCreateInfo::default(), Multisampling::X1)
                .unwrap();
        let mut target = FrameTarget::new(&backend);

        let err = renderer
            .render(&mut target, |_| Err(RendererError::invalid("bad draw")))
            .unwrap_err();
        assert!(matches!(err, RendererError::InvalidConfiguration(_)));
        assert_eq!(gl.count(|c| *c == GlCall::SwapBuffers), 1);
        assert!(!target.is_prepared());
    }
}
