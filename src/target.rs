// Operation targets
//
// Anything the GPU works on once per frame. The protocol is strict:
// `prepare` then `present`, once each per frame, and `present` only after a
// `prepare` that returned true. Backends reject a stray `present` with
// `FrameNotPrepared`; `Frame` makes the happy path impossible to get wrong.

use crate::backend::{opengl, vulkan};
use crate::error::Result;
use crate::resource::Resource;
use crate::types::Extent;
use ash::vk;
use std::ops::{Deref, DerefMut};

pub trait OperationTarget {
    /// Get the target ready for this frame's work.
    ///
    /// `Ok(false)` means "skip this frame" (e.g. the surface is out of date) and is
    /// not an error. After it, `present` must not be called.
    fn prepare(&mut self) -> Result<bool>;

    /// Hand the frame's work to the GPU / display.
    fn present(&mut self) -> Result<()>;

    fn is_prepared(&self) -> bool;
}

/// Backend-specific view of a render target, one method per concrete type
pub trait RenderInfoVisitor {
    fn visit_vulkan(&mut self, frame: &vulkan::SwapchainFrame);
    fn visit_opengl(&mut self, frame: &opengl::FrameTarget);
}

/// Backend-specific view of a compute target
pub trait ComputeInfoVisitor {
    fn visit_vulkan(&mut self, buffer: &vulkan::StorageBuffer);
    fn visit_opengl(&mut self, buffer: &opengl::StorageBuffer);
}

pub trait RenderTarget: OperationTarget + Resource {
    fn width(&self) -> u32;
    fn height(&self) -> u32;

    fn accept(&self, visitor: &mut dyn RenderInfoVisitor);

    /// Fill `context` with what a renderer needs to record into this target
    fn populate_render_context(&self, context: &mut RenderContext) {
        self.accept(context);
    }
}

pub trait ComputeTarget: OperationTarget + Resource {
    fn accept(&self, visitor: &mut dyn ComputeInfoVisitor);

    /// Number of elements a dispatch covers along x
    fn element_count(&self) -> u64;
}

/// Where recorded rendering commands go
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderHandle {
    Vulkan {
        command_buffer: vk::CommandBuffer,
        image_index: u32,
        image: vk::Image,
        view: vk::ImageView,
    },
    OpenGl {
        framebuffer: u32,
    },
}

/// Per-frame recording state filled in by a render target
#[derive(Debug, Clone, PartialEq)]
pub struct RenderContext {
    pub extent: Extent,
    pub clear_color: [f32; 4],
    /// `None` when the target was not prepared
    pub handle: Option<RenderHandle>,
}

impl RenderContext {
    pub fn new(clear_color: [f32; 4]) -> Self {
        Self {
            extent: Extent::default(),
            clear_color,
            handle: None,
        }
    }
}

impl RenderInfoVisitor for RenderContext {
    fn visit_vulkan(&mut self, frame: &vulkan::SwapchainFrame) {
        self.extent = frame.extent().into();
        self.handle = frame.render_handle();
    }

    fn visit_opengl(&mut self, frame: &opengl::FrameTarget) {
        self.extent = frame.extent();
        self.handle = frame
            .is_prepared()
            .then_some(RenderHandle::OpenGl { framebuffer: frame.framebuffer() });
    }
}

/// A prepared operation target.
///
/// Only `Frame::begin` creates one, and only after `prepare` succeeded, so every
/// `Frame` is presented exactly once: explicitly through [`Frame::present`] or,
/// failing that, when it is dropped (errors are then logged).
pub struct Frame<'t, T: OperationTarget + ?Sized> {
    target: &'t mut T,
    presented: bool,
}

impl<'t, T: OperationTarget + ?Sized> Frame<'t, T> {
    /// `Ok(None)` when the target asked to skip this frame
    pub fn begin(target: &'t mut T) -> Result<Option<Self>> {
        if !target.prepare()? {
            return Ok(None);
        }
        Ok(Some(Self {
            target,
            presented: false,
        }))
    }

    pub fn present(mut self) -> Result<()> {
        self.presented = true;
        self.target.present()
    }
}

impl<T: OperationTarget + ?Sized> Deref for Frame<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.target
    }
}

impl<T: OperationTarget + ?Sized> DerefMut for Frame<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.target
    }
}

impl<T: OperationTarget + ?Sized> Drop for Frame<'_, T> {
    fn drop(&mut self) {
        if !self.presented {
            if let Err(err) = self.target.present() {
                log::error!("Failed to present frame on drop: {}", err);
            }
        }
    }
}
