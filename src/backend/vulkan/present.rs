// Presentation seam
//
// A `VulkanSurface` is what a window hands the context; it builds the
// `PresentChain` (a KHR swapchain in the real shell) that swapchain frames share.

use ash::prelude::VkResult;
use ash::vk;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquired {
    Image { index: u32, suboptimal: bool },
    /// The surface changed under the chain; nothing was acquired
    OutOfDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    /// Presented, but the chain no longer matches the surface exactly
    Suboptimal,
    OutOfDate,
}

impl PresentOutcome {
    pub fn needs_recreate(self) -> bool {
        !matches!(self, PresentOutcome::Presented)
    }
}

pub trait PresentChain: Send {
    fn format(&self) -> vk::Format;
    fn extent(&self) -> vk::Extent2D;
    fn image_count(&self) -> u32;
    fn image(&self, index: u32) -> vk::Image;
    fn image_view(&self, index: u32) -> vk::ImageView;

    /// Acquire the next presentable image, signalling `semaphore` when it is ready
    fn acquire_next_image(&mut self, semaphore: vk::Semaphore) -> VkResult<Acquired>;

    fn present(&mut self, queue: vk::Queue, index: u32, wait: vk::Semaphore) -> VkResult<PresentOutcome>;

    /// Rebuild the chain for a new surface size. The device must be idle.
    fn recreate(&mut self, extent: vk::Extent2D) -> VkResult<()>;
}

pub trait VulkanSurface: Send + Sync {
    /// Color format chains created from this surface will use
    fn format(&self) -> vk::Format;

    fn create_chain(&self, extent: vk::Extent2D) -> VkResult<Box<dyn PresentChain>>;
}
