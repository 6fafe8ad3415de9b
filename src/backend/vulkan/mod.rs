// Vulkan backend
//
// Everything here talks to the GPU through `VulkanDriver`. `VulkanBackend` is the
// per-context hub: driver, surface, the graphics queue and the upload pool used by
// one-time commands.

pub mod commands;
pub mod descriptor;
pub mod device;
pub mod driver;
pub mod memory;
pub mod pipeline;
pub mod present;
pub mod swapchain;
pub mod sync;
pub mod target;

#[cfg(test)]
pub mod fake;

pub use commands::{CommandBuffer, CommandPool, OneTimeCommand, Queue};
pub use descriptor::{DescriptorPool, DescriptorSet};
pub use device::VulkanDevice;
pub use driver::{DeviceLimits, LayoutTransition, Submission, VulkanDriver};
pub use memory::{Buffer, Image};
pub use pipeline::PipelineObjects;
pub use present::{Acquired, PresentChain, PresentOutcome, VulkanSurface};
pub use swapchain::{KhrSurface, KhrSwapchain};
pub use target::{StorageBuffer, SwapchainFrame};

use crate::error::{device_fatal, Result};
use crate::types::Multisampling;
use ash::vk;
use parking_lot::Mutex;
use std::sync::Arc;

pub struct VulkanBackend {
    driver: Arc<dyn VulkanDriver>,
    surface: Box<dyn VulkanSurface>,
    limits: DeviceLimits,
    queue: Queue,
    upload_pool: Mutex<CommandPool>,
}

impl VulkanBackend {
    pub fn new(driver: Arc<dyn VulkanDriver>, surface: Box<dyn VulkanSurface>) -> Result<Self> {
        let limits = driver.limits();
        let queue = Queue::new(driver.clone(), limits.graphics_queue_family, 0);
        let upload_pool = CommandPool::new(driver.clone(), limits.graphics_queue_family)?;

        log::info!(
            "Vulkan backend ready (queue family {}, surface format {:?})",
            limits.graphics_queue_family,
            surface.format()
        );

        Ok(Self {
            driver,
            surface,
            limits,
            queue,
            upload_pool: Mutex::new(upload_pool),
        })
    }

    pub fn driver(&self) -> &Arc<dyn VulkanDriver> {
        &self.driver
    }

    pub fn surface(&self) -> &dyn VulkanSurface {
        self.surface.as_ref()
    }

    pub fn queue(&self) -> &Queue {
        &self.queue
    }

    pub fn limits(&self) -> DeviceLimits {
        self.limits
    }

    /// Format color attachments (and so graphics pipelines) are built for
    pub fn color_format(&self) -> vk::Format {
        self.surface.format()
    }

    pub fn max_sample_count(&self) -> Multisampling {
        Multisampling::from_vk(self.limits.sample_counts)
    }

    /// Run `record` as a one-time command on the graphics queue and wait for it
    pub fn one_time<R>(&self, record: impl FnOnce(&CommandBuffer) -> R) -> Result<R> {
        let pool = self.upload_pool.lock();
        OneTimeCommand::run(&self.queue, &pool, record)
    }

    pub fn wait_idle(&self) -> Result<()> {
        self.driver
            .device_wait_idle()
            .map_err(device_fatal("device wait idle"))
    }
}
