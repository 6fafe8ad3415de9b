// Queues, command pools and command buffers
//
// A `CommandPool` is !Sync: recording from a pool must stay on one thread at a
// time. Shared pools live behind a mutex in the backend.

use super::driver::{LayoutTransition, Submission, VulkanDriver};
use crate::error::{device_fatal, Result};
use ash::vk;
use parking_lot::{Mutex, MutexGuard};
use std::cell::Cell;
use std::marker::PhantomData;
use std::sync::Arc;

/// A device queue plus the family it was fetched from.
///
/// Host access to a `VkQueue` must be externally synchronized, so every submit,
/// wait and present goes through the handle's lock.
pub struct Queue {
    driver: Arc<dyn VulkanDriver>,
    handle: Mutex<vk::Queue>,
    family: u32,
}

impl Queue {
    pub fn new(driver: Arc<dyn VulkanDriver>, family: u32, index: u32) -> Self {
        let handle = driver.get_queue(family, index);
        Self {
            driver,
            handle: Mutex::new(handle),
            family,
        }
    }

    /// Hold the queue for a call the driver seam does not cover (presentation)
    pub fn lock(&self) -> MutexGuard<'_, vk::Queue> {
        self.handle.lock()
    }

    pub fn family(&self) -> u32 {
        self.family
    }

    pub fn submit(&self, submission: &Submission<'_>, fence: vk::Fence) -> Result<()> {
        let queue = self.handle.lock();
        self.driver
            .queue_submit(*queue, submission, fence)
            .map_err(device_fatal("queue submit"))
    }

    /// Block until every submission on this queue has completed
    pub fn wait_idle(&self) -> Result<()> {
        let queue = self.handle.lock();
        self.driver
            .queue_wait_idle(*queue)
            .map_err(device_fatal("queue wait idle"))
    }
}

pub struct CommandPool {
    driver: Arc<dyn VulkanDriver>,
    handle: vk::CommandPool,
    _not_sync: PhantomData<Cell<()>>,
}

impl CommandPool {
    pub fn new(driver: Arc<dyn VulkanDriver>, queue_family: u32) -> Result<Self> {
        let handle = driver
            .create_command_pool(queue_family)
            .map_err(device_fatal("create command pool"))?;
        Ok(Self {
            driver,
            handle,
            _not_sync: PhantomData,
        })
    }

    pub fn handle(&self) -> vk::CommandPool {
        self.handle
    }

    /// Allocate one primary buffer. It is not owned: the pool reclaims it on destruction.
    pub fn allocate(&self) -> Result<CommandBuffer> {
        self.allocate_many(1)?
            .pop()
            .ok_or_else(|| crate::RendererError::DeviceFatal {
                operation: "allocate command buffers",
                reason: "driver returned no buffers".to_string(),
            })
    }

    pub fn allocate_many(&self, count: u32) -> Result<Vec<CommandBuffer>> {
        let handles = self
            .driver
            .allocate_command_buffers(self.handle, count)
            .map_err(device_fatal("allocate command buffers"))?;
        Ok(handles
            .into_iter()
            .map(|handle| CommandBuffer {
                driver: self.driver.clone(),
                pool: self.handle,
                handle,
                owned: false,
            })
            .collect())
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        self.driver.destroy_command_pool(self.handle);
    }
}

/// A primary command buffer.
///
/// When `owned` is set the buffer is returned to its pool on drop; otherwise it
/// lives until the pool itself is destroyed. Owned buffers must be dropped
/// before their pool.
pub struct CommandBuffer {
    driver: Arc<dyn VulkanDriver>,
    pool: vk::CommandPool,
    handle: vk::CommandBuffer,
    owned: bool,
}

impl CommandBuffer {
    pub fn handle(&self) -> vk::CommandBuffer {
        self.handle
    }

    pub fn set_owned(&mut self, owned: bool) {
        self.owned = owned;
    }

    pub fn is_owned(&self) -> bool {
        self.owned
    }

    pub fn begin(&self, usage: vk::CommandBufferUsageFlags) -> Result<()> {
        self.driver
            .begin_command_buffer(self.handle, usage)
            .map_err(device_fatal("begin command buffer"))
    }

    pub fn end(&self) -> Result<()> {
        self.driver
            .end_command_buffer(self.handle)
            .map_err(device_fatal("end command buffer"))
    }

    pub fn reset(&self) -> Result<()> {
        self.driver
            .reset_command_buffer(self.handle)
            .map_err(device_fatal("reset command buffer"))
    }

    pub fn copy_buffer(&self, src: vk::Buffer, dst: vk::Buffer, size: vk::DeviceSize) {
        self.driver.cmd_copy_buffer(self.handle, src, dst, size);
    }

    pub fn copy_buffer_to_image(&self, src: vk::Buffer, image: vk::Image, extent: vk::Extent2D) {
        self.driver.cmd_copy_buffer_to_image(self.handle, src, image, extent);
    }

    pub fn transition_image(&self, image: vk::Image, transition: LayoutTransition) {
        self.driver.cmd_transition_image(self.handle, image, transition);
    }
}

impl Drop for CommandBuffer {
    fn drop(&mut self) {
        if self.owned {
            self.driver.free_command_buffers(self.pool, &[self.handle]);
        }
    }
}

/// Scoped, synchronous command submission for setup work (uploads, layout changes).
///
/// Creation allocates an owned buffer and begins it with ONE_TIME_SUBMIT. Finishing
/// (explicitly through [`submit`](Self::submit) or implicitly on drop) ends the
/// buffer, submits it with no semaphores or fence and blocks until the queue is
/// idle. Never use this per frame.
pub struct OneTimeCommand<'a> {
    queue: &'a Queue,
    buffer: CommandBuffer,
    submitted: bool,
    _pool: PhantomData<&'a CommandPool>,
}

impl<'a> OneTimeCommand<'a> {
    pub fn begin(queue: &'a Queue, pool: &'a CommandPool) -> Result<Self> {
        let mut buffer = pool.allocate()?;
        buffer.set_owned(true);
        buffer.begin(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)?;

        Ok(Self {
            queue,
            buffer,
            submitted: false,
            _pool: PhantomData,
        })
    }

    /// Record `record` into a fresh one-time buffer, submit it and wait.
    pub fn run<R>(
        queue: &'a Queue,
        pool: &'a CommandPool,
        record: impl FnOnce(&CommandBuffer) -> R,
    ) -> Result<R> {
        let command = Self::begin(queue, pool)?;
        let output = record(command.buffer());
        command.submit()?;
        Ok(output)
    }

    pub fn buffer(&self) -> &CommandBuffer {
        &self.buffer
    }

    pub fn submit(mut self) -> Result<()> {
        self.submitted = true;
        self.finish()
    }

    fn finish(&self) -> Result<()> {
        self.buffer.end()?;
        let handles = [self.buffer.handle()];
        self.queue
            .submit(&Submission::commands(&handles), vk::Fence::null())?;
        self.queue.wait_idle()
    }
}

impl Drop for OneTimeCommand<'_> {
    fn drop(&mut self) {
        if !self.submitted {
            if let Err(err) = self.finish() {
                log::error!("One-time command failed on drop: {}", err);
            }
        }
    }
}
