// Vulkan operation targets: swapchain frames and storage buffers

use super::commands::{CommandBuffer, CommandPool};
use super::driver::{LayoutTransition, Submission};
use super::memory::{Buffer, HOST_MEMORY};
use super::present::{Acquired, PresentChain};
use super::sync::{ComputeSignal, Fence, FrameSync};
use super::VulkanBackend;
use crate::error::{device_fatal, RendererError, Result};
use crate::resource::{Resource, ResourceId};
use crate::target::{
    ComputeInfoVisitor, ComputeTarget, OperationTarget, RenderHandle, RenderInfoVisitor,
    RenderTarget,
};
use ash::vk;
use parking_lot::Mutex;
use std::sync::Arc;

/// The presentation chain every frame of one swapchain shares
pub struct ChainState {
    pub chain: Box<dyn PresentChain>,
    /// Set once acquire or present reported the chain out of date / suboptimal
    pub stale: bool,
    /// Compute work the next submitted frame has to wait for
    pub waits: Vec<Arc<ComputeSignal>>,
}

impl ChainState {
    pub fn new(chain: Box<dyn PresentChain>) -> Self {
        Self {
            chain,
            stale: false,
            waits: Vec::new(),
        }
    }

    pub fn wait_for(&mut self, signal: &Arc<ComputeSignal>) {
        signal.request();
        if !self.waits.iter().any(|wait| Arc::ptr_eq(wait, signal)) {
            self.waits.push(signal.clone());
        }
    }

    /// Signals already submitted; requests still waiting for their dispatch stay queued
    fn take_signaled(&mut self) -> Vec<Arc<ComputeSignal>> {
        let mut signaled = Vec::new();
        self.waits.retain(|signal| {
            if signal.consume() {
                signaled.push(signal.clone());
                false
            } else {
                !signal.is_idle()
            }
        });
        signaled
    }
}

/// Stages that read storage buffers written by compute
const COMPUTE_WAIT_STAGES: vk::PipelineStageFlags = vk::PipelineStageFlags::from_raw(
    vk::PipelineStageFlags::VERTEX_INPUT.as_raw() | vk::PipelineStageFlags::VERTEX_SHADER.as_raw(),
);

pub type SharedChain = Arc<Mutex<ChainState>>;

#[derive(Debug, Clone, Copy)]
struct AcquiredImage {
    index: u32,
    image: vk::Image,
    view: vk::ImageView,
}

/// One slot of a Vulkan swapchain ring.
///
/// Owns the slot's fence, semaphores and command buffer. `prepare` waits for the
/// slot's previous submission, acquires an image and opens the command buffer;
/// `present` closes it, submits and queues the image for display.
pub struct SwapchainFrame {
    id: ResourceId,
    backend: Arc<VulkanBackend>,
    chain: SharedChain,
    sync: FrameSync,
    commands: CommandBuffer,
    acquired: Option<AcquiredImage>,
    // Kept alive until the fence shows the submission that waited on them is done
    waited: Vec<Arc<ComputeSignal>>,
}

impl SwapchainFrame {
    pub(crate) fn new(
        backend: Arc<VulkanBackend>,
        chain: SharedChain,
        commands: CommandBuffer,
    ) -> Result<Self> {
        let sync = FrameSync::new(backend.driver().clone())?;
        Ok(Self {
            id: ResourceId::next(),
            backend,
            chain,
            sync,
            commands,
            acquired: None,
            waited: Vec::new(),
        })
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.chain.lock().chain.extent()
    }

    pub fn image_index(&self) -> Option<u32> {
        self.acquired.map(|acquired| acquired.index)
    }

    pub fn command_buffer(&self) -> vk::CommandBuffer {
        self.commands.handle()
    }

    pub fn render_handle(&self) -> Option<RenderHandle> {
        self.acquired.map(|acquired| RenderHandle::Vulkan {
            command_buffer: self.commands.handle(),
            image_index: acquired.index,
            image: acquired.image,
            view: acquired.view,
        })
    }
}

impl OperationTarget for SwapchainFrame {
    fn prepare(&mut self) -> Result<bool> {
        if self.acquired.is_some() {
            return Ok(true);
        }

        self.sync.wait()?;
        self.waited.clear();

        let acquired = {
            let mut state = self.chain.lock();
            let result = state.chain.acquire_next_image(self.sync.image_available);
            match result {
                Ok(Acquired::Image { index, suboptimal }) => {
                    if suboptimal {
                        state.stale = true;
                    }
                    AcquiredImage {
                        index,
                        image: state.chain.image(index),
                        view: state.chain.image_view(index),
                    }
                }
                Ok(Acquired::OutOfDate) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                    state.stale = true;
                    log::debug!("Swapchain out of date, skipping frame on {}", self.id);
                    return Ok(false);
                }
                Err(err) => return Err(device_fatal("acquire next image")(err)),
            }
        };

        // Only reset once we know work will be submitted, or the next wait deadlocks
        self.sync.reset()?;
        self.commands.reset()?;
        self.commands
            .begin(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)?;
        self.commands
            .transition_image(acquired.image, LayoutTransition::UndefinedToColorAttachment);

        self.acquired = Some(acquired);
        Ok(true)
    }

    fn present(&mut self) -> Result<()> {
        let acquired = self.acquired.take().ok_or(RendererError::FrameNotPrepared)?;

        self.commands
            .transition_image(acquired.image, LayoutTransition::ColorAttachmentToPresent);
        self.commands.end()?;

        let command_buffers = [self.commands.handle()];
        self.waited = self.chain.lock().take_signaled();
        let mut wait = vec![(
            self.sync.image_available,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        )];
        wait.extend(
            self.waited
                .iter()
                .map(|signal| (signal.semaphore(), COMPUTE_WAIT_STAGES)),
        );
        let signal = [self.sync.render_finished];
        self.backend.queue().submit(
            &Submission {
                command_buffers: &command_buffers,
                wait: &wait,
                signal: &signal,
            },
            self.sync.in_flight_fence,
        )?;

        let mut state = self.chain.lock();
        let queue = self.backend.queue().lock();
        let presented = state
            .chain
            .present(*queue, acquired.index, self.sync.render_finished);
        drop(queue);
        match presented {
            Ok(outcome) => {
                if outcome.needs_recreate() {
                    state.stale = true;
                }
                Ok(())
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                state.stale = true;
                Ok(())
            }
            Err(err) => Err(device_fatal("queue present")(err)),
        }
    }

    fn is_prepared(&self) -> bool {
        self.acquired.is_some()
    }
}

impl Resource for SwapchainFrame {
    fn id(&self) -> ResourceId {
        self.id
    }

    fn kind(&self) -> &'static str {
        "swapchain frame"
    }
}

impl RenderTarget for SwapchainFrame {
    fn width(&self) -> u32 {
        self.extent().width
    }

    fn height(&self) -> u32 {
        self.extent().height
    }

    fn accept(&self, visitor: &mut dyn RenderInfoVisitor) {
        visitor.visit_vulkan(self);
    }
}

impl Drop for SwapchainFrame {
    fn drop(&mut self) {
        if self.acquired.is_some() {
            log::warn!("{} dropped while prepared; its image is never presented", self.id);
            return;
        }
        // The fence guards the last submission that used this slot's semaphores
        if let Err(err) = self.sync.wait() {
            log::error!("Failed waiting for frame {} on drop: {}", self.id, err);
        }
    }
}

/// Host-visible storage buffer that compute pipelines write into.
///
/// Doubles as a compute target: `prepare` waits for the previous dispatch and
/// opens the buffer's command buffer, `present` submits the recorded dispatch.
/// The same memory is a vertex buffer for point draws; a frame that reads it
/// after a dispatch waits on `completion`.
pub struct StorageBuffer {
    id: ResourceId,
    backend: Arc<VulkanBackend>,
    buffer: Buffer,
    element_count: u64,
    completion: Arc<ComputeSignal>,
    fence: Fence,
    commands: CommandBuffer,
    // Dropped after `commands`, which it reclaims
    _pool: Mutex<CommandPool>,
    recording: bool,
}

impl StorageBuffer {
    pub(crate) fn new(backend: Arc<VulkanBackend>, element_size: u64, bytes: &[u8]) -> Result<Self> {
        if element_size == 0 || bytes.is_empty() {
            return Err(RendererError::invalid(
                "storage buffers need a non-zero element size and initial data",
            ));
        }

        let driver = backend.driver().clone();
        let buffer = Buffer::new(
            driver.clone(),
            bytes.len() as vk::DeviceSize,
            vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::VERTEX_BUFFER,
            HOST_MEMORY,
        )?;
        buffer.write(0, bytes)?;

        let pool = CommandPool::new(driver.clone(), backend.queue().family())?;
        let commands = pool.allocate()?;
        let completion = ComputeSignal::new(driver.clone())?;
        let fence = Fence::signaled(driver)?;

        Ok(Self {
            id: ResourceId::next(),
            backend,
            buffer,
            element_count: bytes.len() as u64 / element_size,
            completion,
            fence,
            commands,
            _pool: Mutex::new(pool),
            recording: false,
        })
    }

    pub fn buffer(&self) -> vk::Buffer {
        self.buffer.handle()
    }

    pub fn size(&self) -> u64 {
        self.buffer.size()
    }

    pub fn command_buffer(&self) -> Option<vk::CommandBuffer> {
        self.recording.then(|| self.commands.handle())
    }

    /// Overwrite the contents; the caller makes sure no dispatch is in flight
    pub fn write(&self, offset: u64, bytes: &[u8]) -> Result<()> {
        self.buffer.write(offset, bytes)
    }

    /// Semaphore the next dispatch signals once a frame asked to wait for it
    pub fn completion(&self) -> &Arc<ComputeSignal> {
        &self.completion
    }

    /// Record a non-indexed draw with every element as one vertex
    pub fn draw(&self, cmd: vk::CommandBuffer) {
        let driver = self.backend.driver();
        driver.cmd_bind_vertex_buffer(cmd, self.buffer.handle());
        driver.cmd_draw(cmd, u32::try_from(self.element_count).unwrap_or(u32::MAX));
    }
}

impl OperationTarget for StorageBuffer {
    fn prepare(&mut self) -> Result<bool> {
        if self.recording {
            return Ok(true);
        }
        self.fence.wait_and_reset()?;
        self.commands.reset()?;
        self.commands
            .begin(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)?;
        self.recording = true;
        Ok(true)
    }

    fn present(&mut self) -> Result<()> {
        if !self.recording {
            return Err(RendererError::FrameNotPrepared);
        }
        self.recording = false;
        self.commands.end()?;
        let command_buffers = [self.commands.handle()];
        let finished = [self.completion.semaphore()];
        let armed = self.completion.arm();
        let signal: &[vk::Semaphore] = if armed { &finished } else { &[] };
        let submitted = self.backend.queue().submit(
            &Submission {
                command_buffers: &command_buffers,
                wait: &[],
                signal,
            },
            self.fence.handle(),
        );
        if armed {
            self.completion.submitted(submitted.is_ok());
        }
        submitted
    }

    fn is_prepared(&self) -> bool {
        self.recording
    }
}

impl Resource for StorageBuffer {
    fn id(&self) -> ResourceId {
        self.id
    }

    fn kind(&self) -> &'static str {
        "storage buffer"
    }
}

impl ComputeTarget for StorageBuffer {
    fn accept(&self, visitor: &mut dyn ComputeInfoVisitor) {
        visitor.visit_vulkan(self);
    }

    fn element_count(&self) -> u64 {
        self.element_count
    }
}

impl Drop for StorageBuffer {
    fn drop(&mut self) {
        self.completion.cancel();
        // An unsubmitted recording left the fence reset with nothing to signal it
        if self.recording {
            return;
        }
        if let Err(err) = self
            .backend
            .driver()
            .wait_for_fence(self.fence.handle())
            .map_err(device_fatal("wait for fence"))
        {
            log::error!("Failed waiting for {} on drop: {}", self.id, err);
        }
    }
}
