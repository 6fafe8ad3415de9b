// Swapchain: a ring of presentable render targets
//
// `present` takes the next slot in ring order, prepares it, lets the draw callback
// record into it and hands it to the backend. A skipped frame leaves the ring where
// it was.

use crate::backend::vulkan::target::{ChainState, SharedChain};
use crate::backend::vulkan::{CommandPool, SwapchainFrame};
use crate::backend::{opengl, Backend};
use crate::compute::StorageBuffer;
use crate::error::{device_fatal, RendererError, Result};
use crate::resource::{Resource, ResourceId};
use crate::target::{Frame, OperationTarget, RenderContext, RenderInfoVisitor, RenderTarget};
use crate::types::Extent;
use parking_lot::Mutex;
use std::sync::Arc;

pub const DEFAULT_FRAMES_IN_FLIGHT: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainCreateInfo {
    pub frames_in_flight: u32,
    /// Initial surface size; empty means the size of the window the context was created from
    pub extent: Extent,
}

impl Default for SwapchainCreateInfo {
    fn default() -> Self {
        Self {
            frames_in_flight: DEFAULT_FRAMES_IN_FLIGHT,
            extent: Extent::default(),
        }
    }
}

impl SwapchainCreateInfo {
    pub fn frames_in_flight(mut self, frames_in_flight: u32) -> Self {
        self.frames_in_flight = frames_in_flight;
        self
    }

    pub fn extent(mut self, width: u32, height: u32) -> Self {
        self.extent = Extent::new(width, height);
        self
    }
}

/// One slot of the ring
pub enum SwapchainTarget {
    Vulkan(SwapchainFrame),
    OpenGl(opengl::FrameTarget),
}

impl OperationTarget for SwapchainTarget {
    fn prepare(&mut self) -> Result<bool> {
        match self {
            SwapchainTarget::Vulkan(frame) => frame.prepare(),
            SwapchainTarget::OpenGl(frame) => frame.prepare(),
        }
    }

    fn present(&mut self) -> Result<()> {
        match self {
            SwapchainTarget::Vulkan(frame) => frame.present(),
            SwapchainTarget::OpenGl(frame) => frame.present(),
        }
    }

    fn is_prepared(&self) -> bool {
        match self {
            SwapchainTarget::Vulkan(frame) => frame.is_prepared(),
            SwapchainTarget::OpenGl(frame) => frame.is_prepared(),
        }
    }
}

impl Resource for SwapchainTarget {
    fn id(&self) -> ResourceId {
        match self {
            SwapchainTarget::Vulkan(frame) => frame.id(),
            SwapchainTarget::OpenGl(frame) => frame.id(),
        }
    }

    fn kind(&self) -> &'static str {
        "swapchain frame"
    }
}

impl RenderTarget for SwapchainTarget {
    fn width(&self) -> u32 {
        match self {
            SwapchainTarget::Vulkan(frame) => frame.width(),
            SwapchainTarget::OpenGl(frame) => frame.width(),
        }
    }

    fn height(&self) -> u32 {
        match self {
            SwapchainTarget::Vulkan(frame) => frame.height(),
            SwapchainTarget::OpenGl(frame) => frame.height(),
        }
    }

    fn accept(&self, visitor: &mut dyn RenderInfoVisitor) {
        match self {
            SwapchainTarget::Vulkan(frame) => frame.accept(visitor),
            SwapchainTarget::OpenGl(frame) => frame.accept(visitor),
        }
    }

    fn populate_render_context(&self, context: &mut RenderContext) {
        match self {
            SwapchainTarget::Vulkan(frame) => frame.populate_render_context(context),
            SwapchainTarget::OpenGl(frame) => frame.populate_render_context(context),
        }
    }
}

pub type DrawCallback = Box<dyn FnMut(&mut dyn RenderTarget) + Send>;

pub struct Swapchain {
    id: ResourceId,
    backend: Backend,
    // Frames go first: they wait on their fences before the pool reclaims their buffers
    targets: Vec<SwapchainTarget>,
    _pool: Option<Mutex<CommandPool>>,
    chain: Option<SharedChain>,
    next: usize,
    draw_callback: Option<DrawCallback>,
}

impl Swapchain {
    pub(crate) fn create(backend: &Backend, info: SwapchainCreateInfo) -> Result<Self> {
        if info.frames_in_flight == 0 {
            return Err(RendererError::invalid("frames_in_flight must be at least 1"));
        }

        let (targets, pool, chain) = match backend {
            Backend::Vulkan(vk) => {
                let chain = vk
                    .surface()
                    .create_chain(info.extent.into())
                    .map_err(device_fatal("create swapchain"))?;
                let chain: SharedChain = Arc::new(Mutex::new(ChainState::new(chain)));

                let pool = CommandPool::new(vk.driver().clone(), vk.queue().family())?;
                let targets = pool
                    .allocate_many(info.frames_in_flight)?
                    .into_iter()
                    .map(|commands| {
                        SwapchainFrame::new(vk.clone(), chain.clone(), commands).map(SwapchainTarget::Vulkan)
                    })
                    .collect::<Result<Vec<_>>>()?;
                (targets, Some(Mutex::new(pool)), Some(chain))
            }
            Backend::OpenGl(gl) => {
                let targets = (0..info.frames_in_flight)
                    .map(|_| SwapchainTarget::OpenGl(opengl::FrameTarget::new(gl)))
                    .collect();
                (targets, None, None)
            }
        };

        let swapchain = Self {
            id: ResourceId::next(),
            backend: backend.clone(),
            targets,
            _pool: pool,
            chain,
            next: 0,
            draw_callback: None,
        };
        log::info!(
            "Created {} swapchain {} ({} frames in flight, {}x{})",
            backend.api(),
            swapchain.id,
            info.frames_in_flight,
            swapchain.width(),
            swapchain.height()
        );
        Ok(swapchain)
    }

    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn frames_in_flight(&self) -> usize {
        self.targets.len()
    }

    pub fn width(&self) -> u32 {
        self.extent().width
    }

    pub fn height(&self) -> u32 {
        self.extent().height
    }

    pub fn extent(&self) -> Extent {
        match (&self.chain, self.targets.first()) {
            (Some(chain), _) => chain.lock().chain.extent().into(),
            (None, Some(SwapchainTarget::OpenGl(frame))) => frame.extent(),
            _ => Extent::default(),
        }
    }

    /// Replace the draw callback; it runs once per presented frame
    pub fn set_draw_callback(&mut self, callback: impl FnMut(&mut dyn RenderTarget) + Send + 'static) {
        self.draw_callback = Some(Box::new(callback));
    }

    pub fn clear_draw_callback(&mut self) {
        self.draw_callback = None;
    }

    /// Render and present the next frame.
    ///
    /// `Ok(false)` means the backend asked to skip it; nothing was drawn and the
    /// ring did not move. Check [`needs_recreate`](Self::needs_recreate) then.
    pub fn present(&mut self) -> Result<bool> {
        let index = self.next;
        let Some(target) = self.targets.get_mut(index) else {
            return Err(RendererError::invalid("swapchain has no frames"));
        };

        let Some(mut frame) = Frame::begin(target)? else {
            log::debug!("Swapchain {} skipped a frame", self.id);
            return Ok(false);
        };
        if let Some(callback) = self.draw_callback.as_mut() {
            callback(&mut *frame);
        }
        frame.present()?;

        self.next = (index + 1) % self.targets.len();
        Ok(true)
    }

    /// Make the next submitted frame wait for the next dispatch into `buffer`.
    ///
    /// Register before dispatching. A frame presented before that dispatch does
    /// not wait; the request carries over to the first frame after it. OpenGL
    /// orders dispatches and draws on its own, so there this only checks the backend.
    pub fn wait_for(&self, buffer: &StorageBuffer) -> Result<()> {
        match (&self.chain, buffer) {
            (Some(chain), StorageBuffer::Vulkan(buffer)) => {
                chain.lock().wait_for(buffer.completion());
                Ok(())
            }
            (None, StorageBuffer::OpenGl(_)) => Ok(()),
            _ => Err(RendererError::invalid(format!(
                "{} belongs to a different backend than swapchain {}",
                buffer.id(),
                self.id
            ))),
        }
    }

    /// The backend presentation chain went out of date and should be resized
    pub fn needs_recreate(&self) -> bool {
        self.chain.as_ref().is_some_and(|chain| chain.lock().stale)
    }

    /// Drain the device and rebuild the presentation chain at the new size.
    ///
    /// A zero-sized window (minimised) is left alone until it has an area again.
    pub fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        let extent = Extent::new(width, height);
        if extent.is_empty() {
            return Ok(());
        }
        let Some(chain) = &self.chain else {
            return Ok(());
        };

        self.backend.wait_idle()?;
        let mut state = chain.lock();
        state
            .chain
            .recreate(extent.into())
            .map_err(device_fatal("recreate swapchain"))?;
        state.stale = false;
        log::info!("Swapchain {} resized to {}x{}", self.id, width, height);
        Ok(())
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        if let Err(err) = self.backend.wait_idle() {
            log::error!("Failed to drain device before dropping swapchain {}: {}", self.id, err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::opengl::fake as gl_fake;
    use crate::backend::vulkan::fake::{self, Call};
    use crate::backend::vulkan::Acquired;
    use crate::compute::{Computer, StorageBufferCreateInfo};
    use crate::pipeline::{ComputePipeline, ComputePipelineCreateInfo};
    use ash::vk;
    use std::io::Write;
    use std::sync::Mutex as StdMutex;

    fn compute_setup(backend: &Backend) -> (tempfile::NamedTempFile, ComputePipeline, StorageBuffer) {
        let mut shader = tempfile::NamedTempFile::new().unwrap();
        for word in [0x0723_0203u32, 0x0001_0000, 0, 1, 0] {
            shader.write_all(&word.to_le_bytes()).unwrap();
        }
        let pipeline =
            ComputePipeline::create(backend, ComputePipelineCreateInfo::new().shader(shader.path())).unwrap();
        let particles =
            StorageBuffer::create(backend, &StorageBufferCreateInfo::zeroed(32, 64).unwrap()).unwrap();
        (shader, pipeline, particles)
    }

    fn completion_of(buffer: &StorageBuffer) -> vk::Semaphore {
        match buffer {
            StorageBuffer::Vulkan(buffer) => buffer.completion().semaphore(),
            StorageBuffer::OpenGl(_) => panic!("not a Vulkan buffer"),
        }
    }

    fn waits_on(wait: &[(vk::Semaphore, vk::PipelineStageFlags)], semaphore: vk::Semaphore) -> bool {
        wait.iter()
            .any(|(s, stage)| *s == semaphore && stage.contains(vk::PipelineStageFlags::VERTEX_INPUT))
    }

    fn recording_callback(swapchain: &mut Swapchain) -> Arc<StdMutex<Vec<ResourceId>>> {
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = seen.clone();
        swapchain.set_draw_callback(move |target| sink.lock().unwrap().push(target.id()));
        seen
    }

    #[test]
    fn zero_frames_in_flight_is_invalid() {
        let (_gl, backend) = gl_fake::backend();
        let err = Swapchain::create(
            &Backend::OpenGl(backend),
            SwapchainCreateInfo::default().frames_in_flight(0),
        )
        .err()
        .unwrap();
        assert!(matches!(err, RendererError::InvalidConfiguration(_)));
    }

    #[test]
    fn callback_sees_targets_in_ring_order() {
        let (_gl, backend) = gl_fake::backend();
        let mut swapchain = Swapchain::create(
            &Backend::OpenGl(backend),
            SwapchainCreateInfo::default().frames_in_flight(2),
        )
        .unwrap();
        let seen = recording_callback(&mut swapchain);

        for _ in 0..5 {
            assert!(swapchain.present().unwrap());
        }
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 5);
        assert_ne!(seen[0], seen[1]);
        assert!(seen.iter().enumerate().all(|(i, id)| *id == seen[i % 2]));
    }

    #[test]
    fn vulkan_frames_render_into_acquired_images() {
        let (driver, backend, log) = fake::backend();
        let mut swapchain = Swapchain::create(
            &Backend::Vulkan(backend),
            SwapchainCreateInfo::default().extent(640, 480),
        )
        .unwrap();
        assert_eq!((swapchain.width(), swapchain.height()), (640, 480));

        let seen = recording_callback(&mut swapchain);
        driver.clear();
        for _ in 0..4 {
            assert!(swapchain.present().unwrap());
        }

        assert_eq!(seen.lock().unwrap().len(), 4);
        assert_eq!(log.lock().presented, vec![0, 1, 2, 0]);
        assert_eq!(
            driver.count(|c| matches!(c, Call::Submit { waits: 1, signals: 1, .. })),
            4
        );
    }

    #[test]
    fn out_of_date_frames_are_skipped_until_resized() {
        let (_driver, backend, log) = fake::backend();
        let mut swapchain =
            Swapchain::create(&Backend::Vulkan(backend), SwapchainCreateInfo::default().extent(64, 64))
                .unwrap();
        let seen = recording_callback(&mut swapchain);

        log.lock().scripted.push_back(Acquired::OutOfDate);
        assert!(!swapchain.present().unwrap());
        assert!(seen.lock().unwrap().is_empty());
        assert!(swapchain.needs_recreate());

        swapchain.resize(128, 96).unwrap();
        assert!(!swapchain.needs_recreate());
        assert_eq!(log.lock().recreated, 1);
        assert_eq!(swapchain.width(), 128);

        assert!(swapchain.present().unwrap());
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn frames_wait_for_the_dispatch_they_draw() {
        let (driver, backend, _log) = fake::backend();
        let backend = Backend::Vulkan(backend);
        let mut swapchain = Swapchain::create(&backend, SwapchainCreateInfo::default().extent(64, 64)).unwrap();
        let (_shader, pipeline, mut particles) = compute_setup(&backend);
        let finished = completion_of(&particles);
        let computer = Computer::new();

        driver.clear();
        // nobody waits on this one, so it signals nothing
        computer.dispatch(&mut particles, &pipeline, None).unwrap();
        swapchain.wait_for(&particles).unwrap();
        computer.dispatch(&mut particles, &pipeline, None).unwrap();
        assert!(swapchain.present().unwrap());
        assert!(swapchain.present().unwrap());

        let submits = driver.submits();
        assert_eq!(submits.len(), 4);
        assert!(submits[0].signals.is_empty());
        assert_eq!(submits[1].signals, vec![finished]);
        assert!(submits[1].waits.is_empty());
        assert_eq!(submits[2].waits.len(), 2);
        assert!(waits_on(&submits[2].waits, finished));
        // the signal was consumed by the first frame
        assert_eq!(submits[3].waits.len(), 1);
        assert!(!waits_on(&submits[3].waits, finished));
    }

    #[test]
    fn a_wait_registered_before_the_dispatch_carries_over() {
        let (driver, backend, _log) = fake::backend();
        let backend = Backend::Vulkan(backend);
        let mut swapchain = Swapchain::create(&backend, SwapchainCreateInfo::default().extent(64, 64)).unwrap();
        let (_shader, pipeline, mut particles) = compute_setup(&backend);
        let finished = completion_of(&particles);

        driver.clear();
        swapchain.wait_for(&particles).unwrap();
        swapchain.wait_for(&particles).unwrap();
        // presented before the dispatch: waiting would never finish
        assert!(swapchain.present().unwrap());
        Computer::new().dispatch(&mut particles, &pipeline, None).unwrap();
        assert!(swapchain.present().unwrap());

        let submits = driver.submits();
        assert_eq!(submits.len(), 3);
        assert!(!waits_on(&submits[0].waits, finished));
        assert_eq!(submits[1].signals, vec![finished]);
        assert_eq!(submits[2].waits.len(), 2);
        assert!(waits_on(&submits[2].waits, finished));
    }

    #[test]
    fn dropped_buffers_release_their_pending_wait() {
        let (driver, backend, _log) = fake::backend();
        let backend = Backend::Vulkan(backend);
        let mut swapchain = Swapchain::create(&backend, SwapchainCreateInfo::default().extent(64, 64)).unwrap();
        let (_shader, _pipeline, particles) = compute_setup(&backend);

        swapchain.wait_for(&particles).unwrap();
        drop(particles);
        driver.clear();
        assert!(swapchain.present().unwrap());
        assert_eq!(driver.submits()[0].waits.len(), 1);
        // the semaphore went with the last reference to it
        assert_eq!(driver.count(|c| *c == Call::Destroy("semaphore")), 1);
    }

    #[test]
    fn waiting_on_compute_checks_the_backend() {
        let (_gl, gl_backend) = gl_fake::backend();
        let (_driver, vk_backend, _) = fake::backend();
        let gl_backend = Backend::OpenGl(gl_backend);
        let swapchain = Swapchain::create(&gl_backend, SwapchainCreateInfo::default()).unwrap();
        let info = StorageBufferCreateInfo::zeroed(4, 4).unwrap();
        let gl_buffer = StorageBuffer::create(&gl_backend, &info).unwrap();
        let vk_buffer = StorageBuffer::create(&Backend::Vulkan(vk_backend), &info).unwrap();

        assert!(swapchain.wait_for(&gl_buffer).is_ok());
        assert!(matches!(
            swapchain.wait_for(&vk_buffer),
            Err(RendererError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn replacing_the_callback_drops_the_old_one() {
        let (_gl, backend) = gl_fake::backend();
        let mut swapchain =
            Swapchain::create(&Backend::OpenGl(backend), SwapchainCreateInfo::default()).unwrap();
        let first = recording_callback(&mut swapchain);
        swapchain.present().unwrap();
        let second = recording_callback(&mut swapchain);
        swapchain.present().unwrap();

        assert_eq!(first.lock().unwrap().len(), 1);
        assert_eq!(second.lock().unwrap().len(), 1);
        assert_eq!(Arc::strong_count(&first), 1);
    }
}
