// Recording Vulkan driver for tests
//
// Hands out fresh handles, keeps host-visible memory in plain vectors and logs
// every call so tests can assert on what the core asked the GPU to do.

use super::driver::{
    BufferAllocation, DeviceLimits, GraphicsPipelineDesc, ImageAllocation, LayoutTransition,
    Submission, VulkanDriver,
};
use super::present::{Acquired, PresentChain, PresentOutcome, VulkanSurface};
use super::VulkanBackend;
use ash::prelude::VkResult;
use ash::vk::{self, Handle};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    DeviceWaitIdle,
    Submit {
        command_buffers: Vec<vk::CommandBuffer>,
        fence: vk::Fence,
        waits: usize,
        signals: usize,
    },
    QueueWaitIdle,
    AllocateCommandBuffers(u32),
    FreeCommandBuffers(usize),
    Begin(vk::CommandBufferUsageFlags),
    End,
    Reset,
    WaitFence,
    ResetFence,
    AllocateDescriptorSet,
    FreeDescriptorSet,
    /// A pool call started while another was still inside the driver
    ConcurrentPoolAccess,
    WriteDescriptor {
        binding: u32,
        kind: vk::DescriptorType,
        offset: u64,
        range: u64,
    },
    WriteImageDescriptor(u32),
    WriteMemory {
        offset: u64,
        len: usize,
    },
    CopyBuffer(u64),
    CopyBufferToImage(vk::Extent2D),
    Transition(LayoutTransition),
    BeginRendering(vk::Extent2D),
    EndRendering,
    SetViewport(vk::Extent2D),
    BindPipeline(vk::PipelineBindPoint),
    BindDescriptorSet(Vec<u32>),
    BindGeometry,
    DrawIndexed(u32),
    BindVertexBuffer(vk::Buffer),
    Draw(u32),
    Dispatch(u32, u32, u32),
    Create(&'static str),
    Destroy(&'static str),
}

/// Semaphores one `queue_submit` waited on and signaled
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitSync {
    pub waits: Vec<(vk::Semaphore, vk::PipelineStageFlags)>,
    pub signals: Vec<vk::Semaphore>,
}

pub struct FakeDriver {
    calls: Mutex<Vec<Call>>,
    submits: Mutex<Vec<SubmitSync>>,
    topologies: Mutex<Vec<vk::PrimitiveTopology>>,
    next_handle: AtomicU64,
    failures: Mutex<HashMap<&'static str, vk::Result>>,
    memory: Mutex<HashMap<u64, Vec<u8>>>,
    buffer_memory: Mutex<HashMap<u64, u64>>,
    pool_busy: AtomicBool,
    pub limits: DeviceLimits,
}

impl FakeDriver {
    pub fn new() -> Arc<Self> {
        Self::with_limits(DeviceLimits {
            graphics_queue_family: 0,
            min_uniform_buffer_offset_alignment: 256,
            sample_counts: vk::SampleCountFlags::TYPE_1
                | vk::SampleCountFlags::TYPE_2
                | vk::SampleCountFlags::TYPE_4,
        })
    }

    pub fn with_limits(limits: DeviceLimits) -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            submits: Mutex::new(Vec::new()),
            topologies: Mutex::new(Vec::new()),
            next_handle: AtomicU64::new(1),
            failures: Mutex::new(HashMap::new()),
            memory: Mutex::new(HashMap::new()),
            buffer_memory: Mutex::new(HashMap::new()),
            pool_busy: AtomicBool::new(false),
            limits,
        })
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn count(&self, predicate: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().iter().filter(|call| predicate(call)).count()
    }

    pub fn clear(&self) {
        self.calls.lock().clear();
        self.submits.lock().clear();
    }

    /// Semaphore wiring of every submit since the last `clear`
    pub fn submits(&self) -> Vec<SubmitSync> {
        self.submits.lock().clone()
    }

    /// Primitive topology of every graphics pipeline created so far
    pub fn topologies(&self) -> Vec<vk::PrimitiveTopology> {
        self.topologies.lock().clone()
    }

    /// Make the next call to `operation` (the driver method name) fail with `result`
    pub fn fail_next(&self, operation: &'static str, result: vk::Result) {
        self.failures.lock().insert(operation, result);
    }

    /// Contents of the host memory bound to `buffer`
    pub fn memory_of(&self, buffer: vk::Buffer) -> Vec<u8> {
        let memory = self.buffer_memory.lock().get(&buffer.as_raw()).copied();
        memory
            .and_then(|memory| self.memory.lock().get(&memory).cloned())
            .unwrap_or_default()
    }

    /// Objects created minus objects destroyed
    pub fn live_objects(&self) -> isize {
        let calls = self.calls.lock();
        let created = calls.iter().filter(|c| matches!(c, Call::Create(_))).count();
        let destroyed = calls.iter().filter(|c| matches!(c, Call::Destroy(_))).count();
        created as isize - destroyed as isize
    }

    fn record(&self, call: Call) {
        self.calls.lock().push(call);
    }

    fn check(&self, operation: &'static str) -> VkResult<()> {
        match self.failures.lock().remove(operation) {
            Some(result) => Err(result),
            None => Ok(()),
        }
    }

    /// Flags pool calls that overlap in time, which real pools do not allow
    fn enter_pool(&self) {
        if self.pool_busy.swap(true, Ordering::AcqRel) {
            self.record(Call::ConcurrentPoolAccess);
        }
        std::thread::yield_now();
        self.pool_busy.store(false, Ordering::Release);
    }

    fn handle<H: Handle>(&self) -> H {
        H::from_raw(self.next_handle.fetch_add(1, Ordering::Relaxed))
    }

    fn create<H: Handle>(&self, operation: &'static str, kind: &'static str) -> VkResult<H> {
        self.check(operation)?;
        self.record(Call::Create(kind));
        Ok(self.handle())
    }
}

impl VulkanDriver for FakeDriver {
    fn limits(&self) -> DeviceLimits {
        self.limits
    }

    fn get_queue(&self, _family: u32, _index: u32) -> vk::Queue {
        self.handle()
    }

    fn device_wait_idle(&self) -> VkResult<()> {
        self.check("device_wait_idle")?;
        self.record(Call::DeviceWaitIdle);
        Ok(())
    }

    fn queue_submit(&self, _queue: vk::Queue, submission: &Submission<'_>, fence: vk::Fence) -> VkResult<()> {
        self.check("queue_submit")?;
        self.record(Call::Submit {
            command_buffers: submission.command_buffers.to_vec(),
            fence,
            waits: submission.wait.len(),
            signals: submission.signal.len(),
        });
        self.submits.lock().push(SubmitSync {
            waits: submission.wait.to_vec(),
            signals: submission.signal.to_vec(),
        });
        Ok(())
    }

    fn queue_wait_idle(&self, _queue: vk::Queue) -> VkResult<()> {
        self.check("queue_wait_idle")?;
        self.record(Call::QueueWaitIdle);
        Ok(())
    }

    fn create_command_pool(&self, _family: u32) -> VkResult<vk::CommandPool> {
        self.create("create_command_pool", "command_pool")
    }

    fn destroy_command_pool(&self, _pool: vk::CommandPool) {
        self.record(Call::Destroy("command_pool"));
    }

    fn allocate_command_buffers(&self, _pool: vk::CommandPool, count: u32) -> VkResult<Vec<vk::CommandBuffer>> {
        self.check("allocate_command_buffers")?;
        self.record(Call::AllocateCommandBuffers(count));
        Ok((0..count).map(|_| self.handle()).collect())
    }

    fn free_command_buffers(&self, _pool: vk::CommandPool, buffers: &[vk::CommandBuffer]) {
        self.record(Call::FreeCommandBuffers(buffers.len()));
    }

    fn begin_command_buffer(&self, _buffer: vk::CommandBuffer, usage: vk::CommandBufferUsageFlags) -> VkResult<()> {
        self.check("begin_command_buffer")?;
        self.record(Call::Begin(usage));
        Ok(())
    }

    fn end_command_buffer(&self, _buffer: vk::CommandBuffer) -> VkResult<()> {
        self.check("end_command_buffer")?;
        self.record(Call::End);
        Ok(())
    }

    fn reset_command_buffer(&self, _buffer: vk::CommandBuffer) -> VkResult<()> {
        self.check("reset_command_buffer")?;
        self.record(Call::Reset);
        Ok(())
    }

    fn create_fence(&self, _signaled: bool) -> VkResult<vk::Fence> {
        self.create("create_fence", "fence")
    }

    fn wait_for_fence(&self, _fence: vk::Fence) -> VkResult<()> {
        self.check("wait_for_fence")?;
        self.record(Call::WaitFence);
        Ok(())
    }

    fn reset_fence(&self, _fence: vk::Fence) -> VkResult<()> {
        self.check("reset_fence")?;
        self.record(Call::ResetFence);
        Ok(())
    }

    fn destroy_fence(&self, _fence: vk::Fence) {
        self.record(Call::Destroy("fence"));
    }

    fn create_semaphore(&self) -> VkResult<vk::Semaphore> {
        self.create("create_semaphore", "semaphore")
    }

    fn destroy_semaphore(&self, _semaphore: vk::Semaphore) {
        self.record(Call::Destroy("semaphore"));
    }

    fn create_descriptor_set_layout(&self, _bindings: &[vk::DescriptorSetLayoutBinding]) -> VkResult<vk::DescriptorSetLayout> {
        self.create("create_descriptor_set_layout", "descriptor_set_layout")
    }

    fn destroy_descriptor_set_layout(&self, _layout: vk::DescriptorSetLayout) {
        self.record(Call::Destroy("descriptor_set_layout"));
    }

    fn create_descriptor_pool(&self, _max_sets: u32, _sizes: &[vk::DescriptorPoolSize]) -> VkResult<vk::DescriptorPool> {
        self.create("create_descriptor_pool", "descriptor_pool")
    }

    fn destroy_descriptor_pool(&self, _pool: vk::DescriptorPool) {
        self.record(Call::Destroy("descriptor_pool"));
    }

    fn allocate_descriptor_set(&self, _pool: vk::DescriptorPool, _layout: vk::DescriptorSetLayout) -> VkResult<vk::DescriptorSet> {
        self.check("allocate_descriptor_set")?;
        self.enter_pool();
        self.record(Call::AllocateDescriptorSet);
        Ok(self.handle())
    }

    fn free_descriptor_set(&self, _pool: vk::DescriptorPool, _set: vk::DescriptorSet) -> VkResult<()> {
        self.enter_pool();
        self.record(Call::FreeDescriptorSet);
        Ok(())
    }

    fn write_buffer_descriptor(
        &self,
        _set: vk::DescriptorSet,
        binding: u32,
        kind: vk::DescriptorType,
        _buffer: vk::Buffer,
        offset: vk::DeviceSize,
        range: vk::DeviceSize,
    ) {
        self.record(Call::WriteDescriptor {
            binding,
            kind,
            offset,
            range,
        });
    }

    fn write_image_descriptor(&self, _set: vk::DescriptorSet, binding: u32, _view: vk::ImageView, _sampler: vk::Sampler) {
        self.record(Call::WriteImageDescriptor(binding));
    }

    fn create_shader_module(&self, _code: &[u32]) -> VkResult<vk::ShaderModule> {
        self.create("create_shader_module", "shader_module")
    }

    fn destroy_shader_module(&self, _module: vk::ShaderModule) {
        self.record(Call::Destroy("shader_module"));
    }

    fn create_pipeline_layout(&self, _set_layouts: &[vk::DescriptorSetLayout]) -> VkResult<vk::PipelineLayout> {
        self.create("create_pipeline_layout", "pipeline_layout")
    }

    fn destroy_pipeline_layout(&self, _layout: vk::PipelineLayout) {
        self.record(Call::Destroy("pipeline_layout"));
    }

    fn create_graphics_pipeline(&self, desc: &GraphicsPipelineDesc<'_>) -> VkResult<vk::Pipeline> {
        let pipeline = self.create("create_graphics_pipeline", "pipeline")?;
        self.topologies.lock().push(desc.topology);
        Ok(pipeline)
    }

    fn create_compute_pipeline(&self, _shader: vk::ShaderModule, _layout: vk::PipelineLayout) -> VkResult<vk::Pipeline> {
        self.create("create_compute_pipeline", "pipeline")
    }

    fn destroy_pipeline(&self, _pipeline: vk::Pipeline) {
        self.record(Call::Destroy("pipeline"));
    }

    fn create_buffer(
        &self,
        size: vk::DeviceSize,
        _usage: vk::BufferUsageFlags,
        _properties: vk::MemoryPropertyFlags,
    ) -> VkResult<BufferAllocation> {
        let buffer: vk::Buffer = self.create("create_buffer", "buffer")?;
        let memory: vk::DeviceMemory = self.handle();
        self.memory.lock().insert(memory.as_raw(), vec![0; size as usize]);
        self.buffer_memory.lock().insert(buffer.as_raw(), memory.as_raw());
        Ok(BufferAllocation {
            buffer,
            memory,
            size,
        })
    }

    fn write_memory(&self, memory: vk::DeviceMemory, offset: vk::DeviceSize, bytes: &[u8]) -> VkResult<()> {
        self.check("write_memory")?;
        self.record(Call::WriteMemory {
            offset,
            len: bytes.len(),
        });
        let mut all = self.memory.lock();
        let target = all
            .get_mut(&memory.as_raw())
            .ok_or(vk::Result::ERROR_MEMORY_MAP_FAILED)?;
        let start = offset as usize;
        let end = start + bytes.len();
        if end > target.len() {
            return Err(vk::Result::ERROR_MEMORY_MAP_FAILED);
        }
        target[start..end].copy_from_slice(bytes);
        Ok(())
    }

    fn destroy_buffer(&self, allocation: BufferAllocation) {
        self.memory.lock().remove(&allocation.memory.as_raw());
        self.record(Call::Destroy("buffer"));
    }

    fn create_image(&self, extent: vk::Extent2D, format: vk::Format, _usage: vk::ImageUsageFlags) -> VkResult<ImageAllocation> {
        let image: vk::Image = self.create("create_image", "image")?;
        Ok(ImageAllocation {
            image,
            memory: self.handle(),
            view: self.handle(),
            extent,
            format,
        })
    }

    fn destroy_image(&self, _allocation: ImageAllocation) {
        self.record(Call::Destroy("image"));
    }

    fn create_sampler(&self) -> VkResult<vk::Sampler> {
        self.create("create_sampler", "sampler")
    }

    fn destroy_sampler(&self, _sampler: vk::Sampler) {
        self.record(Call::Destroy("sampler"));
    }

    fn cmd_copy_buffer(&self, _cmd: vk::CommandBuffer, _src: vk::Buffer, _dst: vk::Buffer, size: vk::DeviceSize) {
        self.record(Call::CopyBuffer(size));
    }

    fn cmd_copy_buffer_to_image(&self, _cmd: vk::CommandBuffer, _src: vk::Buffer, _image: vk::Image, extent: vk::Extent2D) {
        self.record(Call::CopyBufferToImage(extent));
    }

    fn cmd_transition_image(&self, _cmd: vk::CommandBuffer, _image: vk::Image, transition: LayoutTransition) {
        self.record(Call::Transition(transition));
    }

    fn cmd_begin_rendering(&self, _cmd: vk::CommandBuffer, _view: vk::ImageView, extent: vk::Extent2D, _clear: [f32; 4]) {
        self.record(Call::BeginRendering(extent));
    }

    fn cmd_end_rendering(&self, _cmd: vk::CommandBuffer) {
        self.record(Call::EndRendering);
    }

    fn cmd_set_viewport(&self, _cmd: vk::CommandBuffer, extent: vk::Extent2D) {
        self.record(Call::SetViewport(extent));
    }

    fn cmd_bind_pipeline(&self, _cmd: vk::CommandBuffer, bind_point: vk::PipelineBindPoint, _pipeline: vk::Pipeline) {
        self.record(Call::BindPipeline(bind_point));
    }

    fn cmd_bind_descriptor_set(
        &self,
        _cmd: vk::CommandBuffer,
        _bind_point: vk::PipelineBindPoint,
        _layout: vk::PipelineLayout,
        _set: vk::DescriptorSet,
        dynamic_offsets: &[u32],
    ) {
        self.record(Call::BindDescriptorSet(dynamic_offsets.to_vec()));
    }

    fn cmd_bind_geometry(&self, _cmd: vk::CommandBuffer, _vertices: vk::Buffer, _indices: vk::Buffer) {
        self.record(Call::BindGeometry);
    }

    fn cmd_draw_indexed(&self, _cmd: vk::CommandBuffer, index_count: u32) {
        self.record(Call::DrawIndexed(index_count));
    }

    fn cmd_bind_vertex_buffer(&self, _cmd: vk::CommandBuffer, buffer: vk::Buffer) {
        self.record(Call::BindVertexBuffer(buffer));
    }

    fn cmd_draw(&self, _cmd: vk::CommandBuffer, vertex_count: u32) {
        self.record(Call::Draw(vertex_count));
    }

    fn cmd_dispatch(&self, _cmd: vk::CommandBuffer, x: u32, y: u32, z: u32) {
        self.record(Call::Dispatch(x, y, z));
    }
}

/// Shared script and log for the fake presentation chain
#[derive(Default)]
pub struct ChainLog {
    /// Results handed out by `acquire_next_image` before falling back to round robin
    pub scripted: VecDeque<Acquired>,
    pub presented: Vec<u32>,
    pub recreated: u32,
    next_index: u32,
}

pub type ChainScript = Arc<Mutex<ChainLog>>;

pub struct FakeChain {
    log: ChainScript,
    extent: vk::Extent2D,
    images: Vec<(vk::Image, vk::ImageView)>,
}

impl PresentChain for FakeChain {
    fn format(&self) -> vk::Format {
        vk::Format::B8G8R8A8_SRGB
    }

    fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    fn image_count(&self) -> u32 {
        self.images.len() as u32
    }

    fn image(&self, index: u32) -> vk::Image {
        self.images[index as usize].0
    }

    fn image_view(&self, index: u32) -> vk::ImageView {
        self.images[index as usize].1
    }

    fn acquire_next_image(&mut self, _semaphore: vk::Semaphore) -> VkResult<Acquired> {
        let mut log = self.log.lock();
        if let Some(scripted) = log.scripted.pop_front() {
            return Ok(scripted);
        }
        let index = log.next_index;
        log.next_index = (index + 1) % self.images.len() as u32;
        Ok(Acquired::Image {
            index,
            suboptimal: false,
        })
    }

    fn present(&mut self, _queue: vk::Queue, index: u32, _wait: vk::Semaphore) -> VkResult<PresentOutcome> {
        self.log.lock().presented.push(index);
        Ok(PresentOutcome::Presented)
    }

    fn recreate(&mut self, extent: vk::Extent2D) -> VkResult<()> {
        self.extent = extent;
        self.log.lock().recreated += 1;
        Ok(())
    }
}

pub struct FakeSurface {
    pub log: ChainScript,
    pub image_count: u32,
}

impl VulkanSurface for FakeSurface {
    fn format(&self) -> vk::Format {
        vk::Format::B8G8R8A8_SRGB
    }

    fn create_chain(&self, extent: vk::Extent2D) -> VkResult<Box<dyn PresentChain>> {
        let images = (0..self.image_count)
            .map(|i| {
                let base = 10_000 + u64::from(i) * 2;
                (vk::Image::from_raw(base), vk::ImageView::from_raw(base + 1))
            })
            .collect();
        Ok(Box::new(FakeChain {
            log: self.log.clone(),
            extent,
            images,
        }))
    }
}

/// A complete Vulkan backend over the fakes
pub fn backend() -> (Arc<FakeDriver>, Arc<VulkanBackend>, ChainScript) {
    let fake = FakeDriver::new();
    let log = ChainScript::default();
    let surface = FakeSurface {
        log: log.clone(),
        image_count: 3,
    };
    let backend = VulkanBackend::new(fake.clone(), Box::new(surface))
        .map(Arc::new)
        .unwrap_or_else(|err| panic!("fake backend: {err}"));
    fake.clear();
    (fake, backend, log)
}
