// Vulkan driver seam
//
// Every raw Vulkan call the core makes goes through `VulkanDriver`. The crate's
// real implementation is `VulkanDevice` (ash); tests plug in a recording fake.
// Handles are plain `ash::vk` handles so both sides speak the same types.

use ash::prelude::VkResult;
use ash::vk;

/// Device capabilities the core reads once at context creation
#[derive(Debug, Clone, Copy)]
pub struct DeviceLimits {
    pub graphics_queue_family: u32,
    pub min_uniform_buffer_offset_alignment: u64,
    /// Sample counts usable for both color and depth attachments
    pub sample_counts: vk::SampleCountFlags,
}

/// One batch handed to `vkQueueSubmit`
#[derive(Debug, Clone, Copy, Default)]
pub struct Submission<'a> {
    pub command_buffers: &'a [vk::CommandBuffer],
    pub wait: &'a [(vk::Semaphore, vk::PipelineStageFlags)],
    pub signal: &'a [vk::Semaphore],
}

impl<'a> Submission<'a> {
    /// Command buffers only, no semaphores
    pub fn commands(command_buffers: &'a [vk::CommandBuffer]) -> Self {
        Self {
            command_buffers,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferAllocation {
    pub buffer: vk::Buffer,
    pub memory: vk::DeviceMemory,
    pub size: vk::DeviceSize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageAllocation {
    pub image: vk::Image,
    pub memory: vk::DeviceMemory,
    pub view: vk::ImageView,
    pub extent: vk::Extent2D,
    pub format: vk::Format,
}

/// The image layout changes the core records
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutTransition {
    UndefinedToTransferDst,
    TransferDstToShaderRead,
    UndefinedToColorAttachment,
    ColorAttachmentToPresent,
}

/// Everything `vkCmdPipelineBarrier` needs for one transition
pub struct BarrierInfo {
    pub old_layout: vk::ImageLayout,
    pub new_layout: vk::ImageLayout,
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
}

impl LayoutTransition {
    pub fn barrier(self) -> BarrierInfo {
        match self {
            LayoutTransition::UndefinedToTransferDst => BarrierInfo {
                old_layout: vk::ImageLayout::UNDEFINED,
                new_layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                src_access: vk::AccessFlags::empty(),
                dst_access: vk::AccessFlags::TRANSFER_WRITE,
                src_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
                dst_stage: vk::PipelineStageFlags::TRANSFER,
            },
            LayoutTransition::TransferDstToShaderRead => BarrierInfo {
                old_layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                new_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                src_access: vk::AccessFlags::TRANSFER_WRITE,
                dst_access: vk::AccessFlags::SHADER_READ,
                src_stage: vk::PipelineStageFlags::TRANSFER,
                dst_stage: vk::PipelineStageFlags::FRAGMENT_SHADER,
            },
            LayoutTransition::UndefinedToColorAttachment => BarrierInfo {
                old_layout: vk::ImageLayout::UNDEFINED,
                new_layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                src_access: vk::AccessFlags::empty(),
                dst_access: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
                src_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
                dst_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            },
            LayoutTransition::ColorAttachmentToPresent => BarrierInfo {
                old_layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                new_layout: vk::ImageLayout::PRESENT_SRC_KHR,
                src_access: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
                dst_access: vk::AccessFlags::empty(),
                src_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                dst_stage: vk::PipelineStageFlags::BOTTOM_OF_PIPE,
            },
        }
    }
}

/// Fixed-function state for a dynamic-rendering graphics pipeline
pub struct GraphicsPipelineDesc<'a> {
    pub vertex_shader: vk::ShaderModule,
    pub fragment_shader: vk::ShaderModule,
    pub layout: vk::PipelineLayout,
    pub color_format: vk::Format,
    pub cull_mode: vk::CullModeFlags,
    pub topology: vk::PrimitiveTopology,
    pub vertex_stride: u32,
    pub vertex_attributes: &'a [vk::VertexInputAttributeDescription],
}

pub trait VulkanDriver: Send + Sync {
    fn limits(&self) -> DeviceLimits;
    fn get_queue(&self, family: u32, index: u32) -> vk::Queue;
    fn device_wait_idle(&self) -> VkResult<()>;

    // Queues
    fn queue_submit(&self, queue: vk::Queue, submission: &Submission<'_>, fence: vk::Fence) -> VkResult<()>;
    fn queue_wait_idle(&self, queue: vk::Queue) -> VkResult<()>;

    // Command pools and buffers
    fn create_command_pool(&self, family: u32) -> VkResult<vk::CommandPool>;
    fn destroy_command_pool(&self, pool: vk::CommandPool);
    fn allocate_command_buffers(&self, pool: vk::CommandPool, count: u32) -> VkResult<Vec<vk::CommandBuffer>>;
    fn free_command_buffers(&self, pool: vk::CommandPool, buffers: &[vk::CommandBuffer]);
    fn begin_command_buffer(&self, buffer: vk::CommandBuffer, usage: vk::CommandBufferUsageFlags) -> VkResult<()>;
    fn end_command_buffer(&self, buffer: vk::CommandBuffer) -> VkResult<()>;
    fn reset_command_buffer(&self, buffer: vk::CommandBuffer) -> VkResult<()>;

    // Synchronization
    fn create_fence(&self, signaled: bool) -> VkResult<vk::Fence>;
    fn wait_for_fence(&self, fence: vk::Fence) -> VkResult<()>;
    fn reset_fence(&self, fence: vk::Fence) -> VkResult<()>;
    fn destroy_fence(&self, fence: vk::Fence);
    fn create_semaphore(&self) -> VkResult<vk::Semaphore>;
    fn destroy_semaphore(&self, semaphore: vk::Semaphore);

    // Descriptors
    fn create_descriptor_set_layout(&self, bindings: &[vk::DescriptorSetLayoutBinding]) -> VkResult<vk::DescriptorSetLayout>;
    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout);
    fn create_descriptor_pool(&self, max_sets: u32, sizes: &[vk::DescriptorPoolSize]) -> VkResult<vk::DescriptorPool>;
    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool);
    fn allocate_descriptor_set(&self, pool: vk::DescriptorPool, layout: vk::DescriptorSetLayout) -> VkResult<vk::DescriptorSet>;
    fn free_descriptor_set(&self, pool: vk::DescriptorPool, set: vk::DescriptorSet) -> VkResult<()>;
    fn write_buffer_descriptor(
        &self,
        set: vk::DescriptorSet,
        binding: u32,
        kind: vk::DescriptorType,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        range: vk::DeviceSize,
    );
    fn write_image_descriptor(&self, set: vk::DescriptorSet, binding: u32, view: vk::ImageView, sampler: vk::Sampler);

    // Pipelines
    fn create_shader_module(&self, code: &[u32]) -> VkResult<vk::ShaderModule>;
    fn destroy_shader_module(&self, module: vk::ShaderModule);
    fn create_pipeline_layout(&self, set_layouts: &[vk::DescriptorSetLayout]) -> VkResult<vk::PipelineLayout>;
    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout);
    fn create_graphics_pipeline(&self, desc: &GraphicsPipelineDesc<'_>) -> VkResult<vk::Pipeline>;
    fn create_compute_pipeline(&self, shader: vk::ShaderModule, layout: vk::PipelineLayout) -> VkResult<vk::Pipeline>;
    fn destroy_pipeline(&self, pipeline: vk::Pipeline);

    // Memory
    fn create_buffer(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> VkResult<BufferAllocation>;
    /// Copy bytes into host-visible memory
    fn write_memory(&self, memory: vk::DeviceMemory, offset: vk::DeviceSize, bytes: &[u8]) -> VkResult<()>;
    fn destroy_buffer(&self, allocation: BufferAllocation);
    fn create_image(&self, extent: vk::Extent2D, format: vk::Format, usage: vk::ImageUsageFlags) -> VkResult<ImageAllocation>;
    fn destroy_image(&self, allocation: ImageAllocation);
    fn create_sampler(&self) -> VkResult<vk::Sampler>;
    fn destroy_sampler(&self, sampler: vk::Sampler);

    // Recording
    fn cmd_copy_buffer(&self, cmd: vk::CommandBuffer, src: vk::Buffer, dst: vk::Buffer, size: vk::DeviceSize);
    fn cmd_copy_buffer_to_image(&self, cmd: vk::CommandBuffer, src: vk::Buffer, image: vk::Image, extent: vk::Extent2D);
    fn cmd_transition_image(&self, cmd: vk::CommandBuffer, image: vk::Image, transition: LayoutTransition);
    fn cmd_begin_rendering(&self, cmd: vk::CommandBuffer, view: vk::ImageView, extent: vk::Extent2D, clear: [f32; 4]);
    fn cmd_end_rendering(&self, cmd: vk::CommandBuffer);
    fn cmd_set_viewport(&self, cmd: vk::CommandBuffer, extent: vk::Extent2D);
    fn cmd_bind_pipeline(&self, cmd: vk::CommandBuffer, bind_point: vk::PipelineBindPoint, pipeline: vk::Pipeline);
    fn cmd_bind_descriptor_set(
        &self,
        cmd: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        set: vk::DescriptorSet,
        dynamic_offsets: &[u32],
    );
    fn cmd_bind_geometry(&self, cmd: vk::CommandBuffer, vertices: vk::Buffer, indices: vk::Buffer);
    fn cmd_draw_indexed(&self, cmd: vk::CommandBuffer, index_count: u32);
    /// Bind `buffer` as the only vertex buffer, no index buffer
    fn cmd_bind_vertex_buffer(&self, cmd: vk::CommandBuffer, buffer: vk::Buffer);
    fn cmd_draw(&self, cmd: vk::CommandBuffer, vertex_count: u32);
    fn cmd_dispatch(&self, cmd: vk::CommandBuffer, x: u32, y: u32, z: u32);
}
