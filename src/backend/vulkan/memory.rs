// GPU memory wrappers for buffers and images
//
// Allocation itself is a driver call; these types only tie the allocation's
// lifetime to a Rust value.

use super::driver::{BufferAllocation, ImageAllocation, VulkanDriver};
use crate::error::{device_fatal, Result};
use ash::vk;
use std::sync::Arc;

/// Host-visible and coherent: what every mapped buffer in this crate uses
pub const HOST_MEMORY: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::from_raw(
    vk::MemoryPropertyFlags::HOST_VISIBLE.as_raw() | vk::MemoryPropertyFlags::HOST_COHERENT.as_raw(),
);

pub struct Buffer {
    driver: Arc<dyn VulkanDriver>,
    allocation: BufferAllocation,
}

impl Buffer {
    pub fn new(
        driver: Arc<dyn VulkanDriver>,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> Result<Self> {
        let allocation = driver
            .create_buffer(size, usage, properties)
            .map_err(device_fatal("create buffer"))?;
        Ok(Self { driver, allocation })
    }

    /// Create a host-visible buffer and fill it with `bytes`
    pub fn with_data(
        driver: Arc<dyn VulkanDriver>,
        usage: vk::BufferUsageFlags,
        bytes: &[u8],
    ) -> Result<Self> {
        let buffer = Self::new(driver, bytes.len() as vk::DeviceSize, usage, HOST_MEMORY)?;
        buffer.write(0, bytes)?;
        Ok(buffer)
    }

    pub fn handle(&self) -> vk::Buffer {
        self.allocation.buffer
    }

    pub fn size(&self) -> vk::DeviceSize {
        self.allocation.size
    }

    /// Only valid for host-visible buffers
    pub fn write(&self, offset: vk::DeviceSize, bytes: &[u8]) -> Result<()> {
        self.driver
            .write_memory(self.allocation.memory, offset, bytes)
            .map_err(device_fatal("write buffer memory"))
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        self.driver.destroy_buffer(self.allocation);
    }
}

/// A 2D image with its memory and a full-color view
pub struct Image {
    driver: Arc<dyn VulkanDriver>,
    allocation: ImageAllocation,
}

impl Image {
    pub fn new(
        driver: Arc<dyn VulkanDriver>,
        extent: vk::Extent2D,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
    ) -> Result<Self> {
        let allocation = driver
            .create_image(extent, format, usage)
            .map_err(device_fatal("create image"))?;
        Ok(Self { driver, allocation })
    }

    pub fn handle(&self) -> vk::Image {
        self.allocation.image
    }

    pub fn view(&self) -> vk::ImageView {
        self.allocation.view
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.allocation.extent
    }

    pub fn format(&self) -> vk::Format {
        self.allocation.format
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        self.driver.destroy_image(self.allocation);
    }
}

/// Find a memory type index allowed by `type_filter` that has all of `properties`
pub fn find_memory_type(
    memory: &vk::PhysicalDeviceMemoryProperties,
    type_filter: u32,
    properties: vk::MemoryPropertyFlags,
) -> Option<u32> {
    (0..memory.memory_type_count).find(|&i| {
        let has_type = (type_filter & (1 << i)) != 0;
        let has_properties = memory.memory_types[i as usize]
            .property_flags
            .contains(properties);
        has_type && has_properties
    })
}

/// Round `size` up to a multiple of `alignment` (a power of two, or 0 for none)
pub fn align_up(size: u64, alignment: u64) -> u64 {
    if alignment == 0 {
        return size;
    }
    (size + alignment - 1) & !(alignment - 1)
}
