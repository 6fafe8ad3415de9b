// Descriptor pools and sets
//
// The native pool is shared (`Arc<PoolShared>`) between the pool wrapper and every
// set allocated from it, so a set can never outlive the pool it came from. The
// native pool is externally synchronized: allocation and free both take `guard`.

use super::driver::VulkanDriver;
use crate::error::{device_fatal, RendererError, Result};
use ash::vk;
use parking_lot::Mutex;
use std::cell::Cell;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

struct PoolShared {
    driver: Arc<dyn VulkanDriver>,
    handle: vk::DescriptorPool,
    capacity: u32,
    outstanding: AtomicU32,
    guard: Mutex<()>,
}

impl Drop for PoolShared {
    fn drop(&mut self) {
        self.driver.destroy_descriptor_pool(self.handle);
    }
}

/// Fixed-capacity descriptor pool. At most `capacity` sets are outstanding at once.
pub struct DescriptorPool {
    shared: Arc<PoolShared>,
    _not_sync: PhantomData<Cell<()>>,
}

impl DescriptorPool {
    pub fn new(
        driver: Arc<dyn VulkanDriver>,
        capacity: u32,
        pool_sizes: &[vk::DescriptorPoolSize],
    ) -> Result<Self> {
        if capacity == 0 {
            return Err(RendererError::invalid("descriptor pool capacity must be at least 1"));
        }

        let handle = driver
            .create_descriptor_pool(capacity, pool_sizes)
            .map_err(device_fatal("create descriptor pool"))?;

        Ok(Self {
            shared: Arc::new(PoolShared {
                driver,
                handle,
                capacity,
                outstanding: AtomicU32::new(0),
                guard: Mutex::new(()),
            }),
            _not_sync: PhantomData,
        })
    }

    /// Pool sizes for `capacity` sets shaped by `types` (one descriptor per entry)
    pub fn sizes_for(types: &[vk::DescriptorType], capacity: u32) -> Vec<vk::DescriptorPoolSize> {
        let mut sizes: Vec<vk::DescriptorPoolSize> = Vec::new();
        for &ty in types {
            match sizes.iter_mut().find(|size| size.ty == ty) {
                Some(size) => size.descriptor_count += capacity,
                None => sizes.push(vk::DescriptorPoolSize {
                    ty,
                    descriptor_count: capacity,
                }),
            }
        }
        sizes
    }

    pub fn capacity(&self) -> u32 {
        self.shared.capacity
    }

    pub fn outstanding(&self) -> u32 {
        self.shared.outstanding.load(Ordering::Acquire)
    }

    pub fn allocate_set(
        &self,
        layout: vk::DescriptorSetLayout,
        pipeline_layout: vk::PipelineLayout,
    ) -> Result<DescriptorSet> {
        let shared = &self.shared;
        let _guard = shared.guard.lock();
        if shared.outstanding.load(Ordering::Acquire) >= shared.capacity {
            return Err(RendererError::PoolExhausted {
                pool: "descriptor pool",
                capacity: shared.capacity,
            });
        }

        let handle = shared
            .driver
            .allocate_descriptor_set(shared.handle, layout)
            .map_err(|err| match err {
                vk::Result::ERROR_OUT_OF_POOL_MEMORY | vk::Result::ERROR_FRAGMENTED_POOL => {
                    RendererError::PoolExhausted {
                        pool: "descriptor pool",
                        capacity: shared.capacity,
                    }
                }
                other => device_fatal("allocate descriptor set")(other),
            })?;
        shared.outstanding.fetch_add(1, Ordering::AcqRel);

        Ok(DescriptorSet {
            pool: shared.clone(),
            handle,
            pipeline_layout,
        })
    }
}

/// A descriptor set; dropping it frees the set and returns one unit to its pool.
pub struct DescriptorSet {
    pool: Arc<PoolShared>,
    handle: vk::DescriptorSet,
    pipeline_layout: vk::PipelineLayout,
}

impl std::fmt::Debug for DescriptorSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DescriptorSet")
            .field("handle", &self.handle)
            .field("pipeline_layout", &self.pipeline_layout)
            .finish_non_exhaustive()
    }
}

impl DescriptorSet {
    pub fn handle(&self) -> vk::DescriptorSet {
        self.handle
    }

    pub fn pipeline_layout(&self) -> vk::PipelineLayout {
        self.pipeline_layout
    }

    pub fn write_buffer(
        &self,
        binding: u32,
        kind: vk::DescriptorType,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        range: vk::DeviceSize,
    ) {
        self.pool
            .driver
            .write_buffer_descriptor(self.handle, binding, kind, buffer, offset, range);
    }

    pub fn write_image(&self, binding: u32, view: vk::ImageView, sampler: vk::Sampler) {
        self.pool
            .driver
            .write_image_descriptor(self.handle, binding, view, sampler);
    }

    /// `dynamic_offsets` in binding order, one per dynamic uniform binding
    pub fn bind(&self, cmd: vk::CommandBuffer, bind_point: vk::PipelineBindPoint, dynamic_offsets: &[u32]) {
        self.pool.driver.cmd_bind_descriptor_set(
            cmd,
            bind_point,
            self.pipeline_layout,
            self.handle,
            dynamic_offsets,
        );
    }
}

impl Drop for DescriptorSet {
    fn drop(&mut self) {
        let _guard = self.pool.guard.lock();
        if let Err(err) = self.pool.driver.free_descriptor_set(self.pool.handle, self.handle) {
            log::error!("Failed to free descriptor set: {:?}", err);
        }
        self.pool.outstanding.fetch_sub(1, Ordering::AcqRel);
    }
}
