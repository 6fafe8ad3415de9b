// KHR surface and swapchain - Window presentation
//
// `KhrSurface` is the `VulkanSurface` a real window hands the context, and
// `KhrSwapchain` is the `PresentChain` it builds. Frames in flight live in the
// core swapchain; this only owns the presentable images.

use super::device::VulkanDevice;
use super::present::{Acquired, PresentChain, PresentOutcome, VulkanSurface};
use ash::extensions::khr;
use ash::prelude::VkResult;
use ash::vk;
use std::sync::Arc;

pub struct KhrSurface {
    device: Arc<VulkanDevice>,
    surface: vk::SurfaceKHR,
    format: vk::SurfaceFormatKHR,
    present_mode: vk::PresentModeKHR,
}

impl KhrSurface {
    /// Take ownership of `surface`, falling back to FIFO when `preferred` is unavailable
    pub fn new(
        device: Arc<VulkanDevice>,
        surface: vk::SurfaceKHR,
        preferred: vk::PresentModeKHR,
    ) -> VkResult<Self> {
        let loader = device.surface_loader();
        let physical = device.physical_device();

        // Query supported formats
        let formats = unsafe { loader.get_physical_device_surface_formats(physical, surface) }?;
        // Query supported present modes
        let present_modes = unsafe { loader.get_physical_device_surface_present_modes(physical, surface) }?;

        // Choose surface format (prefer SRGB)
        let format = formats
            .iter()
            .find(|f| {
                f.format == vk::Format::B8G8R8A8_SRGB && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
            })
            .or_else(|| formats.first())
            .copied()
            .ok_or(vk::Result::ERROR_FORMAT_NOT_SUPPORTED)?;

        // FIFO is always supported
        let present_mode = if present_modes.contains(&preferred) {
            preferred
        } else {
            log::warn!("Present mode {:?} not supported, using FIFO", preferred);
            vk::PresentModeKHR::FIFO
        };

        log::info!("Surface format {:?}, present mode {:?}", format.format, present_mode);

        Ok(Self {
            device,
            surface,
            format,
            present_mode,
        })
    }
}

impl VulkanSurface for KhrSurface {
    fn format(&self) -> vk::Format {
        self.format.format
    }

    fn create_chain(&self, extent: vk::Extent2D) -> VkResult<Box<dyn PresentChain>> {
        let chain = KhrSwapchain::new(
            self.device.clone(),
            self.surface,
            self.format,
            self.present_mode,
            extent,
        )?;
        Ok(Box::new(chain))
    }
}

impl Drop for KhrSurface {
    fn drop(&mut self) {
        unsafe { self.device.surface_loader().destroy_surface(self.surface, None) }
    }
}

pub struct KhrSwapchain {
    device: Arc<VulkanDevice>,
    loader: khr::Swapchain,
    surface: vk::SurfaceKHR,
    format: vk::SurfaceFormatKHR,
    present_mode: vk::PresentModeKHR,
    handle: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    views: Vec<vk::ImageView>,
    extent: vk::Extent2D,
}

impl KhrSwapchain {
    fn new(
        device: Arc<VulkanDevice>,
        surface: vk::SurfaceKHR,
        format: vk::SurfaceFormatKHR,
        present_mode: vk::PresentModeKHR,
        extent: vk::Extent2D,
    ) -> VkResult<Self> {
        let loader = khr::Swapchain::new(device.instance(), device.handle());
        let mut chain = Self {
            device,
            loader,
            surface,
            format,
            present_mode,
            handle: vk::SwapchainKHR::null(),
            images: Vec::new(),
            views: Vec::new(),
            extent,
        };
        chain.build(extent)?;
        Ok(chain)
    }

    /// (Re)create the KHR swapchain, retiring the current one if there is one
    fn build(&mut self, requested: vk::Extent2D) -> VkResult<()> {
        let loader = self.device.surface_loader();
        let caps = unsafe {
            loader.get_physical_device_surface_capabilities(self.device.physical_device(), self.surface)
        }?;

        // Choose extent
        let extent = if caps.current_extent.width != u32::MAX {
            caps.current_extent
        } else {
            vk::Extent2D {
                width: requested
                    .width
                    .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
                height: requested
                    .height
                    .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
            }
        };

        // One more than the minimum so acquire rarely blocks
        let mut image_count = caps.min_image_count + 1;
        if caps.max_image_count > 0 && image_count > caps.max_image_count {
            image_count = caps.max_image_count;
        }

        let old = self.handle;
        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(self.surface)
            .min_image_count(image_count)
            .image_format(self.format.format)
            .image_color_space(self.format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(self.present_mode)
            .clipped(true)
            .old_swapchain(old);

        let handle = unsafe { self.loader.create_swapchain(&create_info, None) }?;

        self.destroy_views();
        if old != vk::SwapchainKHR::null() {
            unsafe { self.loader.destroy_swapchain(old, None) };
        }
        self.handle = handle;
        self.extent = extent;

        self.images = unsafe { self.loader.get_swapchain_images(handle) }?;
        for &image in &self.images {
            let create_info = vk::ImageViewCreateInfo::builder()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(self.format.format)
                .components(vk::ComponentMapping {
                    r: vk::ComponentSwizzle::IDENTITY,
                    g: vk::ComponentSwizzle::IDENTITY,
                    b: vk::ComponentSwizzle::IDENTITY,
                    a: vk::ComponentSwizzle::IDENTITY,
                })
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                });
            let view = unsafe { self.device.handle().create_image_view(&create_info, None) }?;
            self.views.push(view);
        }

        log::info!(
            "Created swapchain {}x{} with {} images",
            extent.width,
            extent.height,
            self.images.len()
        );
        Ok(())
    }

    fn destroy_views(&mut self) {
        for view in self.views.drain(..) {
            unsafe { self.device.handle().destroy_image_view(view, None) };
        }
    }
}

impl PresentChain for KhrSwapchain {
    fn format(&self) -> vk::Format {
        self.format.format
    }

    fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    fn image_count(&self) -> u32 {
        self.images.len() as u32
    }

    fn image(&self, index: u32) -> vk::Image {
        self.images
            .get(index as usize)
            .copied()
            .unwrap_or_else(vk::Image::null)
    }

    fn image_view(&self, index: u32) -> vk::ImageView {
        self.views
            .get(index as usize)
            .copied()
            .unwrap_or_else(vk::ImageView::null)
    }

    fn acquire_next_image(&mut self, semaphore: vk::Semaphore) -> VkResult<Acquired> {
        let result = unsafe {
            self.loader
                .acquire_next_image(self.handle, u64::MAX, semaphore, vk::Fence::null())
        };

        match result {
            Ok((index, suboptimal)) => Ok(Acquired::Image { index, suboptimal }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(Acquired::OutOfDate),
            Err(e) => Err(e),
        }
    }

    fn present(&mut self, queue: vk::Queue, index: u32, wait: vk::Semaphore) -> VkResult<PresentOutcome> {
        let wait_semaphores = [wait];
        let swapchains = [self.handle];
        let image_indices = [index];

        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        match unsafe { self.loader.queue_present(queue, &present_info) } {
            Ok(false) => Ok(PresentOutcome::Presented),
            Ok(true) => Ok(PresentOutcome::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::OutOfDate),
            Err(e) => Err(e),
        }
    }

    fn recreate(&mut self, extent: vk::Extent2D) -> VkResult<()> {
        self.build(extent)
    }
}

impl Drop for KhrSwapchain {
    fn drop(&mut self) {
        self.destroy_views();
        unsafe { self.loader.destroy_swapchain(self.handle, None) };
    }
}
