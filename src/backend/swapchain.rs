// Swapchain - Window presentation
//
// Fixed policy: B8G8R8A8_UNORM / SRGB_NONLINEAR when available, FIFO present
// mode, double buffering. Recreated wholesale on resize or out-of-date.

use ash::vk;
use std::sync::Arc;

use super::context::{DrawableSize, GraphicsContext};
use super::queue::Queue;
use super::sync::Semaphore;
use super::Device;
use crate::error::{RenderError, RenderResult, VkResultExt};

const PREFERRED_FORMAT: vk::SurfaceFormatKHR = vk::SurfaceFormatKHR {
    format: vk::Format::B8G8R8A8_UNORM,
    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
};

const MIN_IMAGE_COUNT: u32 = 2;

pub struct Swapchain {
    handle: vk::SwapchainKHR,
    loader: ash::khr::swapchain::Device,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    format: vk::Format,
    extent: vk::Extent2D,
    current_image_index: u32,
    suboptimal: bool,
    device: Arc<Device>,
}

impl Swapchain {
    /// Create a swapchain for the context's surface. `previous`, when given,
    /// is retired by the new swapchain and should be dropped afterwards.
    pub fn new(
        context: &GraphicsContext,
        device: Arc<Device>,
        window: &dyn DrawableSize,
        previous: Option<&Swapchain>,
    ) -> RenderResult<Self> {
        let surface = context.surface().ok_or(RenderError::NoSurface)?;
        let surface_loader = context.surface_loader();
        let physical_device = device.physical_device();
        let present_family = device.families().direct;

        let supported = unsafe {
            surface_loader.get_physical_device_surface_support(
                physical_device,
                present_family,
                surface,
            )
        }
        .describe("vkGetPhysicalDeviceSurfaceSupportKHR")?;
        if !supported {
            return Err(RenderError::SurfaceUnsupported {
                family: present_family,
            });
        }

        let surface_caps = unsafe {
            surface_loader.get_physical_device_surface_capabilities(physical_device, surface)
        }
        .describe("vkGetPhysicalDeviceSurfaceCapabilitiesKHR")?;
        let formats = unsafe {
            surface_loader.get_physical_device_surface_formats(physical_device, surface)
        }
        .describe("vkGetPhysicalDeviceSurfaceFormatsKHR")?;

        let surface_format = choose_format(&formats).ok_or(RenderError::Vulkan {
            operation: "vkGetPhysicalDeviceSurfaceFormatsKHR",
            result: vk::Result::ERROR_FORMAT_NOT_SUPPORTED,
        })?;
        let extent = choose_extent(&surface_caps, window.drawable_size());
        let image_count = choose_image_count(&surface_caps);

        log::info!(
            "Creating swapchain: {}x{}, {} images, {:?}",
            extent.width,
            extent.height,
            image_count,
            surface_format.format
        );

        let loader = ash::khr::swapchain::Device::new(device.instance(), device.raw());

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(vk::SurfaceTransformFlagsKHR::IDENTITY)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(vk::PresentModeKHR::FIFO)
            .clipped(true)
            .old_swapchain(previous.map_or(vk::SwapchainKHR::null(), |p| p.handle));

        let handle = unsafe { loader.create_swapchain(&create_info, None) }
            .describe("vkCreateSwapchainKHR")?;

        // Views are filled in below; Drop cleans up whatever exists so far.
        let mut swapchain = Self {
            handle,
            loader,
            images: Vec::new(),
            image_views: Vec::new(),
            format: surface_format.format,
            extent,
            current_image_index: 0,
            suboptimal: false,
            device,
        };

        swapchain.images = unsafe { swapchain.loader.get_swapchain_images(handle) }
            .describe("vkGetSwapchainImagesKHR")?;
        for &image in &swapchain.images {
            let create_info = vk::ImageViewCreateInfo::default()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(swapchain.format)
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
            let view = unsafe { swapchain.device.raw().create_image_view(&create_info, None) }
                .describe("vkCreateImageView")?;
            swapchain.image_views.push(view);
        }

        log::info!("Created swapchain with {} images", swapchain.images.len());
        Ok(swapchain)
    }

    /// Block until the next image is available and make it current.
    pub fn next_image(&mut self, acquired: &Semaphore) -> RenderResult<u32> {
        let result = unsafe {
            self.loader.acquire_next_image(
                self.handle,
                u64::MAX,
                acquired.handle(),
                vk::Fence::null(),
            )
        };

        match result {
            Ok((index, suboptimal)) => {
                self.current_image_index = index;
                self.suboptimal |= suboptimal;
                Ok(index)
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Err(RenderError::SwapchainOutOfDate),
            Err(result) => Err(RenderError::AcquireFailed(result)),
        }
    }

    /// Present the current image once every semaphore in `wait` is signaled.
    pub fn present(&mut self, queue: Queue, wait: &[vk::Semaphore]) -> RenderResult<()> {
        let swapchains = [self.handle];
        let image_indices = [self.current_image_index];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(wait)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        match unsafe { self.loader.queue_present(queue.handle, &present_info) } {
            Ok(suboptimal) => {
                self.suboptimal |= suboptimal;
                Ok(())
            }
            Err(result) => Err(RenderError::PresentFailed(result)),
        }
    }

    pub fn handle(&self) -> vk::SwapchainKHR {
        self.handle
    }

    pub fn images(&self) -> &[vk::Image] {
        &self.images
    }

    pub fn image_views(&self) -> &[vk::ImageView] {
        &self.image_views
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn current_image_index(&self) -> u32 {
        self.current_image_index
    }

    /// The surface no longer matches exactly; recreate when convenient.
    pub fn is_suboptimal(&self) -> bool {
        self.suboptimal
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        unsafe {
            for &view in &self.image_views {
                self.device.raw().destroy_image_view(view, None);
            }
            self.loader.destroy_swapchain(self.handle, None);
        }
    }
}

fn choose_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .copied()
        .find(|f| f.format == PREFERRED_FORMAT.format && f.color_space == PREFERRED_FORMAT.color_space)
        .or_else(|| formats.first().copied())
}

fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, window: vk::Extent2D) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        return caps.current_extent;
    }
    vk::Extent2D {
        width: window
            .width
            .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
        height: window
            .height
            .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
    }
}

fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let count = MIN_IMAGE_COUNT.max(caps.min_image_count);
    if caps.max_image_count > 0 {
        count.min(caps.max_image_count)
    } else {
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(current: (u32, u32), min_images: u32, max_images: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: current.0,
                height: current.1,
            },
            min_image_extent: vk::Extent2D { width: 1, height: 1 },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            min_image_count: min_images,
            max_image_count: max_images,
            ..Default::default()
        }
    }

    fn size(extent: vk::Extent2D) -> (u32, u32) {
        (extent.width, extent.height)
    }

    #[test]
    fn prefers_bgra_unorm() {
        let srgb = vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_SRGB,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        let chosen = |formats: &[vk::SurfaceFormatKHR]| choose_format(formats).map(|f| f.format);
        assert_eq!(chosen(&[srgb, PREFERRED_FORMAT]), Some(vk::Format::B8G8R8A8_UNORM));
        assert_eq!(chosen(&[srgb]), Some(vk::Format::B8G8R8A8_SRGB));
        assert_eq!(chosen(&[]), None);
    }

    #[test]
    fn extent_follows_surface_unless_undefined() {
        let window = vk::Extent2D {
            width: 9000,
            height: 600,
        };
        assert_eq!(size(choose_extent(&caps((800, 600), 2, 3), window)), (800, 600));
        assert_eq!(
            size(choose_extent(&caps((u32::MAX, u32::MAX), 2, 3), window)),
            (4096, 600)
        );
    }

    #[test]
    fn double_buffered_within_limits() {
        assert_eq!(choose_image_count(&caps((1, 1), 1, 0)), 2);
        assert_eq!(choose_image_count(&caps((1, 1), 3, 0)), 3);
        assert_eq!(choose_image_count(&caps((1, 1), 1, 1)), 1);
    }
}
