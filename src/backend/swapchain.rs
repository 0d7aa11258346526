// Swapchain - Window presentation
//
// Manages the chain of images we render to and present to the screen, plus
// one depth attachment per image. Recreation builds the new chain against the
// old handle before the old one is destroyed, so a presentable surface exists
// at every point.

use ash::vk;

use super::error::{BackendError, BackendResult, VkResultExt};
use super::gpu::Gpu;
use super::image::Image;

/// Number of frames the CPU may record ahead of the GPU.
pub const MAX_FRAMES_IN_FLIGHT: usize = 2;

/// Prefer 8-bit BGRA with the sRGB non-linear color space, else the first format.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_UNORM
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.first())
        .copied()
}

/// MAILBOX when offered (no tearing, no blocking), otherwise FIFO.
pub fn choose_present_mode(modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    modes
        .iter()
        .copied()
        .find(|&mode| mode == vk::PresentModeKHR::MAILBOX)
        .unwrap_or(vk::PresentModeKHR::FIFO) // FIFO is always supported
}

/// The surface's fixed extent when it dictates one, else the requested size,
/// clamped to the supported range.
pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, width: u32, height: u32) -> vk::Extent2D {
    let wanted = if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        vk::Extent2D { width, height }
    };
    vk::Extent2D {
        width: wanted
            .width
            .max(caps.min_image_extent.width)
            .min(caps.max_image_extent.width),
        height: wanted
            .height
            .max(caps.min_image_extent.height)
            .min(caps.max_image_extent.height),
    }
}

/// One more than the minimum, capped by the maximum (0 means unbounded).
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let mut image_count = caps.min_image_count + 1;
    if caps.max_image_count > 0 && image_count > caps.max_image_count {
        image_count = caps.max_image_count;
    }
    image_count
}

#[derive(Debug)]
pub struct Swapchain {
    pub handle: vk::SwapchainKHR,
    pub surface_format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub max_frames_in_flight: usize,
    /// Driver owned; never destroyed individually.
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub depth_attachments: Vec<Image>,
    /// Index returned by the most recent successful acquire.
    pub image_index: u32,
    requested: (u32, u32),
}

impl Swapchain {
    pub fn create<G: Gpu + ?Sized>(gpu: &G, width: u32, height: u32) -> BackendResult<Self> {
        Self::build(gpu, width, height, vk::SwapchainKHR::null())
    }

    /// The size most recently asked for, used when recreating internally.
    pub fn requested_size(&self) -> (u32, u32) {
        self.requested
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    fn build<G: Gpu + ?Sized>(
        gpu: &G,
        width: u32,
        height: u32,
        old: vk::SwapchainKHR,
    ) -> BackendResult<Self> {
        let caps = gpu
            .surface_capabilities()
            .op("vkGetPhysicalDeviceSurfaceCapabilitiesKHR")?;
        let device = gpu.graphics_device();

        let surface_format = choose_surface_format(&device.surface_formats).ok_or(
            BackendError::Vulkan {
                operation: "choose surface format",
                result: vk::Result::ERROR_FORMAT_NOT_SUPPORTED,
            },
        )?;
        let present_mode = choose_present_mode(&device.present_modes);
        let extent = choose_extent(&caps, width, height);
        let image_count = choose_image_count(&caps);

        let families = device.queue_families;
        let family_indices = [families.graphics, families.present];
        let (sharing_mode, shared_families) = if families.graphics != families.present {
            (vk::SharingMode::CONCURRENT, &family_indices[..])
        } else {
            (vk::SharingMode::EXCLUSIVE, &family_indices[..0])
        };

        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST)
            .image_sharing_mode(sharing_mode)
            .queue_family_indices(shared_families)
            .pre_transform(caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old);

        let mut chain = Self {
            handle: vk::SwapchainKHR::null(),
            surface_format,
            present_mode,
            extent,
            max_frames_in_flight: MAX_FRAMES_IN_FLIGHT,
            images: Vec::new(),
            image_views: Vec::new(),
            depth_attachments: Vec::new(),
            image_index: 0,
            requested: (width, height),
        };

        chain.handle = gpu.create_swapchain(&create_info).op("vkCreateSwapchainKHR")?;

        if let Err(e) = chain.create_attachments(gpu) {
            chain.destroy(gpu);
            return Err(e);
        }

        log::info!(
            "Created swapchain {}x{} with {} images ({:?}, {:?})",
            extent.width,
            extent.height,
            chain.images.len(),
            surface_format.format,
            present_mode
        );
        Ok(chain)
    }

    fn create_attachments<G: Gpu + ?Sized>(&mut self, gpu: &G) -> BackendResult<()> {
        self.images = gpu
            .swapchain_images(self.handle)
            .op("vkGetSwapchainImagesKHR")?;
        let depth_format = gpu.graphics_device().depth_format;

        for (i, &image) in self.images.iter().enumerate() {
            let view = gpu
                .create_image_view(
                    &format!("SwapchainImage{i}"),
                    image,
                    self.surface_format.format,
                    vk::ImageAspectFlags::COLOR,
                )
                .op("vkCreateImageView")?;
            self.image_views.push(view);

            let depth = Image::create_depth(
                gpu,
                &format!("SwapchainDepth{i}"),
                self.extent.width,
                self.extent.height,
                depth_format,
            )?;
            self.depth_attachments.push(depth);
        }
        Ok(())
    }

    /// Build a new chain for `width` x `height`, then drop the old handle.
    ///
    /// Waits for the device to go idle first. On failure the swapchain is
    /// left empty (null handle) and the next acquire retries.
    pub fn recreate<G: Gpu + ?Sized>(&mut self, gpu: &G, width: u32, height: u32) -> BackendResult<()> {
        gpu.wait_idle().op("vkDeviceWaitIdle")?;

        let old = std::mem::replace(&mut self.handle, vk::SwapchainKHR::null());
        self.destroy(gpu);
        self.requested = (width, height);

        let result = Self::build(gpu, width, height, old);
        if old != vk::SwapchainKHR::null() {
            gpu.destroy_swapchain(old);
        }

        match result {
            Ok(chain) => {
                *self = chain;
                Ok(())
            }
            Err(e) => {
                log::error!("Swapchain recreation failed: {}", e);
                Err(e)
            }
        }
    }

    /// Tear down depth attachments, views, the image list, then the handle.
    /// Null entries are skipped so a half-built chain can be destroyed.
    pub fn destroy<G: Gpu + ?Sized>(&mut self, gpu: &G) {
        for depth in &mut self.depth_attachments {
            depth.destroy(gpu);
        }
        self.depth_attachments.clear();

        for view in self.image_views.drain(..) {
            if view != vk::ImageView::null() {
                gpu.destroy_image_view(view);
            }
        }

        self.images.clear();

        if self.handle != vk::SwapchainKHR::null() {
            gpu.destroy_swapchain(self.handle);
            self.handle = vk::SwapchainKHR::null();
        }
    }

    /// Acquire the next image.
    ///
    /// An out of date surface triggers a recreate and fails this call with
    /// `SwapchainOutOfDate`; the caller should try again next frame.
    pub fn acquire_next_image<G: Gpu + ?Sized>(
        &mut self,
        gpu: &G,
        semaphore: vk::Semaphore,
        fence: vk::Fence,
    ) -> BackendResult<u32> {
        if self.handle == vk::SwapchainKHR::null() {
            let (width, height) = self.requested;
            self.recreate(gpu, width, height)?;
        }

        match gpu.acquire_next_image(self.handle, u64::MAX, semaphore, fence) {
            Ok((index, suboptimal)) => {
                if suboptimal {
                    log::debug!("Acquired image {} from a suboptimal swapchain", index);
                }
                self.image_index = index;
                Ok(index)
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                log::info!("Swapchain out of date on acquire, recreating");
                let (width, height) = self.requested;
                // Failure is already logged; the next acquire retries.
                let _ = self.recreate(gpu, width, height);
                Err(BackendError::SwapchainOutOfDate)
            }
            Err(result) => Err(BackendError::Vulkan {
                operation: "vkAcquireNextImageKHR",
                result,
            }),
        }
    }

    /// Present `image_index`. Out of date or suboptimal recreates the chain;
    /// any other failure is only logged.
    pub fn present<G: Gpu + ?Sized>(
        &mut self,
        gpu: &G,
        queue: vk::Queue,
        wait_semaphore: vk::Semaphore,
        image_index: u32,
    ) {
        if self.handle == vk::SwapchainKHR::null() {
            log::warn!("Skipping present: no swapchain");
            return;
        }

        match gpu.queue_present(queue, self.handle, image_index, wait_semaphore) {
            Ok(false) => {}
            Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                log::info!("Swapchain out of date or suboptimal on present, recreating");
                let (width, height) = self.requested;
                let _ = self.recreate(gpu, width, height);
            }
            Err(result) => log::error!("vkQueuePresentKHR failed: {}", result),
        }
    }
}
