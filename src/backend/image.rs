// Images - device-local attachments owned by the backend
//
// Swapchain color images belong to the driver; depth attachments are ours.
// Their memory comes from gpu-allocator through `Gpu::create_image`.

use ash::vk;

use super::error::{BackendResult, VkResultExt};
use super::gpu::{Gpu, ImageDesc};

/// A 2D image plus the view used to attach it.
#[derive(Debug)]
pub struct Image {
    pub name: String,
    pub handle: vk::Image,
    pub view: vk::ImageView,
    pub width: u32,
    pub height: u32,
    pub format: vk::Format,
}

impl Image {
    /// Create a depth/stencil attachment. Nothing is left behind on failure.
    pub fn create_depth<G: Gpu + ?Sized>(
        gpu: &G,
        name: &str,
        width: u32,
        height: u32,
        format: vk::Format,
    ) -> BackendResult<Self> {
        let handle = gpu
            .create_image(&ImageDesc {
                name,
                width,
                height,
                format,
                usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
                tiling: vk::ImageTiling::OPTIMAL,
            })
            .op("vkCreateImage")?;

        let view = match gpu
            .create_image_view(name, handle, format, vk::ImageAspectFlags::DEPTH)
            .op("vkCreateImageView")
        {
            Ok(view) => view,
            Err(e) => {
                gpu.destroy_image(handle);
                return Err(e);
            }
        };

        log::debug!("Created depth attachment {} ({}x{}, {:?})", name, width, height, format);

        Ok(Self {
            name: name.to_string(),
            handle,
            view,
            width,
            height,
            format,
        })
    }

    /// Aspects a layout transition of the whole image has to cover.
    pub fn aspect(&self) -> vk::ImageAspectFlags {
        match self.format {
            vk::Format::D16_UNORM_S8_UINT
            | vk::Format::D24_UNORM_S8_UINT
            | vk::Format::D32_SFLOAT_S8_UINT => {
                vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
            }
            _ => vk::ImageAspectFlags::DEPTH,
        }
    }

    /// Safe to call more than once.
    pub fn destroy<G: Gpu + ?Sized>(&mut self, gpu: &G) {
        if self.view != vk::ImageView::null() {
            gpu.destroy_image_view(self.view);
            self.view = vk::ImageView::null();
        }
        if self.handle != vk::Image::null() {
            gpu.destroy_image(self.handle);
            self.handle = vk::Image::null();
        }
    }
}
