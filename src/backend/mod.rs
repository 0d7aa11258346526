// Backend module - Vulkan frame backend
//
// VulkanBackend is the RendererBackend the host loads. It owns the whole
// chain created by init: instance and surface, logical device, swapchain
// and frame slots, and the resize observer.

pub mod command_buffer;
pub mod device;
pub mod error;
pub mod frame;
pub mod gpu;
pub mod image;
pub mod instance;
pub mod resize;
pub mod selection;
pub mod swapchain;
pub mod sync;

#[cfg(test)]
pub(crate) mod testing;

pub use device::VulkanDevice;
pub use error::{BackendError, BackendResult};
pub use frame::FrameContext;
pub use gpu::Gpu;
pub use instance::VulkanInstance;
pub use swapchain::Swapchain;

use anyhow::{Context, Result};
use ash::vk;

use crate::events::EventBus;
use crate::platform::Window;
use crate::renderer::{BackendConfig, FramePacket, RendererBackend};
use command_buffer::CommandBuffer;
use resize::ResizeCoordinator;

/// Vulkan implementation of the renderer backend.
///
/// Field order is drop order: frame context (and with it the device) goes
/// before the instance and surface.
pub struct VulkanBackend {
    frames: Option<FrameContext<VulkanDevice>>,
    resize: Option<ResizeCoordinator>,
    instance: Option<VulkanInstance>,
}

impl VulkanBackend {
    fn create(
        config: &BackendConfig,
        window: &Window,
    ) -> Result<(VulkanInstance, FrameContext<VulkanDevice>)> {
        log::info!("Initializing Vulkan backend...");

        let instance = VulkanInstance::new(&config.application_name, config.validation, window)?;

        let candidates =
            selection::query_candidates(&instance.instance, &instance.surface_loader, instance.surface)
                .context("Failed to enumerate physical devices")?;
        let gpu = selection::select_device(candidates).context("Failed to select a GPU")?;

        let device = VulkanDevice::new(&instance, gpu)?;

        let mut frames = FrameContext::new(device, window.width, window.height)
            .context("Failed to create swapchain and frame resources")?;
        frames.clear_color = config.clear_color;

        Ok((instance, frames))
    }

    fn context(&mut self) -> BackendResult<&mut FrameContext<VulkanDevice>> {
        self.frames.as_mut().ok_or(BackendError::NotInitialized)
    }

    /// Apply the latest pending window size, if any.
    pub fn process_resize(&mut self) -> BackendResult<bool> {
        let Some(resize) = self.resize.as_ref() else {
            return Ok(false);
        };
        let frames = self.frames.as_mut().ok_or(BackendError::NotInitialized)?;
        resize.apply(frames)
    }

    /// Record and run one-off work on the graphics queue, blocking until it
    /// has finished.
    pub fn immediate_submit<F>(&mut self, name: &str, record: F) -> BackendResult<()>
    where
        F: FnOnce(&ash::Device, vk::CommandBuffer),
    {
        let frames = self.context()?;
        let gpu = frames.gpu();
        let command_buffer = CommandBuffer::begin_single_use(gpu, name)?;
        record(&gpu.device, command_buffer.handle());
        command_buffer.end_single_use(gpu, gpu.queues().graphics)
    }

    pub fn frame_context(&self) -> Option<&FrameContext<VulkanDevice>> {
        self.frames.as_ref()
    }

    pub fn instance(&self) -> Option<&VulkanInstance> {
        self.instance.as_ref()
    }

    fn run_stage<F>(&mut self, stage: &str, f: F) -> bool
    where
        F: FnOnce(&mut Self) -> BackendResult<()>,
    {
        match f(self) {
            Ok(()) => true,
            Err(BackendError::SwapchainOutOfDate) => {
                log::debug!("{}: swapchain out of date, frame skipped", stage);
                false
            }
            Err(e) => {
                log::error!("{} failed: {}", stage, e);
                false
            }
        }
    }
}

impl RendererBackend for VulkanBackend {
    fn init(config: &BackendConfig, window: &Window, bus: &mut EventBus) -> Result<Self> {
        let (instance, frames) = Self::create(config, window)?;
        let resize = ResizeCoordinator::attach(bus);

        log::info!("Vulkan backend initialized");
        Ok(Self {
            frames: Some(frames),
            resize: Some(resize),
            instance: Some(instance),
        })
    }

    fn deinit(&mut self, bus: &mut EventBus) {
        log::info!("Shutting down Vulkan backend...");
        if let Some(resize) = self.resize.take() {
            resize.detach(bus);
        }
        // Waits for the device before destroying anything.
        self.frames = None;
        self.instance = None;
    }

    fn frame_prepare(&mut self, packet: &mut FramePacket) -> bool {
        self.run_stage("frame_prepare", |backend| {
            backend.process_resize()?;
            let frames = backend.context()?;
            frames.frame_prepare()?;
            packet.image_index = frames.image_index();
            Ok(())
        })
    }

    fn command_list_begin(&mut self, _packet: &mut FramePacket) -> bool {
        self.run_stage("command_list_begin", |backend| {
            backend.context()?.command_list_begin()
        })
    }

    fn command_list_end(&mut self, _packet: &mut FramePacket) -> bool {
        self.run_stage("command_list_end", |backend| {
            backend.context()?.command_list_end()
        })
    }

    fn frame_render(&mut self, _packet: &mut FramePacket) -> bool {
        self.run_stage("frame_render", |backend| backend.context()?.frame_render())
    }
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        if self.resize.is_some() {
            log::warn!("Vulkan backend dropped without deinit; resize handler left subscribed");
        }
    }
}
