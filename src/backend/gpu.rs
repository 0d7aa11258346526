// Gpu - device-level operations used by the frame logic
//
// The swapchain, frame pool, command buffers and frame orchestrator only
// talk to the GPU through this trait. VulkanDevice implements it on top of
// ash; unit tests drive the same code through a fake.

use ash::prelude::VkResult;
use ash::vk;

use super::selection::GraphicsDevice;

/// Resolved queue handles of the logical device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Queues {
    pub graphics: vk::Queue,
    pub present: vk::Queue,
    pub transfer: vk::Queue,
}

/// One batch handed to `queue_submit`.
#[derive(Debug, Default, Clone, Copy)]
pub struct Submission<'a> {
    pub command_buffers: &'a [vk::CommandBuffer],
    pub wait_semaphores: &'a [vk::Semaphore],
    pub wait_stages: &'a [vk::PipelineStageFlags],
    pub signal_semaphores: &'a [vk::Semaphore],
}

/// Parameters of a device-local 2D image (depth attachments).
#[derive(Debug, Clone, Copy)]
pub struct ImageDesc<'a> {
    pub name: &'a str,
    pub width: u32,
    pub height: u32,
    pub format: vk::Format,
    pub usage: vk::ImageUsageFlags,
    pub tiling: vk::ImageTiling,
}

/// Pipeline state set dynamically at the start of every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DynamicState {
    pub front_face: vk::FrontFace,
    pub depth_test: bool,
    pub depth_write: bool,
}

impl Default for DynamicState {
    fn default() -> Self {
        Self {
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            depth_test: true,
            depth_write: true,
        }
    }
}

pub trait Gpu {
    /// The physical device this logical device was created from.
    fn graphics_device(&self) -> &GraphicsDevice;
    fn queues(&self) -> Queues;

    // Synchronization
    fn create_semaphore(&self, name: &str) -> VkResult<vk::Semaphore>;
    fn destroy_semaphore(&self, semaphore: vk::Semaphore);
    fn create_fence(&self, name: &str, signaled: bool) -> VkResult<vk::Fence>;
    fn destroy_fence(&self, fence: vk::Fence);
    fn wait_for_fence(&self, fence: vk::Fence, timeout: u64) -> VkResult<()>;
    fn reset_fence(&self, fence: vk::Fence) -> VkResult<()>;
    fn wait_idle(&self) -> VkResult<()>;

    // Command buffers (all allocated from the shared graphics pool)
    fn allocate_command_buffer(
        &self,
        name: &str,
        level: vk::CommandBufferLevel,
    ) -> VkResult<vk::CommandBuffer>;
    fn free_command_buffer(&self, command_buffer: vk::CommandBuffer);
    fn begin_command_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        usage: vk::CommandBufferUsageFlags,
    ) -> VkResult<()>;
    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VkResult<()>;
    fn reset_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VkResult<()>;

    // Queues
    fn queue_submit(
        &self,
        queue: vk::Queue,
        submission: &Submission<'_>,
        fence: vk::Fence,
    ) -> VkResult<()>;
    fn queue_wait_idle(&self, queue: vk::Queue) -> VkResult<()>;

    // Surface + swapchain
    fn surface_capabilities(&self) -> VkResult<vk::SurfaceCapabilitiesKHR>;
    fn create_swapchain(&self, info: &vk::SwapchainCreateInfoKHR) -> VkResult<vk::SwapchainKHR>;
    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> VkResult<Vec<vk::Image>>;
    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR);
    /// Returns the image index and whether the swapchain is suboptimal.
    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        timeout: u64,
        semaphore: vk::Semaphore,
        fence: vk::Fence,
    ) -> VkResult<(u32, bool)>;
    /// Returns whether the swapchain is suboptimal.
    fn queue_present(
        &self,
        queue: vk::Queue,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    ) -> VkResult<bool>;

    // Images
    /// Creates the image and binds freshly allocated device-local memory to it.
    fn create_image(&self, desc: &ImageDesc<'_>) -> VkResult<vk::Image>;
    /// Destroys the image and releases its memory.
    fn destroy_image(&self, image: vk::Image);
    fn create_image_view(
        &self,
        name: &str,
        image: vk::Image,
        format: vk::Format,
        aspect: vk::ImageAspectFlags,
    ) -> VkResult<vk::ImageView>;
    fn destroy_image_view(&self, view: vk::ImageView);

    // Recording
    fn cmd_set_dynamic_state(&self, command_buffer: vk::CommandBuffer, state: &DynamicState);
    fn cmd_image_barrier(
        &self,
        command_buffer: vk::CommandBuffer,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        barrier: &vk::ImageMemoryBarrier,
    );
    fn cmd_begin_rendering(&self, command_buffer: vk::CommandBuffer, info: &vk::RenderingInfo);
    fn cmd_end_rendering(&self, command_buffer: vk::CommandBuffer);
}
