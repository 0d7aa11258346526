// Vulkan Device - logical device, queues, command pool, memory
//
// Responsibilities:
// - Logical device with one queue-create entry per distinct family
// - Graphics / present / transfer queue handles
// - Reset-capable command pool on the graphics family
// - gpu-allocator backed image memory
// - The `Gpu` implementation the frame logic runs on

use anyhow::{Context, Result};
use ash::extensions::{ext, khr};
use ash::prelude::VkResult;
use ash::vk::{self, Handle};
use gpu_allocator::vulkan::{
    Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc,
};
use gpu_allocator::MemoryLocation;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::ffi::CString;

use super::gpu::{DynamicState, Gpu, ImageDesc, Queues, Submission};
use super::instance::VulkanInstance;
use super::selection::{required_device_extensions, GraphicsDevice, QueueFamilies};

const GRAPHICS_QUEUE_PRIORITY: f32 = 0.9;
const QUEUE_PRIORITY: f32 = 1.0;

/// One `VkDeviceQueueCreateInfo` worth of queues.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueRequest {
    pub family: u32,
    pub priorities: Vec<f32>,
}

/// Which queues to request, and which (family, index) each role ends up on.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuePlan {
    pub requests: Vec<QueueRequest>,
    pub graphics: (u32, u32),
    pub present: (u32, u32),
    pub transfer: (u32, u32),
}

/// Give graphics, present and transfer their own queue where the family
/// has enough, sharing the last available queue otherwise.
pub fn plan_queues(families: &QueueFamilies, family_queue_counts: &[u32]) -> QueuePlan {
    let roles = [families.graphics, families.present, families.transfer];
    let mut requests: Vec<QueueRequest> = Vec::with_capacity(roles.len());
    let mut slots = [(0, 0); 3];

    for (role, &family) in roles.iter().enumerate() {
        let position = match requests.iter().position(|r| r.family == family) {
            Some(position) => position,
            None => {
                requests.push(QueueRequest {
                    family,
                    priorities: Vec::new(),
                });
                requests.len() - 1
            }
        };
        let request = &mut requests[position];

        let available = family_queue_counts
            .get(family as usize)
            .copied()
            .unwrap_or(1)
            .max(1);
        let index = (request.priorities.len() as u32).min(available - 1);
        if index as usize == request.priorities.len() {
            request.priorities.push(if role == 0 {
                GRAPHICS_QUEUE_PRIORITY
            } else {
                QUEUE_PRIORITY
            });
        }
        slots[role] = (family, index);
    }

    QueuePlan {
        requests,
        graphics: slots[0],
        present: slots[1],
        transfer: slots[2],
    }
}

/// Vulkan device wrapper with automatic cleanup
pub struct VulkanDevice {
    pub device: ash::Device,
    pub gpu: GraphicsDevice,
    queues: Queues,
    pub command_pool: vk::CommandPool,

    // Memory (allocator must be dropped before the device)
    allocator: Option<Mutex<Allocator>>,
    image_allocations: Mutex<HashMap<vk::Image, Allocation>>,

    swapchain_loader: khr::Swapchain,
    surface_loader: khr::Surface,
    surface: vk::SurfaceKHR,
    debug_utils: Option<ext::DebugUtils>,
}

impl VulkanDevice {
    /// Create the logical device for the selected GPU.
    pub fn new(instance: &VulkanInstance, gpu: GraphicsDevice) -> Result<Self> {
        log::info!("Creating logical device on {}", gpu.name());

        let plan = plan_queues(&gpu.queue_families, &gpu.family_queue_counts);
        let queue_infos: Vec<vk::DeviceQueueCreateInfo> = plan
            .requests
            .iter()
            .map(|request| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(request.family)
                    .queue_priorities(&request.priorities)
                    .build()
            })
            .collect();

        let extensions: Vec<_> = required_device_extensions()
            .iter()
            .map(|ext| ext.as_ptr())
            .collect();

        // The render scope is a dynamic rendering scope (core in 1.3).
        let mut vulkan13 = vk::PhysicalDeviceVulkan13Features::builder()
            .dynamic_rendering(true);

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&extensions)
            .push_next(&mut vulkan13);

        let device = unsafe {
            instance
                .instance
                .create_device(gpu.physical_device, &create_info, None)
        }
        .context("Failed to create logical device")?;

        let queues = unsafe {
            Queues {
                graphics: device.get_device_queue(plan.graphics.0, plan.graphics.1),
                present: device.get_device_queue(plan.present.0, plan.present.1),
                transfer: device.get_device_queue(plan.transfer.0, plan.transfer.1),
            }
        };

        // From here on Drop releases whatever has been created.
        let mut this = Self {
            swapchain_loader: khr::Swapchain::new(&instance.instance, &device),
            device,
            queues,
            command_pool: vk::CommandPool::null(),
            allocator: None,
            image_allocations: Mutex::new(HashMap::new()),
            surface_loader: instance.surface_loader.clone(),
            surface: instance.surface,
            debug_utils: instance.debug_utils.clone(),
            gpu,
        };
        this.name_object(this.device.handle(), &this.gpu.name());

        let pool_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(this.gpu.queue_families.graphics)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        this.command_pool = unsafe { this.device.create_command_pool(&pool_info, None) }
            .context("Failed to create graphics command pool")?;
        this.name_object(this.command_pool, "Graphics");

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.instance.clone(),
            device: this.device.clone(),
            physical_device: this.gpu.physical_device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })
        .context("Failed to create GPU memory allocator")?;
        this.allocator = Some(Mutex::new(allocator));

        let properties = &this.gpu.properties;
        log::info!(
            "API Version: {}.{}.{}",
            vk::api_version_major(properties.api_version),
            vk::api_version_minor(properties.api_version),
            vk::api_version_patch(properties.api_version)
        );
        log::info!(
            "Queue families: graphics {}, present {}, transfer {}",
            plan.graphics.0,
            plan.present.0,
            plan.transfer.0
        );

        Ok(this)
    }

    /// Label a Vulkan object for validation messages and capture tools.
    fn name_object<H: Handle>(&self, handle: H, name: &str) {
        let Some(debug_utils) = &self.debug_utils else {
            return;
        };
        let Ok(name) = CString::new(format!("{:?}.{}", H::TYPE, name)) else {
            return;
        };
        let name_info = vk::DebugUtilsObjectNameInfoEXT::builder()
            .object_type(H::TYPE)
            .object_handle(handle.as_raw())
            .object_name(&name);
        if let Err(e) =
            unsafe { debug_utils.set_debug_utils_object_name(self.device.handle(), &name_info) }
        {
            log::debug!("Failed to name {:?}: {}", H::TYPE, e);
        }
    }

    fn allocate_image_memory(&self, image: vk::Image, name: &str) -> VkResult<()> {
        let allocator = self
            .allocator
            .as_ref()
            .ok_or(vk::Result::ERROR_INITIALIZATION_FAILED)?;
        let requirements = unsafe { self.device.get_image_memory_requirements(image) };

        let allocation = allocator
            .lock()
            .allocate(&AllocationCreateDesc {
                name,
                requirements,
                location: MemoryLocation::GpuOnly,
                linear: false,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .map_err(|e| {
                log::error!("Failed to allocate memory for {}: {}", name, e);
                vk::Result::ERROR_OUT_OF_DEVICE_MEMORY
            })?;

        let bound = unsafe {
            self.device
                .bind_image_memory(image, allocation.memory(), allocation.offset())
        };
        if let Err(e) = bound {
            if let Err(free_err) = allocator.lock().free(allocation) {
                log::warn!("Failed to free memory for {}: {}", name, free_err);
            }
            return Err(e);
        }

        self.image_allocations.lock().insert(image, allocation);
        Ok(())
    }

    fn free_image_memory(&self, image: vk::Image) {
        let Some(allocation) = self.image_allocations.lock().remove(&image) else {
            return;
        };
        if let Some(allocator) = &self.allocator {
            if let Err(e) = allocator.lock().free(allocation) {
                log::warn!("Failed to free image memory: {}", e);
            }
        }
    }
}

impl Gpu for VulkanDevice {
    fn graphics_device(&self) -> &GraphicsDevice {
        &self.gpu
    }

    fn queues(&self) -> Queues {
        self.queues
    }

    fn create_semaphore(&self, name: &str) -> VkResult<vk::Semaphore> {
        let semaphore =
            unsafe { self.device.create_semaphore(&vk::SemaphoreCreateInfo::default(), None) }?;
        self.name_object(semaphore, name);
        Ok(semaphore)
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        unsafe { self.device.destroy_semaphore(semaphore, None) }
    }

    fn create_fence(&self, name: &str, signaled: bool) -> VkResult<vk::Fence> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let fence_info = vk::FenceCreateInfo::builder().flags(flags);
        let fence = unsafe { self.device.create_fence(&fence_info, None) }?;
        self.name_object(fence, name);
        Ok(fence)
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        unsafe { self.device.destroy_fence(fence, None) }
    }

    fn wait_for_fence(&self, fence: vk::Fence, timeout: u64) -> VkResult<()> {
        unsafe { self.device.wait_for_fences(&[fence], true, timeout) }
    }

    fn reset_fence(&self, fence: vk::Fence) -> VkResult<()> {
        unsafe { self.device.reset_fences(&[fence]) }
    }

    fn wait_idle(&self) -> VkResult<()> {
        unsafe { self.device.device_wait_idle() }
    }

    fn allocate_command_buffer(
        &self,
        name: &str,
        level: vk::CommandBufferLevel,
    ) -> VkResult<vk::CommandBuffer> {
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.command_pool)
            .level(level)
            .command_buffer_count(1);
        let command_buffer = unsafe { self.device.allocate_command_buffers(&alloc_info) }?
            .into_iter()
            .next()
            .ok_or(vk::Result::ERROR_UNKNOWN)?;
        self.name_object(command_buffer, name);
        Ok(command_buffer)
    }

    fn free_command_buffer(&self, command_buffer: vk::CommandBuffer) {
        unsafe {
            self.device
                .free_command_buffers(self.command_pool, &[command_buffer])
        }
    }

    fn begin_command_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        usage: vk::CommandBufferUsageFlags,
    ) -> VkResult<()> {
        let begin_info = vk::CommandBufferBeginInfo::builder().flags(usage);
        unsafe { self.device.begin_command_buffer(command_buffer, &begin_info) }
    }

    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VkResult<()> {
        unsafe { self.device.end_command_buffer(command_buffer) }
    }

    fn reset_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VkResult<()> {
        unsafe {
            self.device
                .reset_command_buffer(command_buffer, vk::CommandBufferResetFlags::empty())
        }
    }

    fn queue_submit(
        &self,
        queue: vk::Queue,
        submission: &Submission<'_>,
        fence: vk::Fence,
    ) -> VkResult<()> {
        let submit_info = vk::SubmitInfo::builder()
            .command_buffers(submission.command_buffers)
            .wait_semaphores(submission.wait_semaphores)
            .wait_dst_stage_mask(submission.wait_stages)
            .signal_semaphores(submission.signal_semaphores)
            .build();
        unsafe { self.device.queue_submit(queue, &[submit_info], fence) }
    }

    fn queue_wait_idle(&self, queue: vk::Queue) -> VkResult<()> {
        unsafe { self.device.queue_wait_idle(queue) }
    }

    fn surface_capabilities(&self) -> VkResult<vk::SurfaceCapabilitiesKHR> {
        unsafe {
            self.surface_loader
                .get_physical_device_surface_capabilities(self.gpu.physical_device, self.surface)
        }
    }

    fn create_swapchain(&self, info: &vk::SwapchainCreateInfoKHR) -> VkResult<vk::SwapchainKHR> {
        let mut info = *info;
        info.surface = self.surface;
        let swapchain = unsafe { self.swapchain_loader.create_swapchain(&info, None) }?;
        self.name_object(swapchain, "Main");
        Ok(swapchain)
    }

    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> VkResult<Vec<vk::Image>> {
        unsafe { self.swapchain_loader.get_swapchain_images(swapchain) }
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        unsafe { self.swapchain_loader.destroy_swapchain(swapchain, None) }
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        timeout: u64,
        semaphore: vk::Semaphore,
        fence: vk::Fence,
    ) -> VkResult<(u32, bool)> {
        unsafe {
            self.swapchain_loader
                .acquire_next_image(swapchain, timeout, semaphore, fence)
        }
    }

    fn queue_present(
        &self,
        queue: vk::Queue,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    ) -> VkResult<bool> {
        let wait_semaphores = [wait_semaphore];
        let swapchains = [swapchain];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);
        unsafe { self.swapchain_loader.queue_present(queue, &present_info) }
    }

    fn create_image(&self, desc: &ImageDesc<'_>) -> VkResult<vk::Image> {
        let image_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .format(desc.format)
            .extent(vk::Extent3D {
                width: desc.width,
                height: desc.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(desc.tiling)
            .usage(desc.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let image = unsafe { self.device.create_image(&image_info, None) }?;
        if let Err(e) = self.allocate_image_memory(image, desc.name) {
            unsafe { self.device.destroy_image(image, None) };
            return Err(e);
        }
        self.name_object(image, desc.name);
        Ok(image)
    }

    fn destroy_image(&self, image: vk::Image) {
        unsafe { self.device.destroy_image(image, None) };
        self.free_image_memory(image);
    }

    fn create_image_view(
        &self,
        name: &str,
        image: vk::Image,
        format: vk::Format,
        aspect: vk::ImageAspectFlags,
    ) -> VkResult<vk::ImageView> {
        let view_info = vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .components(vk::ComponentMapping {
                r: vk::ComponentSwizzle::IDENTITY,
                g: vk::ComponentSwizzle::IDENTITY,
                b: vk::ComponentSwizzle::IDENTITY,
                a: vk::ComponentSwizzle::IDENTITY,
            })
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: aspect,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });
        let view = unsafe { self.device.create_image_view(&view_info, None) }?;
        self.name_object(view, name);
        Ok(view)
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        unsafe { self.device.destroy_image_view(view, None) }
    }

    fn cmd_set_dynamic_state(&self, command_buffer: vk::CommandBuffer, state: &DynamicState) {
        unsafe {
            self.device.cmd_set_front_face(command_buffer, state.front_face);
            self.device
                .cmd_set_depth_test_enable(command_buffer, state.depth_test);
            self.device
                .cmd_set_depth_write_enable(command_buffer, state.depth_write);
        }
    }

    fn cmd_image_barrier(
        &self,
        command_buffer: vk::CommandBuffer,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        barrier: &vk::ImageMemoryBarrier,
    ) {
        unsafe {
            self.device.cmd_pipeline_barrier(
                command_buffer,
                src_stage,
                dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                std::slice::from_ref(barrier),
            );
        }
    }

    fn cmd_begin_rendering(&self, command_buffer: vk::CommandBuffer, info: &vk::RenderingInfo) {
        unsafe { self.device.cmd_begin_rendering(command_buffer, info) }
    }

    fn cmd_end_rendering(&self, command_buffer: vk::CommandBuffer) {
        unsafe { self.device.cmd_end_rendering(command_buffer) }
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan device...");

        if let Err(e) = unsafe { self.device.device_wait_idle() } {
            log::warn!("vkDeviceWaitIdle failed during teardown: {}", e);
        }

        let leftover: Vec<vk::Image> = self.image_allocations.lock().keys().copied().collect();
        if !leftover.is_empty() {
            log::warn!("{} images still alive at device teardown", leftover.len());
        }
        for image in leftover {
            self.destroy_image(image);
        }

        if let Some(allocator) = self.allocator.take() {
            allocator.lock().report_memory_leaks(log::Level::Warn);
        }

        unsafe {
            if self.command_pool != vk::CommandPool::null() {
                self.device.destroy_command_pool(self.command_pool, None);
            }
            self.device.destroy_device(None);
        }
    }
}
