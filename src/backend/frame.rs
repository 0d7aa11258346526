// Frame orchestration - prepare, record, submit, present
//
// FrameContext owns the device, the swapchain and the frame slots and drives
// one frame at a time through four stages:
//
//   frame_prepare       wait for the slot, acquire an image, reset
//   command_list_begin  begin recording, barriers, open the render scope
//   command_list_end    close the render scope, barrier to present, end
//   frame_render        submit, present, advance current_frame
//
// A stage that fails leaves current_frame where it was. An image that was
// acquired but never submitted stays held by the slot and is reused by the
// next frame_prepare.

use ash::vk;

use super::command_buffer::{BeginFlags, CommandBufferState};
use super::error::{BackendError, BackendResult, VkResultExt};
use super::gpu::{DynamicState, Gpu, Submission};
use super::swapchain::Swapchain;
use super::sync::FrameResources;

/// Clear color used when none is configured.
pub const DEFAULT_CLEAR_COLOR: [f32; 4] = [0.8, 0.0, 0.0, 1.0];

const COLOR_SUBRESOURCE: vk::ImageSubresourceRange = vk::ImageSubresourceRange {
    aspect_mask: vk::ImageAspectFlags::COLOR,
    base_mip_level: 0,
    level_count: 1,
    base_array_layer: 0,
    layer_count: 1,
};

pub struct FrameContext<G: Gpu> {
    gpu: G,
    swapchain: Swapchain,
    frames: FrameResources,
    current_frame: usize,
    /// Image acquired for the current slot and not yet submitted.
    held_image: Option<u32>,
    pub clear_color: [f32; 4],
    pub dynamic_state: DynamicState,
}

impl<G: Gpu> FrameContext<G> {
    /// Build the swapchain and one frame slot per frame in flight.
    pub fn new(gpu: G, width: u32, height: u32) -> BackendResult<Self> {
        let mut swapchain = Swapchain::create(&gpu, width, height)?;

        let mut frames = FrameResources::new();
        if let Err(e) = frames.recreate(&gpu, swapchain.max_frames_in_flight) {
            swapchain.destroy(&gpu);
            return Err(e);
        }

        log::info!(
            "Frame context ready: {} frames in flight, {} swapchain images",
            frames.len(),
            swapchain.image_count()
        );

        Ok(Self {
            gpu,
            swapchain,
            frames,
            current_frame: 0,
            held_image: None,
            clear_color: DEFAULT_CLEAR_COLOR,
            dynamic_state: DynamicState::default(),
        })
    }

    pub fn gpu(&self) -> &G {
        &self.gpu
    }

    pub fn swapchain(&self) -> &Swapchain {
        &self.swapchain
    }

    pub fn frames(&self) -> &FrameResources {
        &self.frames
    }

    pub fn current_frame(&self) -> usize {
        self.current_frame
    }

    pub fn max_frames_in_flight(&self) -> usize {
        self.swapchain.max_frames_in_flight
    }

    /// The image the in-progress frame renders to, once acquired.
    pub fn image_index(&self) -> Option<u32> {
        self.held_image
    }

    /// Command buffer of the in-progress frame, for draw recording.
    pub fn command_buffer(&self) -> BackendResult<vk::CommandBuffer> {
        Ok(self.frames.slot(self.current_frame)?.command_buffer.handle())
    }

    pub fn frame_prepare(&mut self) -> BackendResult<()> {
        if self.frames.slot(self.current_frame)?.needs_rearm {
            self.frames.rearm(&self.gpu, self.current_frame)?;
        }

        let gpu = &self.gpu;
        let slot = self.frames.slot_mut(self.current_frame)?;

        // A held image means this slot's fence was already waited on and
        // reset, unless a failed submit re-armed it.
        if !slot.fence_reset {
            slot.wait(gpu)?;
        }
        if self.held_image.is_none() {
            let index = self
                .swapchain
                .acquire_next_image(gpu, slot.image_available, vk::Fence::null())?;
            self.held_image = Some(index);
        }
        if !slot.fence_reset {
            gpu.reset_fence(slot.in_flight).op("vkResetFences")?;
            slot.fence_reset = true;
        }

        // A buffer abandoned mid-record can't be reset through the state
        // machine, so it is replaced.
        let command_buffer = &mut slot.command_buffer;
        if !matches!(
            command_buffer.state(),
            CommandBufferState::Ready | CommandBufferState::Submitted
        ) {
            log::debug!(
                "Recycling command buffer '{}' left in state {}",
                command_buffer.name(),
                command_buffer.state()
            );
            command_buffer.free(gpu);
            command_buffer.allocate(gpu)?;
        }
        command_buffer.reset(gpu)
    }

    pub fn command_list_begin(&mut self) -> BackendResult<()> {
        let gpu = &self.gpu;
        let index = self.held_image.ok_or(BackendError::NoAcquiredImage)? as usize;
        let swapchain = &self.swapchain;
        let color_image = *swapchain.images.get(index).ok_or(BackendError::NoAcquiredImage)?;
        let color_view = swapchain.image_views[index];
        let depth = &swapchain.depth_attachments[index];
        let slot = self.frames.slot_mut(self.current_frame)?;
        let command_buffer = &mut slot.command_buffer;

        command_buffer.begin(gpu, BeginFlags::default())?;
        let cb = command_buffer.handle();

        gpu.cmd_set_dynamic_state(cb, &self.dynamic_state);

        let color_barrier = vk::ImageMemoryBarrier::builder()
            .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
            .old_layout(vk::ImageLayout::UNDEFINED)
            .new_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(color_image)
            .subresource_range(COLOR_SUBRESOURCE);
        gpu.cmd_image_barrier(
            cb,
            vk::PipelineStageFlags::TOP_OF_PIPE,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            &color_barrier,
        );

        let depth_barrier = vk::ImageMemoryBarrier::builder()
            .dst_access_mask(
                vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                    | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            )
            .old_layout(vk::ImageLayout::UNDEFINED)
            .new_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(depth.handle)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: depth.aspect(),
                ..COLOR_SUBRESOURCE
            });
        gpu.cmd_image_barrier(
            cb,
            vk::PipelineStageFlags::TOP_OF_PIPE,
            vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
                | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
            &depth_barrier,
        );

        let color_attachments = [vk::RenderingAttachmentInfo::builder()
            .image_view(color_view)
            .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .clear_value(vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: self.clear_color,
                },
            })
            .build()];
        let depth_attachment = vk::RenderingAttachmentInfo::builder()
            .image_view(depth.view)
            .image_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::DONT_CARE)
            .clear_value(vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            });
        let rendering_info = vk::RenderingInfo::builder()
            .render_area(vk::Rect2D {
                offset: vk::Offset2D::default(),
                extent: swapchain.extent,
            })
            .layer_count(1)
            .color_attachments(&color_attachments)
            .depth_attachment(&depth_attachment);

        command_buffer.begin_rendering(gpu, &rendering_info)
    }

    pub fn command_list_end(&mut self) -> BackendResult<()> {
        let gpu = &self.gpu;
        let index = self.held_image.ok_or(BackendError::NoAcquiredImage)? as usize;
        let color_image = *self
            .swapchain
            .images
            .get(index)
            .ok_or(BackendError::NoAcquiredImage)?;
        let command_buffer = &mut self.frames.slot_mut(self.current_frame)?.command_buffer;

        command_buffer.end_rendering(gpu)?;

        let present_barrier = vk::ImageMemoryBarrier::builder()
            .src_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
            .old_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .new_layout(vk::ImageLayout::PRESENT_SRC_KHR)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(color_image)
            .subresource_range(COLOR_SUBRESOURCE);
        gpu.cmd_image_barrier(
            command_buffer.handle(),
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            vk::PipelineStageFlags::BOTTOM_OF_PIPE,
            &present_barrier,
        );

        command_buffer.end(gpu)
    }

    pub fn frame_render(&mut self) -> BackendResult<()> {
        let gpu = &self.gpu;
        let queues = gpu.queues();
        let image_index = self.held_image.ok_or(BackendError::NoAcquiredImage)?;
        let slot = self.frames.slot_mut(self.current_frame)?;
        slot.command_buffer
            .check_transition(&[CommandBufferState::Ended], CommandBufferState::Submitted)?;

        let command_buffers = [slot.command_buffer.handle()];
        let wait_semaphores = [slot.image_available];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal_semaphores = [slot.render_finished];
        let submission = Submission {
            command_buffers: &command_buffers,
            wait_semaphores: &wait_semaphores,
            wait_stages: &wait_stages,
            signal_semaphores: &signal_semaphores,
        };

        if let Err(result) = gpu.queue_submit(queues.graphics, &submission, slot.in_flight) {
            // Keep the fence signalable so later waits on it return.
            match gpu.queue_submit(queues.graphics, &Submission::default(), slot.in_flight) {
                Ok(()) => slot.fence_reset = false,
                Err(e) => log::error!("Failed to re-arm frame fence: {}", e),
            }
            return Err(BackendError::Vulkan {
                operation: "vkQueueSubmit",
                result,
            });
        }
        slot.fence_reset = false;
        slot.command_buffer.mark_submitted()?;
        self.held_image = None;

        self.swapchain
            .present(gpu, queues.present, slot.render_finished, image_index);

        self.current_frame = (self.current_frame + 1) % self.frames.len().max(1);
        Ok(())
    }

    /// Rebuild for a new surface size. Zero-sized requests (minimized
    /// window) are ignored. Returns whether anything was rebuilt.
    pub fn handle_resize(&mut self, width: u32, height: u32) -> BackendResult<bool> {
        if width == 0 || height == 0 {
            log::debug!("Ignoring resize to {}x{}", width, height);
            return Ok(false);
        }

        let old_count = self.swapchain.max_frames_in_flight;
        // The held image belongs to the chain being torn down, even if the
        // rebuild fails. The next acquire retries at the requested size.
        let held = self.held_image.take();
        let rebuilt = self.swapchain.recreate(&self.gpu, width, height);
        if held.is_some() {
            if let Err(e) = self.frames.rearm(&self.gpu, self.current_frame) {
                log::warn!(
                    "Re-arming frame {} failed, retrying next frame: {}",
                    self.current_frame,
                    e
                );
            }
        }
        rebuilt?;

        let new_count = self.swapchain.max_frames_in_flight;
        if new_count != old_count {
            self.frames.recreate(&self.gpu, new_count)?;
            self.current_frame %= new_count.max(1);
        }

        log::info!("Resized to {}x{}", width, height);
        Ok(true)
    }
}

impl<G: Gpu> Drop for FrameContext<G> {
    fn drop(&mut self) {
        if let Err(e) = self.gpu.wait_idle() {
            log::warn!("vkDeviceWaitIdle failed during teardown: {}", e);
        }
        if let Err(e) = self.frames.recreate(&self.gpu, 0) {
            log::warn!("Frame resource teardown failed: {}", e);
        }
        self.swapchain.destroy(&self.gpu);
    }
}
