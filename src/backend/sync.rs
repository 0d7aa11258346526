// Synchronization - per-frame resources
//
// One slot per frame in flight: a command buffer, an image-available and a
// render-finished semaphore, and a fence that starts signaled so the first
// wait on it returns immediately.

use ash::vk;

use super::command_buffer::CommandBuffer;
use super::error::{BackendError, BackendResult, VkResultExt};
use super::gpu::Gpu;

#[derive(Debug)]
pub struct FrameSlot {
    pub command_buffer: CommandBuffer,
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub in_flight: vk::Fence,
    /// The fence was reset for a frame that has not been submitted, so no
    /// GPU work will ever signal it.
    pub fence_reset: bool,
    /// The image-available semaphore may still carry a signal from an
    /// abandoned acquire. Cleared by a successful `rearm`.
    pub needs_rearm: bool,
}

impl FrameSlot {
    fn empty(index: usize) -> Self {
        Self {
            command_buffer: CommandBuffer::new(format!("Frame{index}")),
            image_available: vk::Semaphore::null(),
            render_finished: vk::Semaphore::null(),
            in_flight: vk::Fence::null(),
            fence_reset: false,
            needs_rearm: false,
        }
    }

    fn create<G: Gpu + ?Sized>(&mut self, gpu: &G, index: usize) -> BackendResult<()> {
        self.image_available = gpu
            .create_semaphore(&format!("FrameImageAvailable{index}"))
            .op("vkCreateSemaphore")?;
        self.render_finished = gpu
            .create_semaphore(&format!("FrameRenderFinished{index}"))
            .op("vkCreateSemaphore")?;
        self.in_flight = gpu
            .create_fence(&format!("Frame{index}"), true)
            .op("vkCreateFence")?;
        self.command_buffer.allocate(gpu)
    }

    /// Block until the GPU is done with this slot. A fence that was reset
    /// without a submit would never signal, so it is skipped.
    pub fn wait<G: Gpu + ?Sized>(&self, gpu: &G) -> BackendResult<()> {
        if self.fence_reset || self.in_flight == vk::Fence::null() {
            return Ok(());
        }
        gpu.wait_for_fence(self.in_flight, u64::MAX)
            .op("vkWaitForFences")
    }

    fn destroy<G: Gpu + ?Sized>(&mut self, gpu: &G) {
        self.command_buffer.free(gpu);
        if self.image_available != vk::Semaphore::null() {
            gpu.destroy_semaphore(self.image_available);
            self.image_available = vk::Semaphore::null();
        }
        if self.render_finished != vk::Semaphore::null() {
            gpu.destroy_semaphore(self.render_finished);
            self.render_finished = vk::Semaphore::null();
        }
        if self.in_flight != vk::Fence::null() {
            gpu.destroy_fence(self.in_flight);
            self.in_flight = vk::Fence::null();
        }
        self.fence_reset = false;
        self.needs_rearm = false;
    }
}

/// Slots built so far by one `recreate` call; destroyed unless handed over.
struct PartialSlots<'a, G: Gpu + ?Sized> {
    gpu: &'a G,
    slots: Vec<FrameSlot>,
}

impl<G: Gpu + ?Sized> PartialSlots<'_, G> {
    fn finish(mut self) -> Vec<FrameSlot> {
        std::mem::take(&mut self.slots)
    }
}

impl<G: Gpu + ?Sized> Drop for PartialSlots<'_, G> {
    fn drop(&mut self) {
        for slot in &mut self.slots {
            slot.destroy(self.gpu);
        }
    }
}

/// The frame resource pool. `len()` always equals the frame-in-flight count
/// it was last recreated with.
#[derive(Debug, Default)]
pub struct FrameResources {
    slots: Vec<FrameSlot>,
}

impl FrameResources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slots(&self) -> &[FrameSlot] {
        &self.slots
    }

    pub fn slot(&self, index: usize) -> BackendResult<&FrameSlot> {
        self.slots.get(index).ok_or(BackendError::MissingFrameSlot(index))
    }

    pub fn slot_mut(&mut self, index: usize) -> BackendResult<&mut FrameSlot> {
        self.slots
            .get_mut(index)
            .ok_or(BackendError::MissingFrameSlot(index))
    }

    /// Replace every slot with `new_count` fresh ones.
    ///
    /// Waits on each existing fence before destroying anything. A count of 0
    /// only tears down. If building a slot fails, every slot built by this
    /// call is destroyed and the pool is left empty.
    pub fn recreate<G: Gpu + ?Sized>(&mut self, gpu: &G, new_count: usize) -> BackendResult<()> {
        let old_count = self.slots.len();
        if old_count > 0 {
            for slot in &self.slots {
                if let Err(e) = slot.wait(gpu) {
                    log::warn!("Waiting for frame fence failed: {}", e);
                }
            }
            for slot in &mut self.slots {
                slot.destroy(gpu);
            }
            self.slots.clear();
        }

        if new_count == 0 {
            return Ok(());
        }

        let mut partial = PartialSlots {
            gpu,
            slots: Vec::with_capacity(new_count),
        };
        for index in 0..new_count {
            partial.slots.push(FrameSlot::empty(index));
            if let Some(slot) = partial.slots.last_mut() {
                slot.create(gpu, index)?;
            }
        }
        self.slots = partial.finish();

        log::debug!("Frame resources: {} -> {} slots", old_count, new_count);
        Ok(())
    }

    /// Give slot `index` a fresh image-available semaphore and a signaled
    /// fence. Used when an acquired image is abandoned because the
    /// swapchain it came from was replaced.
    ///
    /// The replacements are created before the old handles go, so a failure
    /// leaves the slot as it was, still marked `needs_rearm`.
    pub fn rearm<G: Gpu + ?Sized>(&mut self, gpu: &G, index: usize) -> BackendResult<()> {
        let slot = self.slot_mut(index)?;
        slot.needs_rearm = true;
        if let Err(e) = slot.wait(gpu) {
            log::warn!("Waiting for frame fence failed: {}", e);
        }

        let image_available = gpu
            .create_semaphore(&format!("FrameImageAvailable{index}"))
            .op("vkCreateSemaphore")?;
        let in_flight = match gpu.create_fence(&format!("Frame{index}"), true).op("vkCreateFence") {
            Ok(fence) => fence,
            Err(e) => {
                gpu.destroy_semaphore(image_available);
                return Err(e);
            }
        };

        let old_semaphore = std::mem::replace(&mut slot.image_available, image_available);
        if old_semaphore != vk::Semaphore::null() {
            gpu.destroy_semaphore(old_semaphore);
        }
        let old_fence = std::mem::replace(&mut slot.in_flight, in_flight);
        if old_fence != vk::Fence::null() {
            gpu.destroy_fence(old_fence);
        }
        slot.fence_reset = false;
        slot.needs_rearm = false;
        Ok(())
    }
}
