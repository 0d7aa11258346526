// FakeGpu - in-memory Gpu for unit tests
//
// Hands out unique handles, tracks what is alive, models fence signal state
// and command buffer recording state, and records every call. Misuse that a
// validation layer would report is collected in `violations()` instead of
// panicking, so tests can assert on it.

use ash::prelude::VkResult;
use ash::vk::{self, Handle};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::rc::Rc;

use super::gpu::{DynamicState, Gpu, ImageDesc, Queues, Submission};
use super::selection::{fixtures, GraphicsDevice};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FenceState {
    Signaled,
    /// Unsignaled with no work that would signal it.
    Reset,
    /// Submitted; signals once the fake GPU completes work.
    Pending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecordState {
    Initial,
    Recording,
    Executable,
}

#[derive(Debug, Clone)]
pub struct SwapchainRecord {
    pub handle: vk::SwapchainKHR,
    pub old: vk::SwapchainKHR,
    pub extent: vk::Extent2D,
    pub min_image_count: u32,
    pub sharing_mode: vk::SharingMode,
    pub present_mode: vk::PresentModeKHR,
}

#[derive(Debug, Clone)]
pub struct SubmitRecord {
    pub queue: vk::Queue,
    pub command_buffers: Vec<vk::CommandBuffer>,
    pub wait_semaphores: Vec<vk::Semaphore>,
    pub wait_stages: Vec<vk::PipelineStageFlags>,
    pub signal_semaphores: Vec<vk::Semaphore>,
    pub fence: vk::Fence,
}

#[derive(Debug, Clone, Copy)]
pub struct PresentRecord {
    pub queue: vk::Queue,
    pub swapchain: vk::SwapchainKHR,
    pub image_index: u32,
    pub wait_semaphore: vk::Semaphore,
}

#[derive(Debug, Clone, Copy)]
pub struct BarrierRecord {
    pub image: vk::Image,
    pub old_layout: vk::ImageLayout,
    pub new_layout: vk::ImageLayout,
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
}

#[derive(Debug, Clone, Copy)]
pub struct RenderingRecord {
    pub render_area: vk::Rect2D,
    pub color_view: vk::ImageView,
    pub depth_view: vk::ImageView,
    pub clear_color: [f32; 4],
}

struct FakeState {
    next_handle: u64,
    semaphores: HashSet<u64>,
    fences: HashMap<u64, FenceState>,
    command_buffers: HashMap<u64, RecordState>,
    swapchains: HashMap<u64, Vec<vk::Image>>,
    next_acquire: HashMap<u64, u32>,
    images: HashSet<u64>,
    image_views: HashSet<u64>,
    names: HashMap<u64, String>,

    calls: Vec<String>,
    violations: Vec<String>,
    failures: HashMap<&'static str, usize>,
    acquire_script: VecDeque<vk::Result>,
    present_script: VecDeque<vk::Result>,
    capabilities: vk::SurfaceCapabilitiesKHR,

    last_begin_usage: Option<vk::CommandBufferUsageFlags>,
    swapchain_records: Vec<SwapchainRecord>,
    submissions: Vec<SubmitRecord>,
    presents: Vec<PresentRecord>,
    barriers: Vec<BarrierRecord>,
    renderings: Vec<RenderingRecord>,
    dynamic_states: Vec<DynamicState>,
}

impl FakeState {
    fn new() -> Self {
        Self {
            next_handle: 1,
            semaphores: HashSet::new(),
            fences: HashMap::new(),
            command_buffers: HashMap::new(),
            swapchains: HashMap::new(),
            next_acquire: HashMap::new(),
            images: HashSet::new(),
            image_views: HashSet::new(),
            names: HashMap::new(),
            calls: Vec::new(),
            violations: Vec::new(),
            failures: HashMap::new(),
            acquire_script: VecDeque::new(),
            present_script: VecDeque::new(),
            capabilities: default_capabilities(),
            last_begin_usage: None,
            swapchain_records: Vec::new(),
            submissions: Vec::new(),
            presents: Vec::new(),
            barriers: Vec::new(),
            renderings: Vec::new(),
            dynamic_states: Vec::new(),
        }
    }

    fn handle(&mut self, name: &str) -> u64 {
        let raw = self.next_handle;
        self.next_handle += 1;
        self.names.insert(raw, name.to_string());
        raw
    }

    fn call(&mut self, entry: String) {
        self.calls.push(entry);
    }

    fn violation(&mut self, message: String) {
        self.violations.push(message);
    }

    fn inject(&mut self, op: &'static str) -> VkResult<()> {
        if let Some(remaining) = self.failures.get_mut(op) {
            if *remaining == 0 {
                self.failures.remove(op);
                self.calls.push(format!("{op} failed"));
                return Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
            }
            *remaining -= 1;
        }
        Ok(())
    }

    fn expect_recording(&mut self, command_buffer: vk::CommandBuffer, op: &str) {
        if self.command_buffers.get(&command_buffer.as_raw()) != Some(&RecordState::Recording) {
            self.violation(format!(
                "{op} on command buffer {} that is not recording",
                command_buffer.as_raw()
            ));
        }
    }

    fn complete_all(&mut self) {
        for state in self.fences.values_mut() {
            if *state == FenceState::Pending {
                *state = FenceState::Signaled;
            }
        }
    }
}

fn default_capabilities() -> vk::SurfaceCapabilitiesKHR {
    vk::SurfaceCapabilitiesKHR {
        min_image_count: 2,
        max_image_count: 3,
        current_extent: vk::Extent2D {
            width: u32::MAX,
            height: u32::MAX,
        },
        min_image_extent: vk::Extent2D { width: 1, height: 1 },
        max_image_extent: vk::Extent2D {
            width: 4096,
            height: 4096,
        },
        max_image_array_layers: 1,
        supported_transforms: vk::SurfaceTransformFlagsKHR::IDENTITY,
        current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
        supported_composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
        supported_usage_flags: vk::ImageUsageFlags::COLOR_ATTACHMENT
            | vk::ImageUsageFlags::TRANSFER_DST,
    }
}

#[derive(Clone)]
pub struct FakeGpu {
    state: Rc<RefCell<FakeState>>,
    device: Rc<GraphicsDevice>,
    queues: Queues,
}

impl FakeGpu {
    pub fn new() -> Self {
        Self::with_device(fixtures::graphics_device())
    }

    pub fn with_device(device: GraphicsDevice) -> Self {
        Self {
            state: Rc::new(RefCell::new(FakeState::new())),
            device: Rc::new(device),
            queues: Queues {
                graphics: vk::Queue::from_raw(0xF000_0001),
                present: vk::Queue::from_raw(0xF000_0002),
                transfer: vk::Queue::from_raw(0xF000_0003),
            },
        }
    }

    // Scripting

    /// Fail the `n`th upcoming call (0 = next) of `op` with an out of memory error.
    pub fn fail_nth(&self, op: &'static str, n: usize) {
        self.state.borrow_mut().failures.insert(op, n);
    }

    pub fn script_acquire(&self, results: impl IntoIterator<Item = vk::Result>) {
        self.state.borrow_mut().acquire_script.extend(results);
    }

    pub fn script_present(&self, results: impl IntoIterator<Item = vk::Result>) {
        self.state.borrow_mut().present_script.extend(results);
    }

    pub fn set_capabilities(&self, capabilities: vk::SurfaceCapabilitiesKHR) {
        self.state.borrow_mut().capabilities = capabilities;
    }

    pub fn capabilities(&self) -> vk::SurfaceCapabilitiesKHR {
        self.state.borrow().capabilities
    }

    // Inspection

    pub fn live_semaphores(&self) -> usize {
        self.state.borrow().semaphores.len()
    }

    pub fn live_fences(&self) -> usize {
        self.state.borrow().fences.len()
    }

    pub fn live_command_buffers(&self) -> usize {
        self.state.borrow().command_buffers.len()
    }

    pub fn live_swapchains(&self) -> usize {
        self.state.borrow().swapchains.len()
    }

    pub fn live_images(&self) -> usize {
        self.state.borrow().images.len()
    }

    pub fn live_image_views(&self) -> usize {
        self.state.borrow().image_views.len()
    }

    /// Every handle this fake created that has not been destroyed.
    pub fn live_handles(&self) -> usize {
        self.live_semaphores()
            + self.live_fences()
            + self.live_command_buffers()
            + self.live_swapchains()
            + self.live_images()
            + self.live_image_views()
    }

    pub fn fence_state(&self, fence: vk::Fence) -> Option<FenceState> {
        self.state.borrow().fences.get(&fence.as_raw()).copied()
    }

    pub fn is_recording(&self, command_buffer: vk::CommandBuffer) -> bool {
        self.state.borrow().command_buffers.get(&command_buffer.as_raw())
            == Some(&RecordState::Recording)
    }

    pub fn name_of(&self, raw: u64) -> Option<String> {
        self.state.borrow().names.get(&raw).cloned()
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.borrow().calls.clone()
    }

    /// Number of recorded calls to `op`.
    pub fn count_calls(&self, op: &str) -> usize {
        self.state
            .borrow()
            .calls
            .iter()
            .filter(|call| call.split(' ').next() == Some(op))
            .count()
    }

    /// Index of the first recorded call equal to `entry`.
    pub fn call_index(&self, entry: &str) -> Option<usize> {
        self.state.borrow().calls.iter().position(|call| call == entry)
    }

    pub fn violations(&self) -> Vec<String> {
        self.state.borrow().violations.clone()
    }

    pub fn last_begin_usage(&self) -> Option<vk::CommandBufferUsageFlags> {
        self.state.borrow().last_begin_usage
    }

    pub fn swapchain_records(&self) -> Vec<SwapchainRecord> {
        self.state.borrow().swapchain_records.clone()
    }

    pub fn submissions(&self) -> Vec<SubmitRecord> {
        self.state.borrow().submissions.clone()
    }

    pub fn presents(&self) -> Vec<PresentRecord> {
        self.state.borrow().presents.clone()
    }

    pub fn barriers(&self) -> Vec<BarrierRecord> {
        self.state.borrow().barriers.clone()
    }

    pub fn renderings(&self) -> Vec<RenderingRecord> {
        self.state.borrow().renderings.clone()
    }

    pub fn dynamic_states(&self) -> Vec<DynamicState> {
        self.state.borrow().dynamic_states.clone()
    }
}

impl Gpu for FakeGpu {
    fn graphics_device(&self) -> &GraphicsDevice {
        &self.device
    }

    fn queues(&self) -> Queues {
        self.queues
    }

    fn create_semaphore(&self, name: &str) -> VkResult<vk::Semaphore> {
        let mut s = self.state.borrow_mut();
        s.inject("create_semaphore")?;
        let raw = s.handle(name);
        s.semaphores.insert(raw);
        s.call(format!("create_semaphore {raw}"));
        Ok(vk::Semaphore::from_raw(raw))
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        let mut s = self.state.borrow_mut();
        let raw = semaphore.as_raw();
        s.call(format!("destroy_semaphore {raw}"));
        if !s.semaphores.remove(&raw) {
            s.violation(format!("destroyed unknown semaphore {raw}"));
        }
    }

    fn create_fence(&self, name: &str, signaled: bool) -> VkResult<vk::Fence> {
        let mut s = self.state.borrow_mut();
        s.inject("create_fence")?;
        let raw = s.handle(name);
        let state = if signaled {
            FenceState::Signaled
        } else {
            FenceState::Reset
        };
        s.fences.insert(raw, state);
        s.call(format!("create_fence {raw}"));
        Ok(vk::Fence::from_raw(raw))
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        let mut s = self.state.borrow_mut();
        let raw = fence.as_raw();
        s.call(format!("destroy_fence {raw}"));
        match s.fences.remove(&raw) {
            Some(FenceState::Pending) => {
                s.violation(format!("destroyed fence {raw} while work is pending"))
            }
            Some(_) => {}
            None => s.violation(format!("destroyed unknown fence {raw}")),
        }
    }

    fn wait_for_fence(&self, fence: vk::Fence, _timeout: u64) -> VkResult<()> {
        let mut s = self.state.borrow_mut();
        s.inject("wait_for_fence")?;
        let raw = fence.as_raw();
        s.call(format!("wait_for_fence {raw}"));
        match s.fences.get(&raw).copied() {
            Some(FenceState::Pending) => {
                s.fences.insert(raw, FenceState::Signaled);
            }
            Some(FenceState::Signaled) => {}
            Some(FenceState::Reset) => {
                s.violation(format!("waited on fence {raw} that can never signal"))
            }
            None => s.violation(format!("waited on unknown fence {raw}")),
        }
        Ok(())
    }

    fn reset_fence(&self, fence: vk::Fence) -> VkResult<()> {
        let mut s = self.state.borrow_mut();
        s.inject("reset_fence")?;
        let raw = fence.as_raw();
        s.call(format!("reset_fence {raw}"));
        match s.fences.get(&raw).copied() {
            Some(FenceState::Pending) => s.violation(format!("reset fence {raw} with pending work")),
            Some(_) => {
                s.fences.insert(raw, FenceState::Reset);
            }
            None => s.violation(format!("reset unknown fence {raw}")),
        }
        Ok(())
    }

    fn wait_idle(&self) -> VkResult<()> {
        let mut s = self.state.borrow_mut();
        s.inject("wait_idle")?;
        s.call("wait_idle".to_string());
        s.complete_all();
        Ok(())
    }

    fn allocate_command_buffer(
        &self,
        name: &str,
        _level: vk::CommandBufferLevel,
    ) -> VkResult<vk::CommandBuffer> {
        let mut s = self.state.borrow_mut();
        s.inject("allocate_command_buffer")?;
        let raw = s.handle(name);
        s.command_buffers.insert(raw, RecordState::Initial);
        s.call(format!("allocate_command_buffer {raw}"));
        Ok(vk::CommandBuffer::from_raw(raw))
    }

    fn free_command_buffer(&self, command_buffer: vk::CommandBuffer) {
        let mut s = self.state.borrow_mut();
        let raw = command_buffer.as_raw();
        s.call(format!("free_command_buffer {raw}"));
        if s.command_buffers.remove(&raw).is_none() {
            s.violation(format!("freed unknown command buffer {raw}"));
        }
    }

    fn begin_command_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        usage: vk::CommandBufferUsageFlags,
    ) -> VkResult<()> {
        let mut s = self.state.borrow_mut();
        s.inject("begin_command_buffer")?;
        let raw = command_buffer.as_raw();
        s.call(format!("begin_command_buffer {raw}"));
        s.last_begin_usage = Some(usage);
        match s.command_buffers.get(&raw).copied() {
            Some(RecordState::Recording) => {
                s.violation(format!("began command buffer {raw} while recording"))
            }
            Some(_) => {
                s.command_buffers.insert(raw, RecordState::Recording);
            }
            None => s.violation(format!("began unknown command buffer {raw}")),
        }
        Ok(())
    }

    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VkResult<()> {
        let mut s = self.state.borrow_mut();
        s.inject("end_command_buffer")?;
        let raw = command_buffer.as_raw();
        s.call(format!("end_command_buffer {raw}"));
        s.expect_recording(command_buffer, "end_command_buffer");
        if s.command_buffers.contains_key(&raw) {
            s.command_buffers.insert(raw, RecordState::Executable);
        }
        Ok(())
    }

    fn reset_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VkResult<()> {
        let mut s = self.state.borrow_mut();
        s.inject("reset_command_buffer")?;
        let raw = command_buffer.as_raw();
        s.call(format!("reset_command_buffer {raw}"));
        if s.command_buffers.contains_key(&raw) {
            s.command_buffers.insert(raw, RecordState::Initial);
        } else {
            s.violation(format!("reset unknown command buffer {raw}"));
        }
        Ok(())
    }

    fn queue_submit(
        &self,
        queue: vk::Queue,
        submission: &Submission<'_>,
        fence: vk::Fence,
    ) -> VkResult<()> {
        let mut s = self.state.borrow_mut();
        s.inject("queue_submit")?;
        s.call(format!("queue_submit {}", fence.as_raw()));

        for cb in submission.command_buffers {
            if s.command_buffers.get(&cb.as_raw()) != Some(&RecordState::Executable) {
                s.violation(format!("submitted command buffer {} that is not executable", cb.as_raw()));
            }
        }
        if fence != vk::Fence::null() {
            match s.fences.get(&fence.as_raw()).copied() {
                Some(FenceState::Reset) => {
                    s.fences.insert(fence.as_raw(), FenceState::Pending);
                }
                other => s.violation(format!(
                    "submitted with fence {} in state {:?}",
                    fence.as_raw(),
                    other
                )),
            }
        }

        s.submissions.push(SubmitRecord {
            queue,
            command_buffers: submission.command_buffers.to_vec(),
            wait_semaphores: submission.wait_semaphores.to_vec(),
            wait_stages: submission.wait_stages.to_vec(),
            signal_semaphores: submission.signal_semaphores.to_vec(),
            fence,
        });
        Ok(())
    }

    fn queue_wait_idle(&self, _queue: vk::Queue) -> VkResult<()> {
        let mut s = self.state.borrow_mut();
        s.inject("queue_wait_idle")?;
        s.call("queue_wait_idle".to_string());
        s.complete_all();
        Ok(())
    }

    fn surface_capabilities(&self) -> VkResult<vk::SurfaceCapabilitiesKHR> {
        let mut s = self.state.borrow_mut();
        s.inject("surface_capabilities")?;
        Ok(s.capabilities)
    }

    fn create_swapchain(&self, info: &vk::SwapchainCreateInfoKHR) -> VkResult<vk::SwapchainKHR> {
        let mut s = self.state.borrow_mut();
        s.inject("create_swapchain")?;
        let old = info.old_swapchain;
        if old != vk::SwapchainKHR::null() && !s.swapchains.contains_key(&old.as_raw()) {
            s.violation(format!("old swapchain {} is not alive", old.as_raw()));
        }

        let raw = s.handle("Swapchain");
        let images = (0..info.min_image_count)
            .map(|i| vk::Image::from_raw(s.handle(&format!("SwapchainImage{i}"))))
            .collect::<Vec<_>>();
        s.swapchains.insert(raw, images);
        s.call(format!("create_swapchain {raw} old={}", old.as_raw()));

        let handle = vk::SwapchainKHR::from_raw(raw);
        s.swapchain_records.push(SwapchainRecord {
            handle,
            old,
            extent: info.image_extent,
            min_image_count: info.min_image_count,
            sharing_mode: info.image_sharing_mode,
            present_mode: info.present_mode,
        });
        Ok(handle)
    }

    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> VkResult<Vec<vk::Image>> {
        let mut s = self.state.borrow_mut();
        s.inject("swapchain_images")?;
        match s.swapchains.get(&swapchain.as_raw()) {
            Some(images) => Ok(images.clone()),
            None => {
                s.violation(format!("queried images of unknown swapchain {}", swapchain.as_raw()));
                Err(vk::Result::ERROR_SURFACE_LOST_KHR)
            }
        }
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        let mut s = self.state.borrow_mut();
        let raw = swapchain.as_raw();
        s.call(format!("destroy_swapchain {raw}"));
        if s.swapchains.remove(&raw).is_none() {
            s.violation(format!("destroyed unknown swapchain {raw}"));
        }
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        _timeout: u64,
        _semaphore: vk::Semaphore,
        _fence: vk::Fence,
    ) -> VkResult<(u32, bool)> {
        let mut s = self.state.borrow_mut();
        let raw = swapchain.as_raw();
        s.call(format!("acquire_next_image {raw}"));
        let image_count = match s.swapchains.get(&raw) {
            Some(images) => images.len() as u32,
            None => {
                s.violation(format!("acquired from unknown swapchain {raw}"));
                return Err(vk::Result::ERROR_SURFACE_LOST_KHR);
            }
        };

        let result = s.acquire_script.pop_front().unwrap_or(vk::Result::SUCCESS);
        let suboptimal = match result {
            vk::Result::SUCCESS => false,
            vk::Result::SUBOPTIMAL_KHR => true,
            err => return Err(err),
        };
        let next = s.next_acquire.entry(raw).or_insert(0);
        let index = *next % image_count.max(1);
        *next += 1;
        Ok((index, suboptimal))
    }

    fn queue_present(
        &self,
        queue: vk::Queue,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    ) -> VkResult<bool> {
        let mut s = self.state.borrow_mut();
        s.call(format!("queue_present {}", swapchain.as_raw()));
        if !s.swapchains.contains_key(&swapchain.as_raw()) {
            s.violation(format!("presented to unknown swapchain {}", swapchain.as_raw()));
        }
        s.presents.push(PresentRecord {
            queue,
            swapchain,
            image_index,
            wait_semaphore,
        });
        match s.present_script.pop_front().unwrap_or(vk::Result::SUCCESS) {
            vk::Result::SUCCESS => Ok(false),
            vk::Result::SUBOPTIMAL_KHR => Ok(true),
            err => Err(err),
        }
    }

    fn create_image(&self, desc: &ImageDesc<'_>) -> VkResult<vk::Image> {
        let mut s = self.state.borrow_mut();
        s.inject("create_image")?;
        let raw = s.handle(desc.name);
        s.images.insert(raw);
        s.call(format!("create_image {raw}"));
        Ok(vk::Image::from_raw(raw))
    }

    fn destroy_image(&self, image: vk::Image) {
        let mut s = self.state.borrow_mut();
        let raw = image.as_raw();
        s.call(format!("destroy_image {raw}"));
        if !s.images.remove(&raw) {
            s.violation(format!("destroyed unknown image {raw}"));
        }
    }

    fn create_image_view(
        &self,
        name: &str,
        _image: vk::Image,
        _format: vk::Format,
        _aspect: vk::ImageAspectFlags,
    ) -> VkResult<vk::ImageView> {
        let mut s = self.state.borrow_mut();
        s.inject("create_image_view")?;
        let raw = s.handle(name);
        s.image_views.insert(raw);
        s.call(format!("create_image_view {raw}"));
        Ok(vk::ImageView::from_raw(raw))
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        let mut s = self.state.borrow_mut();
        let raw = view.as_raw();
        s.call(format!("destroy_image_view {raw}"));
        if !s.image_views.remove(&raw) {
            s.violation(format!("destroyed unknown image view {raw}"));
        }
    }

    fn cmd_set_dynamic_state(&self, command_buffer: vk::CommandBuffer, state: &DynamicState) {
        let mut s = self.state.borrow_mut();
        s.expect_recording(command_buffer, "cmd_set_dynamic_state");
        s.dynamic_states.push(*state);
    }

    fn cmd_image_barrier(
        &self,
        command_buffer: vk::CommandBuffer,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        barrier: &vk::ImageMemoryBarrier,
    ) {
        let mut s = self.state.borrow_mut();
        s.expect_recording(command_buffer, "cmd_image_barrier");
        s.barriers.push(BarrierRecord {
            image: barrier.image,
            old_layout: barrier.old_layout,
            new_layout: barrier.new_layout,
            src_stage,
            dst_stage,
        });
    }

    fn cmd_begin_rendering(&self, command_buffer: vk::CommandBuffer, info: &vk::RenderingInfo) {
        let mut s = self.state.borrow_mut();
        s.expect_recording(command_buffer, "cmd_begin_rendering");
        s.call(format!("cmd_begin_rendering {}", command_buffer.as_raw()));

        // SAFETY: the attachment pointers come from the caller's builder and
        // outlive this call.
        let (color_view, clear_color) = if info.color_attachment_count > 0 {
            let color = unsafe { &*info.p_color_attachments };
            (color.image_view, unsafe { color.clear_value.color.float32 })
        } else {
            (vk::ImageView::null(), [0.0; 4])
        };
        let depth_view = if info.p_depth_attachment.is_null() {
            vk::ImageView::null()
        } else {
            unsafe { (*info.p_depth_attachment).image_view }
        };

        s.renderings.push(RenderingRecord {
            render_area: info.render_area,
            color_view,
            depth_view,
            clear_color,
        });
    }

    fn cmd_end_rendering(&self, command_buffer: vk::CommandBuffer) {
        let mut s = self.state.borrow_mut();
        s.expect_recording(command_buffer, "cmd_end_rendering");
        s.call(format!("cmd_end_rendering {}", command_buffer.as_raw()));
    }
}
