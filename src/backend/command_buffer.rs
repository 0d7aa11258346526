// Command buffers - lifecycle state machine
//
// NotAllocated -> Ready -> Recording -> Rendering -> Recording -> Ended
//     -> Submitted -> (reset) -> Ready
//
// Every operation goes through `transition`, which checks the current state
// before touching the GPU. An illegal call fails and leaves the state as it was.

use ash::vk;
use std::fmt;

use super::error::{BackendError, BackendResult, VkResultExt};
use super::gpu::{Gpu, Submission};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandBufferState {
    NotAllocated,
    Ready,
    Recording,
    /// Inside a dynamic rendering scope.
    Rendering,
    Ended,
    Submitted,
}

impl fmt::Display for CommandBufferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Usage flags for `CommandBuffer::begin`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BeginFlags {
    pub single_use: bool,
    pub renderpass_continue: bool,
    pub simultaneous_use: bool,
}

impl BeginFlags {
    pub fn usage(&self) -> vk::CommandBufferUsageFlags {
        let mut flags = vk::CommandBufferUsageFlags::empty();
        if self.single_use {
            flags |= vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT;
        }
        if self.renderpass_continue {
            flags |= vk::CommandBufferUsageFlags::RENDER_PASS_CONTINUE;
        }
        if self.simultaneous_use {
            flags |= vk::CommandBufferUsageFlags::SIMULTANEOUS_USE;
        }
        flags
    }
}

/// A primary command buffer from the shared graphics pool.
#[derive(Debug)]
pub struct CommandBuffer {
    name: String,
    handle: vk::CommandBuffer,
    state: CommandBufferState,
}

impl CommandBuffer {
    /// An unallocated command buffer.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            handle: vk::CommandBuffer::null(),
            state: CommandBufferState::NotAllocated,
        }
    }

    /// Create and allocate in one step.
    pub fn allocated<G: Gpu + ?Sized>(gpu: &G, name: impl Into<String>) -> BackendResult<Self> {
        let mut command_buffer = Self::new(name);
        command_buffer.allocate(gpu)?;
        Ok(command_buffer)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn handle(&self) -> vk::CommandBuffer {
        self.handle
    }

    pub fn state(&self) -> CommandBufferState {
        self.state
    }

    /// Fail unless the buffer is currently in one of `from`.
    pub fn check_transition(
        &self,
        from: &[CommandBufferState],
        to: CommandBufferState,
    ) -> BackendResult<()> {
        if from.contains(&self.state) {
            Ok(())
        } else {
            Err(BackendError::InvalidTransition {
                name: self.name.clone(),
                from: self.state,
                to,
            })
        }
    }

    fn transition<T>(
        &mut self,
        from: &[CommandBufferState],
        to: CommandBufferState,
        op: impl FnOnce(vk::CommandBuffer) -> BackendResult<T>,
    ) -> BackendResult<T> {
        self.check_transition(from, to)?;
        let value = op(self.handle)?;
        self.state = to;
        Ok(value)
    }

    pub fn allocate<G: Gpu + ?Sized>(&mut self, gpu: &G) -> BackendResult<()> {
        let name = self.name.clone();
        let handle = self.transition(
            &[CommandBufferState::NotAllocated],
            CommandBufferState::Ready,
            |_| {
                gpu.allocate_command_buffer(&name, vk::CommandBufferLevel::PRIMARY)
                    .op("vkAllocateCommandBuffers")
            },
        )?;
        self.handle = handle;
        Ok(())
    }

    pub fn begin<G: Gpu + ?Sized>(&mut self, gpu: &G, flags: BeginFlags) -> BackendResult<()> {
        self.transition(
            &[CommandBufferState::Ready],
            CommandBufferState::Recording,
            |cb| gpu.begin_command_buffer(cb, flags.usage()).op("vkBeginCommandBuffer"),
        )
    }

    /// Open a dynamic rendering scope.
    pub fn begin_rendering<G: Gpu + ?Sized>(
        &mut self,
        gpu: &G,
        info: &vk::RenderingInfo,
    ) -> BackendResult<()> {
        self.transition(
            &[CommandBufferState::Recording],
            CommandBufferState::Rendering,
            |cb| {
                gpu.cmd_begin_rendering(cb, info);
                Ok(())
            },
        )
    }

    pub fn end_rendering<G: Gpu + ?Sized>(&mut self, gpu: &G) -> BackendResult<()> {
        self.transition(
            &[CommandBufferState::Rendering],
            CommandBufferState::Recording,
            |cb| {
                gpu.cmd_end_rendering(cb);
                Ok(())
            },
        )
    }

    pub fn end<G: Gpu + ?Sized>(&mut self, gpu: &G) -> BackendResult<()> {
        self.transition(
            &[CommandBufferState::Recording],
            CommandBufferState::Ended,
            |cb| gpu.end_command_buffer(cb).op("vkEndCommandBuffer"),
        )
    }

    /// Bookkeeping only; the caller does the actual submit.
    pub fn mark_submitted(&mut self) -> BackendResult<()> {
        self.transition(
            &[CommandBufferState::Ended],
            CommandBufferState::Submitted,
            |_| Ok(()),
        )
    }

    pub fn reset<G: Gpu + ?Sized>(&mut self, gpu: &G) -> BackendResult<()> {
        self.transition(
            &[CommandBufferState::Submitted, CommandBufferState::Ready],
            CommandBufferState::Ready,
            |cb| gpu.reset_command_buffer(cb).op("vkResetCommandBuffer"),
        )
    }

    /// Valid from any state.
    pub fn free<G: Gpu + ?Sized>(&mut self, gpu: &G) {
        if self.handle != vk::CommandBuffer::null() {
            gpu.free_command_buffer(self.handle);
            self.handle = vk::CommandBuffer::null();
        }
        self.state = CommandBufferState::NotAllocated;
    }

    /// Allocate a buffer and begin it for one-off work.
    pub fn begin_single_use<G: Gpu + ?Sized>(
        gpu: &G,
        name: impl Into<String>,
    ) -> BackendResult<Self> {
        let mut command_buffer = Self::allocated(gpu, name)?;
        let flags = BeginFlags {
            single_use: true,
            ..Default::default()
        };
        if let Err(e) = command_buffer.begin(gpu, flags) {
            command_buffer.free(gpu);
            return Err(e);
        }
        Ok(command_buffer)
    }

    /// End, submit, wait for the queue to drain, then free.
    ///
    /// The buffer is freed whether or not any step fails.
    pub fn end_single_use<G: Gpu + ?Sized>(mut self, gpu: &G, queue: vk::Queue) -> BackendResult<()> {
        let result = self.submit_and_wait(gpu, queue);
        self.free(gpu);
        result
    }

    fn submit_and_wait<G: Gpu + ?Sized>(&mut self, gpu: &G, queue: vk::Queue) -> BackendResult<()> {
        self.end(gpu)?;
        let command_buffers = [self.handle];
        let submission = Submission {
            command_buffers: &command_buffers,
            ..Default::default()
        };
        gpu.queue_submit(queue, &submission, vk::Fence::null())
            .op("vkQueueSubmit")?;
        gpu.queue_wait_idle(queue).op("vkQueueWaitIdle")?;
        self.mark_submitted()
    }
}
