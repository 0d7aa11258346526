// Backend errors
//
// Every fallible backend operation returns a BackendError. Vulkan failures
// keep the raw result code so logs carry enough context to diagnose them.

use ash::vk;
use thiserror::Error;

use super::command_buffer::CommandBufferState;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("{operation} failed: {result}")]
    Vulkan {
        operation: &'static str,
        result: vk::Result,
    },

    #[error("command buffer '{name}' cannot go from {from} to {to}")]
    InvalidTransition {
        name: String,
        from: CommandBufferState,
        to: CommandBufferState,
    },

    #[error("swapchain is out of date")]
    SwapchainOutOfDate,

    #[error("no suitable GPU found")]
    NoSuitableDevice,

    #[error("no frame resources for slot {0}")]
    MissingFrameSlot(usize),

    #[error("no swapchain image has been acquired for this frame")]
    NoAcquiredImage,

    #[error("backend is not initialized")]
    NotInitialized,
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Attach the failing operation's name to a raw `vk::Result`.
pub trait VkResultExt<T> {
    fn op(self, operation: &'static str) -> BackendResult<T>;
}

impl<T> VkResultExt<T> for Result<T, vk::Result> {
    fn op(self, operation: &'static str) -> BackendResult<T> {
        self.map_err(|result| BackendError::Vulkan { operation, result })
    }
}

impl BackendError {
    /// The Vulkan result code behind this error, if any.
    pub fn vk_result(&self) -> Option<vk::Result> {
        match self {
            BackendError::Vulkan { result, .. } => Some(*result),
            BackendError::SwapchainOutOfDate => Some(vk::Result::ERROR_OUT_OF_DATE_KHR),
            _ => None,
        }
    }
}
