//! Vulkan frame backend: device selection, swapchain lifecycle, per-frame
//! synchronization and the command buffer state machine, behind a renderer
//! backend interface a host drives one frame at a time.

pub mod backend;
pub mod config;
pub mod events;
pub mod platform;
pub mod renderer;

pub use backend::{BackendError, BackendResult, VulkanBackend};
pub use config::Config;
pub use events::{Event, EventBus, EventKind};
pub use platform::Window;
pub use renderer::{BackendConfig, FramePacket, Renderer, RendererBackend};
