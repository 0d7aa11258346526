// Renderer host - backend plugin boundary
//
// A backend is looked up by name in a static registry, initialised once,
// driven through the four frame stages, and deinitialised once. The host
// owns the backend; there is no global backend state.

use anyhow::{anyhow, Context, Result};

use crate::backend::VulkanBackend;
use crate::events::EventBus;
use crate::platform::Window;

/// Registry name of the Vulkan backend.
pub const VULKAN_BACKEND: &str = "VulkanRendererBackend";

/// Settings handed to a backend at init.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendConfig {
    /// Reported to the driver as the application name.
    pub application_name: String,
    /// Enable validation layers (debug builds only).
    pub validation: bool,
    pub clear_color: [f32; 4],
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            application_name: "Vulkan Renderer".to_string(),
            validation: true,
            clear_color: crate::backend::frame::DEFAULT_CLEAR_COLOR,
        }
    }
}

/// Per-frame data passed through the frame stages.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FramePacket {
    /// Frames completed so far.
    pub frame_number: u64,
    /// Swapchain image being rendered, set by `frame_prepare`.
    pub image_index: Option<u32>,
}

/// The lifecycle and frame stages every renderer backend provides.
///
/// Frame stages return false on failure; the caller skips the rest of the
/// frame and tries again next tick.
pub trait RendererBackend {
    fn init(config: &BackendConfig, window: &Window, bus: &mut EventBus) -> Result<Self>
    where
        Self: Sized;
    fn deinit(&mut self, bus: &mut EventBus);
    fn frame_prepare(&mut self, packet: &mut FramePacket) -> bool;
    fn command_list_begin(&mut self, packet: &mut FramePacket) -> bool;
    fn command_list_end(&mut self, packet: &mut FramePacket) -> bool;
    fn frame_render(&mut self, packet: &mut FramePacket) -> bool;
}

type BackendFactory =
    fn(&BackendConfig, &Window, &mut EventBus) -> Result<Box<dyn RendererBackend>>;

fn create<B: RendererBackend + 'static>(
    config: &BackendConfig,
    window: &Window,
    bus: &mut EventBus,
) -> Result<Box<dyn RendererBackend>> {
    Ok(Box::new(B::init(config, window, bus)?))
}

const REGISTRY: &[(&str, BackendFactory)] =
    &[(VULKAN_BACKEND, create::<VulkanBackend> as BackendFactory)];

fn lookup(name: &str) -> Option<BackendFactory> {
    REGISTRY
        .iter()
        .find(|(registered, _)| *registered == name)
        .map(|(_, factory)| *factory)
}

/// Owning handle to a loaded backend.
pub struct Renderer {
    name: String,
    backend: Option<Box<dyn RendererBackend>>,
    packet: FramePacket,
}

impl Renderer {
    /// Load the backend registered as `name` and initialise it.
    pub fn load(
        name: &str,
        config: &BackendConfig,
        window: &Window,
        bus: &mut EventBus,
    ) -> Result<Self> {
        let factory = lookup(name).ok_or_else(|| anyhow!("Unknown renderer backend '{}'", name))?;
        let backend = factory(config, window, bus)
            .with_context(|| format!("Failed to initialize renderer backend '{}'", name))?;
        log::info!("Loaded renderer backend '{}'", name);
        Ok(Self::from_backend(name, backend))
    }

    /// Wrap an already initialised backend.
    pub fn from_backend(name: &str, backend: Box<dyn RendererBackend>) -> Self {
        Self {
            name: name.to_string(),
            backend: Some(backend),
            packet: FramePacket::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_loaded(&self) -> bool {
        self.backend.is_some()
    }

    pub fn frame_number(&self) -> u64 {
        self.packet.frame_number
    }

    /// Run the four frame stages in order. Stops at the first failing stage.
    pub fn draw_frame(&mut self) -> bool {
        let Some(backend) = self.backend.as_mut() else {
            return false;
        };
        let packet = &mut self.packet;

        let ok = backend.frame_prepare(packet)
            && backend.command_list_begin(packet)
            && backend.command_list_end(packet)
            && backend.frame_render(packet);
        if ok {
            packet.frame_number += 1;
        }
        packet.image_index = None;
        ok
    }

    /// Deinitialise and release the backend. Later calls do nothing.
    pub fn shutdown(&mut self, bus: &mut EventBus) {
        if let Some(mut backend) = self.backend.take() {
            log::info!("Shutting down renderer backend '{}'", self.name);
            backend.deinit(bus);
        }
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        if self.backend.is_some() {
            log::warn!(
                "Renderer backend '{}' dropped without shutdown; deinit skipped",
                self.name
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    /// Records stage calls and fails the stage named in `fail`.
    struct ScriptedBackend {
        calls: Rc<RefCell<Vec<&'static str>>>,
        fail: Option<&'static str>,
    }

    impl ScriptedBackend {
        fn stage(&mut self, name: &'static str) -> bool {
            self.calls.borrow_mut().push(name);
            self.fail != Some(name)
        }
    }

    impl RendererBackend for ScriptedBackend {
        fn init(_: &BackendConfig, _: &Window, _: &mut EventBus) -> Result<Self> {
            Ok(Self {
                calls: Rc::default(),
                fail: None,
            })
        }

        fn deinit(&mut self, _bus: &mut EventBus) {
            self.calls.borrow_mut().push("deinit");
        }

        fn frame_prepare(&mut self, packet: &mut FramePacket) -> bool {
            packet.image_index = Some(0);
            self.stage("frame_prepare")
        }

        fn command_list_begin(&mut self, _packet: &mut FramePacket) -> bool {
            self.stage("command_list_begin")
        }

        fn command_list_end(&mut self, _packet: &mut FramePacket) -> bool {
            self.stage("command_list_end")
        }

        fn frame_render(&mut self, _packet: &mut FramePacket) -> bool {
            self.stage("frame_render")
        }
    }

    fn renderer(fail: Option<&'static str>) -> (Renderer, Rc<RefCell<Vec<&'static str>>>) {
        let calls = Rc::new(RefCell::new(Vec::new()));
        let backend = ScriptedBackend {
            calls: calls.clone(),
            fail,
        };
        (Renderer::from_backend("Scripted", Box::new(backend)), calls)
    }

    #[test]
    fn draw_frame_runs_stages_in_order() {
        let (mut renderer, calls) = renderer(None);
        assert!(renderer.draw_frame());
        assert_eq!(
            *calls.borrow(),
            vec![
                "frame_prepare",
                "command_list_begin",
                "command_list_end",
                "frame_render"
            ]
        );
        assert_eq!(renderer.frame_number(), 1);
        renderer.shutdown(&mut EventBus::new());
    }

    #[test]
    fn draw_frame_stops_at_first_failure() {
        let (mut renderer, calls) = renderer(Some("command_list_begin"));
        assert!(!renderer.draw_frame());
        assert_eq!(*calls.borrow(), vec!["frame_prepare", "command_list_begin"]);
        assert_eq!(renderer.frame_number(), 0);
        renderer.shutdown(&mut EventBus::new());
    }

    #[test]
    fn shutdown_deinits_exactly_once() {
        let (mut renderer, calls) = renderer(None);
        let mut bus = EventBus::new();
        renderer.shutdown(&mut bus);
        renderer.shutdown(&mut bus);
        assert_eq!(*calls.borrow(), vec!["deinit"]);
        assert!(!renderer.is_loaded());
        assert!(!renderer.draw_frame());
    }

    #[test]
    fn registry_knows_the_vulkan_backend() {
        assert!(lookup(VULKAN_BACKEND).is_some());
        assert!(lookup("OpenGLRendererBackend").is_none());
    }
}
