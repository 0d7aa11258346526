// =============================================================================
// VULKAN FRAME BACKEND - Demo host
// =============================================================================
//
// Opens a window, loads the renderer backend named in config.toml and draws
// cleared frames until the window is closed or Escape is pressed.
//
// FRAME FLOW (per redraw):
// 1. frame_prepare       wait for the frame slot, acquire a swapchain image
// 2. command_list_begin  start recording, open the render scope
// 3. command_list_end    close the render scope, finish recording
// 4. frame_render        submit and present
//
// Window resizes are published on the event bus; the backend picks them up
// at the start of the next frame.
//
// =============================================================================

use anyhow::Result;
use std::sync::Arc;
use std::time::Instant;
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    window::{Window as WinitWindow, WindowAttributes},
};

use vulkan_frame_backend::{Config, Event, EventBus, Renderer, Window};

fn main() -> Result<()> {
    let config = Config::load();

    init_logging(&config);
    log::info!("Starting Vulkan frame backend demo");
    log::info!(
        "Window: {}x{}, backend: {}",
        config.window.width,
        config.window.height,
        config.renderer.backend
    );

    let event_loop = EventLoop::new()?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;
    Ok(())
}

/// RUST_LOG wins over the configured filter.
fn init_logging(config: &Config) {
    env_logger::Builder::new()
        .parse_filters(&config.logging.filter)
        .parse_default_env()
        .init();
}

/// Field order matters for Drop: the renderer goes before the window it
/// presents to.
struct App {
    config: Config,
    renderer: Option<Renderer>,
    bus: EventBus,
    window: Option<Arc<WinitWindow>>,

    // FPS tracking
    frame_count: u32,
    last_fps_update: Instant,
}

impl App {
    fn new(config: Config) -> Self {
        Self {
            config,
            renderer: None,
            bus: EventBus::new(),
            window: None,
            frame_count: 0,
            last_fps_update: Instant::now(),
        }
    }

    fn init_renderer(&mut self, window: &Arc<WinitWindow>) -> Result<Renderer> {
        let size = window.inner_size();
        let descriptor = Window::from_handles(window.as_ref(), size.width, size.height)?;
        Renderer::load(
            &self.config.renderer.backend,
            &self.config.backend_config(),
            &descriptor,
            &mut self.bus,
        )
    }

    fn shutdown(&mut self, event_loop: &ActiveEventLoop) {
        if let Some(mut renderer) = self.renderer.take() {
            self.bus.publish(&Event::ApplicationQuit);
            renderer.shutdown(&mut self.bus);
        }
        event_loop.exit();
    }

    fn update_fps(&mut self) {
        self.frame_count += 1;

        let now = Instant::now();
        let elapsed = now.duration_since(self.last_fps_update).as_secs_f32();
        if elapsed >= 1.0 {
            let fps = self.frame_count as f32 / elapsed;
            if let Some(ref window) = self.window {
                window.set_title(&format!("{} - {:.0} FPS", self.config.window.title, fps));
            }
            self.frame_count = 0;
            self.last_fps_update = now;
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let window_attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ));

        let window = match event_loop.create_window(window_attributes) {
            Ok(w) => Arc::new(w),
            Err(e) => {
                log::error!("Failed to create window: {:?}", e);
                event_loop.exit();
                return;
            }
        };

        match self.init_renderer(&window) {
            Ok(renderer) => self.renderer = Some(renderer),
            Err(e) => {
                log::error!("Failed to initialize renderer: {:?}", e);
                event_loop.exit();
                return;
            }
        }

        self.window = Some(window);
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                self.shutdown(event_loop);
            }

            WindowEvent::Resized(size) => {
                log::debug!("Window resized to {}x{}", size.width, size.height);
                self.bus.publish(&Event::WindowResized {
                    width: size.width as f32,
                    height: size.height as f32,
                });
            }

            WindowEvent::RedrawRequested => {
                let drawn = self.renderer.as_mut().is_some_and(Renderer::draw_frame);
                if drawn {
                    self.update_fps();
                }
            }

            WindowEvent::KeyboardInput { event, .. } => {
                use winit::keyboard::{KeyCode, PhysicalKey};

                if event.state.is_pressed()
                    && event.physical_key == PhysicalKey::Code(KeyCode::Escape)
                {
                    log::info!("ESC pressed, exiting...");
                    self.shutdown(event_loop);
                }
            }

            _ => {}
        }
    }

    /// Request continuous redraws.
    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(ref window) = self.window {
            window.request_redraw();
        }
    }

    fn exiting(&mut self, event_loop: &ActiveEventLoop) {
        self.shutdown(event_loop);
    }
}
