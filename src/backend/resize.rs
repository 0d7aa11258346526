// Resize coordination - window-resized events to swapchain rebuilds
//
// The subscription lives from backend init to deinit. The handler only
// records the newest size; `apply` hands it to the frame context between
// frames, so a burst of resize events turns into one rebuild.

use std::cell::Cell;
use std::rc::Rc;

use super::error::BackendResult;
use super::frame::FrameContext;
use super::gpu::Gpu;
use crate::events::{Event, EventBus, EventKind, HandlerId};

fn pixels((width, height): (f32, f32)) -> (u32, u32) {
    (width.max(0.0) as u32, height.max(0.0) as u32)
}

pub struct ResizeCoordinator {
    id: HandlerId,
    pending: Rc<Cell<Option<(f32, f32)>>>,
}

impl ResizeCoordinator {
    pub fn attach(bus: &mut EventBus) -> Self {
        let pending = Rc::new(Cell::new(None));
        let sink = pending.clone();
        let id = bus.subscribe(
            EventKind::WindowResized,
            Box::new(move |event| {
                if let Event::WindowResized { width, height } = *event {
                    sink.set(Some((width, height)));
                }
            }),
        );
        Self { id, pending }
    }

    /// The most recent size received since the last call, in whole pixels.
    pub fn take_pending(&self) -> Option<(u32, u32)> {
        self.pending.take().map(pixels)
    }

    /// Rebuild `frames` for the latest pending size. Returns whether
    /// anything was rebuilt.
    ///
    /// A failed rebuild puts the size back unless a newer one has arrived,
    /// so the next call tries again.
    pub fn apply<G: Gpu>(&self, frames: &mut FrameContext<G>) -> BackendResult<bool> {
        let Some(pending) = self.pending.take() else {
            return Ok(false);
        };
        let (width, height) = pixels(pending);
        let result = frames.handle_resize(width, height);
        if result.is_err() && self.pending.get().is_none() {
            self.pending.set(Some(pending));
        }
        result
    }

    /// Unsubscribe. Consuming `self` makes a second detach impossible.
    pub fn detach(self, bus: &mut EventBus) {
        if !bus.unsubscribe(EventKind::WindowResized, self.id) {
            log::warn!("Resize handler was already unsubscribed");
        }
    }
}
