// Event bus - minimal pub/sub between the host and its subsystems
//
// Handlers are boxed closures keyed by event kind. Subscribing returns an id
// that is the only way to unsubscribe again.

use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    WindowResized,
    ApplicationQuit,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Event {
    /// New client area size in pixels.
    WindowResized { width: f32, height: f32 },
    ApplicationQuit,
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::WindowResized { .. } => EventKind::WindowResized,
            Event::ApplicationQuit => EventKind::ApplicationQuit,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

pub type Handler = Box<dyn FnMut(&Event)>;

#[derive(Default)]
pub struct EventBus {
    next_id: u64,
    handlers: HashMap<EventKind, Vec<(HandlerId, Handler)>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, kind: EventKind, handler: Handler) -> HandlerId {
        self.next_id += 1;
        let id = HandlerId(self.next_id);
        self.handlers.entry(kind).or_default().push((id, handler));
        log::debug!("Subscribed handler {:?} to {:?}", id, kind);
        id
    }

    /// Returns false if `id` was not subscribed to `kind`.
    pub fn unsubscribe(&mut self, kind: EventKind, id: HandlerId) -> bool {
        let Some(handlers) = self.handlers.get_mut(&kind) else {
            return false;
        };
        let before = handlers.len();
        handlers.retain(|(handler_id, _)| *handler_id != id);
        before != handlers.len()
    }

    /// Deliver `event` to every handler of its kind, in subscription order.
    /// Returns how many handlers ran.
    pub fn publish(&mut self, event: &Event) -> usize {
        match self.handlers.get_mut(&event.kind()) {
            Some(handlers) => {
                for (_, handler) in handlers.iter_mut() {
                    handler(event);
                }
                handlers.len()
            }
            None => 0,
        }
    }

    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.handlers.get(&kind).map_or(0, Vec::len)
    }
}
