use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError, Weak,
    },
};

use shared::protocol::{ListEvent, ListEventKind};

type Handler = Arc<dyn Fn(&ListEvent) + Send + Sync>;

/// Routes decoded list events to the handlers registered for their kind.
/// Each mounted view owns its own dispatcher.
#[derive(Default)]
pub struct EventDispatcher {
    handlers: Mutex<HashMap<ListEventKind, Vec<(u64, Handler)>>>,
    next_id: AtomicU64,
}

impl EventDispatcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Adds a handler for `kind`. The handler stays registered until the
    /// returned guard is dropped.
    pub fn register(
        self: &Arc<Self>,
        kind: ListEventKind,
        handler: impl Fn(&ListEvent) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock()
            .entry(kind)
            .or_default()
            .push((id, Arc::new(handler)));
        Subscription {
            dispatcher: Arc::downgrade(self),
            kind,
            id,
        }
    }

    /// Invokes every handler for the event's kind in registration order and
    /// returns how many ran.
    pub fn dispatch(&self, event: &ListEvent) -> usize {
        let handlers: Vec<Handler> = self
            .lock()
            .get(&event.kind())
            .map(|entries| entries.iter().map(|(_, h)| h.clone()).collect())
            .unwrap_or_default();
        for handler in &handlers {
            handler(event);
        }
        handlers.len()
    }

    pub fn handler_count(&self, kind: ListEventKind) -> usize {
        self.lock().get(&kind).map_or(0, Vec::len)
    }

    fn unregister(&self, kind: ListEventKind, id: u64) {
        let mut handlers = self.lock();
        if let Some(entries) = handlers.get_mut(&kind) {
            entries.retain(|(entry_id, _)| *entry_id != id);
            if entries.is_empty() {
                handlers.remove(&kind);
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ListEventKind, Vec<(u64, Handler)>>> {
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[must_use = "dropping a Subscription unregisters its handler"]
pub struct Subscription {
    dispatcher: Weak<EventDispatcher>,
    kind: ListEventKind,
    id: u64,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(dispatcher) = self.dispatcher.upgrade() {
            dispatcher.unregister(self.kind, self.id);
        }
    }
}

#[cfg(test)]
#[path = "tests/dispatcher_tests.rs"]
mod tests;
