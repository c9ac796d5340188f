//! Event fan-out
//!
//! Engine events re-tagged with the logical tab id and backend name. Two ways
//! to consume them:
//!
//! 1. **Listeners**: callbacks run synchronously, in registration order. A
//!    listener that fails or panics is logged and skipped; the rest still run.
//! 2. **Streams**: [`EventFanout::subscribe`] returns a bounded broadcast
//!    receiver. Slow receivers lag instead of blocking delivery.

use parking_lot::RwLock;
use serde::Serialize;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::broadcast;

use axiom_engine::EventKind;

/// An event as delivered to the application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TabEvent {
    /// Wire name, e.g. `title-updated`
    pub event: String,
    /// `None` for engine-wide events such as lifecycle changes
    pub tab_id: Option<String>,
    pub backend_name: String,
    pub payload: EventKind,
}

impl TabEvent {
    pub fn new(tab_id: Option<String>, backend_name: &str, payload: EventKind) -> Self {
        Self {
            event: payload.name().to_string(),
            tab_id,
            backend_name: backend_name.to_string(),
            payload,
        }
    }
}

pub type Listener = Arc<dyn Fn(&TabEvent) -> anyhow::Result<()> + Send + Sync>;

type ListenerList = RwLock<Vec<(u64, Listener)>>;

/// RAII handle that removes its listener when dropped.
pub struct ListenerHandle {
    id: u64,
    listeners: Weak<ListenerList>,
}

impl ListenerHandle {
    /// Explicitly remove the listener, equivalent to dropping the handle.
    pub fn unsubscribe(self) {}
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        if let Some(listeners) = self.listeners.upgrade() {
            listeners.write().retain(|(id, _)| *id != self.id);
        }
    }
}

impl std::fmt::Debug for ListenerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerHandle")
            .field("id", &self.id)
            .field("active", &(self.listeners.strong_count() > 0))
            .finish()
    }
}

pub struct EventFanout {
    sender: broadcast::Sender<TabEvent>,
    listeners: Arc<ListenerList>,
    next_id: AtomicU64,
}

impl EventFanout {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            listeners: Arc::new(RwLock::new(Vec::new())),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn add_listener<F>(&self, listener: F) -> ListenerHandle
    where
        F: Fn(&TabEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.write().push((id, Arc::new(listener)));
        ListenerHandle {
            id,
            listeners: Arc::downgrade(&self.listeners),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TabEvent> {
        self.sender.subscribe()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    pub fn publish(&self, event: TabEvent) {
        // Listeners may register or drop handles while being called
        let listeners: Vec<Listener> = self
            .listeners
            .read()
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();

        for listener in listeners {
            match catch_unwind(AssertUnwindSafe(|| listener(&event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!(event = %event.event, error = %e, "Event listener failed");
                }
                Err(_) => {
                    tracing::warn!(event = %event.event, "Event listener panicked");
                }
            }
        }

        // No receivers is fine
        let _ = self.sender.send(event);
    }
}
