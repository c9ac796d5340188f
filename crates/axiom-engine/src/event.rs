//! Engine-originated events
//!
//! Engines publish on a broadcast channel keyed by their backend-local tab id.
//! The orchestrator re-tags each event with the logical tab id before fanning
//! it out.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::lifecycle::LifecycleState;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum EventKind {
    LoadingStart {
        url: String,
    },
    LoadingStop {
        url: String,
    },
    TitleUpdated {
        title: String,
    },
    Navigation {
        url: String,
        can_go_back: bool,
        can_go_forward: bool,
    },
    LoadError {
        url: String,
        reason: String,
    },
    Lifecycle {
        state: LifecycleState,
        reason: Option<String>,
    },
}

impl EventKind {
    /// Wire name delivered to subscribers.
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::LoadingStart { .. } => "loading-start",
            EventKind::LoadingStop { .. } => "loading-stop",
            EventKind::TitleUpdated { .. } => "title-updated",
            EventKind::Navigation { .. } => "navigation",
            EventKind::LoadError { .. } => "load-error",
            EventKind::Lifecycle { .. } => "lifecycle",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineEvent {
    /// Backend-local tab id; `None` for engine-wide events
    pub tab_id: Option<String>,
    pub kind: EventKind,
}

/// Sending half of an engine's event stream.
#[derive(Clone)]
pub struct EventEmitter {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventEmitter {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn emit(&self, tab_id: Option<&str>, kind: EventKind) {
        // No receivers is fine: nobody has subscribed yet
        let _ = self.tx.send(EngineEvent {
            tab_id: tab_id.map(str::to_string),
            kind,
        });
    }

    pub fn tab(&self, tab_id: &str, kind: EventKind) {
        self.emit(Some(tab_id), kind);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(256)
    }
}

impl std::fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEmitter")
            .field("receivers", &self.tx.receiver_count())
            .finish()
    }
}
