//! Engine lifecycle state machine
//!
//! ```text
//! Uninitialized
//!   ↓ initialize
//! Initializing ──→ Degraded (dependency missing)
//!   ↓
//! Ready ──→ Degraded (dependency lost)
//!   ↓ shutdown (from any state)
//! ShuttingDown
//!   ↓
//! Stopped
//! ```

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::event::{EventEmitter, EventKind};
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LifecycleState {
    Uninitialized,
    Initializing,
    /// Accepting content operations
    Ready,
    /// Addressable, but a required external dependency is missing
    Degraded,
    ShuttingDown,
    Stopped,
}

impl LifecycleState {
    pub fn can_transition_to(&self, target: LifecycleState) -> bool {
        use LifecycleState::*;
        match (self, target) {
            (Uninitialized, Initializing) => true,
            (Initializing, Ready) => true,
            (Initializing, Degraded) => true,
            (Ready, Degraded) => true,
            // Shutdown is reachable from everywhere except the terminal states
            (Stopped, ShuttingDown) => false,
            (_, ShuttingDown) => *self != ShuttingDown,
            (ShuttingDown, Stopped) => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Uninitialized => "uninitialized",
            LifecycleState::Initializing => "initializing",
            LifecycleState::Ready => "ready",
            LifecycleState::Degraded => "degraded",
            LifecycleState::ShuttingDown => "shutting-down",
            LifecycleState::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

struct LifecycleInner {
    state: LifecycleState,
    reason: Option<String>,
}

/// Lifecycle cell owned by each engine.
///
/// Transitions are validated and announced on the engine's event stream.
pub struct Lifecycle {
    backend: String,
    inner: RwLock<LifecycleInner>,
    events: EventEmitter,
}

impl Lifecycle {
    pub fn new(backend: impl Into<String>, events: EventEmitter) -> Self {
        Self {
            backend: backend.into(),
            inner: RwLock::new(LifecycleInner {
                state: LifecycleState::Uninitialized,
                reason: None,
            }),
            events,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.inner.read().state
    }

    /// Why the engine is degraded, if it is.
    pub fn reason(&self) -> Option<String> {
        self.inner.read().reason.clone()
    }

    pub fn transition_to(&self, target: LifecycleState, reason: Option<String>) -> Result<()> {
        {
            let mut inner = self.inner.write();
            if !inner.state.can_transition_to(target) {
                return Err(EngineError::InvalidTransition {
                    from: inner.state,
                    to: target,
                });
            }

            tracing::debug!(
                backend = %self.backend,
                from = %inner.state,
                to = %target,
                "Engine state transition"
            );

            inner.state = target;
            inner.reason = reason.clone();
        }

        if target == LifecycleState::Degraded {
            tracing::warn!(
                backend = %self.backend,
                reason = reason.as_deref().unwrap_or(""),
                "Engine degraded"
            );
        }

        self.events.emit(
            None,
            EventKind::Lifecycle {
                state: target,
                reason,
            },
        );

        Ok(())
    }

    /// Move to `Degraded` unless the engine already left `Ready`.
    pub fn degrade(&self, reason: impl Into<String>) {
        if self.state() == LifecycleState::Ready {
            let _ = self.transition_to(LifecycleState::Degraded, Some(reason.into()));
        }
    }

    /// Guard for content operations.
    pub fn ensure_ready(&self) -> Result<()> {
        let inner = self.inner.read();
        if inner.state == LifecycleState::Ready {
            return Ok(());
        }

        Err(EngineError::NotReady {
            backend: self.backend.clone(),
            state: inner.state,
            reason: inner
                .reason
                .clone()
                .unwrap_or_else(|| format!("engine is {}", inner.state)),
        })
    }

    /// Guard for releasing tabs, which stays legal while shutting down.
    pub fn ensure_not_stopped(&self) -> Result<()> {
        let state = self.state();
        if state == LifecycleState::Stopped {
            return Err(EngineError::NotReady {
                backend: self.backend.clone(),
                state,
                reason: "engine is stopped".to_string(),
            });
        }
        Ok(())
    }

    /// Enter `ShuttingDown`. Returns false when the engine is already
    /// stopping or stopped.
    pub fn begin_shutdown(&self) -> bool {
        self.transition_to(LifecycleState::ShuttingDown, None).is_ok()
    }

    pub fn finish_shutdown(&self) -> Result<()> {
        self.transition_to(LifecycleState::Stopped, None)
    }
}
