//! Engine error types

use thiserror::Error;

use crate::capability::Capability;
use crate::lifecycle::LifecycleState;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("Tab not found on {backend}: {tab_id}")]
    TabNotFound { backend: String, tab_id: String },

    #[error("Tab already exists on {backend}: {tab_id}")]
    TabExists { backend: String, tab_id: String },

    #[error("Engine {backend} not ready ({state}): {reason}")]
    NotReady {
        backend: String,
        state: LifecycleState,
        reason: String,
    },

    #[error("Failed to load {url}: {reason}")]
    Load { url: String, reason: String },

    #[error("Engine {backend} does not support {capability}")]
    Unsupported {
        backend: String,
        capability: Capability,
    },

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidTransition {
        from: LifecycleState,
        to: LifecycleState,
    },

    #[error("Isolation namespace {namespace} could not be purged: {reason}")]
    Purge { namespace: String, reason: String },

    #[error("Content host error: {0}")]
    Host(String),
}

impl EngineError {
    pub fn tab_not_found(backend: &str, tab_id: &str) -> Self {
        EngineError::TabNotFound {
            backend: backend.to_string(),
            tab_id: tab_id.to_string(),
        }
    }

    /// True for navigation-level failures that leave the tab usable.
    pub fn is_load_error(&self) -> bool {
        matches!(self, EngineError::Load { .. })
    }
}
