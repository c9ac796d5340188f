//! Orchestrator error types

use thiserror::Error;

use axiom_engine::EngineError;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Unknown backend: {0}")]
    UnknownBackend(String),

    #[error("Tab already exists: {0}")]
    DuplicateTab(String),

    #[error("Tab not found: {0}")]
    TabNotFound(String),

    #[error("Engine {backend} not ready: {reason}")]
    EngineNotReady { backend: String, reason: String },

    #[error("Switching tab {tab_id} to {target} failed: {reason}")]
    EngineSwitchFailed {
        tab_id: String,
        target: String,
        reason: String,
    },

    #[error("Orchestrator not initialized yet")]
    NotInitialized,

    #[error("Orchestrator stopped")]
    Stopped,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(#[from] axiom_storage::StorageError),

    #[error(transparent)]
    Engine(EngineError),
}

impl OrchestratorError {
    /// Errors caused by the request rather than by the system.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            OrchestratorError::UnknownBackend(_)
                | OrchestratorError::DuplicateTab(_)
                | OrchestratorError::TabNotFound(_)
                | OrchestratorError::EngineNotReady { .. }
        )
    }
}

impl From<EngineError> for OrchestratorError {
    fn from(error: EngineError) -> Self {
        match error {
            EngineError::NotReady { backend, reason, .. } => {
                OrchestratorError::EngineNotReady { backend, reason }
            }
            other => OrchestratorError::Engine(other),
        }
    }
}
