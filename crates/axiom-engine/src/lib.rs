//! AXIOM Engine Contract
//!
//! The operation set every content engine implements. A logical tab is bound
//! to exactly one engine at a time; the orchestrator in `axiom-core` only ever
//! talks to engines through the [`Engine`] trait.

mod capability;
mod engine;
mod error;
mod event;
mod history;
mod lifecycle;
mod page;

pub use capability::{Capability, CapabilitySet};
pub use engine::Engine;
pub use error::EngineError;
pub use event::{EngineEvent, EventEmitter, EventKind};
pub use history::NavigationHistory;
pub use lifecycle::{Lifecycle, LifecycleState};
pub use page::{is_blank_url, ClearScope, NavigationSnapshot, PageState, TabHandle, TabOptions};

pub type Result<T> = std::result::Result<T, EngineError>;

/// Placeholder URL a freshly opened tab shows before its first navigation.
pub const BLANK_URL: &str = "about:blank";
