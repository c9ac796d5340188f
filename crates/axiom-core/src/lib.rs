//! AXIOM Core
//!
//! Engine orchestration for the AXIOM browser: the tab binding table, engine
//! switching, single-visible-tab display and event fan-out. Engines keep
//! their own tab state; this crate only knows which engine owns which tab.

mod binding;
mod bootstrap;
mod config;
mod error;
mod fanout;
mod mirror;
mod orchestrator;

pub use binding::{BindingInfo, BindingState};
pub use bootstrap::engines_from_config;
pub use config::{AnonymitySection, Config, HardenedSection, ServerRenderedSection, StandardSection};
pub use error::OrchestratorError;
pub use fanout::{EventFanout, Listener, ListenerHandle, TabEvent};
pub use mirror::TabMirror;
pub use orchestrator::{BackendInfo, LoadOutcome, Orchestrator};

pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Initialize logging to stderr. `RUST_LOG` overrides `default_filter`.
pub fn init_logging(default_filter: &str) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}
