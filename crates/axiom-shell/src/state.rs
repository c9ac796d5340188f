//! Shell state: the orchestrator plus the persistent tab mirror

use std::sync::Arc;
use std::time::Duration;

use axiom_backends::{ContentHost, HeadlessHost};
use axiom_core::{engines_from_config, BindingInfo, Config, Orchestrator, TabMirror};
use axiom_storage::{Database, TabStore};

pub struct ShellState {
    orchestrator: Orchestrator,
    mirror: TabMirror,
}

impl ShellState {
    /// Build every enabled engine on a headless host and start them.
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;
        let db = Database::open(&config.database_path())?;

        let host: Arc<dyn ContentHost> = Arc::new(HeadlessHost::new(Duration::from_millis(
            config.host_timeout_ms,
        )));
        let engines = engines_from_config(config, host)?;
        let orchestrator = Orchestrator::new(engines, config.event_capacity)?;

        Self::start(orchestrator, TabStore::new(db)).await
    }

    pub async fn start(orchestrator: Orchestrator, store: TabStore) -> anyhow::Result<Self> {
        let mirror = TabMirror::attach(&orchestrator, store);
        orchestrator.start().await?;
        Ok(Self {
            orchestrator,
            mirror,
        })
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    /// Run a mirror update; the store lagging behind never fails a command.
    pub fn mirror<F>(&self, tab_id: &str, f: F)
    where
        F: FnOnce(&TabMirror) -> axiom_core::Result<()>,
    {
        if let Err(e) = f(&self.mirror) {
            tracing::warn!(tab_id = %tab_id, error = %e, "Failed to update tab record");
        }
    }

    pub fn record_created(&self, info: &BindingInfo) {
        let page = match self.orchestrator.page_state(&info.tab_id) {
            Ok(page) => page,
            Err(e) => {
                tracing::debug!(tab_id = %info.tab_id, error = %e, "No page state to record");
                return;
            }
        };
        self.mirror(&info.tab_id, |m| m.record_created(info, &page));
    }
}
