//! Standard engine
//!
//! Plain content host views sharing one browser profile.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;

use axiom_engine::{
    CapabilitySet, ClearScope, Engine, EngineEvent, LifecycleState, NavigationSnapshot,
    PageState, Result, TabHandle, TabOptions,
};

use crate::host::{ContentHost, SiteData, ViewSpec};
use crate::hosted::{HostDriver, Step};
use crate::names;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StandardConfig {
    /// Shared profile directory for every standard tab
    pub profile_dir: PathBuf,
}

pub struct StandardEngine {
    driver: HostDriver,
    profile_dir: PathBuf,
}

impl StandardEngine {
    pub fn new(config: StandardConfig, host: Arc<dyn ContentHost>, event_capacity: usize) -> Self {
        Self {
            driver: HostDriver::new(names::STANDARD, host, Vec::new(), event_capacity),
            profile_dir: config.profile_dir,
        }
    }
}

#[async_trait]
impl Engine for StandardEngine {
    fn name(&self) -> &str {
        self.driver.backend()
    }

    fn lifecycle(&self) -> LifecycleState {
        self.driver.lifecycle.state()
    }

    fn degraded_reason(&self) -> Option<String> {
        self.driver.lifecycle.reason()
    }

    fn capabilities(&self) -> CapabilitySet {
        self.driver.capabilities()
    }

    fn isolation_namespace(&self) -> &str {
        names::STANDARD
    }

    fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.driver.events.subscribe()
    }

    fn tab_count(&self) -> usize {
        self.driver.tab_count()
    }

    async fn initialize(&self) -> Result<LifecycleState> {
        let profile_dir = self.profile_dir.clone();
        self.driver
            .initialize(async move {
                tokio::fs::create_dir_all(&profile_dir)
                    .await
                    .map_err(|e| format!("profile directory {}: {}", profile_dir.display(), e))
            })
            .await
    }

    async fn shutdown(&self) -> Result<()> {
        self.driver
            .shutdown_with(|id| async move { self.driver.close(&id).await })
            .await
    }

    async fn create_tab(&self, id: &str, options: TabOptions) -> Result<TabHandle> {
        let spec = ViewSpec {
            label: self.driver.label_for(id),
            data_dir: Some(self.profile_dir.clone()),
            user_agent: options.user_agent.clone(),
            ..Default::default()
        };
        let handle = self.driver.open(id, names::STANDARD, spec).await?;

        if let Some(url) = options.initial_url.as_deref() {
            // A failed first load leaves a usable tab; the failure went out as an event
            if let Err(e) = self.driver.run(&handle.local_id, Step::Load(url)).await {
                tracing::debug!(tab_id = %id, error = %e, "Initial load failed");
            }
        }

        Ok(handle)
    }

    async fn close_tab(&self, id: &str) -> Result<()> {
        self.driver.close(id).await
    }

    async fn navigate(&self, id: &str, url: &str) -> Result<PageState> {
        self.driver.run(id, Step::Load(url)).await
    }

    async fn go_back(&self, id: &str) -> Result<PageState> {
        self.driver.run(id, Step::Back).await
    }

    async fn go_forward(&self, id: &str) -> Result<PageState> {
        self.driver.run(id, Step::Forward).await
    }

    async fn reload(&self, id: &str) -> Result<PageState> {
        self.driver.run(id, Step::Reload).await
    }

    async fn stop(&self, id: &str) -> Result<()> {
        self.driver.stop(id).await
    }

    async fn execute_script(&self, id: &str, code: &str) -> Result<Value> {
        self.driver.eval(id, code).await
    }

    async fn show(&self, id: &str) -> Result<()> {
        self.driver.set_visible(id, true).await
    }

    async fn hide(&self, id: &str) -> Result<()> {
        self.driver.set_visible(id, false).await
    }

    async fn clear_cache(&self, scope: ClearScope) -> Result<()> {
        self.driver.clear(scope, SiteData::Cache).await
    }

    async fn clear_cookies(&self, scope: ClearScope) -> Result<()> {
        self.driver.clear(scope, SiteData::Cookies).await
    }

    fn page_state(&self, id: &str) -> Result<PageState> {
        self.driver.page_state(id)
    }

    fn is_loading(&self, id: &str) -> Result<bool> {
        self.driver.is_loading(id)
    }

    fn snapshot(&self, id: &str) -> Result<NavigationSnapshot> {
        self.driver.snapshot(id)
    }

    fn tab_namespace(&self, id: &str) -> Result<String> {
        self.driver.tab_namespace(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockHost;
    use axiom_engine::{EngineError, EventKind};

    async fn ready_engine() -> (StandardEngine, Arc<MockHost>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let host = Arc::new(MockHost::new());
        let engine = StandardEngine::new(
            StandardConfig {
                profile_dir: dir.path().join("standard"),
            },
            host.clone(),
            64,
        );
        assert_eq!(engine.initialize().await.unwrap(), LifecycleState::Ready);
        (engine, host, dir)
    }

    #[tokio::test]
    async fn test_navigate_and_history() {
        let (engine, _host, _dir) = ready_engine().await;
        engine.create_tab("t1", TabOptions::default()).await.unwrap();

        engine.navigate("t1", "https://example.com").await.unwrap();
        engine.navigate("t1", "https://rust-lang.org").await.unwrap();
        assert_eq!(engine.url("t1").unwrap(), "https://rust-lang.org");
        assert!(engine.can_go_back("t1").unwrap());

        let page = engine.go_back("t1").await.unwrap();
        assert_eq!(page.url, "https://example.com");
        assert!(engine.can_go_forward("t1").unwrap());

        let page = engine.go_forward("t1").await.unwrap();
        assert_eq!(page.url, "https://rust-lang.org");
    }

    #[tokio::test]
    async fn test_initial_url_is_loaded() {
        let (engine, _host, _dir) = ready_engine().await;
        engine
            .create_tab("t1", TabOptions::with_url("https://example.com"))
            .await
            .unwrap();
        assert_eq!(engine.url("t1").unwrap(), "https://example.com");
        assert!(!engine.is_loading("t1").unwrap());
    }

    #[tokio::test]
    async fn test_load_error_keeps_engine_ready() {
        let (engine, host, _dir) = ready_engine().await;
        host.fail_url("https://down.example");
        engine.create_tab("t1", TabOptions::default()).await.unwrap();
        let mut events = engine.subscribe();

        let err = engine
            .navigate("t1", "https://down.example")
            .await
            .unwrap_err();
        assert!(err.is_load_error());
        assert_eq!(engine.lifecycle(), LifecycleState::Ready);

        let mut saw_load_error = false;
        while let Ok(event) = events.try_recv() {
            if let EventKind::LoadError { url, .. } = event.kind {
                assert_eq!(url, "https://down.example");
                saw_load_error = true;
            }
        }
        assert!(saw_load_error);
    }

    #[tokio::test]
    async fn test_unknown_tab() {
        let (engine, _host, _dir) = ready_engine().await;
        assert!(matches!(
            engine.navigate("nope", "https://example.com").await,
            Err(EngineError::TabNotFound { .. })
        ));
        assert!(matches!(
            engine.close_tab("nope").await,
            Err(EngineError::TabNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_not_ready_before_initialize() {
        let host = Arc::new(MockHost::new());
        let engine = StandardEngine::new(
            StandardConfig {
                profile_dir: PathBuf::from("/nonexistent/standard"),
            },
            host,
            8,
        );
        assert!(matches!(
            engine.create_tab("t1", TabOptions::default()).await,
            Err(EngineError::NotReady {
                state: LifecycleState::Uninitialized,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_host_outage_degrades() {
        let (engine, host, _dir) = ready_engine().await;
        engine.create_tab("t1", TabOptions::default()).await.unwrap();
        host.set_unavailable(true);

        let err = engine
            .navigate("t1", "https://example.com")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotReady { .. }));
        assert_eq!(engine.lifecycle(), LifecycleState::Degraded);
        // Re-homing still works from bookkeeping
        assert!(engine.snapshot("t1").is_ok());
    }

    #[tokio::test]
    async fn test_shutdown_closes_tabs() {
        let (engine, host, _dir) = ready_engine().await;
        engine.create_tab("a", TabOptions::default()).await.unwrap();
        engine.create_tab("b", TabOptions::default()).await.unwrap();

        engine.shutdown().await.unwrap();
        assert_eq!(engine.tab_count(), 0);
        assert_eq!(engine.lifecycle(), LifecycleState::Stopped);
        assert_eq!(host.closed_labels().len(), 2);
        // Idempotent
        engine.shutdown().await.unwrap();
    }
}
