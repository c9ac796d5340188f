//! The capability contract

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::capability::CapabilitySet;
use crate::event::EngineEvent;
use crate::lifecycle::LifecycleState;
use crate::page::{ClearScope, NavigationSnapshot, PageState, TabHandle, TabOptions};
use crate::Result;

/// A content engine.
///
/// One instance exists per engine kind for the life of the process. Every
/// per-tab method takes the backend-local tab id returned in [`TabHandle`].
///
/// Unknown ids fail with `TabNotFound`, content operations outside `Ready`
/// fail with `NotReady`, and navigation failures fail with `Load` without
/// changing the lifecycle state.
#[async_trait]
pub trait Engine: Send + Sync {
    /// Unique registry key
    fn name(&self) -> &str;

    fn lifecycle(&self) -> LifecycleState;

    /// Why the engine is degraded, if it is.
    fn degraded_reason(&self) -> Option<String>;

    fn capabilities(&self) -> CapabilitySet;

    /// Engine-wide storage/network partition.
    fn isolation_namespace(&self) -> &str;

    fn subscribe(&self) -> broadcast::Receiver<EngineEvent>;

    /// Number of live backend-local tabs.
    fn tab_count(&self) -> usize;

    /// Probe external dependencies and settle in `Ready` or `Degraded`.
    async fn initialize(&self) -> Result<LifecycleState>;

    /// Close every local tab, then stop.
    async fn shutdown(&self) -> Result<()>;

    async fn create_tab(&self, id: &str, options: TabOptions) -> Result<TabHandle>;

    async fn close_tab(&self, id: &str) -> Result<()>;

    async fn navigate(&self, id: &str, url: &str) -> Result<PageState>;

    async fn go_back(&self, id: &str) -> Result<PageState>;

    async fn go_forward(&self, id: &str) -> Result<PageState>;

    async fn reload(&self, id: &str) -> Result<PageState>;

    async fn stop(&self, id: &str) -> Result<()>;

    async fn execute_script(&self, id: &str, code: &str) -> Result<Value>;

    async fn show(&self, id: &str) -> Result<()>;

    async fn hide(&self, id: &str) -> Result<()>;

    async fn clear_cache(&self, scope: ClearScope) -> Result<()>;

    async fn clear_cookies(&self, scope: ClearScope) -> Result<()>;

    fn page_state(&self, id: &str) -> Result<PageState>;

    fn is_loading(&self, id: &str) -> Result<bool>;

    /// Navigation state for re-homing the tab on another engine.
    ///
    /// Served from the engine's own bookkeeping so it also works while the
    /// engine is degraded or shutting down.
    fn snapshot(&self, id: &str) -> Result<NavigationSnapshot>;

    /// Partition a single tab lives in. Equal to the engine namespace unless
    /// the engine isolates tabs from each other.
    fn tab_namespace(&self, id: &str) -> Result<String>;

    fn title(&self, id: &str) -> Result<String> {
        Ok(self.page_state(id)?.title)
    }

    fn url(&self, id: &str) -> Result<String> {
        Ok(self.page_state(id)?.url)
    }

    fn can_go_back(&self, id: &str) -> Result<bool> {
        Ok(self.page_state(id)?.can_go_back)
    }

    fn can_go_forward(&self, id: &str) -> Result<bool> {
        Ok(self.page_state(id)?.can_go_forward)
    }
}
