//! Bookkeeping shared by the host-backed engines
//!
//! Each host-backed engine owns a [`HostDriver`] and adds its own policy
//! (URL filtering, per-tab namespaces) around it.

use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use axiom_engine::{
    Capability, CapabilitySet, ClearScope, EngineError, EventEmitter, EventKind, Lifecycle,
    LifecycleState, NavigationSnapshot, PageState, Result, TabHandle,
};

use crate::host::{ContentHost, HostError, SiteData, ViewSpec};

#[derive(Debug, Clone)]
struct HostedTab {
    label: String,
    namespace: String,
    page: PageState,
    loading: bool,
}

/// A load-like step executed against the host.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Step<'a> {
    Load(&'a str),
    Back,
    Forward,
    Reload,
}

pub(crate) struct HostDriver {
    backend: String,
    host: Arc<dyn ContentHost>,
    disabled: Vec<Capability>,
    pub(crate) lifecycle: Lifecycle,
    pub(crate) events: EventEmitter,
    tabs: RwLock<HashMap<String, HostedTab>>,
}

impl HostDriver {
    pub fn new(
        backend: &str,
        host: Arc<dyn ContentHost>,
        disabled: Vec<Capability>,
        event_capacity: usize,
    ) -> Self {
        let events = EventEmitter::new(event_capacity);
        Self {
            backend: backend.to_string(),
            host,
            disabled,
            lifecycle: Lifecycle::new(backend, events.clone()),
            events,
            tabs: RwLock::new(HashMap::new()),
        }
    }

    pub fn backend(&self) -> &str {
        &self.backend
    }

    pub fn capabilities(&self) -> CapabilitySet {
        self.host.capabilities().without(&self.disabled)
    }

    /// Host label for a backend-local tab.
    pub fn label_for(&self, local_id: &str) -> String {
        format!("{}-{}", self.backend, local_id)
    }

    /// Run the host probe plus an engine-specific dependency check.
    pub async fn initialize<F>(&self, dependency: F) -> Result<LifecycleState>
    where
        F: std::future::Future<Output = std::result::Result<(), String>>,
    {
        self.lifecycle
            .transition_to(LifecycleState::Initializing, None)?;

        let outcome = match dependency.await {
            Ok(()) => self.host.probe().await.map_err(|e| e.to_string()),
            Err(reason) => Err(reason),
        };

        match outcome {
            Ok(()) => {
                self.lifecycle.transition_to(LifecycleState::Ready, None)?;
                tracing::info!(backend = %self.backend, "Engine ready");
            }
            Err(reason) => {
                self.lifecycle
                    .transition_to(LifecycleState::Degraded, Some(reason))?;
            }
        }

        Ok(self.lifecycle.state())
    }

    pub fn ensure_capability(&self, capability: Capability) -> Result<()> {
        if self.capabilities().supports(capability) {
            Ok(())
        } else {
            Err(EngineError::Unsupported {
                backend: self.backend.clone(),
                capability,
            })
        }
    }

    /// Open a view for `local_id` in the given namespace.
    pub async fn open(&self, local_id: &str, namespace: &str, spec: ViewSpec) -> Result<TabHandle> {
        self.lifecycle.ensure_ready()?;
        if self.tabs.read().contains_key(local_id) {
            return Err(EngineError::TabExists {
                backend: self.backend.clone(),
                tab_id: local_id.to_string(),
            });
        }

        let label = spec.label.clone();
        self.host
            .open(spec)
            .await
            .map_err(|e| self.map_host_error(local_id, e))?;

        self.tabs.write().insert(
            local_id.to_string(),
            HostedTab {
                label,
                namespace: namespace.to_string(),
                page: PageState::blank(),
                loading: false,
            },
        );

        tracing::info!(backend = %self.backend, tab_id = %local_id, "Opened tab");

        Ok(TabHandle {
            local_id: local_id.to_string(),
            namespace: namespace.to_string(),
        })
    }

    /// Fail with `TabNotFound` unless `local_id` is open.
    pub fn ensure_tab(&self, local_id: &str) -> Result<()> {
        self.label(local_id).map(|_| ())
    }

    fn label(&self, local_id: &str) -> Result<String> {
        self.tabs
            .read()
            .get(local_id)
            .map(|t| t.label.clone())
            .ok_or_else(|| EngineError::tab_not_found(&self.backend, local_id))
    }

    fn set_loading(&self, local_id: &str, loading: bool) {
        if let Some(tab) = self.tabs.write().get_mut(local_id) {
            tab.loading = loading;
        }
    }

    /// Translate a host failure, degrading the engine when the host is gone.
    fn map_host_error(&self, local_id: &str, error: HostError) -> EngineError {
        match error {
            HostError::UnknownView(_) => EngineError::tab_not_found(&self.backend, local_id),
            HostError::Load { url, reason } => EngineError::Load { url, reason },
            HostError::Unavailable(reason) => {
                self.lifecycle.degrade(reason.clone());
                EngineError::NotReady {
                    backend: self.backend.clone(),
                    state: self.lifecycle.state(),
                    reason,
                }
            }
            HostError::Unsupported(what) => {
                EngineError::Host(format!("{} does not support {}", self.backend, what))
            }
            HostError::Other(message) => EngineError::Host(message),
        }
    }

    /// Report a load that never reached the host.
    pub fn refuse_load(&self, local_id: &str, url: &str, reason: String) -> EngineError {
        self.events.tab(
            local_id,
            EventKind::LoadError {
                url: url.to_string(),
                reason: reason.clone(),
            },
        );
        EngineError::Load {
            url: url.to_string(),
            reason,
        }
    }

    /// Execute a load-like step and publish its events.
    pub async fn run(&self, local_id: &str, step: Step<'_>) -> Result<PageState> {
        self.lifecycle.ensure_ready()?;
        let label = self.label(local_id)?;

        let target = match step {
            Step::Load(url) => {
                url::Url::parse(url).map_err(|_| EngineError::InvalidUrl(url.to_string()))?;
                url.to_string()
            }
            _ => self.page_state_unchecked(local_id)?.url,
        };

        self.set_loading(local_id, true);
        self.events
            .tab(local_id, EventKind::LoadingStart { url: target.clone() });

        let result = match step {
            Step::Load(url) => self.host.load(&label, url).await,
            Step::Back => self.host.back(&label).await,
            Step::Forward => self.host.forward(&label).await,
            Step::Reload => self.host.reload(&label).await,
        };

        self.set_loading(local_id, false);

        match result {
            Ok(page) => {
                let previous_title = {
                    let mut tabs = self.tabs.write();
                    match tabs.get_mut(local_id) {
                        Some(tab) => std::mem::replace(&mut tab.page, page.clone()).title,
                        None => String::new(),
                    }
                };

                self.events.tab(
                    local_id,
                    EventKind::Navigation {
                        url: page.url.clone(),
                        can_go_back: page.can_go_back,
                        can_go_forward: page.can_go_forward,
                    },
                );
                if page.title != previous_title {
                    self.events.tab(
                        local_id,
                        EventKind::TitleUpdated {
                            title: page.title.clone(),
                        },
                    );
                }
                self.events
                    .tab(local_id, EventKind::LoadingStop { url: page.url.clone() });

                Ok(page)
            }
            Err(error) => {
                let error = self.map_host_error(local_id, error);
                if let EngineError::Load { url, reason } = &error {
                    tracing::debug!(backend = %self.backend, tab_id = %local_id, url = %url, "Load failed");
                    self.events.tab(
                        local_id,
                        EventKind::LoadError {
                            url: url.clone(),
                            reason: reason.clone(),
                        },
                    );
                }
                self.events
                    .tab(local_id, EventKind::LoadingStop { url: target });
                Err(error)
            }
        }
    }

    pub async fn stop(&self, local_id: &str) -> Result<()> {
        self.lifecycle.ensure_ready()?;
        let label = self.label(local_id)?;
        self.host
            .stop(&label)
            .await
            .map_err(|e| self.map_host_error(local_id, e))?;
        self.set_loading(local_id, false);
        Ok(())
    }

    pub async fn eval(&self, local_id: &str, code: &str) -> Result<Value> {
        self.lifecycle.ensure_ready()?;
        self.ensure_capability(Capability::ScriptExecution)?;
        let label = self.label(local_id)?;
        self.host
            .eval(&label, code)
            .await
            .map_err(|e| self.map_host_error(local_id, e))
    }

    pub async fn set_visible(&self, local_id: &str, visible: bool) -> Result<()> {
        self.lifecycle.ensure_ready()?;
        let label = self.label(local_id)?;
        self.host
            .set_visible(&label, visible)
            .await
            .map_err(|e| self.map_host_error(local_id, e))
    }

    pub async fn clear(&self, scope: ClearScope, data: SiteData) -> Result<()> {
        self.lifecycle.ensure_ready()?;
        let capability = match data {
            SiteData::Cookies => Capability::Cookies,
            SiteData::Cache | SiteData::All => Capability::Cache,
        };
        self.ensure_capability(capability)?;

        match scope {
            ClearScope::Tab(local_id) => {
                let label = self.label(&local_id)?;
                self.host
                    .clear(Some(&label), data)
                    .await
                    .map_err(|e| self.map_host_error(&local_id, e))
            }
            ClearScope::Global => {
                // Only this engine's views; the host may be shared with other engines
                let labels: Vec<(String, String)> = self
                    .tabs
                    .read()
                    .iter()
                    .map(|(id, tab)| (id.clone(), tab.label.clone()))
                    .collect();
                for (local_id, label) in labels {
                    self.host
                        .clear(Some(&label), data)
                        .await
                        .map_err(|e| self.map_host_error(&local_id, e))?;
                }
                Ok(())
            }
        }
    }

    /// Wipe every kind of data held by one view.
    pub async fn wipe(&self, local_id: &str) -> Result<()> {
        let label = self.label(local_id)?;
        self.host
            .clear(Some(&label), SiteData::All)
            .await
            .map_err(|e| self.map_host_error(local_id, e))
    }

    /// Close the view and forget the tab.
    pub async fn close(&self, local_id: &str) -> Result<()> {
        self.lifecycle.ensure_not_stopped()?;
        let label = self.label(local_id)?;

        let result = self.host.close(&label).await;
        // The tab is forgotten even if the host already lost the view
        self.tabs.write().remove(local_id);

        match result {
            Ok(()) | Err(HostError::UnknownView(_)) => {
                tracing::info!(backend = %self.backend, tab_id = %local_id, "Closed tab");
                Ok(())
            }
            Err(e) => Err(self.map_host_error(local_id, e)),
        }
    }

    fn page_state_unchecked(&self, local_id: &str) -> Result<PageState> {
        self.tabs
            .read()
            .get(local_id)
            .map(|t| t.page.clone())
            .ok_or_else(|| EngineError::tab_not_found(&self.backend, local_id))
    }

    pub fn page_state(&self, local_id: &str) -> Result<PageState> {
        self.lifecycle.ensure_ready()?;
        self.page_state_unchecked(local_id)
    }

    pub fn is_loading(&self, local_id: &str) -> Result<bool> {
        self.lifecycle.ensure_ready()?;
        self.tabs
            .read()
            .get(local_id)
            .map(|t| t.loading)
            .ok_or_else(|| EngineError::tab_not_found(&self.backend, local_id))
    }

    pub fn snapshot(&self, local_id: &str) -> Result<NavigationSnapshot> {
        self.lifecycle.ensure_not_stopped()?;
        Ok(self.page_state_unchecked(local_id)?.into())
    }

    pub fn tab_namespace(&self, local_id: &str) -> Result<String> {
        self.tabs
            .read()
            .get(local_id)
            .map(|t| t.namespace.clone())
            .ok_or_else(|| EngineError::tab_not_found(&self.backend, local_id))
    }

    pub fn tab_count(&self) -> usize {
        self.tabs.read().len()
    }

    pub fn local_ids(&self) -> Vec<String> {
        self.tabs.read().keys().cloned().collect()
    }

    /// Shut down, releasing every tab through `release`.
    pub async fn shutdown_with<F, Fut>(&self, release: F) -> Result<()>
    where
        F: Fn(String) -> Fut,
        Fut: std::future::Future<Output = Result<()>>,
    {
        if !self.lifecycle.begin_shutdown() {
            return Ok(());
        }

        for local_id in self.local_ids() {
            if let Err(e) = release(local_id.clone()).await {
                tracing::warn!(
                    backend = %self.backend,
                    tab_id = %local_id,
                    error = %e,
                    "Failed to release tab during shutdown"
                );
            }
        }

        self.lifecycle.finish_shutdown()?;
        tracing::info!(backend = %self.backend, "Engine stopped");
        Ok(())
    }
}
