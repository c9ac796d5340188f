//! Engine orchestrator
//!
//! Owns the registered engines and the tab binding table. Every tab
//! operation resolves the binding, then delegates to the bound engine.
//!
//! Locking:
//! - one async mutex per tab id serializes operations on that tab, engine
//!   switches included
//! - one display mutex serializes show/hide so at most one binding is visible
//! - tab lock before display lock, never the other way round

use futures_util::future::join_all;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use axiom_engine::{
    CapabilitySet, ClearScope, Engine, EngineError, EngineEvent, LifecycleState, PageState,
    TabOptions,
};

use crate::binding::{BindingInfo, BindingState, BindingTable, TabBinding};
use crate::error::OrchestratorError;
use crate::fanout::{EventFanout, ListenerHandle, TabEvent};
use crate::Result;

/// Result of a navigation-like operation. A page failing to load is an
/// ordinary outcome, not an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "kebab-case")]
pub enum LoadOutcome {
    Committed(PageState),
    Failed { url: String, reason: String },
}

impl LoadOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, LoadOutcome::Committed(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackendInfo {
    pub name: String,
    pub lifecycle: LifecycleState,
    pub ready: bool,
    pub degraded: bool,
    pub reason: Option<String>,
    pub capabilities: CapabilitySet,
    pub isolation_namespace: String,
    pub tab_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Readiness {
    Pending,
    Ready,
    Stopped,
}

struct Inner {
    /// Registration order
    engines: Vec<Arc<dyn Engine>>,
    bindings: BindingTable,
    tab_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    display: tokio::sync::Mutex<()>,
    readiness: watch::Sender<Readiness>,
    started: AtomicBool,
    fanout: EventFanout,
    forwarders: Mutex<Vec<JoinHandle<()>>>,
}

impl Inner {
    /// Re-tag an engine event with its logical tab id and publish it.
    fn forward(&self, backend: &str, event: EngineEvent) {
        let tab_id = match event.tab_id {
            Some(local_id) => match self.bindings.route(backend, &local_id) {
                Some(tab_id) => Some(tab_id),
                None => {
                    tracing::debug!(
                        backend = %backend,
                        local_id = %local_id,
                        event = event.kind.name(),
                        "Dropping event for unbound tab"
                    );
                    return;
                }
            },
            None => None,
        };

        self.fanout.publish(TabEvent::new(tab_id, backend, event.kind));
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        for handle in self.forwarders.lock().drain(..) {
            handle.abort();
        }
    }
}

fn spawn_forwarder(inner: Weak<Inner>, engine: &Arc<dyn Engine>) -> JoinHandle<()> {
    let mut events = engine.subscribe();
    let backend = engine.name().to_string();

    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    let Some(inner) = inner.upgrade() else {
                        break;
                    };
                    inner.forward(&backend, event);
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(backend = %backend, skipped, "Event forwarder lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

/// Per-tab lock. Its map entry goes away with the last holder once the
/// tab has no binding.
struct TabGuard<'a> {
    inner: &'a Inner,
    tab_id: String,
    guard: Option<tokio::sync::OwnedMutexGuard<()>>,
}

impl Drop for TabGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        if self.inner.bindings.contains(&self.tab_id) {
            return;
        }
        let mut locks = self.inner.tab_locks.lock();
        if locks
            .get(&self.tab_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.tab_id);
        }
    }
}

#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    pub fn new(engines: Vec<Arc<dyn Engine>>, event_capacity: usize) -> Result<Self> {
        if engines.is_empty() {
            return Err(OrchestratorError::Config(
                "no backends registered".to_string(),
            ));
        }
        for (i, engine) in engines.iter().enumerate() {
            if engines[..i].iter().any(|e| e.name() == engine.name()) {
                return Err(OrchestratorError::Config(format!(
                    "backend {} registered twice",
                    engine.name()
                )));
            }
        }

        let (readiness, _) = watch::channel(Readiness::Pending);

        Ok(Self {
            inner: Arc::new(Inner {
                engines,
                bindings: BindingTable::new(),
                tab_locks: Mutex::new(HashMap::new()),
                display: tokio::sync::Mutex::new(()),
                readiness,
                started: AtomicBool::new(false),
                fanout: EventFanout::new(event_capacity),
                forwarders: Mutex::new(Vec::new()),
            }),
        })
    }

    /// Initialize every engine concurrently. Calls made before this
    /// completes fail with [`OrchestratorError::NotInitialized`].
    pub async fn start(&self) -> Result<()> {
        if *self.inner.readiness.borrow() == Readiness::Stopped {
            return Err(OrchestratorError::Stopped);
        }
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return self.wait_ready().await;
        }

        // Forwarders first, so initialization events are not missed
        {
            let weak = Arc::downgrade(&self.inner);
            let mut forwarders = self.inner.forwarders.lock();
            for engine in &self.inner.engines {
                forwarders.push(spawn_forwarder(weak.clone(), engine));
            }
        }

        let results = join_all(self.inner.engines.iter().map(|engine| async move {
            (engine.name().to_string(), engine.initialize().await)
        }))
        .await;

        for (name, result) in results {
            match result {
                Ok(state) => tracing::info!(backend = %name, state = %state, "Engine initialized"),
                Err(e) => tracing::warn!(backend = %name, error = %e, "Engine failed to initialize"),
            }
        }

        self.inner.readiness.send_replace(Readiness::Ready);
        tracing::info!(backends = self.inner.engines.len(), "Orchestrator ready");
        Ok(())
    }

    /// Wait until [`start`](Self::start) has finished.
    pub async fn wait_ready(&self) -> Result<()> {
        let mut readiness = self.inner.readiness.subscribe();
        loop {
            match *readiness.borrow_and_update() {
                Readiness::Ready => return Ok(()),
                Readiness::Stopped => return Err(OrchestratorError::Stopped),
                Readiness::Pending => {}
            }
            if readiness.changed().await.is_err() {
                return Err(OrchestratorError::Stopped);
            }
        }
    }

    fn ensure_ready(&self) -> Result<()> {
        match *self.inner.readiness.borrow() {
            Readiness::Ready => Ok(()),
            Readiness::Pending => Err(OrchestratorError::NotInitialized),
            Readiness::Stopped => Err(OrchestratorError::Stopped),
        }
    }

    fn engine(&self, name: &str) -> Result<Arc<dyn Engine>> {
        self.inner
            .engines
            .iter()
            .find(|e| e.name() == name)
            .cloned()
            .ok_or_else(|| OrchestratorError::UnknownBackend(name.to_string()))
    }

    /// A registered engine by name.
    pub fn backend(&self, name: &str) -> Option<Arc<dyn Engine>> {
        self.engine(name).ok()
    }

    async fn lock_tab(&self, tab_id: &str) -> TabGuard<'_> {
        let lock = self
            .inner
            .tab_locks
            .lock()
            .entry(tab_id.to_string())
            .or_default()
            .clone();
        TabGuard {
            inner: &self.inner,
            tab_id: tab_id.to_string(),
            guard: Some(lock.lock_owned().await),
        }
    }

    /// Translate an adapter error for a call made on behalf of `tab_id`.
    fn engine_error(&self, tab_id: &str, error: EngineError) -> OrchestratorError {
        match error {
            EngineError::TabNotFound { .. } => OrchestratorError::TabNotFound(tab_id.to_string()),
            other => other.into(),
        }
    }

    fn not_ready(engine: &Arc<dyn Engine>) -> OrchestratorError {
        let state = engine.lifecycle();
        OrchestratorError::EngineNotReady {
            backend: engine.name().to_string(),
            reason: engine
                .degraded_reason()
                .unwrap_or_else(|| format!("engine is {}", state)),
        }
    }

    /// Binding plus engine for a content operation.
    fn resolve(&self, tab_id: &str) -> Result<(TabBinding, Arc<dyn Engine>)> {
        let binding = self.inner.bindings.get(tab_id)?;
        match &binding.state {
            BindingState::Stable => {}
            BindingState::Switching { target } => {
                return Err(OrchestratorError::EngineSwitchFailed {
                    tab_id: tab_id.to_string(),
                    target: target.clone(),
                    reason: "engine switch in progress".to_string(),
                })
            }
            BindingState::SwitchFailed { target, reason } => {
                return Err(OrchestratorError::EngineSwitchFailed {
                    tab_id: tab_id.to_string(),
                    target: target.clone(),
                    reason: reason.clone(),
                })
            }
        }
        let engine = self.engine(&binding.backend_name)?;
        Ok((binding, engine))
    }

    async fn delegate<T, F, Fut>(&self, tab_id: &str, op: F) -> Result<T>
    where
        F: FnOnce(Arc<dyn Engine>, String) -> Fut,
        Fut: Future<Output = axiom_engine::Result<T>>,
    {
        self.ensure_ready()?;
        let _guard = self.lock_tab(tab_id).await;

        let (binding, engine) = self.resolve(tab_id)?;
        op(engine, binding.local_tab_id)
            .await
            .map_err(|e| self.engine_error(tab_id, e))
    }

    async fn load<F, Fut>(&self, tab_id: &str, op: F) -> Result<LoadOutcome>
    where
        F: FnOnce(Arc<dyn Engine>, String) -> Fut,
        Fut: Future<Output = axiom_engine::Result<PageState>>,
    {
        match self.delegate(tab_id, op).await {
            Ok(page) => Ok(LoadOutcome::Committed(page)),
            Err(OrchestratorError::Engine(EngineError::Load { url, reason })) => {
                tracing::debug!(tab_id = %tab_id, url = %url, reason = %reason, "Load failed");
                Ok(LoadOutcome::Failed { url, reason })
            }
            Err(e) => Err(e),
        }
    }

    pub fn list_backends(&self) -> Result<Vec<BackendInfo>> {
        self.ensure_ready()?;
        Ok(self
            .inner
            .engines
            .iter()
            .map(|engine| {
                let lifecycle = engine.lifecycle();
                BackendInfo {
                    name: engine.name().to_string(),
                    lifecycle,
                    ready: lifecycle == LifecycleState::Ready,
                    degraded: lifecycle == LifecycleState::Degraded,
                    reason: engine.degraded_reason(),
                    capabilities: engine.capabilities(),
                    isolation_namespace: engine.isolation_namespace().to_string(),
                    tab_count: engine.tab_count(),
                }
            })
            .collect())
    }

    pub fn capabilities(&self, backend: &str) -> Result<CapabilitySet> {
        self.ensure_ready()?;
        Ok(self.engine(backend)?.capabilities())
    }

    pub fn get_binding(&self, tab_id: &str) -> Result<BindingInfo> {
        self.ensure_ready()?;
        Ok(self.inner.bindings.get(tab_id)?.info())
    }

    pub fn list_bindings(&self) -> Result<Vec<BindingInfo>> {
        self.ensure_ready()?;
        Ok(self.inner.bindings.list())
    }

    /// The tab holding the display region, if any.
    pub fn visible_tab(&self) -> Option<String> {
        self.inner.bindings.visible_tab()
    }

    pub fn tab_count(&self) -> usize {
        self.inner.bindings.len()
    }

    pub async fn create_tab(
        &self,
        tab_id: &str,
        backend: &str,
        mut options: TabOptions,
    ) -> Result<BindingInfo> {
        self.ensure_ready()?;
        let _guard = self.lock_tab(tab_id).await;

        if self.inner.bindings.contains(tab_id) {
            return Err(OrchestratorError::DuplicateTab(tab_id.to_string()));
        }
        let engine = self.engine(backend)?;

        // Load the initial URL once the route exists so its events are tagged
        let initial_url = options.initial_url.take();
        let handle = engine.create_tab(tab_id, options).await?;

        let binding = TabBinding::new(tab_id, backend, &handle.local_id);
        let info = binding.info();
        self.inner.bindings.insert(binding)?;

        tracing::info!(
            tab_id = %tab_id,
            backend = %backend,
            local_id = %handle.local_id,
            "Created tab"
        );

        if let Some(url) = initial_url {
            if let Err(e) = engine.navigate(&handle.local_id, &url).await {
                tracing::debug!(tab_id = %tab_id, error = %e, "Initial navigation failed");
            }
        }

        Ok(info)
    }

    pub async fn close_tab(&self, tab_id: &str) -> Result<()> {
        self.ensure_ready()?;
        self.close_binding(tab_id).await
    }

    async fn close_binding(&self, tab_id: &str) -> Result<()> {
        let _guard = self.lock_tab(tab_id).await;

        let binding = self.inner.bindings.get(tab_id)?;
        let result = match binding.state {
            // The local tab is already gone
            BindingState::SwitchFailed { .. } => Ok(()),
            _ => match self.engine(&binding.backend_name) {
                Ok(engine) => engine.close_tab(&binding.local_tab_id).await,
                Err(_) => Ok(()),
            },
        };

        // The binding leaves the table whatever the engine said
        self.inner.bindings.remove(tab_id);

        match result {
            Ok(()) | Err(EngineError::TabNotFound { .. }) => {
                tracing::info!(tab_id = %tab_id, backend = %binding.backend_name, "Closed tab");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(tab_id = %tab_id, error = %e, "Tab closed with errors");
                Err(self.engine_error(tab_id, e))
            }
        }
    }

    pub async fn show_tab(&self, tab_id: &str) -> Result<()> {
        self.ensure_ready()?;
        let _guard = self.lock_tab(tab_id).await;
        let _display = self.inner.display.lock().await;

        let (binding, engine) = self.resolve(tab_id)?;
        if binding.visible {
            return Ok(());
        }
        self.present(&binding, &engine).await
    }

    /// Hide whatever is visible, then show `binding`. Caller holds the display lock.
    async fn present(&self, binding: &TabBinding, engine: &Arc<dyn Engine>) -> Result<()> {
        if let Some(previous) = self.inner.bindings.visible_tab() {
            if previous != binding.tab_id {
                self.hide_binding(&previous).await?;
            }
        }

        engine
            .show(&binding.local_tab_id)
            .await
            .map_err(|e| self.engine_error(&binding.tab_id, e))?;
        self.inner.bindings.set_visible(Some(&binding.tab_id));
        debug_assert!(self.inner.bindings.visible_count() <= 1);

        tracing::info!(tab_id = %binding.tab_id, backend = %binding.backend_name, "Showing tab");
        Ok(())
    }

    /// Take `tab_id` off the display. Caller holds the display lock.
    async fn hide_binding(&self, tab_id: &str) -> Result<()> {
        let binding = self.inner.bindings.get(tab_id)?;

        if !matches!(binding.state, BindingState::SwitchFailed { .. }) {
            let engine = self.engine(&binding.backend_name)?;
            match engine.hide(&binding.local_tab_id).await {
                Ok(()) => {}
                // Nothing left on screen to hide
                Err(EngineError::TabNotFound { .. }) => {}
                Err(EngineError::NotReady { reason, .. }) => {
                    tracing::warn!(
                        tab_id = %tab_id,
                        backend = %binding.backend_name,
                        reason = %reason,
                        "Cannot hide tab on unavailable engine"
                    );
                }
                Err(e) => return Err(self.engine_error(tab_id, e)),
            }
        }

        self.inner.bindings.set_visible(None);
        Ok(())
    }

    /// Hide a tab. Hiding a hidden tab is a no-op.
    pub async fn hide_tab(&self, tab_id: &str) -> Result<()> {
        self.ensure_ready()?;
        let _guard = self.lock_tab(tab_id).await;
        let _display = self.inner.display.lock().await;

        let binding = self.inner.bindings.get(tab_id)?;
        if !binding.visible {
            return Ok(());
        }
        self.hide_binding(tab_id).await
    }

    /// Re-home a tab on another engine, carrying its navigation state.
    ///
    /// The target must be registered and ready before anything is torn down.
    /// If the target then refuses the tab, the binding stays in the table in
    /// the `SwitchFailed` state, keeping its snapshot for a retry.
    pub async fn switch_engine(&self, tab_id: &str, target: &str) -> Result<BindingInfo> {
        self.ensure_ready()?;
        let _guard = self.lock_tab(tab_id).await;

        let binding = self.inner.bindings.get(tab_id)?;
        let target_engine = self.engine(target)?;

        if binding.backend_name == target && binding.state == BindingState::Stable {
            return Ok(binding.info());
        }
        if target_engine.lifecycle() != LifecycleState::Ready {
            return Err(Self::not_ready(&target_engine));
        }

        let switch_failed = |reason: String| OrchestratorError::EngineSwitchFailed {
            tab_id: tab_id.to_string(),
            target: target.to_string(),
            reason,
        };

        let snapshot = match &binding.state {
            BindingState::Stable => {
                let source = self.engine(&binding.backend_name)?;
                let snapshot = source
                    .snapshot(&binding.local_tab_id)
                    .map_err(|e| self.engine_error(tab_id, e))?;

                self.inner.bindings.update(tab_id, |b| {
                    b.state = BindingState::Switching {
                        target: target.to_string(),
                    };
                    b.snapshot = Some(snapshot.clone());
                })?;

                match source.close_tab(&binding.local_tab_id).await {
                    Ok(()) => {}
                    // The view is gone; the namespace stays queued for purging
                    Err(e @ EngineError::Purge { .. }) => {
                        tracing::warn!(tab_id = %tab_id, error = %e, "Switching despite pending purge");
                    }
                    // Still there: nothing was torn down, stay where we are
                    Err(e) if source.tab_namespace(&binding.local_tab_id).is_ok() => {
                        self.inner.bindings.update(tab_id, |b| {
                            b.state = BindingState::Stable;
                            b.snapshot = None;
                        })?;
                        return Err(switch_failed(e.to_string()));
                    }
                    Err(e) => {
                        tracing::warn!(
                            tab_id = %tab_id,
                            backend = %binding.backend_name,
                            error = %e,
                            "Old tab released with errors, switching anyway"
                        );
                    }
                }
                self.inner
                    .bindings
                    .unroute(&binding.backend_name, &binding.local_tab_id);
                snapshot
            }
            // Retry: the old local tab was already released
            BindingState::SwitchFailed { .. } => {
                let snapshot = binding.snapshot.clone().unwrap_or_default();
                self.inner.bindings.update(tab_id, |b| {
                    b.state = BindingState::Switching {
                        target: target.to_string(),
                    };
                })?;
                snapshot
            }
            BindingState::Switching { .. } => {
                return Err(switch_failed("engine switch in progress".to_string()));
            }
        };

        let handle = match target_engine.create_tab(tab_id, TabOptions::default()).await {
            Ok(handle) => handle,
            Err(e) => {
                let reason = e.to_string();
                self.inner.bindings.update(tab_id, |b| {
                    b.state = BindingState::SwitchFailed {
                        target: target.to_string(),
                        reason: reason.clone(),
                    };
                    b.visible = false;
                })?;
                tracing::warn!(
                    tab_id = %tab_id,
                    from = %binding.backend_name,
                    to = %target,
                    reason = %reason,
                    "Engine switch failed"
                );
                return Err(switch_failed(reason));
            }
        };

        self.inner.bindings.add_route(target, &handle.local_id, tab_id);
        self.inner.bindings.update(tab_id, |b| {
            b.backend_name = target.to_string();
            b.local_tab_id = handle.local_id.clone();
            b.state = BindingState::Stable;
            b.snapshot = None;
        })?;

        if snapshot.is_replayable() {
            match target_engine.navigate(&handle.local_id, &snapshot.url).await {
                Ok(_) => {}
                Err(e) if e.is_load_error() => {
                    tracing::debug!(tab_id = %tab_id, url = %snapshot.url, "Replayed load failed");
                }
                Err(e) => {
                    tracing::warn!(tab_id = %tab_id, error = %e, "Failed to replay navigation");
                }
            }
        }

        let was_visible = binding.visible;
        if was_visible {
            let _display = self.inner.display.lock().await;
            // Someone else may have taken the display meanwhile
            if self.inner.bindings.visible_tab().as_deref() == Some(tab_id) {
                if let Err(e) = target_engine.show(&handle.local_id).await {
                    tracing::warn!(tab_id = %tab_id, error = %e, "Failed to show re-homed tab");
                    self.inner.bindings.set_visible(None);
                }
            }
        }

        tracing::info!(
            tab_id = %tab_id,
            from = %binding.backend_name,
            to = %target,
            local_id = %handle.local_id,
            "Switched engine"
        );

        Ok(self.inner.bindings.get(tab_id)?.info())
    }

    pub async fn navigate(&self, tab_id: &str, url: &str) -> Result<LoadOutcome> {
        self.load(tab_id, |engine, local| async move {
            engine.navigate(&local, url).await
        })
        .await
    }

    pub async fn go_back(&self, tab_id: &str) -> Result<LoadOutcome> {
        self.load(tab_id, |engine, local| async move { engine.go_back(&local).await })
            .await
    }

    pub async fn go_forward(&self, tab_id: &str) -> Result<LoadOutcome> {
        self.load(tab_id, |engine, local| async move {
            engine.go_forward(&local).await
        })
        .await
    }

    pub async fn reload(&self, tab_id: &str) -> Result<LoadOutcome> {
        self.load(tab_id, |engine, local| async move { engine.reload(&local).await })
            .await
    }

    pub async fn stop(&self, tab_id: &str) -> Result<()> {
        self.delegate(tab_id, |engine, local| async move { engine.stop(&local).await })
            .await
    }

    pub async fn execute_script(&self, tab_id: &str, code: &str) -> Result<Value> {
        self.delegate(tab_id, |engine, local| async move {
            engine.execute_script(&local, code).await
        })
        .await
    }

    /// Clear the cache of one tab, or of every ready engine when `tab_id` is `None`.
    pub async fn clear_cache(&self, tab_id: Option<&str>) -> Result<()> {
        match tab_id {
            Some(tab_id) => {
                self.delegate(tab_id, |engine, local| async move {
                    engine.clear_cache(ClearScope::Tab(local)).await
                })
                .await
            }
            None => {
                self.clear_everywhere(|engine| async move {
                    engine.clear_cache(ClearScope::Global).await
                })
                .await
            }
        }
    }

    pub async fn clear_cookies(&self, tab_id: Option<&str>) -> Result<()> {
        match tab_id {
            Some(tab_id) => {
                self.delegate(tab_id, |engine, local| async move {
                    engine.clear_cookies(ClearScope::Tab(local)).await
                })
                .await
            }
            None => {
                self.clear_everywhere(|engine| async move {
                    engine.clear_cookies(ClearScope::Global).await
                })
                .await
            }
        }
    }

    async fn clear_everywhere<F, Fut>(&self, op: F) -> Result<()>
    where
        F: Fn(Arc<dyn Engine>) -> Fut,
        Fut: Future<Output = axiom_engine::Result<()>>,
    {
        self.ensure_ready()?;
        let mut first_error = None;

        for engine in &self.inner.engines {
            if engine.lifecycle() != LifecycleState::Ready {
                continue;
            }
            let name = engine.name().to_string();
            if let Err(e) = op(Arc::clone(engine)).await {
                tracing::warn!(backend = %name, error = %e, "Failed to clear site data");
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    pub fn page_state(&self, tab_id: &str) -> Result<PageState> {
        self.ensure_ready()?;
        let binding = self.inner.bindings.get(tab_id)?;

        // Mid-switch the snapshot is the best answer there is
        if let (BindingState::Switching { .. }, Some(snapshot)) = (&binding.state, &binding.snapshot)
        {
            return Ok(PageState {
                url: snapshot.url.clone(),
                title: snapshot.title.clone(),
                can_go_back: snapshot.can_go_back,
                can_go_forward: snapshot.can_go_forward,
            });
        }

        let (binding, engine) = self.resolve(tab_id)?;
        engine
            .page_state(&binding.local_tab_id)
            .map_err(|e| self.engine_error(tab_id, e))
    }

    pub fn title(&self, tab_id: &str) -> Result<String> {
        Ok(self.page_state(tab_id)?.title)
    }

    pub fn url(&self, tab_id: &str) -> Result<String> {
        Ok(self.page_state(tab_id)?.url)
    }

    pub fn can_go_back(&self, tab_id: &str) -> Result<bool> {
        Ok(self.page_state(tab_id)?.can_go_back)
    }

    pub fn can_go_forward(&self, tab_id: &str) -> Result<bool> {
        Ok(self.page_state(tab_id)?.can_go_forward)
    }

    pub fn is_loading(&self, tab_id: &str) -> Result<bool> {
        self.ensure_ready()?;
        let (binding, engine) = self.resolve(tab_id)?;
        engine
            .is_loading(&binding.local_tab_id)
            .map_err(|e| self.engine_error(tab_id, e))
    }

    /// Register a callback for every fanned-out event.
    pub fn on_event<F>(&self, listener: F) -> ListenerHandle
    where
        F: Fn(&TabEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.inner.fanout.add_listener(listener)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TabEvent> {
        self.inner.fanout.subscribe()
    }

    /// Close every tab, then stop every engine. Idempotent.
    pub async fn shutdown(&self) -> Result<()> {
        if self.inner.readiness.send_replace(Readiness::Stopped) == Readiness::Stopped {
            return Ok(());
        }
        tracing::info!(tabs = self.inner.bindings.len(), "Shutting down orchestrator");

        for tab_id in self.inner.bindings.tab_ids() {
            if let Err(e) = self.close_binding(&tab_id).await {
                tracing::warn!(tab_id = %tab_id, error = %e, "Failed to close tab during shutdown");
            }
        }

        let results = join_all(self.inner.engines.iter().map(|engine| async move {
            (engine.name().to_string(), engine.shutdown().await)
        }))
        .await;

        for (name, result) in results {
            if let Err(e) = result {
                tracing::warn!(backend = %name, error = %e, "Engine shutdown failed");
            }
        }

        tracing::info!("Orchestrator stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axiom_backends::testing::{MockHost, MockRenderService, MockSearchService};
    use axiom_backends::{
        AnonymityConfig, AnonymityEngine, HardenedConfig, HardenedEngine, ServerRenderedEngine,
        StandardConfig, StandardEngine,
    };
    use axiom_engine::EventKind;
    use std::time::Duration;
    use tokio::net::TcpListener;

    struct Fixture {
        orchestrator: Orchestrator,
        standard_host: Arc<MockHost>,
        hardened_host: Arc<MockHost>,
        hardened: Arc<HardenedEngine>,
        anonymity: Arc<AnonymityEngine>,
        renderer: Arc<MockRenderService>,
        _dir: tempfile::TempDir,
        _proxy: TcpListener,
    }

    /// All four engines; hardened is degraded when `companion` is false.
    async fn fixture(companion: bool) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let proxy = TcpListener::bind("127.0.0.1:0").await.unwrap();

        let companion_binary = if companion {
            let path = dir.path().join("companion");
            std::fs::write(&path, b"#!/bin/sh\n").unwrap();
            Some(path)
        } else {
            Some(dir.path().join("missing-companion"))
        };

        let standard_host = Arc::new(MockHost::new());
        let hardened_host = Arc::new(MockHost::new());
        let anonymity_host = Arc::new(MockHost::new());
        let renderer = Arc::new(MockRenderService::new());

        let standard = Arc::new(StandardEngine::new(
            StandardConfig {
                profile_dir: dir.path().join("standard"),
            },
            standard_host.clone(),
            64,
        ));
        let hardened = Arc::new(HardenedEngine::new(
            HardenedConfig {
                profile_dir: dir.path().join("hardened"),
                companion_binary,
                blocked_domains: vec!["tracker.test".to_string()],
            },
            hardened_host.clone(),
            64,
        ));
        let anonymity = Arc::new(AnonymityEngine::new(
            AnonymityConfig {
                namespace_root: dir.path().join("anonymity"),
                proxy_addr: proxy.local_addr().unwrap().to_string(),
                probe_timeout_ms: 500,
            },
            anonymity_host,
            64,
        ));
        let server_rendered = Arc::new(ServerRenderedEngine::new(
            renderer.clone(),
            Arc::new(MockSearchService::default()),
            64,
        ));

        let engines: Vec<Arc<dyn Engine>> = vec![
            standard,
            hardened.clone(),
            anonymity.clone(),
            server_rendered,
        ];
        let orchestrator = Orchestrator::new(engines, 256).unwrap();
        orchestrator.start().await.unwrap();

        Fixture {
            orchestrator,
            standard_host,
            hardened_host,
            hardened,
            anonymity,
            renderer,
            _dir: dir,
            _proxy: proxy,
        }
    }

    async fn next_event(
        events: &mut broadcast::Receiver<TabEvent>,
        pred: impl Fn(&TabEvent) -> bool,
    ) -> TabEvent {
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let event = events.recv().await.unwrap();
                if pred(&event) {
                    return event;
                }
            }
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_calls_fail_before_start() {
        let orchestrator = Orchestrator::new(
            vec![Arc::new(ServerRenderedEngine::new(
                Arc::new(MockRenderService::new()),
                Arc::new(MockSearchService::default()),
                8,
            )) as Arc<dyn Engine>],
            8,
        )
        .unwrap();

        assert!(matches!(
            orchestrator
                .create_tab("t1", "server-rendered", TabOptions::default())
                .await,
            Err(OrchestratorError::NotInitialized)
        ));
        assert!(matches!(
            orchestrator.list_backends(),
            Err(OrchestratorError::NotInitialized)
        ));

        let waiter = {
            let orchestrator = orchestrator.clone();
            tokio::spawn(async move { orchestrator.wait_ready().await })
        };
        orchestrator.start().await.unwrap();
        waiter.await.unwrap().unwrap();
        assert_eq!(orchestrator.list_backends().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_and_unknown() {
        let f = fixture(true).await;
        let o = &f.orchestrator;
        o.create_tab("t1", "standard", TabOptions::default())
            .await
            .unwrap();

        assert!(matches!(
            o.create_tab("t1", "hardened", TabOptions::default()).await,
            Err(OrchestratorError::DuplicateTab(_))
        ));
        assert_eq!(o.get_binding("t1").unwrap().backend_name, "standard");

        let err = o
            .create_tab("t2", "gecko", TabOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::UnknownBackend(_)));
        assert!(err.is_caller_error());
        assert_eq!(o.tab_count(), 1);
    }

    #[tokio::test]
    async fn test_at_most_one_visible() {
        let f = fixture(true).await;
        let o = &f.orchestrator;
        o.create_tab("a", "standard", TabOptions::default())
            .await
            .unwrap();
        o.create_tab("b", "server-rendered", TabOptions::default())
            .await
            .unwrap();
        o.create_tab("c", "standard", TabOptions::default())
            .await
            .unwrap();

        o.show_tab("a").await.unwrap();
        o.show_tab("b").await.unwrap();
        assert!(!o.get_binding("a").unwrap().visible);
        assert!(!f.standard_host.is_visible("standard-a"));

        o.show_tab("c").await.unwrap();
        assert_eq!(f.standard_host.visible_labels(), vec!["standard-c"]);

        let visible: Vec<String> = o
            .list_bindings()
            .unwrap()
            .into_iter()
            .filter(|b| b.visible)
            .map(|b| b.tab_id)
            .collect();
        assert_eq!(visible, vec!["c".to_string()]);
    }

    #[tokio::test]
    async fn test_concurrent_shows_keep_one_visible() {
        let f = fixture(true).await;
        let o = &f.orchestrator;
        for id in ["a", "b", "c", "d"] {
            o.create_tab(id, "standard", TabOptions::default())
                .await
                .unwrap();
        }

        let (ra, rb, rc, rd) = tokio::join!(
            o.show_tab("a"),
            o.show_tab("b"),
            o.show_tab("c"),
            o.show_tab("d")
        );
        ra.unwrap();
        rb.unwrap();
        rc.unwrap();
        rd.unwrap();

        assert_eq!(f.standard_host.visible_labels().len(), 1);
        let visible = o
            .list_bindings()
            .unwrap()
            .into_iter()
            .filter(|b| b.visible)
            .count();
        assert_eq!(visible, 1);
    }

    #[tokio::test]
    async fn test_hide_is_idempotent() {
        let f = fixture(true).await;
        let o = &f.orchestrator;
        o.create_tab("t1", "standard", TabOptions::default())
            .await
            .unwrap();
        o.show_tab("t1").await.unwrap();

        o.hide_tab("t1").await.unwrap();
        o.hide_tab("t1").await.unwrap();
        assert!(!o.get_binding("t1").unwrap().visible);
        assert!(o.visible_tab().is_none());
    }

    #[tokio::test]
    async fn test_switch_carries_state_and_visibility() {
        let f = fixture(true).await;
        let o = &f.orchestrator;
        o.create_tab("t1", "standard", TabOptions::default())
            .await
            .unwrap();
        let outcome = o.navigate("t1", "https://example.com").await.unwrap();
        assert!(outcome.is_committed());
        o.show_tab("t1").await.unwrap();
        assert!(o.get_binding("t1").unwrap().visible);
        assert_eq!(o.url("t1").unwrap(), "https://example.com");

        let info = o.switch_engine("t1", "server-rendered").await.unwrap();
        assert_eq!(info.backend_name, "server-rendered");
        assert_eq!(info.state, BindingState::Stable);
        assert!(info.visible);
        assert_eq!(o.url("t1").unwrap(), "https://example.com");
        assert_eq!(f.renderer.requests(), vec!["https://example.com"]);
        // The old view was released
        assert_eq!(f.standard_host.closed_labels(), vec!["standard-t1"]);
    }

    #[tokio::test]
    async fn test_switch_round_trip() {
        let f = fixture(true).await;
        let o = &f.orchestrator;
        o.create_tab("t1", "standard", TabOptions::with_url("https://rust-lang.org"))
            .await
            .unwrap();
        assert_eq!(o.url("t1").unwrap(), "https://rust-lang.org");

        o.switch_engine("t1", "server-rendered").await.unwrap();
        o.switch_engine("t1", "standard").await.unwrap();

        let binding = o.get_binding("t1").unwrap();
        assert_eq!(binding.backend_name, "standard");
        assert_eq!(o.url("t1").unwrap(), "https://rust-lang.org");

        // Same backend is a no-op
        let again = o.switch_engine("t1", "standard").await.unwrap();
        assert_eq!(again, binding);
    }

    #[tokio::test]
    async fn test_create_on_degraded_backend() {
        let f = fixture(false).await;
        let o = &f.orchestrator;
        assert_eq!(f.hardened.lifecycle(), LifecycleState::Degraded);

        let err = o
            .create_tab("t1", "hardened", TabOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::EngineNotReady { .. }));
        assert!(err.is_caller_error());
        assert_eq!(f.hardened.tab_count(), 0);
        assert!(f.hardened_host.opened_specs().is_empty());

        let backends = o.list_backends().unwrap();
        let hardened = backends.iter().find(|b| b.name == "hardened").unwrap();
        assert!(hardened.degraded);
        assert!(hardened.reason.as_deref().unwrap().contains("companion"));
    }

    #[tokio::test]
    async fn test_switch_to_degraded_keeps_tab() {
        let f = fixture(false).await;
        let o = &f.orchestrator;
        o.create_tab("t1", "standard", TabOptions::with_url("https://example.com"))
            .await
            .unwrap();

        let err = o.switch_engine("t1", "hardened").await.unwrap_err();
        assert!(matches!(err, OrchestratorError::EngineNotReady { .. }));

        let binding = o.get_binding("t1").unwrap();
        assert_eq!(binding.backend_name, "standard");
        assert_eq!(binding.state, BindingState::Stable);
        assert!(f.standard_host.closed_labels().is_empty());
        assert_eq!(o.url("t1").unwrap(), "https://example.com");
    }

    #[tokio::test]
    async fn test_failed_switch_is_tracked_and_retryable() {
        let f = fixture(true).await;
        let o = &f.orchestrator;
        o.create_tab("t1", "standard", TabOptions::with_url("https://example.com"))
            .await
            .unwrap();
        o.show_tab("t1").await.unwrap();

        // Ready at validation time, gone by the time the view is opened
        f.hardened_host.set_unavailable(true);
        let err = o.switch_engine("t1", "hardened").await.unwrap_err();
        assert!(matches!(err, OrchestratorError::EngineSwitchFailed { .. }));

        let binding = o.get_binding("t1").unwrap();
        assert_eq!(binding.backend_name, "standard");
        assert!(matches!(binding.state, BindingState::SwitchFailed { .. }));
        assert!(!binding.visible);
        assert!(matches!(
            o.navigate("t1", "https://rust-lang.org").await,
            Err(OrchestratorError::EngineSwitchFailed { .. })
        ));

        let info = o.switch_engine("t1", "server-rendered").await.unwrap();
        assert_eq!(info.state, BindingState::Stable);
        assert_eq!(o.url("t1").unwrap(), "https://example.com");
    }

    #[tokio::test]
    async fn test_failed_switch_can_be_closed() {
        let f = fixture(true).await;
        let o = &f.orchestrator;
        o.create_tab("t1", "standard", TabOptions::default())
            .await
            .unwrap();
        f.hardened_host.set_unavailable(true);
        o.switch_engine("t1", "hardened").await.unwrap_err();

        o.close_tab("t1").await.unwrap();
        assert!(matches!(
            o.get_binding("t1"),
            Err(OrchestratorError::TabNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_tab_locks_follow_bindings() {
        let f = fixture(false).await;
        let o = &f.orchestrator;
        let lock_count = || o.inner.tab_locks.lock().len();

        for i in 0..50 {
            let ghost = format!("ghost{}", i);
            assert!(matches!(
                o.navigate(&ghost, "https://example.com").await,
                Err(OrchestratorError::TabNotFound(_))
            ));
            o.create_tab(&format!("bad{}", i), "gecko", TabOptions::default())
                .await
                .unwrap_err();
            o.create_tab(&format!("degraded{}", i), "hardened", TabOptions::default())
                .await
                .unwrap_err();
        }
        assert_eq!(lock_count(), 0);

        o.create_tab("t1", "standard", TabOptions::default())
            .await
            .unwrap();
        o.navigate("t1", "https://example.com").await.unwrap();
        assert_eq!(lock_count(), 1);

        o.close_tab("t1").await.unwrap();
        assert_eq!(lock_count(), 0);
    }

    #[tokio::test]
    async fn test_switch_survives_failed_close() {
        let f = fixture(true).await;
        let o = &f.orchestrator;
        o.create_tab("t1", "standard", TabOptions::with_url("https://example.com"))
            .await
            .unwrap();
        f.standard_host.set_close_error(Some("close failed"));

        let info = o.switch_engine("t1", "server-rendered").await.unwrap();
        assert_eq!(info.backend_name, "server-rendered");
        assert_eq!(info.state, BindingState::Stable);
        assert_eq!(o.url("t1").unwrap(), "https://example.com");

        let outcome = o.navigate("t1", "https://rust-lang.org").await.unwrap();
        assert!(outcome.is_committed());
        assert_eq!(o.backend("standard").unwrap().tab_count(), 0);
    }

    #[tokio::test]
    async fn test_anonymity_tabs_are_isolated() {
        let f = fixture(true).await;
        let o = &f.orchestrator;
        let a = o
            .create_tab("a", "anonymity", TabOptions::default())
            .await
            .unwrap();
        let b = o
            .create_tab("b", "anonymity", TabOptions::default())
            .await
            .unwrap();
        assert_ne!(a.local_tab_id, "a");

        let ns_a = f.anonymity.tab_namespace(&a.local_tab_id).unwrap();
        let ns_b = f.anonymity.tab_namespace(&b.local_tab_id).unwrap();
        assert_ne!(ns_a, ns_b);

        o.navigate("b", "https://example.com").await.unwrap();
        o.close_tab("a").await.unwrap();

        assert!(f.anonymity.tab_namespace(&a.local_tab_id).is_err());
        assert_eq!(f.anonymity.tab_namespace(&b.local_tab_id).unwrap(), ns_b);
        assert_eq!(o.url("b").unwrap(), "https://example.com");
        assert_eq!(f.anonymity.tab_count(), 1);
    }

    #[tokio::test]
    async fn test_close_removes_binding() {
        let f = fixture(true).await;
        let o = &f.orchestrator;
        o.create_tab("t1", "standard", TabOptions::default())
            .await
            .unwrap();
        o.show_tab("t1").await.unwrap();

        o.close_tab("t1").await.unwrap();
        assert!(matches!(
            o.get_binding("t1"),
            Err(OrchestratorError::TabNotFound(_))
        ));
        assert!(o.visible_tab().is_none());
        assert!(matches!(
            o.close_tab("t1").await,
            Err(OrchestratorError::TabNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_load_error_is_an_outcome() {
        let f = fixture(true).await;
        let o = &f.orchestrator;
        o.create_tab("t1", "standard", TabOptions::default())
            .await
            .unwrap();
        f.standard_host.fail_url("https://down.test/");

        let outcome = o.navigate("t1", "https://down.test/").await.unwrap();
        assert_eq!(
            outcome,
            LoadOutcome::Failed {
                url: "https://down.test/".to_string(),
                reason: "connection refused".to_string(),
            }
        );

        let outcome = o.navigate("t1", "https://example.com").await.unwrap();
        assert!(outcome.is_committed());

        // Blocked by tracking protection, reported the same way
        o.create_tab("h1", "hardened", TabOptions::default())
            .await
            .unwrap();
        let outcome = o.navigate("h1", "https://ads.tracker.test/x").await.unwrap();
        assert!(!outcome.is_committed());
    }

    #[tokio::test]
    async fn test_events_are_tagged() {
        let f = fixture(true).await;
        let o = &f.orchestrator;
        let mut events = o.subscribe();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        let _listener = o.on_event(move |event| {
            s.lock().push(event.event.clone());
            Ok(())
        });
        let _broken = o.on_event(|_| anyhow::bail!("subscriber failure"));

        let info = o
            .create_tab("a", "anonymity", TabOptions::default())
            .await
            .unwrap();
        o.navigate("a", "https://example.com").await.unwrap();

        let event = next_event(&mut events, |e| e.event == "title-updated").await;
        assert_eq!(event.tab_id.as_deref(), Some("a"));
        assert_eq!(event.backend_name, "anonymity");
        assert_eq!(
            event.payload,
            EventKind::TitleUpdated {
                title: "Title of https://example.com".to_string()
            }
        );
        assert_ne!(info.local_tab_id, "a");

        next_event(&mut events, |e| e.event == "loading-stop").await;
        let names = seen.lock().clone();
        assert!(names.contains(&"loading-start".to_string()));
        assert!(names.contains(&"navigation".to_string()));
    }

    #[tokio::test]
    async fn test_shutdown_closes_everything() {
        let f = fixture(true).await;
        let o = &f.orchestrator;
        o.create_tab("a", "standard", TabOptions::default())
            .await
            .unwrap();
        o.create_tab("b", "anonymity", TabOptions::default())
            .await
            .unwrap();

        o.shutdown().await.unwrap();
        assert_eq!(o.tab_count(), 0);
        assert_eq!(f.anonymity.lifecycle(), LifecycleState::Stopped);
        assert_eq!(f.anonymity.tab_count(), 0);
        assert_eq!(f.standard_host.closed_labels(), vec!["standard-a"]);
        assert!(matches!(
            o.create_tab("c", "standard", TabOptions::default()).await,
            Err(OrchestratorError::Stopped)
        ));
        o.shutdown().await.unwrap();
    }
}
