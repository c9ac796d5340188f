//! Server-rendered engine
//!
//! Pages are rendered by a remote service. The service has no history, so
//! each tab keeps an ordered list with a cursor and back/forward re-render the
//! entry under the cursor. `axiom:` URLs are answered locally.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;

use axiom_engine::{
    Capability, CapabilitySet, ClearScope, Engine, EngineError, EngineEvent, EventEmitter,
    EventKind, Lifecycle, LifecycleState, NavigationHistory, NavigationSnapshot, PageState,
    Result, TabHandle, TabOptions,
};

use crate::names;
use crate::render::{RenderError, RenderRequest, RenderService};
use crate::reserved::{self, ReservedPage};
use crate::search::SearchService;

#[derive(Debug, Clone)]
struct Entry {
    url: String,
    title: String,
}

#[derive(Debug, Default)]
struct RenderedTab {
    history: NavigationHistory<Entry>,
    content: String,
    loading: bool,
    visible: bool,
}

impl RenderedTab {
    fn page(&self) -> PageState {
        match self.history.current() {
            Some(entry) => PageState {
                url: entry.url.clone(),
                title: entry.title.clone(),
                can_go_back: self.history.can_go_back(),
                can_go_forward: self.history.can_go_forward(),
            },
            None => PageState::blank(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Move {
    Push,
    Back,
    Forward,
    Reload,
}

pub struct ServerRenderedEngine {
    lifecycle: Lifecycle,
    events: EventEmitter,
    renderer: Arc<dyn RenderService>,
    search: Arc<dyn SearchService>,
    tabs: RwLock<HashMap<String, RenderedTab>>,
}

impl ServerRenderedEngine {
    pub fn new(
        renderer: Arc<dyn RenderService>,
        search: Arc<dyn SearchService>,
        event_capacity: usize,
    ) -> Self {
        let events = EventEmitter::new(event_capacity);
        Self {
            lifecycle: Lifecycle::new(names::SERVER_RENDERED, events.clone()),
            events,
            renderer,
            search,
            tabs: RwLock::new(HashMap::new()),
        }
    }

    /// Last rendered document of a tab.
    pub fn content(&self, id: &str) -> Result<String> {
        self.lifecycle.ensure_ready()?;
        self.with_tab(id, |tab| tab.content.clone())
    }

    pub fn is_visible(&self, id: &str) -> Result<bool> {
        self.with_tab(id, |tab| tab.visible)
    }

    fn with_tab<R>(&self, id: &str, f: impl FnOnce(&RenderedTab) -> R) -> Result<R> {
        self.tabs
            .read()
            .get(id)
            .map(f)
            .ok_or_else(|| EngineError::tab_not_found(names::SERVER_RENDERED, id))
    }

    fn with_tab_mut<R>(&self, id: &str, f: impl FnOnce(&mut RenderedTab) -> R) -> Result<R> {
        self.tabs
            .write()
            .get_mut(id)
            .map(f)
            .ok_or_else(|| EngineError::tab_not_found(names::SERVER_RENDERED, id))
    }

    fn validate(url: &str) -> Result<()> {
        if ReservedPage::is_reserved(url) {
            return ReservedPage::parse(url)
                .map(|_| ())
                .ok_or_else(|| EngineError::InvalidUrl(url.to_string()));
        }
        url::Url::parse(url)
            .map(|_| ())
            .map_err(|_| EngineError::InvalidUrl(url.to_string()))
    }

    /// Produce the document for `url`, locally for reserved pages.
    async fn fetch(&self, url: &str) -> Result<(Entry, String)> {
        if let Some(page) = ReservedPage::parse(url) {
            let content = match &page {
                ReservedPage::Home => reserved::render_home(),
                ReservedPage::Search(query) if query.is_empty() => {
                    reserved::render_search(query, &[])
                }
                ReservedPage::Search(query) => {
                    let hits = self.search.search(query).await.map_err(|e| {
                        EngineError::Load {
                            url: url.to_string(),
                            reason: e.to_string(),
                        }
                    })?;
                    reserved::render_search(query, &hits)
                }
            };
            return Ok((
                Entry {
                    url: url.to_string(),
                    title: page.title(),
                },
                content,
            ));
        }

        let response = match self
            .renderer
            .render(RenderRequest {
                url: url.to_string(),
            })
            .await
        {
            Ok(response) => response,
            Err(RenderError::Unreachable(reason)) => {
                self.lifecycle.degrade(reason.clone());
                return Err(EngineError::NotReady {
                    backend: names::SERVER_RENDERED.to_string(),
                    state: self.lifecycle.state(),
                    reason,
                });
            }
            Err(e) => {
                return Err(EngineError::Load {
                    url: url.to_string(),
                    reason: e.to_string(),
                })
            }
        };

        if !response.success {
            return Err(EngineError::Load {
                url: url.to_string(),
                reason: response
                    .error
                    .unwrap_or_else(|| "render failed".to_string()),
            });
        }

        let final_url = if response.url.is_empty() {
            url.to_string()
        } else {
            response.url
        };

        Ok((
            Entry {
                url: final_url,
                title: response.title,
            },
            response.content,
        ))
    }

    async fn step(&self, id: &str, movement: Move, url: Option<&str>) -> Result<PageState> {
        self.lifecycle.ensure_ready()?;

        // Pick the target and move the cursor under one lock
        let (target, previous_title) = {
            let mut tabs = self.tabs.write();
            let tab = tabs
                .get_mut(id)
                .ok_or_else(|| EngineError::tab_not_found(names::SERVER_RENDERED, id))?;
            let previous_title = tab.page().title;

            let target = match movement {
                Move::Push => url.map(str::to_string),
                Move::Back => tab.history.back().map(|e| e.url.clone()),
                Move::Forward => tab.history.forward().map(|e| e.url.clone()),
                Move::Reload => tab.history.current().map(|e| e.url.clone()),
            };

            match target {
                Some(target) => {
                    tab.loading = true;
                    (target, previous_title)
                }
                // Nothing to move to
                None => return Ok(tab.page()),
            }
        };

        self.events
            .tab(id, EventKind::LoadingStart { url: target.clone() });

        let fetched = self.fetch(&target).await;

        let committed = self.with_tab_mut(id, |tab| {
            tab.loading = false;
            match fetched {
                Ok((entry, content)) => {
                    if movement == Move::Push {
                        tab.history.push(entry);
                    } else {
                        tab.history.replace_current(entry);
                    }
                    tab.content = content;
                    Ok(tab.page())
                }
                Err(e) => {
                    match movement {
                        Move::Back => {
                            tab.history.forward();
                        }
                        Move::Forward => {
                            tab.history.back();
                        }
                        Move::Push | Move::Reload => {}
                    }
                    Err(e)
                }
            }
        })?;

        match committed {
            Ok(page) => {
                self.events.tab(
                    id,
                    EventKind::Navigation {
                        url: page.url.clone(),
                        can_go_back: page.can_go_back,
                        can_go_forward: page.can_go_forward,
                    },
                );
                if page.title != previous_title {
                    self.events.tab(
                        id,
                        EventKind::TitleUpdated {
                            title: page.title.clone(),
                        },
                    );
                }
                self.events
                    .tab(id, EventKind::LoadingStop { url: page.url.clone() });
                Ok(page)
            }
            Err(error) => {
                if let EngineError::Load { url, reason } = &error {
                    tracing::debug!(tab_id = %id, url = %url, "Render failed");
                    self.events.tab(
                        id,
                        EventKind::LoadError {
                            url: url.clone(),
                            reason: reason.clone(),
                        },
                    );
                }
                self.events.tab(id, EventKind::LoadingStop { url: target });
                Err(error)
            }
        }
    }
}

#[async_trait]
impl Engine for ServerRenderedEngine {
    fn name(&self) -> &str {
        names::SERVER_RENDERED
    }

    fn lifecycle(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    fn degraded_reason(&self) -> Option<String> {
        self.lifecycle.reason()
    }

    fn capabilities(&self) -> CapabilitySet {
        [Capability::Navigation, Capability::History]
            .into_iter()
            .collect()
    }

    fn isolation_namespace(&self) -> &str {
        names::SERVER_RENDERED
    }

    fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    fn tab_count(&self) -> usize {
        self.tabs.read().len()
    }

    async fn initialize(&self) -> Result<LifecycleState> {
        self.lifecycle
            .transition_to(LifecycleState::Initializing, None)?;

        match self.renderer.health().await {
            Ok(()) => {
                self.lifecycle.transition_to(LifecycleState::Ready, None)?;
                tracing::info!(backend = names::SERVER_RENDERED, "Engine ready");
            }
            Err(e) => {
                self.lifecycle
                    .transition_to(LifecycleState::Degraded, Some(e.to_string()))?;
            }
        }

        Ok(self.lifecycle.state())
    }

    async fn shutdown(&self) -> Result<()> {
        if !self.lifecycle.begin_shutdown() {
            return Ok(());
        }
        self.tabs.write().clear();
        self.lifecycle.finish_shutdown()?;
        tracing::info!(backend = names::SERVER_RENDERED, "Engine stopped");
        Ok(())
    }

    async fn create_tab(&self, id: &str, options: TabOptions) -> Result<TabHandle> {
        self.lifecycle.ensure_ready()?;
        {
            let mut tabs = self.tabs.write();
            if tabs.contains_key(id) {
                return Err(EngineError::TabExists {
                    backend: names::SERVER_RENDERED.to_string(),
                    tab_id: id.to_string(),
                });
            }
            tabs.insert(id.to_string(), RenderedTab::default());
        }

        tracing::info!(backend = names::SERVER_RENDERED, tab_id = %id, "Opened tab");

        if let Some(url) = options.initial_url.as_deref() {
            if let Err(e) = self.navigate(id, url).await {
                tracing::debug!(tab_id = %id, error = %e, "Initial render failed");
            }
        }

        Ok(TabHandle {
            local_id: id.to_string(),
            namespace: names::SERVER_RENDERED.to_string(),
        })
    }

    async fn close_tab(&self, id: &str) -> Result<()> {
        self.lifecycle.ensure_not_stopped()?;
        self.tabs
            .write()
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| EngineError::tab_not_found(names::SERVER_RENDERED, id))
    }

    async fn navigate(&self, id: &str, url: &str) -> Result<PageState> {
        Self::validate(url)?;
        self.step(id, Move::Push, Some(url)).await
    }

    async fn go_back(&self, id: &str) -> Result<PageState> {
        self.step(id, Move::Back, None).await
    }

    async fn go_forward(&self, id: &str) -> Result<PageState> {
        self.step(id, Move::Forward, None).await
    }

    async fn reload(&self, id: &str) -> Result<PageState> {
        self.step(id, Move::Reload, None).await
    }

    async fn stop(&self, id: &str) -> Result<()> {
        self.lifecycle.ensure_ready()?;
        self.with_tab_mut(id, |tab| tab.loading = false)
    }

    async fn execute_script(&self, id: &str, _code: &str) -> Result<Value> {
        self.lifecycle.ensure_ready()?;
        self.with_tab(id, |_| ())?;
        Err(EngineError::Unsupported {
            backend: names::SERVER_RENDERED.to_string(),
            capability: Capability::ScriptExecution,
        })
    }

    async fn show(&self, id: &str) -> Result<()> {
        self.lifecycle.ensure_ready()?;
        self.with_tab_mut(id, |tab| tab.visible = true)
    }

    async fn hide(&self, id: &str) -> Result<()> {
        self.lifecycle.ensure_ready()?;
        self.with_tab_mut(id, |tab| tab.visible = false)
    }

    // Nothing is kept locally beyond the rendered document
    async fn clear_cache(&self, scope: ClearScope) -> Result<()> {
        self.lifecycle.ensure_ready()?;
        match scope {
            ClearScope::Tab(id) => self.with_tab(&id, |_| ()),
            ClearScope::Global => Ok(()),
        }
    }

    async fn clear_cookies(&self, scope: ClearScope) -> Result<()> {
        self.clear_cache(scope).await
    }

    fn page_state(&self, id: &str) -> Result<PageState> {
        self.lifecycle.ensure_ready()?;
        self.with_tab(id, RenderedTab::page)
    }

    fn is_loading(&self, id: &str) -> Result<bool> {
        self.lifecycle.ensure_ready()?;
        self.with_tab(id, |tab| tab.loading)
    }

    fn snapshot(&self, id: &str) -> Result<NavigationSnapshot> {
        self.lifecycle.ensure_not_stopped()?;
        self.with_tab(id, |tab| tab.page().into())
    }

    fn tab_namespace(&self, id: &str) -> Result<String> {
        self.with_tab(id, |_| names::SERVER_RENDERED.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::SearchHit;
    use crate::testing::{MockRenderService, MockSearchService};

    async fn ready() -> (ServerRenderedEngine, Arc<MockRenderService>, Arc<MockSearchService>) {
        let renderer = Arc::new(MockRenderService::new());
        let search = Arc::new(MockSearchService::new(vec![SearchHit {
            title: "The Rust Book".to_string(),
            url: "https://doc.rust-lang.org/book/".to_string(),
            snippet: String::new(),
        }]));
        let engine = ServerRenderedEngine::new(renderer.clone(), search.clone(), 64);
        assert_eq!(engine.initialize().await.unwrap(), LifecycleState::Ready);
        engine.create_tab("t1", TabOptions::default()).await.unwrap();
        (engine, renderer, search)
    }

    #[tokio::test]
    async fn test_back_and_forward_rerender() {
        let (engine, renderer, _) = ready().await;
        engine.navigate("t1", "https://a.test/").await.unwrap();
        engine.navigate("t1", "https://b.test/").await.unwrap();

        let page = engine.go_back("t1").await.unwrap();
        assert_eq!(page.url, "https://a.test/");
        assert!(page.can_go_forward);
        assert_eq!(engine.content("t1").unwrap(), "<html>https://a.test/</html>");

        let page = engine.go_forward("t1").await.unwrap();
        assert_eq!(page.url, "https://b.test/");
        assert!(!page.can_go_forward);

        assert_eq!(
            renderer.requests(),
            vec![
                "https://a.test/",
                "https://b.test/",
                "https://a.test/",
                "https://b.test/"
            ]
        );
    }

    #[tokio::test]
    async fn test_failed_back_restores_cursor() {
        let (engine, renderer, _) = ready().await;
        engine.navigate("t1", "https://a.test/").await.unwrap();
        engine.navigate("t1", "https://b.test/").await.unwrap();
        renderer.fail_url("https://a.test/");

        let err = engine.go_back("t1").await.unwrap_err();
        assert!(err.is_load_error());

        let page = engine.page_state("t1").unwrap();
        assert_eq!(page.url, "https://b.test/");
        assert!(page.can_go_back);
        assert!(!page.can_go_forward);
        assert_eq!(engine.lifecycle(), LifecycleState::Ready);
    }

    #[tokio::test]
    async fn test_back_at_start_is_noop() {
        let (engine, renderer, _) = ready().await;
        let page = engine.go_back("t1").await.unwrap();
        assert_eq!(page, PageState::blank());
        assert!(renderer.requests().is_empty());
    }

    #[tokio::test]
    async fn test_reserved_pages_stay_local() {
        let (engine, renderer, search) = ready().await;

        let page = engine.navigate("t1", "axiom://home").await.unwrap();
        assert_eq!(page.title, "Home");

        let page = engine
            .navigate("t1", "axiom://search?q=rust")
            .await
            .unwrap();
        assert_eq!(page.title, "rust - Search");
        assert!(engine.content("t1").unwrap().contains("The Rust Book"));

        assert!(renderer.requests().is_empty());
        assert_eq!(search.queries(), vec!["rust"]);
    }

    #[tokio::test]
    async fn test_load_error_keeps_tab_usable() {
        let (engine, renderer, _) = ready().await;
        let mut events = engine.subscribe();
        renderer.fail_url("https://broken.test/");

        let err = engine
            .navigate("t1", "https://broken.test/")
            .await
            .unwrap_err();
        assert!(err.is_load_error());

        let mut saw_error = false;
        while let Ok(event) = events.try_recv() {
            if matches!(event.kind, EventKind::LoadError { .. }) {
                assert_eq!(event.tab_id.as_deref(), Some("t1"));
                saw_error = true;
            }
        }
        assert!(saw_error);

        engine.navigate("t1", "https://ok.test/").await.unwrap();
        assert_eq!(engine.page_state("t1").unwrap().url, "https://ok.test/");
    }

    #[tokio::test]
    async fn test_unreachable_service() {
        let renderer = Arc::new(MockRenderService::new());
        renderer.set_unreachable(true);
        let engine =
            ServerRenderedEngine::new(renderer.clone(), Arc::new(MockSearchService::default()), 8);
        assert_eq!(engine.initialize().await.unwrap(), LifecycleState::Degraded);
        assert!(engine.degraded_reason().is_some());

        let (engine, renderer, _) = ready().await;
        renderer.set_unreachable(true);
        let err = engine.navigate("t1", "https://a.test/").await.unwrap_err();
        assert!(matches!(err, EngineError::NotReady { .. }));
        assert_eq!(engine.lifecycle(), LifecycleState::Degraded);
        // Bookkeeping survives for re-homing
        assert!(engine.snapshot("t1").is_ok());
    }

    #[tokio::test]
    async fn test_script_execution_unsupported() {
        let (engine, _, _) = ready().await;
        let err = engine.execute_script("t1", "1 + 1").await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Unsupported {
                capability: Capability::ScriptExecution,
                ..
            }
        ));
        assert!(!engine.capabilities().supports(Capability::ScriptExecution));
        engine
            .clear_cookies(ClearScope::Tab("t1".to_string()))
            .await
            .unwrap();
    }
}
