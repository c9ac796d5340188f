//! In-memory collaborators for engine and orchestrator tests

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};

use axiom_engine::{is_blank_url, Capability, CapabilitySet, NavigationHistory, PageState, BLANK_URL};

use crate::host::{ContentHost, HostError, SiteData, ViewSpec};
use crate::render::{RenderError, RenderRequest, RenderResponse, RenderService};
use crate::search::{SearchHit, SearchService};

#[derive(Default)]
struct MockView {
    history: NavigationHistory<(String, String)>,
    visible: bool,
}

impl MockView {
    fn page(&self) -> PageState {
        match self.history.current() {
            Some((url, title)) => PageState {
                url: url.clone(),
                title: title.clone(),
                can_go_back: self.history.can_go_back(),
                can_go_forward: self.history.can_go_forward(),
            },
            None => PageState::blank(),
        }
    }
}

#[derive(Default)]
struct MockHostState {
    views: HashMap<String, MockView>,
    failing: HashSet<String>,
    probe_error: Option<String>,
    close_error: Option<String>,
    unavailable: bool,
    opened: Vec<ViewSpec>,
    closed: Vec<String>,
    loaded: Vec<String>,
    cleared: Vec<(Option<String>, SiteData)>,
}

/// Content host that "loads" any URL instantly, titling it `Title of {url}`.
pub struct MockHost {
    capabilities: CapabilitySet,
    state: Mutex<MockHostState>,
}

impl MockHost {
    pub fn new() -> Self {
        Self::with_capabilities(CapabilitySet::full())
    }

    pub fn with_capabilities(capabilities: CapabilitySet) -> Self {
        Self {
            capabilities,
            state: Mutex::new(MockHostState::default()),
        }
    }

    /// Make every load of `url` fail with a load error.
    pub fn fail_url(&self, url: &str) {
        self.state.lock().failing.insert(url.to_string());
    }

    pub fn set_probe_error(&self, reason: Option<&str>) {
        self.state.lock().probe_error = reason.map(str::to_string);
    }

    /// Make `close` drop the view but still report `reason`.
    pub fn set_close_error(&self, reason: Option<&str>) {
        self.state.lock().close_error = reason.map(str::to_string);
    }

    /// Simulate the host process going away.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().unavailable = unavailable;
    }

    pub fn is_visible(&self, label: &str) -> bool {
        self.state
            .lock()
            .views
            .get(label)
            .map(|v| v.visible)
            .unwrap_or(false)
    }

    pub fn visible_labels(&self) -> Vec<String> {
        let mut labels: Vec<String> = self
            .state
            .lock()
            .views
            .iter()
            .filter(|(_, v)| v.visible)
            .map(|(label, _)| label.clone())
            .collect();
        labels.sort();
        labels
    }

    pub fn open_labels(&self) -> Vec<String> {
        let mut labels: Vec<String> = self.state.lock().views.keys().cloned().collect();
        labels.sort();
        labels
    }

    pub fn opened_specs(&self) -> Vec<ViewSpec> {
        self.state.lock().opened.clone()
    }

    pub fn closed_labels(&self) -> Vec<String> {
        self.state.lock().closed.clone()
    }

    pub fn loaded_urls(&self) -> Vec<String> {
        self.state.lock().loaded.clone()
    }

    pub fn cleared(&self) -> Vec<(Option<String>, SiteData)> {
        self.state.lock().cleared.clone()
    }

    fn check_available(state: &MockHostState) -> Result<(), HostError> {
        if state.unavailable {
            return Err(HostError::Unavailable("mock host is down".to_string()));
        }
        Ok(())
    }

    fn navigate_view(
        &self,
        label: &str,
        f: impl FnOnce(&mut NavigationHistory<(String, String)>),
    ) -> Result<PageState, HostError> {
        let mut state = self.state.lock();
        Self::check_available(&state)?;
        let view = state
            .views
            .get_mut(label)
            .ok_or_else(|| HostError::UnknownView(label.to_string()))?;
        f(&mut view.history);
        Ok(view.page())
    }
}

impl Default for MockHost {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContentHost for MockHost {
    async fn probe(&self) -> Result<(), HostError> {
        match self.state.lock().probe_error.clone() {
            Some(reason) => Err(HostError::Unavailable(reason)),
            None => Ok(()),
        }
    }

    fn capabilities(&self) -> CapabilitySet {
        self.capabilities.clone()
    }

    async fn open(&self, spec: ViewSpec) -> Result<(), HostError> {
        let mut state = self.state.lock();
        Self::check_available(&state)?;
        state.views.insert(spec.label.clone(), MockView::default());
        state.opened.push(spec);
        Ok(())
    }

    async fn load(&self, label: &str, url: &str) -> Result<PageState, HostError> {
        {
            let mut state = self.state.lock();
            Self::check_available(&state)?;
            if !state.views.contains_key(label) {
                return Err(HostError::UnknownView(label.to_string()));
            }
            if state.failing.contains(url) {
                return Err(HostError::Load {
                    url: url.to_string(),
                    reason: "connection refused".to_string(),
                });
            }
            state.loaded.push(url.to_string());
        }

        let entry = if is_blank_url(url) {
            (BLANK_URL.to_string(), String::new())
        } else {
            (url.to_string(), format!("Title of {}", url))
        };
        self.navigate_view(label, |history| history.push(entry))
    }

    async fn back(&self, label: &str) -> Result<PageState, HostError> {
        self.navigate_view(label, |history| {
            history.back();
        })
    }

    async fn forward(&self, label: &str) -> Result<PageState, HostError> {
        self.navigate_view(label, |history| {
            history.forward();
        })
    }

    async fn reload(&self, label: &str) -> Result<PageState, HostError> {
        self.navigate_view(label, |_| {})
    }

    async fn stop(&self, label: &str) -> Result<(), HostError> {
        self.navigate_view(label, |_| {}).map(|_| ())
    }

    async fn eval(&self, label: &str, script: &str) -> Result<Value, HostError> {
        if !self.capabilities.supports(Capability::ScriptExecution) {
            return Err(HostError::Unsupported("script execution".to_string()));
        }
        self.navigate_view(label, |_| {})?;
        Ok(json!({ "label": label, "script": script }))
    }

    async fn set_visible(&self, label: &str, visible: bool) -> Result<(), HostError> {
        let mut state = self.state.lock();
        Self::check_available(&state)?;
        let view = state
            .views
            .get_mut(label)
            .ok_or_else(|| HostError::UnknownView(label.to_string()))?;
        view.visible = visible;
        Ok(())
    }

    async fn clear(&self, label: Option<&str>, data: SiteData) -> Result<(), HostError> {
        let mut state = self.state.lock();
        Self::check_available(&state)?;
        if let Some(label) = label {
            if !state.views.contains_key(label) {
                return Err(HostError::UnknownView(label.to_string()));
            }
        }
        state.cleared.push((label.map(str::to_string), data));
        Ok(())
    }

    async fn close(&self, label: &str) -> Result<(), HostError> {
        let mut state = self.state.lock();
        state
            .views
            .remove(label)
            .ok_or_else(|| HostError::UnknownView(label.to_string()))?;
        state.closed.push(label.to_string());
        match state.close_error.clone() {
            Some(reason) => Err(HostError::Other(reason)),
            None => Ok(()),
        }
    }
}

#[derive(Default)]
struct MockRenderState {
    unreachable: bool,
    failing: HashSet<String>,
    requests: Vec<String>,
}

/// Render service answering `<html>{url}</html>` titled `Rendered {url}`.
#[derive(Default)]
pub struct MockRenderService {
    state: Mutex<MockRenderState>,
}

impl MockRenderService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.state.lock().unreachable = unreachable;
    }

    /// Answer renders of `url` with `success: false`.
    pub fn fail_url(&self, url: &str) {
        self.state.lock().failing.insert(url.to_string());
    }

    pub fn requests(&self) -> Vec<String> {
        self.state.lock().requests.clone()
    }
}

#[async_trait]
impl RenderService for MockRenderService {
    async fn health(&self) -> Result<(), RenderError> {
        if self.state.lock().unreachable {
            return Err(RenderError::Unreachable("connection refused".to_string()));
        }
        Ok(())
    }

    async fn render(&self, request: RenderRequest) -> Result<RenderResponse, RenderError> {
        let mut state = self.state.lock();
        if state.unreachable {
            return Err(RenderError::Unreachable("connection refused".to_string()));
        }
        state.requests.push(request.url.clone());

        if state.failing.contains(&request.url) {
            return Ok(RenderResponse {
                success: false,
                content: String::new(),
                title: String::new(),
                url: request.url,
                error: Some("render failed".to_string()),
            });
        }

        Ok(RenderResponse {
            success: true,
            content: format!("<html>{}</html>", request.url),
            title: format!("Rendered {}", request.url),
            url: request.url,
            error: None,
        })
    }
}

/// Search service returning the same hits for every query.
#[derive(Default)]
pub struct MockSearchService {
    hits: Vec<SearchHit>,
    queries: Mutex<Vec<String>>,
}

impl MockSearchService {
    pub fn new(hits: Vec<SearchHit>) -> Self {
        Self {
            hits,
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().clone()
    }
}

#[async_trait]
impl SearchService for MockSearchService {
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>, RenderError> {
        self.queries.lock().push(query.to_string());
        Ok(self.hits.clone())
    }
}
