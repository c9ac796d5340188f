//! In-process content host
//!
//! Fetches pages over HTTP without running scripts or painting anything.
//! Each view gets its own client and cookie jar, routed through the view's
//! proxy when one is set. Used by the shell when no native host is attached.

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::redirect::Policy;
use scraper::{Html, Selector};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

use axiom_engine::{
    is_blank_url, Capability, CapabilitySet, NavigationHistory, PageState, BLANK_URL,
};

use crate::host::{ContentHost, HostError, SiteData, ViewSpec};

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (AXIOM Headless)";

#[derive(Debug, Clone)]
struct Visited {
    url: String,
    title: String,
}

struct View {
    spec: ViewSpec,
    client: reqwest::Client,
    history: NavigationHistory<Visited>,
    visible: bool,
}

impl View {
    fn page(&self) -> PageState {
        match self.history.current() {
            Some(v) => PageState {
                url: v.url.clone(),
                title: v.title.clone(),
                can_go_back: self.history.can_go_back(),
                can_go_forward: self.history.can_go_forward(),
            },
            None => PageState::blank(),
        }
    }
}

pub struct HeadlessHost {
    timeout: Duration,
    views: RwLock<HashMap<String, View>>,
}

impl HeadlessHost {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            views: RwLock::new(HashMap::new()),
        }
    }

    pub fn is_visible(&self, label: &str) -> bool {
        self.views
            .read()
            .get(label)
            .map(|v| v.visible)
            .unwrap_or(false)
    }

    fn build_client(&self, spec: &ViewSpec) -> Result<reqwest::Client, HostError> {
        let mut builder = reqwest::Client::builder()
            .cookie_store(true)
            .redirect(Policy::limited(10))
            .timeout(self.timeout)
            .user_agent(spec.user_agent.as_deref().unwrap_or(DEFAULT_USER_AGENT));

        // The view's proxy is authoritative; system proxy settings never apply
        builder = match spec.proxy.as_deref() {
            Some(proxy) => builder.proxy(
                reqwest::Proxy::all(proxy)
                    .map_err(|e| HostError::Other(format!("invalid proxy: {}", e)))?,
            ),
            None => builder.no_proxy(),
        };

        builder.build().map_err(|e| HostError::Other(e.to_string()))
    }

    fn client(&self, label: &str) -> Result<reqwest::Client, HostError> {
        self.views
            .read()
            .get(label)
            .map(|v| v.client.clone())
            .ok_or_else(|| HostError::UnknownView(label.to_string()))
    }

    fn with_view<R>(&self, label: &str, f: impl FnOnce(&mut View) -> R) -> Result<R, HostError> {
        self.views
            .write()
            .get_mut(label)
            .map(f)
            .ok_or_else(|| HostError::UnknownView(label.to_string()))
    }

    async fn fetch(client: &reqwest::Client, url: &str) -> Result<Visited, HostError> {
        if is_blank_url(url) {
            return Ok(Visited {
                url: BLANK_URL.to_string(),
                title: String::new(),
            });
        }

        let load_error = |reason: String| HostError::Load {
            url: url.to_string(),
            reason,
        };

        let parsed = url::Url::parse(url).map_err(|e| load_error(e.to_string()))?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(load_error(format!("unsupported scheme {}", parsed.scheme())));
        }

        let resp = client
            .get(parsed)
            .send()
            .await
            .map_err(|e| load_error(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(load_error(format!("HTTP {}", resp.status())));
        }

        let final_url = resp.url().to_string();
        let body = resp.text().await.map_err(|e| load_error(e.to_string()))?;

        Ok(Visited {
            url: final_url,
            title: extract_title(&body).unwrap_or_default(),
        })
    }
}

fn normalize_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn extract_title(body: &str) -> Option<String> {
    let doc = Html::parse_document(body);
    let sel = Selector::parse("title").ok()?;
    doc.select(&sel)
        .map(|el| normalize_whitespace(&el.text().collect::<Vec<_>>().join(" ")))
        .find(|t| !t.is_empty())
}

#[async_trait]
impl ContentHost for HeadlessHost {
    fn capabilities(&self) -> CapabilitySet {
        [
            Capability::Navigation,
            Capability::History,
            Capability::Cookies,
            Capability::Cache,
        ]
        .into_iter()
        .collect()
    }

    async fn open(&self, spec: ViewSpec) -> Result<(), HostError> {
        let client = self.build_client(&spec)?;
        let mut views = self.views.write();
        if views.contains_key(&spec.label) {
            return Err(HostError::Other(format!("view {} already open", spec.label)));
        }
        views.insert(
            spec.label.clone(),
            View {
                spec,
                client,
                history: NavigationHistory::new(),
                visible: false,
            },
        );
        Ok(())
    }

    async fn load(&self, label: &str, url: &str) -> Result<PageState, HostError> {
        let client = self.client(label)?;
        let visited = Self::fetch(&client, url).await?;
        self.with_view(label, |view| {
            view.history.push(visited);
            view.page()
        })
    }

    async fn back(&self, label: &str) -> Result<PageState, HostError> {
        self.with_view(label, |view| {
            view.history.back();
            view.page()
        })
    }

    async fn forward(&self, label: &str) -> Result<PageState, HostError> {
        self.with_view(label, |view| {
            view.history.forward();
            view.page()
        })
    }

    async fn reload(&self, label: &str) -> Result<PageState, HostError> {
        let current = self.with_view(label, |view| view.page().url)?;
        let client = self.client(label)?;
        let visited = Self::fetch(&client, &current).await?;
        self.with_view(label, |view| {
            view.history.replace_current(visited);
            view.page()
        })
    }

    async fn stop(&self, label: &str) -> Result<(), HostError> {
        self.with_view(label, |_| ())
    }

    async fn eval(&self, label: &str, _script: &str) -> Result<Value, HostError> {
        self.with_view(label, |_| ())?;
        Err(HostError::Unsupported("script execution".to_string()))
    }

    async fn set_visible(&self, label: &str, visible: bool) -> Result<(), HostError> {
        self.with_view(label, |view| view.visible = visible)
    }

    async fn clear(&self, label: Option<&str>, data: SiteData) -> Result<(), HostError> {
        // Responses are never cached; cookies live in the client's jar
        if data == SiteData::Cache {
            return match label {
                Some(label) => self.with_view(label, |_| ()),
                None => Ok(()),
            };
        }

        let labels: Vec<String> = match label {
            Some(label) => vec![label.to_string()],
            None => self.views.read().keys().cloned().collect(),
        };

        for label in labels {
            let spec = self.with_view(&label, |view| view.spec.clone())?;
            let client = self.build_client(&spec)?;
            self.with_view(&label, |view| view.client = client)?;
        }
        Ok(())
    }

    async fn close(&self, label: &str) -> Result<(), HostError> {
        self.views
            .write()
            .remove(label)
            .map(|_| ())
            .ok_or_else(|| HostError::UnknownView(label.to_string()))
    }
}
