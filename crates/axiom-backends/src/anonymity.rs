//! Anonymity engine
//!
//! Every tab gets its own isolation namespace: a private data directory and
//! its own proxy credentials. Closing a tab purges the namespace entirely;
//! a namespace that cannot be removed stays queued and is retried until it is.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

use axiom_engine::{
    CapabilitySet, ClearScope, Engine, EngineError, EngineEvent, LifecycleState,
    NavigationSnapshot, PageState, Result, TabHandle, TabOptions,
};
use axiom_privacy::{lockdown_script, LeakySurface};

use crate::host::{ContentHost, SiteData, ViewSpec};
use crate::hosted::{HostDriver, Step};
use crate::names;
use crate::namespace::IsolationNamespace;

const LOCKED_SURFACES: [LeakySurface; 5] = [
    LeakySurface::WebRtc,
    LeakySurface::HighResolutionTimers,
    LeakySurface::WebGl,
    LeakySurface::Notifications,
    LeakySurface::PersistentStorage,
];

fn default_probe_timeout_ms() -> u64 {
    3_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnonymityConfig {
    /// Parent directory of all per-tab namespaces
    pub namespace_root: PathBuf,
    /// SOCKS proxy, `host:port`
    pub proxy_addr: String,
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
}

pub struct AnonymityEngine {
    driver: HostDriver,
    config: AnonymityConfig,
    init_script: String,
    namespaces: RwLock<HashMap<String, IsolationNamespace>>,
    pending_purge: Mutex<Vec<IsolationNamespace>>,
}

impl AnonymityEngine {
    pub fn new(config: AnonymityConfig, host: Arc<dyn ContentHost>, event_capacity: usize) -> Self {
        let disabled = LOCKED_SURFACES.iter().map(|s| s.capability()).collect();
        Self {
            driver: HostDriver::new(names::ANONYMITY, host, disabled, event_capacity),
            config,
            init_script: lockdown_script(&LOCKED_SURFACES),
            namespaces: RwLock::new(HashMap::new()),
            pending_purge: Mutex::new(Vec::new()),
        }
    }

    /// Namespaces whose removal failed and will be retried.
    pub fn pending_purges(&self) -> usize {
        self.pending_purge.lock().len()
    }

    async fn retry_pending_purges(&self) {
        let pending: Vec<IsolationNamespace> = std::mem::take(&mut *self.pending_purge.lock());
        for namespace in pending {
            if let Err(e) = namespace.purge().await {
                tracing::error!(namespace = %namespace.id(), error = %e, "Namespace purge still failing");
                self.pending_purge.lock().push(namespace);
            }
        }
    }
}

async fn check_proxy(addr: String, timeout: Duration) -> std::result::Result<(), String> {
    match tokio::time::timeout(timeout, tokio::net::TcpStream::connect(&addr)).await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(e)) => Err(format!("anonymizing proxy {} unreachable: {}", addr, e)),
        Err(_) => Err(format!(
            "anonymizing proxy {} did not answer within {:?}",
            addr, timeout
        )),
    }
}

#[async_trait]
impl Engine for AnonymityEngine {
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
        names::ANONYMITY
    }

    fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.driver.events.subscribe()
    }

    fn tab_count(&self) -> usize {
        self.driver.tab_count()
    }

    async fn initialize(&self) -> Result<LifecycleState> {
        let addr = self.config.proxy_addr.clone();
        let timeout = Duration::from_millis(self.config.probe_timeout_ms);
        let root = self.config.namespace_root.clone();
        self.driver
            .initialize(async move {
                check_proxy(addr, timeout).await?;
                tokio::fs::create_dir_all(&root)
                    .await
                    .map_err(|e| format!("namespace root {}: {}", root.display(), e))
            })
            .await
    }

    async fn shutdown(&self) -> Result<()> {
        let result = self
            .driver
            .shutdown_with(|id| async move { self.close_tab(&id).await })
            .await;
        self.retry_pending_purges().await;
        result
    }

    async fn create_tab(&self, id: &str, options: TabOptions) -> Result<TabHandle> {
        self.driver.lifecycle.ensure_ready()?;

        let namespace = IsolationNamespace::allocate(&self.config.namespace_root).await?;
        let local_id = format!("{}@{}", id, namespace.short_id());

        let spec = ViewSpec {
            label: self.driver.label_for(&local_id),
            data_dir: Some(namespace.dir().to_path_buf()),
            init_script: Some(self.init_script.clone()),
            proxy: Some(namespace.proxy_url(&self.config.proxy_addr)),
            user_agent: options.user_agent.clone(),
        };

        let handle = match self.driver.open(&local_id, namespace.id(), spec).await {
            Ok(handle) => handle,
            Err(e) => {
                if let Err(purge) = namespace.purge().await {
                    tracing::error!(error = %purge, "Failed to purge namespace of unopened tab");
                    self.pending_purge.lock().push(namespace);
                }
                return Err(e);
            }
        };

        tracing::info!(
            tab_id = %id,
            local_id = %handle.local_id,
            namespace = %namespace.id(),
            "Opened isolated tab"
        );
        self.namespaces
            .write()
            .insert(handle.local_id.clone(), namespace);

        if let Some(url) = options.initial_url.as_deref() {
            if let Err(e) = self.driver.run(&handle.local_id, Step::Load(url)).await {
                tracing::debug!(tab_id = %id, error = %e, "Initial load failed");
            }
        }

        Ok(handle)
    }

    async fn close_tab(&self, id: &str) -> Result<()> {
        self.driver.lifecycle.ensure_not_stopped()?;
        let namespace = self
            .namespaces
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::tab_not_found(names::ANONYMITY, id))?;

        // Wipe through the host first so nothing in memory survives, then
        // drop the view, then the directory.
        if let Err(e) = self.driver.wipe(id).await {
            tracing::warn!(tab_id = %id, error = %e, "Host wipe failed, purging directory anyway");
        }
        let closed = self.driver.close(id).await;
        self.namespaces.write().remove(id);

        self.retry_pending_purges().await;
        if let Err(e) = namespace.purge().await {
            tracing::error!(tab_id = %id, namespace = %namespace.id(), error = %e, "Namespace purge failed");
            self.pending_purge.lock().push(namespace);
            return Err(e);
        }

        closed
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
    use axiom_engine::Capability;
    use tokio::net::TcpListener;

    struct Fixture {
        engine: AnonymityEngine,
        host: Arc<MockHost>,
        _dir: tempfile::TempDir,
        _proxy: TcpListener,
    }

    async fn ready() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let proxy = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let host = Arc::new(MockHost::new());
        let engine = AnonymityEngine::new(
            AnonymityConfig {
                namespace_root: dir.path().join("anonymity"),
                proxy_addr: proxy.local_addr().unwrap().to_string(),
                probe_timeout_ms: 500,
            },
            host.clone(),
            32,
        );
        assert_eq!(engine.initialize().await.unwrap(), LifecycleState::Ready);
        Fixture {
            engine,
            host,
            _dir: dir,
            _proxy: proxy,
        }
    }

    #[tokio::test]
    async fn test_unreachable_proxy_degrades() {
        let dir = tempfile::tempdir().unwrap();
        // Bind then drop to get a port nobody listens on
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().to_string()
        };
        let engine = AnonymityEngine::new(
            AnonymityConfig {
                namespace_root: dir.path().join("anonymity"),
                proxy_addr: addr,
                probe_timeout_ms: 500,
            },
            Arc::new(MockHost::new()),
            8,
        );

        assert_eq!(engine.initialize().await.unwrap(), LifecycleState::Degraded);
        let err = engine
            .create_tab("t1", TabOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotReady { .. }));
        assert_eq!(engine.tab_count(), 0);
    }

    #[tokio::test]
    async fn test_tabs_get_distinct_namespaces() {
        let f = ready().await;
        let a = f.engine.create_tab("a", TabOptions::default()).await.unwrap();
        let b = f.engine.create_tab("b", TabOptions::default()).await.unwrap();

        assert_ne!(a.namespace, b.namespace);
        assert_ne!(a.local_id, "a");
        assert!(a.local_id.starts_with("a@"));
        assert_eq!(f.engine.tab_namespace(&a.local_id).unwrap(), a.namespace);

        let specs = f.host.opened_specs();
        assert_ne!(specs[0].data_dir, specs[1].data_dir);
        assert_ne!(specs[0].proxy, specs[1].proxy);
    }

    #[tokio::test]
    async fn test_close_purges_only_own_namespace() {
        let f = ready().await;
        let a = f.engine.create_tab("a", TabOptions::default()).await.unwrap();
        let b = f.engine.create_tab("b", TabOptions::default()).await.unwrap();

        let specs = f.host.opened_specs();
        let dir_a = specs[0].data_dir.clone().unwrap();
        let dir_b = specs[1].data_dir.clone().unwrap();
        std::fs::write(dir_a.join("cookies"), b"a").unwrap();
        std::fs::write(dir_b.join("cookies"), b"b").unwrap();

        f.engine.close_tab(&a.local_id).await.unwrap();

        assert!(!dir_a.exists());
        assert_eq!(std::fs::read(dir_b.join("cookies")).unwrap(), b"b");
        assert_eq!(f.engine.tab_count(), 1);
        assert!(f.engine.tab_namespace(&b.local_id).is_ok());
        assert!(f
            .host
            .cleared()
            .iter()
            .any(|(label, data)| label.as_deref() == Some(f.engine.driver.label_for(&a.local_id).as_str())
                && *data == SiteData::All));
    }

    #[tokio::test]
    async fn test_identity_leaking_capabilities_unsupported() {
        let f = ready().await;
        let caps = f.engine.capabilities();
        for capability in [
            Capability::WebRtc,
            Capability::HighResolutionTimers,
            Capability::WebGl,
            Capability::PersistentStorage,
        ] {
            assert!(!caps.supports(capability), "{} should be off", capability);
        }
        assert!(caps.supports(Capability::Navigation));
    }

    #[tokio::test]
    async fn test_shutdown_purges_everything() {
        let f = ready().await;
        f.engine.create_tab("a", TabOptions::default()).await.unwrap();
        f.engine.create_tab("b", TabOptions::default()).await.unwrap();
        let dirs: Vec<PathBuf> = f
            .host
            .opened_specs()
            .into_iter()
            .filter_map(|s| s.data_dir)
            .collect();

        f.engine.shutdown().await.unwrap();
        assert_eq!(f.engine.lifecycle(), LifecycleState::Stopped);
        assert!(dirs.iter().all(|d| !d.exists()));
        assert_eq!(f.engine.pending_purges(), 0);
    }
}
