//! Privacy-hardened engine
//!
//! Same host as the standard engine, but with its own profile, tracking
//! protection on every navigation and a lockdown script in every view. When
//! a companion browser binary is configured it must be present.

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
use axiom_privacy::{lockdown_script, LeakySurface, TrackingProtection, Verdict};

use crate::host::{ContentHost, SiteData, ViewSpec};
use crate::hosted::{HostDriver, Step};
use crate::names;

const LOCKED_SURFACES: [LeakySurface; 2] = [LeakySurface::WebRtc, LeakySurface::Notifications];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HardenedConfig {
    pub profile_dir: PathBuf,
    /// Browser binary the host drives for hardened views
    #[serde(default)]
    pub companion_binary: Option<PathBuf>,
    #[serde(default)]
    pub blocked_domains: Vec<String>,
}

pub struct HardenedEngine {
    driver: HostDriver,
    config: HardenedConfig,
    protection: TrackingProtection,
    init_script: String,
}

impl HardenedEngine {
    pub fn new(config: HardenedConfig, host: Arc<dyn ContentHost>, event_capacity: usize) -> Self {
        let disabled = LOCKED_SURFACES.iter().map(|s| s.capability()).collect();
        Self {
            driver: HostDriver::new(names::HARDENED, host, disabled, event_capacity),
            protection: TrackingProtection::with_blocklist(&config.blocked_domains),
            init_script: lockdown_script(&LOCKED_SURFACES),
            config,
        }
    }

    /// Apply tracking protection before anything reaches the host.
    fn filter(&self, id: &str, url: &str) -> Result<String> {
        match self.protection.check(url) {
            Verdict::Allow(cleaned) => Ok(cleaned),
            Verdict::Block(entry) => {
                tracing::info!(tab_id = %id, url = %url, entry = %entry, "Blocked navigation");
                Err(self.driver.refuse_load(
                    id,
                    url,
                    format!("blocked by tracking protection ({})", entry),
                ))
            }
        }
    }
}

async fn check_companion(binary: Option<PathBuf>) -> std::result::Result<(), String> {
    let Some(binary) = binary else {
        return Ok(());
    };
    match tokio::fs::metadata(&binary).await {
        Ok(meta) if meta.is_file() => Ok(()),
        Ok(_) => Err(format!(
            "companion browser {} is not a file",
            binary.display()
        )),
        Err(e) => Err(format!(
            "companion browser {} not available: {}",
            binary.display(),
            e
        )),
    }
}

#[async_trait]
impl Engine for HardenedEngine {
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
        names::HARDENED
    }

    fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.driver.events.subscribe()
    }

    fn tab_count(&self) -> usize {
        self.driver.tab_count()
    }

    async fn initialize(&self) -> Result<LifecycleState> {
        let binary = self.config.companion_binary.clone();
        let profile_dir = self.config.profile_dir.clone();
        self.driver
            .initialize(async move {
                check_companion(binary).await?;
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
            data_dir: Some(self.config.profile_dir.clone()),
            init_script: Some(self.init_script.clone()),
            user_agent: options.user_agent.clone(),
            ..Default::default()
        };
        let handle = self.driver.open(id, names::HARDENED, spec).await?;

        if let Some(url) = options.initial_url.as_deref() {
            if let Err(e) = self.navigate(&handle.local_id, url).await {
                tracing::debug!(tab_id = %id, error = %e, "Initial load failed");
            }
        }

        Ok(handle)
    }

    async fn close_tab(&self, id: &str) -> Result<()> {
        self.driver.close(id).await
    }

    async fn navigate(&self, id: &str, url: &str) -> Result<PageState> {
        self.driver.lifecycle.ensure_ready()?;
        self.driver.ensure_tab(id)?;
        let url = self.filter(id, url)?;
        self.driver.run(id, Step::Load(&url)).await
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
