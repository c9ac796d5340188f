//! Orchestrator configuration
//!
//! Read from a TOML file. Every section has defaults, so a partial file (or
//! none at all) still yields a working setup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::OrchestratorError;
use crate::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root for profiles, namespaces and the database
    pub data_dir: PathBuf,
    /// Defaults to `<data_dir>/axiom.db`
    pub database_path: Option<PathBuf>,
    /// Capacity of every event channel
    pub event_capacity: usize,
    /// Per-request timeout of the built-in content host
    pub host_timeout_ms: u64,
    pub standard: StandardSection,
    pub hardened: HardenedSection,
    pub anonymity: AnonymitySection,
    pub server_rendered: ServerRenderedSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StandardSection {
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HardenedSection {
    pub enabled: bool,
    pub companion_binary: Option<PathBuf>,
    pub blocked_domains: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnonymitySection {
    pub enabled: bool,
    /// SOCKS proxy, `host:port`
    pub proxy_addr: String,
    pub probe_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerRenderedSection {
    pub enabled: bool,
    pub render_endpoint: String,
    pub search_endpoint: String,
    pub request_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self::new(Self::default_data_dir())
    }
}

impl Default for StandardSection {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl Default for HardenedSection {
    fn default() -> Self {
        Self {
            enabled: true,
            companion_binary: None,
            blocked_domains: Vec::new(),
        }
    }
}

impl Default for AnonymitySection {
    fn default() -> Self {
        Self {
            enabled: true,
            proxy_addr: "127.0.0.1:9050".to_string(),
            probe_timeout_ms: 3_000,
        }
    }
}

impl Default for ServerRenderedSection {
    fn default() -> Self {
        Self {
            enabled: true,
            render_endpoint: "http://127.0.0.1:3000".to_string(),
            search_endpoint: "http://127.0.0.1:3000/search".to_string(),
            request_timeout_ms: 15_000,
        }
    }
}

impl Config {
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            data_dir,
            database_path: None,
            event_capacity: 256,
            host_timeout_ms: 15_000,
            standard: StandardSection::default(),
            hardened: HardenedSection::default(),
            anonymity: AnonymitySection::default(),
            server_rendered: ServerRenderedSection::default(),
        }
    }

    pub fn default_data_dir() -> PathBuf {
        dirs::data_local_dir()
            .map(|d| d.join("AXIOM"))
            .unwrap_or_else(|| PathBuf::from(".axiom"))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            OrchestratorError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: Config = toml::from_str(&raw)
            .map_err(|e| OrchestratorError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;

        tracing::info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.event_capacity == 0 {
            return Err(OrchestratorError::Config(
                "event_capacity must be greater than zero".to_string(),
            ));
        }
        if !(self.standard.enabled
            || self.hardened.enabled
            || self.anonymity.enabled
            || self.server_rendered.enabled)
        {
            return Err(OrchestratorError::Config(
                "at least one backend must be enabled".to_string(),
            ));
        }
        Ok(())
    }

    pub fn database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join("axiom.db"))
    }

    pub fn standard_profile_dir(&self) -> PathBuf {
        self.data_dir.join("standard")
    }

    pub fn hardened_profile_dir(&self) -> PathBuf {
        self.data_dir.join("hardened")
    }

    pub fn anonymity_root(&self) -> PathBuf {
        self.data_dir.join("anonymity")
    }
}

mod dirs {
    use std::path::PathBuf;

    pub fn data_local_dir() -> Option<PathBuf> {
        #[cfg(target_os = "windows")]
        {
            std::env::var("LOCALAPPDATA").ok().map(PathBuf::from)
        }
        #[cfg(target_os = "macos")]
        {
            std::env::var("HOME")
                .ok()
                .map(|h| PathBuf::from(h).join("Library/Application Support"))
        }
        #[cfg(target_os = "linux")]
        {
            std::env::var("XDG_DATA_HOME")
                .ok()
                .map(PathBuf::from)
                .or_else(|| {
                    std::env::var("HOME")
                        .ok()
                        .map(|h| PathBuf::from(h).join(".local/share"))
                })
        }
        #[cfg(not(any(target_os = "windows", target_os = "macos", target_os = "linux")))]
        {
            None
        }
    }
}
