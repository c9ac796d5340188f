//! Per-tab isolation namespaces
//!
//! A namespace is a private storage directory plus a distinct outbound
//! network identity. Nothing in one namespace is reachable from another.

use std::path::{Path, PathBuf};
use uuid::Uuid;

use axiom_engine::{EngineError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IsolationNamespace {
    id: String,
    dir: PathBuf,
}

impl IsolationNamespace {
    /// Create a fresh namespace directory under `root`.
    pub async fn allocate(root: &Path) -> Result<Self> {
        let id = Uuid::new_v4().simple().to_string();
        let dir = root.join(&id);

        tokio::fs::create_dir_all(&dir).await.map_err(|e| {
            EngineError::Host(format!(
                "cannot create isolation namespace {}: {}",
                dir.display(),
                e
            ))
        })?;

        tracing::debug!(namespace = %id, "Allocated isolation namespace");

        Ok(Self { id, dir })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// First eight characters, enough to tell namespaces apart in ids.
    pub fn short_id(&self) -> &str {
        &self.id[..8]
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Proxy URL whose credentials are unique to this namespace.
    ///
    /// SOCKS proxies that isolate by credentials (Tor's `IsolateSOCKSAuth`)
    /// put each namespace on its own circuit.
    pub fn proxy_url(&self, proxy_addr: &str) -> String {
        format!("socks5h://{}:{}@{}", self.id, self.short_id(), proxy_addr)
    }

    /// Remove everything the namespace ever stored.
    pub async fn purge(&self) -> Result<()> {
        match tokio::fs::remove_dir_all(&self.dir).await {
            Ok(()) => {
                tracing::debug!(namespace = %self.id, "Purged isolation namespace");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(EngineError::Purge {
                namespace: self.id.clone(),
                reason: e.to_string(),
            }),
        }
    }
}
