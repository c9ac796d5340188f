//! Engine registry construction from configuration

use std::sync::Arc;
use std::time::Duration;

use axiom_backends::{
    AnonymityConfig, AnonymityEngine, ContentHost, HardenedConfig, HardenedEngine,
    HttpRenderService, HttpSearchService, ServerRenderedEngine, StandardConfig, StandardEngine,
};
use axiom_engine::Engine;

use crate::config::Config;
use crate::error::OrchestratorError;
use crate::Result;

/// Build the enabled engines, in registration order: standard, hardened,
/// anonymity, server-rendered.
pub fn engines_from_config(
    config: &Config,
    host: Arc<dyn ContentHost>,
) -> Result<Vec<Arc<dyn Engine>>> {
    config.validate()?;
    let capacity = config.event_capacity;
    let mut engines: Vec<Arc<dyn Engine>> = Vec::new();

    if config.standard.enabled {
        engines.push(Arc::new(StandardEngine::new(
            StandardConfig {
                profile_dir: config.standard_profile_dir(),
            },
            host.clone(),
            capacity,
        )));
    }

    if config.hardened.enabled {
        engines.push(Arc::new(HardenedEngine::new(
            HardenedConfig {
                profile_dir: config.hardened_profile_dir(),
                companion_binary: config.hardened.companion_binary.clone(),
                blocked_domains: config.hardened.blocked_domains.clone(),
            },
            host.clone(),
            capacity,
        )));
    }

    if config.anonymity.enabled {
        engines.push(Arc::new(AnonymityEngine::new(
            AnonymityConfig {
                namespace_root: config.anonymity_root(),
                proxy_addr: config.anonymity.proxy_addr.clone(),
                probe_timeout_ms: config.anonymity.probe_timeout_ms,
            },
            host.clone(),
            capacity,
        )));
    }

    if config.server_rendered.enabled {
        let section = &config.server_rendered;
        let timeout = Duration::from_millis(section.request_timeout_ms);
        let renderer = HttpRenderService::new(&section.render_endpoint, timeout)
            .map_err(|e| OrchestratorError::Config(format!("render service: {}", e)))?;
        let search = HttpSearchService::new(&section.search_endpoint, timeout)
            .map_err(|e| OrchestratorError::Config(format!("search service: {}", e)))?;

        engines.push(Arc::new(ServerRenderedEngine::new(
            Arc::new(renderer),
            Arc::new(search),
            capacity,
        )));
    }

    tracing::debug!(
        backends = ?engines.iter().map(|e| e.name().to_string()).collect::<Vec<_>>(),
        "Built engine registry"
    );

    Ok(engines)
}
