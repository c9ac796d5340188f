//! Tab binding table
//!
//! Maps logical tab ids to the backend currently hosting them. Also keeps the
//! reverse route from `(backend, local id)` used to tag engine events.

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;

use axiom_engine::NavigationSnapshot;

use crate::error::OrchestratorError;
use crate::Result;

/// Engine-switch state of a binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum BindingState {
    Stable,
    Switching { target: String },
    /// The old local tab is gone and the target refused a new one
    SwitchFailed { target: String, reason: String },
}

impl BindingState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BindingState::Stable => "stable",
            BindingState::Switching { .. } => "switching",
            BindingState::SwitchFailed { .. } => "switch-failed",
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct TabBinding {
    pub tab_id: String,
    pub backend_name: String,
    pub local_tab_id: String,
    pub visible: bool,
    pub state: BindingState,
    /// Last known navigation state; kept while a switch is pending or failed
    pub snapshot: Option<NavigationSnapshot>,
}

impl TabBinding {
    pub fn new(tab_id: &str, backend_name: &str, local_tab_id: &str) -> Self {
        Self {
            tab_id: tab_id.to_string(),
            backend_name: backend_name.to_string(),
            local_tab_id: local_tab_id.to_string(),
            visible: false,
            state: BindingState::Stable,
            snapshot: None,
        }
    }

    pub fn info(&self) -> BindingInfo {
        BindingInfo {
            tab_id: self.tab_id.clone(),
            backend_name: self.backend_name.clone(),
            local_tab_id: self.local_tab_id.clone(),
            visible: self.visible,
            state: self.state.clone(),
        }
    }
}

/// Public view of a binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BindingInfo {
    pub tab_id: String,
    pub backend_name: String,
    pub local_tab_id: String,
    pub visible: bool,
    pub state: BindingState,
}

#[derive(Default)]
pub(crate) struct BindingTable {
    bindings: RwLock<HashMap<String, TabBinding>>,
    routes: RwLock<HashMap<(String, String), String>>,
}

impl BindingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, tab_id: &str) -> bool {
        self.bindings.read().contains_key(tab_id)
    }

    pub fn insert(&self, binding: TabBinding) -> Result<()> {
        let mut bindings = self.bindings.write();
        if bindings.contains_key(&binding.tab_id) {
            return Err(OrchestratorError::DuplicateTab(binding.tab_id));
        }
        self.routes.write().insert(
            (binding.backend_name.clone(), binding.local_tab_id.clone()),
            binding.tab_id.clone(),
        );
        bindings.insert(binding.tab_id.clone(), binding);
        Ok(())
    }

    pub fn get(&self, tab_id: &str) -> Result<TabBinding> {
        self.bindings
            .read()
            .get(tab_id)
            .cloned()
            .ok_or_else(|| OrchestratorError::TabNotFound(tab_id.to_string()))
    }

    pub fn update<R>(&self, tab_id: &str, f: impl FnOnce(&mut TabBinding) -> R) -> Result<R> {
        self.bindings
            .write()
            .get_mut(tab_id)
            .map(f)
            .ok_or_else(|| OrchestratorError::TabNotFound(tab_id.to_string()))
    }

    pub fn remove(&self, tab_id: &str) -> Option<TabBinding> {
        let removed = self.bindings.write().remove(tab_id)?;
        self.unroute(&removed.backend_name, &removed.local_tab_id);
        Some(removed)
    }

    pub fn route(&self, backend: &str, local_tab_id: &str) -> Option<String> {
        self.routes
            .read()
            .get(&(backend.to_string(), local_tab_id.to_string()))
            .cloned()
    }

    pub fn add_route(&self, backend: &str, local_tab_id: &str, tab_id: &str) {
        self.routes.write().insert(
            (backend.to_string(), local_tab_id.to_string()),
            tab_id.to_string(),
        );
    }

    pub fn unroute(&self, backend: &str, local_tab_id: &str) {
        self.routes
            .write()
            .remove(&(backend.to_string(), local_tab_id.to_string()));
    }

    /// The binding currently holding the display region.
    pub fn visible_tab(&self) -> Option<String> {
        self.bindings
            .read()
            .values()
            .find(|b| b.visible)
            .map(|b| b.tab_id.clone())
    }

    /// Give the display region to `tab_id` (or to nobody), clearing every other flag.
    pub fn set_visible(&self, tab_id: Option<&str>) {
        for binding in self.bindings.write().values_mut() {
            binding.visible = Some(binding.tab_id.as_str()) == tab_id;
        }
    }

    pub fn visible_count(&self) -> usize {
        self.bindings.read().values().filter(|b| b.visible).count()
    }

    pub fn tab_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.bindings.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn list(&self) -> Vec<BindingInfo> {
        let mut infos: Vec<BindingInfo> = self.bindings.read().values().map(|b| b.info()).collect();
        infos.sort_by(|a, b| a.tab_id.cmp(&b.tab_id));
        infos
    }

    pub fn len(&self) -> usize {
        self.bindings.read().len()
    }
}
