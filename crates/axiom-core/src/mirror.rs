//! Persistent mirror of the tab table
//!
//! Keeps one [`TabRecord`] per logical tab so a shell can show what was open
//! last time. Page titles and URLs follow the event stream; everything else
//! is recorded explicitly by the caller.

use axiom_engine::{EventKind, PageState};
use axiom_storage::{StorageError, TabRecord, TabStore};

use crate::binding::BindingInfo;
use crate::fanout::{ListenerHandle, TabEvent};
use crate::orchestrator::Orchestrator;
use crate::Result;

pub struct TabMirror {
    store: TabStore,
    _listener: ListenerHandle,
}

/// Records may lag behind the binding table; a missing one is not an error.
fn ignore_missing(result: axiom_storage::Result<()>) -> anyhow::Result<()> {
    match result {
        Ok(()) | Err(StorageError::NotFound(_)) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn apply(store: &TabStore, event: &TabEvent) -> anyhow::Result<()> {
    let Some(tab_id) = event.tab_id.as_deref() else {
        return Ok(());
    };
    match &event.payload {
        EventKind::TitleUpdated { title } => ignore_missing(store.update_title(tab_id, title)),
        EventKind::Navigation { url, .. } => ignore_missing(store.update_url(tab_id, url)),
        _ => Ok(()),
    }
}

impl TabMirror {
    pub fn attach(orchestrator: &Orchestrator, store: TabStore) -> Self {
        let listener_store = store.clone();
        let listener = orchestrator.on_event(move |event| apply(&listener_store, event));
        Self {
            store,
            _listener: listener,
        }
    }

    pub fn store(&self) -> &TabStore {
        &self.store
    }

    pub fn record_created(&self, binding: &BindingInfo, page: &PageState) -> Result<()> {
        let mut record = TabRecord::new(&binding.tab_id, &binding.backend_name, &page.url);
        record.title = page.title.clone();
        self.store.upsert(&record)?;
        Ok(())
    }

    pub fn record_shown(&self, tab_id: &str) -> Result<()> {
        self.store.set_active(tab_id)?;
        Ok(())
    }

    pub fn record_hidden(&self, tab_id: &str) -> Result<()> {
        self.store.deactivate(tab_id)?;
        Ok(())
    }

    pub fn record_switched(&self, binding: &BindingInfo) -> Result<()> {
        self.store
            .update_backend(&binding.tab_id, &binding.backend_name)?;
        Ok(())
    }

    pub fn record_closed(&self, tab_id: &str) -> Result<()> {
        if !self.store.delete(tab_id)? {
            tracing::debug!(tab_id = %tab_id, "No record to delete");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::BindingState;
    use axiom_backends::testing::MockHost;
    use axiom_backends::{StandardConfig, StandardEngine};
    use axiom_engine::{Engine, TabOptions};
    use axiom_storage::Database;
    use std::sync::Arc;
    use std::time::Duration;

    fn binding(tab_id: &str, backend: &str) -> BindingInfo {
        BindingInfo {
            tab_id: tab_id.to_string(),
            backend_name: backend.to_string(),
            local_tab_id: tab_id.to_string(),
            visible: false,
            state: BindingState::Stable,
        }
    }

    async fn orchestrator(dir: &std::path::Path) -> Orchestrator {
        let engine = Arc::new(StandardEngine::new(
            StandardConfig {
                profile_dir: dir.join("standard"),
            },
            Arc::new(MockHost::new()),
            64,
        ));
        let orchestrator = Orchestrator::new(vec![engine as Arc<dyn Engine>], 64).unwrap();
        orchestrator.start().await.unwrap();
        orchestrator
    }

    #[tokio::test]
    async fn test_records_follow_explicit_calls() {
        let dir = tempfile::tempdir().unwrap();
        let o = orchestrator(dir.path()).await;
        let mirror = TabMirror::attach(&o, TabStore::new(Database::open_in_memory().unwrap()));

        mirror
            .record_created(&binding("a", "standard"), &PageState::blank())
            .unwrap();
        mirror
            .record_created(&binding("b", "standard"), &PageState::blank())
            .unwrap();

        mirror.record_shown("a").unwrap();
        mirror.record_shown("b").unwrap();
        assert_eq!(mirror.store().active().unwrap().unwrap().id, "b");

        mirror.record_hidden("b").unwrap();
        assert!(mirror.store().active().unwrap().is_none());

        mirror
            .record_switched(&binding("a", "server-rendered"))
            .unwrap();
        assert_eq!(
            mirror.store().get("a").unwrap().unwrap().backend,
            "server-rendered"
        );

        mirror.record_closed("a").unwrap();
        mirror.record_closed("a").unwrap();
        assert!(mirror.store().get("a").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_records_follow_events() {
        let dir = tempfile::tempdir().unwrap();
        let o = orchestrator(dir.path()).await;
        let mirror = TabMirror::attach(&o, TabStore::new(Database::open_in_memory().unwrap()));
        let mut events = o.subscribe();

        let info = o
            .create_tab("t1", "standard", TabOptions::default())
            .await
            .unwrap();
        mirror.record_created(&info, &o.page_state("t1").unwrap()).unwrap();
        o.navigate("t1", "https://example.com").await.unwrap();

        // Listeners run before the broadcast, so the record is current here
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if events.recv().await.unwrap().event == "loading-stop" {
                    break;
                }
            }
        })
        .await
        .unwrap();

        let record = mirror.store().get("t1").unwrap().unwrap();
        assert_eq!(record.url, "https://example.com");
        assert_eq!(record.title, "Title of https://example.com");
    }
}
