//! Page-level value types

use serde::{Deserialize, Serialize};

use crate::BLANK_URL;

/// What a tab currently shows.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageState {
    pub url: String,
    pub title: String,
    pub can_go_back: bool,
    pub can_go_forward: bool,
}

impl PageState {
    pub fn blank() -> Self {
        Self {
            url: BLANK_URL.to_string(),
            ..Default::default()
        }
    }
}

/// Navigation state captured from one engine to replay on another.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavigationSnapshot {
    pub url: String,
    pub title: String,
    pub can_go_back: bool,
    pub can_go_forward: bool,
}

impl NavigationSnapshot {
    /// Whether there is anything worth replaying.
    pub fn is_replayable(&self) -> bool {
        !is_blank_url(&self.url)
    }
}

impl From<PageState> for NavigationSnapshot {
    fn from(page: PageState) -> Self {
        Self {
            url: page.url,
            title: page.title,
            can_go_back: page.can_go_back,
            can_go_forward: page.can_go_forward,
        }
    }
}

/// Options for opening a backend-local tab.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabOptions {
    /// Loaded right after the tab is opened
    #[serde(default)]
    pub initial_url: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
}

impl TabOptions {
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            initial_url: Some(url.into()),
            ..Default::default()
        }
    }
}

/// Returned by an engine when it opens a tab.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabHandle {
    /// Id to use for every later call on this engine
    pub local_id: String,
    /// Storage/network partition the tab lives in
    pub namespace: String,
}

/// Target of a cache or cookie clear.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClearScope {
    Tab(String),
    Global,
}

/// Empty or placeholder URLs carry no navigation state.
pub fn is_blank_url(url: &str) -> bool {
    let trimmed = url.trim();
    trimmed.is_empty() || trimmed.eq_ignore_ascii_case(BLANK_URL)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_urls() {
        assert!(is_blank_url(""));
        assert!(is_blank_url("  "));
        assert!(is_blank_url("about:blank"));
        assert!(is_blank_url("ABOUT:BLANK"));
        assert!(!is_blank_url("https://example.com"));
    }

    #[test]
    fn test_snapshot_from_page() {
        let snapshot: NavigationSnapshot = PageState {
            url: "https://example.com".to_string(),
            title: "Example".to_string(),
            can_go_back: true,
            can_go_forward: false,
        }
        .into();

        assert!(snapshot.is_replayable());
        assert_eq!(snapshot.title, "Example");
        assert!(snapshot.can_go_back);
        assert!(!NavigationSnapshot::from(PageState::blank()).is_replayable());
    }
}
