//! Engine capabilities
//!
//! Engines report what they support up front. An engine that deliberately
//! disables a surface (the anonymity engine turning off WebRTC, say) must
//! leave it out of its set rather than degrading it silently.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Capability {
    /// Loading URLs
    Navigation,
    /// Back/forward traversal
    History,
    /// Running script in the page and returning a value
    ScriptExecution,
    /// Per-tab or global cookie clearing
    Cookies,
    /// Per-tab or global cache clearing
    Cache,
    /// Storage that survives closing the tab
    PersistentStorage,
    /// Peer-to-peer real-time channels
    WebRtc,
    /// `performance.now()` at full precision
    HighResolutionTimers,
    WebGl,
    Notifications,
}

impl Capability {
    pub const ALL: [Capability; 10] = [
        Capability::Navigation,
        Capability::History,
        Capability::ScriptExecution,
        Capability::Cookies,
        Capability::Cache,
        Capability::PersistentStorage,
        Capability::WebRtc,
        Capability::HighResolutionTimers,
        Capability::WebGl,
        Capability::Notifications,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Navigation => "navigation",
            Capability::History => "history",
            Capability::ScriptExecution => "script-execution",
            Capability::Cookies => "cookies",
            Capability::Cache => "cache",
            Capability::PersistentStorage => "persistent-storage",
            Capability::WebRtc => "web-rtc",
            Capability::HighResolutionTimers => "high-resolution-timers",
            Capability::WebGl => "web-gl",
            Capability::Notifications => "notifications",
        }
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Capability {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Capability::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == s.to_lowercase())
            .ok_or_else(|| format!("Unknown capability: {}", s))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilitySet(BTreeSet<Capability>);

impl CapabilitySet {
    /// Every capability a full browser engine offers.
    pub fn full() -> Self {
        Capability::ALL.iter().copied().collect()
    }

    pub fn supports(&self, capability: Capability) -> bool {
        self.0.contains(&capability)
    }

    /// Copy of this set with the given capabilities removed.
    pub fn without(&self, removed: &[Capability]) -> Self {
        self.0
            .iter()
            .copied()
            .filter(|c| !removed.contains(c))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        self.0.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_without_removes_only_named() {
        let set = CapabilitySet::full().without(&[Capability::WebRtc, Capability::WebGl]);
        assert!(!set.supports(Capability::WebRtc));
        assert!(!set.supports(Capability::WebGl));
        assert!(set.supports(Capability::Navigation));
        assert_eq!(set.len(), Capability::ALL.len() - 2);
    }

    #[test]
    fn test_parse_round_trip_names() {
        for capability in Capability::ALL {
            assert_eq!(capability.as_str().parse::<Capability>(), Ok(capability));
        }
        assert!("teleport".parse::<Capability>().is_err());
    }

    #[test]
    fn test_serializes_as_list() {
        let set: CapabilitySet = [Capability::History, Capability::Navigation]
            .into_iter()
            .collect();
        let json = serde_json::to_string(&set).unwrap();
        assert_eq!(json, r#"["navigation","history"]"#);
    }
}
