//! Tracking protection
//!
//! URL-based blocking and parameter stripping, applied before a hardened
//! engine hands a URL to its content host.

use std::collections::HashSet;
use url::Url;

/// Known tracking parameters to strip from URLs
const TRACKING_PARAMS: &[&str] = &[
    "utm_source",
    "utm_medium",
    "utm_campaign",
    "utm_term",
    "utm_content",
    "utm_id",
    "fbclid",
    "gclid",
    "gclsrc",
    "dclid",
    "msclkid",
    "twclid",
    "yclid",
    "igshid",
    "mc_eid",
    "mc_cid",
    "_ga",
    "_gl",
];

/// Domains never blocked, including their subdomains
const ALLOW_DOMAINS: &[&str] = &["duckduckgo.com", "wikipedia.org"];

/// Outcome of checking a URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Load this (possibly cleaned) URL
    Allow(String),
    /// Refuse the load; carries the matched block-list entry
    Block(String),
}

pub struct TrackingProtection {
    blocked_domains: HashSet<String>,
    allow_domains: HashSet<String>,
    strip_params: HashSet<&'static str>,
}

impl TrackingProtection {
    pub fn new() -> Self {
        Self {
            blocked_domains: HashSet::new(),
            allow_domains: ALLOW_DOMAINS.iter().map(|d| d.to_string()).collect(),
            strip_params: TRACKING_PARAMS.iter().copied().collect(),
        }
    }

    pub fn with_blocklist<I, S>(domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut protection = Self::new();
        for domain in domains {
            protection.block_domain(domain.as_ref());
        }
        tracing::debug!(
            domains = protection.blocked_domain_count(),
            "Loaded tracking block list"
        );
        protection
    }

    pub fn block_domain(&mut self, domain: &str) {
        let domain = domain.trim().trim_start_matches("*.").to_lowercase();
        if !domain.is_empty() {
            self.blocked_domains.insert(domain);
        }
    }

    pub fn blocked_domain_count(&self) -> usize {
        self.blocked_domains.len()
    }

    /// Clean the URL, or refuse it when its host is on the block list.
    pub fn check(&self, url: &str) -> Verdict {
        if let Some(entry) = self.blocking_entry(url) {
            return Verdict::Block(entry);
        }
        Verdict::Allow(self.clean_url(url))
    }

    /// Block-list entry matching the URL's host or one of its parents.
    fn blocking_entry(&self, url: &str) -> Option<String> {
        if self.blocked_domains.is_empty() {
            return None;
        }

        let parsed = Url::parse(url).ok()?;
        let host = parsed.host_str()?.to_lowercase();
        let suffixes = domain_suffixes(&host);

        if suffixes.iter().any(|s| self.allow_domains.contains(*s)) {
            return None;
        }

        suffixes
            .into_iter()
            .find(|s| self.blocked_domains.contains(*s))
            .map(str::to_string)
    }

    /// Strip tracking parameters, leaving everything else untouched.
    pub fn clean_url(&self, url: &str) -> String {
        let Ok(mut parsed) = Url::parse(url) else {
            return url.to_string();
        };

        if parsed.query().is_none() {
            return url.to_string();
        }

        let kept: Vec<(String, String)> = parsed
            .query_pairs()
            .filter(|(key, _)| !self.strip_params.contains(key.as_ref()))
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();

        if kept.is_empty() {
            parsed.set_query(None);
        } else {
            parsed.query_pairs_mut().clear().extend_pairs(kept);
        }

        parsed.to_string()
    }
}

impl Default for TrackingProtection {
    fn default() -> Self {
        Self::new()
    }
}

/// `a.b.example.com` → `[a.b.example.com, b.example.com, example.com, com]`
fn domain_suffixes(host: &str) -> Vec<&str> {
    let mut suffixes = vec![host];
    let mut rest = host;
    while let Some(idx) = rest.find('.') {
        rest = &rest[idx + 1..];
        suffixes.push(rest);
    }
    suffixes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_url() {
        let protection = TrackingProtection::new();

        let cleaned = protection
            .clean_url("https://example.com/page?id=123&utm_source=test&utm_campaign=demo");
        assert_eq!(cleaned, "https://example.com/page?id=123");

        let cleaned = protection.clean_url("https://example.com/page?fbclid=123");
        assert_eq!(cleaned, "https://example.com/page");

        assert_eq!(
            protection.clean_url("https://example.com/"),
            "https://example.com/"
        );
    }

    #[test]
    fn test_block_domain_and_subdomains() {
        let protection = TrackingProtection::with_blocklist(["tracker.com", "*.ads.net", "  "]);
        assert_eq!(protection.blocked_domain_count(), 2);

        assert!(matches!(protection.check("https://tracker.com/pixel.gif"), Verdict::Block(_)));
        assert!(matches!(protection.check("https://sub.ads.net/script.js"), Verdict::Block(_)));
        assert!(matches!(protection.check("https://example.com/page"), Verdict::Allow(_)));
        assert_eq!(
            protection.check("https://cdn.tracker.com/a.js"),
            Verdict::Block("tracker.com".to_string())
        );
    }

    #[test]
    fn test_allowlist_wins() {
        let protection = TrackingProtection::with_blocklist(["duckduckgo.com"]);
        assert!(matches!(
            protection.check("https://duckduckgo.com/?q=rust"),
            Verdict::Allow(_)
        ));
    }

    #[test]
    fn test_domain_suffixes() {
        assert_eq!(
            domain_suffixes("a.example.com"),
            vec!["a.example.com", "example.com", "com"]
        );
    }
}
