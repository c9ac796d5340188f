//! AXIOM Content Engines
//!
//! Four engines behind one contract:
//! - `standard`: a content host with a shared profile
//! - `hardened`: tracking protection, lockdown script, optional companion binary
//! - `anonymity`: a fresh isolation namespace per tab, routed through a SOCKS proxy
//! - `server-rendered`: pages rendered remotely, history kept locally
//!
//! Host-backed engines talk to a [`ContentHost`]; the server-rendered engine
//! talks to a [`RenderService`] and a [`SearchService`].

mod anonymity;
mod hardened;
mod headless;
mod host;
mod hosted;
mod namespace;
mod render;
mod reserved;
mod search;
mod server_rendered;
mod standard;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use anonymity::{AnonymityConfig, AnonymityEngine};
pub use hardened::{HardenedConfig, HardenedEngine};
pub use headless::HeadlessHost;
pub use host::{ContentHost, HostError, SiteData, ViewSpec};
pub use namespace::IsolationNamespace;
pub use render::{HttpRenderService, RenderError, RenderRequest, RenderResponse, RenderService};
pub use reserved::{ReservedPage, RESERVED_SCHEME};
pub use search::{HttpSearchService, SearchHit, SearchService};
pub use server_rendered::ServerRenderedEngine;
pub use standard::{StandardConfig, StandardEngine};

/// Registry names of the built-in engines.
pub mod names {
    pub const STANDARD: &str = "standard";
    pub const HARDENED: &str = "hardened";
    pub const ANONYMITY: &str = "anonymity";
    pub const SERVER_RENDERED: &str = "server-rendered";
}
