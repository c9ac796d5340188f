//! AXIOM Privacy Protection
//!
//! Shared by the hardened and anonymity engines:
//! - Domain block list with allowlisted parents
//! - Tracking parameter stripping
//! - Lockdown scripts that remove identity-leaking page surfaces

mod surfaces;
mod tracking;

pub use surfaces::{lockdown_script, LeakySurface};
pub use tracking::{TrackingProtection, Verdict};
