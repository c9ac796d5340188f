//! Page surfaces that leak identity regardless of proxying
//!
//! Each surface maps to a capability the engine must report as unsupported
//! and to a script fragment injected into every frame before page scripts run.

use axiom_engine::Capability;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LeakySurface {
    WebRtc,
    HighResolutionTimers,
    WebGl,
    Notifications,
    PersistentStorage,
}

impl LeakySurface {
    pub fn capability(&self) -> Capability {
        match self {
            LeakySurface::WebRtc => Capability::WebRtc,
            LeakySurface::HighResolutionTimers => Capability::HighResolutionTimers,
            LeakySurface::WebGl => Capability::WebGl,
            LeakySurface::Notifications => Capability::Notifications,
            LeakySurface::PersistentStorage => Capability::PersistentStorage,
        }
    }

    fn script(&self) -> &'static str {
        match self {
            LeakySurface::WebRtc => {
                r#"
    for (const name of ['RTCPeerConnection', 'webkitRTCPeerConnection', 'RTCDataChannel']) {
      if (name in window) {
        try { window[name] = undefined; } catch {}
        try { delete window[name]; } catch {}
      }
    }"#
            }
            LeakySurface::HighResolutionTimers => {
                r#"
    if (window.performance && typeof performance.now === 'function') {
      const coarse = performance.now.bind(performance);
      try { performance.now = () => Math.floor(coarse() / 100) * 100; } catch {}
    }"#
            }
            LeakySurface::WebGl => {
                r#"
    const getContext = HTMLCanvasElement.prototype.getContext;
    HTMLCanvasElement.prototype.getContext = function (kind, ...rest) {
      if (typeof kind === 'string' && kind.toLowerCase().includes('webgl')) { return null; }
      return getContext.call(this, kind, ...rest);
    };"#
            }
            LeakySurface::Notifications => {
                r#"
    if ('Notification' in window && typeof Notification === 'function') {
      try { Notification.requestPermission = () => Promise.resolve('denied'); } catch {}
    }"#
            }
            LeakySurface::PersistentStorage => {
                r#"
    if (navigator.storage && typeof navigator.storage.persist === 'function') {
      try { navigator.storage.persist = () => Promise.resolve(false); } catch {}
    }
    try { Object.defineProperty(window, 'indexedDB', { value: undefined }); } catch {}"#
            }
        }
    }
}

/// Initialization script disabling the given surfaces.
pub fn lockdown_script(surfaces: &[LeakySurface]) -> String {
    let mut body = String::new();
    for surface in surfaces {
        body.push_str(surface.script());
    }
    format!("(() => {{\n  try {{{}\n  }} catch {{}}\n}})();\n", body)
}
