//! Run-scoped backend capabilities.
//!
//! Probed once at startup. Afterwards the only transition is the sticky
//! fallback latch, set the first time the primary backend answers with a
//! structured API error.

use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BackendCapabilities {
    pub mobile_available: bool,
    pub legacy_available: bool,
    pub coordinates_available: bool,
}

impl Default for BackendCapabilities {
    fn default() -> Self {
        Self { mobile_available: true, legacy_available: true, coordinates_available: true }
    }
}

/// Base URLs the article id is appended to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Endpoints {
    pub mobile: String,
    pub legacy: String,
    /// The mobile base points at a local rendering service.
    pub mobile_local: bool,
    pub legacy_local: bool,
}

#[derive(Debug)]
pub struct RunContext {
    pub capabilities: BackendCapabilities,
    pub endpoints: Endpoints,
    fallback_latched: AtomicBool,
}

impl RunContext {
    pub fn new(capabilities: BackendCapabilities, endpoints: Endpoints) -> Self {
        Self { capabilities, endpoints, fallback_latched: AtomicBool::new(false) }
    }

    /// Whether article fetches may use the mobile backend at all.
    pub fn mobile_usable(&self) -> bool {
        self.capabilities.mobile_available || self.endpoints.mobile_local
    }

    pub fn fallback_latched(&self) -> bool {
        self.fallback_latched.load(Ordering::Acquire)
    }

    /// Send every later article fetch to the fallback backend.
    ///
    /// Returns `true` if this call flipped the latch.
    pub fn latch_fallback(&self) -> bool {
        let flipped = !self.fallback_latched.swap(true, Ordering::AcqRel);
        if flipped {
            tracing::warn!("primary render backend returned an api error, using fallback for the rest of the run");
        }
        flipped
    }
}
