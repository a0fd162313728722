//! Session controller configuration.
//!
//! One environment setting controls the total inactivity timeout; an
//! absent, unparsable, or zero value disables inactivity tracking
//! entirely (the session then never auto-expires from inactivity, though
//! server-declared `401` expiry still applies).

use sessmux_core::activity::DEFAULT_THROTTLE_MS;
use sessmux_core::countdown::{DEFAULT_MODAL_THRESHOLD_MS, DEFAULT_WARNING_WINDOW_MS};
use sessmux_core::enforcer::DEFAULT_CLAIM_STALENESS_MS;

/// Environment variable holding the inactivity timeout in milliseconds.
pub const ENV_INACTIVITY_TIMEOUT: &str = "SESSMUX_INACTIVITY_TIMEOUT_MS";

pub const DEFAULT_TICK_MS: u64 = 1_000;
pub const DEFAULT_LOGIN_ROUTE: &str = "/login";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// `None` disables inactivity tracking.
    pub timeout_ms: Option<u64>,
    pub warning_window_ms: u64,
    pub modal_threshold_ms: u64,
    pub throttle_ms: u64,
    pub tick_ms: u64,
    pub claim_staleness_ms: u64,
    pub login_route: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout_ms: None,
            warning_window_ms: DEFAULT_WARNING_WINDOW_MS,
            modal_threshold_ms: DEFAULT_MODAL_THRESHOLD_MS,
            throttle_ms: DEFAULT_THROTTLE_MS,
            tick_ms: DEFAULT_TICK_MS,
            claim_staleness_ms: DEFAULT_CLAIM_STALENESS_MS,
            login_route: DEFAULT_LOGIN_ROUTE.to_owned(),
        }
    }
}

impl SessionConfig {
    pub fn with_timeout(timeout_ms: u64) -> Self {
        Self {
            timeout_ms: Some(timeout_ms),
            ..Default::default()
        }
    }

    /// Read the timeout from [`ENV_INACTIVITY_TIMEOUT`].
    pub fn from_env() -> Self {
        let raw = std::env::var(ENV_INACTIVITY_TIMEOUT).ok();
        Self {
            timeout_ms: parse_timeout(raw.as_deref()),
            ..Default::default()
        }
    }

    pub fn tracking_enabled(&self) -> bool {
        self.timeout_ms.is_some()
    }
}

/// Parse the configured timeout. Invalid values disable tracking rather
/// than erroring.
fn parse_timeout(raw: Option<&str>) -> Option<u64> {
    let raw = raw?.trim();
    match raw.parse::<u64>() {
        Ok(0) => {
            tracing::warn!("{ENV_INACTIVITY_TIMEOUT}=0: inactivity tracking disabled");
            None
        }
        Ok(ms) => Some(ms),
        Err(_) => {
            tracing::warn!("{ENV_INACTIVITY_TIMEOUT}={raw:?} is not a number: inactivity tracking disabled");
            None
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────
