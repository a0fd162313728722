//! Leader election for the enforcer tab.
//!
//! Enforcement is a capability check re-evaluated at every tick, not a
//! cached role: the enforcer is the tab whose id matches the persisted
//! claim while its page is visible. Visibility loss silently revokes the
//! capability — each tab's countdown runs regardless, only the forced
//! logout side effect is gated.
//!
//! The claim carries a freshness heartbeat: the current enforcer rewrites
//! it every tick, and a visible non-owner may take over once the persisted
//! claim has gone stale (last-focused tab closed without a successor).

use chrono::{DateTime, TimeDelta, Utc};

use crate::types::TabClaim;

/// Age after which a persisted claim is considered orphaned (ms).
/// Several ticks wide so focus churn cannot flap ownership.
pub const DEFAULT_CLAIM_STALENESS_MS: u64 = 15_000;

/// Build a fresh claim for this tab.
pub fn claim(tab_id: &str, now: DateTime<Utc>) -> TabClaim {
    TabClaim {
        tab_id: tab_id.to_owned(),
        focused_at: now,
    }
}

/// True iff this tab may execute the forced-logout side effect right now.
pub fn is_enforcer(current: Option<&TabClaim>, tab_id: &str, visible: bool) -> bool {
    visible && current.is_some_and(|c| c.tab_id == tab_id)
}

/// Whether this tab should (re)write the persisted claim this tick.
///
/// A visible owner always refreshes (the heartbeat); a visible non-owner
/// claims only when no claim exists or the existing one is stale.
pub fn should_claim(
    current: Option<&TabClaim>,
    tab_id: &str,
    visible: bool,
    now: DateTime<Utc>,
    staleness_ms: u64,
) -> bool {
    if !visible {
        return false;
    }
    match current {
        None => true,
        Some(c) if c.tab_id == tab_id => true,
        Some(c) => is_stale(c, now, staleness_ms),
    }
}

fn is_stale(claim: &TabClaim, now: DateTime<Utc>, staleness_ms: u64) -> bool {
    // Negative ages (clock skew between tabs) count as fresh.
    now.signed_duration_since(claim.focused_at) > TimeDelta::milliseconds(staleness_ms as i64)
}

// ─── Tests ────────────────────────────────────────────────────────
