//! Logout planning and the reentrancy permit.
//!
//! The plan is computed purely; the runtime applies its side effects
//! (storage writes, broadcast, navigation). Exactly-once execution within
//! a tab is guarded by [`LogoutPermit`], an explicit single-permit lock.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::types::LogoutReason;

// ─── Options & plan ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogoutOptions {
    /// Publish a `logout` cross-tab event so sibling tabs redirect too.
    pub broadcast: bool,
    /// Navigate this tab to the login route (history-replacing).
    pub redirect: bool,
    /// Remember the current route for post-login restore.
    pub preserve_route: bool,
}

impl Default for LogoutOptions {
    fn default() -> Self {
        Self {
            broadcast: true,
            redirect: true,
            preserve_route: true,
        }
    }
}

impl LogoutOptions {
    /// Options for reacting to a sibling tab's `logout` event: redirect
    /// locally, never re-broadcast.
    pub fn follower(preserve_route: bool) -> Self {
        Self {
            broadcast: false,
            redirect: true,
            preserve_route,
        }
    }
}

/// Everything the runtime needs to execute one logical logout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogoutPlan {
    pub reason: LogoutReason,
    /// Human-readable message persisted for the login screen.
    pub message: String,
    /// Route to persist for post-login restore, if any.
    pub preserved_route: Option<String>,
    pub broadcast: bool,
    pub redirect: bool,
}

/// Derive the logout plan. Route preservation is skipped when the current
/// route already resolves to the login path.
pub fn plan_logout(
    reason: LogoutReason,
    opts: LogoutOptions,
    current_route: &str,
    login_route: &str,
) -> LogoutPlan {
    let preserved_route = if opts.preserve_route && !resolves_to(current_route, login_route) {
        Some(current_route.to_owned())
    } else {
        None
    };

    LogoutPlan {
        reason,
        message: reason.message().to_owned(),
        preserved_route,
        broadcast: opts.broadcast,
        redirect: opts.redirect,
    }
}

/// Path comparison ignoring query and fragment.
fn resolves_to(route: &str, login_route: &str) -> bool {
    let path = route
        .split(['?', '#'])
        .next()
        .unwrap_or(route)
        .trim_end_matches('/');
    path == login_route.trim_end_matches('/')
}

// ─── Permit ───────────────────────────────────────────────────────

/// Single-permit lock guarding logout execution within one tab.
///
/// The holder releases on the next event-loop iteration, so a timer tick
/// and a user click racing in the same turn collapse to one logout.
#[derive(Debug, Default)]
pub struct LogoutPermit {
    held: AtomicBool,
}

impl LogoutPermit {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the permit was free and is now held.
    pub fn try_acquire(&self) -> bool {
        self.held
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn release(&self) {
        self.held.store(false, Ordering::Release);
    }

    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }
}

// ─── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    // ── 1. default plan preserves the route ─────────────────────────

    #[test]
    fn plan_preserves_current_route() {
        let plan = plan_logout(
            LogoutReason::InactiveTimeout,
            LogoutOptions::default(),
            "/admin/news/42/edit?draft=1",
            "/login",
        );
        assert_eq!(
            plan.preserved_route.as_deref(),
            Some("/admin/news/42/edit?draft=1")
        );
        assert!(plan.broadcast);
        assert!(plan.redirect);
        assert_eq!(plan.reason, LogoutReason::InactiveTimeout);
        assert_eq!(plan.message, LogoutReason::InactiveTimeout.message());
    }

    // ── 2. login path is never preserved ────────────────────────────

    #[test]
    fn login_route_not_preserved() {
        for route in ["/login", "/login?expired=1", "/login#top", "/login/"] {
            let plan = plan_logout(
                LogoutReason::SessionExpired,
                LogoutOptions::default(),
                route,
                "/login",
            );
            assert_eq!(plan.preserved_route, None, "route {route}");
        }
    }

    // ── 3. preserve_route=false skips preservation ──────────────────

    #[test]
    fn preserve_disabled() {
        let opts = LogoutOptions {
            preserve_route: false,
            ..Default::default()
        };
        let plan = plan_logout(LogoutReason::ManualLogout, opts, "/admin/events", "/login");
        assert_eq!(plan.preserved_route, None);
    }

    // ── 4. follower options never re-broadcast ──────────────────────

    #[test]
    fn follower_options() {
        let opts = LogoutOptions::follower(true);
        assert!(!opts.broadcast);
        assert!(opts.redirect);

        let plan = plan_logout(
            LogoutReason::InactiveTimeout,
            opts,
            "/admin/clans",
            "/login",
        );
        assert!(!plan.broadcast);
        assert_eq!(plan.preserved_route.as_deref(), Some("/admin/clans"));
    }

    // ── 5. permit is exclusive until released ───────────────────────

    #[test]
    fn permit_exclusive() {
        let permit = LogoutPermit::new();
        assert!(permit.try_acquire());
        assert!(permit.is_held());
        assert!(!permit.try_acquire(), "second acquire must fail");

        permit.release();
        assert!(!permit.is_held());
        assert!(permit.try_acquire());
    }
}
