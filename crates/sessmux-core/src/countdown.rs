//! Countdown / warning state machine.
//!
//! Per-tab derivation of remaining session time and the externally
//! visible [`SessionPhase`]. Remaining time is always recomputed from the
//! merged activity timestamp, never decremented — wall-clock drift and
//! out-of-order event delivery therefore cannot corrupt the countdown.
//!
//! Within one activity epoch the phase only moves forward
//! (active → warning → expired); fresh activity opens a new epoch.
//! `Expired` is terminal until [`CountdownMachine::reset`].

use chrono::{DateTime, Utc};

use crate::activity::merge_activity;
use crate::types::{PromptLevel, SessionPhase, SessionSnapshot};

/// Trailing portion of the timeout during which the user is warned (ms).
pub const DEFAULT_WARNING_WINDOW_MS: u64 = 300_000;

/// Remaining time at or below which the blocking modal is shown (ms).
pub const DEFAULT_MODAL_THRESHOLD_MS: u64 = 60_000;

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountdownConfig {
    /// Total inactivity timeout (ms). Must be positive; a configuration
    /// with no usable timeout disables the machine entirely upstream.
    pub timeout_ms: u64,
    pub warning_window_ms: u64,
    pub modal_threshold_ms: u64,
}

impl CountdownConfig {
    pub fn new(timeout_ms: u64) -> Self {
        Self {
            timeout_ms,
            warning_window_ms: DEFAULT_WARNING_WINDOW_MS,
            modal_threshold_ms: DEFAULT_MODAL_THRESHOLD_MS,
        }
    }
}

// ---------------------------------------------------------------------------
// Machine
// ---------------------------------------------------------------------------

/// Output of one tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickOutcome {
    pub snapshot: SessionSnapshot,
    /// `Some(remaining_ms)` on the first tick entering the warning window
    /// for this epoch — the caller broadcasts it so sibling tabs display
    /// a consistent countdown without independently deciding to warn.
    pub broadcast_warning: Option<u64>,
    /// True on the tick that crossed into `Expired`. The caller performs
    /// the forced logout iff it currently holds enforcement.
    pub expired_now: bool,
}

#[derive(Debug, Clone)]
pub struct CountdownMachine {
    config: CountdownConfig,
    last_activity: Option<DateTime<Utc>>,
    phase: SessionPhase,
    /// Warning already broadcast for the current epoch.
    warned: bool,
    /// User dismissed the modal; suppresses the modal only, the toast and
    /// the countdown itself continue.
    hide_modal: bool,
}

impl CountdownMachine {
    /// Create a machine with a fresh epoch starting at `now`.
    pub fn new(config: CountdownConfig, now: DateTime<Utc>) -> Self {
        Self {
            config,
            last_activity: Some(now),
            phase: SessionPhase::Active,
            warned: false,
            hide_modal: false,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn last_activity(&self) -> Option<DateTime<Utc>> {
        self.last_activity
    }

    /// Milliseconds until forced logout, floored at 0.
    pub fn remaining_ms(&self, now: DateTime<Utc>) -> u64 {
        let Some(last) = self.last_activity else {
            return self.config.timeout_ms;
        };
        let elapsed = now.signed_duration_since(last).num_milliseconds().max(0) as u64;
        self.config.timeout_ms.saturating_sub(elapsed)
    }

    /// Local activity or an explicit extension: opens a new epoch.
    /// Ignored once expired — `Expired` only exits via [`Self::reset`].
    pub fn record_activity(&mut self, now: DateTime<Utc>) {
        if self.phase == SessionPhase::Expired {
            return;
        }
        self.last_activity = merge_activity(self.last_activity, Some(now));
        self.phase = SessionPhase::Active;
        self.warned = false;
        self.hide_modal = false;
    }

    /// Fold in an activity timestamp from storage or a sibling tab.
    ///
    /// Only a strictly newer timestamp opens a new epoch, so duplicate
    /// delivery of the same event leaves the state untouched.
    pub fn merge_activity(&mut self, ts: DateTime<Utc>) {
        if self.phase == SessionPhase::Expired {
            return;
        }
        if self.last_activity.is_none_or(|last| ts > last) {
            self.last_activity = Some(ts);
            self.phase = SessionPhase::Active;
            self.warned = false;
            self.hide_modal = false;
        }
    }

    /// A sibling tab already broadcast the warning for this epoch.
    pub fn mark_warned(&mut self) {
        self.warned = true;
    }

    /// Suppress the blocking modal for the rest of this epoch.
    pub fn dismiss_modal(&mut self) {
        self.hide_modal = true;
    }

    /// Server-declared expiry (`401`): preempts the countdown.
    pub fn force_expire(&mut self) {
        self.phase = SessionPhase::Expired;
    }

    /// Back to a clean full-timeout state after a logout/login cycle.
    pub fn reset(&mut self, now: DateTime<Utc>) {
        self.last_activity = Some(now);
        self.phase = SessionPhase::Active;
        self.warned = false;
        self.hide_modal = false;
    }

    /// Evaluate transitions. Called once per second and immediately after
    /// any local or cross-tab activity/extend event.
    pub fn tick(&mut self, now: DateTime<Utc>) -> TickOutcome {
        if self.phase == SessionPhase::Expired {
            return TickOutcome {
                snapshot: self.snapshot(0),
                broadcast_warning: None,
                expired_now: false,
            };
        }

        let remaining = self.remaining_ms(now);

        if remaining == 0 {
            self.phase = SessionPhase::Expired;
            return TickOutcome {
                snapshot: self.snapshot(0),
                broadcast_warning: None,
                expired_now: true,
            };
        }

        if remaining <= self.config.warning_window_ms {
            self.phase = SessionPhase::Warning;
            let broadcast = if self.warned {
                None
            } else {
                self.warned = true;
                Some(remaining)
            };
            return TickOutcome {
                snapshot: self.snapshot(remaining),
                broadcast_warning: broadcast,
                expired_now: false,
            };
        }

        self.phase = SessionPhase::Active;
        self.warned = false;
        TickOutcome {
            snapshot: self.snapshot(remaining),
            broadcast_warning: None,
            expired_now: false,
        }
    }

    fn snapshot(&self, remaining: u64) -> SessionSnapshot {
        SessionSnapshot {
            phase: self.phase,
            remaining_ms: Some(remaining),
            prompt: self.prompt(remaining),
        }
    }

    fn prompt(&self, remaining: u64) -> PromptLevel {
        match self.phase {
            SessionPhase::Active => PromptLevel::None,
            SessionPhase::Expired => PromptLevel::Expired,
            SessionPhase::Warning => {
                if remaining <= self.config.modal_threshold_ms && !self.hide_modal {
                    PromptLevel::Modal
                } else {
                    PromptLevel::Toast
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    fn ts(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .expect("valid RFC3339 timestamp")
            .with_timezone(&Utc)
    }

    fn t0() -> DateTime<Utc> {
        ts("2026-03-01T12:00:00Z")
    }

    /// 30-minute timeout, default 5-minute warning window.
    fn machine() -> CountdownMachine {
        CountdownMachine::new(CountdownConfig::new(30 * 60_000), t0())
    }

    fn mins(m: i64) -> TimeDelta {
        TimeDelta::minutes(m)
    }

    // ── 1. thirty-minute walkthrough ────────────────────────────────

    #[test]
    fn full_timeout_walkthrough() {
        let mut m = machine();

        // t=10min: still active
        let out = m.tick(t0() + mins(10));
        assert_eq!(out.snapshot.phase, SessionPhase::Active);
        assert_eq!(out.snapshot.remaining_ms, Some(20 * 60_000));
        assert_eq!(out.snapshot.prompt, PromptLevel::None);

        // t=26min: warning, ~4min remaining, warning broadcast fires
        let out = m.tick(t0() + mins(26));
        assert_eq!(out.snapshot.phase, SessionPhase::Warning);
        assert_eq!(out.snapshot.remaining_ms, Some(4 * 60_000));
        assert_eq!(out.broadcast_warning, Some(4 * 60_000));
        assert_eq!(out.snapshot.prompt, PromptLevel::Toast);

        // t=31min: expired, transition reported exactly once
        let out = m.tick(t0() + mins(31));
        assert_eq!(out.snapshot.phase, SessionPhase::Expired);
        assert_eq!(out.snapshot.remaining_ms, Some(0));
        assert_eq!(out.snapshot.prompt, PromptLevel::Expired);
        assert!(out.expired_now);

        let out = m.tick(t0() + mins(32));
        assert!(!out.expired_now, "expiry transition reported once");
        assert_eq!(out.snapshot.phase, SessionPhase::Expired);
    }

    // ── 2. warning window boundary is inclusive ─────────────────────

    #[test]
    fn warning_boundary_inclusive() {
        let mut m = machine();
        let out = m.tick(t0() + mins(25));
        assert_eq!(out.snapshot.remaining_ms, Some(5 * 60_000));
        assert_eq!(out.snapshot.phase, SessionPhase::Warning);
    }

    // ── 3. warning broadcast fires once per epoch ───────────────────

    #[test]
    fn warning_broadcast_once_per_epoch() {
        let mut m = machine();

        let out = m.tick(t0() + mins(26));
        assert!(out.broadcast_warning.is_some());

        let out = m.tick(t0() + mins(26) + TimeDelta::seconds(1));
        assert!(out.broadcast_warning.is_none());

        // Fresh activity opens a new epoch; the warning may fire again.
        m.record_activity(t0() + mins(27));
        let out = m.tick(t0() + mins(53));
        assert!(out.broadcast_warning.is_some());
    }

    // ── 4. phase moves only forward within an epoch ─────────────────

    #[test]
    fn phase_monotonic_within_epoch() {
        let mut m = machine();
        let mut prev = SessionPhase::Active;
        for minute in 0..35 {
            let out = m.tick(t0() + mins(minute));
            assert!(
                out.snapshot.phase >= prev,
                "phase regressed at minute {minute}: {prev} -> {}",
                out.snapshot.phase
            );
            prev = out.snapshot.phase;
        }
        assert_eq!(prev, SessionPhase::Expired);
    }

    // ── 5. fresh activity resets a warning tab ──────────────────────

    #[test]
    fn activity_resets_from_warning() {
        let mut m = machine();
        m.tick(t0() + mins(26));
        assert_eq!(m.phase(), SessionPhase::Warning);

        m.record_activity(t0() + mins(26));
        let out = m.tick(t0() + mins(26));
        assert_eq!(out.snapshot.phase, SessionPhase::Active);
        assert_eq!(out.snapshot.remaining_ms, Some(30 * 60_000));
    }

    // ── 6. remote merge resets a warning tab ────────────────────────

    #[test]
    fn remote_merge_resets_from_warning() {
        let mut m = machine();
        m.tick(t0() + mins(28));
        assert_eq!(m.phase(), SessionPhase::Warning);

        m.merge_activity(t0() + mins(28));
        let out = m.tick(t0() + mins(28));
        assert_eq!(out.snapshot.phase, SessionPhase::Active);
        assert_eq!(out.snapshot.remaining_ms, Some(30 * 60_000));
    }

    // ── 7. duplicate merge is idempotent ────────────────────────────

    #[test]
    fn duplicate_merge_idempotent() {
        let mut m = machine();
        let stamp = t0() + mins(5);

        m.merge_activity(stamp);
        let once = m.clone();

        m.merge_activity(stamp);
        assert_eq!(m.last_activity(), once.last_activity());
        assert_eq!(m.phase(), once.phase());

        let a = m.tick(t0() + mins(6));
        let mut once = once;
        let b = once.tick(t0() + mins(6));
        assert_eq!(a, b);
    }

    // ── 8. older merge does not regress the epoch ───────────────────

    #[test]
    fn stale_merge_ignored() {
        let mut m = machine();
        m.record_activity(t0() + mins(10));
        m.merge_activity(t0() + mins(2));
        assert_eq!(m.last_activity(), Some(t0() + mins(10)));
    }

    // ── 9. toast vs modal thresholds ────────────────────────────────

    #[test]
    fn toast_above_modal_threshold() {
        let mut m = machine();
        // remaining = 61s
        let out = m.tick(t0() + TimeDelta::seconds(30 * 60 - 61));
        assert_eq!(out.snapshot.prompt, PromptLevel::Toast);
    }

    #[test]
    fn modal_at_threshold() {
        let mut m = machine();
        // remaining = 60s
        let out = m.tick(t0() + TimeDelta::seconds(30 * 60 - 60));
        assert_eq!(out.snapshot.prompt, PromptLevel::Modal);
    }

    // ── 10. dismissal suppresses the modal only ─────────────────────

    #[test]
    fn dismissal_downgrades_modal_to_toast() {
        let mut m = machine();
        m.dismiss_modal();

        let out = m.tick(t0() + TimeDelta::seconds(30 * 60 - 30));
        assert_eq!(out.snapshot.phase, SessionPhase::Warning);
        assert_eq!(out.snapshot.prompt, PromptLevel::Toast);

        // The countdown still expires.
        let out = m.tick(t0() + mins(31));
        assert_eq!(out.snapshot.phase, SessionPhase::Expired);
    }

    #[test]
    fn new_epoch_clears_dismissal() {
        let mut m = machine();
        m.dismiss_modal();
        m.record_activity(t0() + mins(1));

        let out = m.tick(t0() + mins(1) + TimeDelta::seconds(30 * 60 - 30));
        assert_eq!(out.snapshot.prompt, PromptLevel::Modal);
    }

    // ── 11. expired is terminal ─────────────────────────────────────

    #[test]
    fn expired_ignores_activity() {
        let mut m = machine();
        m.tick(t0() + mins(31));
        assert_eq!(m.phase(), SessionPhase::Expired);

        m.record_activity(t0() + mins(32));
        assert_eq!(m.phase(), SessionPhase::Expired);

        m.merge_activity(t0() + mins(33));
        let out = m.tick(t0() + mins(33));
        assert_eq!(out.snapshot.phase, SessionPhase::Expired);
    }

    // ── 12. forced expiry preempts the countdown ────────────────────

    #[test]
    fn force_expire_preempts() {
        let mut m = machine();
        m.tick(t0() + mins(1));
        assert_eq!(m.phase(), SessionPhase::Active);

        m.force_expire();
        let out = m.tick(t0() + mins(1));
        assert_eq!(out.snapshot.phase, SessionPhase::Expired);
        assert_eq!(out.snapshot.prompt, PromptLevel::Expired);
        assert!(!out.expired_now, "forced expiry is not the tick transition");
    }

    // ── 13. reset restores a clean full-timeout state ───────────────

    #[test]
    fn reset_restores_full_timeout() {
        let mut m = machine();
        m.tick(t0() + mins(31));
        assert_eq!(m.phase(), SessionPhase::Expired);

        let t1 = t0() + mins(40);
        m.reset(t1);
        let out = m.tick(t1);
        assert_eq!(out.snapshot.phase, SessionPhase::Active);
        assert_eq!(out.snapshot.remaining_ms, Some(30 * 60_000));
    }

    // ── 14. remaining floors at zero ────────────────────────────────

    #[test]
    fn remaining_floors_at_zero() {
        let m = machine();
        assert_eq!(m.remaining_ms(t0() + mins(300)), 0);
    }

    // ── 15. future activity stamp yields full timeout ───────────────

    #[test]
    fn future_stamp_clamps_elapsed() {
        let mut m = machine();
        m.merge_activity(t0() + mins(5));
        assert_eq!(m.remaining_ms(t0()), 30 * 60_000);
    }
}
