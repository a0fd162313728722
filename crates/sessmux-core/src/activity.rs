//! Activity recorder: detects user presence and publishes a fresh
//! timestamp, rate-limited.
//!
//! The in-memory high-water mark always advances immediately so the local
//! countdown display stays accurate; only the *persisted* write is
//! throttled. Background (hidden) tabs never claim activity unless the
//! signal is a forcing one (focus / visibility regained).

use chrono::{DateTime, TimeDelta, Utc};

/// Minimum interval between persisted activity writes per tab (ms).
pub const DEFAULT_THROTTLE_MS: u64 = 3_000;

// ─── Signals ──────────────────────────────────────────────────────

/// Interaction signals the recorder subscribes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum SignalKind {
    PointerMove,
    KeyPress,
    Scroll,
    Click,
    TouchStart,
    Focus,
    VisibilityVisible,
}

impl SignalKind {
    pub const ALL: [Self; 7] = [
        Self::PointerMove,
        Self::KeyPress,
        Self::Scroll,
        Self::Click,
        Self::TouchStart,
        Self::Focus,
        Self::VisibilityVisible,
    ];

    /// Forcing signals are accepted even from a hidden tab and also
    /// trigger an enforcement claim.
    pub fn is_forcing(self) -> bool {
        matches!(self, Self::Focus | Self::VisibilityVisible)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::PointerMove => "pointer_move",
            Self::KeyPress => "key_press",
            Self::Scroll => "scroll",
            Self::Click => "click",
            Self::TouchStart => "touch_start",
            Self::Focus => "focus",
            Self::VisibilityVisible => "visibility_visible",
        }
    }
}

// ─── Merge ────────────────────────────────────────────────────────

/// Commutative, idempotent max-merge for activity timestamps. Every
/// remote or persisted value is folded in with this, never assigned.
pub fn merge_activity(
    a: Option<DateTime<Utc>>,
    b: Option<DateTime<Utc>>,
) -> Option<DateTime<Utc>> {
    match (a, b) {
        (Some(x), Some(y)) => Some(x.max(y)),
        (x, None) => x,
        (None, y) => y,
    }
}

// ─── Recorder ─────────────────────────────────────────────────────

/// Outcome of observing one interaction signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Observation {
    /// The signal advanced the in-memory high-water mark.
    pub accepted: bool,
    /// The caller should also persist the timestamp and broadcast an
    /// `activity` event (throttled).
    pub persist: bool,
}

impl Observation {
    pub const REJECTED: Self = Self {
        accepted: false,
        persist: false,
    };
}

/// Per-tab activity state: high-water mark plus persisted-write throttle.
#[derive(Debug, Clone)]
pub struct ActivityRecorder {
    throttle_ms: u64,
    last_seen: Option<DateTime<Utc>>,
    last_persisted: Option<DateTime<Utc>>,
}

impl ActivityRecorder {
    pub fn new(throttle_ms: u64) -> Self {
        Self {
            throttle_ms,
            last_seen: None,
            last_persisted: None,
        }
    }

    /// The merged high-water mark across local signals and remote merges.
    pub fn last_seen(&self) -> Option<DateTime<Utc>> {
        self.last_seen
    }

    /// Observe one interaction signal from this tab.
    ///
    /// Hidden tabs are rejected outright unless the signal is forcing.
    pub fn observe(&mut self, kind: SignalKind, visible: bool, now: DateTime<Utc>) -> Observation {
        if !visible && !kind.is_forcing() {
            return Observation::REJECTED;
        }

        self.last_seen = merge_activity(self.last_seen, Some(now));

        let due = match self.last_persisted {
            None => true,
            Some(at) => {
                now.signed_duration_since(at) >= TimeDelta::milliseconds(self.throttle_ms as i64)
            }
        };
        if due {
            self.last_persisted = Some(now);
        }

        Observation {
            accepted: true,
            persist: due,
        }
    }

    /// Fold in a timestamp observed from storage or a sibling tab.
    pub fn merge_remote(&mut self, ts: DateTime<Utc>) {
        self.last_seen = merge_activity(self.last_seen, Some(ts));
    }
}

// ─── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .expect("valid RFC3339 timestamp")
            .with_timezone(&Utc)
    }

    fn t0() -> DateTime<Utc> {
        ts("2026-03-01T09:00:00Z")
    }

    // ── 1. background signals ignored ───────────────────────────────

    #[test]
    fn hidden_tab_signal_rejected() {
        let mut rec = ActivityRecorder::new(DEFAULT_THROTTLE_MS);
        let obs = rec.observe(SignalKind::KeyPress, false, t0());
        assert_eq!(obs, Observation::REJECTED);
        assert_eq!(rec.last_seen(), None);
    }

    // ── 2. forcing signals accepted while hidden ────────────────────

    #[test]
    fn forcing_signal_accepted_while_hidden() {
        let mut rec = ActivityRecorder::new(DEFAULT_THROTTLE_MS);
        let obs = rec.observe(SignalKind::VisibilityVisible, false, t0());
        assert!(obs.accepted);
        assert!(obs.persist);
        assert_eq!(rec.last_seen(), Some(t0()));
    }

    // ── 3. persisted write throttled, memory always advances ────────

    #[test]
    fn persist_throttled_but_memory_advances() {
        let mut rec = ActivityRecorder::new(3_000);

        let o1 = rec.observe(SignalKind::PointerMove, true, t0());
        assert!(o1.accepted && o1.persist);

        // 1s later: accepted but not persisted
        let t1 = t0() + TimeDelta::seconds(1);
        let o2 = rec.observe(SignalKind::PointerMove, true, t1);
        assert!(o2.accepted);
        assert!(!o2.persist);
        assert_eq!(rec.last_seen(), Some(t1));

        // 3s after the first write: persisted again
        let t3 = t0() + TimeDelta::seconds(3);
        let o3 = rec.observe(SignalKind::Click, true, t3);
        assert!(o3.persist);
    }

    // ── 4. throttle boundary is inclusive ───────────────────────────

    #[test]
    fn throttle_boundary_inclusive() {
        let mut rec = ActivityRecorder::new(3_000);
        rec.observe(SignalKind::Click, true, t0());

        let at_boundary = t0() + TimeDelta::milliseconds(3_000);
        let obs = rec.observe(SignalKind::Click, true, at_boundary);
        assert!(obs.persist);
    }

    // ── 5. max-merge is permutation-invariant ───────────────────────

    #[test]
    fn merge_permutation_invariant() {
        let stamps = [
            ts("2026-03-01T09:00:05Z"),
            ts("2026-03-01T09:00:01Z"),
            ts("2026-03-01T09:00:09Z"),
            ts("2026-03-01T09:00:03Z"),
        ];

        let forward = stamps
            .iter()
            .fold(None, |acc, &s| merge_activity(acc, Some(s)));
        let reverse = stamps
            .iter()
            .rev()
            .fold(None, |acc, &s| merge_activity(acc, Some(s)));

        assert_eq!(forward, reverse);
        assert_eq!(forward, Some(ts("2026-03-01T09:00:09Z")));
    }

    // ── 6. merge is idempotent ──────────────────────────────────────

    #[test]
    fn merge_idempotent() {
        let s = Some(t0());
        assert_eq!(merge_activity(s, s), s);
        assert_eq!(merge_activity(s, None), s);
        assert_eq!(merge_activity(None, s), s);
        assert_eq!(merge_activity(None, None), None);
    }

    // ── 7. remote merge never regresses ─────────────────────────────

    #[test]
    fn remote_merge_never_regresses() {
        let mut rec = ActivityRecorder::new(DEFAULT_THROTTLE_MS);
        rec.observe(SignalKind::Click, true, t0());

        // An older remote value must not move the mark backwards.
        rec.merge_remote(t0() - TimeDelta::seconds(60));
        assert_eq!(rec.last_seen(), Some(t0()));

        // A newer one advances it.
        let later = t0() + TimeDelta::seconds(60);
        rec.merge_remote(later);
        assert_eq!(rec.last_seen(), Some(later));
    }

    // ── 8. remote merge does not consume the throttle budget ────────

    #[test]
    fn remote_merge_leaves_throttle_alone() {
        let mut rec = ActivityRecorder::new(3_000);
        rec.merge_remote(t0());

        // First local observation still persists immediately.
        let obs = rec.observe(SignalKind::Scroll, true, t0() + TimeDelta::seconds(1));
        assert!(obs.persist);
    }

    // ── 9. forcing classification ───────────────────────────────────

    #[test]
    fn only_focus_and_visibility_are_forcing() {
        for kind in SignalKind::ALL {
            let expected = matches!(kind, SignalKind::Focus | SignalKind::VisibilityVisible);
            assert_eq!(kind.is_forcing(), expected, "kind {}", kind.as_str());
        }
    }
}
