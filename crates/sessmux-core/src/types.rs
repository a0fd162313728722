use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ─── Shared storage keys ──────────────────────────────────────────

/// Epoch-ms of the most recent accepted user activity, merged across tabs.
pub const KEY_LAST_ACTIVITY: &str = "admin.session.last_activity";
/// JSON [`TabClaim`] of the tab currently holding enforcement.
pub const KEY_ACTIVE_TAB: &str = "admin.session.active_tab";
/// JSON [`TabEvent`] — the storage-change fallback transport slot.
pub const KEY_EVENT: &str = "admin.session.event";
/// Bearer token written by the login flow, cleared on logout.
pub const KEY_TOKEN: &str = "admin.session.token";
/// Route to restore after the next successful login.
pub const KEY_REDIRECT: &str = "admin.session.redirect";
/// Human-readable reason shown on the login screen.
pub const KEY_REASON: &str = "admin.session.reason";

/// Fixed realtime channel name shared by all tabs of one origin.
pub const CHANNEL_NAME: &str = "admin.session";

// ─── Cross-tab events ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[non_exhaustive]
pub enum EventKind {
    Activity,
    Extend,
    Warning,
    Logout,
    Focus,
}

impl EventKind {
    pub const ALL: [Self; 5] = [
        Self::Activity,
        Self::Extend,
        Self::Warning,
        Self::Logout,
        Self::Focus,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Activity => "activity",
            Self::Extend => "extend",
            Self::Warning => "warning",
            Self::Logout => "logout",
            Self::Focus => "focus",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = SessmuxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "activity" => Ok(Self::Activity),
            "extend" => Ok(Self::Extend),
            "warning" => Ok(Self::Warning),
            "logout" => Ok(Self::Logout),
            "focus" => Ok(Self::Focus),
            _ => Err(SessmuxError::InvalidEventKind(s.to_owned())),
        }
    }
}

/// A cross-tab event, delivered via the realtime channel and/or the
/// storage-change fallback. Consumers must tolerate duplicates and
/// out-of-order arrival across the two transports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TabEvent {
    /// Unique per event (`"{tab_id}:{seq}"`), used for cross-transport dedup.
    pub event_id: String,
    /// Originating tab; events matching the local tab id are ignored.
    pub tab_id: String,
    pub kind: EventKind,
    pub payload: serde_json::Value,
    pub sent_at: DateTime<Utc>,
}

// ─── Session phase ────────────────────────────────────────────────

/// Externally visible state of the countdown machine. Within one activity
/// epoch the phase only moves forward; `Expired` is terminal until an
/// explicit logout/login cycle resets the provider.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum SessionPhase {
    #[default]
    Active = 0,
    Warning = 1,
    Expired = 2,
}

impl SessionPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Warning => "warning",
            Self::Expired => "expired",
        }
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Logout reason ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum LogoutReason {
    InactiveTimeout,
    SessionExpired,
    ManualLogout,
}

impl LogoutReason {
    pub const ALL: [Self; 3] = [
        Self::InactiveTimeout,
        Self::SessionExpired,
        Self::ManualLogout,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::InactiveTimeout => "inactive_timeout",
            Self::SessionExpired => "session_expired",
            Self::ManualLogout => "manual_logout",
        }
    }

    /// Human-readable message persisted for the login screen.
    pub fn message(self) -> &'static str {
        match self {
            Self::InactiveTimeout => "You were signed out after a period of inactivity.",
            Self::SessionExpired => "Your session has expired. Please sign in again.",
            Self::ManualLogout => "You have been signed out.",
        }
    }
}

impl fmt::Display for LogoutReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogoutReason {
    type Err = SessmuxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "inactive_timeout" => Ok(Self::InactiveTimeout),
            "session_expired" => Ok(Self::SessionExpired),
            "manual_logout" => Ok(Self::ManualLogout),
            _ => Err(SessmuxError::InvalidLogoutReason(s.to_owned())),
        }
    }
}

// ─── Enforcement claim ────────────────────────────────────────────

/// Persisted record of which tab currently claims enforcement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabClaim {
    pub tab_id: String,
    pub focused_at: DateTime<Utc>,
}

// ─── Presentation ─────────────────────────────────────────────────

/// Which UI surface the warning state currently calls for.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptLevel {
    #[default]
    None,
    Toast,
    Modal,
    Expired,
}

/// Per-tab derived state published to the UI on every tick.
///
/// `remaining_ms` is `None` when inactivity tracking is disabled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub phase: SessionPhase,
    pub remaining_ms: Option<u64>,
    pub prompt: PromptLevel,
}

impl SessionSnapshot {
    /// Snapshot for a tab with inactivity tracking disabled.
    pub fn untracked() -> Self {
        Self {
            phase: SessionPhase::Active,
            remaining_ms: None,
            prompt: PromptLevel::None,
        }
    }

    /// Remaining whole seconds for display. Ceiling rounding, so "0:01"
    /// shows until the countdown is truly zero.
    pub fn display_seconds(&self) -> Option<u64> {
        self.remaining_ms.map(|ms| ms.div_ceil(1_000))
    }
}

// ─── Error ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessmuxError {
    InvalidEventKind(String),
    InvalidLogoutReason(String),
    MalformedPayload(String),
}

impl fmt::Display for SessmuxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidEventKind(s) => write!(f, "invalid event kind: {s}"),
            Self::InvalidLogoutReason(s) => write!(f, "invalid logout reason: {s}"),
            Self::MalformedPayload(msg) => write!(f, "malformed payload: {msg}"),
        }
    }
}

impl std::error::Error for SessmuxError {}

// ─── Tests ────────────────────────────────────────────────────────
