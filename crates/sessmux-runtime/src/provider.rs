//! The per-tab session provider.
//!
//! One tokio task per tab owns the countdown machine, the activity
//! recorder, and the event bus, and runs a `select!` loop over the
//! 1-second tick, the merged cross-tab event stream, and the UI command
//! channel. Every path funnels through [`ProviderTask::run_tick`], so
//! transitions are evaluated on the tick *and* immediately after any
//! activity/extend signal, local or remote.
//!
//! All listeners and the ticker are torn down when the handle's
//! cancellation token fires.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use sessmux_bus::bus::{EventBus, EventStream};
use sessmux_bus::channel::TabChannel;
use sessmux_bus::store::{self, SessionStore};
use sessmux_core::activity::{ActivityRecorder, SignalKind};
use sessmux_core::countdown::{CountdownConfig, CountdownMachine};
use sessmux_core::enforcer;
use sessmux_core::logout::{LogoutOptions, LogoutPermit, plan_logout};
use sessmux_core::types::{
    EventKind, KEY_REASON, KEY_REDIRECT, KEY_TOKEN, LogoutReason, PromptLevel, SessionPhase,
    SessionSnapshot, TabEvent,
};

use crate::clock::{Clock, SystemClock};
use crate::config::SessionConfig;
use crate::navigator::Navigator;

// ─── Handle ───────────────────────────────────────────────────────

#[derive(Debug)]
enum Command {
    Signal(SignalKind),
    Visibility(bool),
    Extend,
    DismissModal,
    Logout {
        reason: LogoutReason,
        opts: LogoutOptions,
    },
    Unauthorized,
}

/// Cheap clonable surface the UI talks to.
#[derive(Clone)]
pub struct SessionHandle {
    tab_id: String,
    commands: mpsc::UnboundedSender<Command>,
    snapshot_rx: watch::Receiver<SessionSnapshot>,
    cancel: CancellationToken,
}

impl SessionHandle {
    pub fn tab_id(&self) -> &str {
        &self.tab_id
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot_rx.borrow().clone()
    }

    /// Watch receiver for snapshot changes (one value per tick).
    pub fn watch(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot_rx.clone()
    }

    /// Report a DOM interaction signal observed in this tab.
    pub fn signal(&self, kind: SignalKind) {
        let _ = self.commands.send(Command::Signal(kind));
    }

    pub fn set_visibility(&self, visible: bool) {
        let _ = self.commands.send(Command::Visibility(visible));
    }

    /// Explicit session extension (the "stay signed in" button).
    pub fn extend_session(&self) {
        let _ = self.commands.send(Command::Extend);
    }

    /// Dismiss the blocking modal; the countdown continues.
    pub fn dismiss_warning_modal(&self) {
        let _ = self.commands.send(Command::DismissModal);
    }

    pub fn hard_logout(&self, reason: LogoutReason, opts: LogoutOptions) {
        let _ = self.commands.send(Command::Logout { reason, opts });
    }

    /// Server rejected the credential (`401` observed on any request).
    pub fn notify_unauthorized(&self) {
        let _ = self.commands.send(Command::Unauthorized);
    }

    /// Tear down the provider task and all its listeners.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

// ─── Provider ─────────────────────────────────────────────────────

pub struct SessionProvider;

impl SessionProvider {
    /// Spawn a provider on the wall clock.
    pub fn spawn(
        config: SessionConfig,
        store: Arc<dyn SessionStore>,
        channel: Option<TabChannel>,
        navigator: Arc<dyn Navigator>,
        visible: bool,
    ) -> SessionHandle {
        Self::spawn_with_clock(config, store, channel, navigator, visible, Arc::new(SystemClock))
    }

    pub fn spawn_with_clock(
        config: SessionConfig,
        store: Arc<dyn SessionStore>,
        channel: Option<TabChannel>,
        navigator: Arc<dyn Navigator>,
        visible: bool,
        clock: Arc<dyn Clock>,
    ) -> SessionHandle {
        let tab_id = next_tab_id();
        let bus = EventBus::new(tab_id.clone(), Arc::clone(&store), channel);
        let stream = bus.subscribe();
        let now = clock.now();

        // The countdown derives from the shared timestamp: a tab opened
        // mid-epoch adopts the siblings' countdown instead of its own.
        let machine = config.timeout_ms.map(|timeout_ms| {
            let start = match store::read_last_activity(&*store) {
                Some(ts) => ts,
                None => {
                    store::write_last_activity(&*store, now);
                    now
                }
            };
            CountdownMachine::new(
                CountdownConfig {
                    timeout_ms,
                    warning_window_ms: config.warning_window_ms,
                    modal_threshold_ms: config.modal_threshold_ms,
                },
                start,
            )
        });
        if machine.is_none() {
            tracing::info!(tab = %tab_id, "inactivity tracking disabled");
        }

        let initial = match &machine {
            Some(m) => SessionSnapshot {
                phase: m.phase(),
                remaining_ms: Some(m.remaining_ms(now)),
                prompt: PromptLevel::None,
            },
            None => SessionSnapshot::untracked(),
        };
        let (snapshot_tx, snapshot_rx) = watch::channel(initial);
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let throttle_ms = config.throttle_ms;
        let task = ProviderTask {
            tab_id: tab_id.clone(),
            config,
            visible,
            machine,
            recorder: ActivityRecorder::new(throttle_ms),
            server_expired: false,
            bus,
            store,
            navigator,
            clock,
            permit: LogoutPermit::new(),
            release_pending: false,
            snapshot_tx,
            cancel: cancel.clone(),
        };
        tokio::spawn(task.run(commands_rx, stream));

        SessionHandle {
            tab_id,
            commands: commands_tx,
            snapshot_rx,
            cancel,
        }
    }
}

/// Per-tab identity: random enough to distinguish sibling tabs, stable
/// for the tab's lifetime.
fn next_tab_id() -> String {
    static SEQ: AtomicU64 = AtomicU64::new(0);
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    format!(
        "tab-{}-{nanos:x}-{}",
        std::process::id(),
        SEQ.fetch_add(1, Ordering::Relaxed)
    )
}

// ─── Task ─────────────────────────────────────────────────────────

struct ProviderTask {
    tab_id: String,
    config: SessionConfig,
    visible: bool,
    /// `None` when inactivity tracking is disabled.
    machine: Option<CountdownMachine>,
    recorder: ActivityRecorder,
    /// Expiry was declared by the server (`401`), not the countdown: the
    /// expired modal waits for an explicit "go to login", never
    /// auto-enforces.
    server_expired: bool,
    bus: EventBus,
    store: Arc<dyn SessionStore>,
    navigator: Arc<dyn Navigator>,
    clock: Arc<dyn Clock>,
    permit: LogoutPermit,
    /// Permit is released at the top of the next loop turn, so duplicate
    /// logout requests within one turn collapse to a single execution.
    release_pending: bool,
    snapshot_tx: watch::Sender<SessionSnapshot>,
    cancel: CancellationToken,
}

impl ProviderTask {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>, mut stream: EventStream) {
        let mut ticker = tokio::time::interval(Duration::from_millis(self.config.tick_ms));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let cancel = self.cancel.clone();
        let mut stream_done = false;

        loop {
            if self.release_pending {
                self.permit.release();
                self.release_pending = false;
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let now = self.clock.now();
                    self.run_tick(now);
                }
                cmd = commands.recv() => {
                    let Some(cmd) = cmd else { break };
                    let now = self.clock.now();
                    self.handle_command(cmd, now);
                    // Drain the turn's backlog so same-turn duplicates hit
                    // the still-held logout permit.
                    while let Ok(next) = commands.try_recv() {
                        self.handle_command(next, now);
                    }
                }
                event = stream.recv(), if !stream_done => {
                    match event {
                        Some(event) => {
                            let now = self.clock.now();
                            self.handle_event(event, now);
                        }
                        None => {
                            tracing::debug!(tab = %self.tab_id, "cross-tab transports closed, single-tab mode");
                            stream_done = true;
                        }
                    }
                }
            }
        }
        tracing::debug!(tab = %self.tab_id, "session provider stopped");
    }

    // ── Tick ────────────────────────────────────────────────────────

    /// Merge → claim bookkeeping → transitions → side effects.
    fn run_tick(&mut self, now: DateTime<Utc>) {
        let Some(machine) = self.machine.as_mut() else {
            self.publish_untracked();
            return;
        };

        if let Some(ts) = store::read_last_activity(&*self.store) {
            self.recorder.merge_remote(ts);
            machine.merge_activity(ts);
        }

        let claim = store::read_active_tab(&*self.store);
        if enforcer::should_claim(
            claim.as_ref(),
            &self.tab_id,
            self.visible,
            now,
            self.config.claim_staleness_ms,
        ) {
            store::write_active_tab(&*self.store, &enforcer::claim(&self.tab_id, now));
        }

        let out = machine.tick(now);

        if let Some(remaining) = out.broadcast_warning {
            tracing::info!(tab = %self.tab_id, remaining_ms = remaining, "entering warning window");
            self.bus.publish(
                EventKind::Warning,
                serde_json::json!({ "remaining_ms": remaining }),
                now,
            );
        }

        // Enforcement is re-checked on every tick while expired, not just
        // on the transition: a tab that becomes visible later can still
        // claim and execute the delayed logout. Server-declared expiry is
        // excluded — that modal waits for the user.
        if out.snapshot.phase == SessionPhase::Expired && !self.server_expired {
            let claim = store::read_active_tab(&*self.store);
            if enforcer::is_enforcer(claim.as_ref(), &self.tab_id, self.visible) {
                tracing::info!(tab = %self.tab_id, "inactivity timeout reached, enforcing logout");
                self.do_logout(LogoutReason::InactiveTimeout, LogoutOptions::default(), now);
                return;
            }
            if out.expired_now {
                tracing::info!(tab = %self.tab_id, "inactivity timeout reached, awaiting enforcer");
            }
        }

        self.snapshot_tx.send_replace(out.snapshot);
    }

    fn publish_untracked(&self) {
        let snap = if self.server_expired {
            SessionSnapshot {
                phase: SessionPhase::Expired,
                remaining_ms: None,
                prompt: PromptLevel::Expired,
            }
        } else {
            SessionSnapshot::untracked()
        };
        self.snapshot_tx.send_replace(snap);
    }

    fn expired(&self) -> bool {
        self.machine
            .as_ref()
            .is_some_and(|m| m.phase() == SessionPhase::Expired)
            || self.server_expired
    }

    // ── Commands ────────────────────────────────────────────────────

    fn handle_command(&mut self, cmd: Command, now: DateTime<Utc>) {
        match cmd {
            Command::Signal(kind) => self.handle_signal(kind, now),
            Command::Visibility(visible) => {
                self.visible = visible;
                if visible {
                    self.handle_signal(SignalKind::VisibilityVisible, now);
                } else {
                    tracing::debug!(tab = %self.tab_id, "tab hidden, enforcement lapses");
                    self.run_tick(now);
                }
            }
            Command::Extend => self.handle_extend(now),
            Command::DismissModal => {
                if let Some(m) = self.machine.as_mut() {
                    m.dismiss_modal();
                }
                self.run_tick(now);
            }
            Command::Logout { reason, opts } => self.do_logout(reason, opts, now),
            Command::Unauthorized => self.handle_unauthorized(now),
        }
    }

    fn handle_signal(&mut self, kind: SignalKind, now: DateTime<Utc>) {
        if self.machine.is_none() || self.expired() {
            // No activity to record, but visibility changes still feed
            // claim bookkeeping through the tick.
            self.run_tick(now);
            return;
        }

        let obs = self.recorder.observe(kind, self.visible, now);
        if !obs.accepted {
            return;
        }
        if let Some(m) = self.machine.as_mut() {
            m.record_activity(now);
        }

        if obs.persist {
            store::write_last_activity(&*self.store, now);
            self.bus.publish(
                EventKind::Activity,
                serde_json::json!({ "last_activity_ms": now.timestamp_millis() }),
                now,
            );
        }
        if kind.is_forcing() {
            store::write_active_tab(&*self.store, &enforcer::claim(&self.tab_id, now));
            self.bus.publish(EventKind::Focus, serde_json::Value::Null, now);
        }

        self.run_tick(now);
    }

    fn handle_extend(&mut self, now: DateTime<Utc>) {
        if self.machine.is_none() || self.expired() {
            return;
        }
        if let Some(m) = self.machine.as_mut() {
            m.record_activity(now);
        }
        self.recorder.merge_remote(now);

        // Extensions bypass the throttle: always persisted and broadcast.
        store::write_last_activity(&*self.store, now);
        self.bus.publish(
            EventKind::Extend,
            serde_json::json!({ "last_activity_ms": now.timestamp_millis() }),
            now,
        );
        self.run_tick(now);
    }

    fn handle_unauthorized(&mut self, now: DateTime<Utc>) {
        tracing::warn!(tab = %self.tab_id, "server rejected credential, session expired");
        self.server_expired = true;
        match self.machine.as_mut() {
            Some(m) => {
                m.force_expire();
                self.run_tick(now);
            }
            None => self.publish_untracked(),
        }
    }

    // ── Events ──────────────────────────────────────────────────────

    fn handle_event(&mut self, event: TabEvent, now: DateTime<Utc>) {
        match event.kind {
            EventKind::Activity | EventKind::Extend => {
                let mut stamp = event.sent_at;
                if let Some(ms) = event.payload.get("last_activity_ms").and_then(|v| v.as_i64())
                    && let Some(ts) = Utc.timestamp_millis_opt(ms).single()
                {
                    stamp = stamp.max(ts);
                }
                self.recorder.merge_remote(stamp);
                if let Some(m) = self.machine.as_mut() {
                    m.merge_activity(stamp);
                }
                self.run_tick(now);
            }
            EventKind::Warning => {
                // A sibling already warned for this epoch; remaining time
                // is re-derived locally from the merged timestamp.
                if let Some(m) = self.machine.as_mut() {
                    m.mark_warned();
                }
                self.run_tick(now);
            }
            EventKind::Logout => self.follow_logout(&event, now),
            EventKind::Focus => {
                tracing::debug!(tab = %self.tab_id, origin = %event.tab_id, "sibling tab claimed enforcement");
            }
            _ => {}
        }
    }

    /// A sibling tab executed the logout: redirect locally, never
    /// re-broadcast and never touch the shared keys the originator wrote.
    fn follow_logout(&mut self, event: &TabEvent, now: DateTime<Utc>) {
        if !self.permit.try_acquire() {
            return;
        }
        self.release_pending = true;

        let message = event
            .payload
            .get("reason")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse::<LogoutReason>().ok())
            .map(LogoutReason::message);

        tracing::info!(tab = %self.tab_id, origin = %event.tab_id, "sibling tab logged out, redirecting");
        if let Some(m) = self.machine.as_mut() {
            m.reset(now);
        }
        self.server_expired = false;
        self.navigator.replace(&self.config.login_route, message);
        self.run_tick(now);
    }

    // ── Logout ──────────────────────────────────────────────────────

    fn do_logout(&mut self, reason: LogoutReason, opts: LogoutOptions, now: DateTime<Utc>) {
        if !self.permit.try_acquire() {
            tracing::debug!(tab = %self.tab_id, "logout already in progress, ignoring");
            return;
        }
        self.release_pending = true;

        let plan = plan_logout(
            reason,
            opts,
            &self.navigator.current_route(),
            &self.config.login_route,
        );

        self.store.set(KEY_REASON, &plan.message);
        if let Some(route) = &plan.preserved_route {
            self.store.set(KEY_REDIRECT, route);
        }
        self.store.remove(KEY_TOKEN);

        if let Some(m) = self.machine.as_mut() {
            m.reset(now);
        }
        self.server_expired = false;

        if plan.broadcast {
            self.bus.publish(
                EventKind::Logout,
                serde_json::json!({
                    "reason": plan.reason.as_str(),
                    "preserve_route": plan.preserved_route.is_some(),
                }),
                now,
            );
        }
        if plan.redirect {
            self.navigator.replace(&self.config.login_route, Some(&plan.message));
        }
        tracing::info!(tab = %self.tab_id, reason = %plan.reason, "logged out");

        self.run_tick(now);
    }
}

// ─── Tests ────────────────────────────────────────────────────────
