//! Cross-tab event bus: best-effort fan-out over two independent
//! transports.
//!
//! `publish` attempts the realtime channel and unconditionally writes the
//! serialized event to the persisted fallback slot, whose change
//! notification reaches sibling tabs even when the realtime primitive is
//! unsupported or closed. `EventStream` merges both deliveries, drops
//! self-originated events, and de-duplicates by event id — no ordering is
//! assumed across transports.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use sessmux_core::types::{EventKind, KEY_EVENT, TabEvent};

use crate::channel::TabChannel;
use crate::store::{self, SessionStore, StoreChange};

/// Recently-seen event ids kept for cross-transport dedup.
const SEEN_CAPACITY: usize = 64;

// ─── Bus ──────────────────────────────────────────────────────────

pub struct EventBus {
    tab_id: String,
    store: Arc<dyn SessionStore>,
    channel: Option<TabChannel>,
    seq: AtomicU64,
}

impl EventBus {
    /// `channel` is `None` when the realtime primitive is unsupported;
    /// the storage fallback then carries everything.
    pub fn new(tab_id: String, store: Arc<dyn SessionStore>, channel: Option<TabChannel>) -> Self {
        Self {
            tab_id,
            store,
            channel,
            seq: AtomicU64::new(0),
        }
    }

    pub fn tab_id(&self) -> &str {
        &self.tab_id
    }

    /// Fan the event out to sibling tabs. Realtime failures are swallowed;
    /// the fallback write always happens.
    pub fn publish(
        &self,
        kind: EventKind,
        payload: serde_json::Value,
        now: DateTime<Utc>,
    ) -> TabEvent {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let event = TabEvent {
            event_id: format!("{}:{seq}", self.tab_id),
            tab_id: self.tab_id.clone(),
            kind,
            payload,
            sent_at: now,
        };

        if let Some(channel) = &self.channel
            && let Err(err) = channel.send(&event)
        {
            tracing::debug!(
                channel = channel.name(),
                "realtime send failed ({err}); storage fallback carries the event"
            );
        }
        store::write_event(&*self.store, &event);

        event
    }

    /// Subscribe to sibling-tab events. Transports do not replay: call
    /// before the events of interest are published.
    pub fn subscribe(&self) -> EventStream {
        EventStream {
            tab_id: self.tab_id.clone(),
            channel_rx: self.channel.as_ref().map(TabChannel::subscribe),
            store_rx: Some(self.store.changes()),
            seen: SeenIds::new(SEEN_CAPACITY),
        }
    }
}

// ─── Stream ───────────────────────────────────────────────────────

pub struct EventStream {
    tab_id: String,
    channel_rx: Option<broadcast::Receiver<TabEvent>>,
    store_rx: Option<broadcast::Receiver<StoreChange>>,
    seen: SeenIds,
}

impl EventStream {
    /// Next event originated by a sibling tab, whichever transport
    /// delivers it first. Returns `None` once both transports are gone.
    pub async fn recv(&mut self) -> Option<TabEvent> {
        loop {
            let event = self.next_raw().await?;
            if event.tab_id == self.tab_id {
                continue;
            }
            if !self.seen.insert(&event.event_id) {
                continue;
            }
            return Some(event);
        }
    }

    async fn next_raw(&mut self) -> Option<TabEvent> {
        loop {
            if self.channel_rx.is_none() && self.store_rx.is_none() {
                return None;
            }
            tokio::select! {
                res = recv_or_pending(&mut self.channel_rx) => match res {
                    Ok(event) => return Some(event),
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::debug!("realtime receiver lagged, skipped {skipped} events");
                    }
                    Err(RecvError::Closed) => self.channel_rx = None,
                },
                res = recv_or_pending(&mut self.store_rx) => match res {
                    Ok(change) => {
                        if change.key == KEY_EVENT
                            && let Some(raw) = change.value
                            && let Some(event) = store::decode_event(&raw)
                        {
                            return Some(event);
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::debug!("storage watcher lagged, skipped {skipped} changes");
                    }
                    Err(RecvError::Closed) => self.store_rx = None,
                },
            }
        }
    }
}

async fn recv_or_pending<T: Clone>(
    rx: &mut Option<broadcast::Receiver<T>>,
) -> Result<T, RecvError> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

// ─── Dedup ────────────────────────────────────────────────────────

#[derive(Debug)]
struct SeenIds {
    order: VecDeque<String>,
    set: HashSet<String>,
    cap: usize,
}

impl SeenIds {
    fn new(cap: usize) -> Self {
        Self {
            order: VecDeque::with_capacity(cap),
            set: HashSet::with_capacity(cap),
            cap,
        }
    }

    /// Returns `false` when the id was already seen.
    fn insert(&mut self, id: &str) -> bool {
        if self.set.contains(id) {
            return false;
        }
        if self.order.len() == self.cap
            && let Some(oldest) = self.order.pop_front()
        {
            self.set.remove(&oldest);
        }
        self.order.push_back(id.to_owned());
        self.set.insert(id.to_owned());
        true
    }
}

// ─── Tests ────────────────────────────────────────────────────────
