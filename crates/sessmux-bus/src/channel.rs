//! Realtime channel primitive.
//!
//! Models the browser broadcast channel: a best-effort, same-origin
//! fan-out that may be unsupported (absent) or closed at any point. The
//! bus treats every send failure as recoverable — the storage fallback
//! carries the event regardless.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;
use tokio::sync::broadcast;

use sessmux_core::types::{CHANNEL_NAME, TabEvent};

const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChannelError {
    #[error("realtime channel is closed")]
    Closed,
}

/// Handle cloned into every tab of one origin.
#[derive(Debug, Clone)]
pub struct TabChannel {
    name: Arc<str>,
    tx: broadcast::Sender<TabEvent>,
    closed: Arc<AtomicBool>,
}

impl TabChannel {
    /// The app-wide channel, [`CHANNEL_NAME`].
    pub fn new() -> Self {
        Self::named(CHANNEL_NAME)
    }

    pub fn named(name: &str) -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            name: Arc::from(name),
            tx,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Deliver to every subscribed tab, including the sender's own
    /// subscription — self-filtering happens at the bus layer.
    pub fn send(&self, event: &TabEvent) -> Result<(), ChannelError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ChannelError::Closed);
        }
        // No receivers is not a failure: a single open tab has nobody
        // to talk to.
        let _ = self.tx.send(event.clone());
        Ok(())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TabEvent> {
        self.tx.subscribe()
    }

    /// Close for all holders, as when the browser revokes the primitive.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Default for TabChannel {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sessmux_core::types::EventKind;

    fn event(id: &str) -> TabEvent {
        TabEvent {
            event_id: id.to_owned(),
            tab_id: "tab-1".to_owned(),
            kind: EventKind::Activity,
            payload: serde_json::Value::Null,
            sent_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn delivers_to_subscribers() {
        let channel = TabChannel::new();
        let mut rx = channel.subscribe();

        channel.send(&event("e-1")).expect("send");
        let got = rx.recv().await.expect("recv");
        assert_eq!(got.event_id, "e-1");
    }

    #[test]
    fn send_without_subscribers_is_ok() {
        let channel = TabChannel::new();
        assert_eq!(channel.send(&event("e-1")), Ok(()));
    }

    #[test]
    fn closed_channel_rejects_sends() {
        let channel = TabChannel::new();
        let clone = channel.clone();

        channel.close();
        assert!(clone.is_closed(), "close is visible through clones");
        assert_eq!(clone.send(&event("e-1")), Err(ChannelError::Closed));
    }

    #[test]
    fn default_channel_uses_fixed_name() {
        assert_eq!(TabChannel::new().name(), CHANNEL_NAME);
        assert_eq!(TabChannel::named("other").name(), "other");
    }
}
