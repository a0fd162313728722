//! Shared persisted key-value store.
//!
//! The single shared resource between tabs. Writes are last-writer-wins
//! at key level and fire-and-forget: storage being unavailable degrades
//! cross-tab sync to single-tab behavior, it never surfaces as an error.
//! Malformed stored values decode to "absent".

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::broadcast;

use sessmux_core::types::{KEY_ACTIVE_TAB, KEY_EVENT, KEY_LAST_ACTIVITY, TabClaim, TabEvent};

/// Capacity of the change feed; a lagging watcher re-reads the store on
/// its next tick, so dropped notifications are recoverable.
const CHANGE_FEED_CAPACITY: usize = 64;

// ─── Trait ────────────────────────────────────────────────────────

/// One key changed. `value` is `None` for removals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreChange {
    pub key: String,
    pub value: Option<String>,
}

/// Same-origin persisted key-value storage, visible to every tab.
pub trait SessionStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str);
    fn remove(&self, key: &str);
    /// Change notifications — the storage-event fallback transport.
    fn changes(&self) -> broadcast::Receiver<StoreChange>;
}

// ─── In-memory implementation ─────────────────────────────────────

/// Store shared by all simulated tabs of one origin via `Arc`.
#[derive(Debug)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
    tx: broadcast::Sender<StoreChange>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self {
            entries: Mutex::new(HashMap::new()),
            tx,
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries
            .lock()
            .expect("store mutex poisoned")
            .get(key)
            .cloned()
    }

    fn set(&self, key: &str, value: &str) {
        self.entries
            .lock()
            .expect("store mutex poisoned")
            .insert(key.to_owned(), value.to_owned());
        // No receivers is fine: nobody is watching yet.
        let _ = self.tx.send(StoreChange {
            key: key.to_owned(),
            value: Some(value.to_owned()),
        });
    }

    fn remove(&self, key: &str) {
        self.entries
            .lock()
            .expect("store mutex poisoned")
            .remove(key);
        let _ = self.tx.send(StoreChange {
            key: key.to_owned(),
            value: None,
        });
    }

    fn changes(&self) -> broadcast::Receiver<StoreChange> {
        self.tx.subscribe()
    }
}

// ─── Typed accessors ──────────────────────────────────────────────

/// Read the merged activity timestamp (stringified epoch-ms).
pub fn read_last_activity(store: &dyn SessionStore) -> Option<DateTime<Utc>> {
    let raw = store.get(KEY_LAST_ACTIVITY)?;
    let Ok(ms) = raw.parse::<i64>() else {
        tracing::warn!("malformed {KEY_LAST_ACTIVITY} value: {raw:?}");
        return None;
    };
    Utc.timestamp_millis_opt(ms).single()
}

pub fn write_last_activity(store: &dyn SessionStore, ts: DateTime<Utc>) {
    store.set(KEY_LAST_ACTIVITY, &ts.timestamp_millis().to_string());
}

pub fn read_active_tab(store: &dyn SessionStore) -> Option<TabClaim> {
    let raw = store.get(KEY_ACTIVE_TAB)?;
    match serde_json::from_str(&raw) {
        Ok(claim) => Some(claim),
        Err(err) => {
            tracing::warn!("malformed {KEY_ACTIVE_TAB} value: {err}");
            None
        }
    }
}

pub fn write_active_tab(store: &dyn SessionStore, claim: &TabClaim) {
    if let Ok(json) = serde_json::to_string(claim) {
        store.set(KEY_ACTIVE_TAB, &json);
    }
}

/// Write the serialized event to the fallback slot.
pub fn write_event(store: &dyn SessionStore, event: &TabEvent) {
    if let Ok(json) = serde_json::to_string(event) {
        store.set(KEY_EVENT, &json);
    }
}

/// Decode a stored event; corrupt JSON is treated as no signal.
pub fn decode_event(raw: &str) -> Option<TabEvent> {
    match serde_json::from_str(raw) {
        Ok(event) => Some(event),
        Err(err) => {
            tracing::warn!("malformed {KEY_EVENT} value: {err}");
            None
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────
