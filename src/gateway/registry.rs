//! Progress registry.
//!
//! Process-wide map of `envelope_id -> latest snapshot + subscribers`.
//! Related envelopes are identified by id/parent_id, never by in-memory
//! references, so the registry never forms cycles and eviction is a plain
//! map removal: terminal entries linger briefly for late status reads, and a
//! TTL sweep catches envelopes that never reach a terminal state.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;

use crate::progress::{EnvelopeStatus, ProgressUpdate};

const SUBSCRIBER_CAPACITY: usize = 64;

struct Entry {
    latest: ProgressUpdate,
    subscribers: broadcast::Sender<ProgressUpdate>,
    updated_at: Instant,
    terminal_at: Option<Instant>,
}

/// Snapshot + fan-out registry for envelope progress.
pub struct ProgressRegistry {
    entries: Mutex<HashMap<String, Entry>>,
    terminal_linger: Duration,
    ttl: Duration,
}

impl std::fmt::Debug for ProgressRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        f.debug_struct("ProgressRegistry")
            .field("tracked", &entries.len())
            .finish()
    }
}

impl ProgressRegistry {
    pub fn new(terminal_linger: Duration, ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            terminal_linger,
            ttl,
        }
    }

    /// Record a freshly created envelope as pending at the head of its route.
    pub fn init(&self, envelope_id: &str, first_actor: &str, route_len: usize) {
        let update = ProgressUpdate::new(
            envelope_id,
            first_actor,
            0,
            route_len,
            EnvelopeStatus::Pending,
        );
        self.ingest(update);
    }

    /// Ingest a progress update, broadcasting it to subscribers.
    pub fn ingest(&self, update: ProgressUpdate) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        let entry = entries
            .entry(update.envelope_id.clone())
            .or_insert_with(|| Entry {
                latest: update.clone(),
                subscribers: broadcast::channel(SUBSCRIBER_CAPACITY).0,
                updated_at: now,
                terminal_at: None,
            });
        entry.latest = update.clone();
        entry.updated_at = now;
        if update.status.is_terminal() && entry.terminal_at.is_none() {
            entry.terminal_at = Some(now);
        }
        let _ = entry.subscribers.send(update);
    }

    /// Latest snapshot for an envelope, `None` when never observed.
    pub fn snapshot(&self, envelope_id: &str) -> Option<ProgressUpdate> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.get(envelope_id).map(|e| e.latest.clone())
    }

    /// Subscribe to an envelope's updates.
    ///
    /// Returns the current snapshot (if any) plus a receiver for subsequent
    /// updates. Subscribing to an unobserved envelope is allowed so a client
    /// can attach before the first sidecar update lands.
    pub fn subscribe(
        &self,
        envelope_id: &str,
    ) -> (Option<ProgressUpdate>, broadcast::Receiver<ProgressUpdate>) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let entry = entries.entry(envelope_id.to_string()).or_insert_with(|| Entry {
            latest: ProgressUpdate::new(envelope_id, "", 0, 0, EnvelopeStatus::Unknown),
            subscribers: broadcast::channel(SUBSCRIBER_CAPACITY).0,
            updated_at: Instant::now(),
            terminal_at: None,
        });
        let snapshot = match entry.latest.status {
            EnvelopeStatus::Unknown => None,
            _ => Some(entry.latest.clone()),
        };
        (snapshot, entry.subscribers.subscribe())
    }

    /// Evict terminal entries past the linger window and stale entries past
    /// the TTL. Returns how many entries were removed.
    pub fn sweep(&self) -> usize {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let before = entries.len();
        let now = Instant::now();
        let linger = self.terminal_linger;
        let ttl = self.ttl;
        entries.retain(|_, entry| {
            if let Some(terminal_at) = entry.terminal_at {
                return now.duration_since(terminal_at) < linger;
            }
            now.duration_since(entry.updated_at) < ttl
        });
        before - entries.len()
    }

    /// Periodic sweep task.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let evicted = registry.sweep();
                if evicted > 0 {
                    tracing::debug!("Progress registry evicted {} entries", evicted);
                }
            }
        })
    }
}
