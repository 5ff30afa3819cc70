pub mod events;
pub mod handler;

pub use handler::message_stream_handler;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::mpsc;

use events::Event;

/// How many undelivered events a single subscriber may buffer before it is
/// considered too slow and evicted.
pub const SUBSCRIBER_QUEUE_CAPACITY: usize = 64;

/// One registered WebSocket subscriber's receive half.
///
/// Dropping the `Subscription` (or having the broker drop its send half on
/// eviction) terminates the subscriber's forward loop.
pub struct Subscription {
    pub id: u64,
    pub rx: mpsc::Receiver<String>,
}

/// Per-text-channel registry of WebSocket subscribers with typed event
/// fan-out.
///
/// Channels are independent: the only shared lock is the registry map itself,
/// held just long enough to snapshot one channel's senders. Publishing never
/// blocks on any receiver — each subscriber has a bounded queue and a full
/// queue evicts its owner.
///
/// Cheaply cloneable — all clones share the same underlying map via `Arc`.
#[derive(Clone, Default)]
pub struct Broker {
    channels: Arc<Mutex<HashMap<i64, HashMap<u64, mpsc::Sender<String>>>>>,
    next_subscriber_id: Arc<AtomicU64>,
}

impl Broker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber under `channel_id`.
    ///
    /// Events published before this call are not replayed.
    pub fn subscribe(&self, channel_id: i64) -> Subscription {
        let id = self.next_subscriber_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE_CAPACITY);

        self.channels
            .lock()
            .expect("broker registry poisoned")
            .entry(channel_id)
            .or_default()
            .insert(id, tx);

        Subscription { id, rx }
    }

    /// Deregister a subscriber. Idempotent: the subscriber may already have
    /// been evicted by a publish that found its queue full.
    pub fn unsubscribe(&self, channel_id: i64, subscriber_id: u64) {
        let mut channels = self.channels.lock().expect("broker registry poisoned");
        if let Some(subs) = channels.get_mut(&channel_id) {
            subs.remove(&subscriber_id);
            if subs.is_empty() {
                channels.remove(&channel_id);
            }
        }
    }

    /// Fan a typed event out to every subscriber of `channel_id`.
    ///
    /// Best-effort and non-blocking: the subscriber set is snapshotted under
    /// the lock, then each send is a `try_send`. A full queue means the
    /// subscriber is not keeping up — it is evicted so it cannot stall
    /// delivery to the rest of the channel. Failures are logged, never
    /// returned: by the time an event is published its write has committed.
    pub fn publish(&self, channel_id: i64, event: &str, data: Value) {
        let payload = match serde_json::to_string(&Event::new(event, data)) {
            Ok(json) => json,
            Err(e) => {
                tracing::error!(
                    channel_id,
                    event,
                    error = ?e,
                    "Failed to serialize event; this is a programming error"
                );
                return;
            }
        };

        let snapshot: Vec<(u64, mpsc::Sender<String>)> = {
            let channels = self.channels.lock().expect("broker registry poisoned");
            match channels.get(&channel_id) {
                Some(subs) => subs.iter().map(|(id, tx)| (*id, tx.clone())).collect(),
                None => return,
            }
        };

        let mut evicted: Vec<u64> = Vec::new();
        for (id, tx) in snapshot {
            match tx.try_send(payload.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(
                        channel_id,
                        subscriber_id = id,
                        "Subscriber queue full; evicting slow subscriber"
                    );
                    evicted.push(id);
                }
                // Receiver already gone; its handler will deregister itself.
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }

        for id in evicted {
            self.unsubscribe(channel_id, id);
        }
    }

    /// Returns the number of live subscribers on a channel.
    pub fn subscriber_count(&self, channel_id: i64) -> usize {
        self.channels
            .lock()
            .expect("broker registry poisoned")
            .get(&channel_id)
            .map_or(0, HashMap::len)
    }
}

// ── Unit tests ────────────────────────────────────────────────────────────────
