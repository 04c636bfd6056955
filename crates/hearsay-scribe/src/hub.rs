//! Per-endpoint live subscribers with bounded, loss-tolerant fan-out.
//!
//! Publishing never blocks and never retries: a subscriber whose outbound
//! queue is full loses that message, everyone else still gets it. Correct
//! for a real-time dashboard; durable history belongs to the store.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};
use uuid::Uuid;

/// Outbound queue depth per subscriber.
pub const SUBSCRIBER_BUFFER: usize = 256;

struct SubscriberHandle {
    id: u64,
    tx: mpsc::Sender<String>,
}

/// A live subscription, held by its WebSocket task. Dropping the receiver
/// makes future sends fail; `unsubscribe` removes the registration.
pub struct Subscription {
    pub endpoint_id: Uuid,
    pub id: u64,
    pub rx: mpsc::Receiver<String>,
}

/// Registry of live subscribers keyed by endpoint id.
#[derive(Default)]
pub struct SubscriptionHub {
    subscribers: DashMap<Uuid, Vec<SubscriberHandle>>,
    next_id: AtomicU64,
}

impl SubscriptionHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, endpoint_id: Uuid) -> Subscription {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .entry(endpoint_id)
            .or_default()
            .push(SubscriberHandle { id, tx });
        debug!(%endpoint_id, subscriber = id, "subscriber registered");
        Subscription {
            endpoint_id,
            id,
            rx,
        }
    }

    /// Remove one subscriber; the endpoint entry goes away with its last one.
    pub fn unsubscribe(&self, endpoint_id: Uuid, id: u64) {
        if let Some(mut entry) = self.subscribers.get_mut(&endpoint_id) {
            entry.retain(|s| s.id != id);
            let emptied = entry.is_empty();
            drop(entry);
            if emptied {
                self.subscribers.remove_if(&endpoint_id, |_, subs| subs.is_empty());
            }
        }
        debug!(%endpoint_id, subscriber = id, "subscriber unregistered");
    }

    /// Offer `message` to every current subscriber of the endpoint. Returns
    /// how many queues accepted it.
    pub fn publish(&self, endpoint_id: Uuid, message: &str) -> usize {
        let Some(subs) = self.subscribers.get(&endpoint_id) else {
            debug!(%endpoint_id, "no subscribers for endpoint");
            return 0;
        };

        let mut delivered = 0;
        for sub in subs.iter() {
            match sub.tx.try_send(message.to_string()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(%endpoint_id, subscriber = sub.id, "subscriber queue full; dropping message");
                }
                // Receiver already gone; unregistration will clean up.
                Err(TrySendError::Closed(_)) => {}
            }
        }
        delivered
    }

    pub fn subscriber_count(&self, endpoint_id: Uuid) -> usize {
        self.subscribers
            .get(&endpoint_id)
            .map(|subs| subs.len())
            .unwrap_or(0)
    }
}
