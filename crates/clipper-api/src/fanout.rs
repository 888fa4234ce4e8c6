//! Live notification fan-out.
//!
//! Each open event stream owns a small bounded channel registered under its
//! user. Publishing never blocks: an event for a connection whose buffer is
//! full is dropped for that connection only. There is no replay.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

use clipper_models::LiveEvent;

use crate::metrics;

type Channels = HashMap<String, HashMap<u64, mpsc::Sender<LiveEvent>>>;

/// Registry of live connections keyed by user.
pub struct LiveNotifier {
    channels: RwLock<Channels>,
    next_id: AtomicU64,
    capacity: usize,
}

impl LiveNotifier {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            capacity: capacity.max(1),
        }
    }

    /// Register a connection for `user_id`. Dropping the subscription
    /// unregisters it.
    pub fn subscribe(self: &Arc<Self>, user_id: &str) -> Subscription {
        let (tx, rx) = mpsc::channel(self.capacity);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let total = {
            let mut channels = self.channels.write().unwrap_or_else(PoisonError::into_inner);
            channels
                .entry(user_id.to_string())
                .or_default()
                .insert(id, tx);
            count(&channels)
        };
        metrics::set_live_connections(total);
        debug!(user_id = %user_id, connection = id, "Live connection opened");

        Subscription {
            notifier: Arc::clone(self),
            user_id: user_id.to_string(),
            id,
            receiver: rx,
        }
    }

    /// Remove one connection. Its receiver sees the channel close.
    pub fn unsubscribe(&self, user_id: &str, id: u64) {
        let total = {
            let mut channels = self.channels.write().unwrap_or_else(PoisonError::into_inner);
            if let Some(user) = channels.get_mut(user_id) {
                user.remove(&id);
                if user.is_empty() {
                    channels.remove(user_id);
                }
            }
            count(&channels)
        };
        metrics::set_live_connections(total);
        debug!(user_id = %user_id, connection = id, "Live connection closed");
    }

    /// Offer `event` to every connection of `user_id` without waiting.
    ///
    /// Returns how many connections accepted it.
    pub fn publish(&self, user_id: &str, event: &LiveEvent) -> usize {
        let channels = self.channels.read().unwrap_or_else(PoisonError::into_inner);
        let Some(connections) = channels.get(user_id) else {
            return 0;
        };

        let mut delivered = 0;
        for (id, tx) in connections {
            match tx.try_send(event.clone()) {
                Ok(()) => {
                    delivered += 1;
                    metrics::record_live_event_sent();
                }
                Err(TrySendError::Full(_)) => {
                    warn!(user_id = %user_id, connection = id, "Live connection buffer full, event dropped");
                    metrics::record_live_event_dropped();
                }
                // Receiver is mid-teardown; its guard removes the entry
                Err(TrySendError::Closed(_)) => {}
            }
        }
        delivered
    }

    /// Drop every registered channel so open streams end. Used on shutdown.
    pub fn close_all(&self) {
        let closed = {
            let mut channels = self.channels.write().unwrap_or_else(PoisonError::into_inner);
            let closed = count(&channels);
            channels.clear();
            closed
        };
        metrics::set_live_connections(0);
        debug!(closed, "Closed all live connections");
    }

    /// Open connections for one user.
    pub fn connections(&self, user_id: &str) -> usize {
        self.channels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(user_id)
            .map_or(0, HashMap::len)
    }

    /// Open connections across all users.
    pub fn total_connections(&self) -> usize {
        count(&self.channels.read().unwrap_or_else(PoisonError::into_inner))
    }
}

fn count(channels: &Channels) -> usize {
    channels.values().map(HashMap::len).sum()
}

/// One registered live connection.
pub struct Subscription {
    notifier: Arc<LiveNotifier>,
    user_id: String,
    id: u64,
    receiver: mpsc::Receiver<LiveEvent>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Next event, or `None` once unsubscribed.
    pub async fn recv(&mut self) -> Option<LiveEvent> {
        self.receiver.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.notifier.unsubscribe(&self.user_id, self.id);
    }
}
