//! Published snapshot state and the observer registry.
//!
//! The poll task writes here once per successful cycle; any number of
//! observers read. Callbacks never run on the poll task: publishes are
//! marshaled through a channel onto one dedicated delivery task, so every
//! observer sees notifications on the same execution context, in
//! subscription order.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::debug;

use crate::model::ScoreEvent;

/// The published event list. All observers of one publish see the same
/// allocation; the contents are never mutated after publish.
pub type Snapshot = Arc<Vec<ScoreEvent>>;

/// Handle returned by `subscribe`; pass it back to `unsubscribe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionToken(u64);

type Callback = Arc<dyn Fn(&Snapshot) + Send + Sync>;

/// Snapshot holder plus observer registry for one polling client.
pub(crate) struct Publisher {
    snapshot: RwLock<Snapshot>,
    last_updated: RwLock<Option<DateTime<Utc>>>,
    last_error: RwLock<Option<String>>,
    callbacks: Arc<Mutex<HashMap<u64, Callback>>>,
    next_token: AtomicU64,
    delivery_tx: mpsc::UnboundedSender<Snapshot>,
}

impl Publisher {
    /// Create the publish state and spawn its delivery task. The task ends
    /// on its own once every handle to the publisher is gone.
    pub(crate) fn new() -> Arc<Self> {
        let (delivery_tx, mut delivery_rx) = mpsc::unbounded_channel::<Snapshot>();
        let callbacks: Arc<Mutex<HashMap<u64, Callback>>> = Arc::new(Mutex::new(HashMap::new()));

        let registry = Arc::clone(&callbacks);
        tokio::spawn(async move {
            while let Some(snapshot) = delivery_rx.recv().await {
                // Clone the callback handles out so a callback can subscribe
                // or unsubscribe without deadlocking the registry.
                let mut subscribers: Vec<(u64, Callback)> = {
                    let guard = registry.lock().unwrap();
                    guard.iter().map(|(id, cb)| (*id, Arc::clone(cb))).collect()
                };
                subscribers.sort_by_key(|(id, _)| *id);

                for (_, callback) in subscribers {
                    callback(&snapshot);
                }
            }
        });

        Arc::new(Publisher {
            snapshot: RwLock::new(Arc::new(Vec::new())),
            last_updated: RwLock::new(None),
            last_error: RwLock::new(None),
            callbacks,
            next_token: AtomicU64::new(0),
            delivery_tx,
        })
    }

    /// Atomically replace the snapshot and queue notification of every
    /// current observer.
    pub(crate) fn publish(&self, events: Vec<ScoreEvent>) {
        let snapshot: Snapshot = Arc::new(events);

        *self.snapshot.write().unwrap() = Arc::clone(&snapshot);
        *self.last_updated.write().unwrap() = Some(Utc::now());
        self.last_error.write().unwrap().take();

        // Send fails only when the delivery task is gone, i.e. the client is
        // being torn down and there is nobody left to notify.
        if self.delivery_tx.send(snapshot).is_err() {
            debug!("publish after delivery task shutdown dropped");
        }
    }

    /// Record a failed cycle without touching the snapshot.
    pub(crate) fn record_failure(&self, message: String) {
        *self.last_error.write().unwrap() = Some(message);
    }

    pub(crate) fn subscribe(
        &self,
        callback: impl Fn(&Snapshot) + Send + Sync + 'static,
    ) -> SubscriptionToken {
        let id = self.next_token.fetch_add(1, Ordering::Relaxed);
        self.callbacks.lock().unwrap().insert(id, Arc::new(callback));
        SubscriptionToken(id)
    }

    /// Remove an observer. Returns whether the token was still registered.
    pub(crate) fn unsubscribe(&self, token: SubscriptionToken) -> bool {
        self.callbacks.lock().unwrap().remove(&token.0).is_some()
    }

    /// Latest published snapshot; empty before the first successful cycle.
    pub(crate) fn current(&self) -> Snapshot {
        Arc::clone(&self.snapshot.read().unwrap())
    }

    pub(crate) fn last_updated(&self) -> Option<DateTime<Utc>> {
        *self.last_updated.read().unwrap()
    }

    pub(crate) fn last_error(&self) -> Option<String> {
        self.last_error.read().unwrap().clone()
    }
}
