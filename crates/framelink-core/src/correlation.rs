//! Request ids and pending replies for one session.

use std::{
    collections::HashMap,
    sync::{
        Mutex, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
};

use serde_json::Value;
use tokio::sync::oneshot;

/// Tracks `Request` envelopes awaiting their `Reply`.
///
/// Ids are unique per registry and start at 1. Replies are matched by id
/// only, so they may arrive in any order.
pub struct CorrelationRegistry {
    last_id: AtomicU64,
    pending: Mutex<HashMap<u64, oneshot::Sender<Value>>>,
}

impl Default for CorrelationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CorrelationRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            last_id: AtomicU64::new(0),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Allocate a fresh correlation id.
    pub fn next_id(&self) -> u64 {
        self.last_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Allocate an id and register a pending request for it.
    pub fn track(&self) -> (u64, oneshot::Receiver<Value>) {
        let uid = self.next_id();
        let (tx, rx) = oneshot::channel();
        self.lock().insert(uid, tx);
        (uid, rx)
    }

    /// Deliver a reply. Returns `false` when nothing is waiting on `uid`.
    pub fn resolve(&self, uid: u64, value: Value) -> bool {
        let Some(tx) = self.lock().remove(&uid) else {
            return false;
        };
        // The waiter may have been dropped between removal and send.
        tx.send(value).is_ok()
    }

    /// Stop tracking `uid`.
    pub fn forget(&self, uid: u64) {
        self.lock().remove(&uid);
    }

    /// Drop every pending request. Waiters observe a closed channel.
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Number of requests awaiting a reply.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<u64, oneshot::Sender<Value>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
