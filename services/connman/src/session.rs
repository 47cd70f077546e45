//! Live session tracking
//!
//! Every handler registers a [`Session`] for as long as its connection is
//! open. [`SessionTracker::dispose_all`] signals every registered session to
//! stop; dropping a `Session` unregisters it.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tracing::debug;

#[derive(Debug, Default)]
pub struct SessionTracker {
    next_id: AtomicU64,
    sessions: DashMap<u64, watch::Sender<bool>>,
    idle: Notify,
}

impl SessionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(self: &Arc<Self>) -> Session {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = watch::channel(false);
        self.sessions.insert(id, tx);
        debug!(session = id, active = self.sessions.len(), "Session registered");

        Session {
            id,
            disposed: rx,
            tracker: Arc::clone(self),
        }
    }

    fn remove(&self, id: u64) {
        if self.sessions.remove(&id).is_some() {
            debug!(session = id, active = self.sessions.len(), "Session removed");
        }
        if self.sessions.is_empty() {
            self.idle.notify_waiters();
        }
    }

    /// Signal every live session to close; returns how many were signalled
    pub fn dispose_all(&self) -> usize {
        let mut signalled = 0;
        for entry in self.sessions.iter() {
            entry.value().send_replace(true);
            signalled += 1;
        }
        signalled
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Wait until no sessions remain or `timeout` passes; true if idle
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, async {
            loop {
                let notified = self.idle.notified();
                if self.sessions.is_empty() {
                    return;
                }
                notified.await;
            }
        })
        .await
        .is_ok()
    }
}

/// Registration of one live connection
#[derive(Debug)]
pub struct Session {
    id: u64,
    disposed: watch::Receiver<bool>,
    tracker: Arc<SessionTracker>,
}

impl Session {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_disposed(&self) -> bool {
        *self.disposed.borrow()
    }

    /// Resolves once the session has been told to dispose
    pub async fn disposed(&mut self) {
        while !*self.disposed.borrow_and_update() {
            // Sender gone means the tracker dropped the entry
            if self.disposed.changed().await.is_err() {
                return;
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.tracker.remove(self.id);
    }
}
