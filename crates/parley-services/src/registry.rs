//! Session registry — which participant is reachable over which connection.
//!
//! Presence of an entry is the only notion of "online". Entries are
//! inserted by the handshake and removed by relay teardown; nothing expires
//! on its own.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use tokio::sync::Notify;

use crate::connection::Connection;

/// A connected participant.
#[derive(Debug)]
pub struct SessionEntry {
    pub identity: String,
    pub connection: Arc<Connection>,
    pub established_at: Instant,
}

impl SessionEntry {
    pub fn new(identity: impl Into<String>, connection: Arc<Connection>) -> Self {
        Self {
            identity: identity.into(),
            connection,
            established_at: Instant::now(),
        }
    }

    pub fn connection_id(&self) -> u64 {
        self.connection.id()
    }
}

/// Identity → live session. Shared by every connection task.
pub struct SessionRegistry {
    entries: DashMap<String, Arc<SessionEntry>>,
    // Woken on every registration; waiters re-check their identity.
    arrivals: Notify,
    next_id: AtomicU64,
}

pub type SharedRegistry = Arc<SessionRegistry>;

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            arrivals: Notify::new(),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn shared() -> SharedRegistry {
        Arc::new(Self::new())
    }

    /// Allocate a process-unique connection id.
    pub fn next_connection_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Insert or overwrite. Returns the entry that was displaced, if any.
    pub fn register(&self, entry: Arc<SessionEntry>) -> Option<Arc<SessionEntry>> {
        let previous = self.entries.insert(entry.identity.clone(), entry);
        self.arrivals.notify_waiters();
        previous
    }

    pub fn lookup(&self, identity: &str) -> Option<Arc<SessionEntry>> {
        self.entries.get(identity).map(|e| e.value().clone())
    }

    /// Unconditional removal. Removing an absent identity is a no-op.
    pub fn remove(&self, identity: &str) -> Option<Arc<SessionEntry>> {
        self.entries.remove(identity).map(|(_, entry)| entry)
    }

    /// Remove `identity` only while it still maps to `connection_id`.
    /// A newer registration under the same name is left in place.
    pub fn remove_connection(&self, identity: &str, connection_id: u64) -> bool {
        self.entries
            .remove_if(identity, |_, entry| entry.connection_id() == connection_id)
            .is_some()
    }

    /// Resolve as soon as `identity` is registered.
    pub async fn wait_for(&self, identity: &str) -> Arc<SessionEntry> {
        loop {
            let notified = self.arrivals.notified();
            tokio::pin!(notified);
            // Enroll before checking so a registration between the
            // lookup and the await is not missed.
            notified.as_mut().enable();

            if let Some(entry) = self.lookup(identity) {
                return entry;
            }
            notified.await;
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Point-in-time copy of all entries, sorted by identity.
    pub fn snapshot(&self) -> Vec<Arc<SessionEntry>> {
        let mut entries: Vec<_> = self.entries.iter().map(|e| e.value().clone()).collect();
        entries.sort_by(|a, b| a.identity.cmp(&b.identity));
        entries
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
