//! Per-session writer locks.
//!
//! Recommend and feedback operations for one session must run serialized in
//! arrival order: two concurrent feedbacks would replay the same prior log
//! and race the append. Cross-session operations stay fully parallel.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

#[derive(Default)]
pub struct SessionLocks {
    locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the writer lock for a session. The DashMap shard guard is
    /// released before awaiting so other sessions are never blocked.
    pub async fn acquire(&self, session_id: Uuid) -> OwnedMutexGuard<()> {
        let lock = self.locks.entry(session_id).or_default().clone();
        lock.lock_owned().await
    }

    pub fn tracked_sessions(&self) -> usize {
        self.locks.len()
    }
}
