//! Per-key locks for single-flight fetches
//!
//! A slot exists only while some caller holds or waits for it; the last
//! guard to drop removes it, so the map never outgrows the callers in flight.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Default)]
pub struct KeyedLocks {
    slots: DashMap<String, Arc<Mutex<()>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive use of `key`
    pub async fn lock(&self, key: &str) -> KeyedGuard<'_> {
        let mut slot = KeyedGuard {
            locks: self,
            key: key.to_string(),
            mutex: Some(self.slots.entry(key.to_string()).or_default().clone()),
            guard: None,
        };
        if let Some(mutex) = slot.mutex.clone() {
            let acquire = mutex.lock_owned();
            slot.guard = Some(acquire.await);
        }
        slot
    }

    /// Keys with a caller holding or waiting for them
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Held lock on one key; dropping it also releases a cancelled wait
pub struct KeyedGuard<'a> {
    locks: &'a KeyedLocks,
    key: String,
    mutex: Option<Arc<Mutex<()>>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyedGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        self.mutex.take();
        // Only the map's own reference left: nobody else holds or waits
        self.locks
            .slots
            .remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}
