//! Per-key async mutex, used to serialize alert processing within a
//! single `(rule_id, rule_fingerprint)` stream (§5 "Scheduling model").
//!
//! Simplified, process-local counterpart to the teacher's
//! `Arc<RwLock<HashMap<..>>>` shared-state pattern (see `routing.rs`):
//! cross-process locking is the persistence layer's concern (§6), not
//! this crate's.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

pub struct KeyedLock<K> {
    locks: Mutex<HashMap<K, Arc<Mutex<()>>>>,
}

impl<K: Eq + Hash + Clone> Default for KeyedLock<K> {
    fn default() -> Self {
        KeyedLock { locks: Mutex::new(HashMap::new()) }
    }
}

impl<K: Eq + Hash + Clone> KeyedLock<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires the lock for `key`, creating its entry on first use.
    /// Entries are never removed: the expected key cardinality is
    /// `(rule_id, rule_fingerprint)` pairs, which is bounded by active
    /// incidents, not unbounded request volume.
    pub async fn lock(&self, key: K) -> OwnedMutexGuard<()> {
        let per_key = {
            let mut locks = self.locks.lock().await;
            locks.entry(key).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
        };
        per_key.lock_owned().await
    }
}
