// src/core/state/persistence.rs

//! Contains state definitions related to data persistence (AOF/CTDB).

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;
use tokio::sync::{Mutex, Notify, mpsc};

/// Holds all state and channels related to persistence.
#[derive(Debug)]
pub struct PersistenceState {
    /// An atomic flag indicating that a snapshot save (SAVE/BGSAVE) is in
    /// progress. Replica sessions attaching during such a save must wait for
    /// the next replication snapshot.
    pub is_saving_snapshot: Arc<AtomicBool>,
    /// Woken whenever a snapshot save finishes, so waiters can re-check.
    pub save_finished: Arc<Notify>,
    /// A counter for the number of keys dirtied since the last save.
    pub dirty_keys_counter: Arc<AtomicU64>,
    /// The timestamp of the last successful snapshot save.
    pub last_save_success_time: Arc<Mutex<Option<Instant>>>,
    /// Asks the AOF writer to rebuild the log from the live dataset. Present
    /// only when the AOF is enabled.
    pub aof_rewrite_request_tx: Option<mpsc::Sender<()>>,
}

impl PersistenceState {
    /// Creates a new `PersistenceState` with initialized channels and counters.
    pub fn new(aof_rewrite_request_tx: Option<mpsc::Sender<()>>) -> Self {
        Self {
            is_saving_snapshot: Arc::new(AtomicBool::new(false)),
            save_finished: Arc::new(Notify::new()),
            dirty_keys_counter: Arc::new(AtomicU64::new(0)),
            last_save_success_time: Arc::new(Mutex::new(None)),
            aof_rewrite_request_tx,
        }
    }

    /// Atomically increments the dirty keys counter.
    pub fn increment_dirty_keys(&self, count: u64) {
        self.dirty_keys_counter.fetch_add(count, Ordering::Relaxed);
    }
}
