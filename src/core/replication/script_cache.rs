// src/core/replication/script_cache.rs

//! Tracks which script digests every connected replica is known to hold.
//!
//! When an `EVALSHA` reaches the propagation path, the primary may only ship
//! the short digest form if all replicas can resolve it; otherwise the command
//! is rewritten to a full `EVAL` and the digest recorded here. The cache is a
//! bounded FIFO: beyond capacity, the oldest digest is forgotten, which at
//! worst costs one extra body-carrying rewrite later.

use std::collections::{HashSet, VecDeque};
use tokio::sync::Mutex;

/// Upper bound on remembered digests.
const REPL_SCRIPT_CACHE_CAPACITY: usize = 4096;

/// A bounded FIFO set of script digests shared with all replicas.
#[derive(Debug, Default)]
pub struct ReplicatedScriptCache {
    inner: Mutex<CacheInner>,
}

#[derive(Debug, Default)]
struct CacheInner {
    order: VecDeque<String>,
    digests: HashSet<String>,
}

impl ReplicatedScriptCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a digest as replicated, evicting the oldest entry if full.
    pub async fn insert(&self, digest: &str) {
        let digest = digest.to_ascii_lowercase();
        let mut inner = self.inner.lock().await;
        if inner.digests.contains(&digest) {
            return;
        }
        while inner.order.len() >= REPL_SCRIPT_CACHE_CAPACITY {
            if let Some(evicted) = inner.order.pop_front() {
                inner.digests.remove(&evicted);
            }
        }
        inner.order.push_back(digest.clone());
        inner.digests.insert(digest);
    }

    pub async fn contains(&self, digest: &str) -> bool {
        let inner = self.inner.lock().await;
        inner.digests.contains(&digest.to_ascii_lowercase())
    }

    /// Forgets everything. Invoked on full resynchronization, on role changes
    /// away from primary, after a snapshot rewrite, and when the last replica
    /// disconnects while the append-only log is off.
    pub async fn clear(&self) {
        let mut inner = self.inner.lock().await;
        inner.order.clear();
        inner.digests.clear();
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.digests.is_empty()
    }
}
