// src/core/storage/data_types.rs

//! Defines the value representation stored in the keyspace.

use bytes::Bytes;
use std::time::{SystemTime, UNIX_EPOCH};

/// Returns the current wall-clock time in milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// A single stored value together with its optional expiration.
///
/// Expirations are kept as absolute wall-clock milliseconds so that the same
/// value round-trips identically through snapshots, the append-only file, and
/// the replication stream.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredValue {
    pub data: Bytes,
    pub expires_at_ms: Option<u64>,
}

impl StoredValue {
    pub fn new(data: Bytes) -> Self {
        Self {
            data,
            expires_at_ms: None,
        }
    }

    pub fn with_expiry(data: Bytes, expires_at_ms: u64) -> Self {
        Self {
            data,
            expires_at_ms: Some(expires_at_ms),
        }
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at_ms.is_some_and(|at| at <= now_ms())
    }

    /// Remaining time to live in milliseconds, if an expiry is set and has
    /// not yet passed.
    pub fn ttl_ms(&self) -> Option<u64> {
        self.expires_at_ms
            .map(|at| at.saturating_sub(now_ms()))
            .filter(|remaining| *remaining > 0)
    }
}
