// src/core/storage/db.rs

//! A single logical database: a concurrent map of keys to string values.

use super::data_types::StoredValue;
use bytes::Bytes;
use dashmap::DashMap;

/// `Db` represents one logical database. All access goes through lock-free
/// `DashMap` operations; expired entries are reaped lazily on access.
#[derive(Debug, Default)]
pub struct Db {
    entries: DashMap<Bytes, StoredValue>,
}

impl Db {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Fetches a live value, dropping it first if its expiry has passed.
    pub fn get(&self, key: &Bytes) -> Option<StoredValue> {
        if let Some(entry) = self.entries.get(key) {
            if entry.value().is_expired() {
                drop(entry);
                self.entries.remove(key);
                return None;
            }
            return Some(entry.value().clone());
        }
        None
    }

    pub fn set(&self, key: Bytes, value: StoredValue) {
        self.entries.insert(key, value);
    }

    /// Removes a key, reporting whether a live value was present.
    pub fn remove(&self, key: &Bytes) -> bool {
        match self.entries.remove(key) {
            Some((_, value)) => !value.is_expired(),
            None => false,
        }
    }

    pub fn contains(&self, key: &Bytes) -> bool {
        self.get(key).is_some()
    }

    /// Updates the expiry of a live key. Returns false if the key is absent.
    pub fn set_expiry(&self, key: &Bytes, expires_at_ms: Option<u64>) -> bool {
        if let Some(mut entry) = self.entries.get_mut(key) {
            if entry.value().is_expired() {
                drop(entry);
                self.entries.remove(key);
                return false;
            }
            entry.value_mut().expires_at_ms = expires_at_ms;
            return true;
        }
        false
    }

    /// Number of live keys. Walks the map so that expired-but-unreaped
    /// entries are not counted.
    pub fn key_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| !entry.value().is_expired())
            .count()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    /// All live keys matching a glob pattern.
    pub fn keys_matching(&self, pattern: &str) -> Vec<Bytes> {
        let matcher = wildmatch::WildMatch::new(pattern);
        self.entries
            .iter()
            .filter(|entry| !entry.value().is_expired())
            .filter(|entry| matcher.matches(&String::from_utf8_lossy(entry.key())))
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Snapshot of every live key/value pair, used by persistence and full
    /// resynchronization.
    pub fn all_entries(&self) -> Vec<(Bytes, StoredValue)> {
        self.entries
            .iter()
            .filter(|entry| !entry.value().is_expired())
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }
}
