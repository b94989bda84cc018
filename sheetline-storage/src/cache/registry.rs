//! Cache registry.
//!
//! The table of dataset snapshots shared by every reader and writer. It is an
//! ordinary object constructed at startup and passed around by `Arc`, so an
//! invalidation from any writer is visible to every reader holding the same
//! registry.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use sheetline_core::{DatasetKey, Record};
use tokio::time::Instant;

/// Snapshot of a dataset and when it was last refreshed.
///
/// `last_refreshed_at == None` is the zero instant: the entry is stale no
/// matter the TTL. The snapshot is only ever replaced whole.
#[derive(Debug, Clone, Default)]
pub struct CacheEntry {
    pub snapshot: Option<Arc<Vec<Record>>>,
    pub last_refreshed_at: Option<Instant>,
}

impl CacheEntry {
    pub fn has_snapshot(&self) -> bool {
        self.snapshot.is_some()
    }
}

#[derive(Debug, Default)]
pub struct CacheRegistry {
    entries: Mutex<HashMap<DatasetKey, CacheEntry>>,
}

impl CacheRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    // Entries are replaced or stamped in single statements, so a poisoned
    // lock still guards a consistent map.
    fn lock(&self) -> MutexGuard<'_, HashMap<DatasetKey, CacheEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The entry for `key`, creating an empty one on first access.
    pub fn get(&self, key: &DatasetKey) -> CacheEntry {
        self.lock().entry(key.clone()).or_default().clone()
    }

    /// Replace the snapshot for `key` and stamp it with the current instant.
    pub fn set(&self, key: &DatasetKey, snapshot: Arc<Vec<Record>>) {
        self.lock().insert(
            key.clone(),
            CacheEntry {
                snapshot: Some(snapshot),
                last_refreshed_at: Some(Instant::now()),
            },
        );
    }

    /// Zero the refresh instant of `key`, keeping its snapshot.
    ///
    /// Returns `false` if the key has never been seen.
    pub fn mark_stale(&self, key: &DatasetKey) -> bool {
        match self.lock().get_mut(key) {
            Some(entry) => {
                entry.last_refreshed_at = None;
                true
            }
            None => false,
        }
    }

    /// Zero the refresh instant of every known key. Returns how many.
    pub fn mark_all_stale(&self) -> usize {
        let mut entries = self.lock();
        for entry in entries.values_mut() {
            entry.last_refreshed_at = None;
        }
        entries.len()
    }

    /// Keys with an entry, sorted.
    pub fn keys(&self) -> Vec<DatasetKey> {
        let mut keys: Vec<_> = self.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Number of entries, including ones without a snapshot.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no key has been seen yet.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
