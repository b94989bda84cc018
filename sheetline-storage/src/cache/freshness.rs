//! Freshness of a cached dataset.
//!
//! Per key the coordinator moves through
//! `Empty -> Fetching -> Fresh -> Stale -> Fetching -> ...`. Fresh and Stale
//! both hold a snapshot and differ only by the TTL comparison; invalidation
//! forces Stale without passing through Empty.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use super::registry::CacheEntry;

/// Freshness of an entry judged against a TTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// No snapshot has been stored yet.
    Empty,
    /// Snapshot younger than the TTL. Served without a remote call.
    Fresh { age: Duration },
    /// Snapshot present but expired or invalidated.
    Stale,
}

impl Freshness {
    pub fn evaluate(entry: &CacheEntry, ttl: Duration, now: Instant) -> Self {
        if entry.snapshot.is_none() {
            return Self::Empty;
        }
        match entry.last_refreshed_at {
            Some(refreshed) => {
                let age = now.saturating_duration_since(refreshed);
                if age < ttl {
                    Self::Fresh { age }
                } else {
                    Self::Stale
                }
            }
            None => Self::Stale,
        }
    }

    pub fn is_fresh(&self) -> bool {
        matches!(self, Self::Fresh { .. })
    }
}

/// Observable state of one dataset key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryState {
    Empty,
    /// A fetch for this key is in flight.
    Fetching,
    Fresh,
    Stale,
}

impl EntryState {
    pub fn from_freshness(freshness: Freshness, fetching: bool) -> Self {
        if fetching {
            return Self::Fetching;
        }
        match freshness {
            Freshness::Empty => Self::Empty,
            Freshness::Fresh { .. } => Self::Fresh,
            Freshness::Stale => Self::Stale,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_empty_entry() {
        let entry = CacheEntry::default();
        assert_eq!(
            Freshness::evaluate(&entry, Duration::from_secs(30), Instant::now()),
            Freshness::Empty
        );
    }

    #[test]
    fn test_fresh_until_ttl() {
        let refreshed = Instant::now();
        let entry = CacheEntry {
            snapshot: Some(Arc::new(Vec::new())),
            last_refreshed_at: Some(refreshed),
        };
        let ttl = Duration::from_secs(30);

        let fresh = Freshness::evaluate(&entry, ttl, refreshed + Duration::from_secs(29));
        assert_eq!(
            fresh,
            Freshness::Fresh {
                age: Duration::from_secs(29)
            }
        );
        assert_eq!(
            Freshness::evaluate(&entry, ttl, refreshed + ttl),
            Freshness::Stale
        );
    }

    #[test]
    fn test_zero_instant_is_stale_for_any_ttl() {
        let entry = CacheEntry {
            snapshot: Some(Arc::new(Vec::new())),
            last_refreshed_at: None,
        };
        assert_eq!(
            Freshness::evaluate(&entry, Duration::from_secs(86_400), Instant::now()),
            Freshness::Stale
        );
    }

    #[test]
    fn test_fetching_overrides_freshness() {
        assert_eq!(
            EntryState::from_freshness(Freshness::Stale, true),
            EntryState::Fetching
        );
        assert_eq!(
            EntryState::from_freshness(Freshness::Empty, false),
            EntryState::Empty
        );
    }
}
