//! Single-flight request coalescing.
//!
//! The first caller for a key becomes the leader and runs the work; callers
//! arriving while it runs subscribe to the leader's result instead of starting
//! their own. The in-flight marker is removed under the same lock followers
//! subscribe under, so every follower sees either the result or the marker's
//! absence, never a lost message.
//!
//! ```text
//! caller A ─┐
//! caller B ─┼──► SingleFlight ──► work (A leads) ──┐
//! caller C ─┘        ▲                              │
//!                    └──── same V to A, B, C ◄──────┘
//! ```

use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::broadcast;
use tracing::debug;

/// Counters for monitoring how often work is shared.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlightStats {
    /// Calls to [`SingleFlight::run`].
    pub total: u64,
    /// Calls that ran the work themselves.
    pub leaders: u64,
    /// Calls that waited on another caller's work.
    pub coalesced: u64,
}

impl FlightStats {
    /// Fraction of calls that were coalesced (0.0 to 1.0).
    pub fn coalescing_ratio(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.coalesced as f64 / self.total as f64
        }
    }
}

enum Registration<V> {
    Leader(broadcast::Sender<V>),
    Follower(broadcast::Receiver<V>),
}

/// At most one in-flight unit of work per key.
pub struct SingleFlight<K, V> {
    in_flight: Mutex<HashMap<K, broadcast::Sender<V>>>,
    total: AtomicU64,
    leaders: AtomicU64,
    coalesced: AtomicU64,
}

impl<K, V> Default for SingleFlight<K, V> {
    fn default() -> Self {
        Self {
            in_flight: Mutex::new(HashMap::new()),
            total: AtomicU64::new(0),
            leaders: AtomicU64::new(0),
            coalesced: AtomicU64::new(0),
        }
    }
}

impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash + Clone + Debug,
    V: Clone,
{
    /// A coordinator with nothing in flight.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<K, broadcast::Sender<V>>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn register(&self, key: &K) -> Registration<V> {
        let mut in_flight = self.lock();
        if let Some(tx) = in_flight.get(key) {
            return Registration::Follower(tx.subscribe());
        }
        // One value is ever sent per flight.
        let (tx, _rx) = broadcast::channel(1);
        in_flight.insert(key.clone(), tx.clone());
        Registration::Leader(tx)
    }

    /// Run `work` for `key`, or share the result of the run already in flight.
    ///
    /// If a leader is dropped before finishing, its followers re-register and
    /// one of them leads the next attempt.
    pub async fn run<F, Fut>(&self, key: K, work: F) -> V
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V>,
    {
        self.total.fetch_add(1, Ordering::Relaxed);
        let mut counted_as_follower = false;

        loop {
            match self.register(&key) {
                Registration::Leader(sender) => {
                    self.leaders.fetch_add(1, Ordering::Relaxed);
                    if counted_as_follower {
                        self.coalesced.fetch_sub(1, Ordering::Relaxed);
                    }
                    debug!(key = ?key, "Leading fetch");

                    let guard = FlightGuard {
                        flights: self,
                        key: key.clone(),
                        sender: Some(sender),
                    };
                    let value = work().await;
                    guard.complete(value.clone());
                    return value;
                }
                Registration::Follower(mut receiver) => {
                    if !counted_as_follower {
                        self.coalesced.fetch_add(1, Ordering::Relaxed);
                        counted_as_follower = true;
                    }
                    debug!(key = ?key, "Joining in-flight fetch");

                    match receiver.recv().await {
                        Ok(value) => return value,
                        // Leader went away without a result.
                        Err(_) => continue,
                    }
                }
            }
        }
    }

    /// Whether a leader is currently working on `key`.
    pub fn in_flight(&self, key: &K) -> bool {
        self.lock().contains_key(key)
    }

    /// Number of keys with a flight underway.
    pub fn in_flight_count(&self) -> usize {
        self.lock().len()
    }

    /// Counters since construction.
    pub fn stats(&self) -> FlightStats {
        FlightStats {
            total: self.total.load(Ordering::Relaxed),
            leaders: self.leaders.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
        }
    }
}

/// Removes the in-flight marker exactly once, on completion or cancellation.
struct FlightGuard<'a, K, V>
where
    K: Eq + Hash + Clone + Debug,
    V: Clone,
{
    flights: &'a SingleFlight<K, V>,
    key: K,
    sender: Option<broadcast::Sender<V>>,
}

impl<K, V> FlightGuard<'_, K, V>
where
    K: Eq + Hash + Clone + Debug,
    V: Clone,
{
    fn complete(mut self, value: V) {
        let mut in_flight = self.flights.lock();
        in_flight.remove(&self.key);
        if let Some(sender) = self.sender.take() {
            let waiters = sender.receiver_count();
            // No receivers is fine: nobody joined this flight.
            let _ = sender.send(value);
            if waiters > 0 {
                debug!(key = ?self.key, waiters, "Shared result with coalesced callers");
            }
        }
    }
}

impl<K, V> Drop for FlightGuard<'_, K, V>
where
    K: Eq + Hash + Clone + Debug,
    V: Clone,
{
    fn drop(&mut self) {
        if self.sender.take().is_some() {
            self.flights.lock().remove(&self.key);
            debug!(key = ?self.key, "Fetch abandoned before completion");
        }
    }
}
