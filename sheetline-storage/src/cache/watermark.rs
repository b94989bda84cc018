//! Write clock and invalidation routing.
//!
//! Every invalidation advances a process-wide write clock that pollers read to
//! learn that data changed. The clock only moves forward, and two advances in
//! the same millisecond still produce distinct values.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sheetline_core::{DatasetKey, RangeSpec};
use tracing::{debug, info};

use super::registry::CacheRegistry;

/// Monotonic timestamp of the most recent invalidation.
#[derive(Debug)]
pub struct WriteClock {
    millis: AtomicI64,
}

impl Default for WriteClock {
    fn default() -> Self {
        Self::new()
    }
}

impl WriteClock {
    /// A clock initialised to the current wall time.
    pub fn new() -> Self {
        Self::starting_at(Utc::now())
    }

    pub fn starting_at(at: DateTime<Utc>) -> Self {
        Self {
            millis: AtomicI64::new(at.timestamp_millis()),
        }
    }

    /// Move the clock to now, or one tick past its current value if the wall
    /// clock has not passed it. Returns the new value.
    pub fn advance(&self) -> DateTime<Utc> {
        let now = Utc::now().timestamp_millis();
        let previous = self
            .millis
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                Some(now.max(current.saturating_add(1)))
            })
            .unwrap_or(now);
        to_datetime(now.max(previous.saturating_add(1)))
    }

    pub fn read(&self) -> DateTime<Utc> {
        to_datetime(self.read_millis())
    }

    pub fn read_millis(&self) -> i64 {
        self.millis.load(Ordering::SeqCst)
    }

    /// Whether any invalidation happened after `seen`.
    pub fn changed_since(&self, seen: DateTime<Utc>) -> bool {
        self.read_millis() > seen.timestamp_millis()
    }
}

fn to_datetime(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or(DateTime::UNIX_EPOCH)
}

/// Marks registry entries stale and advances the write clock.
#[derive(Debug, Clone)]
pub struct Invalidator {
    registry: Arc<CacheRegistry>,
    clock: Arc<WriteClock>,
}

impl Invalidator {
    pub fn new(registry: Arc<CacheRegistry>, clock: Arc<WriteClock>) -> Self {
        Self { registry, clock }
    }

    pub fn clock(&self) -> &Arc<WriteClock> {
        &self.clock
    }

    /// Invalidate one key, or every key when `key` is `None`.
    ///
    /// Snapshots are kept so failed refreshes can still fall back to them.
    /// The clock advances even when the key has never been read.
    pub fn invalidate(&self, key: Option<&DatasetKey>) -> DateTime<Utc> {
        match key {
            Some(key) => self.invalidate_key(key),
            None => self.invalidate_all(),
        }
    }

    pub fn invalidate_key(&self, key: &DatasetKey) -> DateTime<Utc> {
        let known = self.registry.mark_stale(key);
        let at = self.clock.advance();
        info!(dataset = %key, known, write_clock = %at, "Invalidated dataset");
        at
    }

    pub fn invalidate_all(&self) -> DateTime<Utc> {
        let count = self.registry.mark_all_stale();
        let at = self.clock.advance();
        info!(count, write_clock = %at, "Invalidated all datasets");
        at
    }

    /// Invalidate several keys with a single clock advance.
    pub fn invalidate_many(&self, keys: &[DatasetKey]) -> DateTime<Utc> {
        for key in keys {
            self.registry.mark_stale(key);
        }
        let at = self.clock.advance();
        info!(datasets = ?keys, write_clock = %at, "Invalidated datasets");
        at
    }
}

/// Which cached datasets are derived from which sheet.
#[derive(Debug, Clone, Default)]
pub struct InvalidationMap {
    routes: HashMap<String, Vec<DatasetKey>>,
}

impl InvalidationMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare that writes to `sheet` invalidate `keys`.
    pub fn route(mut self, sheet: impl Into<String>, keys: impl IntoIterator<Item = DatasetKey>) -> Self {
        let entry = self.routes.entry(sheet.into()).or_default();
        for key in keys {
            if !entry.contains(&key) {
                entry.push(key);
            }
        }
        self
    }

    /// Datasets depending on the sheet named by `range` (a range or a bare
    /// sheet name).
    pub fn dependents_of(&self, range: &str) -> &[DatasetKey] {
        let sheet = match RangeSpec::parse(range) {
            Ok(spec) => spec.sheet,
            Err(err) => {
                debug!(range, error = %err, "Unparseable range, matching it as a sheet name");
                range.to_string()
            }
        };
        self.routes.get(&sheet).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn sheets(&self) -> impl Iterator<Item = &str> {
        self.routes.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
