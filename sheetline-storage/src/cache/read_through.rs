//! Read-through fetch coordinator.
//!
//! Serves a dataset from the registry while it is fresh, otherwise joins the
//! fetch already in flight for the key, otherwise leads a new one through the
//! retry executor. A missing range caches as empty, and exhausted transient
//! retries fall back to the previous snapshot (or an empty list) so callers
//! see stale data instead of errors. Permanent failures are returned to every
//! caller of the flight and leave the registry untouched.

use std::cmp::Ordering;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use sheetline_core::{DatasetKey, Grid, HeaderMap, Record, RemoteError, RowPosition, RowView};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::freshness::{EntryState, Freshness};
use super::registry::CacheRegistry;
use super::single_flight::{FlightStats, SingleFlight};
use crate::retry::RetryExecutor;

/// Turns one data row into a record. `None` drops the row (e.g. archived).
///
/// `index` is the zero-based position of the row below the header. A record
/// returned without a position is given the row's sheet position.
pub trait RowParser: Send + Sync {
    fn parse(&self, row: &RowView<'_>, index: usize) -> Option<Record>;
}

struct FnParser<F>(F);

impl<F> RowParser for FnParser<F>
where
    F: Fn(&RowView<'_>, usize) -> Option<Record> + Send + Sync,
{
    fn parse(&self, row: &RowView<'_>, index: usize) -> Option<Record> {
        (self.0)(row, index)
    }
}

/// Parser that keeps every mapped column and skips blank rows.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllColumns;

impl RowParser for AllColumns {
    fn parse(&self, row: &RowView<'_>, _index: usize) -> Option<Record> {
        if row.is_blank() {
            return None;
        }
        Some(row.to_record())
    }
}

/// Shared, type-erased row parser.
pub type SharedParser = Arc<dyn RowParser>;

/// Wrap a closure as a [`SharedParser`].
pub fn row_parser<F>(parse: F) -> SharedParser
where
    F: Fn(&RowView<'_>, usize) -> Option<Record> + Send + Sync + 'static,
{
    Arc::new(FnParser(parse))
}

/// Ordering applied to parsed records before they are cached.
pub type RecordOrder = Arc<dyn Fn(&Record, &Record) -> Ordering + Send + Sync>;

/// Order records by one field, compared as strings.
pub fn order_by_field(label: impl Into<String>, descending: bool) -> RecordOrder {
    let label = label.into();
    Arc::new(move |a: &Record, b: &Record| {
        let ordering = a.get(&label).cmp(b.get(&label));
        if descending {
            ordering.reverse()
        } else {
            ordering
        }
    })
}

/// Apply `parser` to every data row of `grid` (row 0 is the header, sheet
/// row 1).
pub fn parse_grid(grid: &Grid, parser: &dyn RowParser, sort: Option<&RecordOrder>) -> Vec<Record> {
    parse_grid_at(grid, RowPosition::HEADER, parser, sort)
}

/// [`parse_grid`] for a grid whose header sits at sheet row `header_row`.
pub fn parse_grid_at(
    grid: &Grid,
    header_row: RowPosition,
    parser: &dyn RowParser,
    sort: Option<&RecordOrder>,
) -> Vec<Record> {
    let header = HeaderMap::from_grid(grid);
    if !header.duplicates().is_empty() {
        warn!(
            duplicates = ?header.duplicates(),
            "Duplicate header names, first occurrence wins"
        );
    }

    let mut records: Vec<Record> = grid
        .iter()
        .skip(1)
        .enumerate()
        .filter_map(|(index, cells)| {
            let position = RowPosition::below(header_row, index);
            let view = RowView::new(&header, cells, position);
            let mut record = parser.parse(&view, index)?;
            if record.position().is_none() {
                record.set_position(position);
            }
            Some(record)
        })
        .collect();

    if let Some(order) = sort {
        records.sort_by(|a, b| order(a, b));
    }
    records
}

/// Cache-first dataset reads with request coalescing.
pub struct ReadThroughCache {
    registry: Arc<CacheRegistry>,
    flights: SingleFlight<DatasetKey, Result<Arc<Vec<Record>>, RemoteError>>,
    retry: RetryExecutor,
}

impl ReadThroughCache {
    pub fn new(registry: Arc<CacheRegistry>, retry: RetryExecutor) -> Self {
        Self {
            registry,
            flights: SingleFlight::new(),
            retry,
        }
    }

    pub fn registry(&self) -> &Arc<CacheRegistry> {
        &self.registry
    }

    pub fn retry(&self) -> &RetryExecutor {
        &self.retry
    }

    pub fn flight_stats(&self) -> FlightStats {
        self.flights.stats()
    }

    pub fn state(&self, key: &DatasetKey, ttl: Duration) -> EntryState {
        let entry = self.registry.get(key);
        EntryState::from_freshness(
            Freshness::evaluate(&entry, ttl, Instant::now()),
            self.flights.in_flight(key),
        )
    }

    /// Read `key`, fetching through `fetch` when the cached snapshot is
    /// absent, invalidated, or older than `ttl`.
    ///
    /// `fetch` may be called several times (once per retry attempt). Only a
    /// permanent remote error is returned. The fetched grid is taken to start
    /// at sheet row 1.
    pub async fn fetch_and_cache<F, Fut>(
        &self,
        key: &DatasetKey,
        ttl: Duration,
        fetch: F,
        parser: &dyn RowParser,
        sort: Option<&RecordOrder>,
    ) -> Result<Arc<Vec<Record>>, RemoteError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Grid, RemoteError>>,
    {
        self.fetch_and_cache_at(key, ttl, RowPosition::HEADER, fetch, parser, sort)
            .await
    }

    /// [`fetch_and_cache`](Self::fetch_and_cache) for a fetch whose header
    /// row sits at sheet row `header_row`, so record positions address the
    /// sheet directly.
    pub async fn fetch_and_cache_at<F, Fut>(
        &self,
        key: &DatasetKey,
        ttl: Duration,
        header_row: RowPosition,
        fetch: F,
        parser: &dyn RowParser,
        sort: Option<&RecordOrder>,
    ) -> Result<Arc<Vec<Record>>, RemoteError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Grid, RemoteError>>,
    {
        if let Some(snapshot) = self.fresh_snapshot(key, ttl) {
            debug!(dataset = %key, "Cache hit");
            return Ok(snapshot);
        }

        self.flights
            .run(key.clone(), || async move {
                // A flight for this key may have finished between the check
                // above and our registration.
                if let Some(snapshot) = self.fresh_snapshot(key, ttl) {
                    return Ok(snapshot);
                }
                self.refresh(key, header_row, fetch, parser, sort).await
            })
            .await
    }

    fn fresh_snapshot(&self, key: &DatasetKey, ttl: Duration) -> Option<Arc<Vec<Record>>> {
        let entry = self.registry.get(key);
        if Freshness::evaluate(&entry, ttl, Instant::now()).is_fresh() {
            entry.snapshot
        } else {
            None
        }
    }

    async fn refresh<F, Fut>(
        &self,
        key: &DatasetKey,
        header_row: RowPosition,
        fetch: F,
        parser: &dyn RowParser,
        sort: Option<&RecordOrder>,
    ) -> Result<Arc<Vec<Record>>, RemoteError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Grid, RemoteError>>,
    {
        info!(dataset = %key, "Refreshing dataset");

        match self.retry.execute(fetch).await {
            Ok(grid) => {
                let records = Arc::new(parse_grid_at(&grid, header_row, parser, sort));
                self.registry.set(key, Arc::clone(&records));
                info!(dataset = %key, rows = records.len(), "Dataset refreshed");
                Ok(records)
            }
            Err(err) if err.is_structural_absence() => {
                warn!(
                    dataset = %key,
                    message = %err.message,
                    "Range does not exist, caching empty dataset"
                );
                let empty = Arc::new(Vec::new());
                self.registry.set(key, Arc::clone(&empty));
                Ok(empty)
            }
            Err(err) if err.is_transient() => {
                error!(
                    dataset = %key,
                    code = err.code,
                    message = %err.message,
                    "Dataset read failed, serving previous snapshot"
                );
                // The refresh instant is left alone so the next read retries.
                match self.registry.get(key).snapshot {
                    Some(previous) => Ok(previous),
                    None => {
                        let empty = Arc::new(Vec::new());
                        self.registry.set(key, Arc::clone(&empty));
                        Ok(empty)
                    }
                }
            }
            Err(err) => {
                error!(
                    dataset = %key,
                    code = err.code,
                    message = %err.message,
                    "Dataset read failed permanently"
                );
                Err(err)
            }
        }
    }
}
