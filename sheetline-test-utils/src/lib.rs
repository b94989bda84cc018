//! sheetline Test Utilities
//!
//! Shared test infrastructure for the sheetline workspace:
//! - A scripted remote store that injects failures, counts calls and adds latency
//! - Proptest generators for grids, keys and remote errors
//! - Fixtures for the sheets used across the integration tests
//! - Assertions over parsed records

pub use sheetline_core::{
    DatasetKey, Grid, Record, RemoteError, RetryConfig, RowPosition, SheetlineError,
    SheetlineResult,
};
pub use sheetline_storage::{CellUpdate, InMemoryStore, RemoteStore};

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

// ============================================================================
// SCRIPTED STORE
// ============================================================================

#[derive(Debug, Default)]
struct Script {
    read_failures: VecDeque<RemoteError>,
    write_failures: VecDeque<RemoteError>,
    always_fail_reads: Option<RemoteError>,
    read_delay: Duration,
}

/// [`InMemoryStore`] wrapper whose failures and latency are scripted by the
/// test.
///
/// Queued failures are consumed one per call, before the inner store is
/// touched. A persistent read failure applies once the queue is empty.
#[derive(Debug, Default)]
pub struct ScriptedStore {
    inner: InMemoryStore,
    script: Mutex<Script>,
    reads: AtomicUsize,
    writes: AtomicUsize,
}

impl ScriptedStore {
    pub fn new(inner: InMemoryStore) -> Self {
        Self {
            inner,
            ..Self::default()
        }
    }

    pub fn inner(&self) -> &InMemoryStore {
        &self.inner
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fail the next reads with `errors`, in order.
    pub fn fail_next_reads(&self, errors: impl IntoIterator<Item = RemoteError>) {
        self.script().read_failures.extend(errors);
    }

    /// Fail the next writes with `errors`, in order.
    pub fn fail_next_writes(&self, errors: impl IntoIterator<Item = RemoteError>) {
        self.script().write_failures.extend(errors);
    }

    /// Fail every read with `error` until [`clear_failures`](Self::clear_failures).
    pub fn fail_all_reads(&self, error: RemoteError) {
        self.script().always_fail_reads = Some(error);
    }

    pub fn clear_failures(&self) {
        let mut script = self.script();
        script.read_failures.clear();
        script.write_failures.clear();
        script.always_fail_reads = None;
    }

    /// Hold every read for `delay` after the inner store has answered (tokio
    /// time, so paused clocks apply). Concurrent readers therefore all see the
    /// data as it was before any of them returns.
    pub fn set_read_delay(&self, delay: Duration) {
        self.script().read_delay = delay;
    }

    pub fn with_read_delay(self, delay: Duration) -> Self {
        self.set_read_delay(delay);
        self
    }

    pub fn read_calls(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn write_calls(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn reset_counts(&self) {
        self.reads.store(0, Ordering::SeqCst);
        self.writes.store(0, Ordering::SeqCst);
    }

    fn before_read(&self) -> Result<(), RemoteError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let mut script = self.script();
        match script.read_failures.pop_front() {
            Some(err) => Err(err),
            None => script.always_fail_reads.clone().map_or(Ok(()), Err),
        }
    }

    async fn after_read(&self) {
        let delay = self.script().read_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    fn before_write(&self) -> Result<(), RemoteError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.script().write_failures.pop_front().map_or(Ok(()), Err)
    }
}

#[async_trait]
impl RemoteStore for ScriptedStore {
    async fn read_range(&self, range: &str) -> Result<Grid, RemoteError> {
        let result = match self.before_read() {
            Ok(()) => self.inner.read_range(range).await,
            Err(err) => Err(err),
        };
        self.after_read().await;
        result
    }

    async fn append_row(
        &self,
        range: &str,
        row: Vec<String>,
    ) -> Result<RowPosition, RemoteError> {
        self.before_write()?;
        self.inner.append_row(range, row).await
    }

    async fn update_range(&self, range: &str, rows: Grid) -> Result<(), RemoteError> {
        self.before_write()?;
        self.inner.update_range(range, rows).await
    }

    async fn batch_update_cells(&self, updates: Vec<CellUpdate>) -> Result<(), RemoteError> {
        self.before_write()?;
        self.inner.batch_update_cells(updates).await
    }

    async fn delete_rows(
        &self,
        structural_id: i64,
        start_index: u32,
        end_index: u32,
    ) -> Result<(), RemoteError> {
        self.before_write()?;
        self.inner
            .delete_rows(structural_id, start_index, end_index)
            .await
    }

    async fn structural_id(&self, sheet_name: &str) -> Result<i64, RemoteError> {
        let result = match self.before_read() {
            Ok(()) => self.inner.structural_id(sheet_name).await,
            Err(err) => Err(err),
        };
        self.after_read().await;
        result
    }
}

// ============================================================================
// GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for sheet-shaped data.

    use super::*;
    use proptest::collection::{btree_set, vec};
    use proptest::prelude::*;

    /// A header name: letters, digits and single inner spaces.
    pub fn arb_header_name() -> impl Strategy<Value = String> {
        "[A-Za-z][A-Za-z0-9]{0,8}( [A-Za-z0-9]{1,6})?"
    }

    /// A header row of distinct names.
    pub fn arb_header_row(max_width: usize) -> impl Strategy<Value = Vec<String>> {
        btree_set(arb_header_name(), 1..=max_width.max(1))
            .prop_map(|names| names.into_iter().collect())
            .prop_shuffle()
    }

    /// Any cell value, empty included.
    pub fn arb_cell() -> impl Strategy<Value = String> {
        prop_oneof![
            Just(String::new()),
            "[a-z0-9@. -]{1,12}",
            any::<u32>().prop_map(|n| n.to_string()),
        ]
    }

    /// A header row plus up to `max_rows` ragged data rows.
    pub fn arb_grid(max_width: usize, max_rows: usize) -> impl Strategy<Value = Grid> {
        arb_header_row(max_width).prop_flat_map(move |header| {
            let width = header.len();
            vec(vec(arb_cell(), 0..=width), 0..=max_rows).prop_map(move |rows| {
                let mut grid = Vec::with_capacity(rows.len() + 1);
                grid.push(header.clone());
                grid.extend(rows);
                grid
            })
        })
    }

    pub fn arb_dataset_key() -> impl Strategy<Value = DatasetKey> {
        "[a-z][a-zA-Z0-9_-]{0,15}".prop_map(|s| DatasetKey::new(s).expect("pattern has no whitespace"))
    }

    pub fn arb_data_row_position() -> impl Strategy<Value = RowPosition> {
        (2u32..10_000).prop_map(RowPosition::new)
    }

    pub fn arb_transient_error() -> impl Strategy<Value = RemoteError> {
        prop_oneof![
            Just(RemoteError::new(429, "Rate limit")),
            Just(RemoteError::new(403, "Quota exceeded for quota metric")),
            (500i32..600).prop_map(|code| RemoteError::new(code, "Backend Error")),
        ]
    }

    pub fn arb_permanent_error() -> impl Strategy<Value = RemoteError> {
        prop_oneof![
            Just(RemoteError::new(401, "Request had invalid authentication credentials")),
            Just(RemoteError::new(403, "The caller does not have permission")),
            Just(RemoteError::new(404, "Requested entity was not found")),
            Just(RemoteError::new(400, "Invalid value at 'data.values'")),
        ]
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    //! Sheets and configuration shared by integration tests.

    use super::*;

    /// Build a grid from string literals.
    pub fn grid(rows: &[&[&str]]) -> Grid {
        rows.iter()
            .map(|row| row.iter().map(|cell| cell.to_string()).collect())
            .collect()
    }

    pub fn key(name: &str) -> DatasetKey {
        DatasetKey::new(name).expect("fixture keys are well formed")
    }

    /// Contacts with a sparse last row and no "Fax" column.
    pub fn contacts_grid() -> Grid {
        grid(&[
            &["id", "Name", "Email", "Phone"],
            &["C1", "Ada Lovelace", "ada@example.com", "555-0100"],
            &["C2", "Grace Hopper", "grace@example.com"],
            &["C3", "Linus"],
        ])
    }

    pub fn companies_grid() -> Grid {
        grid(&[
            &["id", "name"],
            &["1", "acme"],
            &["2", "Acme Corp"],
        ])
    }

    pub fn crm_store() -> InMemoryStore {
        InMemoryStore::new()
            .with_sheet("Contacts", contacts_grid())
            .with_sheet("Companies", companies_grid())
    }

    /// The default retry policy without jitter, so backoff is exact.
    pub fn exact_retry() -> RetryConfig {
        RetryConfig::default().with_max_jitter(Duration::ZERO)
    }

    pub fn rate_limited() -> RemoteError {
        RemoteError::new(429, "Quota exceeded for quota metric 'Read requests'")
    }

    pub fn backend_error() -> RemoteError {
        RemoteError::new(503, "The service is currently unavailable")
    }
}

// ============================================================================
// ASSERTIONS
// ============================================================================

pub mod assertions {
    use super::*;

    /// Assert the records sit at exactly these sheet positions, in order.
    pub fn assert_positions(records: &[Record], expected: &[u32]) {
        let actual: Vec<u32> = records
            .iter()
            .map(|r| r.position().map(RowPosition::get).unwrap_or(0))
            .collect();
        assert_eq!(actual, expected, "record positions");
    }

    /// Assert one field across all records, in order.
    pub fn assert_field_values(records: &[Record], field: &str, expected: &[&str]) {
        let actual: Vec<&str> = records.iter().map(|r| r.get(field)).collect();
        assert_eq!(actual, expected, "values of field {:?}", field);
    }
}
