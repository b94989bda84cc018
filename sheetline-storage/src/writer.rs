//! Write path.
//!
//! Every write goes through the retry executor and, once it succeeds,
//! invalidates the datasets derived from the written sheet. Write failures are
//! returned to the caller; nothing on this path falls back.
//!
//! # Lost updates
//!
//! [`SheetWriter::update_fields`] is read-modify-write with no version check.
//! Two writers updating different fields of the same row can interleave so
//! that the later write restores the earlier one's stale cells. Rows are also
//! addressed by position, so a deletion between a read and a write shifts the
//! target row. Callers that need stronger guarantees must serialise their
//! writes per sheet.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use sheetline_core::{
    HeaderCache, HeaderMap, ProgrammerError, RangeSpec, RowPosition, SheetlineResult,
};
use tracing::{debug, info, warn};

use crate::cache::{InvalidationMap, Invalidator};
use crate::lookup::{LookupIndex, RowMatch};
use crate::retry::RetryExecutor;
use crate::store::{CellUpdate, RemoteStore};

/// Last column read when loading a header row (`ZZ`).
pub const HEADER_SPAN_LAST_COLUMN: u32 = 701;

/// Changes to apply to one row, keyed by header name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldUpdate {
    pub position: u32,
    pub changes: Vec<(String, String)>,
}

impl FieldUpdate {
    pub fn new(position: u32) -> Self {
        Self {
            position,
            changes: Vec::new(),
        }
    }

    pub fn set(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.changes.push((field.into(), value.into()));
        self
    }
}

/// Result of a batch field update.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Rows written.
    pub succeeded: usize,
    /// Positions with no data; nothing was written for them.
    pub skipped: Vec<RowPosition>,
}

/// Result of [`SheetWriter::find_or_append`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoundOrAppended {
    /// The matching row, or the row just appended.
    pub row: RowMatch,
    /// Whether the row was appended by this call.
    pub created: bool,
}

pub struct SheetWriter {
    store: Arc<dyn RemoteStore>,
    retry: RetryExecutor,
    lookup: LookupIndex,
    invalidator: Invalidator,
    dependents: InvalidationMap,
    structural_ids: Mutex<HashMap<String, i64>>,
}

impl SheetWriter {
    pub fn new(
        store: Arc<dyn RemoteStore>,
        retry: RetryExecutor,
        invalidator: Invalidator,
        dependents: InvalidationMap,
    ) -> Self {
        Self {
            lookup: LookupIndex::new(Arc::clone(&store), retry.clone()),
            store,
            retry,
            invalidator,
            dependents,
            structural_ids: Mutex::new(HashMap::new()),
        }
    }

    /// Sheet-to-dataset routes invalidated after each write.
    pub fn dependents(&self) -> &InvalidationMap {
        &self.dependents
    }

    /// Append `row` after the last occupied row of `range`'s sheet. Returns
    /// the position it landed on.
    pub async fn append_row(
        &self,
        range: &str,
        row: Vec<String>,
    ) -> SheetlineResult<RowPosition> {
        let position = self
            .retry
            .execute(|| self.store.append_row(range, row.clone()))
            .await?;
        info!(range, position = position.get(), cells = row.len(), "Appended row");
        self.after_write(range);
        Ok(position)
    }

    /// Find the data row of `range` whose cell at `column_index` matches
    /// `target`, appending `row` when there is none.
    ///
    /// The lookup and the append are separate calls, so two concurrent
    /// callers can both append.
    pub async fn find_or_append(
        &self,
        range: &str,
        column_index: usize,
        target: &str,
        row: Vec<String>,
    ) -> SheetlineResult<FoundOrAppended> {
        if let Some(found) = self.lookup.find_by_value(range, column_index, target).await? {
            debug!(range, target, position = found.position.get(), "Row already present");
            return Ok(FoundOrAppended {
                row: found,
                created: false,
            });
        }
        let position = self.append_row(range, row.clone()).await?;
        Ok(FoundOrAppended {
            row: RowMatch {
                row_data: row,
                position,
            },
            created: true,
        })
    }

    /// Overwrite the row at `position` starting from column A.
    pub async fn update_row(
        &self,
        sheet: &str,
        position: u32,
        row: Vec<String>,
    ) -> SheetlineResult<()> {
        let position = RowPosition::validate_data_row(position)?;
        let last_column = row.len().saturating_sub(1) as u32;
        let range = RangeSpec::row(sheet, position, last_column).to_string();
        self.retry
            .execute(|| self.store.update_range(&range, vec![row.clone()]))
            .await?;
        info!(range = %range, "Updated row");
        self.after_write(sheet);
        Ok(())
    }

    /// Set named fields of one row, leaving the other cells as they were.
    ///
    /// Returns the row as written. Unknown field names are skipped with a
    /// warning. See the module docs for the lost-update hazard.
    pub async fn update_fields(
        &self,
        sheet: &str,
        position: u32,
        changes: &[(&str, &str)],
    ) -> SheetlineResult<Vec<String>> {
        let mut headers = HeaderCache::new();
        self.update_fields_with(&mut headers, sheet, position, changes)
            .await
    }

    /// [`update_fields`](Self::update_fields) reusing headers already loaded
    /// into `headers` by earlier steps of the same operation.
    pub async fn update_fields_with(
        &self,
        headers: &mut HeaderCache,
        sheet: &str,
        position: u32,
        changes: &[(&str, &str)],
    ) -> SheetlineResult<Vec<String>> {
        let position = RowPosition::validate_data_row(position)?;
        let header = self.header(headers, sheet).await?;

        let mut row = self.read_row(sheet, position).await?.ok_or_else(|| {
            ProgrammerError::RowNotFound {
                range: sheet.to_string(),
                position: position.get(),
            }
        })?;

        apply_changes(&header, &mut row, sheet, changes.iter().copied());

        let range = row_range(sheet, position, &header);
        self.retry
            .execute(|| self.store.update_range(&range, vec![row.clone()]))
            .await?;
        info!(range = %range, fields = changes.len(), "Updated row fields");
        self.after_write(sheet);
        Ok(row)
    }

    /// Apply several row updates with one batched write.
    ///
    /// Positions that hold no data are reported in
    /// [`BatchOutcome::skipped`]. When no row qualifies nothing is written.
    pub async fn batch_update_fields(
        &self,
        sheet: &str,
        updates: &[FieldUpdate],
    ) -> SheetlineResult<BatchOutcome> {
        let positions = updates
            .iter()
            .map(|update| RowPosition::validate_data_row(update.position))
            .collect::<Result<Vec<_>, _>>()?;

        let mut headers = HeaderCache::new();
        let header = self.header(&mut headers, sheet).await?;

        let mut outcome = BatchOutcome::default();
        let mut cells = Vec::with_capacity(updates.len());
        for (update, position) in updates.iter().zip(positions) {
            let Some(mut row) = self.read_row(sheet, position).await? else {
                warn!(sheet, position = position.get(), "Row has no data, skipping");
                outcome.skipped.push(position);
                continue;
            };
            apply_changes(
                &header,
                &mut row,
                sheet,
                update
                    .changes
                    .iter()
                    .map(|(field, value)| (field.as_str(), value.as_str())),
            );
            cells.push(CellUpdate::row(row_range(sheet, position, &header), row));
        }

        if cells.is_empty() {
            debug!(sheet, "No rows to update");
            return Ok(outcome);
        }

        outcome.succeeded = cells.len();
        self.retry
            .execute(|| self.store.batch_update_cells(cells.clone()))
            .await?;
        info!(
            sheet,
            succeeded = outcome.succeeded,
            skipped = outcome.skipped.len(),
            "Batch updated rows"
        );
        self.after_write(sheet);
        Ok(outcome)
    }

    /// Delete the row at `position`; later rows shift up by one.
    pub async fn delete_row(&self, sheet: &str, position: u32) -> SheetlineResult<()> {
        let position = RowPosition::validate_data_row(position)?;
        let sheet_id = self.structural_id(sheet).await?;
        let start = position.zero_based();
        self.retry
            .execute(|| self.store.delete_rows(sheet_id, start, start + 1))
            .await?;
        info!(sheet, position = position.get(), "Deleted row");
        self.after_write(sheet);
        Ok(())
    }

    /// Numeric sheet id, memoised for the life of the writer.
    pub async fn structural_id(&self, sheet: &str) -> SheetlineResult<i64> {
        if let Some(id) = self.ids().get(sheet) {
            return Ok(*id);
        }
        let id = self
            .retry
            .execute(|| self.store.structural_id(sheet))
            .await?;
        self.ids().insert(sheet.to_string(), id);
        Ok(id)
    }

    fn ids(&self) -> MutexGuard<'_, HashMap<String, i64>> {
        self.structural_ids
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    async fn header(&self, headers: &mut HeaderCache, sheet: &str) -> SheetlineResult<HeaderMap> {
        let range = RangeSpec::header(sheet, HEADER_SPAN_LAST_COLUMN).to_string();
        if let Some(header) = headers.get(&range) {
            return Ok(header.clone());
        }

        let grid = self
            .retry
            .execute(|| self.store.read_range(&range))
            .await?;
        let header = HeaderMap::from_grid(&grid);
        if header.is_empty() {
            return Err(ProgrammerError::MissingHeaderRow { range }.into());
        }
        if !header.duplicates().is_empty() {
            warn!(sheet, duplicates = ?header.duplicates(), "Duplicate header names, first occurrence wins");
        }
        Ok(headers.insert(range, header).clone())
    }

    async fn read_row(
        &self,
        sheet: &str,
        position: RowPosition,
    ) -> SheetlineResult<Option<Vec<String>>> {
        let range = RangeSpec::row(sheet, position, HEADER_SPAN_LAST_COLUMN).to_string();
        let grid = self
            .retry
            .execute(|| self.store.read_range(&range))
            .await?;
        Ok(grid.into_iter().next().filter(|row| !row.is_empty()))
    }

    fn after_write(&self, range: &str) {
        let keys = self.dependents.dependents_of(range);
        if keys.is_empty() {
            debug!(range, "No datasets depend on written sheet");
            return;
        }
        self.invalidator.invalidate_many(keys);
    }
}

fn apply_changes<'c>(
    header: &HeaderMap,
    row: &mut Vec<String>,
    sheet: &str,
    changes: impl Iterator<Item = (&'c str, &'c str)>,
) {
    if row.len() < header.width() {
        row.resize(header.width(), String::new());
    }
    for (field, value) in changes {
        if !header.set_field(row, field, value) {
            warn!(sheet, field, "Unknown field, not written");
        }
    }
}

fn row_range(sheet: &str, position: RowPosition, header: &HeaderMap) -> String {
    let last_column = header.width().saturating_sub(1) as u32;
    RangeSpec::row(sheet, position, last_column).to_string()
}
