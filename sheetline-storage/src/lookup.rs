//! Uncached row lookup by column value.
//!
//! Every call reads the range fresh (through the retry executor) and scans it
//! linearly. Matches are exact after lower-casing both sides, so "Acme" finds
//! "acme" but not "Acme Corp". Positions are sheet rows counted from the
//! range's first row, the same rule cached reads use.

use std::sync::Arc;

use sheetline_core::{Grid, HeaderMap, RangeSpec, RowPosition, SheetlineResult};
use tracing::debug;

use crate::retry::RetryExecutor;
use crate::store::RemoteStore;

/// A matching row and its 1-based sheet position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowMatch {
    pub row_data: Vec<String>,
    pub position: RowPosition,
}

pub struct LookupIndex {
    store: Arc<dyn RemoteStore>,
    retry: RetryExecutor,
}

impl LookupIndex {
    pub fn new(store: Arc<dyn RemoteStore>, retry: RetryExecutor) -> Self {
        Self { store, retry }
    }

    /// First data row of `range` whose cell at `column_index` equals `target`
    /// case-insensitively.
    ///
    /// The first row of the range is the header and is never matched. A
    /// column index beyond the header width, or a range that does not exist,
    /// yields `None`. Other remote failures are returned once retries are
    /// exhausted.
    pub async fn find_by_value(
        &self,
        range: &str,
        column_index: usize,
        target: &str,
    ) -> SheetlineResult<Option<RowMatch>> {
        let Some(grid) = self.read(range).await? else {
            return Ok(None);
        };
        let found = scan(&grid, range, column_index, target).next();
        Ok(found)
    }

    /// Every data row matching `target`, in sheet order.
    pub async fn find_all_by_value(
        &self,
        range: &str,
        column_index: usize,
        target: &str,
    ) -> SheetlineResult<Vec<RowMatch>> {
        let Some(grid) = self.read(range).await? else {
            return Ok(Vec::new());
        };
        let found: Vec<RowMatch> = scan(&grid, range, column_index, target).collect();
        Ok(found)
    }

    /// Like [`find_by_value`](Self::find_by_value), but the column is named
    /// by its header.
    pub async fn find_by_header(
        &self,
        range: &str,
        header_name: &str,
        target: &str,
    ) -> SheetlineResult<Option<RowMatch>> {
        let Some(grid) = self.read(range).await? else {
            return Ok(None);
        };
        let header = HeaderMap::from_grid(&grid);
        let Some(column_index) = header.index_of(header_name) else {
            debug!(range, header = header_name, "Lookup header not present");
            return Ok(None);
        };
        let found = scan(&grid, range, column_index, target).next();
        Ok(found)
    }

    async fn read(&self, range: &str) -> SheetlineResult<Option<Grid>> {
        match self.retry.execute(|| self.store.read_range(range)).await {
            Ok(grid) => Ok(Some(grid)),
            Err(err) if err.is_structural_absence() => {
                debug!(range, "Lookup range does not exist");
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }
}

fn scan<'g>(
    grid: &'g Grid,
    range: &str,
    column_index: usize,
    target: &str,
) -> impl Iterator<Item = RowMatch> + 'g {
    let width = grid.first().map(Vec::len);
    let within_header = width.map_or(true, |width| column_index < width);
    let header_row = RangeSpec::parse(range)
        .map_or(RowPosition::HEADER, |spec| RowPosition::new(spec.first_row()));
    let target = target.to_lowercase();

    grid.iter()
        .skip(1)
        .enumerate()
        .filter(move |_| within_header)
        .filter_map(move |(index, row)| {
            let cell = row.get(column_index)?;
            if cell.to_lowercase() != target {
                return None;
            }
            Some(RowMatch {
                row_data: row.clone(),
                position: RowPosition::below(header_row, index),
            })
        })
}
