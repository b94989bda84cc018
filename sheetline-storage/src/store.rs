//! Remote store capability.
//!
//! The access layer depends on the spreadsheet only through this trait. The
//! store is schema-less: rows are addressed by position, columns by the header
//! row, and there are no transactions or indexes.

use ::async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sheetline_core::{Grid, RemoteError, RowPosition};

/// One range/values pair of a batch value update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellUpdate {
    pub range: String,
    pub values: Grid,
}

impl CellUpdate {
    pub fn new(range: impl Into<String>, values: Grid) -> Self {
        Self {
            range: range.into(),
            values,
        }
    }

    /// A single-row update.
    pub fn row(range: impl Into<String>, row: Vec<String>) -> Self {
        Self::new(range, vec![row])
    }
}

/// Async access to a remote tabular store.
///
/// Implementations report failures as `{code, message}` so the retry executor
/// can classify them. A range naming a missing sheet must fail with code 400
/// and an "Unable to parse range" message.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Read a range. Row 0 of the result is the header row when the range
    /// starts at row 1. Trailing empty cells may be omitted.
    async fn read_range(&self, range: &str) -> Result<Grid, RemoteError>;

    /// Append a row after the last non-empty row of the range's sheet and
    /// return the sheet row it landed on.
    async fn append_row(
        &self,
        range: &str,
        row: Vec<String>,
    ) -> Result<RowPosition, RemoteError>;

    /// Overwrite the cells of `range` with `rows`.
    async fn update_range(&self, range: &str, rows: Grid) -> Result<(), RemoteError>;

    /// Apply several value updates in one call.
    async fn batch_update_cells(&self, updates: Vec<CellUpdate>) -> Result<(), RemoteError>;

    /// Delete zero-based rows `start_index..end_index` of the sheet
    /// identified by `structural_id`, shifting later rows up.
    async fn delete_rows(
        &self,
        structural_id: i64,
        start_index: u32,
        end_index: u32,
    ) -> Result<(), RemoteError>;

    /// Numeric id of a sheet, needed by structural operations.
    async fn structural_id(&self, sheet_name: &str) -> Result<i64, RemoteError>;
}
