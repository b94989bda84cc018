//! In-memory store.
//!
//! A complete `RemoteStore` over in-process grids. It interprets A1 ranges the
//! way the real store does, including failing with "Unable to parse range"
//! for unknown sheets, so readers and writers can be exercised end to end.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use ::async_trait::async_trait;
use sheetline_core::{Grid, RangeSpec, RemoteError, RowPosition};

use crate::store::{CellUpdate, RemoteStore};

#[derive(Debug, Clone)]
struct MemorySheet {
    id: i64,
    rows: Grid,
}

/// In-memory implementation of [`RemoteStore`].
#[derive(Debug, Default)]
pub struct InMemoryStore {
    sheets: RwLock<HashMap<String, MemorySheet>>,
    next_id: RwLock<i64>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`InMemoryStore::insert_sheet`].
    pub fn with_sheet(self, name: impl Into<String>, rows: Grid) -> Self {
        self.insert_sheet(name, rows);
        self
    }

    /// Create or replace a sheet. Returns its structural id.
    pub fn insert_sheet(&self, name: impl Into<String>, rows: Grid) -> i64 {
        let name = name.into();
        let mut sheets = self.sheets.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(sheet) = sheets.get_mut(&name) {
            sheet.rows = rows;
            return sheet.id;
        }
        let mut next_id = self.next_id.write().unwrap_or_else(PoisonError::into_inner);
        *next_id += 1;
        let id = *next_id * 1000;
        sheets.insert(name, MemorySheet { id, rows });
        id
    }

    pub fn remove_sheet(&self, name: &str) -> bool {
        self.sheets
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
            .is_some()
    }

    /// Copy of a sheet's rows, exactly as stored.
    pub fn sheet_rows(&self, name: &str) -> Option<Grid> {
        self.sheets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .map(|sheet| sheet.rows.clone())
    }

    fn parse(range: &str) -> Result<RangeSpec, RemoteError> {
        RangeSpec::parse(range).map_err(|_| RemoteError::range_not_found(range))
    }

    fn write_cells(rows: &mut Grid, spec: &RangeSpec, values: &Grid) {
        let first_row = spec.first_row() as usize - 1;
        let first_column = spec.first_column() as usize;
        for (offset, row) in values.iter().enumerate() {
            let target = first_row + offset;
            if rows.len() <= target {
                rows.resize(target + 1, Vec::new());
            }
            let cells = &mut rows[target];
            if cells.len() < first_column + row.len() {
                cells.resize(first_column + row.len(), String::new());
            }
            for (column, value) in row.iter().enumerate() {
                cells[first_column + column] = value.clone();
            }
        }
    }
}

fn trim_row(mut row: Vec<String>) -> Vec<String> {
    while row.last().is_some_and(|c| c.is_empty()) {
        row.pop();
    }
    row
}

#[async_trait]
impl RemoteStore for InMemoryStore {
    async fn read_range(&self, range: &str) -> Result<Grid, RemoteError> {
        let spec = Self::parse(range)?;
        let sheets = self.sheets.read().unwrap_or_else(PoisonError::into_inner);
        let sheet = sheets
            .get(&spec.sheet)
            .ok_or_else(|| RemoteError::range_not_found(range))?;

        let first_row = spec.first_row() as usize - 1;
        let last_row = spec
            .last_row()
            .map(|r| r as usize)
            .unwrap_or(sheet.rows.len())
            .min(sheet.rows.len());
        let first_column = spec.first_column() as usize;
        let last_column = spec.last_column().map(|c| c as usize);

        let mut grid: Grid = sheet
            .rows
            .get(first_row..last_row.max(first_row))
            .unwrap_or_default()
            .iter()
            .map(|row| {
                let end = last_column.map(|c| c + 1).unwrap_or(row.len()).min(row.len());
                let cells = row.get(first_column..end.max(first_column)).unwrap_or_default();
                trim_row(cells.to_vec())
            })
            .collect();

        while grid.last().is_some_and(|row| row.is_empty()) {
            grid.pop();
        }
        Ok(grid)
    }

    async fn append_row(
        &self,
        range: &str,
        row: Vec<String>,
    ) -> Result<RowPosition, RemoteError> {
        let spec = Self::parse(range)?;
        let mut sheets = self.sheets.write().unwrap_or_else(PoisonError::into_inner);
        let sheet = sheets
            .get_mut(&spec.sheet)
            .ok_or_else(|| RemoteError::range_not_found(range))?;

        let occupied = sheet
            .rows
            .iter()
            .rposition(|r| r.iter().any(|c| !c.is_empty()))
            .map(|i| i + 1)
            .unwrap_or(0);
        sheet.rows.truncate(occupied);

        let mut cells = vec![String::new(); spec.first_column() as usize];
        cells.extend(row);
        sheet.rows.push(cells);
        Ok(RowPosition::new(sheet.rows.len() as u32))
    }

    async fn update_range(&self, range: &str, rows: Grid) -> Result<(), RemoteError> {
        let spec = Self::parse(range)?;
        let mut sheets = self.sheets.write().unwrap_or_else(PoisonError::into_inner);
        let sheet = sheets
            .get_mut(&spec.sheet)
            .ok_or_else(|| RemoteError::range_not_found(range))?;
        Self::write_cells(&mut sheet.rows, &spec, &rows);
        Ok(())
    }

    async fn batch_update_cells(&self, updates: Vec<CellUpdate>) -> Result<(), RemoteError> {
        let mut sheets = self.sheets.write().unwrap_or_else(PoisonError::into_inner);

        // Validate every range before writing anything.
        let mut parsed = Vec::with_capacity(updates.len());
        for update in &updates {
            let spec = Self::parse(&update.range)?;
            if !sheets.contains_key(&spec.sheet) {
                return Err(RemoteError::range_not_found(&update.range));
            }
            parsed.push(spec);
        }

        for (spec, update) in parsed.iter().zip(&updates) {
            if let Some(sheet) = sheets.get_mut(&spec.sheet) {
                Self::write_cells(&mut sheet.rows, spec, &update.values);
            }
        }
        Ok(())
    }

    async fn delete_rows(
        &self,
        structural_id: i64,
        start_index: u32,
        end_index: u32,
    ) -> Result<(), RemoteError> {
        if start_index >= end_index {
            return Err(RemoteError::new(
                400,
                format!("Invalid row span {}..{}", start_index, end_index),
            ));
        }
        let mut sheets = self.sheets.write().unwrap_or_else(PoisonError::into_inner);
        let sheet = sheets
            .values_mut()
            .find(|sheet| sheet.id == structural_id)
            .ok_or_else(|| RemoteError::new(400, format!("No grid with id: {}", structural_id)))?;

        let start = (start_index as usize).min(sheet.rows.len());
        let end = (end_index as usize).min(sheet.rows.len());
        sheet.rows.drain(start..end);
        Ok(())
    }

    async fn structural_id(&self, sheet_name: &str) -> Result<i64, RemoteError> {
        self.sheets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(sheet_name)
            .map(|sheet| sheet.id)
            .ok_or_else(|| RemoteError::new(404, format!("Sheet not found: {}", sheet_name)))
    }
}
