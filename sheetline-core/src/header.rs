//! Header row mapping.
//!
//! Fields are addressed by the label in row 1, not by position. Appending or
//! reordering columns does not break readers; a label absent from the header
//! reads as `""`. Renaming a column is the one breaking change and is not
//! detected here.

use std::collections::HashMap;

use crate::record::{Record, RowPosition};

/// Name to zero-based column index, built from a header row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderMap {
    indices: HashMap<String, usize>,
    /// Mapped names in column order.
    ordered: Vec<(String, usize)>,
    /// Cells in the header row, including skipped ones.
    width: usize,
    /// Names that appeared more than once. Only the first occurrence is mapped.
    duplicates: Vec<String>,
}

impl HeaderMap {
    pub fn from_header_row<S: AsRef<str>>(row: &[S]) -> Self {
        let mut map = Self {
            width: row.len(),
            ..Self::default()
        };

        for (index, cell) in row.iter().enumerate() {
            let name = cell.as_ref().trim();
            if name.is_empty() {
                continue;
            }
            if map.indices.contains_key(name) {
                map.duplicates.push(name.to_string());
                continue;
            }
            map.indices.insert(name.to_string(), index);
            map.ordered.push((name.to_string(), index));
        }

        map
    }

    /// Build from row 0 of a grid. An empty grid yields an empty map.
    pub fn from_grid(grid: &[Vec<String>]) -> Self {
        grid.first()
            .map(|row| Self::from_header_row(row))
            .unwrap_or_default()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.indices.get(name.trim()).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index_of(name).is_some()
    }

    /// Width of the header row in cells.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Number of mapped names.
    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.ordered.iter().map(|(name, _)| name.as_str())
    }

    pub fn duplicates(&self) -> &[String] {
        &self.duplicates
    }

    /// The cell under `name`, or `""` if the column is unknown or the row is short.
    pub fn field<'r, S: AsRef<str>>(&self, row: &'r [S], name: &str) -> &'r str {
        self.index_of(name)
            .and_then(|index| row.get(index))
            .map(AsRef::as_ref)
            .unwrap_or("")
    }

    /// Set the cell under `name`, growing the row to the header width first.
    ///
    /// Returns `false` when the header has no such column.
    pub fn set_field(&self, row: &mut Vec<String>, name: &str, value: impl Into<String>) -> bool {
        let Some(index) = self.index_of(name) else {
            return false;
        };
        let needed = self.width.max(index + 1);
        if row.len() < needed {
            row.resize(needed, String::new());
        }
        row[index] = value.into();
        true
    }
}

/// A data row as seen by a row parser.
#[derive(Debug, Clone, Copy)]
pub struct RowView<'a> {
    header: &'a HeaderMap,
    cells: &'a [String],
    position: RowPosition,
}

impl<'a> RowView<'a> {
    pub fn new(header: &'a HeaderMap, cells: &'a [String], position: RowPosition) -> Self {
        Self {
            header,
            cells,
            position,
        }
    }

    pub fn field(&self, name: &str) -> &'a str {
        self.header.field(self.cells, name)
    }

    /// Positional access, for sheets whose readers predate header mapping.
    pub fn cell(&self, index: usize) -> &'a str {
        self.cells.get(index).map(String::as_str).unwrap_or("")
    }

    pub fn cells(&self) -> &'a [String] {
        self.cells
    }

    pub fn header(&self) -> &'a HeaderMap {
        self.header
    }

    pub fn position(&self) -> RowPosition {
        self.position
    }

    /// True when every cell is blank.
    pub fn is_blank(&self) -> bool {
        self.cells.iter().all(|c| c.trim().is_empty())
    }

    /// A record holding every mapped column.
    pub fn to_record(&self) -> Record {
        let mut record = Record::at(self.position);
        for name in self.header.names() {
            record.set(name, self.field(name));
        }
        record
    }
}

/// Per-operation memo of header maps, keyed by the range they were read from.
///
/// Owned by the caller for the length of one business operation. Never share
/// one across operations: columns can move between them.
#[derive(Debug, Default)]
pub struct HeaderCache {
    maps: HashMap<String, HeaderMap>,
}

impl HeaderCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, range: &str) -> Option<&HeaderMap> {
        self.maps.get(range)
    }

    pub fn insert(&mut self, range: impl Into<String>, map: HeaderMap) -> &HeaderMap {
        let range = range.into();
        self.maps.insert(range.clone(), map);
        &self.maps[&range]
    }

    /// The cached map for `range`, building it from `header_row` on first use.
    pub fn get_or_build<S: AsRef<str>>(&mut self, range: &str, header_row: &[S]) -> &HeaderMap {
        self.maps
            .entry(range.to_string())
            .or_insert_with(|| HeaderMap::from_header_row(header_row))
    }

    pub fn len(&self) -> usize {
        self.maps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }
}
