//! A1-notation range specs.
//!
//! Writers build ranges like `Opportunities!A7:ZZ7`, and invalidation routing
//! needs the sheet name back out of whatever range was written. The store API
//! itself still takes plain strings.

use std::fmt;

use crate::error::ProgrammerError;
use crate::record::RowPosition;

/// Zero-based column index for column letters (`A` = 0, `AA` = 26).
pub fn column_index(letters: &str) -> Option<u32> {
    if letters.is_empty() {
        return None;
    }
    let mut index: u32 = 0;
    for c in letters.chars() {
        if !c.is_ascii_alphabetic() {
            return None;
        }
        let digit = (c.to_ascii_uppercase() as u32) - ('A' as u32) + 1;
        index = index.checked_mul(26)?.checked_add(digit)?;
    }
    Some(index - 1)
}

/// Column letters for a zero-based column index.
pub fn column_letters(index: u32) -> String {
    let mut n = index as u64 + 1;
    let mut letters = Vec::new();
    while n > 0 {
        n -= 1;
        letters.push((b'A' + (n % 26) as u8) as char);
        n /= 26;
    }
    letters.iter().rev().collect()
}

/// One end of a range. Either part may be open (`A` or `5`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellRef {
    /// Zero-based column.
    pub column: Option<u32>,
    /// 1-based row.
    pub row: Option<u32>,
}

impl CellRef {
    fn parse(raw: &str, range: &str) -> Result<Self, ProgrammerError> {
        let malformed = |reason: &str| ProgrammerError::MalformedRange {
            range: range.to_string(),
            reason: reason.to_string(),
        };

        let split = raw
            .find(|c: char| c.is_ascii_digit())
            .unwrap_or(raw.len());
        let (letters, digits) = raw.split_at(split);
        if letters.is_empty() && digits.is_empty() {
            return Err(malformed("empty cell reference"));
        }

        let column = if letters.is_empty() {
            None
        } else {
            Some(column_index(letters).ok_or_else(|| malformed("invalid column letters"))?)
        };
        let row = if digits.is_empty() {
            None
        } else {
            let row: u32 = digits.parse().map_err(|_| malformed("invalid row number"))?;
            if row == 0 {
                return Err(malformed("rows are numbered from 1"));
            }
            Some(row)
        };

        Ok(Self { column, row })
    }
}

impl fmt::Display for CellRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(column) = self.column {
            f.write_str(&column_letters(column))?;
        }
        if let Some(row) = self.row {
            write!(f, "{}", row)?;
        }
        Ok(())
    }
}

/// A parsed `Sheet!A1:B2` range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeSpec {
    pub sheet: String,
    pub start: Option<CellRef>,
    pub end: Option<CellRef>,
}

impl RangeSpec {
    pub fn parse(range: &str) -> Result<Self, ProgrammerError> {
        let malformed = |reason: &str| ProgrammerError::MalformedRange {
            range: range.to_string(),
            reason: reason.to_string(),
        };

        let (sheet, cells) = if let Some(quoted) = range.strip_prefix('\'') {
            let mut sheet = String::new();
            let mut chars = quoted.char_indices().peekable();
            let mut rest = None;
            while let Some((i, c)) = chars.next() {
                if c == '\'' {
                    if matches!(chars.peek(), Some((_, '\''))) {
                        chars.next();
                        sheet.push('\'');
                        continue;
                    }
                    rest = Some(&quoted[i + 1..]);
                    break;
                }
                sheet.push(c);
            }
            let rest = rest.ok_or_else(|| malformed("unterminated sheet quote"))?;
            let cells = match rest {
                "" => None,
                r => Some(r.strip_prefix('!').ok_or_else(|| malformed("expected '!'"))?),
            };
            (sheet, cells)
        } else {
            match range.split_once('!') {
                Some((sheet, cells)) => (sheet.to_string(), Some(cells)),
                None => (range.to_string(), None),
            }
        };

        if sheet.trim().is_empty() {
            return Err(malformed("missing sheet name"));
        }

        let (start, end) = match cells {
            None => (None, None),
            Some(cells) => match cells.split_once(':') {
                Some((start, end)) => (
                    Some(CellRef::parse(start, range)?),
                    Some(CellRef::parse(end, range)?),
                ),
                None => {
                    let cell = CellRef::parse(cells, range)?;
                    (Some(cell), Some(cell))
                }
            },
        };

        Ok(Self { sheet, start, end })
    }

    /// The whole sheet.
    pub fn sheet(sheet: impl Into<String>) -> Self {
        Self {
            sheet: sheet.into(),
            start: None,
            end: None,
        }
    }

    /// Full columns `first..=last`, e.g. `Contacts!A:M`.
    pub fn columns(sheet: impl Into<String>, first: u32, last: u32) -> Self {
        Self {
            sheet: sheet.into(),
            start: Some(CellRef {
                column: Some(first),
                row: None,
            }),
            end: Some(CellRef {
                column: Some(last),
                row: None,
            }),
        }
    }

    /// One row from column A through `last_column`.
    pub fn row(sheet: impl Into<String>, position: RowPosition, last_column: u32) -> Self {
        Self {
            sheet: sheet.into(),
            start: Some(CellRef {
                column: Some(0),
                row: Some(position.get()),
            }),
            end: Some(CellRef {
                column: Some(last_column),
                row: Some(position.get()),
            }),
        }
    }

    /// The header row through `last_column`.
    pub fn header(sheet: impl Into<String>, last_column: u32) -> Self {
        Self::row(sheet, RowPosition::HEADER, last_column)
    }

    /// First row covered, 1-based.
    pub fn first_row(&self) -> u32 {
        self.start.and_then(|c| c.row).unwrap_or(1)
    }

    /// Last row covered, if bounded.
    pub fn last_row(&self) -> Option<u32> {
        self.end.and_then(|c| c.row)
    }

    /// First column covered, zero-based.
    pub fn first_column(&self) -> u32 {
        self.start.and_then(|c| c.column).unwrap_or(0)
    }

    /// Last column covered, if bounded.
    pub fn last_column(&self) -> Option<u32> {
        self.end.and_then(|c| c.column)
    }

    fn needs_quotes(&self) -> bool {
        self.sheet
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '!' | ':' | '\''))
    }
}

impl fmt::Display for RangeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.needs_quotes() {
            write!(f, "'{}'", self.sheet.replace('\'', "''"))?;
        } else {
            f.write_str(&self.sheet)?;
        }
        match (self.start, self.end) {
            (Some(start), Some(end)) if start == end => write!(f, "!{}", start),
            (Some(start), Some(end)) => write!(f, "!{}:{}", start, end),
            (Some(cell), None) | (None, Some(cell)) => write!(f, "!{}", cell),
            (None, None) => Ok(()),
        }
    }
}
