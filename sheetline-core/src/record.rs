//! Dataset keys, row positions and parsed records.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ProgrammerError;

/// Identifies one logical cached view, e.g. `"contacts"` or `"companyList"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DatasetKey(String);

impl DatasetKey {
    /// Create a key, rejecting empty keys and keys containing whitespace.
    pub fn new(key: impl Into<String>) -> Result<Self, ProgrammerError> {
        let raw = key.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ProgrammerError::MalformedKey {
                key: raw,
                reason: "key is empty".to_string(),
            });
        }
        if trimmed.chars().any(char::is_whitespace) {
            return Err(ProgrammerError::MalformedKey {
                key: raw,
                reason: "key contains whitespace".to_string(),
            });
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DatasetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for DatasetKey {
    type Error = ProgrammerError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for DatasetKey {
    type Error = ProgrammerError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<DatasetKey> for String {
    fn from(key: DatasetKey) -> Self {
        key.0
    }
}

/// 1-based sheet row number. Row 1 holds the headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RowPosition(u32);

impl RowPosition {
    pub const HEADER: RowPosition = RowPosition(1);

    pub fn new(position: u32) -> Self {
        Self(position)
    }

    /// Position of the data row at zero-based `index` below the header.
    pub fn for_data_index(index: usize) -> Self {
        Self::below(Self::HEADER, index)
    }

    /// Position of the data row at zero-based `index` under a header that
    /// sits at `header`.
    pub fn below(header: RowPosition, index: usize) -> Self {
        Self(header.0 + 1 + index as u32)
    }

    /// Accept only positions that address a data row.
    pub fn validate_data_row(position: u32) -> Result<Self, ProgrammerError> {
        if position <= Self::HEADER.0 {
            return Err(ProgrammerError::InvalidRowPosition { position });
        }
        Ok(Self(position))
    }

    pub fn get(self) -> u32 {
        self.0
    }

    /// Zero-based offset of this row within the sheet.
    pub fn zero_based(self) -> u32 {
        self.0.saturating_sub(1)
    }
}

impl fmt::Display for RowPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A parsed row: label to value, plus the row it came from.
///
/// The position is the handle business code passes back to writers.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Record {
    position: Option<RowPosition>,
    fields: BTreeMap<String, String>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn at(position: RowPosition) -> Self {
        Self {
            position: Some(position),
            fields: BTreeMap::new(),
        }
    }

    /// Value for `label`, or `""` when the record has no such field.
    pub fn get(&self, label: &str) -> &str {
        self.fields.get(label).map(String::as_str).unwrap_or("")
    }

    pub fn contains(&self, label: &str) -> bool {
        self.fields.contains_key(label)
    }

    pub fn set(&mut self, label: impl Into<String>, value: impl Into<String>) {
        self.fields.insert(label.into(), value.into());
    }

    pub fn with(mut self, label: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(label, value);
        self
    }

    pub fn position(&self) -> Option<RowPosition> {
        self.position
    }

    pub fn set_position(&mut self, position: RowPosition) {
        self.position = Some(position);
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dataset_key_trims() {
        let key = DatasetKey::new("  contacts ").unwrap();
        assert_eq!(key.as_str(), "contacts");
        assert_eq!(key.to_string(), "contacts");
    }

    #[test]
    fn test_dataset_key_rejects_malformed() {
        assert!(matches!(
            DatasetKey::new("   "),
            Err(ProgrammerError::MalformedKey { .. })
        ));
        assert!(matches!(
            DatasetKey::new("event logs"),
            Err(ProgrammerError::MalformedKey { .. })
        ));
    }

    #[test]
    fn test_row_position_for_data_index() {
        assert_eq!(RowPosition::for_data_index(0).get(), 2);
        assert_eq!(RowPosition::for_data_index(9).get(), 11);
        assert_eq!(RowPosition::below(RowPosition::new(5), 0).get(), 6);
        assert_eq!(RowPosition::new(5).zero_based(), 4);
    }

    #[test]
    fn test_row_position_rejects_header() {
        assert!(RowPosition::validate_data_row(0).is_err());
        assert!(RowPosition::validate_data_row(1).is_err());
        assert_eq!(RowPosition::validate_data_row(2).unwrap().get(), 2);
    }

    #[test]
    fn test_record_missing_field_is_empty() {
        let record = Record::at(RowPosition::new(3)).with("name", "Acme");
        assert_eq!(record.get("name"), "Acme");
        assert_eq!(record.get("fax"), "");
        assert!(!record.contains("fax"));
        assert_eq!(record.position(), Some(RowPosition::new(3)));
    }

    #[test]
    fn test_record_serde_shape() {
        let record = Record::at(RowPosition::new(2)).with("id", "C1");
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["position"], 2);
        assert_eq!(json["fields"]["id"], "C1");
    }
}
