//! Error types for sheetline operations

use thiserror::Error;

/// Phrases the store uses in rate-limit responses that do not carry a 429.
const QUOTA_PHRASES: &[&str] = &["quota exceeded", "too many requests"];

/// Phrases the store uses when a range or sheet does not exist.
const ABSENT_RANGE_PHRASES: &[&str] = &["unable to parse range", "range not found"];

/// How a remote failure should be treated by the retry executor and readers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Rate limit or server error. Retried, then masked on reads.
    Transient,
    /// The range or sheet does not exist. Reads treat it as an empty result.
    StructuralAbsence,
    /// Any other failure. Propagated without retry.
    Permanent,
}

/// An error reported by the remote store, as `{code, message}`.
///
/// Code `0` is used for transport failures where no HTTP status was received.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Remote store error {code}: {message}")]
pub struct RemoteError {
    pub code: i32,
    pub message: String,
}

impl RemoteError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// A failure that never produced an HTTP status.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(0, message)
    }

    /// The error the store returns for a range naming an unknown sheet.
    pub fn range_not_found(range: &str) -> Self {
        Self::new(400, format!("Unable to parse range: {}", range))
    }

    pub fn classify(&self) -> ErrorClass {
        let message = self.message.to_lowercase();

        let rate_limited =
            self.code == 429 || QUOTA_PHRASES.iter().any(|phrase| message.contains(phrase));
        if rate_limited || (500..=599).contains(&self.code) {
            return ErrorClass::Transient;
        }

        if self.code == 400 && ABSENT_RANGE_PHRASES.iter().any(|phrase| message.contains(phrase))
        {
            return ErrorClass::StructuralAbsence;
        }

        ErrorClass::Permanent
    }

    pub fn is_transient(&self) -> bool {
        self.classify() == ErrorClass::Transient
    }

    pub fn is_structural_absence(&self) -> bool {
        self.classify() == ErrorClass::StructuralAbsence
    }
}

/// Misuse of the access layer by calling code. Never retried.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProgrammerError {
    #[error("No dataset recipe registered for key: {key}")]
    UnknownDataset { key: String },

    #[error("Malformed dataset key {key:?}: {reason}")]
    MalformedKey { key: String, reason: String },

    #[error("Malformed range {range:?}: {reason}")]
    MalformedRange { range: String, reason: String },

    #[error("Invalid row position {position}: data rows start at 2")]
    InvalidRowPosition { position: u32 },

    #[error("No header row found in {range}")]
    MissingHeaderRow { range: String },

    #[error("No data at row {position} in {range}")]
    RowNotFound { range: String, position: u32 },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all sheetline errors.
#[derive(Debug, Clone, Error)]
pub enum SheetlineError {
    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("Programmer error: {0}")]
    Programmer(#[from] ProgrammerError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl SheetlineError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Remote(e) if e.is_transient())
    }

    pub fn is_structural_absence(&self) -> bool {
        matches!(self, Self::Remote(e) if e.is_structural_absence())
    }
}

/// Result type alias for sheetline operations.
pub type SheetlineResult<T> = Result<T, SheetlineError>;

// =============================================================================
// TESTS
// =============================================================================
