//! sheetline Core - Data Types
//!
//! Pure data structures shared by the access layer and its callers: dataset
//! keys, records, A1 ranges, header mapping, the error taxonomy and
//! configuration. No I/O lives here.

pub mod config;
pub mod error;
pub mod header;
pub mod range;
pub mod record;

pub use config::{CacheConfig, RetryConfig, StoreConfig, DEFAULT_API_BASE_URL};
pub use error::{
    ConfigError, ErrorClass, ProgrammerError, RemoteError, SheetlineError, SheetlineResult,
};
pub use header::{HeaderCache, HeaderMap, RowView};
pub use range::{column_index, column_letters, CellRef, RangeSpec};
pub use record::{DatasetKey, Record, RowPosition};

/// A raw 2-D cell grid as returned by the store. Row 0 is the header row.
pub type Grid = Vec<Vec<String>>;
