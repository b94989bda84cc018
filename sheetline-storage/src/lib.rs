//! sheetline Storage - Cached Access to a Remote Spreadsheet
//!
//! Reads go through a per-dataset snapshot cache with TTL freshness,
//! single-flight coalescing and bounded retries. Writes are retried,
//! surface their errors, and invalidate the datasets derived from the
//! written sheet.
//!
//! The store itself sits behind [`RemoteStore`]: [`SheetsClient`] talks to
//! the Sheets REST API (feature `http`), [`InMemoryStore`] backs tests.

pub mod access;
pub mod cache;
pub mod catalog;
pub mod lookup;
pub mod memory;
pub mod retry;
#[cfg(feature = "http")]
pub mod sheets_api;
pub mod store;
pub mod telemetry;
pub mod writer;

pub use access::{SheetAccess, SheetAccessBuilder};
pub use cache::{
    order_by_field, parse_grid, parse_grid_at, row_parser, AllColumns, CacheEntry, CacheRegistry, EntryState,
    FlightStats, Freshness, InvalidationMap, Invalidator, ReadThroughCache, RecordOrder,
    RowParser, SharedParser, SingleFlight, WriteClock,
};
pub use catalog::{DatasetCatalog, DatasetRecipe};
pub use lookup::{LookupIndex, RowMatch};
pub use memory::InMemoryStore;
pub use retry::RetryExecutor;
#[cfg(feature = "http")]
pub use sheets_api::SheetsClient;
pub use store::{CellUpdate, RemoteStore};
pub use telemetry::{init_tracing, TelemetryConfig, TelemetryError};
pub use writer::{
    BatchOutcome, FieldUpdate, FoundOrAppended, SheetWriter, HEADER_SPAN_LAST_COLUMN,
};
