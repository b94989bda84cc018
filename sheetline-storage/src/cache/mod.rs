//! Dataset cache with coalesced, retrying refreshes.
//!
//! Each dataset key maps to one snapshot in a shared [`CacheRegistry`]. Reads
//! go through [`ReadThroughCache`], which serves fresh snapshots directly and
//! otherwise funnels concurrent callers into a single fetch. Writers mark
//! entries stale through an [`Invalidator`], which also advances the
//! [`WriteClock`] that pollers watch.
//!
//! # Example
//!
//! ```ignore
//! let records = cache
//!     .fetch_and_cache(&key, ttl, || store.read_range("Contacts!A:F"), &AllColumns, None)
//!     .await?;
//!
//! // After a write to the Contacts sheet
//! invalidator.invalidate(Some(&key));
//! ```

pub mod freshness;
pub mod read_through;
pub mod registry;
pub mod single_flight;
pub mod watermark;

pub use freshness::{EntryState, Freshness};
pub use read_through::{
    order_by_field, parse_grid, parse_grid_at, row_parser, AllColumns, ReadThroughCache, RecordOrder, RowParser,
    SharedParser,
};
pub use registry::{CacheEntry, CacheRegistry};
pub use single_flight::{FlightStats, SingleFlight};
pub use watermark::{InvalidationMap, Invalidator, WriteClock};
