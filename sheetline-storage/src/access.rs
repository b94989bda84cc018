//! Composition root.
//!
//! [`SheetAccess`] wires one store, one registry and one write clock into the
//! read, lookup and write paths. Everything is constructor-injected: build one
//! per process (or share a registry across several via
//! [`SheetAccessBuilder::with_registry`]) and hand out references.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sheetline_core::{
    CacheConfig, DatasetKey, Grid, RangeSpec, Record, RemoteError, RetryConfig, RowPosition,
    SheetlineResult,
};
use tracing::info;

use crate::cache::{
    CacheRegistry, EntryState, FlightStats, InvalidationMap, Invalidator, ReadThroughCache,
    RecordOrder, RowParser, WriteClock,
};
use crate::catalog::DatasetCatalog;
use crate::lookup::{LookupIndex, RowMatch};
use crate::retry::RetryExecutor;
use crate::store::RemoteStore;
use crate::writer::SheetWriter;

pub struct SheetAccessBuilder {
    store: Arc<dyn RemoteStore>,
    cache: CacheConfig,
    retry: RetryConfig,
    catalog: DatasetCatalog,
    dependents: InvalidationMap,
    registry: Option<Arc<CacheRegistry>>,
    clock: Option<Arc<WriteClock>>,
}

impl SheetAccessBuilder {
    pub fn new(store: Arc<dyn RemoteStore>) -> Self {
        Self {
            store,
            cache: CacheConfig::default(),
            retry: RetryConfig::default(),
            catalog: DatasetCatalog::new(),
            dependents: InvalidationMap::new(),
            registry: None,
            clock: None,
        }
    }

    pub fn with_cache_config(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_catalog(mut self, catalog: DatasetCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn with_invalidation_map(mut self, dependents: InvalidationMap) -> Self {
        self.dependents = dependents;
        self
    }

    /// Share an existing registry, so invalidations from either side are
    /// seen by both.
    pub fn with_registry(mut self, registry: Arc<CacheRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_write_clock(mut self, clock: Arc<WriteClock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn build(self) -> SheetlineResult<SheetAccess> {
        self.retry.validate()?;

        let registry = self.registry.unwrap_or_default();
        let clock = self.clock.unwrap_or_default();
        let retry = RetryExecutor::new(self.retry);
        let invalidator = Invalidator::new(Arc::clone(&registry), clock);

        info!(
            datasets = self.catalog.len(),
            default_ttl_ms = self.cache.default_ttl.as_millis() as u64,
            max_attempts = retry.config().max_attempts,
            "Sheet access initialized"
        );

        Ok(SheetAccess {
            cache: ReadThroughCache::new(registry, retry.clone()),
            lookup: LookupIndex::new(Arc::clone(&self.store), retry.clone()),
            writer: SheetWriter::new(
                Arc::clone(&self.store),
                retry,
                invalidator.clone(),
                self.dependents,
            ),
            store: self.store,
            invalidator,
            catalog: self.catalog,
            default_ttl: self.cache.default_ttl,
        })
    }

    /// A builder over the Sheets REST client configured by `config`.
    #[cfg(feature = "http")]
    pub fn from_config(config: &sheetline_core::StoreConfig) -> SheetlineResult<Self> {
        let client = crate::sheets_api::SheetsClient::new(config)?;
        Ok(Self::new(Arc::new(client))
            .with_cache_config(config.cache.clone())
            .with_retry_config(config.retry.clone()))
    }

    /// [`from_config`](Self::from_config) with configuration read from the
    /// environment.
    #[cfg(feature = "http")]
    pub fn from_env() -> SheetlineResult<Self> {
        let config = sheetline_core::StoreConfig::from_env()?;
        Self::from_config(&config)
    }
}

pub struct SheetAccess {
    store: Arc<dyn RemoteStore>,
    cache: ReadThroughCache,
    lookup: LookupIndex,
    invalidator: Invalidator,
    writer: SheetWriter,
    catalog: DatasetCatalog,
    default_ttl: Duration,
}

impl SheetAccess {
    pub fn builder(store: Arc<dyn RemoteStore>) -> SheetAccessBuilder {
        SheetAccessBuilder::new(store)
    }

    /// Sheets-backed access with no catalog or invalidation routes, configured
    /// from the environment.
    #[cfg(feature = "http")]
    pub fn from_env() -> SheetlineResult<Self> {
        SheetAccessBuilder::from_env()?.build()
    }

    /// Cached read with a caller-supplied fetch, parser and ordering.
    ///
    /// Transient failures degrade to the previous snapshot or an empty list;
    /// only a permanent remote error is returned.
    pub async fn read<F, Fut>(
        &self,
        key: &DatasetKey,
        ttl: Duration,
        fetch: F,
        parser: &dyn RowParser,
        sort: Option<&RecordOrder>,
    ) -> SheetlineResult<Arc<Vec<Record>>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Grid, RemoteError>>,
    {
        Ok(self
            .cache
            .fetch_and_cache(key, ttl, fetch, parser, sort)
            .await?)
    }

    /// Cached read of a dataset registered in the catalog.
    ///
    /// Record positions count from the recipe range's first row, matching
    /// [`find_by_value`](Self::find_by_value) over the same range. Fails for
    /// an unknown key, a malformed recipe range, or a permanent remote error.
    pub async fn read_dataset(&self, key: &str) -> SheetlineResult<Arc<Vec<Record>>> {
        let recipe = self.catalog.get(key)?;
        let ttl = recipe.ttl().unwrap_or(self.default_ttl);
        let store = &self.store;
        let range = recipe.range();
        let header_row = RowPosition::new(RangeSpec::parse(range)?.first_row());
        Ok(self
            .cache
            .fetch_and_cache_at(
                recipe.key(),
                ttl,
                header_row,
                || store.read_range(range),
                recipe.parser(),
                recipe.sort(),
            )
            .await?)
    }

    /// Uncached lookup; see [`LookupIndex::find_by_value`].
    pub async fn find_by_value(
        &self,
        range: &str,
        column_index: usize,
        target: &str,
    ) -> SheetlineResult<Option<RowMatch>> {
        self.lookup.find_by_value(range, column_index, target).await
    }

    /// Invalidate one key, or every key when `key` is `None`. Returns the
    /// new write clock value.
    pub fn invalidate(&self, key: Option<&DatasetKey>) -> DateTime<Utc> {
        self.invalidator.invalidate(key)
    }

    pub fn write_clock(&self) -> DateTime<Utc> {
        self.invalidator.clock().read()
    }

    /// State of a catalog dataset, judged against its effective TTL.
    pub fn state(&self, key: &DatasetKey) -> EntryState {
        let ttl = self
            .catalog
            .get(key.as_str())
            .ok()
            .and_then(|recipe| recipe.ttl())
            .unwrap_or(self.default_ttl);
        self.cache.state(key, ttl)
    }

    pub fn flight_stats(&self) -> FlightStats {
        self.cache.flight_stats()
    }

    pub fn writer(&self) -> &SheetWriter {
        &self.writer
    }

    pub fn lookup(&self) -> &LookupIndex {
        &self.lookup
    }

    pub fn registry(&self) -> &Arc<CacheRegistry> {
        self.cache.registry()
    }

    pub fn catalog(&self) -> &DatasetCatalog {
        &self.catalog
    }

    pub fn store(&self) -> &Arc<dyn RemoteStore> {
        &self.store
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }
}
