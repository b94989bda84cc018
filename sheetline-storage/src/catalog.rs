//! Named dataset recipes.
//!
//! A recipe binds a dataset key to the range it is read from, the parser that
//! turns rows into records, an optional ordering, and an optional TTL
//! override. Reading a key that has no recipe is a programmer error.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use sheetline_core::{DatasetKey, ProgrammerError};

use crate::cache::{AllColumns, RecordOrder, RowParser, SharedParser};

#[derive(Clone)]
pub struct DatasetRecipe {
    key: DatasetKey,
    range: String,
    parser: SharedParser,
    sort: Option<RecordOrder>,
    ttl: Option<Duration>,
}

impl DatasetRecipe {
    pub fn new(key: DatasetKey, range: impl Into<String>, parser: SharedParser) -> Self {
        Self {
            key,
            range: range.into(),
            parser,
            sort: None,
            ttl: None,
        }
    }

    /// A recipe that keeps every mapped column.
    pub fn all_columns(key: DatasetKey, range: impl Into<String>) -> Self {
        Self::new(key, range, Arc::new(AllColumns))
    }

    pub fn with_sort(mut self, sort: RecordOrder) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn key(&self) -> &DatasetKey {
        &self.key
    }

    pub fn range(&self) -> &str {
        &self.range
    }

    pub fn parser(&self) -> &dyn RowParser {
        self.parser.as_ref()
    }

    pub fn sort(&self) -> Option<&RecordOrder> {
        self.sort.as_ref()
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }
}

impl fmt::Debug for DatasetRecipe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatasetRecipe")
            .field("key", &self.key)
            .field("range", &self.range)
            .field("sorted", &self.sort.is_some())
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Default)]
pub struct DatasetCatalog {
    recipes: HashMap<DatasetKey, DatasetRecipe>,
}

impl DatasetCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a recipe, returning the one it replaced.
    pub fn register(&mut self, recipe: DatasetRecipe) -> Option<DatasetRecipe> {
        self.recipes.insert(recipe.key.clone(), recipe)
    }

    pub fn with(mut self, recipe: DatasetRecipe) -> Self {
        self.register(recipe);
        self
    }

    pub fn get(&self, key: &str) -> Result<&DatasetRecipe, ProgrammerError> {
        let key = DatasetKey::new(key)?;
        self.recipes
            .get(&key)
            .ok_or_else(|| ProgrammerError::UnknownDataset {
                key: key.to_string(),
            })
    }

    pub fn keys(&self) -> Vec<&DatasetKey> {
        let mut keys: Vec<_> = self.recipes.keys().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.recipes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recipes.is_empty()
    }
}
