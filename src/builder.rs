//! Client builder for flexible configuration.

use crate::db::GeoWatch;
use crate::store::{DocumentStore, MemoryStore};
use crate::types::Config;
use std::sync::Arc;

/// Builder for a [`GeoWatch`] client with a custom store backend and
/// configuration.
///
/// # Examples
///
/// ```rust
/// use geowatch::GeoWatchBuilder;
///
/// let watch = GeoWatchBuilder::new().write_precision(8).build();
/// assert_eq!(watch.config().write_precision, 8);
/// ```
#[derive(Default)]
pub struct GeoWatchBuilder {
    store: Option<Arc<dyn DocumentStore>>,
    config: Config,
}

impl GeoWatchBuilder {
    /// Create a new builder with default in-memory configuration.
    pub fn new() -> Self {
        Self {
            store: None,
            config: Config::default(),
        }
    }

    /// Set the store backend. Defaults to a fresh in-memory store.
    pub fn store(mut self, store: Arc<dyn DocumentStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the full client configuration.
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Set the geohash length written into stored records.
    ///
    /// # Panics
    ///
    /// Panics when `precision` is outside `1..=22`.
    pub fn write_precision(mut self, precision: usize) -> Self {
        self.config = Config::with_write_precision(precision);
        self
    }

    /// Build the client.
    pub fn build(self) -> GeoWatch {
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryStore::new()) as Arc<dyn DocumentStore>);
        GeoWatch::with_config(store, self.config)
    }
}
